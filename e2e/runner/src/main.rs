// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod config;
mod execute;
mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use config::{ListOptions, ProcessArgs, RunOptions};
use e2e_tests::e2e_testcase::{filtered_test_cases, Framework};
use tracing::{debug, info};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};
use vmi_client::Client;

use crate::execute::ExecutionStats;
use crate::fixtures::TestFixtures;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let runner_args = ProcessArgs::parse();
    set_tracing_subscriber(&runner_args)?;

    info!(?runner_args);

    match &runner_args.command {
        config::Command::Run(opts) => {
            let exit_code = run_tests(opts).await?.tests_failed;
            debug!(exit_code);
            std::process::exit(i32::try_from(exit_code).unwrap_or(i32::MAX));
        }
        config::Command::List(opts) => list_tests(opts),
    }

    Ok(())
}

async fn run_tests(run_opts: &RunOptions) -> anyhow::Result<ExecutionStats> {
    let mut client = Client::new(&run_opts.api_url).with_request_timeout(
        Duration::from_secs(run_opts.request_timeout_secs),
    );
    if let Some(token) = &run_opts.bearer_token {
        client = client.with_bearer_token(token.clone());
    }

    let ctx_params = run_opts.framework_parameters();
    if let Some(dir) = &ctx_params.console_log_directory {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating console log directory {dir}"))?;
    }

    let ctx = Arc::new(Framework::from_client(ctx_params, client));
    let fixtures = TestFixtures::new(ctx.clone());

    // Run the tests and print results.
    let execution_stats =
        execute::run_tests_with_ctx(&ctx, fixtures, run_opts).await?;
    if !execution_stats.failed_test_cases.is_empty() {
        println!("\nfailures:");
        for tc in &execution_stats.failed_test_cases {
            println!("    {}", tc.fully_qualified_name());
        }
        println!();
    }

    println!(
        "test result: {}. {} passed; {} failed; {} skipped; {} not run; \
        finished in {:.2}s\n",
        if execution_stats.tests_failed != 0 { "FAILED" } else { "ok" },
        execution_stats.tests_passed,
        execution_stats.tests_failed,
        execution_stats.tests_skipped,
        execution_stats.tests_not_run,
        execution_stats.duration.as_secs_f64()
    );

    Ok(execution_stats)
}

fn list_tests(list_opts: &ListOptions) {
    println!("Tests enabled after applying filters:\n");

    let mut count = 0;
    for tc in
        filtered_test_cases(&list_opts.include_filter, &list_opts.exclude_filter)
    {
        println!("    {}", tc.fully_qualified_name());
        count += 1
    }

    println!("\n{} test(s) selected", count);
}

fn set_tracing_subscriber(args: &ProcessArgs) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into());
    let subscriber = Registry::default().with(filter.from_env_lossy());
    if args.emit_bunyan {
        let bunyan_layer =
            BunyanFormattingLayer::new("e2e-runner".into(), std::io::stdout);
        let subscriber = subscriber.with(JsonStorageLayer).with(bunyan_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let stdout_log = tracing_subscriber::fmt::layer()
            .with_line_number(true)
            .with_ansi(!args.disable_ansi);
        let subscriber = subscriber.with(stdout_log);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
