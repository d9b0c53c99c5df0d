// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::{Duration, Instant};

use anyhow::Context;
use e2e_tests::e2e_testcase::{
    filtered_test_cases, Framework, TestCase, TestOutcome,
};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::RunOptions;
use crate::fixtures::TestFixtures;

/// Statistics returned after executing a set of tests.
pub struct ExecutionStats {
    /// The number of tests that passed.
    pub tests_passed: u32,

    /// The number of tests that failed.
    pub tests_failed: u32,

    /// The number of tests that marked themselves as skipped.
    pub tests_skipped: u32,

    /// The number of tests that the runner decided not to run (e.g. because of
    /// a failure in a fixture or an interrupt).
    pub tests_not_run: u32,

    /// The total time spent running tests and fixtures.
    pub duration: Duration,

    /// A collection of test cases that returned a failed result.
    pub failed_test_cases: Vec<&'static TestCase>,
}

/// Executes the selected tests one after another using the supplied test
/// context.
pub async fn run_tests_with_ctx(
    ctx: &Framework,
    mut fixtures: TestFixtures,
    run_opts: &RunOptions,
) -> anyhow::Result<ExecutionStats> {
    let executions: Vec<&'static TestCase> =
        filtered_test_cases(&run_opts.include_filter, &run_opts.exclude_filter)
            .collect();

    let mut stats = ExecutionStats {
        tests_passed: 0,
        tests_failed: 0,
        tests_skipped: 0,
        tests_not_run: executions.len() as u32,
        duration: Duration::default(),
        failed_test_cases: Vec::new(),
    };

    if executions.is_empty() {
        info!("No tests selected for execution");
        return Ok(stats);
    }

    let sigint_rx = set_sigint_handler()?;
    info!("Running {} test(s)", executions.len());
    let start_time = Instant::now();

    for tc in executions {
        if *sigint_rx.borrow() {
            info!("Test run interrupted by SIGINT");
            break;
        }

        info!("Starting test {}", tc.fully_qualified_name());

        // A failed setup fixture leaves the namespace in an unknown state, so
        // stop here but still report what ran.
        if let Err(e) = fixtures.test_setup().await {
            error!("Error running test setup fixture: {:#}", e);
            break;
        }

        stats.tests_not_run -= 1;
        let test_outcome = tc.run(ctx).await;

        info!(
            "test {} ... {}{}",
            tc.fully_qualified_name(),
            match test_outcome {
                TestOutcome::Passed => "ok",
                TestOutcome::Failed(_) => "FAILED: ",
                TestOutcome::Skipped(_) => "skipped: ",
            },
            match &test_outcome {
                TestOutcome::Failed(Some(s)) | TestOutcome::Skipped(Some(s)) =>
                    s,
                TestOutcome::Failed(None) | TestOutcome::Skipped(None) =>
                    "[no message]",
                _ => "",
            }
        );

        match test_outcome {
            TestOutcome::Passed => stats.tests_passed += 1,
            TestOutcome::Failed(_) => {
                stats.tests_failed += 1;
                stats.failed_test_cases.push(tc);
            }
            TestOutcome::Skipped(_) => stats.tests_skipped += 1,
        }
    }

    if let Err(e) = fixtures.execution_cleanup().await {
        warn!("Error running execution cleanup fixture: {:#}", e);
    }

    stats.duration = start_time.elapsed();
    Ok(stats)
}

/// Sets a global handler for SIGINT and hands the resulting signal channel over
/// to a task that handles this signal. Returns a receiver to which the signal
/// handler task publishes `true` when SIGINT is received.
fn set_sigint_handler() -> anyhow::Result<watch::Receiver<bool>> {
    let mut sigint = signal(SignalKind::interrupt())
        .context("failed to set SIGINT handler")?;

    let (sigint_tx, sigint_rx) = watch::channel(false);
    tokio::spawn(async move {
        loop {
            sigint.recv().await;

            // A second SIGINT exits immediately with the customary code (128 +
            // SIGINT) even if the current test is not at an await point.
            if *sigint_tx.borrow() {
                error!(
                    "SIGINT received while shutting down, rudely terminating"
                );
                error!("some VMIs may have been leaked!");
                std::process::exit(130);
            }

            warn!("SIGINT received, stopping after the current test");
            let _ = sigint_tx.send(true);
        }
    });

    Ok(sigint_rx)
}
