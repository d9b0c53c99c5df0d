// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use e2e_framework::FrameworkParameters;

#[derive(Debug, Subcommand)]
pub enum Command {
    Run(RunOptions),
    List(ListOptions),
}

/// Runtime configuration options for the runner.
#[derive(Debug, Parser)]
#[clap(verbatim_doc_comment)]
pub struct ProcessArgs {
    #[clap(subcommand)]
    pub command: Command,

    /// Suppress emission of terminal control codes in the runner's log output.
    #[clap(long, conflicts_with = "emit_bunyan")]
    pub disable_ansi: bool,

    /// Emit Bunyan-formatted logs.
    #[clap(long)]
    pub emit_bunyan: bool,
}

#[derive(Args, Debug)]
#[clap(verbatim_doc_comment)]
pub struct RunOptions {
    /// The base URL of the cluster's API server.
    #[clap(long)]
    pub api_url: String,

    /// A bearer token to present to the API server.
    #[clap(long, env = "E2E_BEARER_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,

    /// How long a single API request may take before it fails.
    #[clap(long, default_value = "30", value_parser)]
    pub request_timeout_secs: u64,

    /// The namespace in which test VMIs are created. Every VMI in this
    /// namespace is deleted before each test runs.
    #[clap(long, default_value = "kubevirt-test-default")]
    pub namespace: String,

    /// The registry (and repository prefix) serving container disk images.
    #[clap(long, default_value = "registry:5000/kubevirt")]
    pub container_disk_registry: String,

    /// The tag of the container disk images to use.
    #[clap(long, default_value = "devel")]
    pub container_disk_tag: String,

    /// The interval between successive polls of a VMI's state.
    #[clap(long, default_value = "1000", value_parser)]
    pub poll_interval_ms: u64,

    /// How long to wait for a VMI to start running.
    #[clap(long, default_value = "90", value_parser)]
    pub vmi_start_timeout_secs: u64,

    /// How long to wait for a deleted VMI to disappear.
    #[clap(long, default_value = "120", value_parser)]
    pub vmi_delete_timeout_secs: u64,

    /// The default deadline for a console script.
    #[clap(long, default_value = "200", value_parser)]
    pub console_timeout_secs: u64,

    /// If set, console output from each VMI is written to
    /// `<dir>/<vmi name>.console.log`.
    #[clap(long, value_parser)]
    pub console_log_directory: Option<Utf8PathBuf>,

    /// Only run tests whose fully-qualified names contain this string.
    /// Can be specified multiple times.
    #[clap(long, value_parser)]
    pub include_filter: Vec<String>,

    /// Only run tests whose fully-qualified names do not contain this
    /// string. Can be specified multiple times.
    #[clap(long, value_parser)]
    pub exclude_filter: Vec<String>,
}

impl RunOptions {
    pub fn framework_parameters(&self) -> FrameworkParameters {
        FrameworkParameters {
            namespace: self.namespace.clone(),
            container_disk_registry: self.container_disk_registry.clone(),
            container_disk_tag: self.container_disk_tag.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            vmi_start_timeout: Duration::from_secs(self.vmi_start_timeout_secs),
            vmi_delete_timeout: Duration::from_secs(
                self.vmi_delete_timeout_secs,
            ),
            console_timeout: Duration::from_secs(self.console_timeout_secs),
            console_log_directory: self.console_log_directory.clone(),
        }
    }
}

#[derive(Args, Debug)]
#[clap(verbatim_doc_comment)]
pub struct ListOptions {
    /// Include only tests whose fully-qualified names contain this string.
    /// Can be specified multiple times.
    #[clap(long, value_parser)]
    pub include_filter: Vec<String>,

    /// Exclude tests whose fully-qualified names contain this string.
    /// Can be specified multiple times.
    #[clap(long, value_parser)]
    pub exclude_filter: Vec<String>,
}
