// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The e2e framework: launches VMIs through the control plane, waits for them
//! to become ready, checks their container disks, and drives their consoles.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use futures::future::join_all;
use tracing::{info, instrument, warn};
use vmi_api_types::{ObjectId, VirtualMachineInstance};
use vmi_client::{Client, ControlPlane};

pub mod console;
pub mod disks;
mod error;
pub mod guest_os;
pub mod launch;
pub mod lifecycle;
pub mod poll;
pub mod vmi_factory;

#[cfg(test)]
mod fake;

pub use error::HarnessError;
pub use launch::{LaunchCoordinator, LaunchRecord};
pub use poll::ReadyOptions;
pub use vmi_api_types;
pub use vmi_client;

use console::{
    websocket::WsConsoleFactory, ConsoleFactory, ConsoleScript,
    ConsoleSession, Transcript,
};
use disks::DiskCount;
use guest_os::{get_guest_os_adapter, GuestOsKind};
use vmi_factory::{ContainerDisk, NameAllocator};

/// Prefix of the names given to VMIs built by the framework.
pub const VMI_NAME_PREFIX: &str = "testvmi";

/// Settings shared by every test run by one framework instance.
#[derive(Clone, Debug)]
pub struct FrameworkParameters {
    /// The namespace VMIs are created in.
    pub namespace: String,

    /// Registry (and repository prefix) that serves container disk images.
    pub container_disk_registry: String,
    pub container_disk_tag: String,

    pub poll_interval: Duration,
    pub vmi_start_timeout: Duration,
    pub vmi_delete_timeout: Duration,
    pub console_timeout: Duration,

    /// If set, each console session appends its output to
    /// `<dir>/<vmi name>.console.log`.
    pub console_log_directory: Option<Utf8PathBuf>,
}

impl Default for FrameworkParameters {
    fn default() -> Self {
        Self {
            namespace: "kubevirt-test-default".to_string(),
            container_disk_registry: "registry:5000/kubevirt".to_string(),
            container_disk_tag: "devel".to_string(),
            poll_interval: Duration::from_secs(1),
            vmi_start_timeout: Duration::from_secs(90),
            vmi_delete_timeout: Duration::from_secs(120),
            console_timeout: Duration::from_secs(200),
            console_log_directory: None,
        }
    }
}

/// A test context: the control plane, the console factory, and the settings
/// that tests use to build and verify VMIs.
pub struct Framework {
    params: FrameworkParameters,
    launcher: LaunchCoordinator,
    consoles: Option<Arc<dyn ConsoleFactory>>,
    names: NameAllocator,
}

impl Framework {
    pub fn new(
        params: FrameworkParameters,
        control_plane: Arc<dyn ControlPlane>,
        consoles: Option<Arc<dyn ConsoleFactory>>,
    ) -> Self {
        let launcher =
            LaunchCoordinator::new(control_plane, params.poll_interval);
        Self { params, launcher, consoles, names: NameAllocator::new() }
    }

    /// Creates a framework that reaches the control plane and VMI consoles
    /// through `client`.
    pub fn from_client(params: FrameworkParameters, client: Client) -> Self {
        let consoles = Arc::new(WsConsoleFactory::new(client.clone()));
        Self::new(params, Arc::new(client), Some(consoles))
    }

    pub fn params(&self) -> &FrameworkParameters {
        &self.params
    }

    pub fn launcher(&self) -> &LaunchCoordinator {
        &self.launcher
    }

    pub fn control_plane(&self) -> &dyn ControlPlane {
        self.launcher.control_plane()
    }

    /// Returns the image reference of `disk` in the configured registry.
    pub fn container_disk(&self, disk: ContainerDisk) -> String {
        vmi_factory::container_disk_for(
            disk,
            &self.params.container_disk_registry,
            &self.params.container_disk_tag,
        )
    }

    /// Returns a fresh, unused VMI identity in the test namespace.
    pub fn new_vmi_id(&self) -> ObjectId {
        ObjectId::new(&self.params.namespace, self.names.allocate(VMI_NAME_PREFIX))
    }

    pub fn new_random_vmi_with_ephemeral_disk(
        &self,
        disk: ContainerDisk,
    ) -> VirtualMachineInstance {
        vmi_factory::new_vmi_with_ephemeral_disk(
            self.new_vmi_id(),
            &self.container_disk(disk),
        )
    }

    pub fn new_random_vmi_with_ephemeral_disk_and_userdata(
        &self,
        disk: ContainerDisk,
        user_data: &str,
    ) -> VirtualMachineInstance {
        vmi_factory::new_vmi_with_ephemeral_disk_and_userdata(
            self.new_vmi_id(),
            &self.container_disk(disk),
            user_data,
        )
    }

    /// Options for waiting on a VMI to start with the configured deadline
    /// and polling interval.
    pub fn start_options(&self, ignore_warnings: bool) -> ReadyOptions {
        ReadyOptions {
            deadline: self.params.vmi_start_timeout,
            interval: self.params.poll_interval,
            ignore_warnings,
        }
    }

    pub async fn launch(
        &self,
        vmi: &VirtualMachineInstance,
    ) -> Result<LaunchRecord, HarnessError> {
        self.launcher.launch(vmi).await
    }

    pub async fn launch_many(
        &self,
        vmis: &[VirtualMachineInstance],
    ) -> Result<Vec<LaunchRecord>, HarnessError> {
        self.launcher.launch_many(vmis).await
    }

    /// Waits for `record` to start. Any warning event fails the wait.
    pub async fn wait_for_successful_vmi_start(
        &self,
        record: &LaunchRecord,
    ) -> Result<VirtualMachineInstance, HarnessError> {
        self.launcher.await_ready(record, &self.start_options(false)).await
    }

    /// Waits for `record` to start, logging but otherwise ignoring warning
    /// events.
    pub async fn wait_for_successful_vmi_start_ignore_warnings(
        &self,
        record: &LaunchRecord,
    ) -> Result<VirtualMachineInstance, HarnessError> {
        self.launcher.await_ready(record, &self.start_options(true)).await
    }

    pub async fn verify_container_disk_vmi(
        &self,
        record: &LaunchRecord,
        ignore_warnings: bool,
    ) -> Result<DiskCount, HarnessError> {
        self.launcher
            .verify_container_disk_vmi(record, &self.start_options(ignore_warnings))
            .await
    }

    pub async fn verify_all_container_disk_vmis(
        &self,
        records: &[LaunchRecord],
        ignore_warnings: bool,
    ) -> Vec<Result<DiskCount, HarnessError>> {
        self.launcher
            .verify_all_container_disk_vmis(
                records,
                &self.start_options(ignore_warnings),
            )
            .await
    }

    pub async fn verify_spec_unchanged(
        &self,
        record: &LaunchRecord,
    ) -> Result<(), HarnessError> {
        self.launcher.verify_spec_unchanged(record).await
    }

    pub async fn stop(&self, record: &LaunchRecord) -> Result<(), HarnessError> {
        self.launcher.stop(&record.id()).await
    }

    /// Waits for `record`'s VMI to disappear within the configured delete
    /// timeout.
    pub async fn await_gone(
        &self,
        record: &LaunchRecord,
    ) -> Result<(), HarnessError> {
        self.launcher
            .await_gone(&record.id(), self.params.vmi_delete_timeout)
            .await
    }

    pub async fn restart_cycles(
        &self,
        vmi: &VirtualMachineInstance,
        cycles: usize,
    ) -> Result<Vec<LaunchRecord>, HarnessError> {
        self.launcher
            .restart_cycles(
                vmi,
                cycles,
                &self.start_options(false),
                self.params.vmi_delete_timeout,
            )
            .await
    }

    /// Opens a console session to `record`'s VMI.
    pub async fn open_console(
        &self,
        record: &LaunchRecord,
    ) -> Result<ConsoleSession, HarnessError> {
        let consoles = self.consoles.as_ref().ok_or_else(|| {
            HarnessError::ChannelError {
                detail: "no console factory is configured".to_string(),
                unmatched: String::new(),
            }
        })?;

        let channel = consoles.open(&record.id()).await?;
        let log_path = self
            .params
            .console_log_directory
            .as_ref()
            .map(|dir| dir.join(format!("{}.console.log", record.name())));
        Ok(ConsoleSession::new(record.name(), channel, log_path.as_deref()))
    }

    /// Runs `scripts` in order over one console session to `record`'s VMI.
    /// The session is closed whether or not the scripts succeed.
    #[instrument(skip_all, fields(vmi = %record.name()))]
    pub async fn run_console_scripts(
        &self,
        record: &LaunchRecord,
        scripts: &[&ConsoleScript],
    ) -> Result<Vec<Transcript>, HarnessError> {
        let mut session = self.open_console(record).await?;

        let mut transcripts = Vec::with_capacity(scripts.len());
        let mut outcome = Ok(());
        for script in scripts {
            match session.run(script).await {
                Ok(transcript) => transcripts.push(transcript),
                Err(failure) => {
                    outcome = Err(HarnessError::from(failure));
                    break;
                }
            }
        }

        let closed = session.close().await;
        outcome?;
        closed.map_err(|e| HarnessError::ChannelError {
            detail: format!("failed to close console: {e}"),
            unmatched: String::new(),
        })?;
        Ok(transcripts)
    }

    /// Logs into the guest on `record`'s console and then runs `scripts` on
    /// the same session. The login script is bounded by the guest's login
    /// timeout and each of `scripts` by its own timeout. Only the transcripts
    /// of `scripts` are returned.
    pub async fn run_logged_in(
        &self,
        record: &LaunchRecord,
        guest: GuestOsKind,
        scripts: &[&ConsoleScript],
    ) -> Result<Vec<Transcript>, HarnessError> {
        let login = get_guest_os_adapter(guest).login_script();
        let mut all = Vec::with_capacity(scripts.len() + 1);
        all.push(&login);
        all.extend_from_slice(scripts);

        let mut transcripts = self.run_console_scripts(record, &all).await?;
        transcripts.remove(0);
        Ok(transcripts)
    }

    /// Deletes every VMI in the test namespace and waits for them all to
    /// disappear.
    pub async fn cleanup_namespace(&self) -> Result<(), HarnessError> {
        let vmis = self.control_plane().list_vmis(&self.params.namespace).await?;
        if vmis.is_empty() {
            return Ok(());
        }

        info!(
            namespace = %self.params.namespace,
            count = vmis.len(),
            "deleting leftover VMIs"
        );
        for vmi in &vmis {
            match self.launcher.stop(&vmi.id()).await {
                Err(HarnessError::Client(e)) if e.is_not_found() => {}
                other => other?,
            }
        }

        let waits = vmis.iter().map(|vmi| async move {
            let id = vmi.id();
            self.launcher.await_gone(&id, self.params.vmi_delete_timeout).await
        });
        for result in join_all(waits).await {
            if let Err(e) = &result {
                warn!(%e, "leftover VMI did not go away");
            }
            result?;
        }

        Ok(())
    }
}
