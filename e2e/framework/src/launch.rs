// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Submitting VMIs and checking on them, one at a time or in groups.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tracing::{info, info_span, instrument, Instrument};
use vmi_api_types::{ObjectId, PodSelector, VirtualMachineInstance};
use vmi_client::ControlPlane;

use crate::disks::{verify_disk_count, DiskCount};
use crate::poll::{self, ReadyOptions};
use crate::HarnessError;

/// A submitted VMI together with the server's response to the submission.
#[derive(Clone, Debug)]
pub struct LaunchRecord {
    pub submitted: VirtualMachineInstance,
    pub created: VirtualMachineInstance,
}

impl LaunchRecord {
    pub fn id(&self) -> ObjectId {
        self.submitted.id()
    }

    pub fn name(&self) -> &str {
        self.submitted.name()
    }
}

/// Launches VMIs through a control plane and verifies them.
#[derive(Clone)]
pub struct LaunchCoordinator {
    control_plane: Arc<dyn ControlPlane>,
    interval: Duration,
}

impl LaunchCoordinator {
    /// Creates a coordinator that uses `control_plane` and polls it every
    /// `interval` while waiting.
    pub fn new(control_plane: Arc<dyn ControlPlane>, interval: Duration) -> Self {
        Self { control_plane, interval }
    }

    pub fn control_plane(&self) -> &dyn ControlPlane {
        self.control_plane.as_ref()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Submits `vmi` and returns without waiting for it to start.
    #[instrument(skip_all, fields(vmi = %vmi.id()))]
    pub async fn launch(
        &self,
        vmi: &VirtualMachineInstance,
    ) -> Result<LaunchRecord, HarnessError> {
        info!("submitting VMI");
        let created = self.control_plane.create_vmi(vmi).await?;
        info!(uid = created.uid(), phase = ?created.status.phase, "VMI submitted");
        Ok(LaunchRecord { submitted: vmi.clone(), created })
    }

    /// Submits all of `vmis` concurrently. The records are returned in the
    /// order of `vmis`; the first failed submission fails the whole call.
    pub async fn launch_many(
        &self,
        vmis: &[VirtualMachineInstance],
    ) -> Result<Vec<LaunchRecord>, HarnessError> {
        try_join_all(vmis.iter().map(|vmi| self.launch(vmi))).await
    }

    /// Waits for the VMI in `record` to start.
    #[instrument(skip_all, fields(vmi = %record.name()))]
    pub async fn await_ready(
        &self,
        record: &LaunchRecord,
        opts: &ReadyOptions,
    ) -> Result<VirtualMachineInstance, HarnessError> {
        poll::await_ready(self.control_plane(), &record.created, opts).await
    }

    /// Waits for every VMI in `records` to start. Each wait proceeds on its
    /// own; the results are in the order of `records`.
    pub async fn await_all_ready(
        &self,
        records: &[LaunchRecord],
        opts: &ReadyOptions,
    ) -> Vec<Result<VirtualMachineInstance, HarnessError>> {
        let opts = *opts;
        self.for_each_record(records, move |this, record| async move {
            this.await_ready(&record, &opts).await
        })
        .await
    }

    /// Waits for the VMI in `record` to start, then checks that each of its
    /// container disks is served by a ready container.
    #[instrument(skip_all, fields(vmi = %record.name()))]
    pub async fn verify_container_disk_vmi(
        &self,
        record: &LaunchRecord,
        opts: &ReadyOptions,
    ) -> Result<DiskCount, HarnessError> {
        let ready =
            poll::await_ready(self.control_plane(), &record.created, opts)
                .await?;
        let uid = ready.uid().or(record.created.uid()).ok_or_else(|| {
            vmi_client::Error::InvalidRequest(format!(
                "VMI {} has no uid",
                record.id()
            ))
        })?;

        let pods = self
            .control_plane
            .list_pods(
                &record.id().namespace,
                &PodSelector::unfinished_vmi_pods(uid),
            )
            .await?;
        verify_disk_count(&record.submitted.spec, &pods)
    }

    /// Runs [`Self::verify_container_disk_vmi`] for every record. Each
    /// verification proceeds on its own; the results are in the order of
    /// `records`.
    pub async fn verify_all_container_disk_vmis(
        &self,
        records: &[LaunchRecord],
        opts: &ReadyOptions,
    ) -> Vec<Result<DiskCount, HarnessError>> {
        let opts = *opts;
        self.for_each_record(records, move |this, record| async move {
            this.verify_container_disk_vmi(&record, &opts).await
        })
        .await
    }

    /// Checks that the server's current spec for `record` still matches the
    /// spec it returned when the VMI was submitted.
    pub async fn verify_spec_unchanged(
        &self,
        record: &LaunchRecord,
    ) -> Result<(), HarnessError> {
        let current = self.control_plane.get_vmi(&record.id()).await?;
        if current.spec != record.created.spec {
            return Err(HarnessError::Mismatch {
                what: format!("spec of VMI {}", record.id()),
                expected: format!("{:?}", record.created.spec),
                found: format!("{:?}", current.spec),
            });
        }

        Ok(())
    }

    /// Requests deletion of the VMI `id`. Fails if no such VMI exists.
    #[instrument(skip_all, fields(vmi = %id))]
    pub async fn stop(&self, id: &ObjectId) -> Result<(), HarnessError> {
        info!("deleting VMI");
        self.control_plane.delete_vmi(id).await?;
        Ok(())
    }

    /// Waits up to `timeout` for the VMI `id` to disappear.
    pub async fn await_gone(
        &self,
        id: &ObjectId,
        timeout: Duration,
    ) -> Result<(), HarnessError> {
        poll::await_gone(self.control_plane(), id, timeout, self.interval).await
    }

    /// Runs `op` for each record in its own task and collects the results in
    /// record order.
    async fn for_each_record<T, F, Fut>(
        &self,
        records: &[LaunchRecord],
        op: F,
    ) -> Vec<Result<T, HarnessError>>
    where
        F: Fn(LaunchCoordinator, LaunchRecord) -> Fut,
        Fut: Future<Output = Result<T, HarnessError>> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = records
            .iter()
            .map(|record| {
                let span = info_span!("record", vmi = %record.name());
                tokio::spawn(op(self.clone(), record.clone()).instrument(span))
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (record, handle) in records.iter().zip(handles) {
            results.push(match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => Err(HarnessError::Aborted {
                    vmi: record.id().to_string(),
                    detail: format!("verification task did not finish: {e}"),
                }),
            });
        }

        results
    }
}
