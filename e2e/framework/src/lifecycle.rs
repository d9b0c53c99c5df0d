// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use tracing::info;
use vmi_api_types::VirtualMachineInstance;

use crate::launch::{LaunchCoordinator, LaunchRecord};
use crate::poll::ReadyOptions;
use crate::HarnessError;

impl LaunchCoordinator {
    /// Starts and stops `vmi` `cycles` times under the same identity. Each
    /// cycle submits the VMI, waits for it to start, deletes it, and waits up
    /// to `delete_timeout` for it to disappear before the next cycle begins.
    ///
    /// Returns the launch record of every cycle.
    pub async fn restart_cycles(
        &self,
        vmi: &VirtualMachineInstance,
        cycles: usize,
        opts: &ReadyOptions,
        delete_timeout: Duration,
    ) -> Result<Vec<LaunchRecord>, HarnessError> {
        let mut records = Vec::with_capacity(cycles);
        for cycle in 0..cycles {
            info!(vmi = %vmi.id(), cycle, "starting VMI for restart cycle");
            let record = self.launch(vmi).await?;
            self.await_ready(&record, opts).await?;

            info!(vmi = %vmi.id(), cycle, "stopping VMI for restart cycle");
            self.stop(&record.id()).await?;
            self.await_gone(&record.id(), delete_timeout).await?;
            records.push(record);
        }

        Ok(records)
    }
}
