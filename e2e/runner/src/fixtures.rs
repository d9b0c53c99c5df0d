// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use anyhow::{Context, Result};
use e2e_framework::Framework;
use tracing::instrument;

pub struct TestFixtures {
    ctx: Arc<Framework>,
}

impl TestFixtures {
    pub fn new(ctx: Arc<Framework>) -> Self {
        Self { ctx }
    }

    /// Leaves the test namespace empty before a test starts.
    #[instrument(skip_all)]
    pub async fn test_setup(&mut self) -> Result<()> {
        self.ctx
            .cleanup_namespace()
            .await
            .context("cleaning the test namespace")
    }

    #[instrument(skip_all)]
    pub async fn execution_cleanup(&mut self) -> Result<()> {
        self.ctx
            .cleanup_namespace()
            .await
            .context("cleaning the test namespace after the run")
    }
}
