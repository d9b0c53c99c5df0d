// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Errors reported by harness operations.

use std::time::Duration;

use thiserror::Error;

/// A failure observed while driving or verifying a VMI. Every variant carries
/// enough context to tell a harness defect apart from a regression in the
/// system under test.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(
        "timed out after {waited:?} waiting for {operation}; \
         last observed: {last_observed}"
    )]
    Timeout { operation: String, waited: Duration, last_observed: String },

    #[error("warning event on VMI {vmi}: {reason}: {message}")]
    WarningObserved { vmi: String, reason: String, message: String },

    #[error("{what} mismatch: expected {expected}, found {found}")]
    Mismatch { what: String, expected: String, found: String },

    #[error("VMI {vmi} went away while waiting for it: {detail}")]
    Aborted { vmi: String, detail: String },

    #[error("console channel failed: {detail}; unmatched output: {unmatched:?}")]
    ChannelError { detail: String, unmatched: String },

    #[error(transparent)]
    Client(#[from] vmi_client::Error),
}

impl HarnessError {
    pub(crate) fn count_mismatch(
        what: impl Into<String>,
        expected: usize,
        found: usize,
    ) -> Self {
        Self::Mismatch {
            what: what.into(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
