// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A client for the orchestration system's control-plane API.
//!
//! Consumers that only need to create, inspect and delete VMIs should depend
//! on the [`ControlPlane`] trait rather than on [`Client`] directly so that a
//! different implementation can be substituted in tests.

use async_trait::async_trait;
use thiserror::Error;

pub use vmi_api_types as types;
use vmi_api_types::{Event, ObjectId, Pod, PodSelector, VirtualMachineInstance};

mod client;
pub mod support;

pub use client::Client;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{what} already exists")]
    AlreadyExists { what: String },

    #[error("request for {what} failed with status {status}: {body}")]
    Status { what: String, status: u16, body: String },

    #[error("communication error: {0}")]
    Communication(#[from] reqwest::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("console connection failed: {0}")]
    Console(#[from] support::tungstenite::Error),
}

impl Error {
    /// Returns true if this error means the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// The operations the harness needs from the orchestration system.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Submits a new VMI and returns the server's representation of it.
    async fn create_vmi(
        &self,
        vmi: &VirtualMachineInstance,
    ) -> Result<VirtualMachineInstance, Error>;

    /// Fetches the current state of a VMI. Returns [`Error::NotFound`] if no
    /// such VMI exists.
    async fn get_vmi(
        &self,
        id: &ObjectId,
    ) -> Result<VirtualMachineInstance, Error>;

    /// Requests deletion of a VMI. Returns [`Error::NotFound`] if no such VMI
    /// exists.
    async fn delete_vmi(&self, id: &ObjectId) -> Result<(), Error>;

    async fn list_vmis(
        &self,
        namespace: &str,
    ) -> Result<Vec<VirtualMachineInstance>, Error>;

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &PodSelector,
    ) -> Result<Vec<Pod>, Error>;

    /// Lists the events recorded against the object with the supplied uid.
    async fn list_events(
        &self,
        namespace: &str,
        involved_uid: &str,
    ) -> Result<Vec<Event>, Error>;
}
