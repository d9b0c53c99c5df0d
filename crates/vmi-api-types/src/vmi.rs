// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual machine instance objects.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ObjectId, ObjectMeta};

pub const VMI_API_VERSION: &str = "kubevirt.io/v1";
pub const VMI_KIND: &str = "VirtualMachineInstance";

/// The resource-request key for guest memory.
pub const MEMORY_RESOURCE: &str = "memory";

/// A virtual machine instance, either as submitted by a client (with a default
/// status) or as returned by the server.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstance {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    pub metadata: ObjectMeta,

    pub spec: VmiSpec,

    #[serde(default)]
    pub status: VmiStatus,
}

fn default_api_version() -> String {
    VMI_API_VERSION.to_string()
}

fn default_kind() -> String {
    VMI_KIND.to_string()
}

impl VirtualMachineInstance {
    /// Creates a new, not-yet-submitted VMI with the supplied identity and
    /// spec.
    pub fn new(metadata: ObjectMeta, spec: VmiSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata,
            spec,
            status: VmiStatus::default(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.metadata.id()
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }
}

/// The desired state of a VMI.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VmiSpec {
    pub domain: DomainSpec,

    /// Volumes referenced by name from `domain.devices.disks`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

impl VmiSpec {
    /// Yields the volumes in this spec that are backed by container disks.
    pub fn container_disk_volumes(
        &self,
    ) -> impl Iterator<Item = (&str, &ContainerDiskSource)> {
        self.volumes.iter().filter_map(|v| match &v.source {
            VolumeSource::ContainerDisk(cd) => Some((v.name.as_str(), cd)),
            _ => None,
        })
    }

    pub fn memory(&self) -> Option<&str> {
        self.domain.resources.requests.get(MEMORY_RESOURCE).map(String::as_str)
    }

    pub fn set_memory(&mut self, quantity: impl Into<String>) {
        self.domain
            .resources
            .requests
            .insert(MEMORY_RESOURCE.to_string(), quantity.into());
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    #[serde(default)]
    pub resources: ResourceRequirements,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Cpu>,

    #[serde(default)]
    pub devices: Devices,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ResourceRequirements {
    /// Resource quantities keyed by resource name, e.g. `memory: 64M`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Cpu {
    pub cores: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Devices {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,
}

/// A guest-visible disk device backed by the volume of the same name.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Disk {
    pub name: String,

    #[serde(flatten)]
    pub device: DiskDevice,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiskDevice {
    Disk { bus: Bus },
    Cdrom { bus: Bus },
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Bus {
    Virtio,
    Sata,
    Scsi,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Volume {
    pub name: String,

    #[serde(flatten)]
    pub source: VolumeSource,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSource {
    /// A disk image shipped inside a container image and served to the
    /// hypervisor by a per-volume helper container.
    ContainerDisk(ContainerDiskSource),

    CloudInitNoCloud(CloudInitNoCloudSource),

    EmptyDisk(EmptyDiskSource),
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDiskSource {
    pub image: String,

    /// Location of the disk image inside the container image. The server
    /// picks its default location when this is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitNoCloudSource {
    pub user_data: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct EmptyDiskSource {
    pub capacity: String,
}

/// The observed state of a VMI.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VmiStatus {
    #[serde(default)]
    pub phase: VmiPhase,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<VmiCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum VmiPhase {
    #[default]
    Pending,
    Scheduling,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

impl VmiPhase {
    /// Returns true if a VMI in this phase has stopped and will never run
    /// again.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VmiCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}
