// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Constructors for VMI specs used by the test scenarios.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use rand::Rng;
use vmi_api_types::{
    Bus, CloudInitNoCloudSource, ContainerDiskSource, Disk, DiskDevice,
    ObjectId, ObjectMeta, VirtualMachineInstance, VmiSpec, Volume,
    VolumeSource,
};

/// Memory requested by VMIs built here unless a scenario overrides it.
pub const DEFAULT_MEMORY: &str = "64M";

/// Name of the boot disk and of its volume.
pub const BOOT_DISK_NAME: &str = "disk0";

/// Name of the cloud-init disk and of its volume.
pub const USER_DATA_DISK_NAME: &str = "disk1";

/// Container disk images published for the test suite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerDisk {
    Cirros,
    Alpine,

    /// An ISO image with Windows virtio drivers. Not bootable.
    Virtio,
}

impl ContainerDisk {
    pub fn image_name(&self) -> &'static str {
        match self {
            Self::Cirros => "cirros-container-disk-demo",
            Self::Alpine => "alpine-container-disk-demo",
            Self::Virtio => "virtio-container-disk",
        }
    }
}

impl fmt::Display for ContainerDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.image_name())
    }
}

/// Returns the image reference of `disk` in `registry` with `tag`.
pub fn container_disk_for(
    disk: ContainerDisk,
    registry: &str,
    tag: &str,
) -> String {
    format!("{}/{}:{tag}", registry.trim_end_matches('/'), disk.image_name())
}

const NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const NAME_SUFFIX_LEN: usize = 5;

/// Hands out VMI names that are unique among the names this allocator has
/// produced.
#[derive(Debug, Default)]
pub struct NameAllocator {
    issued: Mutex<HashSet<String>>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh name of the form `{prefix}-xxxxx`.
    pub fn allocate(&self, prefix: &str) -> String {
        let mut issued =
            self.issued.lock().unwrap_or_else(|poison| poison.into_inner());
        let mut rng = rand::thread_rng();
        loop {
            let suffix: String = (0..NAME_SUFFIX_LEN)
                .map(|_| {
                    NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char
                })
                .collect();
            let name = format!("{prefix}-{suffix}");
            if issued.insert(name.clone()) {
                return name;
            }
        }
    }
}

/// Builds a VMI that boots from an ephemeral copy of the container disk
/// `image`.
pub fn new_vmi_with_ephemeral_disk(
    id: ObjectId,
    image: &str,
) -> VirtualMachineInstance {
    let mut spec = VmiSpec::default();
    spec.set_memory(DEFAULT_MEMORY);

    let mut vmi =
        VirtualMachineInstance::new(ObjectMeta::new(id.namespace, id.name), spec);
    add_ephemeral_disk(&mut vmi, BOOT_DISK_NAME, Bus::Virtio, image);
    vmi
}

/// Like [`new_vmi_with_ephemeral_disk`], but also attaches a cloud-init
/// disk carrying `user_data`.
pub fn new_vmi_with_ephemeral_disk_and_userdata(
    id: ObjectId,
    image: &str,
    user_data: &str,
) -> VirtualMachineInstance {
    let mut vmi = new_vmi_with_ephemeral_disk(id, image);
    vmi.spec.domain.devices.disks.push(Disk {
        name: USER_DATA_DISK_NAME.to_string(),
        device: DiskDevice::Disk { bus: Bus::Virtio },
    });
    vmi.spec.volumes.push(Volume {
        name: USER_DATA_DISK_NAME.to_string(),
        source: VolumeSource::CloudInitNoCloud(CloudInitNoCloudSource {
            user_data: user_data.to_string(),
        }),
    });
    vmi
}

pub fn add_ephemeral_disk(
    vmi: &mut VirtualMachineInstance,
    name: &str,
    bus: Bus,
    image: &str,
) {
    add_container_disk(vmi, name, DiskDevice::Disk { bus }, image);
}

/// Attaches the container disk `image` to `vmi` as a CD-ROM named `name`.
pub fn add_ephemeral_cdrom(
    vmi: &mut VirtualMachineInstance,
    name: &str,
    bus: Bus,
    image: &str,
) {
    add_container_disk(vmi, name, DiskDevice::Cdrom { bus }, image);
}

fn add_container_disk(
    vmi: &mut VirtualMachineInstance,
    name: &str,
    device: DiskDevice,
    image: &str,
) {
    vmi.spec.domain.devices.disks.push(Disk { name: name.to_string(), device });
    vmi.spec.volumes.push(Volume {
        name: name.to_string(),
        source: VolumeSource::ContainerDisk(ContainerDiskSource {
            image: image.to_string(),
            path: None,
        }),
    });
}

/// Points every container-disk volume of `vmi` at `path` inside its image.
pub fn set_container_disk_path(vmi: &mut VirtualMachineInstance, path: &str) {
    for volume in vmi.spec.volumes.iter_mut() {
        if let VolumeSource::ContainerDisk(cd) = &mut volume.source {
            cd.path = Some(path.to_string());
        }
    }
}
