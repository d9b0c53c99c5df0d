// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Verifies that each container-disk volume of a VMI is backed by a ready
//! helper container in the VMI's launcher pod.

use tracing::{debug, info};
use vmi_api_types::{Pod, VmiSpec};

use crate::HarnessError;

/// Names of the containers that serve container-disk volumes start with this
/// prefix.
pub const VOLUME_CONTAINER_PREFIX: &str = "volume";

/// Expected and observed numbers of container-disk helper containers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiskCount {
    pub expected: usize,
    pub found: usize,
}

/// Counts the ready volume containers in the first live pod of `pods` and
/// compares that count with the number of container-disk volumes in `spec`.
///
/// Pods that are already being deleted are skipped. If no live pod remains
/// the found count is zero.
pub fn verify_disk_count(
    spec: &VmiSpec,
    pods: &[Pod],
) -> Result<DiskCount, HarnessError> {
    let expected = spec.container_disk_volumes().count();
    let pod = pods.iter().find(|p| !p.metadata.is_terminating());

    let found = pod.map_or(0, |pod| {
        pod.status
            .container_statuses
            .iter()
            .filter(|c| {
                debug!(
                    pod = %pod.metadata.name,
                    container = %c.name,
                    ready = c.ready,
                    "inspecting container"
                );
                c.name.starts_with(VOLUME_CONTAINER_PREFIX) && c.ready
            })
            .count()
    });

    let count = DiskCount { expected, found };
    if expected != found {
        return Err(HarnessError::count_mismatch(
            "ready container disk count",
            expected,
            found,
        ));
    }

    info!(?count, "container disks are ready");
    Ok(count)
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use vmi_api_types::{
        ContainerDiskSource, ContainerStatus, ObjectMeta, PodPhase, PodStatus,
        Volume, VolumeSource,
    };

    fn spec_with_disks(n: usize) -> VmiSpec {
        let mut spec = VmiSpec::default();
        for i in 0..n {
            spec.volumes.push(Volume {
                name: format!("disk{i}"),
                source: VolumeSource::ContainerDisk(ContainerDiskSource {
                    image: "registry:5000/kubevirt/cirros-container-disk-demo:devel"
                        .to_string(),
                    path: None,
                }),
            });
        }
        spec
    }

    fn pod(containers: &[(&str, bool)]) -> Pod {
        Pod {
            metadata: ObjectMeta::new("ns", "virt-launcher-testvmi-abcde"),
            status: PodStatus {
                phase: PodPhase::Running,
                container_statuses: containers
                    .iter()
                    .map(|(name, ready)| ContainerStatus {
                        name: name.to_string(),
                        ready: *ready,
                    })
                    .collect(),
            },
        }
    }

    #[test]
    fn one_ready_volume_container() {
        let pods = [pod(&[("compute", true), ("volumedisk0", true)])];
        let count = verify_disk_count(&spec_with_disks(1), &pods).unwrap();
        assert_eq!(count, DiskCount { expected: 1, found: 1 });
    }

    #[test]
    fn missing_volume_container_is_a_mismatch() {
        let pods = [pod(&[("compute", true)])];
        match verify_disk_count(&spec_with_disks(1), &pods).unwrap_err() {
            HarnessError::Mismatch { expected, found, .. } => {
                assert_eq!(expected, "1");
                assert_eq!(found, "0");
            }
            e => panic!("unexpected error {e:?}"),
        }
    }

    #[test]
    fn unready_volume_containers_are_not_counted() {
        let pods = [pod(&[("volumedisk0", false), ("volumedisk1", true)])];
        assert!(verify_disk_count(&spec_with_disks(2), &pods).is_err());
    }

    #[test]
    fn no_pods_counts_zero() {
        assert_eq!(
            verify_disk_count(&spec_with_disks(0), &[]).unwrap(),
            DiskCount { expected: 0, found: 0 }
        );
        assert!(verify_disk_count(&spec_with_disks(1), &[]).is_err());
    }

    #[test]
    fn terminating_pods_are_skipped() {
        let mut old = pod(&[("volumedisk0", true), ("volumedisk1", true)]);
        old.metadata.deletion_timestamp = Some(Utc::now());
        let pods = [old, pod(&[("volumedisk0", true)])];

        let count = verify_disk_count(&spec_with_disks(1), &pods).unwrap();
        assert_eq!(count.found, 1);
    }
}
