// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pods backing virtual machine instances, and the selectors used to find
//! them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ObjectMeta;

/// Label identifying pods created to run a VMI.
pub const APP_LABEL: &str = "kubevirt.io";
pub const APP_LABEL_LAUNCHER: &str = "virt-launcher";

/// Label carrying the uid of the VMI a pod was created for.
pub const CREATED_BY_LABEL: &str = "kubevirt.io/created-by";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Pod {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,

    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ContainerStatus {
    pub name: String,
    #[serde(default)]
    pub ready: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

impl PodPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

/// Selects pods by label equality and excluded phases.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodSelector {
    pub labels: BTreeMap<String, String>,
    pub excluded_phases: Vec<PodPhase>,
}

impl PodSelector {
    /// Selects the launcher pods of the VMI with the supplied uid that have
    /// not yet run to completion.
    pub fn unfinished_vmi_pods(vmi_uid: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(APP_LABEL.to_string(), APP_LABEL_LAUNCHER.to_string());
        labels.insert(CREATED_BY_LABEL.to_string(), vmi_uid.to_string());
        Self {
            labels,
            excluded_phases: vec![PodPhase::Succeeded, PodPhase::Failed],
        }
    }

    /// Renders the label half of the selector, e.g. `a=b,c=d`.
    pub fn label_selector(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Renders the field half of the selector, e.g.
    /// `status.phase!=Succeeded,status.phase!=Failed`.
    pub fn field_selector(&self) -> String {
        self.excluded_phases
            .iter()
            .map(|p| format!("status.phase!={}", p.as_str()))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn matches(&self, pod: &Pod) -> bool {
        self.labels
            .iter()
            .all(|(k, v)| pod.metadata.labels.get(k) == Some(v))
            && !self.excluded_phases.contains(&pod.status.phase)
    }
}
