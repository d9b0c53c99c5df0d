// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory stand-ins for the control plane and for guest consoles.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;
use vmi_api_types::{
    ContainerStatus, Event, EventType, ObjectId, ObjectMeta, ObjectReference,
    Pod, PodPhase, PodSelector, PodStatus, VirtualMachineInstance, VmiPhase,
    APP_LABEL, APP_LABEL_LAUNCHER, CREATED_BY_LABEL,
};
use vmi_client::{ControlPlane, Error};

use crate::console::{ChannelError, ConsoleChannel, ConsoleFactory};
use crate::vmi_factory::{
    container_disk_for, new_vmi_with_ephemeral_disk_and_userdata,
    ContainerDisk,
};
use crate::HarnessError;

pub(crate) const TEST_NAMESPACE: &str = "e2e-test";

/// A cirros VMI with cloud-init user data in the test namespace.
pub(crate) fn test_vmi(name: &str) -> VirtualMachineInstance {
    new_vmi_with_ephemeral_disk_and_userdata(
        ObjectId::new(TEST_NAMESPACE, name),
        &container_disk_for(ContainerDisk::Cirros, "registry:5000/kubevirt", "devel"),
        "#!/bin/bash\necho 'hello'\n",
    )
}

#[derive(Clone, Copy, Debug)]
enum Outcome {
    Running,
    Failed,
    Stuck,
}

/// How a VMI created in the fake behaves as it is polled.
#[derive(Clone, Debug)]
pub(crate) struct BootPlan {
    outcome: Outcome,
    after_polls: u32,
    warnings: Vec<(String, String)>,
    mutate_spec: bool,
}

impl BootPlan {
    /// Reports `Running` from the `polls`th fetch onwards.
    pub(crate) fn running_after(polls: u32) -> Self {
        Self {
            outcome: Outcome::Running,
            after_polls: polls,
            warnings: Vec::new(),
            mutate_spec: false,
        }
    }

    pub(crate) fn never_running() -> Self {
        Self { outcome: Outcome::Stuck, ..Self::running_after(0) }
    }

    pub(crate) fn fails_after(polls: u32) -> Self {
        Self { outcome: Outcome::Failed, ..Self::running_after(polls) }
    }

    pub(crate) fn with_warning(mut self, reason: &str, message: &str) -> Self {
        self.warnings.push((reason.to_string(), message.to_string()));
        self
    }

    /// Changes the stored spec when the VMI starts running.
    pub(crate) fn mutating_spec(mut self) -> Self {
        self.mutate_spec = true;
        self
    }
}

impl Default for BootPlan {
    fn default() -> Self {
        Self::running_after(1)
    }
}

struct FakeVmi {
    vmi: VirtualMachineInstance,
    plan: BootPlan,
    polls: u32,
    deleting: Option<u32>,
}

impl FakeVmi {
    fn advance(&mut self) {
        self.polls += 1;
        let reached = self.polls >= self.plan.after_polls;
        let phase = match self.plan.outcome {
            Outcome::Running if reached => VmiPhase::Running,
            Outcome::Failed if reached => VmiPhase::Failed,
            _ => VmiPhase::Scheduling,
        };

        if phase == VmiPhase::Running
            && self.vmi.status.phase != VmiPhase::Running
            && self.plan.mutate_spec
        {
            self.vmi.spec.set_memory("128M");
        }
        self.vmi.status.phase = phase;
    }

    fn launcher_pod(&self) -> Pod {
        let running = self.vmi.status.phase == VmiPhase::Running;
        let uid = self.vmi.uid().unwrap_or_default();

        let mut metadata = ObjectMeta::new(
            &self.vmi.metadata.namespace,
            format!("virt-launcher-{}", self.vmi.name()),
        );
        metadata
            .labels
            .insert(APP_LABEL.to_string(), APP_LABEL_LAUNCHER.to_string());
        metadata.labels.insert(CREATED_BY_LABEL.to_string(), uid.to_string());

        let mut container_statuses =
            vec![ContainerStatus { name: "compute".to_string(), ready: running }];
        container_statuses.extend(self.vmi.spec.container_disk_volumes().map(
            |(name, _)| ContainerStatus {
                name: format!("volume{name}"),
                ready: running,
            },
        ));

        Pod {
            metadata,
            status: PodStatus {
                phase: if running { PodPhase::Running } else { PodPhase::Pending },
                container_statuses,
            },
        }
    }
}

#[derive(Default)]
struct State {
    vmis: BTreeMap<ObjectId, FakeVmi>,
    plans: VecDeque<BootPlan>,
    delete_polls: u32,
    creates: usize,
}

/// A control plane that keeps VMIs in memory. Each created VMI follows the
/// next queued [`BootPlan`], or the default plan if none is queued.
#[derive(Default)]
pub(crate) struct FakeControlPlane {
    state: Mutex<State>,
}

impl FakeControlPlane {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_plan(&self, plan: BootPlan) {
        self.state.lock().unwrap().plans.push_back(plan);
    }

    /// Sets how many fetches a deleted VMI survives before it disappears.
    pub(crate) fn set_delete_polls(&self, polls: u32) {
        self.state.lock().unwrap().delete_polls = polls;
    }

    /// Removes a VMI without going through deletion.
    pub(crate) fn remove_now(&self, id: &ObjectId) {
        self.state.lock().unwrap().vmis.remove(id);
    }

    pub(crate) fn create_count(&self) -> usize {
        self.state.lock().unwrap().creates
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn create_vmi(
        &self,
        vmi: &VirtualMachineInstance,
    ) -> Result<VirtualMachineInstance, Error> {
        let mut state = self.state.lock().unwrap();
        let id = vmi.id();
        if state.vmis.contains_key(&id) {
            return Err(Error::AlreadyExists { what: format!("VMI {id}") });
        }

        let mut created = vmi.clone();
        created.metadata.uid = Some(Uuid::new_v4().to_string());
        created.status.phase = VmiPhase::Pending;

        let plan = state.plans.pop_front().unwrap_or_default();
        state.creates += 1;
        state.vmis.insert(
            id,
            FakeVmi { vmi: created.clone(), plan, polls: 0, deleting: None },
        );
        Ok(created)
    }

    async fn get_vmi(
        &self,
        id: &ObjectId,
    ) -> Result<VirtualMachineInstance, Error> {
        let mut state = self.state.lock().unwrap();
        let not_found = || Error::NotFound(format!("VMI {id}"));
        let entry = state.vmis.get_mut(id).ok_or_else(not_found)?;

        let deleting = entry.deleting;
        match deleting {
            Some(0) => {
                state.vmis.remove(id);
                Err(not_found())
            }
            Some(left) => {
                entry.deleting = Some(left - 1);
                Ok(entry.vmi.clone())
            }
            None => {
                entry.advance();
                Ok(entry.vmi.clone())
            }
        }
    }

    async fn delete_vmi(&self, id: &ObjectId) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let delete_polls = state.delete_polls;
        let entry = state
            .vmis
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("VMI {id}")))?;

        if delete_polls == 0 {
            state.vmis.remove(id);
        } else if entry.deleting.is_none() {
            entry.deleting = Some(delete_polls);
            entry.vmi.metadata.deletion_timestamp = Some(Utc::now());
            entry.vmi.status.phase = VmiPhase::Succeeded;
        }
        Ok(())
    }

    async fn list_vmis(
        &self,
        namespace: &str,
    ) -> Result<Vec<VirtualMachineInstance>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .vmis
            .values()
            .filter(|v| v.vmi.metadata.namespace == namespace)
            .map(|v| v.vmi.clone())
            .collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &PodSelector,
    ) -> Result<Vec<Pod>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .vmis
            .values()
            .filter(|v| v.vmi.metadata.namespace == namespace)
            .map(FakeVmi::launcher_pod)
            .filter(|pod| selector.matches(pod))
            .collect())
    }

    async fn list_events(
        &self,
        namespace: &str,
        involved_uid: &str,
    ) -> Result<Vec<Event>, Error> {
        let state = self.state.lock().unwrap();
        let Some(vmi) = state
            .vmis
            .values()
            .find(|v| v.vmi.uid() == Some(involved_uid))
        else {
            return Ok(Vec::new());
        };

        Ok(vmi
            .plan
            .warnings
            .iter()
            .enumerate()
            .map(|(idx, (reason, message))| Event {
                metadata: ObjectMeta::new(
                    namespace,
                    format!("{}.{idx}", vmi.vmi.name()),
                ),
                involved_object: ObjectReference {
                    kind: "VirtualMachineInstance".to_string(),
                    name: vmi.vmi.name().to_string(),
                    namespace: namespace.to_string(),
                    uid: involved_uid.to_string(),
                },
                event_type: EventType::Warning,
                reason: reason.clone(),
                message: message.clone(),
            })
            .collect())
    }
}

type Responder = dyn Fn(&str) -> Option<String> + Send + Sync;

/// A console that answers each line it receives with the output produced by
/// a responder function. When the responder has nothing to say the console
/// stays silent.
pub(crate) struct FakeConsole {
    responder: Arc<Responder>,
    pending: VecDeque<Vec<u8>>,
    partial: String,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    hang_up_after: Option<usize>,
    delivered: usize,
}

impl FakeConsole {
    pub(crate) fn new(
        responder: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self::with_shared(
            Arc::new(responder),
            Arc::default(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn with_shared(
        responder: Arc<Responder>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            responder,
            pending: VecDeque::new(),
            partial: String::new(),
            sent,
            closed,
            hang_up_after: None,
            delivered: 0,
        }
    }

    /// Closes the console from the guest side once `chunks` chunks of output
    /// have been delivered.
    pub(crate) fn hang_up_after(mut self, chunks: usize) -> Self {
        self.hang_up_after = Some(chunks);
        self
    }

    pub(crate) fn sent_lines(&self) -> Arc<Mutex<Vec<String>>> {
        self.sent.clone()
    }

    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

#[async_trait]
impl ConsoleChannel for FakeConsole {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }

        self.partial.push_str(&String::from_utf8_lossy(bytes));
        while let Some(idx) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=idx).collect();
            let line = line.trim_end_matches('\n');
            self.sent.lock().unwrap().push(line.to_string());
            if let Some(output) = (self.responder)(line) {
                self.pending.push_back(output.into_bytes());
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, ChannelError>> {
        if let Some(chunk) = self.pending.pop_front() {
            self.delivered += 1;
            return Some(Ok(chunk));
        }

        let hung_up =
            self.hang_up_after.is_some_and(|limit| self.delivered >= limit);
        if hung_up || self.closed.load(Ordering::SeqCst) {
            return None;
        }

        std::future::pending().await
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens [`FakeConsole`]s that share one responder and one record of sent
/// lines.
pub(crate) struct FakeConsoleFactory {
    responder: Arc<Responder>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl FakeConsoleFactory {
    pub(crate) fn new(
        responder: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Arc::new(responder),
            sent: Arc::default(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn sent_lines(&self) -> Arc<Mutex<Vec<String>>> {
        self.sent.clone()
    }

    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

#[async_trait]
impl ConsoleFactory for FakeConsoleFactory {
    async fn open(
        &self,
        _vmi: &ObjectId,
    ) -> Result<Box<dyn ConsoleChannel>, HarnessError> {
        self.closed.store(false, Ordering::SeqCst);
        Ok(Box::new(FakeConsole::with_shared(
            self.responder.clone(),
            self.sent.clone(),
            self.closed.clone(),
        )))
    }
}
