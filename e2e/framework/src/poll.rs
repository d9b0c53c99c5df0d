// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-interval polling of VMI state.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use vmi_api_types::{ObjectId, VirtualMachineInstance, VmiPhase};
use vmi_client::ControlPlane;

use crate::HarnessError;

/// The result of one probe of a condition being polled.
pub enum Probe<T> {
    /// The condition holds; polling stops and yields the value.
    Ready(T),

    /// The condition does not hold yet. The string describes what was
    /// observed and is reported if the deadline passes.
    Pending(String),
}

enum Attempt {
    Pending(String),
    Failed(HarnessError),
}

/// Calls `probe` every `interval` until it reports [`Probe::Ready`], returns
/// an error, or `deadline` elapses.
///
/// Errors from `probe` end the wait immediately; they are never retried. A
/// probe still running when `deadline` passes is abandoned.
pub async fn poll_until<T, F, Fut>(
    operation: &str,
    interval: Duration,
    deadline: Duration,
    mut probe: F,
) -> Result<T, HarnessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, HarnessError>>,
{
    let backoff = backoff::ExponentialBackoffBuilder::new()
        .with_initial_interval(interval)
        .with_max_interval(interval)
        .with_multiplier(1.0)
        .with_randomization_factor(0.0)
        .with_max_elapsed_time(Some(deadline))
        .build();

    let started = Instant::now();
    let last_observed: Mutex<Option<String>> = Mutex::new(None);
    let last_ref = &last_observed;
    let retry = backoff::future::retry(backoff, || {
        let attempt = probe();
        async move {
            match attempt.await {
                Ok(Probe::Ready(value)) => Ok(value),
                Ok(Probe::Pending(observed)) => {
                    debug!(operation, %observed, "condition not met yet");
                    if let Ok(mut last) = last_ref.lock() {
                        *last = Some(observed.clone());
                    }
                    Err(backoff::Error::transient(Attempt::Pending(observed)))
                }
                Err(e) => Err(backoff::Error::permanent(Attempt::Failed(e))),
            }
        }
    });

    // The backoff only checks elapsed time between attempts, so a probe that
    // never completes is cut off here.
    let result =
        match tokio::time::timeout_at(tokio::time::Instant::now() + deadline, retry)
            .await
        {
            Ok(result) => result,
            Err(_) => {
                let observed = last_observed
                    .lock()
                    .ok()
                    .and_then(|mut last| last.take())
                    .unwrap_or_else(|| {
                        "no probe completed before the deadline".to_string()
                    });
                Err(Attempt::Pending(observed))
            }
        };

    match result {
        Ok(value) => {
            info!(operation, waited = ?started.elapsed(), "condition met");
            Ok(value)
        }
        Err(Attempt::Pending(last_observed)) => Err(HarnessError::Timeout {
            operation: operation.to_string(),
            waited: started.elapsed(),
            last_observed,
        }),
        Err(Attempt::Failed(e)) => Err(e),
    }
}

/// Parameters for waiting on a VMI.
#[derive(Clone, Copy, Debug)]
pub struct ReadyOptions {
    /// How long to wait before giving up.
    pub deadline: Duration,

    /// How long to sleep between polls.
    pub interval: Duration,

    /// If true, warning events recorded against the VMI are logged and
    /// otherwise ignored. If false, the first warning fails the wait.
    pub ignore_warnings: bool,
}

impl ReadyOptions {
    pub fn strict(deadline: Duration, interval: Duration) -> Self {
        Self { deadline, interval, ignore_warnings: false }
    }

    pub fn lenient(deadline: Duration, interval: Duration) -> Self {
        Self { deadline, interval, ignore_warnings: true }
    }
}

/// Polls `vmi` until `predicate` holds for its current state and returns
/// that state.
///
/// The wait fails early if the VMI disappears, is marked for deletion,
/// reaches a final phase without satisfying `predicate`, or (for strict
/// waits) has a warning event recorded against it.
pub async fn await_vmi<P>(
    control_plane: &dyn ControlPlane,
    vmi: &VirtualMachineInstance,
    opts: &ReadyOptions,
    operation: &str,
    predicate: P,
) -> Result<VirtualMachineInstance, HarnessError>
where
    P: Fn(&VirtualMachineInstance) -> bool + Sync,
{
    let id = vmi.id();
    let seen_warnings = Mutex::new(HashSet::new());
    let operation = format!("VMI {id} {operation}");

    let id_ref = &id;
    let seen_ref = &seen_warnings;
    let predicate_ref = &predicate;
    poll_until(&operation, opts.interval, opts.deadline, move || async move {
        let current = match control_plane.get_vmi(id_ref).await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => {
                return Err(HarnessError::Aborted {
                    vmi: id_ref.to_string(),
                    detail: "VMI no longer exists".to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if current.metadata.is_terminating() {
            return Err(HarnessError::Aborted {
                vmi: id_ref.to_string(),
                detail: "VMI is being deleted".to_string(),
            });
        }

        if let Some(uid) = current.uid() {
            let events =
                control_plane.list_events(&id_ref.namespace, uid).await?;
            for event in events.into_iter().filter(|e| {
                e.is_warning() && e.involved_object.uid == uid
            }) {
                if !opts.ignore_warnings {
                    return Err(HarnessError::WarningObserved {
                        vmi: id_ref.to_string(),
                        reason: event.reason,
                        message: event.message,
                    });
                }

                let key = if event.metadata.name.is_empty() {
                    format!("{}: {}", event.reason, event.message)
                } else {
                    event.metadata.name.clone()
                };
                let first_sighting = seen_ref
                    .lock()
                    .map(|mut seen| seen.insert(key))
                    .unwrap_or(true);
                if first_sighting {
                    warn!(
                        vmi = %id_ref,
                        reason = %event.reason,
                        message = %event.message,
                        "ignoring warning event"
                    );
                }
            }
        }

        if predicate_ref(&current) {
            return Ok(Probe::Ready(current));
        }

        let phase = current.status.phase;
        if phase.is_final() {
            return Err(HarnessError::Aborted {
                vmi: id_ref.to_string(),
                detail: format!("VMI reached final phase {phase:?}"),
            });
        }

        Ok(Probe::Pending(format!("phase {phase:?}")))
    })
    .await
}

/// Polls `vmi` until it reports the `Running` phase.
pub async fn await_ready(
    control_plane: &dyn ControlPlane,
    vmi: &VirtualMachineInstance,
    opts: &ReadyOptions,
) -> Result<VirtualMachineInstance, HarnessError> {
    await_vmi(control_plane, vmi, opts, "to start", |v| {
        v.status.phase == VmiPhase::Running
    })
    .await
}

/// Polls until the VMI `id` no longer exists.
pub async fn await_gone(
    control_plane: &dyn ControlPlane,
    id: &ObjectId,
    deadline: Duration,
    interval: Duration,
) -> Result<(), HarnessError> {
    let operation = format!("VMI {id} to disappear");
    poll_until(&operation, interval, deadline, || async move {
        match control_plane.get_vmi(id).await {
            Ok(vmi) => Ok(Probe::Pending(format!(
                "phase {:?}, terminating: {}",
                vmi.status.phase,
                vmi.metadata.is_terminating()
            ))),
            Err(e) if e.is_not_found() => Ok(Probe::Ready(())),
            Err(e) => Err(e.into()),
        }
    })
    .await
}
