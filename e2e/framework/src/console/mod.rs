// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scripted interaction with a VMI's serial console.
//!
//! A [`ConsoleSession`] owns a [`ConsoleChannel`] and runs
//! [`ConsoleScript`]s against it. Each step writes one line to the channel
//! and then buffers incoming output until the step's expected pattern
//! appears, the step's wait window expires, or the channel closes. The first
//! failing step stops the script.

use async_trait::async_trait;
use camino::Utf8Path;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vmi_api_types::ObjectId;

use crate::HarnessError;

mod buffer;
pub mod script;
pub mod websocket;

use buffer::MatchBuffer;
pub use script::{
    ConsoleScript, ConsoleStep, Pattern, ScriptFailure, ScriptState,
    StepFailureCause, StepOutput, Transcript,
};

/// Errors raised by a console transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("console transport is closed")]
    Closed,

    #[error("console transport error: {0}")]
    Transport(String),
}

/// A bidirectional byte channel to a guest's console.
#[async_trait]
pub trait ConsoleChannel: Send {
    /// Writes `bytes` to the guest.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError>;

    /// Waits for the next chunk of output from the guest. Returns `None` once
    /// the channel has closed.
    async fn recv(&mut self) -> Option<Result<Vec<u8>, ChannelError>>;

    /// Closes the channel. Closing an already-closed channel succeeds.
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Opens console channels to running VMIs.
#[async_trait]
pub trait ConsoleFactory: Send + Sync {
    async fn open(
        &self,
        vmi: &ObjectId,
    ) -> Result<Box<dyn ConsoleChannel>, HarnessError>;
}

/// A console channel together with the state needed to run scripts over it.
pub struct ConsoleSession {
    vmi: String,
    channel: Box<dyn ConsoleChannel>,
    buffer: MatchBuffer,
    state: ScriptState,
}

impl ConsoleSession {
    /// Wraps `channel`, the console of the VMI named `vmi`. If `log_path` is
    /// supplied, console output is appended to it line by line.
    pub fn new(
        vmi: impl Into<String>,
        channel: Box<dyn ConsoleChannel>,
        log_path: Option<&Utf8Path>,
    ) -> Self {
        Self {
            vmi: vmi.into(),
            channel,
            buffer: MatchBuffer::new(log_path),
            state: ScriptState::Idle,
        }
    }

    pub fn state(&self) -> ScriptState {
        self.state
    }

    /// Runs `script` to completion or to its first failing step.
    ///
    /// Each step, sending included, waits at most for its own timeout, if it
    /// has one, and never past the script's overall deadline.
    pub async fn run(
        &mut self,
        script: &ConsoleScript,
    ) -> Result<Transcript, ScriptFailure> {
        let deadline = Instant::now() + script.timeout();
        let mut transcript = Transcript::with_capacity(script.steps().len());

        for (idx, step) in script.steps().iter().enumerate() {
            match self.run_step(idx, step, deadline).await {
                Ok(preceding) => {
                    transcript.push(StepOutput { step: idx, preceding })
                }
                Err(cause) => {
                    self.state = ScriptState::Failed(idx);
                    let failure = ScriptFailure {
                        step: idx,
                        expected: step
                            .expect
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_else(|| "nothing".to_string()),
                        cause,
                        unmatched: self.buffer.unmatched().to_string(),
                    };
                    warn!(vmi = %self.vmi, %failure, "console script failed");
                    return Err(failure);
                }
            }
        }

        self.state = ScriptState::Completed;
        info!(vmi = %self.vmi, steps = transcript.len(), "console script completed");
        Ok(transcript)
    }

    async fn run_step(
        &mut self,
        idx: usize,
        step: &ConsoleStep,
        deadline: Instant,
    ) -> Result<String, StepFailureCause> {
        let started = Instant::now();
        let step_deadline = match step.timeout {
            Some(t) => deadline.min(started + t),
            None => deadline,
        };

        if let Some(line) = &step.send {
            self.state = ScriptState::Sending(idx);
            debug!(vmi = %self.vmi, step = idx, line, "sending console line");
            let mut bytes = line.clone().into_bytes();
            bytes.push(b'\n');
            tokio::time::timeout_at(step_deadline, self.channel.send(&bytes))
                .await
                .map_err(|_| StepFailureCause::TimedOut {
                    waited: started.elapsed(),
                })??;
        }

        let Some(pattern) = &step.expect else {
            return Ok(String::new());
        };

        self.state = ScriptState::Matching(idx);
        loop {
            if let Some(preceding) = self.buffer.take_match(pattern) {
                debug!(vmi = %self.vmi, step = idx, %pattern, "console pattern matched");
                return Ok(preceding);
            }

            match tokio::time::timeout_at(step_deadline, self.channel.recv())
                .await
            {
                Err(_) => {
                    return Err(StepFailureCause::TimedOut {
                        waited: started.elapsed(),
                    })
                }
                Ok(None) => return Err(StepFailureCause::ChannelClosed),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(bytes))) => self.buffer.process_bytes(&bytes),
            }
        }
    }

    /// Closes the underlying channel.
    pub async fn close(mut self) -> Result<(), ChannelError> {
        self.channel.close().await
    }
}
