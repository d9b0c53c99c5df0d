// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Console scripts: ordered send/expect steps with bounded wait windows.

use std::{fmt, time::Duration};

use regex::Regex;
use thiserror::Error;

use super::ChannelError;
use crate::HarnessError;

/// Text to look for in console output.
#[derive(Clone, Debug)]
pub enum Pattern {
    /// Matches an exact substring.
    Literal(String),

    /// Matches a regular expression.
    Regex(Regex),
}

impl Pattern {
    pub fn literal(s: impl Into<String>) -> Self {
        Self::Literal(s.into())
    }

    pub fn regex(re: &str) -> Result<Self, regex::Error> {
        Ok(Self::Regex(Regex::new(re)?))
    }

    /// Returns the byte range of the last match of this pattern in
    /// `haystack`.
    pub(crate) fn find_last(&self, haystack: &str) -> Option<(usize, usize)> {
        match self {
            Self::Literal(s) => {
                haystack.rfind(s.as_str()).map(|idx| (idx, idx + s.len()))
            }
            Self::Regex(re) => {
                re.find_iter(haystack).last().map(|m| (m.start(), m.end()))
            }
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "{s:?}"),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// One step of a console script.
#[derive(Clone, Debug)]
pub struct ConsoleStep {
    /// A line to write to the console. A newline is appended when sending.
    pub send: Option<String>,

    /// The output to wait for after sending.
    pub expect: Option<Pattern>,

    /// The longest this step may wait for its pattern. The script's overall
    /// timeout still applies.
    pub timeout: Option<Duration>,
}

/// An ordered sequence of console steps with an overall timeout.
#[derive(Clone, Debug)]
pub struct ConsoleScript {
    steps: Vec<ConsoleStep>,
    timeout: Duration,
}

impl ConsoleScript {
    pub fn new(timeout: Duration) -> Self {
        Self { steps: Vec::new(), timeout }
    }

    /// Sends `line` and waits for `expect` to appear.
    pub fn send_expect(mut self, line: &str, expect: Pattern) -> Self {
        self.steps.push(ConsoleStep {
            send: Some(line.to_string()),
            expect: Some(expect),
            timeout: None,
        });
        self
    }

    /// Sends `line` without waiting for any output.
    pub fn send(mut self, line: &str) -> Self {
        self.steps.push(ConsoleStep {
            send: Some(line.to_string()),
            expect: None,
            timeout: None,
        });
        self
    }

    /// Waits for `expect` without sending anything.
    pub fn expect(mut self, expect: Pattern) -> Self {
        self.steps.push(ConsoleStep {
            send: None,
            expect: Some(expect),
            timeout: None,
        });
        self
    }

    /// Bounds the wait of the most recently added step.
    pub fn within(mut self, timeout: Duration) -> Self {
        if let Some(step) = self.steps.last_mut() {
            step.timeout = Some(timeout);
        }
        self
    }

    pub fn steps(&self) -> &[ConsoleStep] {
        &self.steps
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// The states a console session moves through while running a script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptState {
    Idle,
    Sending(usize),
    Matching(usize),
    Completed,
    Failed(usize),
}

/// Output captured for a completed step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepOutput {
    pub step: usize,

    /// Console output preceding the matched text. Empty for steps that did
    /// not wait for anything.
    pub preceding: String,
}

pub type Transcript = Vec<StepOutput>;

#[derive(Debug, Error)]
pub enum StepFailureCause {
    #[error("pattern not seen within {waited:?}")]
    TimedOut { waited: Duration },

    #[error("console closed before the pattern appeared")]
    ChannelClosed,

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// The first failing step of a script, with the output that was not matched.
#[derive(Debug, Error)]
#[error("console step {step} waiting for {expected} failed: {cause}")]
pub struct ScriptFailure {
    pub step: usize,
    pub expected: String,
    pub cause: StepFailureCause,
    pub unmatched: String,
}

impl From<ScriptFailure> for HarnessError {
    fn from(f: ScriptFailure) -> Self {
        match f.cause {
            StepFailureCause::TimedOut { waited } => HarnessError::Timeout {
                operation: format!("console step {} to show {}", f.step, f.expected),
                waited,
                last_observed: f.unmatched,
            },
            cause => HarnessError::ChannelError {
                detail: format!("step {}: {cause}", f.step),
                unmatched: f.unmatched,
            },
        }
    }
}
