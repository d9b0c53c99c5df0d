// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A buffer for console output that processes characters and newlines but
//! ignores VT100 control sequences, and that can be searched for expected
//! patterns.

use std::io::{BufWriter, Write};

use camino::Utf8Path;
use termwiz::escape::parser::Parser;
use tracing::{trace, warn};

use super::script::Pattern;

pub(super) struct MatchBuffer {
    log: Option<BufWriter<std::fs::File>>,
    line_buffer: String,
    wait_buffer: String,
    parser: Parser,
}

impl MatchBuffer {
    /// Constructs a new buffer. If `log_path` is supplied, every completed
    /// line of output is also appended to that file; failing to open the file
    /// only disables logging.
    pub(super) fn new(log_path: Option<&Utf8Path>) -> Self {
        let log = log_path.and_then(|path| {
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(file) => Some(BufWriter::new(file)),
                Err(e) => {
                    warn!(%path, %e, "failed to open console log file");
                    None
                }
            }
        });

        Self {
            log,
            line_buffer: String::new(),
            wait_buffer: String::new(),
            parser: Parser::new(),
        }
    }

    /// Returns the output received so far that has not been consumed by a
    /// match.
    pub(super) fn unmatched(&self) -> &str {
        &self.wait_buffer
    }

    pub(super) fn process_bytes(&mut self, bytes: &[u8]) {
        use termwiz::escape::{Action, ControlCode};
        let actions = self.parser.parse_as_vec(bytes);
        for action in actions {
            match action {
                Action::Print(c) => self.push_character(c),
                Action::PrintString(s) => self.push_str(&s),
                Action::Control(ControlCode::LineFeed) => {
                    self.push_character('\n')
                }
                _ => {
                    trace!(?action, "console buffer ignored action");
                }
            }
        }
    }

    /// Searches the unconsumed output for `pattern`. On a match, removes the
    /// matched text and everything before it from the buffer and returns the
    /// text that preceded the match.
    ///
    /// If the buffer contains multiple matches, the *last* one is used.
    pub(super) fn take_match(&mut self, pattern: &Pattern) -> Option<String> {
        let (start, end) = pattern.find_last(&self.wait_buffer)?;
        let preceding = self.wait_buffer[..start].to_string();
        self.wait_buffer.drain(..end);
        Some(preceding)
    }

    fn push_character(&mut self, c: char) {
        if c == '\n' {
            self.flush_line();
        } else {
            self.line_buffer.push(c);
        }

        self.wait_buffer.push(c);
    }

    fn push_str(&mut self, s: &str) {
        self.line_buffer.push_str(s);
        self.wait_buffer.push_str(s);
    }

    fn flush_line(&mut self) {
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = write_line(log, &self.line_buffer) {
                warn!(%e, "failed to write console log, disabling it");
                self.log = None;
            }
        }
        self.line_buffer.clear();
    }
}

fn write_line(
    log: &mut BufWriter<std::fs::File>,
    line: &str,
) -> std::io::Result<()> {
    log.write_all(line.as_bytes())?;
    log.write_all(b"\n")?;
    log.flush()
}

impl Drop for MatchBuffer {
    fn drop(&mut self) {
        if let Some(log) = self.log.as_mut() {
            if !self.line_buffer.is_empty() {
                let _ = log.write_all(self.line_buffer.as_bytes());
            }
            if let Err(e) = log.flush() {
                warn!(%e, "failed to flush console log during drop");
            }
        }
    }
}
