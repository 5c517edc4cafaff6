//! Output collector.
//!
//! Turns the line callbacks of a launched process into a [`TestOutcome`].
//! Both reader tasks append under one mutex, so the recorded order is the
//! order in which lines were observed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use package_verifier_core::{ResultMessage, TestOutcome};

use crate::launcher::LineHandlers;

#[derive(Debug, Default)]
struct Captured {
    messages: Vec<ResultMessage>,
    logs: String,
}

/// Shared record of a process's output.
#[derive(Debug, Clone)]
pub struct OutputCollector {
    source: &'static str,
    captured: Arc<Mutex<Captured>>,
}

impl OutputCollector {
    /// `source` tags local log lines, e.g. `Turbo` or `Container`.
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            captured: Arc::new(Mutex::new(Captured::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Captured> {
        self.captured.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one stdout line. Blank lines are ignored.
    pub fn record_stdout(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        tracing::info!(" [{}] {}", self.source, line);
        let mut captured = self.lock();
        captured.logs.push_str(line);
        captured.logs.push('\n');
        captured.messages.push(ResultMessage::note(line));
    }

    /// Record one stderr line. Logged louder, but stored as a note like stdout.
    pub fn record_stderr(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        tracing::warn!(" [{}][Error] {}", self.source, line);
        let mut captured = self.lock();
        captured.logs.push_str("[ERROR] ");
        captured.logs.push_str(line);
        captured.logs.push('\n');
        captured.messages.push(ResultMessage::note(line));
    }

    /// Handlers that feed this collector.
    pub fn line_handlers(&self) -> LineHandlers {
        let out = self.clone();
        let err = self.clone();
        LineHandlers::new(
            move |line| out.record_stdout(line),
            move |line| err.record_stderr(line),
        )
    }

    /// Everything captured so far.
    pub fn outcome(&self, exit_code: Option<i32>, timed_out: bool) -> TestOutcome {
        let captured = self.lock();
        TestOutcome {
            messages: captured.messages.clone(),
            logs: captured.logs.clone(),
            exit_code,
            timed_out,
        }
    }

    /// Everything captured since the previous call, leaving the record empty.
    ///
    /// Lines that arrive between two calls land in the later outcome.
    pub fn take_outcome(&self, exit_code: Option<i32>, timed_out: bool) -> TestOutcome {
        let Captured { messages, logs } = std::mem::take(&mut *self.lock());
        TestOutcome {
            messages,
            logs,
            exit_code,
            timed_out,
        }
    }
}
