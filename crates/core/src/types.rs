//! Result types returned from every operation that runs a command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code reported when a control-plane command is killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Classification of a captured output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    /// Informational line. Both stdout and stderr lines are recorded as notes;
    /// severity only affects local logging.
    Note,
    Warn,
    Error,
}

/// One observed output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub message: String,
    pub message_type: ResultType,
    pub observed_at: DateTime<Utc>,
}

impl ResultMessage {
    /// Create a note stamped with the current time.
    pub fn note(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            message_type: ResultType::Note,
            observed_at: Utc::now(),
        }
    }
}

/// Result of one sandbox operation.
///
/// Messages are kept in the order they were observed. Lines from one stream keep
/// their emission order; lines from stdout and stderr may interleave arbitrarily.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub messages: Vec<ResultMessage>,
    /// Raw lines joined with newlines; stderr lines carry an `[ERROR] ` prefix.
    pub logs: String,
    /// Absent for interactive sessions, which have no per-command exit status.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl TestOutcome {
    /// Whether the operation finished in time with a zero (or absent) exit code.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code.unwrap_or(0) == 0
    }

    /// Case-insensitive substring search over the captured log text.
    pub fn logs_contain(&self, phrase: &str) -> bool {
        self.logs.to_lowercase().contains(&phrase.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_success() {
        let outcome = TestOutcome {
            exit_code: Some(0),
            ..Default::default()
        };
        assert!(outcome.success());

        let interactive = TestOutcome::default();
        assert!(interactive.success());

        let failed = TestOutcome {
            exit_code: Some(3),
            ..Default::default()
        };
        assert!(!failed.success());

        let timed_out = TestOutcome {
            exit_code: Some(TIMEOUT_EXIT_CODE),
            timed_out: true,
            ..Default::default()
        };
        assert!(!timed_out.success());
    }

    #[test]
    fn test_logs_contain_ignores_case() {
        let outcome = TestOutcome {
            logs: "Container chocotest: Reverted All Changes\n".into(),
            ..Default::default()
        };
        assert!(outcome.logs_contain("reverted all changes"));
        assert!(!outcome.logs_contain("removed"));
    }

    #[test]
    fn test_outcome_serializes_message_type() {
        let outcome = TestOutcome {
            messages: vec![ResultMessage::note("hello")],
            logs: "hello\n".into(),
            exit_code: None,
            timed_out: false,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["messages"][0]["message_type"], "note");
        assert!(json["exit_code"].is_null());
    }
}
