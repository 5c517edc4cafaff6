//! Mock implementation of [`PackageTestService`] for testing outer layers
//! without a sandbox tool installed.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::{service::PackageTestService, Error, Result, ResultMessage, TestOutcome};

/// Scripted test service that records every call it receives.
pub struct MockTestService {
    outcomes: Mutex<VecDeque<TestOutcome>>,
    calls: Mutex<Vec<String>>,
    running: Mutex<bool>,
    revert_confirmed: bool,
}

impl Default for MockTestService {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MockTestService {
    /// Create a mock that answers `run` with the given outcomes in order.
    pub fn new(outcomes: Vec<TestOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
            running: Mutex::new(false),
            revert_confirmed: true,
        }
    }

    /// Make `reset` report an unconfirmed revert.
    pub fn with_failed_revert(mut self) -> Self {
        self.revert_confirmed = false;
        self
    }

    /// Operations received so far, e.g. `["prepare", "run:echo hi"]`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl PackageTestService for MockTestService {
    async fn prepare(&self) -> Result<bool> {
        self.record("prepare");
        *self.running.lock().unwrap() = true;
        Ok(true)
    }

    async fn run(&self, command: &str) -> Result<TestOutcome> {
        self.record(format!("run:{}", command));
        if !self.is_running() {
            return Err(Error::NotRunning);
        }
        let scripted = self.outcomes.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| TestOutcome {
            messages: vec![ResultMessage::note(format!("[mock] {}", command))],
            logs: format!("[mock] {}\n", command),
            exit_code: None,
            timed_out: false,
        }))
    }

    async fn reset(&self) -> Result<bool> {
        self.record("reset");
        *self.running.lock().unwrap() = true;
        Ok(self.revert_confirmed)
    }

    async fn shutdown(&self) -> Result<()> {
        self.record("shutdown");
        *self.running.lock().unwrap() = false;
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.record("destroy");
        *self.running.lock().unwrap() = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_requires_prepare() {
        let mock = MockTestService::default();
        let result = mock.run("choco install git").await;
        assert!(matches!(result, Err(Error::NotRunning)));
    }

    #[tokio::test]
    async fn test_scripted_lifecycle() {
        let mock = MockTestService::new(vec![TestOutcome {
            logs: "installed\n".into(),
            ..Default::default()
        }]);

        assert!(mock.prepare().await.unwrap());
        let first = mock.run("choco install git").await.unwrap();
        assert_eq!(first.logs, "installed\n");
        let second = mock.run("choco list").await.unwrap();
        assert!(second.logs_contain("choco list"));

        assert!(mock.reset().await.unwrap());
        mock.destroy().await.unwrap();
        assert!(!mock.is_running());
        assert_eq!(
            mock.calls(),
            vec!["prepare", "run:choco install git", "run:choco list", "reset", "destroy"]
        );
    }

    #[tokio::test]
    async fn test_failed_revert_still_running() {
        let mock = MockTestService::default().with_failed_revert();
        assert!(!mock.reset().await.unwrap());
        assert!(mock.is_running());
    }
}
