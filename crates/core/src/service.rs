//! The seam between the sandbox layer and the test runner that drives it.

use async_trait::async_trait;

use crate::{Result, TestOutcome};

/// Environment in which package installation tests are run.
///
/// Implementations own at most one live sandbox. Calls are expected to come
/// from a single control task; `run` must not be issued concurrently.
#[async_trait]
pub trait PackageTestService: Send + Sync {
    /// Make the sandbox ready for commands. A no-op when it is already running.
    async fn prepare(&self) -> Result<bool>;

    /// Run one command inside the prepared sandbox.
    async fn run(&self, command: &str) -> Result<TestOutcome>;

    /// Stop, revert the container to its clean state and prepare it again.
    /// Returns whether the revert was confirmed.
    async fn reset(&self) -> Result<bool>;

    /// Stop the sandbox. Safe to call when nothing is running.
    async fn shutdown(&self) -> Result<()>;

    /// Stop the sandbox and remove the container.
    async fn destroy(&self) -> Result<()>;
}
