//! Sandbox lifecycle controller.
//!
//! Owns at most one sandbox process and sequences the control-plane commands
//! (`run`, `stop`, `revert`, `rm`) of the external sandbox tool around it.
//!
//! ```text
//!            prepare()                 settle delay
//!  Stopped ────────────▶ Starting ───────────────────▶ Running
//!     ▲                                                  │
//!     │                shutdown() / process exit         │
//!     └──────────────────── Stopping ◀───────────────────┘
//! ```
//!
//! All mutable state sits behind one async mutex that is held for the whole
//! of each operation, so at most one command is ever in flight per sandbox.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use package_verifier_core::fs::{resolve_tool_path, FileSystem, LocalFileSystem};
use package_verifier_core::{Error, PackageTestService, Result, TestOutcome, VerifierConfig};

use crate::channel::CommandChannel;
use crate::collector::OutputCollector;
use crate::launcher::{launch, launch_with_timeout, LaunchSpec, ProcessHandle};

/// Phrase the sandbox tool prints after a successful `revert`.
pub const REVERT_CONFIRMATION: &str = "reverted all changes";

/// Lifecycle state of the controller's sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// The live sandbox process and everything attached to it.
struct SandboxHandle {
    process: ProcessHandle,
    channel: CommandChannel,
    collector: OutputCollector,
}

struct Inner {
    state: SandboxState,
    handle: Option<SandboxHandle>,
}

pub struct SandboxController {
    config: VerifierConfig,
    tool_path: PathBuf,
    working_dir: PathBuf,
    shared_dir: PathBuf,
    inner: Mutex<Inner>,
}

impl SandboxController {
    /// Create a controller resolving paths against the local filesystem.
    pub fn new(config: VerifierConfig) -> Result<Self> {
        Self::with_file_system(config, &LocalFileSystem)
    }

    pub fn with_file_system(config: VerifierConfig, fs: &dyn FileSystem) -> Result<Self> {
        let tool_path = resolve_tool_path(fs, &config.sandbox.tool_path, &config.sandbox.tool_name);
        let working_dir = fs.current_exe_dir()?;
        let shared_dir = fs.full_path(Path::new(&config.sandbox.shared_dir))?;

        tracing::debug!(
            tool = %tool_path.display(),
            working_dir = %working_dir.display(),
            shared_dir = %shared_dir.display(),
            "Sandbox controller configured"
        );

        Ok(Self {
            config,
            tool_path,
            working_dir,
            shared_dir,
            inner: Mutex::new(Inner {
                state: SandboxState::Stopped,
                handle: None,
            }),
        })
    }

    pub fn tool_path(&self) -> &Path {
        &self.tool_path
    }

    fn container_name(&self) -> &str {
        &self.config.sandbox.container_name
    }

    /// Current state, after noticing a sandbox process that exited on its own.
    pub async fn state(&self) -> SandboxState {
        let mut inner = self.inner.lock().await;
        Self::refresh(&mut inner);
        inner.state
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == SandboxState::Running
    }

    /// OS process id of the live sandbox, if any.
    pub async fn process_id(&self) -> Option<u32> {
        let mut inner = self.inner.lock().await;
        Self::refresh(&mut inner);
        inner.handle.as_ref().and_then(|h| h.process.id())
    }

    /// Drop the handle of a sandbox process that is no longer alive.
    fn refresh(inner: &mut Inner) {
        let exited = match inner.handle.as_mut() {
            Some(handle) => match handle.process.has_exited() {
                Ok(exited) => exited,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not poll sandbox process");
                    false
                }
            },
            None => false,
        };
        if exited {
            let exit_code = inner.handle.as_ref().and_then(|h| h.process.exit_code());
            tracing::info!(exit_code = ?exit_code, "Sandbox process exited");
            inner.handle = None;
            inner.state = SandboxState::Stopped;
        }
    }

    fn run_args(&self) -> Vec<String> {
        let sandbox = &self.config.sandbox;
        let mut args = vec![
            "run".to_string(),
            sandbox.image.clone(),
            "--admin".to_string(),
            format!("-n={}", sandbox.container_name),
            format!("--mount={}", self.shared_dir.display()),
        ];
        args.extend(sandbox.startup_command.iter().cloned());
        args
    }

    /// Start the sandbox unless it is already running.
    pub async fn prepare(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        self.prepare_locked(&mut inner).await
    }

    async fn prepare_locked(&self, inner: &mut Inner) -> Result<bool> {
        Self::refresh(inner);
        if inner.state == SandboxState::Running {
            return Ok(true);
        }

        self.shutdown_locked(inner).await?;
        inner.state = SandboxState::Starting;

        let collector = OutputCollector::new("Container");
        let mut channel = CommandChannel::new(self.config.sandbox.response_mode);
        let spec = LaunchSpec::new(&self.tool_path, &self.working_dir).args(self.run_args());

        let mut process = match launch(&spec, channel.line_handlers(&collector)) {
            Ok(process) => process,
            Err(e) => {
                inner.state = SandboxState::Stopped;
                return Err(e);
            }
        };
        if let Some(stdin) = process.take_stdin() {
            channel.connect(stdin);
        }

        tracing::info!(
            container = %self.container_name(),
            pid = ?process.id(),
            "Sandbox started, waiting for it to settle"
        );

        // The tool reports the spawn before the container accepts input.
        tokio::time::sleep(self.config.sandbox.settle_delay()).await;

        inner.handle = Some(SandboxHandle {
            process,
            channel,
            collector,
        });
        inner.state = SandboxState::Running;
        Ok(true)
    }

    /// Send `command` into the running sandbox and collect its response.
    ///
    /// # Errors
    ///
    /// - `InvalidCommand` if `command` is blank
    /// - `NotRunning` if no sandbox is active
    /// - `ChannelClosed` if the sandbox stopped reading its input
    pub async fn run(&self, command: &str) -> Result<TestOutcome> {
        if command.trim().is_empty() {
            return Err(Error::invalid_command("command cannot be empty"));
        }

        let mut inner = self.inner.lock().await;
        Self::refresh(&mut inner);
        let handle = match (inner.state, inner.handle.as_mut()) {
            (SandboxState::Running, Some(handle)) => handle,
            _ => return Err(Error::NotRunning),
        };

        tracing::debug!(command = %command, "Executing command in sandbox");

        let timeout = self.config.response_timeout();
        let completed = handle.channel.request(command, Some(timeout)).await?;
        if !completed {
            tracing::warn!(command = %command, timeout = ?timeout, "No response from sandbox in time");
        }

        Ok(handle.collector.take_outcome(None, !completed))
    }

    /// Stop, revert the container and start it again.
    ///
    /// The sandbox is prepared again whether or not the revert was confirmed.
    pub async fn reset(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        self.shutdown_locked(&mut inner).await?;

        let reverted = match self.execute_control(&["revert", self.container_name()]).await {
            Ok(outcome) => outcome.logs_contain(REVERT_CONFIRMATION),
            Err(e) => {
                tracing::warn!(error = %e, "Revert command could not be run");
                false
            }
        };
        if !reverted {
            tracing::warn!(container = %self.container_name(), "Revert was not confirmed");
        }

        self.prepare_locked(&mut inner).await?;
        Ok(reverted)
    }

    /// Stop the container and kill the sandbox process if it is still alive.
    pub async fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.shutdown_locked(&mut inner).await
    }

    async fn shutdown_locked(&self, inner: &mut Inner) -> Result<()> {
        let had_handle = inner.handle.is_some();
        if had_handle {
            inner.state = SandboxState::Stopping;
        }

        match self.execute_control(&["stop", self.container_name()]).await {
            Ok(outcome) if !outcome.success() => {
                tracing::debug!(exit_code = ?outcome.exit_code, "Stop command reported failure");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Stop command could not be run"),
        }

        let result = match inner.handle.take() {
            Some(mut handle) => {
                handle.channel.close().await;
                let terminated = handle.process.terminate().await;
                handle.process.drain_output().await;
                terminated
            }
            None => Ok(()),
        };

        inner.state = SandboxState::Stopped;
        if had_handle {
            tracing::info!(container = %self.container_name(), "Sandbox shut down");
        }
        result
    }

    /// Shut down and remove the container. It must be prepared from scratch afterwards.
    pub async fn destroy(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.shutdown_locked(&mut inner).await?;

        let outcome = self.execute_control(&["rm", self.container_name()]).await?;
        if outcome.success() {
            tracing::info!(container = %self.container_name(), "Container removed");
        } else {
            tracing::warn!(
                container = %self.container_name(),
                exit_code = ?outcome.exit_code,
                "Container removal reported failure"
            );
        }
        Ok(())
    }

    /// Run a one-shot control-plane command against the sandbox tool.
    ///
    /// Non-zero exits and timeouts are reported in the outcome, not as errors.
    ///
    /// # Errors
    ///
    /// `LaunchFailure` if the sandbox tool cannot be started.
    pub async fn execute_control(&self, args: &[&str]) -> Result<TestOutcome> {
        tracing::debug!(command = %args.join(" "), "Executing sandbox tool command");

        let collector = OutputCollector::new("Turbo");
        let spec = LaunchSpec::new(&self.tool_path, &self.working_dir).args(args.iter().copied());
        let completion =
            launch_with_timeout(&spec, collector.line_handlers(), self.config.control_timeout()).await?;

        Ok(collector.outcome(Some(completion.exit_code), completion.timed_out))
    }
}

#[async_trait]
impl PackageTestService for SandboxController {
    async fn prepare(&self) -> Result<bool> {
        SandboxController::prepare(self).await
    }

    async fn run(&self, command: &str) -> Result<TestOutcome> {
        SandboxController::run(self, command).await
    }

    async fn reset(&self) -> Result<bool> {
        SandboxController::reset(self).await
    }

    async fn shutdown(&self) -> Result<()> {
        SandboxController::shutdown(self).await
    }

    async fn destroy(&self) -> Result<()> {
        SandboxController::destroy(self).await
    }
}
