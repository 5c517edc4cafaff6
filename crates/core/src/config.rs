use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[cfg(windows)]
const DEFAULT_TOOL_PATH: &str = r"C:\Program Files (x86)\Spoon\Cmd\turbo.exe";
#[cfg(not(windows))]
const DEFAULT_TOOL_PATH: &str = "/usr/local/bin/turbo";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VerifierConfig {
    /// Upper bound for a single package command.
    pub command_execution_timeout_seconds: u64,
    /// Extra time granted to control-plane invocations on top of the command timeout.
    pub control_timeout_grace_seconds: u64,
    pub sandbox: SandboxConfig,
    pub logging: LoggingConfig,
}

/// How `run` decides that the sandbox has finished answering a command.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Set by any stdout line, cleared by any stderr line. Best-effort only.
    #[default]
    Heuristic,
    /// A marker line is echoed after each command and awaited on stdout.
    Sentinel,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    pub tool_path: String,
    /// Looked up on `PATH` when `tool_path` does not exist.
    pub tool_name: String,
    pub container_name: String,
    pub image: String,
    /// Host directory mounted into the container for shared files and logs.
    pub shared_dir: String,
    pub startup_command: Vec<String>,
    pub settle_delay_ms: u64,
    /// Wait bound for `run`. Unset means the command execution timeout.
    pub response_timeout_ms: Option<u64>,
    pub response_mode: ResponseMode,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

impl VerifierConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("VERIFIER_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map VERIFIER__SANDBOX__CONTAINER_NAME=x to sandbox.container_name
            .add_source(Environment::with_prefix("VERIFIER").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Timeout applied to control-plane invocations (`run`, `stop`, `revert`, `rm`).
    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.command_execution_timeout_seconds + self.control_timeout_grace_seconds)
    }

    /// How long `run` waits for the sandbox to answer before giving up.
    pub fn response_timeout(&self) -> Duration {
        self.sandbox
            .response_timeout()
            .unwrap_or_else(|| Duration::from_secs(self.command_execution_timeout_seconds))
    }
}

impl SandboxConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            command_execution_timeout_seconds: 2700,
            control_timeout_grace_seconds: 60,
            sandbox: SandboxConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            tool_path: DEFAULT_TOOL_PATH.into(),
            tool_name: "turbo".into(),
            container_name: "chocotest".into(),
            image: "chocolateylatest".into(),
            shared_dir: "files".into(),
            startup_command: Vec::new(),
            settle_delay_ms: 1000,
            response_timeout_ms: None,
            response_mode: ResponseMode::Heuristic,
        }
    }
}
