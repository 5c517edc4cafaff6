//! Process launcher.
//!
//! Spawns the sandbox tool with all three standard streams redirected and
//! delivers its output line by line to caller-supplied handlers. Stdout and
//! stderr are drained by two independent tasks so the child can never block
//! on a full pipe while we wait on the other one.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;

use package_verifier_core::{Error, Result, TIMEOUT_EXIT_CODE};

/// How long to keep draining output after the process is gone.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Callback invoked once per non-blank line.
pub type LineHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback invoked when a stream reaches end-of-file.
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;

/// Per-stream callbacks attached to a launched process.
#[derive(Clone)]
pub struct LineHandlers {
    stdout: LineHandler,
    stderr: LineHandler,
    stdout_closed: Option<CloseHandler>,
}

impl LineHandlers {
    pub fn new(
        stdout: impl Fn(&str) + Send + Sync + 'static,
        stderr: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        Self {
            stdout: Arc::new(stdout),
            stderr: Arc::new(stderr),
            stdout_closed: None,
        }
    }

    /// Run `on_close` once stdout reaches end-of-file.
    pub fn on_stdout_closed(mut self, on_close: impl Fn() + Send + Sync + 'static) -> Self {
        self.stdout_closed = Some(Arc::new(on_close));
        self
    }

    /// Handlers that discard everything.
    pub fn ignore() -> Self {
        Self::new(|_| {}, |_| {})
    }

    pub fn stdout_handler(&self) -> &LineHandler {
        &self.stdout
    }

    pub fn stderr_handler(&self) -> &LineHandler {
        &self.stderr
    }
}

/// What to run and where.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The command line as it would be typed, for logging.
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit status of a blocking invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub exit_code: i32,
    pub timed_out: bool,
}

/// The two output reader tasks of one process.
pub struct OutputReaders {
    stdout: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

impl OutputReaders {
    fn spawn<O, E>(stdout: O, stderr: E, handlers: LineHandlers) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        Self {
            stdout: spawn_reader(stdout, handlers.stdout, handlers.stdout_closed),
            stderr: spawn_reader(stderr, handlers.stderr, None),
        }
    }

    /// Wait for both readers to reach end-of-file, abandoning them after `grace`.
    ///
    /// A grandchild that inherited the pipes can keep them open after the
    /// direct child exits; in that case the readers are aborted.
    pub async fn join(self, grace: Duration) {
        for mut reader in [self.stdout, self.stderr] {
            if tokio::time::timeout(grace, &mut reader).await.is_err() {
                tracing::debug!("Output reader still pending after process exit, aborting");
                reader.abort();
            }
        }
    }
}

fn spawn_reader<R>(stream: R, on_line: LineHandler, on_close: Option<CloseHandler>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut segments = BufReader::new(stream).split(b'\n');
        loop {
            match segments.next_segment().await {
                Ok(Some(raw)) => {
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim_end_matches('\r');
                    if !line.trim().is_empty() {
                        on_line(line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read process output");
                    break;
                }
            }
        }
        if let Some(on_close) = on_close {
            on_close();
        }
    })
}

/// A spawned process with redirected streams.
pub struct ProcessHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    readers: Option<OutputReaders>,
    exit_code: Option<i32>,
}

impl ProcessHandle {
    /// OS process identifier, absent once the process has been reaped.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Take ownership of the process's stdin pipe.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Exit code, once the process is known to have exited.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Non-blocking check whether the process has exited.
    pub fn has_exited(&mut self) -> Result<bool> {
        if self.exit_code.is_some() {
            return Ok(true);
        }
        match self.child.try_wait()? {
            Some(status) => {
                self.exit_code = Some(exit_code_of(status));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Wait for the process to exit, up to `timeout`.
    ///
    /// Returns `None` when the timeout elapsed; the process is left running.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<i32>> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => {
                let code = exit_code_of(status?);
                self.exit_code = Some(code);
                Ok(Some(code))
            }
            Err(_) => Ok(None),
        }
    }

    /// Best-effort termination.
    ///
    /// A process that already exited, including one that exits between the
    /// check and the kill, is not an error. Any other kill failure is.
    pub async fn terminate(&mut self) -> Result<()> {
        if self.has_exited()? {
            return Ok(());
        }
        match self.child.kill().await {
            Ok(()) => {
                // kill() reaps the child, so its status is ready.
                self.exit_code = self.child.try_wait()?.map(exit_code_of);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                tracing::debug!(error = %e, "Process already exited before kill");
                Ok(())
            }
            Err(e) => match self.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(error = %e, "Process exited while being killed");
                    self.exit_code = Some(exit_code_of(status));
                    Ok(())
                }
                _ => Err(e.into()),
            },
        }
    }

    /// Wait for the output readers to finish.
    pub async fn drain_output(&mut self) {
        if let Some(readers) = self.readers.take() {
            readers.join(OUTPUT_DRAIN_GRACE).await;
        }
    }
}

/// Exit code of a finished process.
///
/// On Unix a process killed by a signal reports `128 + signal`, as a shell
/// would. Elsewhere a missing code reports -1.
fn exit_code_of(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(TIMEOUT_EXIT_CODE)
}

/// Spawn `spec` and start delivering its output to `handlers`.
///
/// # Errors
///
/// `LaunchFailure` if the program is not a file or the OS refuses to create
/// the process.
pub fn launch(spec: &LaunchSpec, handlers: LineHandlers) -> Result<ProcessHandle> {
    if !Path::new(&spec.program).is_file() {
        return Err(Error::launch_failure(format!(
            "executable not found: {}",
            spec.program.display()
        )));
    }

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::launch_failure(format!("failed to spawn '{}': {}", spec.display(), e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::internal("child stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::internal("child stderr was not captured"))?;
    let stdin = child.stdin.take();

    tracing::debug!(pid = ?child.id(), command = %spec.display(), "Process launched");

    Ok(ProcessHandle {
        child,
        stdin,
        readers: Some(OutputReaders::spawn(stdout, stderr, handlers)),
        exit_code: None,
    })
}

/// Run `spec` to completion, killing it if it outlives `timeout`.
///
/// Output captured before the kill has already been delivered to `handlers`.
pub async fn launch_with_timeout(
    spec: &LaunchSpec,
    handlers: LineHandlers,
    timeout: Duration,
) -> Result<Completion> {
    let mut process = launch(spec, handlers)?;
    // Nothing is written to a one-shot invocation; EOF keeps it from waiting on input.
    drop(process.take_stdin());

    let completion = match process.wait_timeout(timeout).await? {
        Some(exit_code) => Completion {
            exit_code,
            timed_out: false,
        },
        None => {
            tracing::warn!(command = %spec.display(), timeout = ?timeout, "Command timed out, killing process");
            if let Err(e) = process.terminate().await {
                tracing::warn!(command = %spec.display(), error = %e, "Failed to kill timed out process");
            }
            Completion {
                exit_code: TIMEOUT_EXIT_CODE,
                timed_out: true,
            }
        }
    };

    process.drain_output().await;
    Ok(completion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capture() -> (LineHandlers, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let out = lines.clone();
        let err = lines.clone();
        let handlers = LineHandlers::new(
            move |l| out.lock().unwrap().push(format!("out:{}", l)),
            move |l| err.lock().unwrap().push(format!("err:{}", l)),
        );
        (handlers, lines)
    }

    #[tokio::test]
    async fn test_reader_skips_blank_lines_and_strips_cr() {
        let (handlers, lines) = capture();
        let stdout: &[u8] = b"first\r\n\n   \nsecond";
        let stderr: &[u8] = b"\t\noops\n";
        OutputReaders::spawn(stdout, stderr, handlers)
            .join(Duration::from_secs(1))
            .await;

        let mut seen = lines.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["err:oops", "out:first", "out:second"]);
    }

    #[tokio::test]
    async fn test_reader_keeps_stream_order() {
        let (handlers, lines) = capture();
        let stdout: &[u8] = b"1\n2\n3\n4\n";
        OutputReaders::spawn(stdout, tokio::io::empty(), handlers)
            .join(Duration::from_secs(1))
            .await;
        assert_eq!(*lines.lock().unwrap(), vec!["out:1", "out:2", "out:3", "out:4"]);
    }

    #[tokio::test]
    async fn test_close_handler_fires_at_eof() {
        let closed = Arc::new(Mutex::new(false));
        let flag = closed.clone();
        let handlers = LineHandlers::ignore().on_stdout_closed(move || *flag.lock().unwrap() = true);
        OutputReaders::spawn(tokio::io::empty(), tokio::io::empty(), handlers)
            .join(Duration::from_secs(1))
            .await;
        assert!(*closed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_failure() {
        let spec = LaunchSpec::new("/definitely/not/here/turbo", std::env::temp_dir()).arg("stop");
        let result = launch(&spec, LineHandlers::ignore());
        assert!(matches!(result, Err(Error::LaunchFailure(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_with_timeout_reports_exit_code() {
        let (handlers, lines) = capture();
        let spec = LaunchSpec::new("/bin/sh", std::env::temp_dir())
            .args(["-c", "echo out; echo err 1>&2; exit 7"]);

        let completion = launch_with_timeout(&spec, handlers, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(completion, Completion { exit_code: 7, timed_out: false });
        let mut seen = lines.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["err:err", "out:out"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_uses_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let (handlers, lines) = capture();
        let spec = LaunchSpec::new("/bin/sh", dir.path()).args(["-c", "pwd"]);

        launch_with_timeout(&spec, handlers, Duration::from_secs(10))
            .await
            .unwrap();

        let name = dir.path().file_name().unwrap().to_string_lossy().to_string();
        let seen = lines.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].ends_with(&name), "pwd printed {:?}", seen[0]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_after_exit_is_ok() {
        let spec = LaunchSpec::new("/bin/sh", std::env::temp_dir()).args(["-c", "exit 0"]);
        let mut process = launch(&spec, LineHandlers::ignore()).unwrap();
        assert_eq!(process.wait_timeout(Duration::from_secs(10)).await.unwrap(), Some(0));

        process.terminate().await.unwrap();
        process.terminate().await.unwrap();
        assert!(process.has_exited().unwrap());
        assert_eq!(process.exit_code(), Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_reports_kill_status() {
        let spec = LaunchSpec::new("/bin/sh", std::env::temp_dir()).args(["-c", "exec sleep 30"]);
        let mut process = launch(&spec, LineHandlers::ignore()).unwrap();
        assert!(!process.has_exited().unwrap());

        process.terminate().await.unwrap();
        assert!(process.has_exited().unwrap());
        // SIGKILL, not the timeout code.
        assert_eq!(process.exit_code(), Some(128 + 9));
        assert_ne!(process.exit_code(), Some(TIMEOUT_EXIT_CODE));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_with_timeout_keeps_partial_output() {
        let (handlers, lines) = capture();
        let spec = LaunchSpec::new("/bin/sh", std::env::temp_dir())
            .args(["-c", "echo started; exec sleep 30"]);

        let completion = launch_with_timeout(&spec, handlers, Duration::from_millis(500))
            .await
            .unwrap();

        assert_eq!(
            completion,
            Completion {
                exit_code: TIMEOUT_EXIT_CODE,
                timed_out: true
            }
        );
        assert_eq!(*lines.lock().unwrap(), vec!["out:started"]);
    }

    #[test]
    fn test_spec_display() {
        let spec = LaunchSpec::new("/opt/turbo", "/tmp").args(["revert", "chocotest"]);
        assert_eq!(spec.display(), "/opt/turbo revert chocotest");
    }
}
