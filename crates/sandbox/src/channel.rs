//! Command channel into a running sandbox.
//!
//! Commands are written as lines to the sandbox's stdin. There is no framing
//! and no end-of-response marker in the sandbox's own protocol, so completion
//! is decided by a [`ResponseMode`]:
//!
//! - `Heuristic`: a manual-reset signal that any stdout line sets and any
//!   stderr line clears. This is best-effort only. Bursty output, or a command
//!   whose first line arrives before the rest, releases the waiter early and
//!   the remaining lines end up in the next command's window.
//! - `Sentinel`: after each command the channel asks the sandbox shell to
//!   echo a unique marker and waits for that exact line on stdout.
//!
//! A wait that times out only unblocks the caller. Lines that arrive later
//! are still captured, but are attributed to whatever command comes next.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use package_verifier_core::{Error, ResponseMode, Result};

use crate::collector::OutputCollector;
use crate::launcher::LineHandlers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalState {
    Reset,
    Set,
    /// Stdout reached end-of-file; no further response can arrive.
    Closed,
}

/// Manual-reset event shared between the output readers and the sender.
#[derive(Debug, Clone)]
pub struct ResponseSignal {
    tx: std::sync::Arc<watch::Sender<SignalState>>,
}

impl Default for ResponseSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SignalState::Reset);
        Self {
            tx: std::sync::Arc::new(tx),
        }
    }

    pub fn set(&self) {
        self.tx.send_if_modified(|state| {
            if *state == SignalState::Reset {
                *state = SignalState::Set;
                true
            } else {
                false
            }
        });
    }

    pub fn reset(&self) {
        self.tx.send_if_modified(|state| {
            if *state == SignalState::Set {
                *state = SignalState::Reset;
                true
            } else {
                false
            }
        });
    }

    /// Release all current and future waiters for good.
    pub fn close(&self) {
        self.tx.send_replace(SignalState::Closed);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow() != SignalState::Reset
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow() == SignalState::Closed
    }

    /// Block until the signal is set or closed. Returns `false` if `timeout` elapsed first.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.tx.subscribe();
        let released = async move { rx.wait_for(|state| *state != SignalState::Reset).await.is_ok() };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, released).await.unwrap_or(false),
            None => released.await,
        }
    }
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Line-oriented writer into a sandbox's stdin plus its completion signal.
pub struct CommandChannel {
    writer: Option<Writer>,
    signal: ResponseSignal,
    mode: ResponseMode,
    marker: String,
}

impl CommandChannel {
    pub fn new(mode: ResponseMode) -> Self {
        Self {
            writer: None,
            signal: ResponseSignal::new(),
            mode,
            marker: format!("__package_verifier_done_{}__", uuid::Uuid::new_v4().simple()),
        }
    }

    /// Handlers for the sandbox process: record into `collector` and drive the signal.
    ///
    /// Each line is recorded before the signal is touched, so a released waiter
    /// always sees the line that released it.
    pub fn line_handlers(&self, collector: &OutputCollector) -> LineHandlers {
        let out = collector.clone();
        let err = collector.clone();
        let on_out = self.signal.clone();
        let on_err = self.signal.clone();
        let on_close = self.signal.clone();
        let mode = self.mode;
        let marker = self.marker.clone();

        LineHandlers::new(
            move |line| match mode {
                ResponseMode::Heuristic => {
                    out.record_stdout(line);
                    on_out.set();
                }
                ResponseMode::Sentinel => {
                    if line.trim() == marker {
                        on_out.set();
                    } else {
                        out.record_stdout(line);
                    }
                }
            },
            move |line| {
                err.record_stderr(line);
                if mode == ResponseMode::Heuristic {
                    on_err.reset();
                }
            },
        )
        .on_stdout_closed(move || on_close.close())
    }

    /// Attach the sandbox's stdin.
    pub fn connect(&mut self, writer: impl AsyncWrite + Send + Unpin + 'static) {
        self.writer = Some(Box::new(writer));
    }

    pub fn signal(&self) -> &ResponseSignal {
        &self.signal
    }

    pub fn mode(&self) -> ResponseMode {
        self.mode
    }

    /// Write `line` and a newline, then flush.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the channel was closed or the sandbox is no longer reading.
    pub async fn send(&mut self, line: &str) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::channel_closed("channel is not connected"))?;

        let mut payload = String::with_capacity(line.len() + 1);
        payload.push_str(line);
        payload.push('\n');

        let written = async {
            writer.write_all(payload.as_bytes()).await?;
            writer.flush().await
        };
        written.await.map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe => Error::channel_closed(e.to_string()),
            _ => Error::Io(e),
        })
    }

    /// Send one command and wait for its response to be considered complete.
    ///
    /// Returns `false` if `timeout` elapsed before completion.
    pub async fn request(&mut self, command: &str, timeout: Option<Duration>) -> Result<bool> {
        if self.signal.is_closed() {
            return Err(Error::channel_closed("sandbox output has ended"));
        }
        self.signal.reset();
        self.send(command).await?;
        if self.mode == ResponseMode::Sentinel {
            let marker_command = format!("echo {}", self.marker);
            self.send(&marker_command).await?;
        }
        Ok(self.signal.wait(timeout).await)
    }

    /// Flush and release stdin. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush().await {
                tracing::debug!(error = %e, "Flush on close failed");
            }
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "Shutdown on close failed");
            }
        }
    }
}
