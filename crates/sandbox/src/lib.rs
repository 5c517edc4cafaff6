#![deny(unused)]
//! Sandbox lifecycle management for package verification.
//!
//! This crate drives an external sandbox tool: it starts a container, streams
//! commands into it, captures its interleaved stdout/stderr as structured
//! results, and tears it down deterministically.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  Test runner                           │
//! │    ↓ PackageTestService                │
//! ├────────────────────────────────────────┤
//! │  SandboxController                     │
//! │    prepare / run / reset / shutdown    │
//! ├──────────────────┬─────────────────────┤
//! │  CommandChannel  │  control commands   │
//! │  (sandbox stdin) │  (stop/revert/rm)   │
//! ├──────────────────┴─────────────────────┤
//! │  Launcher + OutputCollector            │
//! │    ↓ tokio::process, line readers      │
//! ├────────────────────────────────────────┤
//! │  Sandbox tool (external executable)    │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use package_verifier_core::VerifierConfig;
//! use package_verifier_sandbox::SandboxController;
//!
//! let controller = SandboxController::new(VerifierConfig::load()?)?;
//! controller.prepare().await?;
//! let outcome = controller.run("choco install git -y").await?;
//! let clean = controller.reset().await?;
//! controller.destroy().await?;
//! ```

pub mod channel;
pub mod collector;
pub mod controller;
pub mod launcher;

pub use channel::{CommandChannel, ResponseSignal};
pub use collector::OutputCollector;
pub use controller::{SandboxController, SandboxState, REVERT_CONFIRMATION};
pub use launcher::{launch, launch_with_timeout, Completion, LaunchSpec, LineHandlers, ProcessHandle};
