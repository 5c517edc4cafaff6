#![deny(unused)]
//! Core types, traits, and error definitions for the package verifier.
//!
//! This crate provides the building blocks shared between the sandbox layer
//! and the binary that drives it: the outcome types, the error taxonomy,
//! layered configuration, and the filesystem collaborator.

pub mod config;
pub mod error;
pub mod fs;
pub mod mocks;
pub mod service;
pub mod telemetry;
pub mod types;

pub use crate::config::{ResponseMode, SandboxConfig, VerifierConfig};
pub use error::{Error, Result};
pub use crate::fs::{FileSystem, LocalFileSystem};
pub use service::PackageTestService;
pub use telemetry::configure_tracing;
pub use types::{ResultMessage, ResultType, TestOutcome, TIMEOUT_EXIT_CODE};
