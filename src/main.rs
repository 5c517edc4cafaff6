#![deny(unused)]
//! Package verifier - runs package installation commands in a disposable sandbox.
//!
//! Every positional argument is one command. The sandbox is prepared once,
//! each command runs against it, and the container is reverted between
//! commands so that every command starts from a clean state.

use std::sync::Arc;

use package_verifier_core::{PackageTestService, TestOutcome, VerifierConfig};
use package_verifier_sandbox::SandboxController;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = VerifierConfig::load()?;
    package_verifier_core::configure_tracing(config.logging.json)?;

    tracing::info!("Starting package verifier v{}", env!("CARGO_PKG_VERSION"));

    let commands: Vec<String> = std::env::args().skip(1).collect();
    if commands.is_empty() {
        tracing::warn!("No commands given, nothing to verify");
        return Ok(());
    }

    let controller = SandboxController::new(config)?;
    tracing::info!(tool = %controller.tool_path().display(), "Sandbox tool located");
    let service: Arc<dyn PackageTestService> = Arc::new(controller);

    let result = run_commands(service.as_ref(), &commands).await;

    // Tear down even when a command failed part way.
    if let Err(e) = service.shutdown().await {
        tracing::warn!(error = %e, "Sandbox shutdown failed");
    }

    let outcomes = result?;
    println!("{}", serde_json::to_string_pretty(&outcomes)?);

    let failed = outcomes.iter().filter(|o| !o.success()).count();
    tracing::info!(commands = outcomes.len(), failed, "Verification finished");
    Ok(())
}

/// Run each command in a freshly reverted sandbox.
async fn run_commands(
    service: &dyn PackageTestService,
    commands: &[String],
) -> package_verifier_core::Result<Vec<TestOutcome>> {
    service.prepare().await?;

    let mut outcomes = Vec::with_capacity(commands.len());
    for (i, command) in commands.iter().enumerate() {
        if i > 0 && !service.reset().await? {
            tracing::warn!(command = %command, "Sandbox revert not confirmed, state may leak between commands");
        }
        outcomes.push(service.run(command).await?);
    }
    Ok(outcomes)
}
