//! toolchain-env: toolchain CLI environment layer for canship
//!
//! This crate owns everything that touches the external toolchain binary
//! directly: locating it, rendering argument vectors from a profile, running
//! it with captured output, and repairing its cached support libraries.
//!
//! Exit code zero is the only success signal; output is kept verbatim.

pub mod binary;
pub mod command;
pub mod error;
pub mod profile;

use std::path::Path;

use tracing::{info, warn};

pub use binary::{search_dirs, ToolchainBinary};
pub use command::{run_command, run_steps, CommandOutput};
pub use error::ToolchainError;
pub use profile::{CommandLine, TemplateVars, ToolchainCommand, ToolchainProfile};

/// Result type for toolchain-env operations
pub type Result<T> = std::result::Result<T, ToolchainError>;

/// Run one abstract toolchain operation inside `workspace`.
pub async fn invoke(
    binary: &ToolchainBinary,
    profile: &ToolchainProfile,
    command: &ToolchainCommand,
    workspace: &Path,
) -> Result<CommandOutput> {
    let vars = TemplateVars::for_command(command, workspace.to_path_buf());
    let steps = profile.steps(command, &vars);
    if steps.is_empty() {
        return Err(ToolchainError::EmptyCommand(command.kind()));
    }
    run_steps(binary.path(), &steps, workspace).await
}

/// Capability check: the binary answers its version command.
pub async fn is_toolchain_available(binary: &ToolchainBinary, profile: &ToolchainProfile) -> bool {
    let cwd = std::env::temp_dir();
    match invoke(binary, profile, &ToolchainCommand::Version, &cwd).await {
        Ok(out) if out.success() => {
            info!(version = %out.stdout.trim(), "toolchain available");
            true
        }
        Ok(out) => {
            warn!(exit_code = out.exit_code, "toolchain version check failed");
            false
        }
        Err(e) => {
            warn!(error = %e, "toolchain not runnable");
            false
        }
    }
}

/// Upgrade the toolchain and repopulate its support-library cache.
pub async fn repair_support_libraries(
    binary: &ToolchainBinary,
    profile: &ToolchainProfile,
    workspace: &Path,
) -> Result<CommandOutput> {
    info!(binary = %binary, "repairing toolchain support libraries");
    let out = invoke(binary, profile, &ToolchainCommand::RepairEnvironment, workspace).await?;
    if !out.success() {
        warn!(exit_code = out.exit_code, output = %out.combined(), "support library repair failed");
    }
    Ok(out)
}
