//! Toolchain seam.
//!
//! Defines the async [`Toolchain`] trait every component talks to, plus
//! [`CliToolchain`], the subprocess-backed implementation built on
//! `toolchain-env`.

use std::path::Path;

use async_trait::async_trait;
use toolchain_env::{invoke, CommandOutput, ToolchainBinary, ToolchainCommand, ToolchainProfile};
use tracing::debug;

use crate::error::Result;

/// Backend able to execute toolchain operations.
///
/// `Ok` carries the captured output for any exit code; `Err` is reserved
/// for the toolchain being absent or unrunnable.
#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn run(&self, workspace: &Path, command: &ToolchainCommand) -> Result<CommandOutput>;

    /// Layout conventions (source/config file names, module kind).
    fn profile(&self) -> &ToolchainProfile;
}

/// Subprocess-backed toolchain with an explicitly resolved binary.
#[derive(Debug, Clone)]
pub struct CliToolchain {
    binary: ToolchainBinary,
    profile: ToolchainProfile,
}

impl CliToolchain {
    pub fn new(binary: ToolchainBinary, profile: ToolchainProfile) -> Self {
        Self { binary, profile }
    }

    /// Resolve the binary once, from an explicit path or the profile's name.
    pub fn resolve(explicit: Option<&Path>, profile: ToolchainProfile) -> Result<Self> {
        let binary = ToolchainBinary::resolve(&profile.binary_name, explicit)?;
        Ok(Self::new(binary, profile))
    }

    pub fn binary(&self) -> &ToolchainBinary {
        &self.binary
    }
}

#[async_trait]
impl Toolchain for CliToolchain {
    async fn run(&self, workspace: &Path, command: &ToolchainCommand) -> Result<CommandOutput> {
        let out = invoke(&self.binary, &self.profile, command, workspace).await?;
        debug!(
            op = command.kind(),
            exit_code = out.exit_code,
            duration_ms = out.duration_ms,
            "toolchain invocation finished"
        );
        Ok(out)
    }

    fn profile(&self) -> &ToolchainProfile {
        &self.profile
    }
}
