//! Error types for toolchain-env

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while locating or driving the toolchain CLI
#[derive(Error, Debug)]
pub enum ToolchainError {
    /// Binary could not be located in any search directory
    #[error("toolchain binary `{name}` not found (searched {searched} directories)")]
    NotFound { name: String, searched: usize },

    /// Explicit binary path does not point at an executable file
    #[error("toolchain binary at {0} is not an executable file")]
    NotExecutable(PathBuf),

    /// Process could not be spawned
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A command template rendered to an empty argument vector
    #[error("command `{0}` has no configured arguments")]
    EmptyCommand(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolchainError {
    /// Whether this error means the toolchain is not usable at all.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            ToolchainError::NotFound { .. }
                | ToolchainError::NotExecutable(_)
                | ToolchainError::Spawn { .. }
        )
    }
}
