//! Deployment error taxonomy.
//!
//! Every fatal condition bubbles up to [`crate::DeploymentOrchestrator::deploy`]
//! as one of these variants. A failing static check is not an error: it is a
//! [`crate::ValidationResult`] routed into the recovery pipeline, and because
//! the minimal fallback tier always terminates that pipeline there is no
//! "recovery exhausted" variant.

use toolchain_env::ToolchainError;

/// Remediation shown when the toolchain cannot be found or run.
pub const TOOLCHAIN_HINT: &str =
    "install the toolchain CLI or pass its location with --toolchain / CANSHIP_TOOLCHAIN";

/// Errors produced by a deployment run.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("toolchain unavailable: {detail} ({hint})")]
    ToolchainAbsent { detail: String, hint: String },

    #[error("port {port} is busy: {reason}")]
    PortBusy { port: u16, reason: String },

    #[error("replica failed to start: {output}")]
    ReplicaStartFailure { output: String },

    #[error("{action} invocation failed: {output}")]
    DeployInvocationFailure { action: String, output: String },

    #[error("invalid deployment request: {0}")]
    InvalidRequest(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),
}

impl DeployError {
    pub fn toolchain_absent(detail: impl Into<String>) -> Self {
        DeployError::ToolchainAbsent {
            detail: detail.into(),
            hint: TOOLCHAIN_HINT.to_string(),
        }
    }

    /// Short stage tag used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::ToolchainAbsent { .. } => "toolchain_absent",
            DeployError::PortBusy { .. } => "port_busy",
            DeployError::ReplicaStartFailure { .. } => "replica_start_failure",
            DeployError::DeployInvocationFailure { .. } => "deploy_invocation_failure",
            DeployError::InvalidRequest(_) => "invalid_request",
            DeployError::DigestMismatch { .. } => "digest_mismatch",
            DeployError::Serialization(_) => "serialization",
            DeployError::Filesystem(_) => "filesystem",
        }
    }
}

impl From<ToolchainError> for DeployError {
    fn from(err: ToolchainError) -> Self {
        match err {
            ToolchainError::Io(e) => DeployError::Filesystem(e),
            other => DeployError::toolchain_absent(other.to_string()),
        }
    }
}

/// Result type for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;
