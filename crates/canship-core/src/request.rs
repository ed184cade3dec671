//! Deployment request and outcome types.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};
use crate::recovery::RecoveryLog;

/// One deployment invocation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    module_name: String,
    source_artifact: String,
    project_root: PathBuf,
}

impl DeploymentRequest {
    /// Build a request, rejecting module names that are unsafe as a
    /// directory component or toolchain argument.
    pub fn new(
        module_name: impl Into<String>,
        source_artifact: impl Into<String>,
        project_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let module_name = module_name.into();
        validate_module_name(&module_name)?;
        Ok(Self {
            module_name,
            source_artifact: source_artifact.into(),
            project_root: project_root.into(),
        })
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn source_artifact(&self) -> &str {
        &self.source_artifact
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

/// Module names: ASCII alphanumerics, `_` and `-`, starting with a letter
/// or `_`.
pub fn validate_module_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let first = chars
        .next()
        .ok_or_else(|| DeployError::InvalidRequest("module name must not be empty".to_string()))?;

    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(DeployError::InvalidRequest(format!(
            "module name `{name}` must start with a letter or underscore"
        )));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-')) {
        return Err(DeployError::InvalidRequest(format!(
            "module name `{name}` contains invalid character `{bad}`"
        )));
    }
    Ok(())
}

/// Which deployment branch ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployAction {
    Install,
    Upgrade,
}

impl std::fmt::Display for DeployAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployAction::Install => write!(f, "install"),
            DeployAction::Upgrade => write!(f, "upgrade"),
        }
    }
}

/// Successful result of a deployment; ownership passes to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    pub module_id: String,
    pub action: DeployAction,

    /// Present when the artifact needed recovery before it validated.
    pub recovery: Option<RecoveryLog>,

    /// The minimal fallback artifact was deployed instead of the generated one.
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_module_names() {
        for name in ["Echo", "echo_2", "_internal", "my-module"] {
            assert!(validate_module_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_module_names() {
        for name in ["", "2fast", "-dash", "../escape", "has space", "a/b"] {
            assert!(
                matches!(validate_module_name(name), Err(DeployError::InvalidRequest(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_request_accessors() {
        let req = DeploymentRequest::new("Echo", "actor {}", "/tmp/project").unwrap();
        assert_eq!(req.module_name(), "Echo");
        assert_eq!(req.source_artifact(), "actor {}");
        assert_eq!(req.project_root(), Path::new("/tmp/project"));
    }

    #[test]
    fn test_action_display() {
        assert_eq!(DeployAction::Install.to_string(), "install");
        assert_eq!(DeployAction::Upgrade.to_string(), "upgrade");
    }
}
