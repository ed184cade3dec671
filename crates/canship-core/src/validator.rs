//! Static artifact validation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use toolchain_env::ToolchainCommand;
use tracing::debug;

use crate::error::Result;
use crate::materializer::StagedProject;
use crate::toolchain::Toolchain;

/// Pass/fail verdict of the toolchain's static checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub raw_error: Option<String>,
}

impl ValidationResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            raw_error: None,
        }
    }

    pub fn fail(raw_error: impl Into<String>) -> Self {
        Self {
            passed: false,
            raw_error: Some(raw_error.into()),
        }
    }

    /// Diagnostic text, empty when passed.
    pub fn diagnostic(&self) -> &str {
        self.raw_error.as_deref().unwrap_or("")
    }
}

/// Runs the offline checker against a staged project. Read-only.
#[derive(Clone)]
pub struct ArtifactValidator {
    toolchain: Arc<dyn Toolchain>,
}

impl ArtifactValidator {
    pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
        Self { toolchain }
    }

    pub async fn check(&self, staged: &StagedProject) -> Result<ValidationResult> {
        let out = self
            .toolchain
            .run(
                &staged.workspace,
                &ToolchainCommand::Check {
                    module: staged.module_name.clone(),
                    source: staged.module_source_path.clone(),
                },
            )
            .await?;

        debug!(module = %staged.module_name, exit_code = out.exit_code, "static check finished");
        if out.success() {
            Ok(ValidationResult::pass())
        } else {
            let diagnostic = out.combined();
            Ok(ValidationResult::fail(if diagnostic.is_empty() {
                format!("checker exited with code {}", out.exit_code)
            } else {
                diagnostic
            }))
        }
    }
}
