//! Module identifier lookup.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use toolchain_env::ToolchainCommand;
use tracing::debug;

use crate::error::Result;
use crate::materializer::workspace_dir;
use crate::toolchain::Toolchain;

/// Whether a module is already deployed, and under which id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub module_name: String,
    pub existing_id: Option<String>,
}

impl ModuleRecord {
    pub fn is_deployed(&self) -> bool {
        self.existing_id.is_some()
    }
}

/// Asks the toolchain for a module's id. Holds no state: every call
/// queries the toolchain afresh.
#[derive(Clone)]
pub struct ModuleRegistry {
    toolchain: Arc<dyn Toolchain>,
}

impl ModuleRegistry {
    pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
        Self { toolchain }
    }

    pub async fn resolve(&self, module_name: &str, project_root: &Path) -> Result<ModuleRecord> {
        let workspace = workspace_dir(project_root);
        std::fs::create_dir_all(&workspace)?;

        let out = self
            .toolchain
            .run(
                &workspace,
                &ToolchainCommand::ModuleId {
                    module: module_name.to_string(),
                },
            )
            .await?;

        let existing_id = if out.success() {
            out.trailing_token().map(str::to_string)
        } else {
            debug!(module = module_name, output = %out.combined(), "module not deployed");
            None
        };

        Ok(ModuleRecord {
            module_name: module_name.to_string(),
            existing_id,
        })
    }
}
