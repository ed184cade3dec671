//! Project staging.
//!
//! Layout under the project root:
//!
//! ```text
//! deploy_workspace/
//!   <config_file>              build configuration, rewritten in full
//!   src/<module>/<source_file> staged artifact
//!   recovery/<run_id>/         recovery audit artifacts
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use toolchain_env::ToolchainProfile;
use tracing::debug;

use crate::digest::sha256_hex;
use crate::error::Result;
use crate::request::DeploymentRequest;

/// Directory name of the staged workspace inside a project root.
pub const WORKSPACE_DIR: &str = "deploy_workspace";

/// Network name the replica is registered under in the build configuration.
pub const LOCAL_NETWORK: &str = "local";

pub fn workspace_dir(project_root: &Path) -> PathBuf {
    project_root.join(WORKSPACE_DIR)
}

/// Paths of one staged project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedProject {
    pub project_root: PathBuf,
    pub workspace: PathBuf,
    pub module_name: String,
    pub module_source_path: PathBuf,
    pub config_path: PathBuf,
}

/// Build configuration document consumed by the toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub version: u32,
    #[serde(rename = "canisters")]
    pub modules: BTreeMap<String, ModuleEntry>,
    pub networks: BTreeMap<String, NetworkEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    #[serde(rename = "type")]
    pub kind: String,
    /// Source path relative to the workspace.
    pub main: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub bind: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Writes the artifact and build configuration into the staged layout.
#[derive(Debug, Clone)]
pub struct ProjectMaterializer {
    profile: ToolchainProfile,
    host: String,
    port: u16,
}

impl ProjectMaterializer {
    pub fn new(profile: ToolchainProfile, host: impl Into<String>, port: u16) -> Self {
        Self {
            profile,
            host: host.into(),
            port,
        }
    }

    /// Paths `request` would be staged at, without touching the disk.
    pub fn layout(&self, project_root: &Path, module_name: &str) -> StagedProject {
        let workspace = workspace_dir(project_root);
        StagedProject {
            project_root: project_root.to_path_buf(),
            module_source_path: workspace
                .join("src")
                .join(module_name)
                .join(&self.profile.source_file),
            config_path: workspace.join(&self.profile.config_file),
            module_name: module_name.to_string(),
            workspace,
        }
    }

    /// Stage `request`. Safe to repeat: every file is overwritten in full.
    pub fn stage(&self, request: &DeploymentRequest) -> Result<StagedProject> {
        let staged = self.layout(request.project_root(), request.module_name());

        if let Some(dir) = staged.module_source_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&staged.module_source_path, request.source_artifact())?;

        let config = self.build_config(request.module_name());
        let mut rendered = serde_json::to_vec_pretty(&config)?;
        rendered.push(b'\n');
        std::fs::write(&staged.config_path, rendered)?;

        debug!(
            module = %staged.module_name,
            source = %staged.module_source_path.display(),
            config = %staged.config_path.display(),
            "project staged"
        );
        Ok(staged)
    }

    pub fn build_config(&self, module_name: &str) -> BuildConfig {
        let main = format!("src/{}/{}", module_name, self.profile.source_file);
        let modules = BTreeMap::from([(
            module_name.to_string(),
            ModuleEntry {
                kind: self.profile.module_kind.clone(),
                main,
            },
        )]);
        let networks = BTreeMap::from([(
            LOCAL_NETWORK.to_string(),
            NetworkEntry {
                bind: format!("{}:{}", self.host, self.port),
                kind: "ephemeral".to_string(),
            },
        )]);
        BuildConfig {
            version: 1,
            modules,
            networks,
        }
    }
}

/// Replace the staged module source.
pub fn write_artifact(staged: &StagedProject, source: &str) -> Result<()> {
    std::fs::write(&staged.module_source_path, source)?;
    Ok(())
}

pub fn read_artifact(staged: &StagedProject) -> Result<String> {
    Ok(std::fs::read_to_string(&staged.module_source_path)?)
}

/// SHA-256 over the staged config and source.
pub fn staged_digest(staged: &StagedProject) -> Result<String> {
    let mut bytes = std::fs::read(&staged.config_path)?;
    bytes.push(0);
    bytes.extend(std::fs::read(&staged.module_source_path)?);
    Ok(sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn materializer() -> ProjectMaterializer {
        ProjectMaterializer::new(ToolchainProfile::default(), "127.0.0.1", 4943)
    }

    #[test]
    fn test_stage_layout() {
        let dir = tempdir().unwrap();
        let req = DeploymentRequest::new("Echo", "actor {}", dir.path()).unwrap();
        let staged = materializer().stage(&req).unwrap();

        assert_eq!(
            staged.module_source_path,
            dir.path().join("deploy_workspace/src/Echo/module.src")
        );
        assert_eq!(staged.config_path, dir.path().join("deploy_workspace/config.json"));
        assert_eq!(read_artifact(&staged).unwrap(), "actor {}");
    }

    #[test]
    fn test_config_binds_module_and_replica() {
        let dir = tempdir().unwrap();
        let req = DeploymentRequest::new("Echo", "actor {}", dir.path()).unwrap();
        let staged = materializer().stage(&req).unwrap();

        let raw = std::fs::read(&staged.config_path).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["canisters"]["Echo"]["main"], "src/Echo/module.src");
        assert_eq!(value["canisters"]["Echo"]["type"], "motoko");
        assert_eq!(value["networks"]["local"]["bind"], "127.0.0.1:4943");
    }

    #[test]
    fn test_restage_is_byte_identical() {
        let dir = tempdir().unwrap();
        let req = DeploymentRequest::new("Echo", "actor { }", dir.path()).unwrap();
        let m = materializer();

        let first = m.stage(&req).unwrap();
        let config_a = std::fs::read(&first.config_path).unwrap();
        let source_a = std::fs::read(&first.module_source_path).unwrap();
        let digest_a = staged_digest(&first).unwrap();

        let second = m.stage(&req).unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second.config_path).unwrap(), config_a);
        assert_eq!(std::fs::read(&second.module_source_path).unwrap(), source_a);
        assert_eq!(staged_digest(&second).unwrap(), digest_a);

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("deploy_workspace/src"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_restage_overwrites_longer_source() {
        let dir = tempdir().unwrap();
        let m = materializer();
        let long = DeploymentRequest::new("Echo", "a much longer artifact body", dir.path()).unwrap();
        let short = DeploymentRequest::new("Echo", "short", dir.path()).unwrap();

        m.stage(&long).unwrap();
        let staged = m.stage(&short).unwrap();
        assert_eq!(read_artifact(&staged).unwrap(), "short");
    }

    #[test]
    fn test_write_artifact_changes_digest() {
        let dir = tempdir().unwrap();
        let req = DeploymentRequest::new("Echo", "v1", dir.path()).unwrap();
        let staged = materializer().stage(&req).unwrap();
        let before = staged_digest(&staged).unwrap();

        write_artifact(&staged, "v2").unwrap();
        assert_ne!(staged_digest(&staged).unwrap(), before);
    }
}
