//! Deployment configuration.
//!
//! Every section has a `Default` matching the documented design defaults, so
//! a config file only needs the fields it overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use toolchain_env::ToolchainProfile;

use crate::error::Result;
use crate::recovery::catalog::LibraryCatalog;

/// Default replica bind host.
pub const DEFAULT_REPLICA_HOST: &str = "127.0.0.1";

/// Default fixed replica port.
pub const DEFAULT_REPLICA_PORT: u16 = 4943;

/// Top-level configuration for the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeployConfig {
    pub replica: ReplicaSettings,
    pub port: PortSettings,
    pub toolchain: ToolchainSettings,
    pub recovery: RecoverySettings,
    pub codegen: Option<CodeGenConfig>,
}

impl DeployConfig {
    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Replica endpoint and liveness polling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplicaSettings {
    pub host: String,
    pub port: u16,

    /// Interval between liveness probes (milliseconds).
    pub poll_interval_ms: u64,

    /// Probes before giving up.
    pub poll_attempts: u32,
}

impl Default for ReplicaSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_REPLICA_HOST.to_string(),
            port: DEFAULT_REPLICA_PORT,
            poll_interval_ms: 5_000,
            poll_attempts: 24,
        }
    }
}

impl ReplicaSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Port conflict handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PortSettings {
    /// Terminate-and-reprobe cycles after the first failed probe.
    pub retries: u32,

    /// Wait after terminating the owner before re-probing (milliseconds).
    pub settle_delay_ms: u64,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            retries: 1,
            settle_delay_ms: 2_000,
        }
    }
}

impl PortSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Toolchain binary location and command profile.
///
/// The profile defaults to the stock dfx project layout (`dfx.json`,
/// `main.mo`), which is what the default binary reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolchainSettings {
    /// Explicit binary path; searched for by name when absent.
    pub binary: Option<PathBuf>,
    pub profile: ToolchainProfile,
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            binary: None,
            profile: ToolchainProfile::dfx(),
        }
    }
}

/// Recovery pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoverySettings {
    pub catalog: LibraryCatalog,

    /// Regexes (case-insensitive) recognising a missing support library.
    pub support_library_signatures: Vec<String>,

    /// Terminal passthrough module.
    pub fallback_artifact: String,

    /// Write `recovery.json` + digest under the workspace after recovery.
    pub persist_log: bool,
}

/// Minimal passthrough module exposing one generic operation.
pub const DEFAULT_FALLBACK_ARTIFACT: &str = r#"actor {
  public func process(input : Text) : async Text {
    input
  };
};
"#;

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            catalog: LibraryCatalog::default(),
            support_library_signatures: vec![
                r#"package\s+"?base"?\s+(?:not\s+(?:found|defined)|is\s+not\s+defined)"#
                    .to_string(),
                r"\[M0010\]".to_string(),
                r"could\s+not\s+(?:locate|find)\s+(?:the\s+)?package".to_string(),
                r"support\s+librar(?:y|ies)\s+(?:missing|not\s+found)".to_string(),
                r"file\s+\S*(?:\.vessel|\.mops|/packages?/)\S*\s+(?:does\s+not\s+exist|not\s+found)"
                    .to_string(),
            ],
            fallback_artifact: DEFAULT_FALLBACK_ARTIFACT.to_string(),
            persist_log: true,
        }
    }
}

/// External code generation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CodeGenConfig {
    pub endpoint: String,
    pub model: Option<String>,

    /// Environment variable holding a bearer token, read at client build time.
    pub api_key_env: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CodeGenConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/generate".to_string(),
            model: None,
            api_key_env: Some("CANSHIP_CODEGEN_TOKEN".to_string()),
            timeout_secs: 120,
        }
    }
}
