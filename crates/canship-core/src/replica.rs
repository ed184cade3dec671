//! Local replica lifecycle.
//!
//! State machine per project root:
//!
//! ```text
//! Stopped --ensure_running--> Starting --probe ok--> Running
//!                                 |
//!                                 +--ceiling reached--> Unreachable
//! ```
//!
//! Starting always stops any prior instance first: replicas keep corrupt
//! state across crashed runs and a clean restart is cheaper than diagnosing
//! it. A Running replica that still answers the probe is reused untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use toolchain_env::{CommandOutput, ToolchainCommand};
use tracing::{debug, info, warn};

use crate::config::ReplicaSettings;
use crate::error::{DeployError, Result};
use crate::materializer::workspace_dir;
use crate::metrics::METRICS;
use crate::port::ReplicaPortManager;
use crate::toolchain::Toolchain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaState {
    Stopped,
    Starting,
    Running,
    Unreachable,
}

/// Address and state of the replica serving one project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaEndpoint {
    pub host: String,
    pub port: u16,
    pub state: ReplicaState,
}

impl ReplicaEndpoint {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Starts, stops and health-checks the replica.
pub struct ReplicaLifecycle {
    toolchain: Arc<dyn Toolchain>,
    ports: ReplicaPortManager,
    settings: ReplicaSettings,
    endpoints: Mutex<HashMap<PathBuf, ReplicaEndpoint>>,
}

impl ReplicaLifecycle {
    pub fn new(
        toolchain: Arc<dyn Toolchain>,
        ports: ReplicaPortManager,
        settings: ReplicaSettings,
    ) -> Self {
        Self {
            toolchain,
            ports,
            settings,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_port(&self) -> u16 {
        self.settings.port
    }

    /// Ensure a replica for `project_root` is running on `port`.
    pub async fn ensure_running(&self, project_root: &Path, port: u16) -> Result<ReplicaEndpoint> {
        let root = canonical_root(project_root)?;
        let workspace = workspace_dir(&root);
        std::fs::create_dir_all(&workspace)?;

        let mut endpoints = self.endpoints.lock().await;
        let host = self.ports.host().to_string();

        if let Some(existing) = endpoints.get(&root) {
            if existing.state == ReplicaState::Running
                && existing.port == port
                && self.ping(&workspace, &host, port).await?.success()
            {
                debug!(url = %existing.url(), "replica already running");
                return Ok(existing.clone());
            }
        }

        let mut endpoint = ReplicaEndpoint {
            host: host.clone(),
            port,
            state: ReplicaState::Starting,
        };
        endpoints.insert(root.clone(), endpoint.clone());

        let result = self.start_clean(&workspace, &host, port).await;
        endpoint.state = match &result {
            Ok(()) => ReplicaState::Running,
            Err(DeployError::ReplicaStartFailure { .. }) => ReplicaState::Unreachable,
            Err(_) => ReplicaState::Stopped,
        };
        endpoints.insert(root, endpoint.clone());

        result.map(|()| endpoint)
    }

    async fn start_clean(&self, workspace: &Path, host: &str, port: u16) -> Result<()> {
        self.stop_quietly(workspace).await?;
        self.ports.ensure_port_free(port).await?;

        info!(host, port, "starting replica");
        METRICS.inc_replica_starts();
        let start = self
            .toolchain
            .run(
                workspace,
                &ToolchainCommand::StartReplica {
                    host: host.to_string(),
                    port,
                },
            )
            .await?;
        if !start.success() {
            return Err(DeployError::ReplicaStartFailure {
                output: start.combined(),
            });
        }

        let mut last_probe = CommandOutput::default();
        for attempt in 1..=self.settings.poll_attempts {
            last_probe = self.ping(workspace, host, port).await?;
            if last_probe.success() {
                info!(host, port, attempt, "replica running");
                return Ok(());
            }
            debug!(attempt, "replica not answering yet");
            if attempt < self.settings.poll_attempts {
                tokio::time::sleep(self.settings.poll_interval()).await;
            }
        }

        warn!(
            host,
            port,
            attempts = self.settings.poll_attempts,
            "replica did not become live"
        );
        let mut output = start.combined();
        let probe = last_probe.combined();
        if !probe.is_empty() {
            output.push_str("\nlast probe: ");
            output.push_str(&probe);
        }
        Err(DeployError::ReplicaStartFailure { output })
    }

    /// Stop the replica for `project_root`. Nothing running is not an error.
    pub async fn stop(&self, project_root: &Path) -> Result<()> {
        let root = canonical_root(project_root)?;
        let workspace = workspace_dir(&root);
        std::fs::create_dir_all(&workspace)?;
        self.stop_quietly(&workspace).await?;

        let mut endpoints = self.endpoints.lock().await;
        if let Some(endpoint) = endpoints.get_mut(&root) {
            endpoint.state = ReplicaState::Stopped;
        }
        Ok(())
    }

    /// Current endpoint for `project_root`, refreshed by a liveness probe.
    pub async fn status(&self, project_root: &Path) -> Result<ReplicaEndpoint> {
        let root = canonical_root(project_root)?;
        let workspace = workspace_dir(&root);
        std::fs::create_dir_all(&workspace)?;

        let mut endpoints = self.endpoints.lock().await;
        let mut endpoint = endpoints
            .get(&root)
            .cloned()
            .unwrap_or_else(|| ReplicaEndpoint {
                host: self.ports.host().to_string(),
                port: self.settings.port,
                state: ReplicaState::Stopped,
            });

        let alive = self
            .ping(&workspace, &endpoint.host, endpoint.port)
            .await?
            .success();
        endpoint.state = match (alive, endpoint.state) {
            (true, _) => ReplicaState::Running,
            (false, ReplicaState::Running) => ReplicaState::Unreachable,
            (false, state) => state,
        };
        endpoints.insert(root, endpoint.clone());
        Ok(endpoint)
    }

    async fn stop_quietly(&self, workspace: &Path) -> Result<()> {
        let out = self
            .toolchain
            .run(workspace, &ToolchainCommand::StopReplica)
            .await?;
        if !out.success() {
            debug!(output = %out.combined(), "no prior replica to stop");
        }
        Ok(())
    }

    async fn ping(&self, workspace: &Path, host: &str, port: u16) -> Result<CommandOutput> {
        self.toolchain
            .run(
                workspace,
                &ToolchainCommand::Ping {
                    host: host.to_string(),
                    port,
                },
            )
            .await
    }
}

/// Endpoint records are keyed by the resolved root, so `.` and its
/// absolute path share one record.
fn canonical_root(project_root: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(project_root)?;
    Ok(project_root.canonicalize()?)
}
