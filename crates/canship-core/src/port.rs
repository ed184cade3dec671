//! Replica port management.
//!
//! The replica binds a fixed, well-known port. A conflicting listener is
//! found through a [`PortInspector`] and terminated; this may kill an
//! unrelated process that happens to hold the port.

use std::io::ErrorKind;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::PortSettings;
use crate::error::{DeployError, Result};
use crate::metrics::METRICS;
use crate::obs::emit_port_reclaimed;

/// OS-level lookup and termination of a port's listening process.
#[async_trait]
pub trait PortInspector: Send + Sync {
    /// PID of the process listening on `port`, if one can be found.
    async fn owner_pid(&self, port: u16) -> std::io::Result<Option<u32>>;

    async fn terminate(&self, pid: u32) -> std::io::Result<()>;
}

/// `lsof` + `kill -9` inspector for unix hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LsofInspector;

#[async_trait]
impl PortInspector for LsofInspector {
    async fn owner_pid(&self, port: u16) -> std::io::Result<Option<u32>> {
        let output = Command::new("lsof")
            .args(["-t", "-i", &format!("tcp:{port}"), "-sTCP:LISTEN"])
            .output()
            .await?;

        // lsof exits 1 when nothing matches.
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_pid_list(&stdout))
    }

    async fn terminate(&self, pid: u32) -> std::io::Result<()> {
        let output = Command::new("kill")
            .args(["-9", &pid.to_string()])
            .output()
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(std::io::Error::new(
                ErrorKind::Other,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

fn parse_pid_list(raw: &str) -> Option<u32> {
    raw.lines().find_map(|line| line.trim().parse().ok())
}

/// Result of a single bind probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortProbe {
    Free,
    InUse,
    /// Bind failed for a reason other than a conflicting listener.
    Unavailable(String),
}

/// Owns the decision of which port the replica binds to.
#[derive(Clone)]
pub struct ReplicaPortManager {
    host: String,
    settings: PortSettings,
    inspector: Arc<dyn PortInspector>,
}

impl ReplicaPortManager {
    pub fn new(host: impl Into<String>, settings: PortSettings, inspector: Arc<dyn PortInspector>) -> Self {
        Self {
            host: host.into(),
            settings,
            inspector,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Try to bind `host:port` and release it immediately.
    pub async fn probe(&self, port: u16) -> PortProbe {
        match TcpListener::bind((self.host.as_str(), port)).await {
            Ok(listener) => {
                drop(listener);
                PortProbe::Free
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => PortProbe::InUse,
            Err(e) => PortProbe::Unavailable(e.to_string()),
        }
    }

    /// Make sure nothing listens on `port`, terminating the owner if needed.
    ///
    /// A free port is a no-op. Otherwise up to `retries` cycles of
    /// find-owner, terminate, settle, re-probe are run.
    pub async fn ensure_port_free(&self, port: u16) -> Result<()> {
        match self.probe(port).await {
            PortProbe::Free => {
                debug!(port, "port already free");
                return Ok(());
            }
            PortProbe::Unavailable(reason) => {
                return Err(DeployError::PortBusy { port, reason });
            }
            PortProbe::InUse => {}
        }

        let mut last_reason = "port in use and no reclaim retries configured".to_string();
        for attempt in 1..=self.settings.retries {
            let pid = match self.inspector.owner_pid(port).await {
                Ok(Some(pid)) => pid,
                Ok(None) => {
                    return Err(DeployError::PortBusy {
                        port,
                        reason: "address in use but no owning process found".to_string(),
                    })
                }
                Err(e) => {
                    return Err(DeployError::PortBusy {
                        port,
                        reason: format!("owner lookup failed: {e}"),
                    })
                }
            };

            if pid == std::process::id() {
                return Err(DeployError::PortBusy {
                    port,
                    reason: "port is held by this process".to_string(),
                });
            }

            warn!(port, pid, attempt, "terminating process holding replica port");
            if let Err(e) = self.inspector.terminate(pid).await {
                warn!(port, pid, error = %e, "terminate failed");
                last_reason = format!("failed to terminate pid {pid}: {e}");
            } else {
                last_reason = format!("port still bound after terminating pid {pid}");
            }

            tokio::time::sleep(self.settings.settle_delay()).await;

            if self.probe(port).await == PortProbe::Free {
                METRICS.inc_ports_reclaimed();
                emit_port_reclaimed(port, pid);
                info!(port, pid, "replica port reclaimed");
                return Ok(());
            }
        }

        Err(DeployError::PortBusy {
            port,
            reason: last_reason,
        })
    }
}
