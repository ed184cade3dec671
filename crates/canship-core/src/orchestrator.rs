//! End-to-end deployment state machine.
//!
//! ```text
//! Init -> Stage -> EnsureReplica -> Validate -> [Recover] -> Resolve
//!      -> {Install | Upgrade} -> [ResolveId] -> Done
//! ```
//!
//! Any error moves the run to `Failed` and is returned unchanged. Every
//! project root shares the one configured replica port, so deploys through
//! one orchestrator run one at a time, whichever root they target.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use toolchain_env::{CommandOutput, ToolchainCommand};
use tracing::{info, Instrument};

use crate::codegen::CodeGenService;
use crate::config::DeployConfig;
use crate::error::{DeployError, Result};
use crate::materializer::{ProjectMaterializer, StagedProject};
use crate::metrics::METRICS;
use crate::obs::{deploy_span, emit_deploy_failed, emit_deploy_finished, emit_phase};
use crate::port::{PortInspector, ReplicaPortManager};
use crate::recovery::{recovery_dir, write_recovery_artifact, RecoveryPipeline};
use crate::registry::ModuleRegistry;
use crate::replica::ReplicaLifecycle;
use crate::request::{DeployAction, DeploymentOutcome, DeploymentRequest};
use crate::toolchain::Toolchain;
use crate::validator::{ArtifactValidator, ValidationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    Init,
    Stage,
    EnsureReplica,
    Validate,
    Recover,
    Resolve,
    Install,
    Upgrade,
    ResolveId,
    Done,
    Failed,
}

impl std::fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeployPhase::Init => "init",
            DeployPhase::Stage => "stage",
            DeployPhase::EnsureReplica => "ensure_replica",
            DeployPhase::Validate => "validate",
            DeployPhase::Recover => "recover",
            DeployPhase::Resolve => "resolve",
            DeployPhase::Install => "install",
            DeployPhase::Upgrade => "upgrade",
            DeployPhase::ResolveId => "resolve_id",
            DeployPhase::Done => "done",
            DeployPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Sequences the deployment components for one request at a time.
pub struct DeploymentOrchestrator {
    config: DeployConfig,
    toolchain: Arc<dyn Toolchain>,
    materializer: ProjectMaterializer,
    replica: ReplicaLifecycle,
    validator: ArtifactValidator,
    recovery: RecoveryPipeline,
    registry: ModuleRegistry,
    /// Held across replica start and deploy; guards the shared replica port.
    replica_slot: Mutex<()>,
}

impl DeploymentOrchestrator {
    pub fn new(
        config: DeployConfig,
        toolchain: Arc<dyn Toolchain>,
        inspector: Arc<dyn PortInspector>,
        codegen: Option<Arc<dyn CodeGenService>>,
    ) -> Self {
        let ports = ReplicaPortManager::new(
            config.replica.host.clone(),
            config.port.clone(),
            inspector,
        );
        Self {
            materializer: ProjectMaterializer::new(
                toolchain.profile().clone(),
                config.replica.host.clone(),
                config.replica.port,
            ),
            replica: ReplicaLifecycle::new(toolchain.clone(), ports, config.replica.clone()),
            validator: ArtifactValidator::new(toolchain.clone()),
            recovery: RecoveryPipeline::new(
                toolchain.clone(),
                codegen,
                config.recovery.clone(),
            ),
            registry: ModuleRegistry::new(toolchain.clone()),
            toolchain,
            config,
            replica_slot: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn replica(&self) -> &ReplicaLifecycle {
        &self.replica
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Stage and deploy `request`, recovering the artifact if it fails the
    /// static check.
    pub async fn deploy(&self, request: &DeploymentRequest) -> Result<DeploymentOutcome> {
        let started = Instant::now();
        let module = request.module_name();
        METRICS.inc_deployments();

        let _slot = self.replica_slot.lock().await;

        let result = self
            .run(request)
            .instrument(deploy_span(module, request.project_root()))
            .await;

        match &result {
            Ok(outcome) => emit_deploy_finished(
                module,
                &outcome.module_id,
                &outcome.action.to_string(),
                outcome.degraded,
                started.elapsed().as_millis() as u64,
            ),
            Err(e) => {
                emit_phase(module, &DeployPhase::Failed);
                emit_deploy_failed(module, e.kind(), e);
            }
        }
        result
    }

    /// Stage `request` and run the static check only. No replica is started.
    pub async fn check(&self, request: &DeploymentRequest) -> Result<ValidationResult> {
        let _slot = self.replica_slot.lock().await;

        let staged = self.materializer.stage(request)?;
        self.validator.check(&staged).await
    }

    async fn run(&self, request: &DeploymentRequest) -> Result<DeploymentOutcome> {
        let module = request.module_name();
        let root = request.project_root();
        emit_phase(module, &DeployPhase::Init);

        emit_phase(module, &DeployPhase::Stage);
        let staged = self.materializer.stage(request)?;

        emit_phase(module, &DeployPhase::EnsureReplica);
        self.ensure_toolchain(&staged.workspace).await?;
        let endpoint = self
            .replica
            .ensure_running(root, self.config.replica.port)
            .await?;
        info!(url = %endpoint.url(), "replica ready");

        emit_phase(module, &DeployPhase::Validate);
        let verdict = self.validator.check(&staged).await?;

        let recovery = if verdict.passed {
            None
        } else {
            emit_phase(module, &DeployPhase::Recover);
            let report = self.recovery.recover(&staged, verdict.diagnostic()).await?;
            if self.config.recovery.persist_log {
                let path = write_recovery_artifact(&report.log, &recovery_dir(&staged.workspace))?;
                info!(path = %path.display(), "recovery log written");
            }
            Some(report.log)
        };

        emit_phase(module, &DeployPhase::Resolve);
        let record = self.registry.resolve(module, root).await?;

        let (action, module_id) = match record.existing_id {
            None => {
                emit_phase(module, &DeployPhase::Install);
                self.invoke(
                    &staged,
                    DeployAction::Install,
                    ToolchainCommand::Install {
                        module: module.to_string(),
                    },
                )
                .await?;
                METRICS.inc_installs();

                emit_phase(module, &DeployPhase::ResolveId);
                let issued = self.registry.resolve(module, root).await?;
                let id = issued
                    .existing_id
                    .ok_or_else(|| DeployError::DeployInvocationFailure {
                        action: DeployAction::Install.to_string(),
                        output: format!("install succeeded but no id was issued for `{module}`"),
                    })?;
                (DeployAction::Install, id)
            }
            Some(id) => {
                emit_phase(module, &DeployPhase::Upgrade);
                self.invoke(
                    &staged,
                    DeployAction::Upgrade,
                    ToolchainCommand::Upgrade {
                        module: module.to_string(),
                    },
                )
                .await?;
                METRICS.inc_upgrades();
                (DeployAction::Upgrade, id)
            }
        };

        emit_phase(module, &DeployPhase::Done);
        let degraded = recovery.as_ref().is_some_and(|log| log.degraded);
        Ok(DeploymentOutcome {
            module_id,
            action,
            recovery,
            degraded,
        })
    }

    /// Capability check: the toolchain must answer its version command.
    async fn ensure_toolchain(&self, workspace: &Path) -> Result<()> {
        let out = self.toolchain.run(workspace, &ToolchainCommand::Version).await?;
        if !out.success() {
            return Err(DeployError::toolchain_absent(format!(
                "version check exited with code {}: {}",
                out.exit_code,
                out.combined()
            )));
        }
        Ok(())
    }

    async fn invoke(
        &self,
        staged: &StagedProject,
        action: DeployAction,
        command: ToolchainCommand,
    ) -> Result<CommandOutput> {
        let out = self.toolchain.run(&staged.workspace, &command).await?;
        if !out.success() {
            return Err(DeployError::DeployInvocationFailure {
                action: action.to_string(),
                output: out.combined(),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PortSettings, ReplicaSettings};
    use crate::fakes::{FakePortInspector, FakeToolchain};

    fn free_port() -> u16 {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    }

    fn config() -> DeployConfig {
        DeployConfig {
            replica: ReplicaSettings {
                port: free_port(),
                poll_interval_ms: 5,
                poll_attempts: 3,
                ..ReplicaSettings::default()
            },
            port: PortSettings {
                retries: 1,
                settle_delay_ms: 5,
            },
            ..DeployConfig::default()
        }
    }

    fn orchestrator(toolchain: Arc<FakeToolchain>) -> DeploymentOrchestrator {
        DeploymentOrchestrator::new(config(), toolchain, Arc::new(FakePortInspector::new()), None)
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(DeployPhase::EnsureReplica.to_string(), "ensure_replica");
        assert_eq!(DeployPhase::ResolveId.to_string(), "resolve_id");
    }

    #[tokio::test]
    async fn test_failed_install_is_invocation_failure() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(FakeToolchain::new().failing_install());
        let orch = orchestrator(toolchain.clone());

        let req = DeploymentRequest::new("Echo", "actor {}", dir.path()).unwrap();
        let err = orch.deploy(&req).await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::DeployInvocationFailure { ref action, .. } if action == "install"
        ));
    }

    #[tokio::test]
    async fn test_install_without_issued_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(FakeToolchain::new().install_loses_id());
        let orch = orchestrator(toolchain.clone());

        let req = DeploymentRequest::new("Echo", "actor {}", dir.path()).unwrap();
        let err = orch.deploy(&req).await.unwrap_err();
        assert!(matches!(err, DeployError::DeployInvocationFailure { .. }));
        assert_eq!(toolchain.count("module_id"), 2);
    }

    #[tokio::test]
    async fn test_absent_toolchain_fails_before_replica() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(FakeToolchain::new().unavailable());
        let orch = orchestrator(toolchain.clone());

        let req = DeploymentRequest::new("Echo", "actor {}", dir.path()).unwrap();
        let err = orch.deploy(&req).await.unwrap_err();
        assert!(matches!(err, DeployError::ToolchainAbsent { .. }));
        assert_eq!(toolchain.count("start_replica"), 0);
        assert_eq!(toolchain.calls(), vec![ToolchainCommand::Version]);
    }

    #[tokio::test]
    async fn test_check_does_not_start_replica() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(FakeToolchain::new());
        let orch = orchestrator(toolchain.clone());

        let req = DeploymentRequest::new("Echo", "actor {}", dir.path()).unwrap();
        assert!(orch.check(&req).await.unwrap().passed);
        assert_eq!(toolchain.count("start_replica"), 0);
    }

    #[tokio::test]
    async fn test_recovery_log_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = Arc::new(FakeToolchain::new().with_checker(|ctx| {
            if ctx.source.contains("broken") {
                Err("syntax error".to_string())
            } else {
                Ok(())
            }
        }));
        let orch = orchestrator(toolchain);

        let req = DeploymentRequest::new("Echo", "actor { broken", dir.path()).unwrap();
        let outcome = orch.deploy(&req).await.unwrap();
        let log = outcome.recovery.expect("recovery ran");
        assert!(outcome.degraded);

        let loaded = crate::recovery::read_recovery_artifact(
            &log.run_id,
            &dir.path().join("deploy_workspace/recovery"),
        )
        .unwrap();
        assert_eq!(loaded, log);
    }
}
