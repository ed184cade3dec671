use std::path::Path;
use std::sync::Arc;

use canship_core::fakes::{FakeCodeGen, FakePortInspector, FakeToolchain};
use canship_core::{
    read_artifact, CodeGenService, DeployAction, DeployConfig, DeployError,
    DeploymentOrchestrator, DeploymentRequest, LibraryCatalog, PortInspector, PortSettings,
    ProjectMaterializer, RecoveryTier, ReplicaSettings, ReplicaState, ToolchainProfile,
};
use tempfile::tempdir;

const CLEAN: &str = "actor {\n  public func echo(t : Text) : async Text { t };\n};\n";

fn free_port() -> u16 {
    let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}

fn config(port: u16) -> DeployConfig {
    DeployConfig {
        replica: ReplicaSettings {
            port,
            poll_interval_ms: 5,
            poll_attempts: 4,
            ..ReplicaSettings::default()
        },
        port: PortSettings {
            retries: 1,
            settle_delay_ms: 20,
        },
        ..DeployConfig::default()
    }
}

fn orchestrator(
    toolchain: Arc<FakeToolchain>,
    inspector: Arc<dyn PortInspector>,
    codegen: Option<Arc<FakeCodeGen>>,
    port: u16,
) -> DeploymentOrchestrator {
    DeploymentOrchestrator::new(
        config(port),
        toolchain,
        inspector,
        codegen.map(|c| c as Arc<dyn CodeGenService>),
    )
}

/// Checker that rejects `Ns.member` uses lacking a declaration.
fn strict_imports() -> FakeToolchain {
    FakeToolchain::new().with_checker(|ctx| {
        match LibraryCatalog::default().missing_declarations(ctx.source).first() {
            Some(ns) => Err(format!("type error [M0057], unbound variable {ns}")),
            None => Ok(()),
        }
    })
}

fn staged_source(root: &Path) -> String {
    let staged = ProjectMaterializer::new(ToolchainProfile::default(), "127.0.0.1", 0)
        .layout(root, "Echo");
    read_artifact(&staged).unwrap()
}

#[tokio::test]
async fn scenario_a_fresh_root_installs_clean_artifact() {
    let dir = tempdir().unwrap();
    let toolchain = Arc::new(FakeToolchain::new());
    let orch = orchestrator(
        toolchain.clone(),
        Arc::new(FakePortInspector::new()),
        None,
        free_port(),
    );

    let req = DeploymentRequest::new("Echo", CLEAN, dir.path()).unwrap();
    let outcome = orch.deploy(&req).await.unwrap();

    assert_eq!(outcome.action, DeployAction::Install);
    assert!(!outcome.module_id.is_empty());
    assert!(outcome.recovery.is_none());
    assert!(!outcome.degraded);
    assert_eq!(toolchain.count("install"), 1);
    assert_eq!(toolchain.count("repair_environment"), 0);
    assert_eq!(toolchain.count("check"), 1);
    assert_eq!(staged_source(dir.path()), CLEAN);
}

#[tokio::test]
async fn scenario_b_redeploy_upgrades_same_id() {
    let dir = tempdir().unwrap();
    let toolchain = Arc::new(FakeToolchain::new());
    let orch = orchestrator(
        toolchain.clone(),
        Arc::new(FakePortInspector::new()),
        None,
        free_port(),
    );

    let req = DeploymentRequest::new("Echo", CLEAN, dir.path()).unwrap();
    let first = orch.deploy(&req).await.unwrap();
    let second = orch.deploy(&req).await.unwrap();

    assert_eq!(first.action, DeployAction::Install);
    assert_eq!(second.action, DeployAction::Upgrade);
    assert_eq!(second.module_id, first.module_id);
    assert_eq!(toolchain.count("install"), 1);
    assert_eq!(toolchain.count("upgrade"), 1);
    // Running replica reused on the second deploy.
    assert_eq!(toolchain.count("start_replica"), 1);
}

#[tokio::test]
async fn scenario_c_import_repair_alone_fixes_undeclared_namespace() {
    let dir = tempdir().unwrap();
    let toolchain = Arc::new(strict_imports());
    let codegen = Arc::new(FakeCodeGen::new().respond(r#"{"code": "actor {};"}"#));
    let orch = orchestrator(
        toolchain.clone(),
        Arc::new(FakePortInspector::new()),
        Some(codegen.clone()),
        free_port(),
    );

    let source = "actor {\n  public func show(n : Nat) : async Text { Nat.toText(n) };\n};\n";
    let req = DeploymentRequest::new("Echo", source, dir.path()).unwrap();
    let outcome = orch.deploy(&req).await.unwrap();

    let log = outcome.recovery.expect("recovery ran");
    assert_eq!(log.tiers_attempted(), vec![RecoveryTier::ImportRepair]);
    assert_eq!(log.recovered_by, Some(RecoveryTier::ImportRepair));
    assert!(!outcome.degraded);
    assert!(codegen.prompts().is_empty());
    assert_eq!(outcome.action, DeployAction::Install);

    let deployed = staged_source(dir.path());
    assert!(deployed.starts_with("import Nat \"mo:base/Nat\";\n"));
    assert!(deployed.ends_with(source));
}

#[tokio::test]
async fn scenario_d_malformed_rewrite_falls_back() {
    let dir = tempdir().unwrap();
    let toolchain = Arc::new(FakeToolchain::new().with_checker(|ctx| {
        if ctx.source.contains("process(input") {
            Ok(())
        } else {
            Err("main.mo:1.9: syntax error [M0001], unexpected token".to_string())
        }
    }));
    let codegen = Arc::new(FakeCodeGen::new().respond("Sorry, I am not sure what went wrong."));
    let orch = orchestrator(
        toolchain.clone(),
        Arc::new(FakePortInspector::new()),
        Some(codegen.clone()),
        free_port(),
    );

    let req = DeploymentRequest::new("Echo", "actor { oops", dir.path()).unwrap();
    let outcome = orch.deploy(&req).await.unwrap();

    assert!(outcome.degraded);
    let log = outcome.recovery.expect("recovery ran");
    assert_eq!(
        log.tiers_attempted(),
        vec![
            RecoveryTier::ImportRepair,
            RecoveryTier::ExternalRewrite,
            RecoveryTier::MinimalFallbackArtifact
        ]
    );
    assert_eq!(codegen.prompts().len(), 1);
    assert_eq!(toolchain.count("install"), 1);
    assert_eq!(
        staged_source(dir.path()),
        canship_core::RecoverySettings::default().fallback_artifact
    );
}

#[tokio::test]
async fn scenario_e_foreign_listener_is_reclaimed() {
    let dir = tempdir().unwrap();
    let squatter = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = squatter.local_addr().unwrap().port();
    let inspector = Arc::new(FakePortInspector::holding(squatter, 31337));
    let toolchain = Arc::new(FakeToolchain::new().with_ping_failures(2));
    let orch = orchestrator(toolchain.clone(), inspector.clone(), None, port);

    let req = DeploymentRequest::new("Echo", CLEAN, dir.path()).unwrap();
    let outcome = orch.deploy(&req).await.unwrap();

    assert_eq!(inspector.terminated(), vec![31337]);
    assert_eq!(outcome.action, DeployAction::Install);
    let endpoint = orch.replica().status(dir.path()).await.unwrap();
    assert_eq!(endpoint.state, ReplicaState::Running);
    assert_eq!(endpoint.port, port);
}

#[tokio::test]
async fn port_held_by_unknown_owner_fails_deploy() {
    let dir = tempdir().unwrap();
    let squatter = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = squatter.local_addr().unwrap().port();
    let toolchain = Arc::new(FakeToolchain::new());
    let orch = orchestrator(
        toolchain.clone(),
        Arc::new(FakePortInspector::new()),
        None,
        port,
    );

    let req = DeploymentRequest::new("Echo", CLEAN, dir.path()).unwrap();
    let err = orch.deploy(&req).await.unwrap_err();
    assert!(matches!(err, DeployError::PortBusy { port: p, .. } if p == port));
    assert_eq!(toolchain.count("install"), 0);
    drop(squatter);
}

#[tokio::test]
async fn roots_sharing_the_replica_port_do_not_interrupt_each_other() {
    let a = tempdir().unwrap();
    let b = tempdir().unwrap();
    // Replicas hold the port for real; the toolchain also answers owner lookups.
    let toolchain = Arc::new(FakeToolchain::new().binding_ports().with_ping_failures(3));
    let orch = orchestrator(toolchain.clone(), toolchain.clone(), None, free_port());

    let req_a = DeploymentRequest::new("Echo", CLEAN, a.path()).unwrap();
    let req_b = DeploymentRequest::new("Echo", CLEAN, b.path()).unwrap();
    let (out_a, out_b) = tokio::join!(orch.deploy(&req_a), async {
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        orch.deploy(&req_b).await
    });

    let (out_a, out_b) = (out_a.unwrap(), out_b.unwrap());
    assert_eq!(out_a.action, DeployAction::Install);
    assert_eq!(out_b.action, DeployAction::Install);
    assert_ne!(out_a.module_id, out_b.module_id);
    // The second root's clean start reclaimed the port from the first.
    assert_eq!(toolchain.count("start_replica"), 2);
    assert_eq!(
        orch.replica().status(a.path()).await.unwrap().state,
        ReplicaState::Unreachable
    );
    assert_eq!(
        orch.replica().status(b.path()).await.unwrap().state,
        ReplicaState::Running
    );
}

#[tokio::test]
async fn concurrent_deploys_on_one_root_are_serialized() {
    let dir = tempdir().unwrap();
    let toolchain = Arc::new(FakeToolchain::new());
    let orch = Arc::new(orchestrator(
        toolchain.clone(),
        Arc::new(FakePortInspector::new()),
        None,
        free_port(),
    ));
    let req = DeploymentRequest::new("Echo", CLEAN, dir.path()).unwrap();

    let first = tokio::spawn({
        let orch = orch.clone();
        let req = req.clone();
        async move { orch.deploy(&req).await }
    });
    let second = tokio::spawn({
        let orch = orch.clone();
        let req = req.clone();
        async move { orch.deploy(&req).await }
    });

    let mut actions = vec![
        first.await.unwrap().unwrap().action,
        second.await.unwrap().unwrap().action,
    ];
    actions.sort_by_key(|a| a.to_string());
    assert_eq!(actions, vec![DeployAction::Install, DeployAction::Upgrade]);
    assert_eq!(toolchain.count("install"), 1);
}
