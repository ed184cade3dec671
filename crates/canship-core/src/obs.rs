//! Structured observability hooks for deployment lifecycle events.
//!
//! This module provides:
//! - Deployment-scoped tracing spans via [`deploy_span`]
//! - Emission functions for phase transitions, port reclamation, recovery
//!   tiers and the final verdict
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).
//! For JSON output, pass `--json` to the CLI.

use std::path::Path;

use tracing::info;

use crate::recovery::{RecoveryLog, RecoveryTier};

/// Span tagging every event of one deployment with its module and root.
///
/// Attach it with `tracing::Instrument` rather than entering it, since the
/// deployment future crosses await points.
///
/// # Example
///
/// ```ignore
/// orchestrator.run(request).instrument(deploy_span("Echo", root)).await
/// ```
pub fn deploy_span(module: &str, project_root: &Path) -> tracing::Span {
    tracing::info_span!(
        "canship.deploy",
        module = %module,
        root = %project_root.display()
    )
}

/// Emit event: orchestrator entered `phase`.
pub fn emit_phase(module: &str, phase: &dyn std::fmt::Display) {
    info!(event = "deploy.phase", module = %module, phase = %phase);
}

/// Emit event: deployment finished with the issued id.
pub fn emit_deploy_finished(module: &str, module_id: &str, action: &str, degraded: bool, duration_ms: u64) {
    info!(
        event = "deploy.finished",
        module = %module,
        module_id = %module_id,
        action = %action,
        degraded = degraded,
        duration_ms = duration_ms,
    );
}

/// Emit event: deployment failed (warning level).
pub fn emit_deploy_failed(module: &str, kind: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "deploy.failed", module = %module, kind = %kind, error = %error);
}

/// Emit event: a process holding the replica port was terminated.
pub fn emit_port_reclaimed(port: u16, pid: u32) {
    info!(event = "port.reclaimed", port = port, pid = pid);
}

pub fn emit_tier_attempted(run_id: &str, tier: RecoveryTier, passed: bool) {
    info!(
        event = "recovery.tier",
        run_id = %run_id,
        tier = %tier,
        passed = passed,
    );
}

pub fn emit_recovery_finished(log: &RecoveryLog) {
    info!(
        event = "recovery.finished",
        run_id = %log.run_id,
        module = %log.module_name,
        attempts = log.attempts.len(),
        recovered_by = log.recovered_by.map(|t| t.name()).unwrap_or("none"),
        degraded = log.degraded,
    );
}
