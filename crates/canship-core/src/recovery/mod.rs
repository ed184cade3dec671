//! Tiered recovery of an artifact that failed static validation.
//!
//! The route is picked once from the initial diagnostic (see [`tier`]).
//! Every tier starts from the original artifact, writes its candidate into
//! the staged project and re-validates. The first passing tier wins; the
//! minimal fallback tier is accepted unconditionally, so [`RecoveryPipeline::recover`]
//! never reports exhaustion.

pub mod catalog;
pub mod log;
pub mod rewrite;
pub mod tier;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use toolchain_env::ToolchainCommand;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codegen::CodeGenService;
use crate::config::RecoverySettings;
use crate::error::Result;
use crate::materializer::{read_artifact, write_artifact, StagedProject};
use crate::metrics::METRICS;
use crate::obs::{emit_recovery_finished, emit_tier_attempted};
use crate::toolchain::Toolchain;
use crate::validator::{ArtifactValidator, ValidationResult};

pub use log::{read_recovery_artifact, write_recovery_artifact, RecoveryLog, TierAttempt};
pub use tier::{RecoveryRoute, RecoveryTier, SupportLibrarySignatures};

/// Directory holding recovery audit artifacts for a workspace.
pub fn recovery_dir(workspace: &Path) -> PathBuf {
    workspace.join("recovery")
}

/// Staged project holding the accepted artifact, plus the audit log.
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub staged: StagedProject,
    pub log: RecoveryLog,
}

/// What a tier produced before validation.
enum TierVerdict {
    /// The tier could not produce a candidate; nothing was validated.
    Skipped(String),
    Checked(ValidationResult),
}

pub struct RecoveryPipeline {
    validator: ArtifactValidator,
    toolchain: Arc<dyn Toolchain>,
    codegen: Option<Arc<dyn CodeGenService>>,
    signatures: SupportLibrarySignatures,
    settings: RecoverySettings,
}

impl RecoveryPipeline {
    pub fn new(
        toolchain: Arc<dyn Toolchain>,
        codegen: Option<Arc<dyn CodeGenService>>,
        settings: RecoverySettings,
    ) -> Self {
        Self {
            validator: ArtifactValidator::new(toolchain.clone()),
            toolchain,
            codegen,
            signatures: SupportLibrarySignatures::new(&settings.support_library_signatures),
            settings,
        }
    }

    pub fn route(&self, raw_error: &str) -> RecoveryRoute {
        self.signatures.route(raw_error)
    }

    /// Drive the tier sequence for `staged` until a tier is accepted.
    pub async fn recover(&self, staged: &StagedProject, raw_error: &str) -> Result<RecoveryReport> {
        let original = read_artifact(staged)?;
        let route = self.route(raw_error);
        let mut log = RecoveryLog::new(
            Uuid::new_v4().to_string(),
            staged.module_name.clone(),
            route,
            raw_error,
        );
        info!(
            event = "recovery.started",
            run_id = %log.run_id,
            module = %staged.module_name,
            ?route,
        );

        let mut next = route.next_tier(None);
        while let Some(tier) = next {
            METRICS.inc_recovery_tiers();
            let verdict = self.attempt(tier, staged, &original, raw_error).await?;

            let (passed, detail) = match verdict {
                TierVerdict::Skipped(reason) => (false, Some(reason)),
                TierVerdict::Checked(result) => (result.passed, result.raw_error),
            };
            emit_tier_attempted(&log.run_id, tier, passed);
            log.record(tier, passed, detail.clone());

            if passed || tier.is_terminal() {
                if !passed {
                    warn!(
                        run_id = %log.run_id,
                        diagnostic = detail.as_deref().unwrap_or(""),
                        "fallback artifact failed validation; accepting it anyway"
                    );
                }
                if tier.is_terminal() {
                    METRICS.inc_fallbacks();
                    log.degraded = true;
                }
                log.recovered_by = Some(tier);
                break;
            }

            debug!(%tier, "tier failed");
            next = route.next_tier(Some(tier));
        }

        emit_recovery_finished(&log);
        Ok(RecoveryReport {
            staged: staged.clone(),
            log,
        })
    }

    async fn attempt(
        &self,
        tier: RecoveryTier,
        staged: &StagedProject,
        original: &str,
        raw_error: &str,
    ) -> Result<TierVerdict> {
        match tier {
            RecoveryTier::ImportRepair => {
                let Some(repaired) = self.settings.catalog.repair_imports(original) else {
                    return Ok(TierVerdict::Skipped(
                        "no undeclared library namespaces".to_string(),
                    ));
                };
                self.write_and_check(staged, &repaired).await
            }

            RecoveryTier::ToolchainEnvironmentFix => {
                let out = self
                    .toolchain
                    .run(&staged.workspace, &ToolchainCommand::RepairEnvironment)
                    .await?;
                if !out.success() {
                    return Ok(TierVerdict::Skipped(format!(
                        "environment repair failed: {}",
                        out.combined()
                    )));
                }
                self.write_and_check(staged, original).await
            }

            RecoveryTier::ArtifactSimplification => {
                let simplified = self.settings.catalog.simplify(original);
                self.write_and_check(staged, &simplified).await
            }

            RecoveryTier::MinimalFallbackArtifact => {
                self.write_and_check(staged, &self.settings.fallback_artifact)
                    .await
            }

            RecoveryTier::ExternalRewrite => {
                let Some(codegen) = &self.codegen else {
                    return Ok(TierVerdict::Skipped(
                        "no code generation service configured".to_string(),
                    ));
                };
                let prompt = rewrite::build_prompt(&staged.module_name, raw_error, original);
                let response = match codegen.generate(&prompt).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "code generation failed");
                        return Ok(TierVerdict::Skipped(e.to_string()));
                    }
                };
                let Some(candidate) = rewrite::parse_rewrite(&response) else {
                    return Ok(TierVerdict::Skipped(
                        "rewrite response did not contain an artifact".to_string(),
                    ));
                };
                self.write_and_check(staged, &candidate).await
            }
        }
    }

    async fn write_and_check(&self, staged: &StagedProject, source: &str) -> Result<TierVerdict> {
        write_artifact(staged, source)?;
        Ok(TierVerdict::Checked(self.validator.check(staged).await?))
    }
}
