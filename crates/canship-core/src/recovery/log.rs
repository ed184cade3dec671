//! Auditable recovery log with digest-verified persistence.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::sha256_hex;
use crate::error::{DeployError, Result};
use crate::recovery::tier::{RecoveryRoute, RecoveryTier};

/// Outcome of one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierAttempt {
    pub tier: RecoveryTier,
    pub passed: bool,
    /// Validator diagnostic on failure, or why the tier was skipped.
    pub detail: Option<String>,
}

/// Full recovery timeline for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryLog {
    pub run_id: String,
    pub module_name: String,
    pub route: RecoveryRoute,
    pub initial_error: String,
    pub attempts: Vec<TierAttempt>,
    /// Tier whose artifact was accepted.
    pub recovered_by: Option<RecoveryTier>,
    /// The fallback artifact was accepted.
    pub degraded: bool,
    pub evaluated_at: DateTime<Utc>,
}

impl RecoveryLog {
    pub fn new(
        run_id: impl Into<String>,
        module_name: impl Into<String>,
        route: RecoveryRoute,
        initial_error: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            module_name: module_name.into(),
            route,
            initial_error: initial_error.into(),
            attempts: Vec::new(),
            recovered_by: None,
            degraded: false,
            evaluated_at: Utc::now(),
        }
    }

    pub fn record(&mut self, tier: RecoveryTier, passed: bool, detail: Option<String>) {
        self.attempts.push(TierAttempt {
            tier,
            passed,
            detail,
        });
    }

    pub fn tiers_attempted(&self) -> Vec<RecoveryTier> {
        self.attempts.iter().map(|a| a.tier).collect()
    }
}

/// Write `<dir>/<run_id>/recovery.json` plus a SHA-256 digest file.
pub fn write_recovery_artifact(log: &RecoveryLog, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(&log.run_id);
    std::fs::create_dir_all(&run_dir)?;

    let artifact_path = run_dir.join("recovery.json");
    let digest_path = run_dir.join("recovery.digest");
    let json = serde_json::to_vec_pretty(log)?;

    std::fs::write(&artifact_path, &json)?;
    std::fs::write(&digest_path, sha256_hex(&json).as_bytes())?;

    Ok(artifact_path)
}

/// Read `<dir>/<run_id>/recovery.json`, verifying its digest.
pub fn read_recovery_artifact(run_id: &str, dir: &Path) -> Result<RecoveryLog> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join("recovery.json"))?;
    let expected = std::fs::read_to_string(run_dir.join("recovery.digest"))?;
    let actual = sha256_hex(&json);
    if expected.trim() != actual {
        return Err(DeployError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}
