//! Recovery tiers and the route state machine.
//!
//! The route is chosen once from the initial diagnostic:
//!
//! ```text
//! SupportLibrary: ImportRepair -> ToolchainEnvironmentFix -> ArtifactSimplification -> MinimalFallbackArtifact
//! General:        ImportRepair -> ExternalRewrite -> MinimalFallbackArtifact
//! ```
//!
//! Every route ends in `MinimalFallbackArtifact`, which has no successor.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTier {
    ImportRepair,
    ToolchainEnvironmentFix,
    ArtifactSimplification,
    MinimalFallbackArtifact,
    ExternalRewrite,
}

impl RecoveryTier {
    pub fn name(&self) -> &'static str {
        match self {
            RecoveryTier::ImportRepair => "import_repair",
            RecoveryTier::ToolchainEnvironmentFix => "toolchain_environment_fix",
            RecoveryTier::ArtifactSimplification => "artifact_simplification",
            RecoveryTier::MinimalFallbackArtifact => "minimal_fallback_artifact",
            RecoveryTier::ExternalRewrite => "external_rewrite",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryTier::MinimalFallbackArtifact)
    }
}

impl std::fmt::Display for RecoveryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which branch of the tier sequence a diagnostic selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryRoute {
    SupportLibrary,
    General,
}

impl RecoveryRoute {
    /// Tier following `after` (`None` = start of the pipeline).
    pub fn next_tier(&self, after: Option<RecoveryTier>) -> Option<RecoveryTier> {
        use RecoveryTier::*;
        match (self, after) {
            (_, None) => Some(ImportRepair),
            (RecoveryRoute::SupportLibrary, Some(ImportRepair)) => Some(ToolchainEnvironmentFix),
            (RecoveryRoute::SupportLibrary, Some(ToolchainEnvironmentFix)) => {
                Some(ArtifactSimplification)
            }
            (RecoveryRoute::SupportLibrary, Some(ArtifactSimplification)) => {
                Some(MinimalFallbackArtifact)
            }
            (RecoveryRoute::General, Some(ImportRepair)) => Some(ExternalRewrite),
            (RecoveryRoute::General, Some(ExternalRewrite)) => Some(MinimalFallbackArtifact),
            (_, Some(MinimalFallbackArtifact)) => None,
            // Tiers that are not on this route have no successor on it.
            (RecoveryRoute::SupportLibrary, Some(ExternalRewrite))
            | (RecoveryRoute::General, Some(ToolchainEnvironmentFix))
            | (RecoveryRoute::General, Some(ArtifactSimplification)) => {
                Some(MinimalFallbackArtifact)
            }
        }
    }

    /// Full tier sequence of this route.
    pub fn plan(&self) -> Vec<RecoveryTier> {
        std::iter::successors(self.next_tier(None), |tier| self.next_tier(Some(*tier))).collect()
    }
}

/// Compiled "missing support library" signatures.
#[derive(Debug, Clone)]
pub struct SupportLibrarySignatures {
    patterns: Vec<Regex>,
}

impl SupportLibrarySignatures {
    /// Compile `patterns` case-insensitively; invalid ones are skipped with
    /// a warning.
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match RegexBuilder::new(p).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "ignoring invalid support library signature");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn matches(&self, diagnostic: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(diagnostic))
    }

    pub fn route(&self, diagnostic: &str) -> RecoveryRoute {
        if self.matches(diagnostic) {
            RecoveryRoute::SupportLibrary
        } else {
            RecoveryRoute::General
        }
    }
}
