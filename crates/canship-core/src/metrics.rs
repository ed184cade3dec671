//! Global atomic counters for deployment observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a deployment).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    deployments: AtomicU64,
    installs: AtomicU64,
    upgrades: AtomicU64,
    recovery_tiers: AtomicU64,
    fallbacks: AtomicU64,
    replica_starts: AtomicU64,
    ports_reclaimed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            deployments: AtomicU64::new(0),
            installs: AtomicU64::new(0),
            upgrades: AtomicU64::new(0),
            recovery_tiers: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            replica_starts: AtomicU64::new(0),
            ports_reclaimed: AtomicU64::new(0),
        }
    }

    fn bump(counter: &AtomicU64, name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = name, "counter incremented");
    }

    pub fn inc_deployments(&self) {
        Self::bump(&self.deployments, "deployments");
    }

    pub fn inc_installs(&self) {
        Self::bump(&self.installs, "installs");
    }

    pub fn inc_upgrades(&self) {
        Self::bump(&self.upgrades, "upgrades");
    }

    /// One recovery tier attempted.
    pub fn inc_recovery_tiers(&self) {
        Self::bump(&self.recovery_tiers, "recovery_tiers");
    }

    /// Minimal fallback artifact accepted.
    pub fn inc_fallbacks(&self) {
        Self::bump(&self.fallbacks, "fallbacks");
    }

    pub fn inc_replica_starts(&self) {
        Self::bump(&self.replica_starts, "replica_starts");
    }

    pub fn inc_ports_reclaimed(&self) {
        Self::bump(&self.ports_reclaimed, "ports_reclaimed");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            deployments = self.deployments(),
            installs = self.installs(),
            upgrades = self.upgrades(),
            recovery_tiers = self.recovery_tiers(),
            fallbacks = self.fallbacks(),
            replica_starts = self.replica_starts(),
            ports_reclaimed = self.ports_reclaimed(),
        );
    }

    pub fn deployments(&self) -> u64 {
        self.deployments.load(Ordering::Relaxed)
    }

    pub fn installs(&self) -> u64 {
        self.installs.load(Ordering::Relaxed)
    }

    pub fn upgrades(&self) -> u64 {
        self.upgrades.load(Ordering::Relaxed)
    }

    pub fn recovery_tiers(&self) -> u64 {
        self.recovery_tiers.load(Ordering::Relaxed)
    }

    pub fn fallbacks(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn replica_starts(&self) -> u64 {
        self.replica_starts.load(Ordering::Relaxed)
    }

    pub fn ports_reclaimed(&self) -> u64 {
        self.ports_reclaimed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.deployments,
            &self.installs,
            &self.upgrades,
            &self.recovery_tiers,
            &self.fallbacks,
            &self.replica_starts,
            &self.ports_reclaimed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
