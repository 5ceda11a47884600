//! # Scheduler Configuration
//!
//! All numeric tuning lives here as data: worst-case execution latencies,
//! warp budgets, quanta, starvation ageout factors and the interactivity
//! decay parameters. The magnitudes are hardware-generation policy, so the
//! defaults below are plausible rather than authoritative; integrators are
//! expected to override them from platform tables at boot.

use crate::tier::{Tier, TIER_COUNT};

/// Number of scheduling priority levels (0 = lowest, 127 = highest).
pub const NUM_PRI: usize = 128;

/// Highest priority value.
pub const MAX_PRI: u8 = (NUM_PRI - 1) as u8;

/// Per-tier deadline/quantum parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierParams {
    /// Worst-case execution latency: a newly-runnable root bucket must be
    /// scheduled within this window; its EDF deadline is `now + wcel_ns`.
    pub wcel_ns: u64,
    /// Warp budget: total time the tier may preempt earlier-deadline lower
    /// tiers during one runnable period.
    pub warp_ns: u64,
    /// Quantum handed to threads of this tier, also the length of a
    /// starvation-avoidance window.
    pub quantum_ns: u64,
    /// Number of quanta a bucket group may stay pending (runnable but never
    /// run) before its CPU usage is aged out, scaled by tier load.
    pub ageout_quanta: u32,
}

/// Complete scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedConfig {
    /// Per-tier parameters, indexed by [`Tier::index`].
    pub tiers: [TierParams; TIER_COUNT],
    /// Upper bound of the interactivity score range; scores are in
    /// `0..=interactivity_max`.
    pub interactivity_max: u8,
    /// Once a group's `cpu_used + cpu_blocked` crosses this many
    /// nanoseconds, both counters are halved so the score tracks recent
    /// behavior only.
    pub decay_threshold_ns: u64,
    /// Threads at or above this priority count towards cluster urgency.
    pub urgency_pri: u8,
}

impl SchedConfig {
    /// Parameters for one tier.
    pub fn tier(&self, tier: Tier) -> &TierParams {
        &self.tiers[tier.index()]
    }

    /// Starvation ageout threshold for a tier under the given load
    /// (runnable threads in the tier across the cluster).
    pub fn ageout_threshold_ns(&self, tier: Tier, load: u32) -> u64 {
        let p = self.tier(tier);
        (p.ageout_quanta as u64) * p.quantum_ns * (1 + load as u64)
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        const MS: u64 = 1_000_000;
        Self {
            tiers: [
                // AboveUi: tight latency, generous warp, never aged out in
                // practice (fixed priority).
                TierParams { wcel_ns: 2 * MS, warp_ns: 4 * MS, quantum_ns: 4 * MS, ageout_quanta: 4 },
                // Foreground
                TierParams { wcel_ns: 10 * MS, warp_ns: 2 * MS, quantum_ns: 6 * MS, ageout_quanta: 8 },
                // Interactive
                TierParams { wcel_ns: 15 * MS, warp_ns: 1 * MS, quantum_ns: 8 * MS, ageout_quanta: 16 },
                // Default
                TierParams { wcel_ns: 20 * MS, warp_ns: 0, quantum_ns: 10 * MS, ageout_quanta: 32 },
                // Utility
                TierParams { wcel_ns: 40 * MS, warp_ns: 0, quantum_ns: 10 * MS, ageout_quanta: 64 },
                // Background
                TierParams { wcel_ns: 80 * MS, warp_ns: 0, quantum_ns: 10 * MS, ageout_quanta: 128 },
            ],
            interactivity_max: 8,
            decay_threshold_ns: 200 * MS,
            urgency_pri: 47,
        }
    }
}
