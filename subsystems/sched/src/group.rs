//! # Clutch Bucket Groups
//!
//! Per-(thread-group, tier) aggregate shared by every cluster's clutch
//! bucket for that group. This is the only scheduler state touched from
//! under multiple cluster locks concurrently, so each logical pair of
//! fields is packed into one atomic word and updated with compare-and-swap
//! retry loops: count and timestamp always change together as a unit.
//!
//! The group carries the interactivity accounting: how much CPU its threads
//! have used versus voluntarily blocked. Blocked-dominant groups score near
//! the top of the boost range, CPU-dominant groups near zero, and the raw
//! counters are halved whenever their sum crosses the decay threshold so
//! only recent behavior counts. A group that stays pending (runnable but
//! never run) past its tier's ageout threshold has its usage aged down one
//! halving per whole pending interval, which bounds worst-case latency
//! under contention.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use clutch_topology::ClusterId;

use crate::config::SchedConfig;
use crate::thread::GroupId;
use crate::tier::Tier;

// =============================================================================
// Packed-Word Layouts
// =============================================================================

// cpu stats word: used in the high half, blocked in the low half.
const USED_SHIFT: u32 = 32;
const HALF_MASK: u64 = u32::MAX as u64;

// interactivity word: score:8 | timestamp:56.
const SCORE_SHIFT: u32 = 56;
const ITS_MASK: u64 = (1 << SCORE_SHIFT) - 1;

// pending word: count:16 | timestamp:48.
const PENDING_SHIFT: u32 = 48;
const PTS_MASK: u64 = (1 << PENDING_SHIFT) - 1;
const PENDING_MAX: u64 = (1 << 16) - 1;

static_assertions::const_assert_eq!(USED_SHIFT + 32, 64);
static_assertions::const_assert_eq!(SCORE_SHIFT + 8, 64);
static_assertions::const_assert_eq!(PENDING_SHIFT + 16, 64);

const fn pack_stats(used: u32, blocked: u32) -> u64 {
    ((used as u64) << USED_SHIFT) | blocked as u64
}

const fn unpack_stats(word: u64) -> (u32, u32) {
    ((word >> USED_SHIFT) as u32, (word & HALF_MASK) as u32)
}

const fn pack_pending(count: u16, ts: u64) -> u64 {
    ((count as u64) << PENDING_SHIFT) | (ts & PTS_MASK)
}

const fn unpack_pending(word: u64) -> (u16, u64) {
    ((word >> PENDING_SHIFT) as u16, word & PTS_MASK)
}

/// Sentinel in the preferred-cluster atomic for "no preference".
const NO_PREFERENCE: u32 = u32::MAX;

// =============================================================================
// Bucket Group
// =============================================================================

/// Cross-cluster aggregate for one (thread-group, tier) pair.
#[derive(Debug)]
pub struct BucketGroup {
    group: GroupId,
    tier: Tier,
    /// Packed (cpu_used:32 | cpu_blocked:32), nanoseconds.
    cpu_stats: AtomicU64,
    /// Packed (score:8 | last_update_ts:56).
    interactivity: AtomicU64,
    /// Packed (pending_count:16 | became_pending_ts:48).
    pending: AtomicU64,
    /// Preferred cluster id, `NO_PREFERENCE` when unset.
    preferred: AtomicU32,
    /// Threads of this (group, tier) currently on-core, across clusters.
    run_count: AtomicU32,
}

impl BucketGroup {
    pub(crate) fn new(group: GroupId, tier: Tier) -> Self {
        Self {
            group,
            tier,
            cpu_stats: AtomicU64::new(0),
            interactivity: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            preferred: AtomicU32::new(NO_PREFERENCE),
            run_count: AtomicU32::new(0),
        }
    }

    /// Owning thread group.
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Tier this aggregate covers.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    // -------------------------------------------------------------------------
    // CPU usage accounting
    // -------------------------------------------------------------------------

    /// Charge `delta_ns` of CPU time used, rescaling if the history grew
    /// past the decay threshold. One CAS updates both halves together.
    pub fn record_used(&self, delta_ns: u64, config: &SchedConfig) {
        self.update_stats(config, |used, blocked| {
            (used.saturating_add(delta_ns.min(HALF_MASK) as u32), blocked)
        });
    }

    /// Charge `delta_ns` of voluntarily-blocked time.
    pub fn record_blocked(&self, delta_ns: u64, config: &SchedConfig) {
        self.update_stats(config, |used, blocked| {
            (used, blocked.saturating_add(delta_ns.min(HALF_MASK) as u32))
        });
    }

    /// Current (cpu_used, cpu_blocked) snapshot.
    pub fn cpu_stats(&self) -> (u32, u32) {
        unpack_stats(self.cpu_stats.load(Ordering::Acquire))
    }

    fn update_stats(&self, config: &SchedConfig, f: impl Fn(u32, u32) -> (u32, u32)) {
        let threshold = config.decay_threshold_ns.min(HALF_MASK * 2);
        self.cpu_stats
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (used, blocked) = unpack_stats(word);
                let (mut used, mut blocked) = f(used, blocked);
                // Rescale so the score stays responsive to recent behavior.
                while used as u64 + blocked as u64 > threshold {
                    used >>= 1;
                    blocked >>= 1;
                }
                Some(pack_stats(used, blocked))
            })
            .ok();
    }

    // -------------------------------------------------------------------------
    // Pending (starvation) accounting
    // -------------------------------------------------------------------------

    /// Note one more outstanding (runnable, not yet run) thread. The
    /// became-pending timestamp is set exactly on the 0→1 transition.
    pub fn pending_inc(&self, now: u64) {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (count, ts) = unpack_pending(word);
                assert!((count as u64) < PENDING_MAX, "pending count overflow");
                let ts = if count == 0 { now } else { ts };
                Some(pack_pending(count + 1, ts))
            })
            .ok();
    }

    /// Note one fewer outstanding thread.
    pub fn pending_dec(&self) {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (count, ts) = unpack_pending(word);
                assert!(count > 0, "pending count underflow");
                let count = count - 1;
                Some(pack_pending(count, if count == 0 { 0 } else { ts }))
            })
            .ok();
    }

    /// (pending_count, became_pending_ts) snapshot.
    pub fn pending_snapshot(&self) -> (u16, u64) {
        unpack_pending(self.pending.load(Ordering::Acquire))
    }

    /// Age out CPU usage if the group has been pending longer than
    /// `threshold_ns`: one halving per whole elapsed interval. Advances the
    /// pending timestamp past the consumed intervals so ageout is not
    /// applied twice for the same wait.
    pub fn apply_ageout(&self, now: u64, threshold_ns: u64) {
        if threshold_ns == 0 {
            return;
        }
        let mut intervals = 0u64;
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (count, ts) = unpack_pending(word);
                intervals = 0;
                if count == 0 || now <= ts {
                    return None;
                }
                intervals = (now - ts) / threshold_ns;
                if intervals == 0 {
                    return None;
                }
                Some(pack_pending(count, ts + intervals * threshold_ns))
            })
            .ok();
        if intervals == 0 {
            return;
        }
        let shift = intervals.min(32) as u32;
        self.cpu_stats
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (used, blocked) = unpack_stats(word);
                Some(pack_stats(used >> shift, blocked))
            })
            .ok();
        log::trace!(
            "{}/{}: aged out {} pending interval(s)",
            self.group,
            self.tier,
            intervals
        );
    }

    // -------------------------------------------------------------------------
    // Interactivity score
    // -------------------------------------------------------------------------

    /// Current interactivity score in `0..=config.interactivity_max`.
    ///
    /// The cached (score, timestamp) pair is refreshed at most once per
    /// distinct `now`; concurrent refreshers race benignly, the CAS keeps
    /// the pair consistent.
    pub fn score(&self, now: u64, config: &SchedConfig) -> u8 {
        let word = self.interactivity.load(Ordering::Acquire);
        let cached_ts = word & ITS_MASK;
        if cached_ts == (now & ITS_MASK) && cached_ts != 0 {
            return (word >> SCORE_SHIFT) as u8;
        }
        let (used, blocked) = self.cpu_stats();
        let score = score_from(used, blocked, config.interactivity_max);
        let packed = ((score as u64) << SCORE_SHIFT) | (now & ITS_MASK);
        // CAS from the observed word: a lost race means a concurrent
        // refresher already stored a pair computed from a valid snapshot.
        self.interactivity
            .compare_exchange(word, packed, Ordering::AcqRel, Ordering::Acquire)
            .ok();
        score
    }

    // -------------------------------------------------------------------------
    // Preference and run count
    // -------------------------------------------------------------------------

    /// Preferred cluster for this (group, tier), if assigned.
    pub fn preferred(&self) -> Option<ClusterId> {
        match self.preferred.load(Ordering::Acquire) {
            NO_PREFERENCE => None,
            raw => Some(ClusterId::new(raw as u8)),
        }
    }

    /// Assign (or clear) the preferred cluster.
    pub fn set_preferred(&self, cluster: Option<ClusterId>) {
        let raw = cluster.map_or(NO_PREFERENCE, |c| c.index() as u32);
        self.preferred.store(raw, Ordering::Release);
    }

    /// Note a thread of this (group, tier) going on-core.
    pub fn run_inc(&self) {
        self.run_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Note a thread of this (group, tier) leaving core.
    pub fn run_dec(&self) {
        let prev = self.run_count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "group run count underflow");
    }

    /// Threads of this (group, tier) currently on-core.
    pub fn run_count(&self) -> u32 {
        self.run_count.load(Ordering::Acquire)
    }
}

/// Map a (used, blocked) history onto the boost range: blocked-dominant
/// near `max`, CPU-dominant near 0, balanced at the midpoint.
fn score_from(used: u32, blocked: u32, max: u8) -> u8 {
    let half = (max / 2) as u64;
    if used == blocked {
        return half as u8;
    }
    if blocked > used {
        let boost = (blocked - used) as u64 * half / blocked as u64;
        (half + boost).min(max as u64) as u8
    } else {
        let penalty = (used - blocked) as u64 * half / used as u64;
        (half - penalty.min(half)) as u8
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> BucketGroup {
        BucketGroup::new(GroupId(7), Tier::Default)
    }

    #[test]
    fn test_score_range_and_direction() {
        let cfg = SchedConfig::default();
        let max = cfg.interactivity_max;
        // Fresh group sits at the midpoint.
        assert_eq!(score_from(0, 0, max), max / 2);
        // Blocked-dominant scores near the top, CPU-dominant near zero.
        assert_eq!(score_from(1, 1_000_000, max), max);
        assert_eq!(score_from(1_000_000, 1, max), 0);
        for (u, b) in [(10, 90), (90, 10), (50, 50), (0, 5), (5, 0)] {
            let s = score_from(u, b, max);
            assert!(s <= max);
        }
    }

    #[test]
    fn test_cpu_stats_rescale() {
        let cfg = SchedConfig::default();
        let g = group();
        let big = cfg.decay_threshold_ns;
        g.record_used(big, &cfg);
        g.record_blocked(big, &cfg);
        let (used, blocked) = g.cpu_stats();
        // Sum was pulled back under the threshold.
        assert!(used as u64 + blocked as u64 <= cfg.decay_threshold_ns);
        assert!(used > 0 && blocked > 0);
    }

    #[test]
    fn test_pending_timestamp_set_on_first_only() {
        let g = group();
        g.pending_inc(100);
        g.pending_inc(200);
        assert_eq!(g.pending_snapshot(), (2, 100));
        g.pending_dec();
        assert_eq!(g.pending_snapshot(), (1, 100));
        g.pending_dec();
        assert_eq!(g.pending_snapshot(), (0, 0));
        // Next 0→1 stamps anew.
        g.pending_inc(500);
        assert_eq!(g.pending_snapshot(), (1, 500));
    }

    #[test]
    #[should_panic(expected = "pending count underflow")]
    fn test_pending_underflow_is_fatal() {
        group().pending_dec();
    }

    #[test]
    fn test_ageout_raises_score() {
        let cfg = SchedConfig::default();
        let g = group();
        g.record_used(1_000_000, &cfg);
        let before = g.score(1, &cfg);
        g.pending_inc(1000);
        // Pending for three whole intervals of 100ns.
        g.apply_ageout(1320, 100);
        let (used, _) = g.cpu_stats();
        assert_eq!(used, 1_000_000 >> 3);
        let after = g.score(2000, &cfg);
        assert!(after >= before);
        // Timestamp advanced: immediate re-application is a no-op.
        g.apply_ageout(1320, 100);
        assert_eq!(g.cpu_stats().0, 1_000_000 >> 3);
    }

    #[test]
    fn test_preferred_cluster_round_trip() {
        let g = group();
        assert_eq!(g.preferred(), None);
        g.set_preferred(Some(ClusterId::new(2)));
        assert_eq!(g.preferred(), Some(ClusterId::new(2)));
        g.set_preferred(None);
        assert_eq!(g.preferred(), None);
    }

    #[test]
    fn test_run_count() {
        let g = group();
        g.run_inc();
        g.run_inc();
        g.run_dec();
        assert_eq!(g.run_count(), 1);
    }
}
