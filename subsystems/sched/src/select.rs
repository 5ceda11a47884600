//! # Highest-Thread Selection
//!
//! The per-call state machine that decides what a core runs next:
//!
//! 1. Bound run-queues versus the unbound hierarchy by priority, previous
//!    thread's category winning exact ties.
//! 2. If unbound wins, the fixed-priority above-UI tier is tested directly
//!    against foreground (their bands overlap numerically and neither is a
//!    deadline class in that comparison); the direct winner is taken only
//!    while no lower tier's deadline has already lapsed, so fixed-priority
//!    load cannot starve the timeshare tiers unboundedly.
//! 3. Otherwise earliest-deadline-first across every runnable root bucket,
//!    bound and unbound; a tier holding the previous (unenqueued) thread
//!    competes at its stored deadline and wins deadline ties.
//! 4. An EDF winner outranked by a runnable higher tier gets a one-quantum
//!    starvation-avoidance window instead of a deadline advance; on expiry
//!    the deadline is recomputed and selection retried.
//! 5. Before the EDF winner is accepted, strictly-higher tiers of the same
//!    class with unused warp budget open (or continue) a warp window and
//!    take the core; an expired window clears the tier's warp availability
//!    and selection retries.
//! 6. Within the chosen tier: highest bound thread, or highest bucket then
//!    highest thread, the previous thread winning ties unless its quantum
//!    expired.
//! 7. The chosen thread is removed from the hierarchy unless the call is a
//!    non-destructive preemption check.

use crate::config::SchedConfig;
use crate::root::RootClutch;
use crate::thread::ThreadDesc;
use crate::tier::Tier;

/// What the dispatcher is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// The previous thread is gone (blocked/terminated); remove and return
    /// the best runnable thread.
    RemoveForNewThread,
    /// The previous thread could keep running; remove and return a thread
    /// only if it beats the previous one.
    RemoveConsideringCurrent,
    /// Non-destructive: report what would run, changing nothing.
    CheckPreempt,
}

/// The previously running thread, as selection sees it. It is by
/// definition not enqueued, so this is a snapshot, not a handle.
#[derive(Debug, Clone, Copy)]
pub struct PrevThread {
    /// Tier of the previous thread.
    pub tier: Tier,
    /// Whether it came from the bound class (hard-bound or
    /// shared-resource).
    pub bound: bool,
    /// Its effective priority.
    pub sched_pri: u8,
    /// Whether its quantum is exhausted; an exhausted thread loses ties.
    pub quantum_expired: bool,
}

/// Outcome of a selection call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Nothing runnable and no previous thread to continue.
    Idle,
    /// The previous thread remains the right choice.
    KeepPrevious,
    /// Run this thread (removed from the hierarchy unless the mode was
    /// [`SelectMode::CheckPreempt`]).
    Switch(ThreadDesc),
}

/// One root-bucket slot: (bound class, tier).
type Slot = (bool, Tier);

/// Run the selection state machine for one cluster.
pub(crate) fn select_highest(
    rc: &mut RootClutch,
    prev: Option<&PrevThread>,
    mode: SelectMode,
    now: u64,
    config: &SchedConfig,
) -> Selection {
    let destructive = mode != SelectMode::CheckPreempt;
    // The previous thread competes only when the caller says it could
    // still run.
    let consider_prev = prev.filter(|_| mode != SelectMode::RemoveForNewThread);
    let prev_slot: Option<Slot> = consider_prev.map(|p| (p.bound, p.tier));

    if destructive {
        rc.refresh_priorities(now, config);
    }

    if rc.thread_count == 0 {
        return if consider_prev.is_some() {
            Selection::KeepPrevious
        } else {
            Selection::Idle
        };
    }

    let slot = match choose_root_bucket(rc, consider_prev, prev_slot, destructive, now, config) {
        Some(slot) => slot,
        None => {
            return if consider_prev.is_some() {
                Selection::KeepPrevious
            } else {
                Selection::Idle
            }
        }
    };

    pick_in_tier(rc, slot, consider_prev, destructive, now, config)
}

// =============================================================================
// Root-Bucket Choice (steps 1-5)
// =============================================================================

fn choose_root_bucket(
    rc: &mut RootClutch,
    prev: Option<&PrevThread>,
    prev_slot: Option<Slot>,
    destructive: bool,
    now: u64,
    config: &SchedConfig,
) -> Option<Slot> {
    // Step 1: bound versus unbound by priority; previous category wins
    // exact ties.
    let bound_pri = merged_pri(rc.bound_pri(), prev.filter(|p| p.bound));
    let unbound_pri = merged_pri(rc.unbound_pri(), prev.filter(|p| !p.bound));
    let unbound_leads = match (bound_pri, unbound_pri) {
        (Some(b), Some(u)) => {
            if b == u {
                prev_slot.map_or(true, |(pb, _)| !pb)
            } else {
                u > b
            }
        }
        (None, Some(_)) => true,
        _ => false,
    };

    // Step 2: direct above-UI test, gated on no lapsed lower deadline.
    if unbound_leads {
        if let Some(slot) = select_above_ui(rc, prev, prev_slot, destructive, now, config) {
            return Some(slot);
        }
    }

    // Steps 3-5: EDF with starvation avoidance and warp, retried whenever
    // an expired window is closed. Each retry closes a window, so the loop
    // is bounded.
    loop {
        let (slot, _) = edf_winner(rc, prev_slot)?;
        let (bound, tier) = slot;

        // Step 4 (expiry half): a lapsed starvation window means the tier
        // already got its quantum; recompute its deadline and re-select.
        let starved = rc.root_bucket(tier, bound).starved_until;
        if let Some(until) = starved {
            if now >= until && destructive {
                let rb = rc.root_bucket_mut(tier, bound);
                rb.starved_until = None;
                rb.push_deadline(now, config);
                log::trace!("{} starvation window closed", tier);
                continue;
            }
        }

        // Step 5: warp windows of strictly-higher tiers in the same class.
        match scan_warp(rc, slot, destructive, now) {
            WarpScan::Select(warp_tier) => return Some((bound, warp_tier)),
            WarpScan::Retry => continue,
            WarpScan::None => {}
        }

        // Step 4 (opening half): a winner outranked by a runnable higher
        // tier keeps its deadline and gets one quantum to clear.
        if destructive {
            let winner_pri = rc
                .root_bucket(tier, bound)
                .highest_pri()
                .or(prev.map(|p| p.sched_pri))
                .unwrap_or(0);
            let outranked = max_other_pri(rc, slot, prev, prev_slot)
                .is_some_and(|other| other > winner_pri);
            let rb = rc.root_bucket_mut(tier, bound);
            if outranked {
                if rb.starved_until.is_none() {
                    rb.starved_until = Some(now + config.tier(tier).quantum_ns);
                    log::trace!("{} starvation window opened", tier);
                }
            } else {
                rb.starved_until = None;
                rb.push_deadline(now, config);
            }
        }
        return Some(slot);
    }
}

/// Effective priority of a class, folding in the previous thread when it
/// belongs to that class.
fn merged_pri(queued: Option<u8>, prev: Option<&PrevThread>) -> Option<u8> {
    match (queued, prev) {
        (q, Some(p)) => Some(q.map_or(p.sched_pri, |v| v.max(p.sched_pri))),
        (q, None) => q,
    }
}

/// Step 2: the fixed-priority above-UI bucket is taken directly when it
/// outranks foreground and no lower tier has EDF pressure (a lapsed
/// deadline). Returns the slot to run, or `None` to fall through to EDF.
fn select_above_ui(
    rc: &mut RootClutch,
    prev: Option<&PrevThread>,
    prev_slot: Option<Slot>,
    destructive: bool,
    now: u64,
    config: &SchedConfig,
) -> Option<Slot> {
    let prev_unbound = |tier: Tier| prev.filter(|p| !p.bound && p.tier == tier);
    let au = merged_pri(
        rc.root_bucket(Tier::AboveUi, false).highest_pri(),
        prev_unbound(Tier::AboveUi),
    )?;
    let fg = merged_pri(
        rc.root_bucket(Tier::Foreground, false).highest_pri(),
        prev_unbound(Tier::Foreground),
    );

    let wins = match fg {
        None => true,
        Some(f) => {
            au > f || (au == f && prev_slot == Some((false, Tier::AboveUi)))
        }
    };
    if !wins || edf_pressure(rc, now) {
        return None;
    }
    if destructive {
        // Keep the fixed tier honest in later EDF comparisons.
        rc.root_bucket_mut(Tier::AboveUi, false)
            .push_deadline(now, config);
    }
    Some((false, Tier::AboveUi))
}

/// Whether any runnable root bucket below above-UI has a lapsed deadline.
fn edf_pressure(rc: &RootClutch, now: u64) -> bool {
    for bound in [false, true] {
        for tier in Tier::ALL {
            if (bound, tier) == (false, Tier::AboveUi) {
                continue;
            }
            let rb = rc.root_bucket(tier, bound);
            if rb.is_runnable() && rb.deadline <= now {
                return true;
            }
        }
    }
    false
}

/// Step 3: earliest deadline across every runnable root bucket, plus the
/// previous thread's slot at its stored deadline. The previous slot wins
/// ties; among queued buckets, bound wins ties because bound threads have
/// nowhere else to run.
fn edf_winner(rc: &RootClutch, prev_slot: Option<Slot>) -> Option<(Slot, u64)> {
    let mut best: Option<(Slot, u64)> = None;
    for bound in [true, false] {
        for tier in Tier::ALL {
            let slot = (bound, tier);
            let rb = rc.root_bucket(tier, bound);
            if !rb.is_runnable() && prev_slot != Some(slot) {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, best_dl)) => {
                    rb.deadline < best_dl
                        || (rb.deadline == best_dl && prev_slot == Some(slot))
                }
            };
            if better {
                best = Some((slot, rb.deadline));
            }
        }
    }
    best
}

enum WarpScan {
    /// A higher tier warps in front of the EDF winner.
    Select(Tier),
    /// An expired warp window was closed; re-run EDF.
    Retry,
    /// No warp applies.
    None,
}

/// Step 5: scan tiers strictly above the winner (same class, highest
/// first) for usable warp.
fn scan_warp(rc: &mut RootClutch, winner: Slot, destructive: bool, now: u64) -> WarpScan {
    let (bound, winner_tier) = winner;
    for &tier in &Tier::ALL[..winner_tier.index()] {
        if !rc.root_bucket(tier, bound).is_runnable() {
            continue;
        }
        let rb = rc.root_bucket_mut(tier, bound);
        match rb.warp_window {
            Some(window) if now < window => return WarpScan::Select(tier),
            Some(_) => {
                // Window ran out: this tier is done warping for the
                // current runnable period.
                if destructive {
                    rb.warp_window = None;
                    rb.warp_remaining = 0;
                    log::trace!("{} warp window expired", tier);
                    return WarpScan::Retry;
                }
            }
            None if rb.warp_remaining > 0 => {
                if destructive {
                    rb.warp_window = Some(now + rb.warp_remaining);
                    log::trace!("{} warp window opened", tier);
                }
                return WarpScan::Select(tier);
            }
            None => {}
        }
    }
    WarpScan::None
}

/// Highest priority among runnable root buckets other than the winner,
/// folding in the previous thread when it sits outside the winner slot.
fn max_other_pri(
    rc: &RootClutch,
    winner: Slot,
    prev: Option<&PrevThread>,
    prev_slot: Option<Slot>,
) -> Option<u8> {
    let mut max: Option<u8> = None;
    for bound in [false, true] {
        for tier in Tier::ALL {
            if (bound, tier) == winner {
                continue;
            }
            if let Some(pri) = rc.root_bucket(tier, bound).highest_pri() {
                max = Some(max.map_or(pri, |m| m.max(pri)));
            }
        }
    }
    if let (Some(p), Some(slot)) = (prev, prev_slot) {
        if slot != winner {
            max = Some(max.map_or(p.sched_pri, |m| m.max(p.sched_pri)));
        }
    }
    max
}

// =============================================================================
// In-Tier Pick (steps 6-7)
// =============================================================================

fn pick_in_tier(
    rc: &mut RootClutch,
    slot: Slot,
    prev: Option<&PrevThread>,
    destructive: bool,
    now: u64,
    config: &SchedConfig,
) -> Selection {
    let (bound, tier) = slot;
    let candidate = if bound {
        rc.peek_bound(tier)
    } else {
        rc.peek_unbound(tier)
    };

    let Some((pri, idx)) = candidate else {
        // Only reachable when EDF chose the previous thread's empty slot.
        return Selection::KeepPrevious;
    };

    // The previous thread wins ties in its own slot unless its quantum is
    // spent.
    if let Some(p) = prev {
        if (p.bound, p.tier) == slot
            && (p.sched_pri > pri || (p.sched_pri == pri && !p.quantum_expired))
        {
            return Selection::KeepPrevious;
        }
    }

    if destructive {
        Selection::Switch(rc.remove_idx(idx, now, config))
    } else {
        Selection::Switch(rc.arena.get(idx).desc)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::BucketGroup;
    use crate::root::InsertHint;
    use crate::thread::{GroupId, ThreadDesc, ThreadFlags, ThreadId};
    use alloc::sync::Arc;
    use clutch_topology::ClusterId;

    struct Fixture {
        rc: RootClutch,
        cfg: SchedConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                rc: RootClutch::new(ClusterId::new(0)),
                cfg: SchedConfig::default(),
            }
        }

        fn grp(&self, id: u64, tier: Tier) -> Arc<BucketGroup> {
            Arc::new(BucketGroup::new(GroupId(id), tier))
        }

        fn insert(&mut self, grp: &Arc<BucketGroup>, id: u64, tier: Tier, pri: u8, now: u64) {
            let desc = ThreadDesc {
                id: ThreadId(id),
                group: grp.group(),
                tier,
                base_pri: pri,
                sched_pri: pri,
                bound: None,
                flags: ThreadFlags::empty(),
            };
            self.rc.insert(desc, grp, InsertHint::RoundRobin, now, &self.cfg);
        }

        fn select(&mut self, now: u64) -> Selection {
            select_highest(&mut self.rc, None, SelectMode::RemoveForNewThread, now, &self.cfg)
        }
    }

    fn switched(sel: Selection) -> ThreadDesc {
        match sel {
            Selection::Switch(desc) => desc,
            other => panic!("expected Switch, got {:?}", other),
        }
    }

    #[test]
    fn test_scenario_a_single_thread() {
        let mut f = Fixture::new();
        let g = f.grp(1, Tier::Default);
        f.insert(&g, 1, Tier::Default, 31, 0);

        let desc = switched(f.select(1));
        assert_eq!(desc.id, ThreadId(1));
        assert_eq!(f.rc.thread_count, 0);
        assert_eq!(f.select(2), Selection::Idle);
        f.rc.verify_conservation();
    }

    #[test]
    fn test_scenario_b_round_robin_fifo() {
        let mut f = Fixture::new();
        let g = f.grp(1, Tier::Default);
        f.insert(&g, 1, Tier::Default, 31, 0);
        f.insert(&g, 2, Tier::Default, 31, 0);

        assert_eq!(switched(f.select(1)).id, ThreadId(1));
        assert_eq!(switched(f.select(2)).id, ThreadId(2));
    }

    /// The previous-thread descriptor of a running above-UI thread whose
    /// quantum just expired.
    fn above_ui_prev() -> PrevThread {
        PrevThread {
            tier: Tier::AboveUi,
            bound: false,
            sched_pri: 90,
            quantum_expired: true,
        }
    }

    #[test]
    fn test_scenario_c_above_ui_dominates_until_blocked() {
        let mut f = Fixture::new();
        let ga = f.grp(1, Tier::AboveUi);
        let gb = f.grp(2, Tier::Background);
        f.insert(&gb, 2, Tier::Background, 10, 0);
        f.insert(&ga, 1, Tier::AboveUi, 90, 0);

        // Above-UI gets the core and keeps it across quantum expirations
        // while it stays runnable.
        let mut now = 1;
        assert_eq!(switched(f.select(now)).id, ThreadId(1));
        let prev = above_ui_prev();
        for _ in 0..4 {
            now += f.cfg.tier(Tier::AboveUi).quantum_ns;
            let sel = select_highest(
                &mut f.rc,
                Some(&prev),
                SelectMode::RemoveConsideringCurrent,
                now,
                &f.cfg,
            );
            assert_eq!(sel, Selection::KeepPrevious);
        }
        // It blocks: background runs.
        let d = switched(f.select(now + 1));
        assert_eq!(d.id, ThreadId(2));
    }

    #[test]
    fn test_scenario_d_background_beats_continuous_above_ui() {
        let mut f = Fixture::new();
        let ga = f.grp(1, Tier::AboveUi);
        let gb = f.grp(2, Tier::Background);
        f.insert(&gb, 2, Tier::Background, 10, 0);
        f.insert(&ga, 1, Tier::AboveUi, 90, 0);

        // Above-UI runs continuously; background must still get the core
        // once its deadline lapses.
        let mut now = 1;
        assert_eq!(switched(f.select(now)).id, ThreadId(1));
        let prev = above_ui_prev();
        let quantum = f.cfg.tier(Tier::AboveUi).quantum_ns;
        let mut background_ran = false;
        for _ in 0..64 {
            now += quantum;
            let sel = select_highest(
                &mut f.rc,
                Some(&prev),
                SelectMode::RemoveConsideringCurrent,
                now,
                &f.cfg,
            );
            match sel {
                Selection::KeepPrevious => {}
                Selection::Switch(d) => {
                    assert_eq!(d.id, ThreadId(2));
                    background_ran = true;
                    break;
                }
                Selection::Idle => panic!("background lost"),
            }
        }
        assert!(background_ran, "background starved past its threshold");
        // The handoff ran under a starvation window: the background
        // deadline must not have advanced.
        let rb = f.rc.root_bucket(Tier::Background, false);
        assert!(rb.starved_until.is_some());
        assert_eq!(rb.deadline, f.cfg.tier(Tier::Background).wcel_ns);
    }

    #[test]
    fn test_scenario_d_starvation_window_is_one_quantum() {
        let mut f = Fixture::new();
        let ga = f.grp(1, Tier::AboveUi);
        let gb = f.grp(2, Tier::Background);
        f.insert(&gb, 2, Tier::Background, 10, 0);
        f.insert(&ga, 1, Tier::AboveUi, 90, 0);

        let mut now = 1;
        assert_eq!(switched(f.select(now)).id, ThreadId(1));
        let prev = above_ui_prev();
        let quantum = f.cfg.tier(Tier::AboveUi).quantum_ns;
        loop {
            now += quantum;
            let sel = select_highest(
                &mut f.rc,
                Some(&prev),
                SelectMode::RemoveConsideringCurrent,
                now,
                &f.cfg,
            );
            if let Selection::Switch(d) = sel {
                assert_eq!(d.id, ThreadId(2));
                break;
            }
        }
        // Above-UI was preempted back into the hierarchy; background owns
        // the core only for its starvation quantum, then above-UI resumes.
        f.insert(&ga, 1, Tier::AboveUi, 90, now);
        now += f.cfg.tier(Tier::Background).quantum_ns + 1;
        let d = switched(f.select(now));
        assert_eq!(d.id, ThreadId(1));
    }

    #[test]
    fn test_higher_tier_warps_past_edf_winner() {
        let mut f = Fixture::new();
        let gd = f.grp(1, Tier::Default);
        let gf = f.grp(2, Tier::Foreground);

        // Default becomes runnable long before foreground, so default owns
        // the earlier deadline.
        f.insert(&gd, 1, Tier::Default, 31, 0);
        let fg_at = f.cfg.tier(Tier::Default).wcel_ns;
        f.insert(&gf, 2, Tier::Foreground, 40, fg_at);
        let now = fg_at + 1;
        assert!(
            f.rc.root_bucket(Tier::Default, false).deadline
                < f.rc.root_bucket(Tier::Foreground, false).deadline
        );

        // Foreground warps in front.
        let d = switched(f.select(now));
        assert_eq!(d.id, ThreadId(2));
        let rb = f.rc.root_bucket(Tier::Foreground, false);
        assert_eq!(rb.warp_window, Some(now + f.cfg.tier(Tier::Foreground).warp_ns));
    }

    #[test]
    fn test_warp_budget_bounded_per_runnable_period() {
        let mut f = Fixture::new();
        let gd = f.grp(1, Tier::Default);
        let gf = f.grp(2, Tier::Foreground);
        f.insert(&gd, 1, Tier::Default, 31, 0);
        // Two foreground threads keep the tier runnable across the warp
        // window.
        let fg_at = f.cfg.tier(Tier::Default).wcel_ns;
        f.insert(&gf, 2, Tier::Foreground, 40, fg_at);
        f.insert(&gf, 3, Tier::Foreground, 40, fg_at);

        // First selection opens the warp window.
        let mut now = fg_at + 1;
        let d = switched(f.select(now));
        assert_eq!(d.id, ThreadId(2));

        // Past the window: warp availability clears and the EDF winner
        // gets the core despite the runnable higher tier.
        now += f.cfg.tier(Tier::Foreground).warp_ns + 1;
        let prev = PrevThread {
            tier: Tier::Foreground,
            bound: false,
            sched_pri: 40,
            quantum_expired: true,
        };
        let sel = select_highest(
            &mut f.rc,
            Some(&prev),
            SelectMode::RemoveConsideringCurrent,
            now,
            &f.cfg,
        );
        assert_eq!(switched(sel).id, ThreadId(1));
        let rb = f.rc.root_bucket(Tier::Foreground, false);
        assert_eq!(rb.warp_remaining, 0);
        assert_eq!(rb.warp_window, None);
        // Default ran under a starvation window against the higher tier.
        assert!(f.rc.root_bucket(Tier::Default, false).starved_until.is_some());
    }

    #[test]
    fn test_previous_thread_wins_ties() {
        let mut f = Fixture::new();
        let g = f.grp(1, Tier::Default);
        f.insert(&g, 1, Tier::Default, 31, 0);

        // Equal to the queued thread's effective priority: a tie.
        let prev = PrevThread {
            tier: Tier::Default,
            bound: false,
            sched_pri: 31,
            quantum_expired: false,
        };
        let sel = select_highest(
            &mut f.rc,
            Some(&prev),
            SelectMode::RemoveConsideringCurrent,
            1,
            &f.cfg,
        );
        assert_eq!(sel, Selection::KeepPrevious);
        assert_eq!(f.rc.thread_count, 1);

        // An expired quantum forfeits the tie.
        let prev = PrevThread { quantum_expired: true, ..prev };
        let sel = select_highest(
            &mut f.rc,
            Some(&prev),
            SelectMode::RemoveConsideringCurrent,
            2,
            &f.cfg,
        );
        assert!(matches!(sel, Selection::Switch(_)));
        assert_eq!(f.rc.thread_count, 0);
    }

    #[test]
    fn test_keep_previous_on_empty_hierarchy() {
        let mut f = Fixture::new();
        let prev = PrevThread {
            tier: Tier::Default,
            bound: false,
            sched_pri: 31,
            quantum_expired: false,
        };
        let sel = select_highest(
            &mut f.rc,
            Some(&prev),
            SelectMode::RemoveConsideringCurrent,
            1,
            &f.cfg,
        );
        assert_eq!(sel, Selection::KeepPrevious);
    }

    #[test]
    fn test_check_preempt_is_non_destructive() {
        let mut f = Fixture::new();
        let g = f.grp(1, Tier::Default);
        f.insert(&g, 1, Tier::Default, 60, 0);

        let prev = PrevThread {
            tier: Tier::Utility,
            bound: false,
            sched_pri: 20,
            quantum_expired: false,
        };
        // The running thread's tier carries the deadline it was dispatched
        // under.
        f.rc.root_bucket_mut(Tier::Utility, false).push_deadline(0, &f.cfg);
        let before_deadline = f.rc.root_bucket(Tier::Default, false).deadline;
        let sel = select_highest(&mut f.rc, Some(&prev), SelectMode::CheckPreempt, 1, &f.cfg);
        let desc = switched(sel);
        assert_eq!(desc.id, ThreadId(1));
        // Nothing moved.
        assert_eq!(f.rc.thread_count, 1);
        assert_eq!(f.rc.root_bucket(Tier::Default, false).deadline, before_deadline);
        f.rc.verify_conservation();
    }

    #[test]
    fn test_bound_vs_unbound_priority() {
        let mut f = Fixture::new();
        let g = f.grp(1, Tier::Default);
        f.insert(&g, 1, Tier::Default, 31, 0);

        // A higher-priority bound thread wins the category comparison and
        // the EDF pick inside its tier.
        let bound_desc = ThreadDesc {
            id: ThreadId(2),
            group: GroupId(1),
            tier: Tier::Default,
            base_pri: 90,
            sched_pri: 90,
            bound: Some(ClusterId::new(0)),
            flags: ThreadFlags::empty(),
        };
        f.rc.insert(bound_desc, &g, InsertHint::Tail, 0, &f.cfg);

        let d = switched(f.select(1));
        assert_eq!(d.id, ThreadId(2));
        let d = switched(f.select(2));
        assert_eq!(d.id, ThreadId(1));
    }
}
