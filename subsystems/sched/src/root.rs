//! # Root Buckets and the Cluster Hierarchy Root
//!
//! One [`RootClutch`] exists per cluster and owns everything scheduled
//! there: per-tier root buckets (bound and unbound), the thread arena, the
//! clutch-bucket arena and the aggregate counters the dispatcher and the
//! Edge layer read.
//!
//! State flows upward: a thread insertion updates its clutch bucket, which
//! may reposition the bucket inside its root bucket, which may make the
//! root bucket runnable inside the cluster's EDF bookkeeping. Selection
//! (see [`crate::select`]) walks the same structure downward.
//!
//! All methods here require the owning cluster's lock; the lock itself
//! lives in the scheduler registry.

use alloc::sync::Arc;
use alloc::vec::Vec;

use hashbrown::HashMap;

use clutch_topology::ClusterId;

use crate::bucket::ClutchBucket;
use crate::config::SchedConfig;
use crate::group::BucketGroup;
use crate::runq::PriRunQueue;
use crate::thread::{GroupId, ThreadArena, ThreadDesc, ThreadFlags, ThreadId, ThreadIdx};
use crate::tier::{Tier, TIER_COUNT};

// =============================================================================
// Insertion Hints
// =============================================================================

/// Where an inserted thread lands among equal-priority peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertHint {
    /// Ahead of equal-priority peers (e.g. preempted threads).
    Head,
    /// Behind equal-priority peers.
    Tail,
    /// Behind equal-priority peers, additionally rotating the target
    /// bucket behind its equal-priority peer buckets.
    RoundRobin,
}

// =============================================================================
// Root Bucket
// =============================================================================

/// Per-(tier, {bound, unbound}) node of one cluster's hierarchy.
///
/// The run-queue holds clutch-bucket handles for unbound root buckets and
/// thread-record handles for bound ones. The EDF fields (`deadline`,
/// warp, starvation window) persist across empty periods: a tier holding
/// an unenqueued previous thread is still judged at its stored deadline.
#[derive(Debug)]
pub(crate) struct RootBucket {
    pub(crate) tier: Tier,
    pub(crate) bound: bool,
    pub(crate) queue: PriRunQueue,
    /// EDF deadline; valid while runnable, retained while empty.
    pub(crate) deadline: u64,
    /// Unused warp budget for the current runnable period.
    pub(crate) warp_remaining: u64,
    /// Deadline of the currently open warp window, if any.
    pub(crate) warp_window: Option<u64>,
    /// End of the currently open starvation-avoidance window, if any.
    pub(crate) starved_until: Option<u64>,
}

impl RootBucket {
    fn new(tier: Tier, bound: bool) -> Self {
        Self {
            tier,
            bound,
            queue: PriRunQueue::new(),
            deadline: 0,
            warp_remaining: 0,
            warp_window: None,
            starved_until: None,
        }
    }

    /// Present in the cluster's EDF structure ⇔ run-queue non-empty.
    pub(crate) fn is_runnable(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Highest queued priority (bucket priority or bound thread priority).
    pub(crate) fn highest_pri(&self) -> Option<u8> {
        self.queue.highest()
    }

    /// Empty → runnable transition: compute the deadline and recharge the
    /// warp budget for this runnable period.
    fn activate(&mut self, now: u64, config: &SchedConfig) {
        self.push_deadline(now, config);
        self.warp_remaining = config.tier(self.tier).warp_ns;
        self.warp_window = None;
        self.starved_until = None;
        log::trace!(
            "{} root bucket {} runnable, deadline {}",
            self.tier,
            if self.bound { "bound" } else { "unbound" },
            self.deadline
        );
    }

    /// Runnable → empty transition: an open warp window folds back into
    /// budget for whatever of it was not consumed.
    fn deactivate(&mut self, now: u64) {
        if let Some(window) = self.warp_window.take() {
            self.warp_remaining = window.saturating_sub(now);
        }
        self.starved_until = None;
    }

    /// Advance the deadline to `now + wcel`. Deadlines never move
    /// backwards; overflow would regress one and is fatal.
    pub(crate) fn push_deadline(&mut self, now: u64, config: &SchedConfig) {
        let new = now
            .checked_add(config.tier(self.tier).wcel_ns)
            .expect("root bucket deadline overflow");
        if new > self.deadline {
            self.deadline = new;
        }
    }

    /// Whether the tier still has warp to offer: an open unexpired window,
    /// or unconsumed budget.
    pub(crate) fn warp_usable(&self, now: u64) -> bool {
        match self.warp_window {
            Some(window) => now < window,
            None => self.warp_remaining > 0,
        }
    }
}

// =============================================================================
// Bucket Arena
// =============================================================================

/// Slab of clutch buckets plus the (group, tier) index over it.
#[derive(Debug, Default)]
pub(crate) struct BucketArena {
    slots: Vec<Option<ClutchBucket>>,
    free: Vec<u32>,
    index: HashMap<(GroupId, Tier), u32>,
}

impl BucketArena {
    fn get_or_create(&mut self, group: GroupId, tier: Tier, grp: &Arc<BucketGroup>) -> u32 {
        if let Some(&handle) = self.index.get(&(group, tier)) {
            return handle;
        }
        let bucket = ClutchBucket::new(group, tier, Arc::clone(grp));
        let handle = if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(bucket);
            slot
        } else {
            self.slots.push(Some(bucket));
            (self.slots.len() - 1) as u32
        };
        self.index.insert((group, tier), handle);
        handle
    }

    pub(crate) fn lookup(&self, group: GroupId, tier: Tier) -> Option<u32> {
        self.index.get(&(group, tier)).copied()
    }

    pub(crate) fn get(&self, handle: u32) -> &ClutchBucket {
        self.slots[handle as usize]
            .as_ref()
            .expect("dangling bucket handle")
    }

    pub(crate) fn get_mut(&mut self, handle: u32) -> &mut ClutchBucket {
        self.slots[handle as usize]
            .as_mut()
            .expect("dangling bucket handle")
    }

    /// Drop the (group, tier) bucket; it must be empty and unqueued.
    fn destroy(&mut self, group: GroupId, tier: Tier) {
        if let Some(handle) = self.index.remove(&(group, tier)) {
            let bucket = self.slots[handle as usize]
                .take()
                .expect("dangling bucket handle");
            assert!(
                bucket.is_empty() && !bucket.queued,
                "destroying a non-empty clutch bucket"
            );
            self.free.push(handle);
        }
    }
}

// =============================================================================
// Root Clutch
// =============================================================================

/// One cluster's scheduling hierarchy root.
#[derive(Debug)]
pub(crate) struct RootClutch {
    pub(crate) cluster: ClusterId,
    unbound: [RootBucket; TIER_COUNT],
    bound: [RootBucket; TIER_COUNT],
    pub(crate) arena: ThreadArena,
    pub(crate) buckets: BucketArena,
    /// Enqueued threads by kernel identity, for removal and migration.
    by_id: HashMap<ThreadId, ThreadIdx>,
    /// Aggregate runnable-thread count.
    pub(crate) thread_count: u32,
    /// Runnable threads at or above the urgency priority.
    pub(crate) urgency: u32,
    /// Runnable shared-resource threads (dedicated placement metric).
    pub(crate) shared_rsrc_load: u32,
    /// Runnable threads per tier (ageout scaling, Edge load metrics).
    pub(crate) tier_load: [u32; TIER_COUNT],
    /// Monotone count of enqueues, exposed to the performance controller.
    pub(crate) cumulative_enqueues: u64,
    /// Queued clutch buckets currently classified foreign.
    foreign: Vec<u32>,
}

impl RootClutch {
    pub(crate) fn new(cluster: ClusterId) -> Self {
        let mk = |bound: bool| {
            [
                RootBucket::new(Tier::AboveUi, bound),
                RootBucket::new(Tier::Foreground, bound),
                RootBucket::new(Tier::Interactive, bound),
                RootBucket::new(Tier::Default, bound),
                RootBucket::new(Tier::Utility, bound),
                RootBucket::new(Tier::Background, bound),
            ]
        };
        Self {
            cluster,
            unbound: mk(false),
            bound: mk(true),
            arena: ThreadArena::new(),
            buckets: BucketArena::default(),
            by_id: HashMap::new(),
            thread_count: 0,
            urgency: 0,
            shared_rsrc_load: 0,
            tier_load: [0; TIER_COUNT],
            cumulative_enqueues: 0,
            foreign: Vec::new(),
        }
    }

    pub(crate) fn root_bucket(&self, tier: Tier, bound: bool) -> &RootBucket {
        if bound {
            &self.bound[tier.index()]
        } else {
            &self.unbound[tier.index()]
        }
    }

    pub(crate) fn root_bucket_mut(&mut self, tier: Tier, bound: bool) -> &mut RootBucket {
        if bound {
            &mut self.bound[tier.index()]
        } else {
            &mut self.unbound[tier.index()]
        }
    }

    // -------------------------------------------------------------------------
    // Aggregate priorities
    // -------------------------------------------------------------------------

    /// Highest priority across bound run-queues.
    pub(crate) fn bound_pri(&self) -> Option<u8> {
        self.bound.iter().filter_map(RootBucket::highest_pri).max()
    }

    /// Highest clutch-bucket priority across the unbound hierarchy.
    pub(crate) fn unbound_pri(&self) -> Option<u8> {
        self.unbound
            .iter()
            .filter_map(RootBucket::highest_pri)
            .max()
    }

    /// Cluster aggregate priority: max over all non-empty root buckets.
    pub(crate) fn aggregate_pri(&self) -> Option<u8> {
        self.bound_pri().max(self.unbound_pri())
    }

    // -------------------------------------------------------------------------
    // Insertion (§4.1)
    // -------------------------------------------------------------------------

    /// Insert a runnable thread. Returns whether the cluster's aggregate
    /// priority rose, i.e. whether the caller should consider preempting a
    /// core.
    pub(crate) fn insert(
        &mut self,
        desc: ThreadDesc,
        grp: &Arc<BucketGroup>,
        hint: InsertHint,
        now: u64,
        config: &SchedConfig,
    ) -> bool {
        let before = self.aggregate_pri();
        let idx = self.arena.alloc(desc);
        let prior = self.by_id.insert(desc.id, idx);
        assert!(prior.is_none(), "{} enqueued twice", desc.id);

        if desc.uses_bound_runq(self.cluster) {
            self.insert_bound(desc, idx, hint, now, config);
        } else {
            self.insert_unbound(desc, idx, grp, hint, now, config);
        }

        self.thread_count += 1;
        self.tier_load[desc.tier.index()] += 1;
        self.cumulative_enqueues += 1;
        if desc.sched_pri >= config.urgency_pri {
            self.urgency += 1;
        }
        if desc.flags.contains(ThreadFlags::SHARED_RESOURCE) {
            self.shared_rsrc_load += 1;
        }

        let after = self.aggregate_pri();
        after > before
    }

    fn insert_bound(
        &mut self,
        desc: ThreadDesc,
        idx: ThreadIdx,
        hint: InsertHint,
        now: u64,
        config: &SchedConfig,
    ) {
        let rb = &mut self.bound[desc.tier.index()];
        let was_empty = !rb.is_runnable();
        rb.queue
            .insert(desc.sched_pri, idx.raw(), hint == InsertHint::Head);
        if was_empty {
            rb.activate(now, config);
        }
    }

    fn insert_unbound(
        &mut self,
        desc: ThreadDesc,
        idx: ThreadIdx,
        grp: &Arc<BucketGroup>,
        hint: InsertHint,
        now: u64,
        config: &SchedConfig,
    ) {
        let handle = self.buckets.get_or_create(desc.group, desc.tier, grp);
        let foreign = grp.preferred().is_some_and(|p| p != self.cluster);
        grp.pending_inc(now);

        let bucket = self.buckets.get_mut(handle);
        let was_empty = bucket.is_empty();
        bucket.insert(&mut self.arena, idx, hint == InsertHint::Head);
        if was_empty {
            // Classification is fixed at queue time; later preference
            // changes go through reclassify_group_tier.
            bucket.foreign = foreign;
        }

        let new_pri = self
            .buckets
            .get(handle)
            .compute_pri(&self.arena, now, config);

        if was_empty {
            let bucket = self.buckets.get_mut(handle);
            bucket.pri = new_pri;
            bucket.queued = true;
            let rb = &mut self.unbound[desc.tier.index()];
            let rb_was_empty = !rb.is_runnable();
            rb.queue.insert(new_pri, handle, false);
            if rb_was_empty {
                rb.activate(now, config);
            }
            if foreign {
                self.foreign.push(handle);
            }
        } else {
            let old_pri = self.buckets.get(handle).pri;
            let rb = &mut self.unbound[desc.tier.index()];
            if new_pri != old_pri {
                rb.queue.remove(old_pri, handle);
                rb.queue.insert(new_pri, handle, false);
                self.buckets.get_mut(handle).pri = new_pri;
            } else if hint == InsertHint::RoundRobin {
                rb.queue.rotate_to_back(old_pri, handle);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Removal (§4.2)
    // -------------------------------------------------------------------------

    /// Remove an enqueued thread by identity.
    pub(crate) fn remove_thread(
        &mut self,
        id: ThreadId,
        now: u64,
        config: &SchedConfig,
    ) -> Option<ThreadDesc> {
        let idx = self.by_id.get(&id).copied()?;
        Some(self.remove_idx(idx, now, config))
    }

    /// Remove an enqueued thread by arena handle; the symmetric reverse of
    /// [`Self::insert`].
    pub(crate) fn remove_idx(
        &mut self,
        idx: ThreadIdx,
        now: u64,
        config: &SchedConfig,
    ) -> ThreadDesc {
        let desc = self.arena.get(idx).desc;

        if desc.uses_bound_runq(self.cluster) {
            let rb = &mut self.bound[desc.tier.index()];
            rb.queue.remove(desc.sched_pri, idx.raw());
            if !rb.is_runnable() {
                rb.deactivate(now);
            }
        } else {
            self.remove_unbound(desc, idx, now, config);
        }

        assert!(self.thread_count > 0, "cluster thread count underflow");
        self.thread_count -= 1;
        let tl = &mut self.tier_load[desc.tier.index()];
        assert!(*tl > 0, "tier load underflow");
        *tl -= 1;
        if desc.sched_pri >= config.urgency_pri {
            assert!(self.urgency > 0, "urgency count underflow");
            self.urgency -= 1;
        }
        if desc.flags.contains(ThreadFlags::SHARED_RESOURCE) {
            assert!(self.shared_rsrc_load > 0, "shared-resource load underflow");
            self.shared_rsrc_load -= 1;
        }

        self.by_id.remove(&desc.id);
        self.arena.release(idx)
    }

    fn remove_unbound(&mut self, desc: ThreadDesc, idx: ThreadIdx, now: u64, config: &SchedConfig) {
        let handle = self
            .buckets
            .lookup(desc.group, desc.tier)
            .expect("removing a thread with no clutch bucket");
        let bucket = self.buckets.get_mut(handle);
        bucket.remove(&mut self.arena, idx);
        bucket.grp.pending_dec();

        if bucket.is_empty() {
            let old_pri = bucket.pri;
            bucket.queued = false;
            let rb = &mut self.unbound[desc.tier.index()];
            rb.queue.remove(old_pri, handle);
            if !rb.is_runnable() {
                rb.deactivate(now);
            }
            self.foreign.retain(|&h| h != handle);
        } else {
            let new_pri = self
                .buckets
                .get(handle)
                .compute_pri(&self.arena, now, config);
            let old_pri = self.buckets.get(handle).pri;
            if new_pri != old_pri {
                let rb = &mut self.unbound[desc.tier.index()];
                rb.queue.remove(old_pri, handle);
                rb.queue.insert(new_pri, handle, false);
                self.buckets.get_mut(handle).pri = new_pri;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Score refresh and ageout
    // -------------------------------------------------------------------------

    /// Apply pending ageout to every queued bucket's group and reposition
    /// buckets whose priority moved. Called on the selection path so
    /// long-pending groups climb before the EDF decision is made.
    pub(crate) fn refresh_priorities(&mut self, now: u64, config: &SchedConfig) {
        for tier in Tier::ALL {
            let load = self.tier_load[tier.index()];
            let threshold = config.ageout_threshold_ns(tier, load);
            let handles: Vec<(u8, u32)> = self.unbound[tier.index()].queue.iter().collect();
            for (old_pri, handle) in handles {
                let bucket = self.buckets.get(handle);
                bucket.grp.apply_ageout(now, threshold);
                let new_pri = bucket.compute_pri(&self.arena, now, config);
                if new_pri != old_pri {
                    let rb = &mut self.unbound[tier.index()];
                    rb.queue.remove(old_pri, handle);
                    rb.queue.insert(new_pri, handle, false);
                    self.buckets.get_mut(handle).pri = new_pri;
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // In-tier peeking (selection step 6)
    // -------------------------------------------------------------------------

    /// Highest bound thread of a tier: (priority, handle).
    pub(crate) fn peek_bound(&self, tier: Tier) -> Option<(u8, ThreadIdx)> {
        let (pri, raw) = self.bound[tier.index()].queue.front()?;
        Some((pri, ThreadIdx::from_raw(raw)))
    }

    /// Highest thread of a tier's unbound hierarchy: highest-priority
    /// bucket first, then its highest thread.
    pub(crate) fn peek_unbound(&self, tier: Tier) -> Option<(u8, ThreadIdx)> {
        let (_, handle) = self.unbound[tier.index()].queue.front()?;
        let bucket = self.buckets.get(handle);
        let idx = bucket.highest(&self.arena)?;
        Some((self.arena.get(idx).desc.sched_pri, idx))
    }

    // -------------------------------------------------------------------------
    // Edge helpers
    // -------------------------------------------------------------------------

    /// Whether any queued bucket is classified foreign.
    pub(crate) fn has_foreign(&self) -> bool {
        !self.foreign.is_empty()
    }

    /// Remove the highest thread of the first foreign bucket, for stealing.
    pub(crate) fn take_foreign(&mut self, now: u64, config: &SchedConfig) -> Option<ThreadDesc> {
        let &handle = self.foreign.first()?;
        let idx = self.buckets.get(handle).highest(&self.arena)?;
        Some(self.remove_idx(idx, now, config))
    }

    /// Remove the cluster's overall highest-priority thread, ignoring EDF
    /// (used when an idle core steals from an overloaded cluster).
    pub(crate) fn take_highest(&mut self, now: u64, config: &SchedConfig) -> Option<ThreadDesc> {
        let bound_best: Option<(u8, ThreadIdx)> =
            Tier::ALL.iter().filter_map(|&t| self.peek_bound(t)).max_by_key(|&(p, _)| p);
        let unbound_best: Option<(u8, ThreadIdx)> =
            Tier::ALL.iter().filter_map(|&t| self.peek_unbound(t)).max_by_key(|&(p, _)| p);
        let idx = match (bound_best, unbound_best) {
            (Some((bp, bi)), Some((up, ui))) => {
                if bp >= up {
                    bi
                } else {
                    ui
                }
            }
            (Some((_, bi)), None) => bi,
            (None, Some((_, ui))) => ui,
            (None, None) => return None,
        };
        Some(self.remove_idx(idx, now, config))
    }

    /// Drain every thread of (group, tier) in enqueue order, for
    /// re-preference migration.
    pub(crate) fn drain_group_tier(
        &mut self,
        group: GroupId,
        tier: Tier,
        now: u64,
        config: &SchedConfig,
    ) -> Vec<ThreadDesc> {
        let Some(handle) = self.buckets.lookup(group, tier) else {
            return Vec::new();
        };
        let order: Vec<ThreadIdx> = self
            .buckets
            .get(handle)
            .fifo_order(&self.arena)
            .collect();
        order
            .into_iter()
            .map(|idx| self.remove_idx(idx, now, config))
            .collect()
    }

    /// Re-derive the native/foreign classification of (group, tier)'s
    /// bucket after a preference change.
    pub(crate) fn reclassify_group_tier(&mut self, group: GroupId, tier: Tier) {
        let Some(handle) = self.buckets.lookup(group, tier) else {
            return;
        };
        let bucket = self.buckets.get_mut(handle);
        let foreign = bucket
            .grp
            .preferred()
            .is_some_and(|p| p != self.cluster);
        let was = bucket.foreign;
        bucket.foreign = foreign;
        if !bucket.queued || was == foreign {
            return;
        }
        if foreign {
            self.foreign.push(handle);
        } else {
            self.foreign.retain(|&h| h != handle);
        }
    }

    /// Whether any enqueued thread belongs to `group`. Covers the bound
    /// run-queues, which the group's pending counter does not see.
    pub(crate) fn has_group_threads(&self, group: GroupId) -> bool {
        self.by_id
            .values()
            .any(|&idx| self.arena.get(idx).desc.group == group)
    }

    /// Destroy all of a group's (empty) buckets on this cluster.
    pub(crate) fn destroy_group(&mut self, group: GroupId) {
        for tier in Tier::ALL {
            if let Some(handle) = self.buckets.lookup(group, tier) {
                self.foreign.retain(|&h| h != handle);
                self.buckets.destroy(group, tier);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Invariants
    // -------------------------------------------------------------------------

    /// Conservation check: the aggregate count equals the sum over all
    /// root-bucket run-queues.
    pub(crate) fn verify_conservation(&self) {
        let bound_total: usize = self.bound.iter().map(|rb| rb.queue.len()).sum();
        let unbound_total: usize = self
            .unbound
            .iter()
            .flat_map(|rb| rb.queue.iter())
            .map(|(_, handle)| self.buckets.get(handle).count() as usize)
            .sum();
        assert_eq!(
            self.thread_count as usize,
            bound_total + unbound_total,
            "{}: runnable-thread conservation violated",
            self.cluster
        );
        assert_eq!(self.thread_count as usize, self.arena.len());
    }
}

// =============================================================================
// Tests
// =============================================================================
