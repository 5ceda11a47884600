//! # Clutch Buckets
//!
//! A clutch bucket is the per-(thread-group, tier, cluster) container of
//! runnable threads. Its priority is derived, not stored policy: the
//! highest base priority among member threads plus the owning bucket
//! group's interactivity score. Buckets are what root buckets queue, so a
//! well-behaved (blocked-dominant) group's threads outrank CPU-hungry
//! threads of equal base priority.

use alloc::sync::Arc;

use crate::config::{SchedConfig, MAX_PRI};
use crate::group::BucketGroup;
use crate::thread::{GroupId, Order, ThreadArena, ThreadIdx, ThreadList, ThreadRecord};
use crate::tier::Tier;

fn sched_pri_of(r: &ThreadRecord) -> u8 {
    r.desc.sched_pri
}

fn base_pri_of(r: &ThreadRecord) -> u8 {
    r.desc.base_pri
}

/// Runnable-thread container for one (group, tier) on one cluster.
#[derive(Debug)]
pub(crate) struct ClutchBucket {
    pub(crate) group: GroupId,
    pub(crate) tier: Tier,
    /// Cross-cluster aggregate shared with this group's buckets elsewhere.
    pub(crate) grp: Arc<BucketGroup>,
    /// Members by effective priority; selection order.
    run: ThreadList,
    /// Members by base priority; priority computation order.
    base: ThreadList,
    /// Members in enqueue order; decay scans and drains.
    fifo: ThreadList,
    /// Cached priority, valid while the bucket is queued in its root bucket.
    pub(crate) pri: u8,
    /// Whether the bucket currently sits in its root bucket's run-queue.
    pub(crate) queued: bool,
    /// Edge classification: enqueued away from its group's preferred
    /// cluster.
    pub(crate) foreign: bool,
}

impl ClutchBucket {
    pub(crate) fn new(group: GroupId, tier: Tier, grp: Arc<BucketGroup>) -> Self {
        Self {
            group,
            tier,
            grp,
            run: ThreadList::new(Order::Run),
            base: ThreadList::new(Order::Base),
            fifo: ThreadList::new(Order::Fifo),
            pri: 0,
            queued: false,
            foreign: false,
        }
    }

    /// Member count.
    pub(crate) fn count(&self) -> u32 {
        self.run.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.run.is_empty()
    }

    /// Link a thread into all three orders. `at_front` puts it ahead of
    /// equal-priority members (head insertion hint).
    pub(crate) fn insert(&mut self, arena: &mut ThreadArena, idx: ThreadIdx, at_front: bool) {
        self.run.insert_by_pri(arena, idx, sched_pri_of, at_front);
        self.base.insert_by_pri(arena, idx, base_pri_of, false);
        self.fifo.push_back(arena, idx);
    }

    /// Unlink a thread from all three orders.
    pub(crate) fn remove(&mut self, arena: &mut ThreadArena, idx: ThreadIdx) {
        self.run.remove(arena, idx);
        self.base.remove(arena, idx);
        self.fifo.remove(arena, idx);
    }

    /// Highest effective-priority member.
    pub(crate) fn highest(&self, _arena: &ThreadArena) -> Option<ThreadIdx> {
        self.run.front()
    }

    /// Members in enqueue order; used when draining for migration.
    pub(crate) fn fifo_order<'a>(
        &'a self,
        arena: &'a ThreadArena,
    ) -> impl Iterator<Item = ThreadIdx> + 'a {
        self.fifo.iter(arena)
    }

    /// Recompute the bucket's priority: max member base priority plus the
    /// group's interactivity score, saturating at the top of the band.
    pub(crate) fn compute_pri(&self, arena: &ThreadArena, now: u64, config: &SchedConfig) -> u8 {
        let Some(front) = self.base.front() else {
            return 0;
        };
        let base = arena.get(front).desc.base_pri;
        let score = self.grp.score(now, config);
        base.saturating_add(score).min(MAX_PRI)
    }
}
