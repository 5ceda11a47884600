//! # Thread Records
//!
//! Scheduling-visible thread state and the per-cluster arena it lives in
//! while enqueued.
//!
//! A runnable thread is simultaneously a member of three orders inside its
//! clutch bucket: the effective-priority order (selection), the
//! base-priority order (bucket priority computation) and the enqueue FIFO
//! (decay scans and drains). To keep triple membership safe the arena hands
//! out stable indices and every order links records by index, never by
//! pointer; removing a record from one order cannot dangle the others.
//!
//! Records exist only while a thread is enqueued: insertion copies a
//! [`ThreadDesc`] in, removal moves it back out. Cross-cluster migration is
//! therefore a move of plain data under two locks taken one after the other,
//! never a shared reference.

use alloc::vec::Vec;
use core::fmt;

use clutch_topology::ClusterId;

use crate::tier::Tier;

// =============================================================================
// Identity
// =============================================================================

/// Kernel-assigned thread identity, opaque to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

/// Kernel-assigned thread-group identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group{}", self.0)
    }
}

bitflags::bitflags! {
    /// Per-thread scheduling flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadFlags: u8 {
        /// Heavy user of a contended cross-core resource; routed through
        /// the bound run-queue and balanced by the shared-resource load
        /// counter instead of ordinary queue depth.
        const SHARED_RESOURCE = 1 << 0;
    }
}

/// Everything the scheduler needs to know about one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadDesc {
    /// Thread identity.
    pub id: ThreadId,
    /// Owning thread group.
    pub group: GroupId,
    /// QoS tier.
    pub tier: Tier,
    /// Base priority within the tier's band.
    pub base_pri: u8,
    /// Effective (possibly promoted) priority; selection order.
    pub sched_pri: u8,
    /// Hard cluster binding, if any.
    pub bound: Option<ClusterId>,
    /// Scheduling flags.
    pub flags: ThreadFlags,
}

impl ThreadDesc {
    /// Whether this thread takes the bound run-queue path on `cluster`:
    /// hard-bound there, or a shared-resource thread.
    pub fn uses_bound_runq(&self, cluster: ClusterId) -> bool {
        self.bound == Some(cluster) || self.flags.contains(ThreadFlags::SHARED_RESOURCE)
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Sentinel for "no link".
const NIL: u32 = u32::MAX;

/// Stable handle to an enqueued thread record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ThreadIdx(u32);

impl ThreadIdx {
    pub(crate) const fn raw(self) -> u32 {
        self.0
    }

    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

/// Which of the three intrusive orders a link operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Order {
    /// Effective-priority order (descending, FIFO within a level).
    Run = 0,
    /// Base-priority order (descending, FIFO within a level).
    Base = 1,
    /// Plain enqueue FIFO.
    Fifo = 2,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: u32,
    next: u32,
}

impl Link {
    const UNLINKED: Self = Self {
        prev: NIL,
        next: NIL,
    };
}

/// An enqueued thread and its intrusive links.
#[derive(Debug)]
pub(crate) struct ThreadRecord {
    pub(crate) desc: ThreadDesc,
    links: [Link; 3],
}

/// Slab of thread records with a free list; indices are stable for the
/// lifetime of the record.
#[derive(Debug, Default)]
pub(crate) struct ThreadArena {
    slots: Vec<Option<ThreadRecord>>,
    free: Vec<u32>,
    len: usize,
}

impl ThreadArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Move a descriptor into the arena.
    pub(crate) fn alloc(&mut self, desc: ThreadDesc) -> ThreadIdx {
        let record = ThreadRecord {
            desc,
            links: [Link::UNLINKED; 3],
        };
        self.len += 1;
        if let Some(slot) = self.free.pop() {
            self.slots[slot as usize] = Some(record);
            ThreadIdx(slot)
        } else {
            self.slots.push(Some(record));
            ThreadIdx((self.slots.len() - 1) as u32)
        }
    }

    /// Move a descriptor back out, releasing the slot.
    ///
    /// The record must already be unlinked from every order.
    pub(crate) fn release(&mut self, idx: ThreadIdx) -> ThreadDesc {
        let record = self.slots[idx.0 as usize]
            .take()
            .expect("releasing a free thread slot");
        for link in record.links {
            assert!(
                link.prev == NIL && link.next == NIL,
                "releasing a thread record still linked into an order"
            );
        }
        self.free.push(idx.0);
        self.len -= 1;
        record.desc
    }

    pub(crate) fn get(&self, idx: ThreadIdx) -> &ThreadRecord {
        self.slots[idx.0 as usize]
            .as_ref()
            .expect("dangling thread index")
    }

    fn link_mut(&mut self, idx: u32, order: Order) -> &mut Link {
        &mut self.slots[idx as usize]
            .as_mut()
            .expect("dangling thread index")
            .links[order as usize]
    }

    fn link(&self, idx: u32, order: Order) -> Link {
        self.slots[idx as usize]
            .as_ref()
            .expect("dangling thread index")
            .links[order as usize]
    }
}

// =============================================================================
// Intrusive Lists
// =============================================================================

/// A doubly-linked list threaded through one [`Order`] of arena records.
#[derive(Debug)]
pub(crate) struct ThreadList {
    order: Order,
    head: u32,
    tail: u32,
    len: u32,
}

impl ThreadList {
    pub(crate) const fn new(order: Order) -> Self {
        Self {
            order,
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> u32 {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn front(&self) -> Option<ThreadIdx> {
        if self.head == NIL {
            None
        } else {
            Some(ThreadIdx(self.head))
        }
    }

    /// Append at the tail.
    pub(crate) fn push_back(&mut self, arena: &mut ThreadArena, idx: ThreadIdx) {
        self.insert_after(arena, self.tail, idx);
    }

    /// Insert maintaining descending order of `pri_of`; equal-priority
    /// records go behind existing ones (`at_front == false`, FIFO) or in
    /// front of them (`at_front == true`).
    pub(crate) fn insert_by_pri(
        &mut self,
        arena: &mut ThreadArena,
        idx: ThreadIdx,
        pri_of: fn(&ThreadRecord) -> u8,
        at_front: bool,
    ) {
        let pri = pri_of(arena.get(idx));
        // Find the last record that stays in front of the new one.
        let mut after = NIL;
        let mut cursor = self.head;
        while cursor != NIL {
            let cur_pri = pri_of(arena.get(ThreadIdx(cursor)));
            let stays_ahead = if at_front { cur_pri > pri } else { cur_pri >= pri };
            if !stays_ahead {
                break;
            }
            after = cursor;
            cursor = arena.link(cursor, self.order).next;
        }
        self.insert_after(arena, after, idx);
    }

    /// Unlink a record from this order.
    pub(crate) fn remove(&mut self, arena: &mut ThreadArena, idx: ThreadIdx) {
        let link = arena.link(idx.0, self.order);
        if link.prev == NIL {
            debug_assert_eq!(self.head, idx.0);
            self.head = link.next;
        } else {
            arena.link_mut(link.prev, self.order).next = link.next;
        }
        if link.next == NIL {
            debug_assert_eq!(self.tail, idx.0);
            self.tail = link.prev;
        } else {
            arena.link_mut(link.next, self.order).prev = link.prev;
        }
        *arena.link_mut(idx.0, self.order) = Link::UNLINKED;
        self.len -= 1;
    }

    /// Remove and return the head record.
    pub(crate) fn pop_front(&mut self, arena: &mut ThreadArena) -> Option<ThreadIdx> {
        let front = self.front()?;
        self.remove(arena, front);
        Some(front)
    }

    /// Iterate head to tail.
    pub(crate) fn iter<'a>(&'a self, arena: &'a ThreadArena) -> impl Iterator<Item = ThreadIdx> + 'a {
        let order = self.order;
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            if cursor == NIL {
                None
            } else {
                let idx = ThreadIdx(cursor);
                cursor = arena.link(cursor, order).next;
                Some(idx)
            }
        })
    }

    fn insert_after(&mut self, arena: &mut ThreadArena, after: u32, idx: ThreadIdx) {
        let next = if after == NIL {
            let old_head = self.head;
            self.head = idx.0;
            old_head
        } else {
            let n = arena.link(after, self.order).next;
            arena.link_mut(after, self.order).next = idx.0;
            n
        };
        if next == NIL {
            self.tail = idx.0;
        } else {
            arena.link_mut(next, self.order).prev = idx.0;
        }
        *arena.link_mut(idx.0, self.order) = Link {
            prev: after,
            next,
        };
        self.len += 1;
    }
}

// =============================================================================
// Tests
// =============================================================================
