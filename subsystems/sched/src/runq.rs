//! # Bitmap Priority Run-Queues
//!
//! A multi-level FIFO queue over opaque `u32` handles with O(1)
//! highest-level lookup via a 2×u64 bitmap. Used twice in the hierarchy:
//! root buckets queue clutch-bucket handles by bucket priority, and bound
//! root buckets queue thread-record handles by effective priority.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::config::NUM_PRI;

/// Priority-bucketed FIFO queue with bitmap-indexed level lookup.
///
/// Level `p` set in the bitmap ⇔ `levels[p]` is non-empty.
#[derive(Debug)]
pub(crate) struct PriRunQueue {
    levels: Vec<VecDeque<u32>>,
    bits: [u64; 2],
    count: usize,
}

impl PriRunQueue {
    pub(crate) fn new() -> Self {
        let mut levels = Vec::with_capacity(NUM_PRI);
        for _ in 0..NUM_PRI {
            levels.push(VecDeque::new());
        }
        Self {
            levels,
            bits: [0; 2],
            count: 0,
        }
    }

    /// Enqueue a handle at `pri`, at the front or back of its level.
    pub(crate) fn insert(&mut self, pri: u8, handle: u32, front: bool) {
        let p = (pri as usize).min(NUM_PRI - 1);
        if front {
            self.levels[p].push_front(handle);
        } else {
            self.levels[p].push_back(handle);
        }
        self.bits[p / 64] |= 1u64 << (p % 64);
        self.count += 1;
    }

    /// Remove a specific handle from its level.
    ///
    /// # Panics
    ///
    /// Panics if the handle is not queued at `pri` — membership is tracked
    /// by the caller, so a miss is an accounting bug.
    pub(crate) fn remove(&mut self, pri: u8, handle: u32) {
        let p = (pri as usize).min(NUM_PRI - 1);
        let pos = self.levels[p]
            .iter()
            .position(|&h| h == handle)
            .expect("handle missing from its run-queue level");
        self.levels[p].remove(pos);
        if self.levels[p].is_empty() {
            self.bits[p / 64] &= !(1u64 << (p % 64));
        }
        self.count -= 1;
    }

    /// Move a handle to the back of its level (same-priority round robin).
    pub(crate) fn rotate_to_back(&mut self, pri: u8, handle: u32) {
        let p = (pri as usize).min(NUM_PRI - 1);
        if self.levels[p].len() < 2 {
            return;
        }
        let pos = self.levels[p]
            .iter()
            .position(|&h| h == handle)
            .expect("handle missing from its run-queue level");
        self.levels[p].remove(pos);
        self.levels[p].push_back(handle);
    }

    /// Highest non-empty level.
    pub(crate) fn highest(&self) -> Option<u8> {
        if self.bits[1] != 0 {
            Some((127 - self.bits[1].leading_zeros()) as u8)
        } else if self.bits[0] != 0 {
            Some((63 - self.bits[0].leading_zeros()) as u8)
        } else {
            None
        }
    }

    /// Front handle of the highest non-empty level.
    pub(crate) fn front(&self) -> Option<(u8, u32)> {
        let p = self.highest()?;
        Some((p, self.levels[p as usize][0]))
    }

    /// Remove and return the front handle of the highest level.
    pub(crate) fn pop_front(&mut self) -> Option<(u8, u32)> {
        let p = self.highest()? as usize;
        let handle = self.levels[p].pop_front()?;
        if self.levels[p].is_empty() {
            self.bits[p / 64] &= !(1u64 << (p % 64));
        }
        self.count -= 1;
        Some((p as u8, handle))
    }

    /// Total queued handles. O(1).
    pub(crate) fn len(&self) -> usize {
        self.count
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterate all handles, highest level first, FIFO within a level.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (u8, u32)> + '_ {
        (0..NUM_PRI)
            .rev()
            .flat_map(move |p| self.levels[p].iter().map(move |&h| (p as u8, h)))
    }
}
