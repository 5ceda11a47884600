//! # Clutch/Edge Scheduler
//!
//! A hierarchical, multi-cluster, QoS-aware thread scheduler core. Each
//! cluster of cores owns a three-level hierarchy: scheduling tiers (root
//! buckets, chosen by earliest-deadline-first with warp and starvation
//! windows), per-thread-group clutch buckets inside each tier (chosen by
//! priority derived from the group's interactivity score), and threads
//! inside each bucket. On multi-cluster machines the Edge layer adds
//! load-aware placement, idle stealing, and migration along a weighted
//! directed cluster graph.
//!
//! ## Structure
//!
//! - A [`Scheduler`] is built once at boot by [`bring_up`] from a
//!   [`clutch_topology::Topology`] and a [`SchedConfig`].
//! - The dispatcher drives it: [`Scheduler::thread_runnable`],
//!   [`Scheduler::select`], [`Scheduler::cpu_idle`],
//!   [`Scheduler::should_avoid`].
//! - The performance controller feeds it group lifecycle and cluster
//!   preference inputs and reads back [`ClusterMetrics`].
//!
//! All time is caller-supplied nanoseconds; the crate never reads a
//! clock. All state is in-memory and lives for the kernel's lifetime.
//! Hierarchy-internal operations are infallible by construction;
//! accounting violations are fatal panics, and only the boundary
//! surfaces return [`SchedError`].

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

use clutch_topology::{ClusterId, CpuId};

mod bucket;
mod group;
mod root;
mod runq;
mod select;

pub mod config;
pub mod edge;
pub mod scheduler;
pub mod thread;
pub mod tier;

pub use config::{SchedConfig, TierParams};
pub use edge::{ClusterLoad, RepreferencePolicy};
pub use root::InsertHint;
pub use scheduler::{
    bring_up, ClusterMetrics, ClutchScheduler, CoreSignal, EdgeScheduler, Scheduler,
};
pub use select::{PrevThread, SelectMode, Selection};
pub use thread::{GroupId, ThreadDesc, ThreadFlags, ThreadId};
pub use tier::Tier;

/// Errors raised at the scheduler's boundary surfaces. The hierarchy
/// operations themselves always succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// The thread group was never announced via group creation.
    UnknownGroup(GroupId),
    /// A cluster id outside the boot topology.
    UnknownCluster(ClusterId),
    /// The thread group is already registered.
    GroupExists(GroupId),
    /// The thread group still has running or runnable threads.
    GroupBusy(GroupId),
    /// No thread is recorded as running on the core.
    NothingRunning(CpuId),
}

/// Result alias for boundary operations.
pub type SchedResult<T> = Result<T, SchedError>;
