//! # Scheduler Front End
//!
//! The process-wide registry tying the per-cluster hierarchies together,
//! and the [`Scheduler`] trait the dispatcher drives. Two implementations
//! share all of the hierarchy code and differ only in the multi-cluster
//! layer: [`ClutchScheduler`] for single-cluster machines (placement is
//! the identity, stealing and avoidance are no-ops) and [`EdgeScheduler`]
//! for multi-cluster ones. [`bring_up`] picks between them from the boot
//! topology.
//!
//! Lock discipline: one `spin::Mutex` per cluster guards that cluster's
//! whole hierarchy, and nothing suspends while holding it. Cross-cluster
//! work (placement snapshots, migration, stealing) takes the locks one at
//! a time; two cluster locks are never held together.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use hashbrown::HashMap;
use spin::{Mutex, RwLock};

use clutch_topology::{ClusterId, CoreKind, CpuId, Topology, MAX_CPUS};

use crate::config::SchedConfig;
use crate::edge::{self, ClusterLoad, RepreferencePolicy, StealDecision};
use crate::group::BucketGroup;
use crate::root::{InsertHint, RootClutch};
use crate::select::{select_highest, PrevThread, SelectMode, Selection};
use crate::thread::{GroupId, ThreadDesc, ThreadFlags, ThreadId};
use crate::tier::{Tier, TIER_COUNT};
use crate::{SchedError, SchedResult};

static_assertions::const_assert!(MAX_CPUS <= 64);

// =============================================================================
// Boundary Traits
// =============================================================================

/// Asynchronous "please reschedule" output: the one way the scheduler
/// influences a remote core. A kernel integrator backs this with an IPI;
/// tests record the calls.
pub trait CoreSignal: Send + Sync {
    /// Ask `cpu` to re-run selection at its next safe point.
    fn resched(&self, cpu: CpuId);
}

/// Load metrics exposed for the performance controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterMetrics {
    /// Runnable-thread depth.
    pub queue_depth: u32,
    /// Runnable shared-resource threads.
    pub shared_rsrc_load: u32,
    /// Runnable threads at or above the urgency priority.
    pub urgency: u32,
    /// Monotone count of enqueues since boot.
    pub cumulative_enqueues: u64,
}

/// The dispatcher-facing scheduler interface.
pub trait Scheduler: Send + Sync {
    /// The boot topology this scheduler was built for.
    fn topology(&self) -> &Topology;

    /// Thread-group creation notification.
    fn group_created(&self, group: GroupId) -> SchedResult<()>;

    /// Thread-group destruction notification. Fails while the group still
    /// has running or runnable threads.
    fn group_destroyed(&self, group: GroupId) -> SchedResult<()>;

    /// A thread became runnable after `blocked_ns` of voluntary blocking.
    /// Places it, inserts it, and signals a core of the chosen cluster if
    /// its aggregate priority rose. Returns the cluster it landed on.
    fn thread_runnable(
        &self,
        desc: ThreadDesc,
        hint: InsertHint,
        blocked_ns: u64,
        now: u64,
    ) -> SchedResult<ClusterId>;

    /// Remove an enqueued thread (termination, explicit migration).
    fn thread_removed(&self, cluster: ClusterId, id: ThreadId, now: u64) -> Option<ThreadDesc>;

    /// Run the selection state machine for `cpu`'s cluster.
    fn select(&self, cpu: CpuId, prev: Option<&PrevThread>, mode: SelectMode, now: u64)
        -> Selection;

    /// A selected thread started executing on `cpu`.
    fn thread_began(&self, cpu: CpuId, desc: &ThreadDesc, now: u64) -> SchedResult<()>;

    /// The thread on `cpu` stopped executing after `ran_ns` of CPU time.
    fn thread_ended(&self, cpu: CpuId, ran_ns: u64, now: u64) -> SchedResult<()>;

    /// `cpu` found nothing to run: try the steal ladder, or mark it idle.
    fn cpu_idle(&self, cpu: CpuId, now: u64) -> Option<ThreadDesc>;

    /// Mid-quantum check: should the thread on `cpu` give up its core?
    fn should_avoid(&self, cpu: CpuId) -> bool;

    /// Performance-controller input: change a group's preferred cluster
    /// for one tier, with migration policy.
    fn set_group_preference(
        &self,
        group: GroupId,
        tier: Tier,
        preferred: Option<ClusterId>,
        policy: RepreferencePolicy,
        now: u64,
    ) -> SchedResult<()>;

    /// Performance-controller input: cluster recommendation state.
    fn set_cluster_recommended(&self, cluster: ClusterId, recommended: bool);

    /// Load metrics for one cluster.
    fn metrics(&self, cluster: ClusterId) -> ClusterMetrics;
}

// =============================================================================
// Registry
// =============================================================================

/// One cluster's lock-guarded hierarchy plus its lock-free side state.
struct ClusterSched {
    hierarchy: Mutex<RootClutch>,
    recommended: AtomicBool,
    /// Foreign threads currently *running* on this cluster's cores.
    running_foreign: AtomicU32,
}

/// What one core is currently executing.
#[derive(Debug, Clone, Copy)]
struct RunningInfo {
    id: ThreadId,
    group: GroupId,
    tier: Tier,
    sched_pri: u8,
    shared_rsrc: bool,
    foreign: bool,
}

struct CpuState {
    idle: AtomicBool,
    running: Mutex<Option<RunningInfo>>,
}

/// One interactivity aggregate per tier of a thread group.
struct GroupEntry {
    tiers: [Arc<BucketGroup>; TIER_COUNT],
}

/// Process-wide scheduler state: one hierarchy per cluster, fixed at boot.
struct SchedCore {
    topology: Topology,
    config: SchedConfig,
    signal: Arc<dyn CoreSignal>,
    clusters: Vec<ClusterSched>,
    cpus: Vec<CpuState>,
    groups: RwLock<HashMap<GroupId, GroupEntry>>,
    /// Per-core rebalance request bits, set when running foreign threads
    /// should yield.
    rebalance: AtomicU64,
}

impl SchedCore {
    fn new(topology: Topology, config: SchedConfig, signal: Arc<dyn CoreSignal>) -> Self {
        let clusters = topology
            .clusters()
            .iter()
            .map(|desc| ClusterSched {
                hierarchy: Mutex::new(RootClutch::new(desc.id)),
                recommended: AtomicBool::new(true),
                running_foreign: AtomicU32::new(0),
            })
            .collect();
        let cpus = (0..MAX_CPUS)
            .map(|_| CpuState {
                idle: AtomicBool::new(false),
                running: Mutex::new(None),
            })
            .collect();
        Self {
            topology,
            config,
            signal,
            clusters,
            cpus,
            groups: RwLock::new(HashMap::new()),
            rebalance: AtomicU64::new(0),
        }
    }

    fn cluster_of(&self, cpu: CpuId) -> ClusterId {
        self.topology
            .cluster_of(cpu)
            .expect("cpu outside the boot topology")
    }

    /// The group's per-tier aggregate, cloned out of the table so no
    /// cluster lock is ever taken while the table lock is held.
    fn group_arc(&self, group: GroupId, tier: Tier) -> SchedResult<Arc<BucketGroup>> {
        let table = self.groups.read();
        let entry = table.get(&group).ok_or(SchedError::UnknownGroup(group))?;
        Ok(Arc::clone(&entry.tiers[tier.index()]))
    }

    fn check_cluster(&self, cluster: ClusterId) -> SchedResult<()> {
        if cluster.index() < self.clusters.len() {
            Ok(())
        } else {
            Err(SchedError::UnknownCluster(cluster))
        }
    }

    // -------------------------------------------------------------------------
    // Group lifecycle
    // -------------------------------------------------------------------------

    fn group_created(&self, group: GroupId) -> SchedResult<()> {
        let mut table = self.groups.write();
        if table.contains_key(&group) {
            return Err(SchedError::GroupExists(group));
        }
        let tiers = Tier::ALL.map(|tier| Arc::new(BucketGroup::new(group, tier)));
        table.insert(group, GroupEntry { tiers });
        log::debug!("{} created", group);
        Ok(())
    }

    fn group_destroyed(&self, group: GroupId) -> SchedResult<()> {
        {
            let table = self.groups.read();
            let entry = table.get(&group).ok_or(SchedError::UnknownGroup(group))?;
            for grp in &entry.tiers {
                if grp.run_count() > 0 || grp.pending_snapshot().0 > 0 {
                    return Err(SchedError::GroupBusy(group));
                }
            }
        }
        // The pending counters miss threads on the bound run-queues, so
        // each cluster is re-checked for stragglers under its own lock.
        // Buckets are created lazily; a partial destroy before a busy
        // cluster is found leaves nothing dangling.
        for cluster in &self.clusters {
            let mut rc = cluster.hierarchy.lock();
            if rc.has_group_threads(group) {
                return Err(SchedError::GroupBusy(group));
            }
            rc.destroy_group(group);
        }
        self.groups.write().remove(&group);
        log::debug!("{} destroyed", group);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Placement inputs
    // -------------------------------------------------------------------------

    /// Load snapshot of every cluster, taken one lock at a time.
    fn snapshot(&self) -> Vec<ClusterLoad> {
        self.topology
            .clusters()
            .iter()
            .map(|desc| {
                let cluster = &self.clusters[desc.id.index()];
                let idle_cpus = desc
                    .cpus
                    .iter()
                    .filter(|c| self.cpus[c.index()].idle.load(Ordering::Acquire))
                    .count() as u32;
                let rc = cluster.hierarchy.lock();
                ClusterLoad {
                    online: cluster.recommended.load(Ordering::Acquire),
                    idle_cpus,
                    cpu_count: desc.cpus.count() as u32,
                    queue_depth: rc.thread_count,
                    shared_rsrc_load: rc.shared_rsrc_load,
                    has_foreign: rc.has_foreign(),
                    running_foreign: cluster.running_foreign.load(Ordering::Acquire) > 0,
                }
            })
            .collect()
    }

    /// A group with no controller-assigned preference defaults to the
    /// first recommended cluster matching its tier's character.
    fn default_preferred(&self, tier: Tier) -> ClusterId {
        let kind = match tier {
            Tier::Utility | Tier::Background => CoreKind::Efficiency,
            _ => CoreKind::Performance,
        };
        let recommended =
            |c: &ClusterId| self.clusters[c.index()].recommended.load(Ordering::Acquire);
        self.topology
            .clusters_of_kind(kind)
            .find(recommended)
            .or_else(|| self.topology.clusters().iter().map(|d| d.id).find(|c| recommended(c)))
            .unwrap_or(ClusterId::new(0))
    }

    // -------------------------------------------------------------------------
    // Enqueue / dequeue
    // -------------------------------------------------------------------------

    /// Insert under the destination cluster's lock; signal a core if the
    /// cluster's aggregate priority rose.
    fn enqueue_on(
        &self,
        cluster: ClusterId,
        desc: ThreadDesc,
        grp: &Arc<BucketGroup>,
        hint: InsertHint,
        now: u64,
    ) {
        let preempt = self.clusters[cluster.index()]
            .hierarchy
            .lock()
            .insert(desc, grp, hint, now, &self.config);
        if preempt {
            self.kick_core(cluster, desc.sched_pri);
        }
    }

    /// Pick a core of `cluster` worth interrupting for a thread of `pri`:
    /// an idle core first, else the one running the lowest priority below
    /// `pri`.
    fn kick_core(&self, cluster: ClusterId, pri: u8) {
        let cpus = self.topology.cluster(cluster).cpus;
        let mut victim: Option<(CpuId, u8)> = None;
        for cpu in cpus.iter() {
            if self.cpus[cpu.index()].idle.load(Ordering::Acquire) {
                self.signal.resched(cpu);
                return;
            }
            let running = self.cpus[cpu.index()].running.lock();
            let running_pri = running.map_or(0, |r| r.sched_pri);
            if running_pri < pri && victim.map_or(true, |(_, v)| running_pri < v) {
                victim = Some((cpu, running_pri));
            }
        }
        if let Some((cpu, _)) = victim {
            self.signal.resched(cpu);
        }
    }

    fn thread_removed(&self, cluster: ClusterId, id: ThreadId, now: u64) -> Option<ThreadDesc> {
        self.clusters[cluster.index()]
            .hierarchy
            .lock()
            .remove_thread(id, now, &self.config)
    }

    // -------------------------------------------------------------------------
    // Dispatch bookkeeping
    // -------------------------------------------------------------------------

    fn select(
        &self,
        cpu: CpuId,
        prev: Option<&PrevThread>,
        mode: SelectMode,
        now: u64,
    ) -> Selection {
        let cluster = self.cluster_of(cpu);
        if mode != SelectMode::CheckPreempt {
            self.rebalance
                .fetch_and(!(1u64 << cpu.index()), Ordering::AcqRel);
        }
        let mut rc = self.clusters[cluster.index()].hierarchy.lock();
        select_highest(&mut rc, prev, mode, now, &self.config)
    }

    fn thread_began(&self, cpu: CpuId, desc: &ThreadDesc, _now: u64) -> SchedResult<()> {
        let cluster = self.cluster_of(cpu);
        let grp = self.group_arc(desc.group, desc.tier)?;
        grp.run_inc();
        let foreign = grp.preferred().is_some_and(|p| p != cluster);
        if foreign {
            self.clusters[cluster.index()]
                .running_foreign
                .fetch_add(1, Ordering::AcqRel);
        }
        let state = &self.cpus[cpu.index()];
        state.idle.store(false, Ordering::Release);
        *state.running.lock() = Some(RunningInfo {
            id: desc.id,
            group: desc.group,
            tier: desc.tier,
            sched_pri: desc.sched_pri,
            shared_rsrc: desc.flags.contains(ThreadFlags::SHARED_RESOURCE),
            foreign,
        });
        Ok(())
    }

    fn thread_ended(&self, cpu: CpuId, ran_ns: u64, _now: u64) -> SchedResult<()> {
        let cluster = self.cluster_of(cpu);
        let info = self.cpus[cpu.index()]
            .running
            .lock()
            .take()
            .ok_or(SchedError::NothingRunning(cpu))?;
        let grp = self.group_arc(info.group, info.tier)?;
        grp.record_used(ran_ns, &self.config);
        grp.run_dec();
        if info.foreign {
            let counter = &self.clusters[cluster.index()].running_foreign;
            let prior = counter.fetch_sub(1, Ordering::AcqRel);
            assert!(prior > 0, "running-foreign count underflow");
        }
        Ok(())
    }

    fn mark_idle(&self, cpu: CpuId) {
        self.cpus[cpu.index()].idle.store(true, Ordering::Release);
    }

    fn metrics(&self, cluster: ClusterId) -> ClusterMetrics {
        let rc = self.clusters[cluster.index()].hierarchy.lock();
        ClusterMetrics {
            queue_depth: rc.thread_count,
            shared_rsrc_load: rc.shared_rsrc_load,
            urgency: rc.urgency,
            cumulative_enqueues: rc.cumulative_enqueues,
        }
    }

    fn set_cluster_recommended(&self, cluster: ClusterId, recommended: bool) {
        self.clusters[cluster.index()]
            .recommended
            .store(recommended, Ordering::Release);
        log::debug!(
            "{} {}",
            cluster,
            if recommended { "recommended" } else { "derecommended" }
        );
    }
}

// =============================================================================
// Single-Cluster Scheduler
// =============================================================================

/// The single-cluster scheduler: every thread lives on cluster 0, and the
/// multi-cluster operations degenerate to no-ops.
pub struct ClutchScheduler {
    core: SchedCore,
}

impl Scheduler for ClutchScheduler {
    fn topology(&self) -> &Topology {
        &self.core.topology
    }

    fn group_created(&self, group: GroupId) -> SchedResult<()> {
        self.core.group_created(group)
    }

    fn group_destroyed(&self, group: GroupId) -> SchedResult<()> {
        self.core.group_destroyed(group)
    }

    fn thread_runnable(
        &self,
        desc: ThreadDesc,
        hint: InsertHint,
        blocked_ns: u64,
        now: u64,
    ) -> SchedResult<ClusterId> {
        let grp = self.core.group_arc(desc.group, desc.tier)?;
        if blocked_ns > 0 {
            grp.record_blocked(blocked_ns, &self.core.config);
        }
        let cluster = ClusterId::new(0);
        self.core.enqueue_on(cluster, desc, &grp, hint, now);
        Ok(cluster)
    }

    fn thread_removed(&self, cluster: ClusterId, id: ThreadId, now: u64) -> Option<ThreadDesc> {
        self.core.check_cluster(cluster).ok()?;
        self.core.thread_removed(cluster, id, now)
    }

    fn select(
        &self,
        cpu: CpuId,
        prev: Option<&PrevThread>,
        mode: SelectMode,
        now: u64,
    ) -> Selection {
        self.core.select(cpu, prev, mode, now)
    }

    fn thread_began(&self, cpu: CpuId, desc: &ThreadDesc, now: u64) -> SchedResult<()> {
        self.core.thread_began(cpu, desc, now)
    }

    fn thread_ended(&self, cpu: CpuId, ran_ns: u64, now: u64) -> SchedResult<()> {
        self.core.thread_ended(cpu, ran_ns, now)
    }

    fn cpu_idle(&self, cpu: CpuId, _now: u64) -> Option<ThreadDesc> {
        // Nowhere to steal from.
        self.core.mark_idle(cpu);
        None
    }

    fn should_avoid(&self, _cpu: CpuId) -> bool {
        false
    }

    fn set_group_preference(
        &self,
        group: GroupId,
        tier: Tier,
        preferred: Option<ClusterId>,
        _policy: RepreferencePolicy,
        _now: u64,
    ) -> SchedResult<()> {
        // Recorded for the metrics surface; there is nowhere to migrate.
        self.core.group_arc(group, tier)?.set_preferred(preferred);
        Ok(())
    }

    fn set_cluster_recommended(&self, cluster: ClusterId, recommended: bool) {
        self.core.set_cluster_recommended(cluster, recommended);
    }

    fn metrics(&self, cluster: ClusterId) -> ClusterMetrics {
        self.core.metrics(cluster)
    }
}

// =============================================================================
// Multi-Cluster Scheduler
// =============================================================================

/// The multi-cluster scheduler: Edge placement, idle stealing, avoidance
/// and re-preference migration on top of the shared hierarchy code.
pub struct EdgeScheduler {
    core: SchedCore,
}

impl EdgeScheduler {
    /// Two-phase migration target of the steal ladder.
    fn steal(&self, cpu: CpuId, thief: ClusterId, now: u64) -> Option<ThreadDesc> {
        let loads = self.core.snapshot();
        match edge::steal_decision(&self.core.topology, &loads, thief) {
            StealDecision::Foreign(src) => self.core.clusters[src.index()]
                .hierarchy
                .lock()
                .take_foreign(now, &self.core.config),
            StealDecision::Highest(src) => self.core.clusters[src.index()]
                .hierarchy
                .lock()
                .take_highest(now, &self.core.config),
            StealDecision::Rebalance => {
                self.request_rebalance(cpu);
                None
            }
            StealDecision::Nothing => None,
        }
    }

    /// Ask every core currently running a foreign thread to reschedule.
    fn request_rebalance(&self, requester: CpuId) {
        for desc in self.core.topology.clusters() {
            for cpu in desc.cpus.iter() {
                if cpu == requester {
                    continue;
                }
                let foreign = self.core.cpus[cpu.index()]
                    .running
                    .lock()
                    .map_or(false, |r| r.foreign);
                if foreign {
                    self.core
                        .rebalance
                        .fetch_or(1u64 << cpu.index(), Ordering::AcqRel);
                    self.core.signal.resched(cpu);
                }
            }
        }
    }
}

impl Scheduler for EdgeScheduler {
    fn topology(&self) -> &Topology {
        &self.core.topology
    }

    fn group_created(&self, group: GroupId) -> SchedResult<()> {
        self.core.group_created(group)
    }

    fn group_destroyed(&self, group: GroupId) -> SchedResult<()> {
        self.core.group_destroyed(group)
    }

    fn thread_runnable(
        &self,
        desc: ThreadDesc,
        hint: InsertHint,
        blocked_ns: u64,
        now: u64,
    ) -> SchedResult<ClusterId> {
        let grp = self.core.group_arc(desc.group, desc.tier)?;
        if blocked_ns > 0 {
            grp.record_blocked(blocked_ns, &self.core.config);
        }
        let cluster = match desc.bound {
            Some(cluster) => {
                self.core.check_cluster(cluster)?;
                cluster
            }
            None => {
                let preferred = grp
                    .preferred()
                    .unwrap_or_else(|| self.core.default_preferred(desc.tier));
                let shared = desc.flags.contains(ThreadFlags::SHARED_RESOURCE);
                let loads = self.core.snapshot();
                edge::place(&self.core.topology, &loads, preferred, shared)
            }
        };
        self.core.enqueue_on(cluster, desc, &grp, hint, now);
        Ok(cluster)
    }

    fn thread_removed(&self, cluster: ClusterId, id: ThreadId, now: u64) -> Option<ThreadDesc> {
        self.core.check_cluster(cluster).ok()?;
        self.core.thread_removed(cluster, id, now)
    }

    fn select(
        &self,
        cpu: CpuId,
        prev: Option<&PrevThread>,
        mode: SelectMode,
        now: u64,
    ) -> Selection {
        self.core.select(cpu, prev, mode, now)
    }

    fn thread_began(&self, cpu: CpuId, desc: &ThreadDesc, now: u64) -> SchedResult<()> {
        self.core.thread_began(cpu, desc, now)
    }

    fn thread_ended(&self, cpu: CpuId, ran_ns: u64, now: u64) -> SchedResult<()> {
        self.core.thread_ended(cpu, ran_ns, now)
    }

    fn cpu_idle(&self, cpu: CpuId, now: u64) -> Option<ThreadDesc> {
        let thief = self.core.cluster_of(cpu);
        let stolen = self.steal(cpu, thief, now);
        match &stolen {
            Some(desc) => {
                log::debug!("{} stole {} for {}", thief, desc.id, cpu);
                self.core.cpus[cpu.index()].idle.store(false, Ordering::Release);
            }
            None => self.core.mark_idle(cpu),
        }
        stolen
    }

    fn should_avoid(&self, cpu: CpuId) -> bool {
        let cluster = self.core.cluster_of(cpu);
        let shared = self.core.cpus[cpu.index()]
            .running
            .lock()
            .map_or(false, |r| r.shared_rsrc);
        let pending = self.core.rebalance.load(Ordering::Acquire) & (1u64 << cpu.index()) != 0;
        let loads = self.core.snapshot();
        edge::should_avoid(&self.core.topology, &loads, cluster, pending, shared)
    }

    fn set_group_preference(
        &self,
        group: GroupId,
        tier: Tier,
        preferred: Option<ClusterId>,
        policy: RepreferencePolicy,
        now: u64,
    ) -> SchedResult<()> {
        if let Some(cluster) = preferred {
            self.core.check_cluster(cluster)?;
        }
        let grp = self.core.group_arc(group, tier)?;
        grp.set_preferred(preferred);
        log::debug!("{} {} prefers {:?}", group, tier, preferred);

        for desc in self.core.topology.clusters() {
            let cluster = desc.id;
            if Some(cluster) == preferred {
                continue;
            }
            if policy.contains(RepreferencePolicy::MIGRATE_RUNNABLE) {
                // Two-phase: drain under the source lock, re-place each
                // thread with no lock held, insert under the destination
                // lock.
                let drained = self.core.clusters[cluster.index()]
                    .hierarchy
                    .lock()
                    .drain_group_tier(group, tier, now, &self.core.config);
                for thread in drained {
                    self.thread_runnable(thread, InsertHint::Tail, 0, now)?;
                }
            } else {
                self.core.clusters[cluster.index()]
                    .hierarchy
                    .lock()
                    .reclassify_group_tier(group, tier);
            }
        }

        if policy.contains(RepreferencePolicy::MIGRATE_RUNNING) {
            for desc in self.core.topology.clusters() {
                if Some(desc.id) == preferred {
                    continue;
                }
                for cpu in desc.cpus.iter() {
                    let ours = self.core.cpus[cpu.index()]
                        .running
                        .lock()
                        .map_or(false, |r| r.group == group && r.tier == tier);
                    if ours {
                        self.core
                            .rebalance
                            .fetch_or(1u64 << cpu.index(), Ordering::AcqRel);
                        self.core.signal.resched(cpu);
                    }
                }
            }
        }
        Ok(())
    }

    fn set_cluster_recommended(&self, cluster: ClusterId, recommended: bool) {
        self.core.set_cluster_recommended(cluster, recommended);
    }

    fn metrics(&self, cluster: ClusterId) -> ClusterMetrics {
        self.core.metrics(cluster)
    }
}

// =============================================================================
// Boot
// =============================================================================

/// Build the scheduler for a boot topology: [`ClutchScheduler`] for one
/// cluster, [`EdgeScheduler`] for more.
pub fn bring_up(
    topology: Topology,
    config: SchedConfig,
    signal: Arc<dyn CoreSignal>,
) -> Box<dyn Scheduler> {
    let multi = topology.cluster_count() > 1;
    log::info!(
        "scheduler up: {} clusters, {} cpus ({})",
        topology.cluster_count(),
        topology.cpu_count(),
        if multi { "edge" } else { "clutch" }
    );
    let core = SchedCore::new(topology, config, signal);
    if multi {
        Box::new(EdgeScheduler { core })
    } else {
        Box::new(ClutchScheduler { core })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use clutch_topology::{ClusterEdge, CpuSet, EdgeFlags, TopologyBuilder};

    struct RecordingSignal {
        calls: Mutex<Vec<CpuId>>,
    }

    impl RecordingSignal {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<CpuId> {
            core::mem::take(&mut *self.calls.lock())
        }
    }

    impl CoreSignal for RecordingSignal {
        fn resched(&self, cpu: CpuId) {
            self.calls.lock().push(cpu);
        }
    }

    fn single_topo() -> Topology {
        TopologyBuilder::new()
            .cluster(CoreKind::Performance, CpuSet::from_bits(0b11))
            .build()
            .unwrap()
    }

    /// Performance cluster 0 (cpus 0-1) and efficiency cluster 1
    /// (cpus 2-3), fully connected.
    fn dual_topo() -> Topology {
        let c0 = ClusterId::new(0);
        let c1 = ClusterId::new(1);
        let edge = ClusterEdge {
            migration_weight: 4,
            flags: EdgeFlags::MIGRATION_ALLOWED | EdgeFlags::STEAL_ALLOWED,
        };
        TopologyBuilder::new()
            .cluster(CoreKind::Performance, CpuSet::from_bits(0b0011))
            .cluster(CoreKind::Efficiency, CpuSet::from_bits(0b1100))
            .edge(c0, c1, edge)
            .edge(c1, c0, edge)
            .build()
            .unwrap()
    }

    fn desc(id: u64, group: u64, tier: Tier, pri: u8) -> ThreadDesc {
        ThreadDesc {
            id: ThreadId(id),
            group: GroupId(group),
            tier,
            base_pri: pri,
            sched_pri: pri,
            bound: None,
            flags: ThreadFlags::empty(),
        }
    }

    fn switched(sel: Selection) -> ThreadDesc {
        match sel {
            Selection::Switch(d) => d,
            other => panic!("expected Switch, got {:?}", other),
        }
    }

    #[test]
    fn test_single_cluster_end_to_end() {
        let signal = RecordingSignal::new();
        let sched = bring_up(single_topo(), SchedConfig::default(), signal.clone());
        sched.group_created(GroupId(1)).unwrap();

        let cluster = sched
            .thread_runnable(desc(1, 1, Tier::Default, 31), InsertHint::Tail, 0, 0)
            .unwrap();
        assert_eq!(cluster, ClusterId::new(0));
        assert_eq!(sched.metrics(cluster).queue_depth, 1);

        let cpu = CpuId::new(0);
        let d = switched(sched.select(cpu, None, SelectMode::RemoveForNewThread, 1));
        assert_eq!(d.id, ThreadId(1));
        assert_eq!(sched.metrics(cluster).queue_depth, 0);

        sched.thread_began(cpu, &d, 1).unwrap();
        sched.thread_ended(cpu, 3_000_000, 3_000_001).unwrap();
        assert_eq!(
            sched.select(cpu, None, SelectMode::RemoveForNewThread, 3_000_002),
            Selection::Idle
        );
        sched.group_destroyed(GroupId(1)).unwrap();
    }

    #[test]
    fn test_unknown_group_is_rejected() {
        let sched = bring_up(
            single_topo(),
            SchedConfig::default(),
            RecordingSignal::new(),
        );
        let err = sched
            .thread_runnable(desc(1, 9, Tier::Default, 31), InsertHint::Tail, 0, 0)
            .unwrap_err();
        assert_eq!(err, SchedError::UnknownGroup(GroupId(9)));
    }

    #[test]
    fn test_group_destroy_requires_quiescence() {
        let signal = RecordingSignal::new();
        let sched = bring_up(single_topo(), SchedConfig::default(), signal);
        sched.group_created(GroupId(1)).unwrap();
        sched
            .thread_runnable(desc(1, 1, Tier::Default, 31), InsertHint::Tail, 0, 0)
            .unwrap();
        assert_eq!(
            sched.group_destroyed(GroupId(1)),
            Err(SchedError::GroupBusy(GroupId(1)))
        );
        sched
            .thread_removed(ClusterId::new(0), ThreadId(1), 1)
            .unwrap();
        sched.group_destroyed(GroupId(1)).unwrap();
    }

    #[test]
    fn test_group_destroy_blocked_by_bound_runnable_thread() {
        let signal = RecordingSignal::new();
        let sched = bring_up(single_topo(), SchedConfig::default(), signal);
        sched.group_created(GroupId(1)).unwrap();

        // Bound threads take the bound run-queue and never touch the
        // group's pending counter; the destroy must still see them.
        let mut d = desc(1, 1, Tier::Default, 31);
        d.bound = Some(ClusterId::new(0));
        sched.thread_runnable(d, InsertHint::Tail, 0, 0).unwrap();
        assert_eq!(
            sched.group_destroyed(GroupId(1)),
            Err(SchedError::GroupBusy(GroupId(1)))
        );

        // The thread is still selectable and accountable afterwards.
        let cpu = CpuId::new(0);
        let got = switched(sched.select(cpu, None, SelectMode::RemoveForNewThread, 1));
        assert_eq!(got.id, ThreadId(1));
        sched.thread_began(cpu, &got, 1).unwrap();
        sched.thread_ended(cpu, 1_000, 1_001).unwrap();
        sched.group_destroyed(GroupId(1)).unwrap();
    }

    #[test]
    fn test_group_destroy_blocked_by_shared_resource_thread() {
        let signal = RecordingSignal::new();
        let sched = bring_up(single_topo(), SchedConfig::default(), signal);
        sched.group_created(GroupId(1)).unwrap();

        let mut d = desc(1, 1, Tier::Default, 31);
        d.flags = ThreadFlags::SHARED_RESOURCE;
        sched.thread_runnable(d, InsertHint::Tail, 0, 0).unwrap();
        assert_eq!(
            sched.group_destroyed(GroupId(1)),
            Err(SchedError::GroupBusy(GroupId(1)))
        );

        sched
            .thread_removed(ClusterId::new(0), ThreadId(1), 1)
            .unwrap();
        sched.group_destroyed(GroupId(1)).unwrap();
    }

    #[test]
    fn test_insert_signals_an_idle_core() {
        let signal = RecordingSignal::new();
        let sched = bring_up(single_topo(), SchedConfig::default(), signal.clone());
        sched.group_created(GroupId(1)).unwrap();
        assert!(sched.cpu_idle(CpuId::new(1), 0).is_none());

        sched
            .thread_runnable(desc(1, 1, Tier::Default, 31), InsertHint::Tail, 0, 0)
            .unwrap();
        assert_eq!(signal.take(), vec![CpuId::new(1)]);
    }

    #[test]
    fn test_insert_preempts_lowest_running_core() {
        let signal = RecordingSignal::new();
        let sched = bring_up(single_topo(), SchedConfig::default(), signal.clone());
        sched.group_created(GroupId(1)).unwrap();
        let d0 = desc(1, 1, Tier::Default, 40);
        let d1 = desc(2, 1, Tier::Default, 20);
        sched.thread_began(CpuId::new(0), &d0, 0).unwrap();
        sched.thread_began(CpuId::new(1), &d1, 0).unwrap();

        sched
            .thread_runnable(desc(3, 1, Tier::Foreground, 60), InsertHint::Tail, 0, 1)
            .unwrap();
        assert_eq!(signal.take(), vec![CpuId::new(1)]);
    }

    #[test]
    fn test_scenario_e_placement_prefers_idle_cluster() {
        let signal = RecordingSignal::new();
        let sched = bring_up(dual_topo(), SchedConfig::default(), signal);
        sched.group_created(GroupId(1)).unwrap();

        // Load the performance cluster; its cores are busy, the
        // efficiency cluster's cores are idle.
        for id in 1..=3 {
            sched
                .thread_runnable(desc(id, 1, Tier::Default, 31), InsertHint::Tail, 0, 0)
                .unwrap();
        }
        assert!(sched.cpu_idle(CpuId::new(2), 0).is_none());
        assert!(sched.cpu_idle(CpuId::new(3), 0).is_none());

        // A new thread preferring the loaded cluster lands on the idle
        // one.
        let dst = sched
            .thread_runnable(desc(9, 1, Tier::Default, 31), InsertHint::Tail, 0, 1)
            .unwrap();
        assert_eq!(dst, ClusterId::new(1));
        assert_eq!(sched.metrics(ClusterId::new(1)).queue_depth, 1);
    }

    #[test]
    fn test_bound_thread_skips_placement() {
        let sched = bring_up(
            dual_topo(),
            SchedConfig::default(),
            RecordingSignal::new(),
        );
        sched.group_created(GroupId(1)).unwrap();
        let mut d = desc(1, 1, Tier::Default, 31);
        d.bound = Some(ClusterId::new(1));
        let dst = sched.thread_runnable(d, InsertHint::Tail, 0, 0).unwrap();
        assert_eq!(dst, ClusterId::new(1));
    }

    #[test]
    fn test_idle_steal_pulls_foreign_thread() {
        let signal = RecordingSignal::new();
        let sched = bring_up(dual_topo(), SchedConfig::default(), signal);
        sched.group_created(GroupId(1)).unwrap();

        // The group prefers cluster 0, but its thread is enqueued on
        // cluster 1 (hard-bound enqueue would use the bound queue, so
        // re-preference the group after a normal insert instead).
        sched
            .set_group_preference(
                GroupId(1),
                Tier::Default,
                Some(ClusterId::new(1)),
                RepreferencePolicy::empty(),
                0,
            )
            .unwrap();
        let dst = sched
            .thread_runnable(desc(1, 1, Tier::Default, 31), InsertHint::Tail, 0, 0)
            .unwrap();
        assert_eq!(dst, ClusterId::new(1));
        sched
            .set_group_preference(
                GroupId(1),
                Tier::Default,
                Some(ClusterId::new(0)),
                RepreferencePolicy::empty(),
                1,
            )
            .unwrap();

        // An idle core on the preferred cluster steals it back.
        let stolen = sched.cpu_idle(CpuId::new(0), 2).unwrap();
        assert_eq!(stolen.id, ThreadId(1));
        assert_eq!(sched.metrics(ClusterId::new(1)).queue_depth, 0);
    }

    #[test]
    fn test_repreference_migrates_runnable_threads() {
        let signal = RecordingSignal::new();
        let sched = bring_up(dual_topo(), SchedConfig::default(), signal);
        sched.group_created(GroupId(1)).unwrap();
        for id in 1..=2 {
            let dst = sched
                .thread_runnable(desc(id, 1, Tier::Default, 31), InsertHint::Tail, 0, 0)
                .unwrap();
            assert_eq!(dst, ClusterId::new(0));
        }

        sched
            .set_group_preference(
                GroupId(1),
                Tier::Default,
                Some(ClusterId::new(1)),
                RepreferencePolicy::MIGRATE_RUNNABLE,
                1,
            )
            .unwrap();
        assert_eq!(sched.metrics(ClusterId::new(0)).queue_depth, 0);
        assert_eq!(sched.metrics(ClusterId::new(1)).queue_depth, 2);
    }

    #[test]
    fn test_repreference_signals_running_threads() {
        let signal = RecordingSignal::new();
        let sched = bring_up(dual_topo(), SchedConfig::default(), signal.clone());
        sched.group_created(GroupId(1)).unwrap();
        let d = desc(1, 1, Tier::Default, 31);
        sched.thread_began(CpuId::new(2), &d, 0).unwrap();
        // An idle performance core makes the rebalance target eligible.
        assert!(sched.cpu_idle(CpuId::new(0), 0).is_none());
        signal.take();

        sched
            .set_group_preference(
                GroupId(1),
                Tier::Default,
                Some(ClusterId::new(0)),
                RepreferencePolicy::MIGRATE_RUNNING,
                1,
            )
            .unwrap();
        assert_eq!(signal.take(), vec![CpuId::new(2)]);
        assert!(sched.should_avoid(CpuId::new(2)));
    }

    #[test]
    fn test_idle_core_requests_rebalance_for_running_foreign() {
        let signal = RecordingSignal::new();
        let sched = bring_up(dual_topo(), SchedConfig::default(), signal.clone());
        sched.group_created(GroupId(1)).unwrap();

        // A thread of a cluster-0-preferring group runs on cluster 1.
        sched
            .set_group_preference(
                GroupId(1),
                Tier::Default,
                Some(ClusterId::new(0)),
                RepreferencePolicy::empty(),
                0,
            )
            .unwrap();
        let d = desc(1, 1, Tier::Default, 31);
        sched.thread_began(CpuId::new(2), &d, 0).unwrap();
        signal.take();

        // An idle cluster-0 core finds nothing queued, so it signals the
        // core running the foreign thread instead of stealing.
        assert!(sched.cpu_idle(CpuId::new(0), 1).is_none());
        assert_eq!(signal.take(), vec![CpuId::new(2)]);
    }

    #[test]
    fn test_blocked_time_feeds_interactivity() {
        let signal = RecordingSignal::new();
        let sched = bring_up(single_topo(), SchedConfig::default(), signal);
        sched.group_created(GroupId(1)).unwrap();

        // A long voluntary block raises the group's blocked counter.
        sched
            .thread_runnable(desc(1, 1, Tier::Default, 31), InsertHint::Tail, 5_000_000, 10)
            .unwrap();
        let cpu = CpuId::new(0);
        let d = switched(sched.select(cpu, None, SelectMode::RemoveForNewThread, 11));
        sched.thread_began(cpu, &d, 11).unwrap();
        sched.thread_ended(cpu, 1_000_000, 1_000_011).unwrap();
        sched.group_destroyed(GroupId(1)).unwrap();
    }
}
