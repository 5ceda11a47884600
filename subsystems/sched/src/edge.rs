//! # Edge: Multi-Cluster Placement, Avoidance, Stealing
//!
//! The decision half of the multi-cluster layer. Every function here is a
//! pure computation over a [`Topology`] and per-cluster [`ClusterLoad`]
//! snapshots; the scheduler takes the snapshots one cluster lock at a
//! time, decides here, then mutates under the destination lock. Two
//! cluster locks are never held together.

use arrayvec::ArrayVec;
use bitflags::bitflags;

use clutch_topology::{ClusterId, CoreKind, Topology, MAX_CLUSTERS};

bitflags! {
    /// Controller-supplied policy for a group re-preference notification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RepreferencePolicy: u32 {
        /// Drain runnable buckets off non-preferred clusters and re-place
        /// them immediately, rather than reclassifying lazily.
        const MIGRATE_RUNNABLE = 1 << 0;
        /// Signal cores currently running the group's threads on
        /// non-preferred clusters to reschedule.
        const MIGRATE_RUNNING = 1 << 1;
    }
}

/// Load snapshot of one cluster, taken under its lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterLoad {
    /// Whether the cluster accepts work at all.
    pub online: bool,
    /// Cores currently idle.
    pub idle_cpus: u32,
    /// Total cores.
    pub cpu_count: u32,
    /// Runnable-thread depth.
    pub queue_depth: u32,
    /// Runnable shared-resource threads.
    pub shared_rsrc_load: u32,
    /// Whether any queued bucket is classified foreign.
    pub has_foreign: bool,
    /// Whether a foreign thread is currently *running* here.
    pub running_foreign: bool,
}

impl ClusterLoad {
    fn load(&self, shared_rsrc: bool) -> u32 {
        if shared_rsrc {
            self.shared_rsrc_load
        } else {
            self.queue_depth
        }
    }

    fn idle(&self) -> bool {
        self.online && self.idle_cpus > 0
    }
}

// =============================================================================
// Placement
// =============================================================================

/// Pick the cluster a newly runnable thread should enqueue on.
///
/// The preferred cluster wins outright when it has an idle core. Otherwise
/// outgoing migration-allowed edges are walked: an idle candidate
/// short-circuits (homogeneous ones first), else the candidate with the
/// largest load gap that clears the edge's migration weight. With no
/// viable candidate the thread stays on the preferred cluster — placement
/// degrades, it never fails.
pub(crate) fn place(
    topology: &Topology,
    loads: &[ClusterLoad],
    preferred: ClusterId,
    shared_rsrc: bool,
) -> ClusterId {
    let preferred = resolve_preferred(topology, loads, preferred);
    let pref_load = &loads[preferred.index()];
    if pref_load.idle() {
        return preferred;
    }

    let mut idle: ArrayVec<ClusterId, MAX_CLUSTERS> = ArrayVec::new();
    let mut best: Option<(ClusterId, u32)> = None;
    for desc in topology.clusters() {
        let dst = desc.id;
        if dst == preferred || !loads[dst.index()].online {
            continue;
        }
        let edge = topology.edge(preferred, dst);
        if !edge.migration_allowed() {
            continue;
        }
        if loads[dst.index()].idle() {
            idle.push(dst);
            continue;
        }
        let gain = pref_load
            .load(shared_rsrc)
            .saturating_sub(loads[dst.index()].load(shared_rsrc));
        if gain < edge.migration_weight {
            continue;
        }
        let better = match best {
            None => true,
            Some((cur, cur_gain)) => {
                gain > cur_gain
                    || (gain == cur_gain
                        && topology.homogeneous(preferred, dst)
                        && !topology.homogeneous(preferred, cur))
            }
        };
        if better {
            best = Some((dst, gain));
        }
    }

    if let Some(&dst) = idle
        .iter()
        .find(|&&c| topology.homogeneous(preferred, c))
        .or_else(|| idle.first())
    {
        log::debug!("placement: {} loaded, idle candidate {}", preferred, dst);
        return dst;
    }
    match best {
        Some((dst, gain)) => {
            log::debug!("placement: {} -> {} (load gap {})", preferred, dst, gain);
            dst
        }
        None => preferred,
    }
}

/// An offline preferred cluster is replaced by a same-kind online cluster
/// (least loaded), else any online cluster. With nothing online the
/// original preference stands; placement degrades rather than failing.
fn resolve_preferred(
    topology: &Topology,
    loads: &[ClusterLoad],
    preferred: ClusterId,
) -> ClusterId {
    if loads[preferred.index()].online {
        return preferred;
    }
    let kind = topology.cluster(preferred).kind;
    let fallback = topology
        .clusters_of_kind(kind)
        .filter(|c| loads[c.index()].online)
        .min_by_key(|c| loads[c.index()].queue_depth)
        .or_else(|| {
            topology
                .clusters()
                .iter()
                .map(|d| d.id)
                .filter(|c| loads[c.index()].online)
                .min_by_key(|c| loads[c.index()].queue_depth)
        });
    match fallback {
        Some(c) => {
            log::warn!("placement: preferred {} offline, degrading to {}", preferred, c);
            c
        }
        None => {
            log::warn!("placement: no online cluster, keeping {}", preferred);
            preferred
        }
    }
}

// =============================================================================
// Avoid-Processor
// =============================================================================

/// Mid-quantum check: should the thread running on `current` give up its
/// core so it can move?
pub(crate) fn should_avoid(
    topology: &Topology,
    loads: &[ClusterLoad],
    current: ClusterId,
    rebalance_pending: bool,
    shared_rsrc: bool,
) -> bool {
    let reachable = |dst: ClusterId| {
        dst != current
            && loads[dst.index()].online
            && topology.edge(current, dst).migration_allowed()
    };

    for desc in topology.clusters() {
        let dst = desc.id;
        if !reachable(dst) {
            continue;
        }
        // A same-or-better idle cluster; efficiency cores also move up to
        // an idle performance cluster.
        let better_kind = topology.cluster(current).kind == CoreKind::Efficiency
            && topology.cluster(dst).kind == CoreKind::Performance;
        if loads[dst.index()].idle() && (topology.homogeneous(current, dst) || better_kind) {
            return true;
        }
        if rebalance_pending && loads[dst.index()].idle() {
            return true;
        }
        if shared_rsrc
            && loads[dst.index()].shared_rsrc_load < loads[current.index()].shared_rsrc_load
        {
            return true;
        }
    }
    false
}

// =============================================================================
// Idle Stealing
// =============================================================================

/// What an idle core should do, in descending order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StealDecision {
    /// Pull a thread from a foreign bucket queued on this cluster.
    Foreign(ClusterId),
    /// Pull the highest thread of an overloaded homogeneous cluster.
    Highest(ClusterId),
    /// Only *running* foreign threads exist; send an async reschedule
    /// signal instead of stealing synchronously.
    Rebalance,
    /// Stay idle.
    Nothing,
}

/// The steal ladder for an idle core on `thief`.
pub(crate) fn steal_decision(
    topology: &Topology,
    loads: &[ClusterLoad],
    thief: ClusterId,
) -> StealDecision {
    let sources: ArrayVec<ClusterId, MAX_CLUSTERS> = topology
        .clusters()
        .iter()
        .map(|d| d.id)
        .filter(|&src| {
            src != thief
                && loads[src.index()].online
                && topology.edge(src, thief).steal_allowed()
        })
        .collect();

    if let Some(&src) = sources
        .iter()
        .filter(|&&s| loads[s.index()].has_foreign)
        .max_by_key(|&&s| loads[s.index()].queue_depth)
    {
        return StealDecision::Foreign(src);
    }

    if let Some(&src) = sources
        .iter()
        .filter(|&&s| {
            topology.homogeneous(thief, s)
                && loads[s.index()].queue_depth > loads[s.index()].cpu_count
        })
        .max_by_key(|&&s| loads[s.index()].queue_depth)
    {
        return StealDecision::Highest(src);
    }

    if sources.iter().any(|&s| loads[s.index()].running_foreign) {
        return StealDecision::Rebalance;
    }
    StealDecision::Nothing
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clutch_topology::{ClusterEdge, CoreKind, CpuSet, EdgeFlags, TopologyBuilder};

    fn edge(weight: u32) -> ClusterEdge {
        ClusterEdge {
            migration_weight: weight,
            flags: EdgeFlags::MIGRATION_ALLOWED | EdgeFlags::STEAL_ALLOWED,
        }
    }

    /// Two performance clusters (0, 1) and one efficiency cluster (2),
    /// fully connected with weight 2.
    fn topo() -> Topology {
        let c0 = ClusterId::new(0);
        let c1 = ClusterId::new(1);
        let c2 = ClusterId::new(2);
        TopologyBuilder::new()
            .cluster(CoreKind::Performance, CpuSet::from_bits(0b0011))
            .cluster(CoreKind::Performance, CpuSet::from_bits(0b1100))
            .cluster(CoreKind::Efficiency, CpuSet::from_bits(0b11_0000))
            .edge(c0, c1, edge(2))
            .edge(c1, c0, edge(2))
            .edge(c0, c2, edge(2))
            .edge(c2, c0, edge(2))
            .edge(c1, c2, edge(2))
            .edge(c2, c1, edge(2))
            .build()
            .unwrap()
    }

    fn online(queue_depth: u32, idle_cpus: u32) -> ClusterLoad {
        ClusterLoad {
            online: true,
            idle_cpus,
            cpu_count: 2,
            queue_depth,
            ..Default::default()
        }
    }

    #[test]
    fn test_scenario_e_idle_candidate_wins() {
        let t = topo();
        // Preferred cluster 0 is loaded; cluster 1 is idle.
        let loads = [online(5, 0), online(0, 2), online(3, 0)];
        let dst = place(&t, &loads, ClusterId::new(0), false);
        assert_eq!(dst, ClusterId::new(1));
    }

    #[test]
    fn test_idle_preferred_short_circuits() {
        let t = topo();
        let loads = [online(1, 1), online(0, 2), online(0, 2)];
        let dst = place(&t, &loads, ClusterId::new(0), false);
        assert_eq!(dst, ClusterId::new(0));
    }

    #[test]
    fn test_migration_weight_gates_load_gap() {
        let t = topo();
        // Gap of 1 does not clear weight 2; thread stays put.
        let loads = [online(3, 0), online(2, 0), online(2, 0)];
        assert_eq!(place(&t, &loads, ClusterId::new(0), false), ClusterId::new(0));
        // Gap of 3 does.
        let loads = [online(5, 0), online(2, 0), online(4, 0)];
        assert_eq!(place(&t, &loads, ClusterId::new(0), false), ClusterId::new(1));
    }

    #[test]
    fn test_homogeneous_wins_gain_tie() {
        let t = topo();
        // Clusters 1 (performance) and 2 (efficiency) offer the same gain
        // from preferred 0; the homogeneous one wins.
        let loads = [online(6, 0), online(2, 0), online(2, 0)];
        assert_eq!(place(&t, &loads, ClusterId::new(0), false), ClusterId::new(1));
    }

    #[test]
    fn test_offline_preferred_degrades_to_same_kind() {
        let t = topo();
        let mut loads = [online(0, 0), online(1, 0), online(5, 0)];
        loads[0].online = false;
        // Same-kind cluster 1 replaces offline preferred 0.
        let dst = place(&t, &loads, ClusterId::new(0), false);
        assert_eq!(dst, ClusterId::new(1));
    }

    #[test]
    fn test_no_candidate_keeps_preferred() {
        let c0 = ClusterId::new(0);
        // No edges at all: cluster 1 is unreachable.
        let t = TopologyBuilder::new()
            .cluster(CoreKind::Performance, CpuSet::from_bits(0b01))
            .cluster(CoreKind::Performance, CpuSet::from_bits(0b10))
            .build()
            .unwrap();
        let loads = [online(9, 0), online(0, 1)];
        assert_eq!(place(&t, &loads, c0, false), c0);
    }

    #[test]
    fn test_shared_resource_uses_dedicated_counter() {
        let t = topo();
        // Queue depths would favor cluster 1, but shared-resource load
        // favors cluster 2.
        let mut loads = [online(1, 0), online(1, 0), online(1, 0)];
        loads[0].shared_rsrc_load = 6;
        loads[1].shared_rsrc_load = 6;
        loads[2].shared_rsrc_load = 1;
        assert_eq!(place(&t, &loads, ClusterId::new(0), true), ClusterId::new(2));
    }

    #[test]
    fn test_avoid_for_idle_same_kind_cluster() {
        let t = topo();
        let loads = [online(3, 0), online(0, 2), online(0, 0)];
        assert!(should_avoid(&t, &loads, ClusterId::new(0), false, false));
        // No idle cluster anywhere: stay.
        let loads = [online(3, 0), online(1, 0), online(1, 0)];
        assert!(!should_avoid(&t, &loads, ClusterId::new(0), false, false));
    }

    #[test]
    fn test_avoid_for_lower_shared_resource_load() {
        let t = topo();
        let mut loads = [online(1, 0), online(1, 0), online(1, 0)];
        loads[0].shared_rsrc_load = 4;
        loads[1].shared_rsrc_load = 1;
        assert!(should_avoid(&t, &loads, ClusterId::new(0), false, true));
        assert!(!should_avoid(&t, &loads, ClusterId::new(0), false, false));
    }

    #[test]
    fn test_steal_ladder_prefers_foreign() {
        let t = topo();
        let mut loads = [online(0, 2), online(4, 0), online(5, 0)];
        loads[1].has_foreign = true;
        assert_eq!(
            steal_decision(&t, &loads, ClusterId::new(0)),
            StealDecision::Foreign(ClusterId::new(1))
        );
    }

    #[test]
    fn test_steal_overloaded_homogeneous() {
        let t = topo();
        // Cluster 1 (homogeneous, depth 4 > 2 cores) qualifies; the
        // efficiency cluster's overload does not.
        let loads = [online(0, 2), online(4, 0), online(9, 0)];
        assert_eq!(
            steal_decision(&t, &loads, ClusterId::new(0)),
            StealDecision::Highest(ClusterId::new(1))
        );
    }

    #[test]
    fn test_steal_falls_back_to_rebalance_signal() {
        let t = topo();
        let mut loads = [online(0, 2), online(1, 0), online(0, 0)];
        loads[1].running_foreign = true;
        assert_eq!(
            steal_decision(&t, &loads, ClusterId::new(0)),
            StealDecision::Rebalance
        );
        loads[1].running_foreign = false;
        assert_eq!(
            steal_decision(&t, &loads, ClusterId::new(0)),
            StealDecision::Nothing
        );
    }
}
