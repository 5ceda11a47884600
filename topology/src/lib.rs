//! # Cluster Topology
//!
//! Boot-time description of the machine's CPU clusters and the directed
//! migration/steal relationships between them.
//!
//! A *cluster* is a group of cores sharing one scheduling hierarchy;
//! heterogeneous machines carry multiple clusters of different core kinds.
//! Between every ordered pair of clusters there is a directed [`ClusterEdge`]
//! describing whether threads may migrate or be stolen along it and at what
//! load differential migration becomes worthwhile.
//!
//! The topology is discovered once at boot, validated by
//! [`TopologyBuilder::build`], and never mutated afterwards. Runtime state
//! (online/idle/recommended) lives in the scheduler, not here.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

// =============================================================================
// Identifiers
// =============================================================================

/// Maximum number of clusters a topology may describe.
pub const MAX_CLUSTERS: usize = 8;

/// Maximum number of CPUs addressable by a [`CpuSet`].
pub const MAX_CPUS: usize = 64;

/// Identifier of a cluster, dense from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterId(u8);

impl ClusterId {
    /// Create a cluster id from a raw index.
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Raw index of this cluster.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster{}", self.0)
    }
}

/// Identifier of a logical CPU (core), global across clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(u16);

impl CpuId {
    /// Create a CPU id from a raw index.
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Raw index of this CPU.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

// =============================================================================
// CPU Sets
// =============================================================================

/// A set of CPUs, one bit per [`CpuId`] below [`MAX_CPUS`].
///
/// Ids at or above [`MAX_CPUS`] cannot be represented: inserting one is a
/// fatal error, querying one reports absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuSet(u64);

impl CpuSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Create a set from a raw bitmask.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bitmask.
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Set containing a single CPU.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` is not below [`MAX_CPUS`].
    pub const fn single(cpu: CpuId) -> Self {
        assert!((cpu.0 as usize) < MAX_CPUS, "cpu id exceeds the CpuSet range");
        Self(1 << cpu.0)
    }

    /// Number of CPUs in the set.
    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether the set is empty.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether `cpu` is in the set. Ids outside the representable range
    /// are never members.
    pub const fn contains(self, cpu: CpuId) -> bool {
        (cpu.0 as usize) < MAX_CPUS && self.0 & (1 << cpu.0) != 0
    }

    /// Insert a CPU.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` is not below [`MAX_CPUS`].
    pub fn insert(&mut self, cpu: CpuId) {
        assert!((cpu.0 as usize) < MAX_CPUS, "{} exceeds the CpuSet range", cpu);
        self.0 |= 1 << cpu.0;
    }

    /// Remove a CPU. Ids outside the representable range are never
    /// members, so removing one is a no-op.
    pub fn remove(&mut self, cpu: CpuId) {
        if (cpu.0 as usize) < MAX_CPUS {
            self.0 &= !(1 << cpu.0);
        }
    }

    /// Intersection with another set.
    pub const fn and(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Lowest-numbered CPU in the set, if any.
    pub fn first(self) -> Option<CpuId> {
        if self.0 == 0 {
            None
        } else {
            Some(CpuId(self.0.trailing_zeros() as u16))
        }
    }

    /// Iterate over the CPUs in the set, lowest first.
    pub fn iter(self) -> impl Iterator<Item = CpuId> {
        let mut bits = self.0;
        core::iter::from_fn(move || {
            if bits == 0 {
                None
            } else {
                let cpu = CpuId(bits.trailing_zeros() as u16);
                bits &= bits - 1;
                Some(cpu)
            }
        })
    }
}

// =============================================================================
// Core Kinds and Edges
// =============================================================================

/// The microarchitectural kind of a cluster's cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreKind {
    /// High-performance cores.
    Performance,
    /// Energy-efficient cores.
    Efficiency,
}

bitflags::bitflags! {
    /// Properties of a directed cluster edge.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EdgeFlags: u8 {
        /// Threads may be placed/migrated from source to destination.
        const MIGRATION_ALLOWED = 1 << 0;
        /// An idle destination core may steal runnable threads from source.
        const STEAL_ALLOWED = 1 << 1;
    }
}

/// A directed edge between two clusters.
///
/// Edges need not be symmetric: an Efficiency cluster may be allowed to
/// push work to a Performance cluster without the reverse holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterEdge {
    /// Minimum load differential (source load minus destination load, in
    /// runnable threads) before migration along this edge pays off.
    pub migration_weight: u32,
    /// Migration/steal eligibility.
    pub flags: EdgeFlags,
}

impl ClusterEdge {
    /// An edge along which nothing may move.
    pub const DISCONNECTED: Self = Self {
        migration_weight: 0,
        flags: EdgeFlags::empty(),
    };

    /// Whether migration along the edge is allowed.
    pub const fn migration_allowed(self) -> bool {
        self.flags.contains(EdgeFlags::MIGRATION_ALLOWED)
    }

    /// Whether stealing along the edge is allowed.
    pub const fn steal_allowed(self) -> bool {
        self.flags.contains(EdgeFlags::STEAL_ALLOWED)
    }
}

/// Static description of one cluster.
#[derive(Debug, Clone)]
pub struct ClusterDesc {
    /// Cluster identifier, dense from 0.
    pub id: ClusterId,
    /// Kind of cores in this cluster.
    pub kind: CoreKind,
    /// CPUs belonging to this cluster.
    pub cpus: CpuSet,
}

// =============================================================================
// Topology
// =============================================================================

/// Errors raised while constructing a [`Topology`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyError {
    /// No clusters were described.
    NoClusters,
    /// More than [`MAX_CLUSTERS`] clusters were described.
    TooManyClusters,
    /// A cluster has no CPUs.
    EmptyCluster(ClusterId),
    /// A CPU appears in more than one cluster.
    OverlappingCpus(CpuId),
    /// An edge references a cluster that was not described.
    UnknownCluster(ClusterId),
}

/// Result alias for topology construction.
pub type TopologyResult<T> = Result<T, TopologyError>;

/// The validated, immutable cluster graph.
#[derive(Debug, Clone)]
pub struct Topology {
    clusters: Vec<ClusterDesc>,
    /// Dense `n * n` edge matrix, row = source, column = destination.
    edges: Vec<ClusterEdge>,
}

impl Topology {
    /// Number of clusters.
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Total number of CPUs across all clusters.
    pub fn cpu_count(&self) -> usize {
        self.clusters.iter().map(|c| c.cpus.count()).sum()
    }

    /// Description of one cluster.
    pub fn cluster(&self, id: ClusterId) -> &ClusterDesc {
        &self.clusters[id.index()]
    }

    /// All cluster descriptions, in id order.
    pub fn clusters(&self) -> &[ClusterDesc] {
        &self.clusters
    }

    /// The directed edge from `src` to `dst`.
    ///
    /// The self-edge is reported as disconnected; staying put is not a
    /// migration.
    pub fn edge(&self, src: ClusterId, dst: ClusterId) -> ClusterEdge {
        if src == dst {
            return ClusterEdge::DISCONNECTED;
        }
        self.edges[src.index() * self.clusters.len() + dst.index()]
    }

    /// Whether two clusters have the same core kind.
    pub fn homogeneous(&self, a: ClusterId, b: ClusterId) -> bool {
        self.cluster(a).kind == self.cluster(b).kind
    }

    /// The cluster owning `cpu`, if any.
    pub fn cluster_of(&self, cpu: CpuId) -> Option<ClusterId> {
        self.clusters
            .iter()
            .find(|c| c.cpus.contains(cpu))
            .map(|c| c.id)
    }

    /// Ids of all clusters of the given kind, in id order.
    pub fn clusters_of_kind(&self, kind: CoreKind) -> impl Iterator<Item = ClusterId> + '_ {
        self.clusters
            .iter()
            .filter(move |c| c.kind == kind)
            .map(|c| c.id)
    }
}

/// Builder collecting cluster and edge descriptions before validation.
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    clusters: Vec<ClusterDesc>,
    edges: Vec<(ClusterId, ClusterId, ClusterEdge)>,
}

impl TopologyBuilder {
    /// Start an empty topology description.
    pub fn new() -> Self {
        Self::default()
    }

    /// Describe the next cluster; ids are assigned densely in call order.
    pub fn cluster(mut self, kind: CoreKind, cpus: CpuSet) -> Self {
        let id = ClusterId::new(self.clusters.len() as u8);
        self.clusters.push(ClusterDesc { id, kind, cpus });
        self
    }

    /// Describe the directed edge from `src` to `dst`.
    ///
    /// Unspecified edges default to [`ClusterEdge::DISCONNECTED`].
    pub fn edge(mut self, src: ClusterId, dst: ClusterId, edge: ClusterEdge) -> Self {
        self.edges.push((src, dst, edge));
        self
    }

    /// Validate and freeze the topology.
    pub fn build(self) -> TopologyResult<Topology> {
        let n = self.clusters.len();
        if n == 0 {
            return Err(TopologyError::NoClusters);
        }
        if n > MAX_CLUSTERS {
            return Err(TopologyError::TooManyClusters);
        }

        let mut seen = CpuSet::EMPTY;
        for c in &self.clusters {
            if c.cpus.is_empty() {
                return Err(TopologyError::EmptyCluster(c.id));
            }
            if let Some(dup) = c.cpus.and(seen).first() {
                return Err(TopologyError::OverlappingCpus(dup));
            }
            seen = CpuSet::from_bits(seen.bits() | c.cpus.bits());
        }

        let mut edges = alloc::vec![ClusterEdge::DISCONNECTED; n * n];
        for (src, dst, edge) in self.edges {
            if src.index() >= n {
                return Err(TopologyError::UnknownCluster(src));
            }
            if dst.index() >= n {
                return Err(TopologyError::UnknownCluster(dst));
            }
            edges[src.index() * n + dst.index()] = edge;
        }

        log::debug!("topology frozen: {} clusters, {} cpus", n, seen.count());
        Ok(Topology {
            clusters: self.clusters,
            edges,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
