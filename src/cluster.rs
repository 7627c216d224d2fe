//! Object clusters: groups of objects that share reachability fate, so read-mostly content can
//! be traced as a single unit instead of object-by-object (spec §3 "Cluster", §4.4 "Mark
//! referenced clusters").

use std::sync::atomic::{AtomicBool, Ordering};

use crate::object::ObjectIndex;

pub type ClusterIndex = u32;

/// A cluster's static shape, built once when the cluster is formed. The root's reachability
/// drives the whole cluster; members are never individually unreachable while the cluster is
/// alive (spec invariant).
pub struct Cluster {
    pub root: ObjectIndex,
    pub members: Vec<ObjectIndex>,
    /// Indices of other clusters this cluster's members reference.
    pub referenced_clusters: Vec<ClusterIndex>,
    /// Indices of non-clustered ("mutable") objects this cluster's members reference.
    pub referenced_mutable: Vec<ObjectIndex>,
    /// Set when a referenced entry was found flagged "garbage" during reachability; the whole
    /// cluster must be dissolved at end of cycle.
    needs_dissolving: AtomicBool,
}

impl Cluster {
    pub fn new(
        root: ObjectIndex,
        members: Vec<ObjectIndex>,
        referenced_clusters: Vec<ClusterIndex>,
        referenced_mutable: Vec<ObjectIndex>,
    ) -> Self {
        Self {
            root,
            members,
            referenced_clusters,
            referenced_mutable,
            needs_dissolving: AtomicBool::new(false),
        }
    }

    pub fn flag_needs_dissolving(&self) {
        self.needs_dissolving.store(true, Ordering::Release);
    }

    pub fn needs_dissolving(&self) -> bool {
        self.needs_dissolving.load(Ordering::Acquire)
    }

    /// Reset the dissolve flag after a cycle has acted on it.
    pub fn clear_needs_dissolving(&self) {
        self.needs_dissolving.store(false, Ordering::Release);
    }
}

/// The global table of clusters, indexed by `ClusterIndex`. Cluster flag flips (just the single
/// `needs_dissolving` bit here) use the same atomic-CAS discipline as the object table, per spec
/// §5 "Cluster table."
#[derive(Default)]
pub struct ClusterTable {
    clusters: spin::RwLock<Vec<Cluster>>,
}

impl ClusterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cluster: Cluster) -> ClusterIndex {
        let mut clusters = self.clusters.write();
        let index = clusters.len() as ClusterIndex;
        clusters.push(cluster);
        index
    }

    pub fn with_cluster<R>(&self, index: ClusterIndex, f: impl FnOnce(&Cluster) -> R) -> R {
        let clusters = self.clusters.read();
        f(&clusters[index as usize])
    }

    pub fn len(&self) -> usize {
        self.clusters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Indices of every cluster flagged for dissolution since the flag was last cleared.
    pub fn dissolving_clusters(&self) -> Vec<ClusterIndex> {
        self.clusters
            .read()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.needs_dissolving())
            .map(|(i, _)| i as ClusterIndex)
            .collect()
    }

    /// Remove a dissolved cluster's bookkeeping. The members themselves become individually
    /// tracked objects in the object table; this just drops the cluster's own record.
    pub fn dissolve(&self, index: ClusterIndex) -> Cluster {
        let mut clusters = self.clusters.write();
        std::mem::replace(
            &mut clusters[index as usize],
            Cluster::new(ObjectIndex::INVALID, Vec::new(), Vec::new(), Vec::new()),
        )
    }
}
