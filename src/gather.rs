//! The gather pass: a single post-reachability walk over the object table that assembles the
//! unreachable-objects list, clears weak references pointing at condemned objects, dissolves
//! dead clusters, and emits garbage-reference diagnostics (spec §4.7).
//!
//! Run as one packet rather than a striped sweep: unlike mark and reachability, gather has no
//! natural work-stealing structure (every live object must be visited exactly once, in index
//! order, to keep cluster dissolution deterministic), so a single sequential pass is both
//! simpler and sufficient.

use log::{debug, warn};

use crate::config::GarbageReferenceTracking;
use crate::coordinator::Coordinator;
use crate::object::{ObjectFlags, Owner};
use crate::scheduler::GcWork;

pub(crate) struct GatherPass;

impl GcWork for GatherPass {
    fn do_work(&mut self, coordinator: &Coordinator, _worker_idx: usize) {
        let host = coordinator.host.as_ref();
        let table = host.object_table();
        let clearer = host.weak_reference_clearer();

        let mut dissolved = 0usize;
        for index in coordinator.cluster_table.dissolving_clusters() {
            let cluster = coordinator.cluster_table.dissolve(index);
            for member in &cluster.members {
                let entry = table.entry(*member);
                entry.flags.set(ObjectFlags::UNREACHABLE);
                // The cluster record is gone; members are individually-tracked garbage now,
                // so the later sweep must not skip them as still-clustered.
                entry.set_owner(Owner::None);
            }
            dissolved += 1;
        }
        if dissolved > 0 {
            debug!("gather: dissolved {dissolved} clusters flagged during reachability");
        }

        let mut unreachable = Vec::new();
        let start = table.first_gc_index().as_u32();
        for raw in start..table.num_indices() {
            let index = crate::object::ObjectIndex::new(raw);
            if !table.is_live(index) {
                continue;
            }
            let entry = table.entry(index);
            let flags = entry.flags.load(std::sync::atomic::Ordering::Acquire);
            if !flags.contains(ObjectFlags::UNREACHABLE) {
                continue;
            }
            if flags.contains(ObjectFlags::DESTROYED) {
                continue;
            }
            if matches!(entry.owner(), Owner::Member { .. }) {
                // Dissolved above if the cluster died; otherwise the cluster (and thus this
                // member) is alive, and UNREACHABLE here just means it never individually
                // matched a reference, which is expected and not garbage.
                continue;
            }

            clearer.clear_weak_references_to(index);

            match coordinator.config.garbage_reference_tracking {
                GarbageReferenceTracking::Off => {}
                GarbageReferenceTracking::Verbose => {
                    warn!("gather: object {index} is garbage");
                }
                GarbageReferenceTracking::Sampled => {
                    if index.as_u32() % 997 == 0 {
                        warn!("gather: sampled garbage object {index}");
                    }
                }
            }

            unreachable.push(index);
        }

        debug!("gather: {} unreachable objects", unreachable.len());
        coordinator.set_unreachable_objects(unreachable);
    }
}
