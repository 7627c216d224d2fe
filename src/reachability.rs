//! The reachability processor: per-reference state transitions applied by the parallel tracer
//! (spec §4.4). Given a validated reference to object `O`, this decides whether `O` is newly
//! reached, whether it is a cluster member/root, and whether a killable slot should be nulled.

use log::trace;

use crate::aro::AroTier;
use crate::cluster::{ClusterIndex, ClusterTable};
use crate::coordinator::Coordinator;
use crate::object::{ObjectFlags, ObjectIndex, Owner};
use crate::queue::{new_block, recycle_block, WorkBlock};
use crate::scheduler::{GcWork, WorkBucketStage};
use crate::vm::Host;

/// The outcome of processing one reference, telling the caller whether to enqueue `target` for
/// further tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachResult {
    /// The slot was nulled (it was killable and its target is flagged killable); nothing to
    /// enqueue.
    Nulled,
    /// `target` was newly reached and should be pushed onto the worker's queue.
    NewlyReached(ObjectIndex),
    /// `target` was already reached (or is a cluster member whose membership bit was already
    /// set); nothing further to do.
    AlreadyReached,
}

pub struct ReachabilityProcessor<'h> {
    host: &'h dyn Host,
    clusters: &'h ClusterTable,
}

impl<'h> ReachabilityProcessor<'h> {
    pub fn new(host: &'h dyn Host, clusters: &'h ClusterTable) -> Self {
        Self { host, clusters }
    }

    /// Process a validated reference slot pointing at `target`. `killable_slot` is `true` when
    /// the schema entry the slot came from carries the "collector may null this" property (spec
    /// §4.3 "Mutability policy"); the caller is responsible for actually writing null when this
    /// returns `Nulled`, since this type has no access to the slot's real memory.
    pub fn process_reference(&self, target: ObjectIndex, killable_slot: bool) -> ReachResult {
        let entry = self.host.object_table().entry(target);

        if killable_slot && entry.flags.load(std::sync::atomic::Ordering::Acquire).contains(ObjectFlags::KILLABLE) {
            trace!("nulling killable slot pointing at {target}");
            return ReachResult::Nulled;
        }

        let was_unreachable = entry.flags.try_clear(ObjectFlags::UNREACHABLE);
        if was_unreachable {
            match entry.owner() {
                Owner::Root { cluster_index } => {
                    self.mark_referenced_clusters(cluster_index);
                    return ReachResult::NewlyReached(target);
                }
                _ => return ReachResult::NewlyReached(target),
            }
        }

        if let Owner::Member { root } = entry.owner() {
            let root_entry = self.host.object_table().entry(root);
            let newly_in_cluster = entry.flags.try_set(ObjectFlags::REACHABLE_IN_CLUSTER);
            if newly_in_cluster {
                let root_was_unreachable = root_entry.flags.try_clear(ObjectFlags::UNREACHABLE);
                if root_was_unreachable {
                    if let Owner::Root { cluster_index } = root_entry.owner() {
                        self.mark_referenced_clusters(cluster_index);
                    }
                    return ReachResult::NewlyReached(root);
                }
                return ReachResult::AlreadyReached;
            }
        }

        ReachResult::AlreadyReached
    }

    /// Public entry point for callers outside this module (the mark phase seeds root clusters
    /// directly, without going through `process_reference`).
    pub fn mark_referenced_clusters_pub(&self, cluster_index: ClusterIndex) {
        self.mark_referenced_clusters(cluster_index);
    }

    /// Spec §4.4 step 4: iterate the cluster's referenced-cluster and referenced-mutable-object
    /// indices, marking each live and enqueueing it or propagating into its own cluster. Any
    /// entry flagged "garbage" is nulled in place and the whole cluster is flagged for
    /// dissolution.
    fn mark_referenced_clusters(&self, cluster_index: ClusterIndex) {
        let (referenced_clusters, referenced_mutable, any_garbage) =
            self.clusters.with_cluster(cluster_index, |cluster| {
                let mut any_garbage = false;
                for &obj in &cluster.referenced_mutable {
                    let entry = self.host.object_table().entry(obj);
                    if entry
                        .flags
                        .load(std::sync::atomic::Ordering::Acquire)
                        .contains(ObjectFlags::GARBAGE)
                    {
                        any_garbage = true;
                    }
                }
                (
                    cluster.referenced_clusters.clone(),
                    cluster.referenced_mutable.clone(),
                    any_garbage,
                )
            });

        if any_garbage {
            self.clusters.with_cluster(cluster_index, |c| c.flag_needs_dissolving());
        }

        for other in referenced_clusters {
            self.clusters.with_cluster(other, |cluster| {
                let root_entry = self.host.object_table().entry(cluster.root);
                root_entry.flags.try_clear(ObjectFlags::UNREACHABLE);
            });
        }

        for target in referenced_mutable {
            let entry = self.host.object_table().entry(target);
            let was_unreachable = entry.flags.try_clear(ObjectFlags::UNREACHABLE);
            if !was_unreachable {
                if let Owner::Member { root } = entry.owner() {
                    if entry.flags.try_set(ObjectFlags::REACHABLE_IN_CLUSTER) {
                        let root_entry = self.host.object_table().entry(root);
                        root_entry.flags.try_clear(ObjectFlags::UNREACHABLE);
                    }
                }
            }
        }
    }
}

/// A work-stealing tracer packet: one page-backed batch of object indices to visit. Visiting an
/// object means walking its schema through `Batcher`, validating the candidates it finds, and
/// feeding each validated target through [`ReachabilityProcessor::process_reference`]; newly
/// reached targets are rebatched into fresh `TraceBlock` packets so the stage keeps feeding
/// itself until nothing new is found and the bucket drains.
pub(crate) struct TraceBlock {
    block: Option<WorkBlock>,
}

impl TraceBlock {
    pub(crate) fn new(block: WorkBlock) -> Self {
        Self { block: Some(block) }
    }
}

impl GcWork for TraceBlock {
    fn do_work(&mut self, coordinator: &Coordinator, worker_idx: usize) {
        let host = coordinator.host.as_ref();
        let table = host.object_table();
        let reach = ReachabilityProcessor::new(host, &coordinator.cluster_table);
        let mut batcher = crate::batcher::Batcher::new();
        let mut newly_reached = Vec::new();

        let block = self.block.take().expect("TraceBlock::do_work called twice");

        for object in block.iter() {
            if !table.is_live(object) {
                continue;
            }
            let entry = table.entry(object);
            let schema = host.class_reflection().schema_for(entry.class_id);
            batcher.feed_object(host, object, &schema);
        }
        recycle_block(&coordinator.page_cache, worker_idx, block);

        loop {
            batcher.validate(host);
            if batcher.is_drained() {
                break;
            }
            batcher.drain_validated(|target, killable| {
                if let ReachResult::NewlyReached(t) = reach.process_reference(target, killable) {
                    newly_reached.push(t);
                }
            });
            batcher.drain_struct_batches(host);

            for (owner, callback_id) in batcher.drain_member_callbacks() {
                match coordinator.find_slow_aro(callback_id) {
                    Some(callback) if callback.tier == AroTier::Fast => {
                        let mut found = Vec::new();
                        host.reference_enumerator()
                            .invoke_member_callback(owner, callback_id, &mut found);
                        for target in found {
                            if !target.is_valid() || !table.is_live(target) {
                                continue;
                            }
                            if let ReachResult::NewlyReached(t) = reach.process_reference(target, false) {
                                newly_reached.push(t);
                            }
                        }
                    }
                    Some(_) => {
                        coordinator
                            .aro_queue(worker_idx)
                            .enqueue(&coordinator.page_cache, worker_idx, callback_id, owner);
                    }
                    None => {
                        trace!("dropping member callback {callback_id} with no registered tier");
                    }
                }
            }
        }

        if newly_reached.is_empty() {
            return;
        }

        let mut out_block = new_block(&coordinator.page_cache, worker_idx);
        let mut packets: Vec<Box<dyn GcWork>> = Vec::new();
        for index in newly_reached {
            if !out_block.push(index) {
                packets.push(Box::new(TraceBlock::new(out_block)));
                out_block = new_block(&coordinator.page_cache, worker_idx);
                out_block.push(index);
            }
        }
        if !out_block.is_empty() {
            packets.push(Box::new(TraceBlock::new(out_block)));
        } else {
            recycle_block(&coordinator.page_cache, worker_idx, out_block);
        }
        coordinator.scheduler.work_buckets[WorkBucketStage::Reachability].bulk_add(packets);
        coordinator.scheduler.notify_workers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterTable;
    use crate::object::ObjectFlags;
    use crate::testing::MockHost;

    #[test]
    fn killable_slot_pointing_at_killable_target_is_nulled() {
        let host = MockHost::new();
        let target = host.new_object(false);
        let entry = host.table().entry(target);
        entry.flags.set(ObjectFlags::UNREACHABLE);
        entry.flags.set(ObjectFlags::KILLABLE);
        let clusters = ClusterTable::new();
        let reach = ReachabilityProcessor::new(&host, &clusters);

        assert_eq!(reach.process_reference(target, true), ReachResult::Nulled);
        // A nulled slot never clears the target's own UNREACHABLE bit.
        assert!(entry.flags.load(std::sync::atomic::Ordering::Acquire).contains(ObjectFlags::UNREACHABLE));
    }

    #[test]
    fn non_killable_slot_pointing_at_killable_target_still_traces() {
        let host = MockHost::new();
        let target = host.new_object(false);
        let entry = host.table().entry(target);
        entry.flags.set(ObjectFlags::UNREACHABLE);
        entry.flags.set(ObjectFlags::KILLABLE);
        let clusters = ClusterTable::new();
        let reach = ReachabilityProcessor::new(&host, &clusters);

        assert_eq!(
            reach.process_reference(target, false),
            ReachResult::NewlyReached(target)
        );
    }

    #[test]
    fn killable_slot_pointing_at_non_killable_target_still_traces() {
        let host = MockHost::new();
        let target = host.new_object(false);
        host.table().entry(target).flags.set(ObjectFlags::UNREACHABLE);
        let clusters = ClusterTable::new();
        let reach = ReachabilityProcessor::new(&host, &clusters);

        assert_eq!(
            reach.process_reference(target, true),
            ReachResult::NewlyReached(target)
        );
    }
}
