//! The mark phase: a parallel, striped sweep over every live object index that resets
//! per-cycle bits and classifies each object as root-set, cluster member, explicit garbage, or
//! an ordinary candidate for collection (spec §4.5). Produces the seed list the reachability
//! phase starts tracing from.

use log::trace;

use crate::cluster::ClusterIndex;
use crate::coordinator::Coordinator;
use crate::object::{ObjectFlags, ObjectIndex, Owner};
use crate::queue::new_block;
use crate::reachability::ReachabilityProcessor;
use crate::scheduler::{GcWork, WorkBucketStage};

/// One worker's slice of the object table, `[start, end)`.
pub(crate) struct MarkStripe {
    pub(crate) start: u32,
    pub(crate) end: u32,
    pub(crate) keep_flags: bool,
}

impl GcWork for MarkStripe {
    fn do_work(&mut self, coordinator: &Coordinator, worker_idx: usize) {
        let host = coordinator.host.as_ref();
        let table = host.object_table();
        let mut seeds: Vec<ObjectIndex> = Vec::new();
        let mut seeded_clusters: Vec<ClusterIndex> = Vec::new();

        for raw in self.start..self.end {
            let index = ObjectIndex::new(raw);
            if !table.is_live(index) {
                continue;
            }
            let entry = table.entry(index);
            entry.flags.clear(ObjectFlags::REACHABLE_IN_CLUSTER);
            let flags = entry.flags.load(std::sync::atomic::Ordering::Acquire);

            // The root-set check runs unconditionally first: an object that is both ROOT_SET and
            // flagged GARBAGE/PendingKill is still seeded (spec §4.5).
            if flags.contains(ObjectFlags::ROOT_SET) {
                entry.flags.clear(ObjectFlags::UNREACHABLE);
                seeds.push(index);
                if let Owner::Root { cluster_index } = entry.owner() {
                    seeded_clusters.push(cluster_index);
                }
                continue;
            }

            if let Owner::Member { root } = entry.owner() {
                // A member is never seeded directly; only a carried GarbageCollectionKeepFlags
                // bit promotes it (and transitively its root) the way an ordinary reference would
                // during reachability (mirrors `ReachabilityProcessor::process_reference`).
                if self.keep_flags && flags.contains(ObjectFlags::GC_KEEP_FLAGS) {
                    if entry.flags.try_set(ObjectFlags::REACHABLE_IN_CLUSTER) {
                        let root_entry = table.entry(root);
                        if root_entry.flags.try_clear(ObjectFlags::UNREACHABLE) {
                            seeds.push(root);
                            if let Owner::Root { cluster_index } = root_entry.owner() {
                                seeded_clusters.push(cluster_index);
                            }
                        }
                    }
                } else {
                    entry.flags.set(ObjectFlags::UNREACHABLE);
                }
                continue;
            }

            // Regular object or cluster root.
            if flags.contains(ObjectFlags::GARBAGE) {
                entry.flags.set(ObjectFlags::UNREACHABLE);
                if let Owner::Root { cluster_index } = entry.owner() {
                    coordinator
                        .cluster_table
                        .with_cluster(cluster_index, |c| c.flag_needs_dissolving());
                }
                continue;
            }

            if self.keep_flags && flags.contains(ObjectFlags::GC_KEEP_FLAGS) {
                entry.flags.clear(ObjectFlags::UNREACHABLE);
                seeds.push(index);
                if let Owner::Root { cluster_index } = entry.owner() {
                    seeded_clusters.push(cluster_index);
                }
            } else {
                entry.flags.set(ObjectFlags::UNREACHABLE);
            }
        }

        trace!(
            "mark stripe [{}, {}) classified {} root seeds",
            self.start,
            self.end,
            seeds.len()
        );

        if seeds.is_empty() {
            return;
        }

        let reach = ReachabilityProcessor::new(host, &coordinator.cluster_table);
        for cluster_index in seeded_clusters {
            reach.mark_referenced_clusters_pub(cluster_index);
        }

        enqueue_seed_blocks(coordinator, worker_idx, seeds);
    }
}

/// Splits `host.root_enumerator()`'s explicit root list (stack frames, thread-local handles —
/// anything not captured by the per-object `ROOT_SET` flag) into the same seed pipeline.
pub(crate) struct SeedExplicitRoots;

impl GcWork for SeedExplicitRoots {
    fn do_work(&mut self, coordinator: &Coordinator, worker_idx: usize) {
        let host = coordinator.host.as_ref();
        let roots = host.root_enumerator().enumerate_roots();
        if roots.is_empty() {
            return;
        }
        let table = host.object_table();
        let reach = ReachabilityProcessor::new(host, &coordinator.cluster_table);
        let mut seeds = Vec::with_capacity(roots.len());
        for index in roots {
            if !table.is_live(index) {
                continue;
            }
            let entry = table.entry(index);
            if entry.flags.try_clear(ObjectFlags::UNREACHABLE) {
                seeds.push(index);
            }
            if let Owner::Root { cluster_index } = entry.owner() {
                reach.mark_referenced_clusters_pub(cluster_index);
            }
        }
        trace!("seeded {} explicit roots", seeds.len());
        enqueue_seed_blocks(coordinator, worker_idx, seeds);
    }
}

fn enqueue_seed_blocks(coordinator: &Coordinator, worker_idx: usize, seeds: Vec<ObjectIndex>) {
    let mut block = new_block(&coordinator.page_cache, worker_idx);
    let mut packets: Vec<Box<dyn GcWork>> = Vec::new();
    for index in seeds {
        if !block.push(index) {
            packets.push(Box::new(crate::reachability::TraceBlock::new(block)));
            block = new_block(&coordinator.page_cache, worker_idx);
            block.push(index);
        }
    }
    if !block.is_empty() {
        packets.push(Box::new(crate::reachability::TraceBlock::new(block)));
    } else {
        crate::queue::recycle_block(&coordinator.page_cache, worker_idx, block);
    }
    coordinator.scheduler.work_buckets[WorkBucketStage::Reachability].bulk_add(packets);
    coordinator.scheduler.notify_workers();
}
