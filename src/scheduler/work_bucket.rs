//! Work buckets: one queue per phase of a collection cycle. A bucket only yields packets once
//! it has been "activated" by its open condition, which keeps workers from racing ahead into a
//! phase before the previous one has fully drained (the spec's `FirstGCIndex`-style phase
//! barriers).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::deque::{Injector, Steal, Worker as Deque};
use enum_map::Enum;
use spin::RwLock;
use strum_macros::EnumIter;

use crate::coordinator::Coordinator;

/// A unit of collector work. Unlike the spec's literal "work block" (a batch of object indices),
/// a `GcWork` packet is the scheduling granularity; most packets *carry* one or more work blocks
/// (see `crate::queue::WorkBlock`) as their payload.
pub trait GcWork: Send {
    fn do_work(&mut self, coordinator: &Coordinator, worker_idx: usize);
}

impl<F: FnMut(&Coordinator, usize) + Send> GcWork for F {
    fn do_work(&mut self, coordinator: &Coordinator, worker_idx: usize) {
        (self)(coordinator, worker_idx)
    }
}

/// The phases of a collection cycle, in the order the coordinator's state machine visits them.
/// `Unconstrained` holds packets that may run before the cycle has a bucket of its own (just the
/// `ScheduleCollection` bootstrap packet, in this crate).
#[derive(Debug, Enum, EnumIter, Copy, Clone, Eq, PartialEq, Hash)]
pub enum WorkBucketStage {
    Unconstrained,
    Mark,
    Reachability,
    Gather,
    Unhash,
    BeginDestroy,
    FinishDestroy,
    Purge,
}

impl WorkBucketStage {
    pub(crate) fn first_stage() -> Self {
        WorkBucketStage::Mark
    }
}

pub struct WorkBucket {
    active: AtomicBool,
    queue: RwLock<Injector<Box<dyn GcWork>>>,
    can_open: Option<Box<dyn Fn(&Coordinator) -> bool + Send + Sync>>,
}

impl WorkBucket {
    pub(crate) fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
            queue: RwLock::new(Injector::new()),
            can_open: None,
        }
    }

    pub fn is_activated(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        debug_assert!(self.is_empty(), "bucket not drained before close");
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.read().is_empty()
    }

    pub fn is_drained(&self) -> bool {
        self.is_activated() && self.is_empty()
    }

    pub fn add(&self, work: impl GcWork + 'static) {
        self.queue.read().push(Box::new(work));
    }

    pub fn add_dyn(&self, work: Box<dyn GcWork>) {
        self.queue.read().push(work);
    }

    pub fn bulk_add(&self, works: Vec<Box<dyn GcWork>>) {
        let queue = self.queue.read();
        for w in works {
            queue.push(w);
        }
    }

    /// Try to steal work from this bucket's injector into the worker's local deque.
    pub(crate) fn poll(&self, local: &Deque<Box<dyn GcWork>>) -> Steal<Box<dyn GcWork>> {
        if !self.is_activated() {
            return Steal::Empty;
        }
        self.queue.read().steal_batch_and_pop(local)
    }

    pub(crate) fn set_open_condition(
        &mut self,
        pred: impl Fn(&Coordinator) -> bool + Send + Sync + 'static,
    ) {
        self.can_open = Some(Box::new(pred));
    }

    /// Re-evaluate the open condition. Returns `true` if this call newly activated the bucket.
    pub(crate) fn update(&self, coordinator: &Coordinator) -> bool {
        if let Some(can_open) = self.can_open.as_ref() {
            if !self.is_activated() && can_open(coordinator) {
                self.activate();
                return true;
            }
        }
        false
    }
}

/// Build the fixed pipeline of buckets with the phase-barrier open conditions wired up: each
/// stage after `Mark` opens only once every earlier stage (in order) has fully drained.
pub(crate) fn build_buckets() -> enum_map::EnumMap<WorkBucketStage, WorkBucket> {
    use strum::IntoEnumIterator;

    let mut buckets = enum_map::EnumMap::from_fn(|stage| {
        WorkBucket::new(stage == WorkBucketStage::Unconstrained)
    });

    let order: Vec<WorkBucketStage> = WorkBucketStage::iter()
        .filter(|&s| s != WorkBucketStage::Unconstrained)
        .collect();
    let mut opened: Vec<WorkBucketStage> = Vec::new();
    for (i, &stage) in order.iter().enumerate() {
        if i == 0 {
            opened.push(stage);
            continue;
        }
        let prior: Arc<Vec<WorkBucketStage>> = Arc::new(opened.clone());
        buckets[stage].set_open_condition(move |coordinator: &Coordinator| {
            prior
                .iter()
                .all(|&s| coordinator.scheduler.work_buckets[s].is_drained())
        });
        opened.push(stage);
    }
    buckets
}
