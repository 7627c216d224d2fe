use std::sync::Arc;

use crossbeam::deque::Steal;
use enum_map::EnumMap;
use log::{debug, info, trace};

use crate::coordinator::Coordinator;
use crate::scheduler::work_bucket::{build_buckets, GcWork, WorkBucket, WorkBucketStage};
use crate::scheduler::worker::{GcWorker, PollResult, WorkerGroup};
use crate::scheduler::worker_goals::{CollectParams, RequestKind, WorkerGoal, WorkerGoals};
use crate::scheduler::worker_monitor::{LastParkedResult, WorkerMonitor};

/// The fixed-pipeline work scheduler: one bucket per collection phase, a pool of worker threads
/// that steal from each other's deques and from the active bucket, and the park/wake protocol
/// that decides when a phase is fully drained and the next one may open.
pub struct GcScheduler {
    pub(crate) work_buckets: EnumMap<WorkBucketStage, WorkBucket>,
    pub(crate) worker_group: Arc<WorkerGroup>,
    pub(crate) worker_monitor: Arc<WorkerMonitor>,
}

impl GcScheduler {
    pub(crate) fn new(num_workers: usize) -> (Arc<Self>, Vec<GcWorker>) {
        let worker_monitor = Arc::new(WorkerMonitor::new(num_workers));
        let (worker_group, workers) = WorkerGroup::new(num_workers);
        let work_buckets = build_buckets();
        let scheduler = Arc::new(Self {
            work_buckets,
            worker_group,
            worker_monitor,
        });
        (scheduler, workers)
    }

    pub fn num_workers(&self) -> usize {
        self.worker_group.worker_count()
    }

    /// Request the worker pool schedule a collection cycle. Called by a mutator thread from
    /// `Coordinator::collect`/`try_collect`.
    pub(crate) fn request_collect(&self, params: CollectParams) {
        debug!("requesting a collection cycle: {:?}", params);
        self.worker_monitor
            .make_request(RequestKind::Collect(params));
    }

    fn add_schedule_collection_packet(&self, params: CollectParams) {
        self.work_buckets[WorkBucketStage::Unconstrained].add_dyn(Box::new(
            crate::coordinator::ScheduleCollection { params },
        ));
    }

    fn are_buckets_drained(&self, stages: &[WorkBucketStage]) -> bool {
        stages.iter().all(|&s| self.work_buckets[s].is_drained())
    }

    pub fn all_buckets_empty(&self) -> bool {
        self.work_buckets.values().all(|b| b.is_empty())
    }

    fn update_buckets(&self, coordinator: &Coordinator) -> bool {
        let mut opened_with_work = false;
        for stage in self.work_buckets.keys() {
            if stage == WorkBucketStage::Unconstrained {
                continue;
            }
            let bucket = &self.work_buckets[stage];
            if bucket.update(coordinator) {
                trace!("opened bucket {:?}", stage);
                if !bucket.is_drained() {
                    opened_with_work = true;
                    break;
                }
            }
        }
        opened_with_work
    }

    pub(crate) fn deactivate_all(&self) {
        for (stage, bucket) in self.work_buckets.iter() {
            if stage != WorkBucketStage::Unconstrained {
                bucket.deactivate();
            }
        }
    }

    fn poll_once(&self, worker: &GcWorker) -> Steal<Box<dyn GcWork>> {
        if let Some(w) = worker.local_work_buffer.pop() {
            return Steal::Success(w);
        }
        let mut should_retry = false;
        for bucket in self.work_buckets.values() {
            match bucket.poll(&worker.local_work_buffer) {
                Steal::Success(w) => return Steal::Success(w),
                Steal::Retry => should_retry = true,
                Steal::Empty => {}
            }
        }
        for (ordinal, shared) in self.worker_group.workers_shared.iter().enumerate() {
            if ordinal == worker.ordinal {
                continue;
            }
            match shared.stealer.steal() {
                Steal::Success(w) => return Steal::Success(w),
                Steal::Retry => should_retry = true,
                Steal::Empty => {}
            }
        }
        if should_retry {
            Steal::Retry
        } else {
            Steal::Empty
        }
    }

    fn poll_schedulable_work(&self, worker: &GcWorker) -> Option<Box<dyn GcWork>> {
        loop {
            match self.poll_once(worker) {
                Steal::Success(w) => return Some(w),
                Steal::Retry => {
                    std::thread::yield_now();
                    continue;
                }
                Steal::Empty => return None,
            }
        }
    }

    /// Called by worker threads to fetch the next packet, parking (and possibly driving phase
    /// transitions as the last parked worker) when none is available.
    pub(crate) fn poll(&self, coordinator: &Coordinator, worker: &mut GcWorker) -> PollResult {
        if let Some(w) = self.poll_schedulable_work(worker) {
            return Ok(w);
        }
        loop {
            if let Some(w) = self.poll_schedulable_work(worker) {
                return Ok(w);
            }
            let ordinal = worker.ordinal;
            self.worker_monitor
                .park_and_wait(ordinal, |goals| self.on_last_parked(coordinator, goals))?;
        }
    }

    fn on_last_parked(&self, coordinator: &Coordinator, goals: &mut WorkerGoals) -> LastParkedResult {
        let Some(current_goal) = goals.current().cloned() else {
            return self.respond_to_requests(coordinator, goals);
        };

        match current_goal {
            WorkerGoal::Collect { .. } => {
                trace!("last worker parked mid-cycle, checking for more work");
                self.assert_all_activated_buckets_are_empty();

                if self.update_buckets(coordinator) {
                    LastParkedResult::WakeAll
                } else if coordinator.drain_pending_aro_callbacks() {
                    trace!("slow ARO callbacks produced new reachability work");
                    LastParkedResult::WakeAll
                } else {
                    self.on_cycle_finished(coordinator);
                    goals.on_current_goal_completed();
                    self.respond_to_requests(coordinator, goals)
                }
            }
            WorkerGoal::StopForFork => {
                panic!("worker parked again after being asked to exit");
            }
        }
    }

    fn respond_to_requests(&self, coordinator: &Coordinator, goals: &mut WorkerGoals) -> LastParkedResult {
        let Some(goal) = goals.poll_next_goal() else {
            return LastParkedResult::ParkSelf;
        };

        match goal {
            WorkerGoal::Collect { params, start_time } => {
                trace!("starting a collection cycle");
                coordinator.on_cycle_start(start_time);
                self.work_buckets[WorkBucketStage::first_stage()].activate();
                self.add_schedule_collection_packet(params);
                LastParkedResult::WakeSelf
            }
            WorkerGoal::StopForFork => LastParkedResult::WakeAll,
        }
    }

    fn assert_all_activated_buckets_are_empty(&self) {
        let mut offender = None;
        for (stage, bucket) in self.work_buckets.iter() {
            if bucket.is_activated() && !bucket.is_empty() {
                offender = Some(stage);
            }
        }
        if let Some(stage) = offender {
            panic!("bucket {:?} is active but not empty", stage);
        }
    }

    fn on_cycle_finished(&self, coordinator: &Coordinator) {
        debug_assert!(self.all_buckets_empty());
        self.deactivate_all();
        let elapsed = coordinator.on_cycle_finished();
        info!("collection cycle finished in {} ms", elapsed.as_millis());
    }

    /// Wake every parked worker. Packet-producing work (`MarkStripe`, `TraceBlock`, `GatherPass`,
    /// `ScheduleCollection`) must call this after adding packets to a bucket, since bucket
    /// mutation itself carries no wake-up: a worker that parked mid-cycle for lack of work is
    /// otherwise never notified that a sibling worker just produced more.
    pub(crate) fn notify_workers(&self) {
        self.worker_monitor.notify_work_available(true);
    }

    /// Ask all workers to exit. Used when tearing down a `Coordinator` (notably in tests).
    pub(crate) fn stop_workers(&self) {
        self.worker_monitor.make_request(RequestKind::StopForFork);
    }

    pub(crate) fn on_worker_exited(&self) {
        if self.worker_group.note_worker_exited() {
            self.worker_monitor.on_all_workers_exited();
        }
    }
}

impl std::fmt::Debug for GcScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcScheduler")
            .field("num_workers", &self.num_workers())
            .finish()
    }
}
