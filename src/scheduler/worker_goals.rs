//! "Goals" are larger than work packets: they describe what the worker pool is working towards
//! on a high level. All workers work towards a single goal at a time, and the current goal
//! influences what the last parked worker does (open more buckets, or declare the cycle done).
//!
//! [`WorkerRequests`] queues up requests from mutator threads (calls to
//! [`crate::Coordinator::collect`] or [`crate::Coordinator::try_collect`]). Workers only respond
//! to one request at a time.

use std::time::Instant;

/// Parameters a mutator supplied when requesting a collection, carried through to the
/// `ScheduleCollection` packet that the last parked worker enqueues.
#[derive(Debug, Clone, Copy)]
pub struct CollectParams {
    /// Whether objects flagged `GarbageCollectionKeepFlags` should survive this cycle
    /// regardless of reachability.
    pub keep_flags: bool,
    /// Whether purge should run to completion within this call instead of being time-sliced.
    pub full_purge: bool,
}

impl Default for CollectParams {
    fn default() -> Self {
        Self {
            keep_flags: false,
            full_purge: false,
        }
    }
}

/// The current and requested goals.
#[derive(Default, Debug)]
pub(crate) struct WorkerGoals {
    /// What the workers are doing now.
    pub(crate) current: Option<WorkerGoal>,
    /// Requests received from mutators.
    pub(crate) requests: WorkerRequests,
}

impl WorkerGoals {
    pub(crate) fn current(&self) -> Option<&WorkerGoal> {
        self.current.as_ref()
    }

    /// Record a request. Returns `true` if this newly set a previously-unset request.
    pub(crate) fn set_request(&mut self, goal: RequestKind) -> bool {
        match goal {
            RequestKind::Collect(params) => self.requests.collect.set(params),
            RequestKind::StopForFork => self.requests.stop_for_fork.set(CollectParams::default()),
        }
    }

    #[cfg(test)]
    pub(crate) fn debug_is_requested(&self, kind: &str) -> bool {
        match kind {
            "collect" => self.requests.collect.debug_is_set(),
            "stop_for_fork" => self.requests.stop_for_fork.debug_is_set(),
            _ => false,
        }
    }

    /// Called by the last parked worker to pick the next goal to respond to, in priority order.
    pub(crate) fn poll_next_goal(&mut self) -> Option<WorkerGoal> {
        if self.requests.stop_for_fork.poll().is_some() {
            self.current = Some(WorkerGoal::StopForFork);
            return self.current.clone();
        }
        if let Some(params) = self.requests.collect.poll() {
            let goal = WorkerGoal::Collect {
                params,
                start_time: Instant::now(),
            };
            self.current = Some(goal.clone());
            return self.current.clone();
        }
        None
    }

    pub(crate) fn on_current_goal_completed(&mut self) {
        self.current = None;
    }
}

/// What kind of request a mutator is making of [`super::worker_monitor::WorkerMonitor::make_request`].
#[derive(Debug, Clone, Copy)]
pub(crate) enum RequestKind {
    Collect(CollectParams),
    StopForFork,
}

/// The thing workers are currently doing. Affects what the last parked worker does, and whether
/// workers should stop themselves.
#[derive(Debug, Clone)]
pub(crate) enum WorkerGoal {
    Collect {
        params: CollectParams,
        start_time: Instant,
    },
    StopForFork,
}

/// Requests received from mutators, ordered by decreasing priority.
#[derive(Default, Debug)]
pub(crate) struct WorkerRequests {
    pub(crate) stop_for_fork: WorkerRequest,
    pub(crate) collect: WorkerRequest,
}

/// Whether a particular goal has been requested, carrying the parameters of the request.
#[derive(Default, Debug)]
pub(crate) struct WorkerRequest {
    requested: Option<CollectParams>,
}

impl WorkerRequest {
    /// Mark the goal as requested. Returns `true` if this changed the state from unset to set.
    pub fn set(&mut self, params: CollectParams) -> bool {
        if self.requested.is_none() {
            self.requested = Some(params);
            true
        } else {
            false
        }
    }

    /// Take the requested parameters and clear the requested state.
    pub fn poll(&mut self) -> Option<CollectParams> {
        self.requested.take()
    }

    #[cfg(test)]
    pub fn debug_is_set(&self) -> bool {
        self.requested.is_some()
    }
}
