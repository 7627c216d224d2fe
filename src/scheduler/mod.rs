//! The fixed-pipeline, work-stealing scheduler that drives a collection cycle through its
//! phases: mark, reachability, gather, unhash, begin-destroy, finish-destroy, purge.

#[allow(clippy::module_inception)]
mod scheduler;
pub(crate) mod work_bucket;
pub(crate) mod worker;
pub(crate) mod worker_goals;
pub(crate) mod worker_monitor;

pub use scheduler::GcScheduler;
pub use work_bucket::{GcWork, WorkBucketStage};
pub use worker::GcWorker;
pub use worker_goals::CollectParams;
