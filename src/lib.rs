//! A concurrent, incremental, parallel mark-sweep garbage collector core for a large
//! managed-object universe, modeled on Unreal Engine's garbage collector.
//!
//! The crate has no opinion on memory layout or allocation: a host implements [`vm::Host`] to
//! supply an object table, a class reflection system, root enumeration, and the handful of
//! per-object lifecycle hooks the destruction pipeline needs. Everything else — the mark phase,
//! the parallel work-stealing tracer, cluster propagation, and the incremental unhash/
//! begin-destroy/finish-destroy/purge pipeline — lives here.
//!
//! Construct a [`coordinator::Coordinator`] with your [`vm::Host`] implementation and a
//! [`config::GcConfig`], then call [`coordinator::Coordinator::collect`] or
//! [`coordinator::Coordinator::try_collect`] to run a cycle.

pub mod aro;
pub mod batcher;
pub mod cluster;
pub mod config;
pub mod coordinator;
mod destroy;
pub mod error;
mod gather;
mod logger;
mod mark;
pub mod object;
pub mod object_table;
pub mod page_cache;
mod queue;
mod reachability;
pub mod schema;
mod scheduler;
mod stats;
#[cfg(any(test, feature = "test_private"))]
pub mod testing;
pub mod vm;

pub use config::GcConfig;
pub use coordinator::Coordinator;
pub use error::{GcError, GcResult};
pub use scheduler::CollectParams;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn collect_on_an_empty_universe_finishes_quickly() {
        let host = Arc::new(testing::MockHost::new());
        let config = GcConfig {
            num_workers: 2,
            ..GcConfig::default()
        };
        let coordinator = Coordinator::new(host, config);
        coordinator.collect(CollectParams::default());
        assert!(coordinator.last_cycle_duration() < Duration::from_secs(5));
        coordinator.shutdown();
    }
}
