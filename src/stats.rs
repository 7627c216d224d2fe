//! Structured logging for the observable side effects a collection cycle produces (spec §6):
//! cycle start/end timing, bytes held in the page cache, and the destruction pipeline's phase
//! transitions. This crate has no metrics/counter subsystem of its own (out of scope); it emits
//! `log` records at the appropriate level and leaves aggregation to the host's logging setup,
//! the same division of responsibility the teacher draws between its own code and `log`/the
//! embedder's chosen subscriber.

use std::time::Duration;

use log::info;

/// Emits the standard "cycle finished" log line. Kept as a free function (rather than a method
/// on `Coordinator`) so it can be called from a test without constructing a full coordinator.
pub(crate) fn log_cycle_finished(elapsed: Duration, num_unreachable: usize, page_cache_bytes: usize) {
    info!(
        "gc cycle finished in {} ms, {} objects unreachable, {} KiB of scratch pages live",
        elapsed.as_millis(),
        num_unreachable,
        page_cache_bytes / 1024
    );
}
