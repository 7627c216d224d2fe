//! The incremental destruction pipeline (spec §4.8, §4.9): once gather has assembled the
//! unreachable-objects list, each dead object passes through Unhash, BeginDestroy, FinishDestroy
//! and finally Purge (the actual destructor call and storage free). Unlike mark/reachability,
//! these phases are modeled as a single cursor walking the unreachable list rather than a
//! worker-stealing pipeline, since the spec itself describes them as resumable, time-sliced
//! ticks (`IncrementalPurgeGarbage`) rather than an embarrassingly parallel sweep.

pub(crate) mod purge;
pub(crate) mod unhash;

/// Where a cycle's destruction pipeline currently stands. Advanced one phase at a time by
/// [`crate::coordinator::Coordinator::incremental_purge_garbage`], or all at once inline when
/// [`crate::config::GcConfig::incremental_begin_destroy_enabled`] is `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgePhase {
    /// No cycle has produced an unreachable-objects list awaiting destruction.
    Idle,
    Unhash,
    BeginDestroy,
    FinishDestroy,
    Purge,
    /// The pipeline ran to completion; the next tick resets to `Idle`.
    Done,
}

/// Every tick function returns this so the coordinator's driver loop knows whether to advance to
/// the next phase or stop because it ran out of time budget.
pub(crate) enum TickOutcome {
    /// The phase has more work; the cursor was saved.
    Yielded,
    /// The phase drained its input completely.
    Finished,
}
