//! FinishDestroy and Purge: the final two incremental phases (spec §4.9). FinishDestroy polls
//! each condemned object until its host-defined readiness check passes, retrying the ones that
//! aren't ready yet on the next tick and escalating through [`crate::config::StallPolicy`] if an
//! object never becomes ready within the configured stall timeout. Purge then actually runs the
//! destructor and frees the object's storage, handing thread-safe objects off to a dedicated
//! worker thread when [`crate::config::GcConfig::multithreaded_destruction_enabled`] is set.

use std::time::Instant;

use log::{error, warn};

use crate::config::StallPolicy;
use crate::coordinator::Coordinator;
use crate::destroy::TickOutcome;

const CLOCK_CHECK_INTERVAL: usize = 10;

pub(crate) fn run_finish_destroy_tick(
    coordinator: &Coordinator,
    use_time_limit: bool,
    deadline: Instant,
) -> TickOutcome {
    let lifecycle = coordinator.host.lifecycle();

    coordinator.with_destruction(|state| {
        if state.pending_destruction().is_empty() {
            let seed = state.unreachable().to_vec();
            state.pending_destruction().extend(seed);
            *state.stall_started_at() = None;
        }
    });

    loop {
        let (batch, stalled_for) = coordinator.with_destruction(|state| {
            let pending = std::mem::take(state.pending_destruction());
            let first_seen = *state.stall_started_at();
            (pending, first_seen)
        });

        if batch.is_empty() {
            return TickOutcome::Finished;
        }

        let mut still_pending = Vec::new();
        let mut processed = 0usize;
        for object in batch {
            if lifecycle.is_ready_for_finish_destroy(object) {
                lifecycle.conditional_finish_destroy(object);
            } else {
                still_pending.push(object);
            }
            processed += 1;
            if use_time_limit && processed % CLOCK_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                break;
            }
        }

        let made_progress = still_pending.len() < processed;
        let stall_start = if still_pending.is_empty() {
            None
        } else if made_progress {
            Some(Instant::now())
        } else {
            Some(stalled_for.unwrap_or_else(Instant::now))
        };

        if let Some(started) = stall_start {
            if started.elapsed() >= coordinator.config.finish_destroy_stall_timeout() {
                report_stall(coordinator, still_pending.len());
            }
        }

        let yielded_due_to_budget = use_time_limit && Instant::now() >= deadline;

        coordinator.with_destruction(|state| {
            state.pending_destruction().extend(still_pending.iter().copied());
            *state.stall_started_at() = stall_start;
        });

        if yielded_due_to_budget {
            return TickOutcome::Yielded;
        }
        if coordinator.with_destruction(|s| s.pending_destruction().is_empty()) {
            return TickOutcome::Finished;
        }
        // No time limit and still stalled objects remain: keep spinning through them (this is
        // the `full_purge` / non-incremental path), but yield once to avoid busy-looping forever
        // against a stall the policy has already reported.
        if stall_start
            .map(|s| s.elapsed() >= coordinator.config.finish_destroy_stall_timeout())
            .unwrap_or(false)
        {
            return TickOutcome::Yielded;
        }
    }
}

fn report_stall(coordinator: &Coordinator, stalled_count: usize) {
    match coordinator.stall_policy() {
        StallPolicy::LogAndContinue => {
            warn!(
                "FinishDestroy has been stalled past the configured timeout with {} objects still pending",
                stalled_count
            );
        }
        StallPolicy::Abort => {
            error!(
                "FinishDestroy stalled past the configured timeout with {} objects still pending, aborting",
                stalled_count
            );
            panic!("FinishDestroy stall timeout exceeded");
        }
    }
}

pub(crate) fn run_purge_tick(coordinator: &Coordinator, use_time_limit: bool, deadline: Instant) -> TickOutcome {
    let lifecycle = coordinator.host.lifecycle();
    let total = coordinator.with_destruction(|state| state.unreachable().len());
    let mut i = coordinator.with_destruction(|state| state.cursor());
    let mut processed = 0usize;

    while i < total {
        let object = coordinator.with_destruction(|state| state.unreachable()[i]);
        if coordinator.config.multithreaded_destruction_enabled && lifecycle.is_destruction_thread_safe(object) {
            coordinator.dispatch_async_destroy(object);
        } else {
            lifecycle.destroy(object);
        }
        i += 1;
        processed += 1;
        coordinator.with_destruction(|state| state.advance_cursor(1));
        if use_time_limit && processed % CLOCK_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
            return TickOutcome::Yielded;
        }
    }
    TickOutcome::Finished
}
