//! Unhash and BeginDestroy: the first two incremental phases applied to every object the gather
//! pass condemned (spec §4.8). Both walk the same unreachable-objects list with a saved cursor,
//! checking the wall clock every ten objects so a time-limited tick never overruns its budget by
//! much.

use std::time::Instant;

use crate::coordinator::Coordinator;
use crate::destroy::TickOutcome;
use crate::object::ObjectFlags;

const CLOCK_CHECK_INTERVAL: usize = 10;

pub(crate) fn run_unhash_tick(coordinator: &Coordinator, use_time_limit: bool, deadline: Instant) -> TickOutcome {
    coordinator.with_destruction(|state| {
        let lifecycle = coordinator.host.lifecycle();
        let total = state.unreachable().len();
        let mut i = state.cursor();
        let mut processed = 0usize;
        while i < total {
            lifecycle.unhash(state.unreachable()[i]);
            i += 1;
            processed += 1;
            if use_time_limit && processed % CLOCK_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                state.advance_cursor(i - state.cursor());
                return TickOutcome::Yielded;
            }
        }
        state.advance_cursor(i - state.cursor());
        TickOutcome::Finished
    })
}

pub(crate) fn run_begin_destroy_tick(
    coordinator: &Coordinator,
    use_time_limit: bool,
    deadline: Instant,
) -> TickOutcome {
    coordinator.with_destruction(|state| {
        let lifecycle = coordinator.host.lifecycle();
        let table = coordinator.host.object_table();
        let total = state.unreachable().len();
        let mut i = state.cursor();
        let mut processed = 0usize;
        while i < total {
            let object = state.unreachable()[i];
            let entry = table.entry(object);
            if entry.flags.try_set(ObjectFlags::BEGIN_DESTROY_CALLED) {
                lifecycle.conditional_begin_destroy(object);
            }
            i += 1;
            processed += 1;
            if use_time_limit && processed % CLOCK_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                state.advance_cursor(i - state.cursor());
                return TickOutcome::Yielded;
            }
        }
        state.advance_cursor(i - state.cursor());
        TickOutcome::Finished
    })
}
