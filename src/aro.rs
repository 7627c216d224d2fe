//! "Add Referenced Objects" slow callbacks: the escape hatch for classes whose references are
//! not statically describable by a `ReferenceSchema` (spec §4.4 "Slow callbacks").

use crate::object::ObjectIndex;
use crate::page_cache::PageCache;
use crate::queue::{new_block, WorkBlock};

pub const MAX_CALLBACKS: usize = 8;

/// The three scheduling tiers a registered callback falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AroTier {
    /// Cheap, ordinary throughput. Run synchronously during tracing.
    Fast,
    /// Uneven cost across callers; drained from the calling worker's own queue in big batches.
    Unbalanced,
    /// Expensive; run in small batches to avoid latency spikes.
    ExtraSlow,
}

#[derive(Debug, Clone, Copy)]
pub struct AroCallback {
    pub id: u32,
    pub tier: AroTier,
}

/// The set of callbacks a class has registered, indexed `0..Capacity`.
#[derive(Default)]
pub struct AroRegistry {
    callbacks: Vec<AroCallback>,
}

impl AroRegistry {
    pub fn register(&mut self, tier: AroTier) -> u32 {
        assert!(
            self.callbacks.len() < MAX_CALLBACKS,
            "at most {} slow ARO callbacks may be registered",
            MAX_CALLBACKS
        );
        let id = self.callbacks.len() as u32;
        self.callbacks.push(AroCallback { id, tier });
        id
    }

    pub fn find(&self, id: u32) -> Option<AroCallback> {
        self.callbacks.get(id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }
}

/// One worker's per-callback-id pending-argument queues. An enqueue that finds its current
/// block full allocates a fresh one from the page cache; there is no hard bound on the number of
/// blocks, so "store full" in practice only means "page cache allocation failed," which this
/// crate's in-memory page cache never does — see `DESIGN.md` for the resulting simplification of
/// the spec's described fallback-to-synchronous-dispatch path.
pub struct AroQueue {
    blocks: [spin::Mutex<Vec<WorkBlock>>; MAX_CALLBACKS],
}

impl Default for AroQueue {
    fn default() -> Self {
        Self {
            blocks: Default::default(),
        }
    }
}

impl AroQueue {
    pub fn enqueue(&self, cache: &PageCache, worker_idx: usize, callback_id: u32, arg: ObjectIndex) {
        let mut blocks = self.blocks[callback_id as usize].lock();
        if blocks.last().map(|b| b.is_full()).unwrap_or(true) {
            blocks.push(new_block(cache, worker_idx));
        }
        let block = blocks.last_mut().unwrap();
        let pushed = block.push(arg);
        debug_assert!(pushed, "freshly allocated ARO block must accept a push");
    }

    /// Drain every queued argument for `callback_id`, in the order enqueued, calling `visit` for
    /// each. Cycles through callback ids starting at an offset derived from `worker_idx` to
    /// reduce cross-worker contention when multiple workers drain around the same time.
    pub fn drain_all(&self, worker_idx: usize, mut visit: impl FnMut(u32, ObjectIndex)) {
        for i in 0..MAX_CALLBACKS {
            let callback_id = ((worker_idx + i) % MAX_CALLBACKS) as u32;
            let mut blocks = self.blocks[callback_id as usize].lock();
            for block in blocks.drain(..) {
                for arg in block.iter() {
                    visit(callback_id, arg);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| b.lock().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_then_drain_preserves_order() {
        let cache = PageCache::new(1, 1);
        let queue = AroQueue::default();
        for i in 0..10 {
            queue.enqueue(&cache, 0, 0, ObjectIndex::new(i));
        }
        let mut seen = Vec::new();
        queue.drain_all(0, |_, arg| seen.push(arg.as_u32()));
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }
}
