//! Work blocks: fixed-size batches of pending-to-trace object indices (spec §3 "Work block",
//! §4.2). The single-producer/multi-consumer stealing itself is provided by the scheduler's
//! per-bucket `crossbeam::deque` queues (see `crate::scheduler::work_bucket`) rather than a
//! hand-rolled bounded ring buffer; see `DESIGN.md` for why.

use crate::object::ObjectIndex;
use crate::page_cache::{Page, PageCache};

/// Entries after the last pushed object are padded with a repeat of the last pushed index (or
/// index 0 for an empty block) so branchless lookahead/prefetch code can read past `len` without
/// a bounds check and without touching unmapped memory.
const LOOKAHEAD_PAD: usize = 8;

/// A page-backed batch of up to `capacity()` object indices.
pub struct WorkBlock {
    page: Box<Page>,
    len: usize,
}

impl WorkBlock {
    pub fn new(page: Box<Page>) -> Self {
        Self { page, len: 0 }
    }

    pub const fn capacity() -> usize {
        Page::capacity() - LOOKAHEAD_PAD
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len >= Self::capacity()
    }

    /// Push an index. Returns `false` (and does nothing) if the block is already full.
    pub fn push(&mut self, index: ObjectIndex) -> bool {
        if self.is_full() {
            return false;
        }
        self.page.slots[self.len] = index.as_u32();
        self.len += 1;
        self.seal_lookahead();
        true
    }

    /// Every entry from `len` to `len + LOOKAHEAD_PAD` repeats the last live entry, so a
    /// vectorized drain loop can read `LOOKAHEAD_PAD` slots past the logical end unconditionally.
    fn seal_lookahead(&mut self) {
        let fill = if self.len == 0 {
            0
        } else {
            self.page.slots[self.len - 1]
        };
        for slot in self
            .page
            .slots
            .iter_mut()
            .skip(self.len)
            .take(LOOKAHEAD_PAD)
        {
            *slot = fill;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjectIndex> + '_ {
        self.page.slots[..self.len]
            .iter()
            .map(|&raw| ObjectIndex::new(raw))
    }

    /// Including the lookahead pad, for code that deliberately wants to read past `len`.
    pub fn padded_slice(&self) -> &[u32] {
        &self.page.slots[..(self.len + LOOKAHEAD_PAD).min(Page::capacity())]
    }

    pub fn into_page(self) -> Box<Page> {
        self.page
    }
}

/// Allocates a fresh `WorkBlock` from the page cache.
pub fn new_block(cache: &PageCache, worker_idx: usize) -> WorkBlock {
    WorkBlock::new(cache.allocate_page(worker_idx))
}

/// Returns a drained block's page to the cache.
pub fn recycle_block(cache: &PageCache, worker_idx: usize, block: WorkBlock) {
    cache.return_worker_page(worker_idx, block.into_page());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_until_full_then_rejects() {
        let cache = PageCache::new(1, 0);
        let mut block = new_block(&cache, 0);
        for i in 0..WorkBlock::capacity() {
            assert!(block.push(ObjectIndex::new(i as u32)));
        }
        assert!(block.is_full());
        assert!(!block.push(ObjectIndex::new(999)));
    }

    #[test]
    fn lookahead_pad_repeats_last_entry() {
        let cache = PageCache::new(1, 0);
        let mut block = new_block(&cache, 0);
        block.push(ObjectIndex::new(42));
        let padded = block.padded_slice();
        assert!(padded[1..].iter().all(|&v| v == 42));
    }
}
