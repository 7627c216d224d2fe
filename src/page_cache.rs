//! Per-worker and shared caches of fixed 4 KiB scratch pages used to back transient collector
//! data structures: work blocks (`crate::queue`) and ARO blocks (`crate::aro`) (spec §4.1).

use std::sync::atomic::{AtomicUsize, Ordering};

pub const PAGE_SIZE: usize = 4096;
const SLOTS_PER_PAGE: usize = PAGE_SIZE / std::mem::size_of::<u32>();

/// A 4 KiB aligned scratch page, interpreted by its consumer as a flat array of `u32` slots
/// (object indices, or ARO argument words).
#[repr(align(4096))]
pub struct Page {
    pub slots: [u32; SLOTS_PER_PAGE],
}

static_assertions::const_assert_eq!(std::mem::size_of::<Page>(), PAGE_SIZE);
static_assertions::const_assert_eq!(std::mem::align_of::<Page>(), PAGE_SIZE);

impl Page {
    fn new() -> Box<Page> {
        Box::new(Page {
            slots: [0; SLOTS_PER_PAGE],
        })
    }

    pub const fn capacity() -> usize {
        SLOTS_PER_PAGE
    }
}

/// Per-worker scratch page cache with a shared mutex-protected overflow pool.
pub struct PageCache {
    per_worker: Vec<spin::Mutex<Vec<Box<Page>>>>,
    shared: spin::Mutex<Vec<Box<Page>>>,
    /// The minimum number of pages each worker keeps on hand so the tracer's hot paths never
    /// stall for memory: `2 + num_slow_aro_callbacks`.
    min_per_worker: usize,
    live_pages: AtomicUsize,
}

impl PageCache {
    pub fn new(num_workers: usize, num_slow_aro_callbacks: usize) -> Self {
        let min_per_worker = 2 + num_slow_aro_callbacks;
        let per_worker = (0..num_workers)
            .map(|_| {
                let pages = (0..min_per_worker).map(|_| Page::new()).collect::<Vec<_>>();
                spin::Mutex::new(pages)
            })
            .collect();
        Self {
            per_worker,
            shared: spin::Mutex::new(Vec::new()),
            min_per_worker,
            live_pages: AtomicUsize::new(num_workers * min_per_worker),
        }
    }

    /// Always returns a 4 KiB-aligned page, allocating fresh memory if no cached page is
    /// available.
    pub fn allocate_page(&self, worker_idx: usize) -> Box<Page> {
        if let Some(page) = self.per_worker[worker_idx].lock().pop() {
            return page;
        }
        if let Some(page) = self.shared.lock().pop() {
            return page;
        }
        self.live_pages.fetch_add(1, Ordering::Relaxed);
        Page::new()
    }

    pub fn return_worker_page(&self, worker_idx: usize, page: Box<Page>) {
        self.per_worker[worker_idx].lock().push(page);
    }

    pub fn return_shared_page(&self, page: Box<Page>) {
        self.shared.lock().push(page);
    }

    /// Called when a worker finishes a collection cycle: trims its cache back to the minimum
    /// and moves the rest to the shared pool.
    pub fn trim_worker(&self, worker_idx: usize) {
        let mut worker_cache = self.per_worker[worker_idx].lock();
        while worker_cache.len() > self.min_per_worker {
            if let Some(page) = worker_cache.pop() {
                self.shared.lock().push(page);
            }
        }
    }

    pub fn count_bytes(&self) -> usize {
        self.live_pages.load(Ordering::Relaxed) * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_moves_overflow_to_shared_pool() {
        let cache = PageCache::new(1, 0);
        let pages: Vec<_> = (0..5).map(|_| cache.allocate_page(0)).collect();
        for page in pages {
            cache.return_worker_page(0, page);
        }
        cache.trim_worker(0);
        assert_eq!(cache.per_worker[0].lock().len(), cache.min_per_worker);
        assert!(!cache.shared.lock().is_empty());
    }
}
