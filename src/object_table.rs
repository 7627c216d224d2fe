//! The default `ObjectTable` implementation: a chunked, append-only vector of `ObjectEntry`
//! slots behind a lock for structural growth (spec §5 "Object table"). Hosts may supply their
//! own `ObjectTable` instead (e.g. to embed the table inside an existing object header array);
//! this one exists so the crate is usable and testable without one.

use spin::RwLock;

use crate::object::{ObjectEntry, ObjectFlags, ObjectIndex, Owner};
use crate::vm::ObjectTable;

const CHUNK_SIZE: usize = 4096;

struct Chunk {
    entries: Vec<ObjectEntry>,
}

impl Chunk {
    fn new() -> Self {
        let mut entries = Vec::with_capacity(CHUNK_SIZE);
        for _ in 0..CHUNK_SIZE {
            entries.push(ObjectEntry::new(0, ObjectFlags::EMPTY));
        }
        Self { entries }
    }
}

/// Grows one chunk at a time as `allocate` hands out new indices; never shrinks or compacts,
/// since indices must stay stable for the lifetime of the table (spec invariant: an
/// `ObjectIndex` is never reused while any live reference to it exists).
pub struct ChunkedObjectTable {
    chunks: RwLock<Vec<Chunk>>,
    first_gc_index: ObjectIndex,
    num_indices: std::sync::atomic::AtomicU32,
}

impl ChunkedObjectTable {
    /// `first_gc_index` reserves indices `0..first_gc_index` as permanently non-scanned slots
    /// (e.g. a sentinel null object at index 0), matching `GetFirstGCIndex()`.
    pub fn new(first_gc_index: u32) -> Self {
        let table = Self {
            chunks: RwLock::new(Vec::new()),
            first_gc_index: ObjectIndex::new(first_gc_index),
            num_indices: std::sync::atomic::AtomicU32::new(0),
        };
        for _ in 0..first_gc_index {
            table.allocate(0, ObjectFlags::EMPTY);
        }
        table
    }

    /// Append a new slot, growing the chunk list if needed, and return its index. Always takes
    /// the write lock: entries are pre-populated with a placeholder `class_id` when a chunk is
    /// created, and `allocate` must overwrite that placeholder, so there is no race-free fast
    /// path that only touches the atomic flags word.
    pub fn allocate(&self, class_id: u32, initial: ObjectFlags) -> ObjectIndex {
        use std::sync::atomic::Ordering;
        let index = self.num_indices.fetch_add(1, Ordering::AcqRel);
        let chunk_idx = index as usize / CHUNK_SIZE;
        let slot_idx = index as usize % CHUNK_SIZE;
        let mut chunks = self.chunks.write();
        while chunk_idx >= chunks.len() {
            chunks.push(Chunk::new());
        }
        chunks[chunk_idx].entries[slot_idx] = ObjectEntry::new(class_id, initial);
        ObjectIndex::new(index)
    }

    pub fn set_owner(&self, index: ObjectIndex, owner: Owner) {
        self.entry(index).set_owner(owner);
    }
}

impl ObjectTable for ChunkedObjectTable {
    fn entry(&self, index: ObjectIndex) -> &ObjectEntry {
        let chunk_idx = index.as_usize() / CHUNK_SIZE;
        let slot_idx = index.as_usize() % CHUNK_SIZE;
        let chunks = self.chunks.read();
        // SAFETY: chunks are only ever appended, never reallocated in place or removed, and
        // `ObjectEntry` itself provides interior mutability, so handing back a reference that
        // outlives the read guard is sound as long as the chunk vector itself never moves a
        // `Chunk` once pushed. `Vec<Chunk>` growth can reallocate the outer vector, but each
        // `Chunk`'s `Vec<ObjectEntry>` is heap-allocated independently and never touched again
        // after `Chunk::new`, so the entry's address is stable across outer reallocations.
        let chunk_ptr: *const Chunk = &chunks[chunk_idx];
        unsafe { &(*chunk_ptr).entries[slot_idx] }
    }

    fn first_gc_index(&self) -> ObjectIndex {
        self.first_gc_index
    }

    fn num_indices(&self) -> u32 {
        self.num_indices.load(std::sync::atomic::Ordering::Acquire)
    }

    fn is_live(&self, index: ObjectIndex) -> bool {
        index.is_valid()
            && index.as_u32() < self.num_indices()
            && !self
                .entry(index)
                .flags
                .load(std::sync::atomic::Ordering::Acquire)
                .contains(ObjectFlags::DESTROYED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_returns_increasing_indices() {
        let table = ChunkedObjectTable::new(1);
        let a = table.allocate(1, ObjectFlags::EMPTY);
        let b = table.allocate(1, ObjectFlags::EMPTY);
        assert!(b.as_u32() > a.as_u32());
        assert!(table.is_live(a));
        assert!(table.is_live(b));
    }

    #[test]
    fn entries_survive_chunk_growth() {
        let table = ChunkedObjectTable::new(0);
        let first = table.allocate(7, ObjectFlags::EMPTY);
        for _ in 0..(CHUNK_SIZE * 2) {
            table.allocate(1, ObjectFlags::EMPTY);
        }
        assert_eq!(table.entry(first).class_id, 7);
    }

    #[test]
    fn destroyed_objects_are_not_live() {
        let table = ChunkedObjectTable::new(0);
        let index = table.allocate(1, ObjectFlags::EMPTY);
        table.entry(index).flags.set(ObjectFlags::DESTROYED);
        assert!(!table.is_live(index));
    }
}
