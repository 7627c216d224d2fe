//! A minimal in-memory [`crate::vm::Host`] implementation, analogous to the teacher's dummy VM
//! binding used by its own test suite. Object references are modeled as a plain adjacency list
//! rather than real memory, since this crate never looks at an object's bytes directly; every
//! object shares one generic single-entry schema, and [`MockHost::reference_enumerator`] reads
//! the adjacency list instead of interpreting memory at an offset.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use crate::object::{ObjectFlags, ObjectIndex, Owner};
use crate::object_table::ChunkedObjectTable;
use crate::schema::{ReferenceSchema, SchemaBuilder};
use crate::vm::{
    Allocator, ClassReflection, Host, ObjectHandleResolver, ObjectLifecycle, ObjectTable,
    PermanentObjectPool, ReferenceEnumerator, RootEnumerator, WeakReferenceClearer,
};
use std::sync::Arc;

/// A test double for a managed-object universe: a [`ChunkedObjectTable`] plus an adjacency list
/// standing in for real object memory, and recording hooks so a test can assert on what the
/// destruction pipeline did.
pub struct MockHost {
    table: ChunkedObjectTable,
    schema: Arc<ReferenceSchema>,
    edges: RwLock<HashMap<ObjectIndex, Vec<ObjectIndex>>>,
    explicit_roots: RwLock<Vec<ObjectIndex>>,
    permanent: RwLock<HashSet<ObjectIndex>>,
    unresolved: RwLock<HashSet<ObjectIndex>>,
    not_ready_for_finish: RwLock<HashSet<ObjectIndex>>,
    thread_safe_destruction: RwLock<HashSet<ObjectIndex>>,
    unhashed: Mutex<Vec<ObjectIndex>>,
    begin_destroyed: Mutex<Vec<ObjectIndex>>,
    finish_destroyed: Mutex<Vec<ObjectIndex>>,
    destroyed: Mutex<Vec<ObjectIndex>>,
    weak_cleared: Mutex<Vec<ObjectIndex>>,
    /// Holder -> weak target, standing in for a real weak-reference slot a host would null out
    /// of its own memory; this crate only tells the host which object died.
    weak_slots: RwLock<HashMap<ObjectIndex, Option<ObjectIndex>>>,
    /// `(owner, callback_id) -> targets`, standing in for a class's slow ARO callback body.
    member_callback_edges: RwLock<HashMap<(ObjectIndex, u32), Vec<ObjectIndex>>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            table: ChunkedObjectTable::new(1),
            schema: SchemaBuilder::new(8).reference(0).build(),
            edges: RwLock::new(HashMap::new()),
            explicit_roots: RwLock::new(Vec::new()),
            permanent: RwLock::new(HashSet::new()),
            unresolved: RwLock::new(HashSet::new()),
            not_ready_for_finish: RwLock::new(HashSet::new()),
            thread_safe_destruction: RwLock::new(HashSet::new()),
            unhashed: Mutex::new(Vec::new()),
            begin_destroyed: Mutex::new(Vec::new()),
            finish_destroyed: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
            weak_cleared: Mutex::new(Vec::new()),
            weak_slots: RwLock::new(HashMap::new()),
            member_callback_edges: RwLock::new(HashMap::new()),
        }
    }

    pub fn table(&self) -> &ChunkedObjectTable {
        &self.table
    }

    /// Allocate a new object. `root` sets the per-object `ROOT_SET` flag (the fast root path);
    /// use [`MockHost::add_explicit_root`] instead to exercise the slower `RootEnumerator` path.
    pub fn new_object(&self, root: bool) -> ObjectIndex {
        let flags = if root {
            ObjectFlags::ROOT_SET
        } else {
            ObjectFlags::EMPTY
        };
        self.table.allocate(0, flags)
    }

    pub fn add_edge(&self, from: ObjectIndex, to: ObjectIndex) {
        self.edges.write().unwrap().entry(from).or_default().push(to);
    }

    pub fn add_explicit_root(&self, index: ObjectIndex) {
        self.explicit_roots.write().unwrap().push(index);
    }

    pub fn mark_permanent(&self, index: ObjectIndex) {
        self.permanent.write().unwrap().insert(index);
    }

    pub fn mark_unresolved(&self, index: ObjectIndex) {
        self.unresolved.write().unwrap().insert(index);
    }

    pub fn mark_not_ready_for_finish_destroy(&self, index: ObjectIndex) {
        self.not_ready_for_finish.write().unwrap().insert(index);
    }

    pub fn make_finish_destroy_ready(&self, index: ObjectIndex) {
        self.not_ready_for_finish.write().unwrap().remove(&index);
    }

    pub fn mark_thread_safe_destruction(&self, index: ObjectIndex) {
        self.thread_safe_destruction.write().unwrap().insert(index);
    }

    pub fn is_destroyed(&self, index: ObjectIndex) -> bool {
        self.destroyed.lock().unwrap().contains(&index)
    }

    pub fn destroyed_objects(&self) -> Vec<ObjectIndex> {
        self.destroyed.lock().unwrap().clone()
    }

    pub fn unhashed_objects(&self) -> Vec<ObjectIndex> {
        self.unhashed.lock().unwrap().clone()
    }

    pub fn weak_cleared(&self) -> Vec<ObjectIndex> {
        self.weak_cleared.lock().unwrap().clone()
    }

    /// Records that `holder` has a weak slot pointing at `target`; nulled out automatically once
    /// `target` is reported dead through [`WeakReferenceClearer`].
    pub fn set_weak_slot(&self, holder: ObjectIndex, target: ObjectIndex) {
        self.weak_slots.write().unwrap().insert(holder, Some(target));
    }

    /// `None` either because no weak slot was ever recorded for `holder`, or because it has been
    /// nulled.
    pub fn weak_slot(&self, holder: ObjectIndex) -> Option<ObjectIndex> {
        self.weak_slots.read().unwrap().get(&holder).copied().flatten()
    }

    pub fn set_owner(&self, index: ObjectIndex, owner: Owner) {
        self.table.set_owner(index, owner);
    }

    /// Records that invoking callback `callback_id` on `owner` adds `target` as a reference.
    pub fn add_member_callback_edge(&self, owner: ObjectIndex, callback_id: u32, target: ObjectIndex) {
        self.member_callback_edges
            .write()
            .unwrap()
            .entry((owner, callback_id))
            .or_default()
            .push(target);
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

struct NullAllocator;
impl Allocator for NullAllocator {
    fn free_object(&self, _index: ObjectIndex) {}
}

impl Host for MockHost {
    fn object_table(&self) -> &dyn ObjectTable {
        &self.table
    }

    fn allocator(&self) -> &dyn Allocator {
        static ALLOCATOR: NullAllocator = NullAllocator;
        &ALLOCATOR
    }

    fn class_reflection(&self) -> &dyn ClassReflection {
        self
    }

    fn root_enumerator(&self) -> &dyn RootEnumerator {
        self
    }

    fn permanent_pool(&self) -> &dyn PermanentObjectPool {
        self
    }

    fn handle_resolver(&self) -> &dyn ObjectHandleResolver {
        self
    }

    fn lifecycle(&self) -> &dyn ObjectLifecycle {
        self
    }

    fn reference_enumerator(&self) -> &dyn ReferenceEnumerator {
        self
    }

    fn weak_reference_clearer(&self) -> &dyn WeakReferenceClearer {
        self
    }
}

impl ClassReflection for MockHost {
    fn schema_for(&self, _class_id: u32) -> Arc<ReferenceSchema> {
        self.schema.clone()
    }
}

impl RootEnumerator for MockHost {
    fn enumerate_roots(&self) -> Vec<ObjectIndex> {
        self.explicit_roots.read().unwrap().clone()
    }
}

impl PermanentObjectPool for MockHost {
    fn contains(&self, index: ObjectIndex) -> bool {
        self.permanent.read().unwrap().contains(&index)
    }
}

impl ObjectHandleResolver for MockHost {
    fn is_resolved(&self, index: ObjectIndex) -> bool {
        !self.unresolved.read().unwrap().contains(&index)
    }
}

impl ReferenceEnumerator for MockHost {
    fn enumerate_references(
        &self,
        index: ObjectIndex,
        _schema: &ReferenceSchema,
        out: &mut Vec<ObjectIndex>,
    ) {
        if let Some(targets) = self.edges.read().unwrap().get(&index) {
            out.extend(targets.iter().copied());
        }
    }

    fn invoke_member_callback(&self, owner: ObjectIndex, callback_id: u32, out: &mut Vec<ObjectIndex>) {
        if let Some(targets) = self.member_callback_edges.read().unwrap().get(&(owner, callback_id)) {
            out.extend(targets.iter().copied());
        }
    }
}

impl ObjectLifecycle for MockHost {
    fn unhash(&self, index: ObjectIndex) {
        self.unhashed.lock().unwrap().push(index);
    }

    fn is_destruction_thread_safe(&self, index: ObjectIndex) -> bool {
        self.thread_safe_destruction.read().unwrap().contains(&index)
    }

    fn is_ready_for_finish_destroy(&self, index: ObjectIndex) -> bool {
        !self.not_ready_for_finish.read().unwrap().contains(&index)
    }

    fn conditional_begin_destroy(&self, index: ObjectIndex) {
        self.begin_destroyed.lock().unwrap().push(index);
    }

    fn conditional_finish_destroy(&self, index: ObjectIndex) {
        self.finish_destroyed.lock().unwrap().push(index);
    }

    fn destroy(&self, index: ObjectIndex) {
        self.table.entry(index).flags.set(ObjectFlags::DESTROYED);
        self.destroyed.lock().unwrap().push(index);
    }
}

impl WeakReferenceClearer for MockHost {
    fn clear_weak_references_to(&self, dead: ObjectIndex) {
        self.weak_cleared.lock().unwrap().push(dead);
        for slot in self.weak_slots.write().unwrap().values_mut() {
            if *slot == Some(dead) {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_chain_reference_walk_sees_both_edges() {
        let host = MockHost::new();
        let a = host.new_object(false);
        let b = host.new_object(false);
        host.add_edge(a, b);
        let mut out = Vec::new();
        host.reference_enumerator().enumerate_references(a, &host.schema.clone(), &mut out);
        assert_eq!(out, vec![b]);
    }
}
