//! The interfaces the core consumes from its host (spec §6 "Consumed interfaces"). The host
//! supplies one implementation of [`ObjectTable`] (or uses the default `ChunkedObjectTable`),
//! plus the other four small traits; everything else in this crate is generic over `H: Host`.
//!
//! This mirrors how the teacher treats `VMBinding`: a bundle of traits the collector core calls
//! into, owned and implemented by the embedder, never by the core itself.

use crate::object::{ObjectEntry, ObjectIndex};
use crate::schema::ReferenceSchema;
use std::sync::Arc;

/// Index-to-object mapping with per-slot atomic flags.
pub trait ObjectTable: Send + Sync {
    fn entry(&self, index: ObjectIndex) -> &ObjectEntry;
    /// The first index the collector should start scanning from; slots before this are
    /// reserved (e.g. a permanently-null index 0), mirroring `GetFirstGCIndex()`.
    fn first_gc_index(&self) -> ObjectIndex;
    /// One past the highest index ever handed out.
    fn num_indices(&self) -> u32;
    /// `false` for slots that were never populated or have already been freed.
    fn is_live(&self, index: ObjectIndex) -> bool;
}

/// `FreeObject(ptr)`. Must be safe to call from the purge worker thread while the object-table
/// lock is held.
pub trait Allocator: Send + Sync {
    fn free_object(&self, index: ObjectIndex);
}

/// Produces a `ReferenceSchema` for a class id and reports its registered slow ARO callbacks.
pub trait ClassReflection: Send + Sync {
    fn schema_for(&self, class_id: u32) -> Arc<ReferenceSchema>;
}

/// Enumerates the initial root references for a cycle. The coordinator splits the returned
/// vector evenly across workers.
pub trait RootEnumerator: Send + Sync {
    fn enumerate_roots(&self) -> Vec<ObjectIndex>;
}

/// `contains(ptr) -> bool`. Objects in the permanent pool are never traced.
pub trait PermanentObjectPool: Send + Sync {
    fn contains(&self, index: ObjectIndex) -> bool;
}

/// `isResolved(handle) -> bool`. Unresolved handles are skipped by the batcher rather than
/// forced to resolve.
pub trait ObjectHandleResolver: Send + Sync {
    fn is_resolved(&self, index: ObjectIndex) -> bool;
}

/// Walks an object's memory according to its `ReferenceSchema`, appending every raw reference
/// candidate it finds (which may be null, point into the permanent pool, or be an unresolved
/// handle — the batcher validates those cases, not this trait). The collector core has no
/// knowledge of an object's in-memory layout beyond the schema's offsets, since the allocator
/// that owns that memory is out of scope (spec §1); a host implements this by interpreting its
/// own objects' memory at the schema's offsets.
pub trait ReferenceEnumerator: Send + Sync {
    fn enumerate_references(
        &self,
        index: ObjectIndex,
        schema: &ReferenceSchema,
        out: &mut Vec<ObjectIndex>,
    );

    /// Invokes the slow ARO callback `callback_id` that `owner` registered (spec §4.4 "Slow
    /// callbacks"), appending every reference it adds to `out`. Unlike `enumerate_references`,
    /// there is no schema to drive this: the host's class-specific code decides what to add.
    fn invoke_member_callback(&self, owner: ObjectIndex, callback_id: u32, out: &mut Vec<ObjectIndex>);
}

/// Per-object lifecycle hooks driving the destruction pipeline (spec §4.8, §4.9).
pub trait ObjectLifecycle: Send + Sync {
    /// Remove the object from any host-side lookup table (name maps, handle tables) before
    /// `conditional_begin_destroy` runs. Idempotent.
    fn unhash(&self, index: ObjectIndex);
    fn is_destruction_thread_safe(&self, index: ObjectIndex) -> bool;
    fn is_ready_for_finish_destroy(&self, index: ObjectIndex) -> bool;
    fn conditional_begin_destroy(&self, index: ObjectIndex);
    fn conditional_finish_destroy(&self, index: ObjectIndex);
    /// Runs the destructor and returns the storage to the allocator. Called with the
    /// object-table lock held for thread-safe objects; called without it for unsafe objects
    /// batched on the main thread.
    fn destroy(&self, index: ObjectIndex);
}

/// Clears weak-reference slots that point at an object the gather pass just condemned. The
/// host is responsible for knowing where its own weak slots live (they are not described by a
/// `ReferenceSchema`, which only covers strong references).
pub trait WeakReferenceClearer: Send + Sync {
    fn clear_weak_references_to(&self, dead: ObjectIndex);
}

/// The full bundle of host-supplied services, analogous to the teacher's `VMBinding`. A single
/// trait object is threaded through the collector rather than five separate ones, which keeps
/// every `&dyn Host` call site symmetrical with the teacher's `&'static dyn VMBinding`-style
/// plumbing while still letting a host implement the five traits on five different types via a
/// simple wrapper.
pub trait Host: Send + Sync {
    fn object_table(&self) -> &dyn ObjectTable;
    fn allocator(&self) -> &dyn Allocator;
    fn class_reflection(&self) -> &dyn ClassReflection;
    fn root_enumerator(&self) -> &dyn RootEnumerator;
    fn permanent_pool(&self) -> &dyn PermanentObjectPool;
    fn handle_resolver(&self) -> &dyn ObjectHandleResolver;
    fn lifecycle(&self) -> &dyn ObjectLifecycle;
    fn reference_enumerator(&self) -> &dyn ReferenceEnumerator;
    fn weak_reference_clearer(&self) -> &dyn WeakReferenceClearer;
}
