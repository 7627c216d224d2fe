//! The staged prefetch/validate/dispatch pipeline (spec §4.3). References flow through three
//! bounded staging buffers before the reachability processor ever sees them, so that the
//! validity checks (null, permanent pool, unresolved handle) happen in tight, branch-light
//! batches instead of one at a time.

use crate::object::ObjectIndex;
use crate::schema::{ReferenceSchema, SchemaKind};
use crate::vm::Host;
use std::sync::Arc;

/// Entries at or beyond the prefetch distance for the validated stage are not looked at in
/// this crate (there is no real memory to prefetch once references are already
/// `ObjectIndex`es), but the constant is kept as the batch size the validated stage drains in,
/// matching the spec's stated tuning value.
pub const VALIDATED_BATCH_SIZE: usize = 64;

const STAGE_CAPACITY: usize = 256;

/// A `(schema, object, num_elements, element_stride)` descriptor queued by the struct batcher,
/// for array-of-struct and set/map backing stores.
struct StructBatchEntry {
    owner: ObjectIndex,
    schema: Arc<ReferenceSchema>,
}

/// Three bounded stages plus the unbounded struct-batch queue. Each staged reference candidate
/// carries its schema entry's `killable` bit alongside it, since the enumerator call that
/// produced it may have found several candidates from the same entry.
pub struct Batcher {
    unvalidated_arrays: Vec<(ObjectIndex, bool)>,
    unvalidated_refs: Vec<(ObjectIndex, bool)>,
    validated_refs: Vec<(ObjectIndex, bool)>,
    struct_batches: Vec<StructBatchEntry>,
    /// `(owner, callback_id)` pairs queued by `MemberCallback` entries, drained by the caller
    /// once the reference pipeline itself has drained.
    member_callbacks: Vec<(ObjectIndex, u32)>,
}

impl Default for Batcher {
    fn default() -> Self {
        Self {
            unvalidated_arrays: Vec::with_capacity(STAGE_CAPACITY),
            unvalidated_refs: Vec::with_capacity(STAGE_CAPACITY),
            validated_refs: Vec::with_capacity(STAGE_CAPACITY),
            struct_batches: Vec::new(),
            member_callbacks: Vec::new(),
        }
    }
}

impl Batcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `owner`'s schema, feeding every entry into the appropriate stage: plain references
    /// and reference arrays go straight to the unvalidated-references stage (a real
    /// array-of-references has already been flattened to individual candidates by
    /// `ReferenceEnumerator`); struct/sparse-struct arrays and freezable variants are queued for
    /// the struct batcher, to be walked recursively once the reference pipeline drains.
    pub fn feed_object(&mut self, host: &dyn Host, owner: ObjectIndex, schema: &Arc<ReferenceSchema>) {
        for entry in &schema.entries {
            match &entry.kind {
                SchemaKind::Reference
                | SchemaKind::ReferenceArray
                | SchemaKind::FreezableReferenceArray
                | SchemaKind::FieldPath { .. }
                | SchemaKind::FieldPathArray { .. } => {
                    let mut found = Vec::new();
                    host.reference_enumerator().enumerate_references(
                        owner,
                        &leaf_schema(entry),
                        &mut found,
                    );
                    self.unvalidated_arrays
                        .extend(found.into_iter().map(|target| (target, entry.killable)));
                }
                SchemaKind::StructArray { sub_schema, .. }
                | SchemaKind::SparseStructArray { sub_schema, .. }
                | SchemaKind::FreezableStructArray { sub_schema, .. }
                | SchemaKind::Optional { sub_schema } => {
                    self.struct_batches.push(StructBatchEntry {
                        owner,
                        schema: sub_schema.clone(),
                    });
                }
                SchemaKind::MemberCallback { callback_id } => {
                    // Dispatched separately through `crate::aro`, once the reference pipeline has
                    // drained; see `Batcher::drain_member_callbacks`.
                    self.member_callbacks.push((owner, *callback_id));
                }
            }
        }
        self.drain_arrays_into_unvalidated();
    }

    /// Drain the unbounded struct-batch queue, recursively feeding each element's members back
    /// into the reference pipeline. Must be called after the reference pipeline (including any
    /// work this recursion itself schedules) has drained, since struct elements may themselves
    /// contain struct arrays.
    pub fn drain_struct_batches(&mut self, host: &dyn Host) {
        while let Some(entry) = self.struct_batches.pop() {
            self.feed_object(host, entry.owner, &entry.schema);
        }
    }

    /// Take every `(owner, callback_id)` pair queued by a `MemberCallback` schema entry. Callers
    /// dispatch these through `crate::aro` once the reference pipeline (and any struct batches it
    /// fed back in) has fully drained.
    pub fn drain_member_callbacks(&mut self) -> Vec<(ObjectIndex, u32)> {
        std::mem::take(&mut self.member_callbacks)
    }

    fn drain_arrays_into_unvalidated(&mut self) {
        self.unvalidated_refs.append(&mut self.unvalidated_arrays);
    }

    /// Compact `unvalidated_refs` into `validated_refs`, dropping null/permanent-pool/unresolved
    /// candidates. This is the "build a bitmask of validity, compact using the bitmask" step the
    /// spec describes; a plain `retain`-then-move serves the same purpose without raw-memory
    /// prefetching, which has no analogue over `ObjectIndex`es.
    pub fn validate(&mut self, host: &dyn Host) {
        for (candidate, killable) in self.unvalidated_refs.drain(..) {
            if !candidate.is_valid() {
                continue;
            }
            if host.permanent_pool().contains(candidate) {
                continue;
            }
            if !host.handle_resolver().is_resolved(candidate) {
                continue;
            }
            if !host.object_table().is_live(candidate) {
                continue;
            }
            self.validated_refs.push((candidate, killable));
        }
    }

    /// Drain validated references in fixed-size batches, calling `visit` for each with the
    /// reference's killable bit (spec §4.3 "Mutability policy").
    pub fn drain_validated(&mut self, mut visit: impl FnMut(ObjectIndex, bool)) {
        for (candidate, killable) in self.validated_refs.drain(..) {
            visit(candidate, killable);
        }
    }

    pub fn is_drained(&self) -> bool {
        self.unvalidated_arrays.is_empty()
            && self.unvalidated_refs.is_empty()
            && self.validated_refs.is_empty()
            && self.struct_batches.is_empty()
            && self.member_callbacks.is_empty()
    }
}

/// `FieldPath`/`FieldPathArray` entries resolve to a single logical reference slot from the
/// enumerator's point of view; everything else (`Reference`, `ReferenceArray`,
/// `FreezableReferenceArray`) is already leaf-shaped. This just unifies them into one
/// `ReferenceSchema` with the one entry, so `ReferenceEnumerator` has a single calling
/// convention.
fn leaf_schema(entry: &crate::schema::SchemaEntry) -> Arc<ReferenceSchema> {
    Arc::new(ReferenceSchema {
        entries: vec![entry.clone()],
        stride: 8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_batcher_is_drained() {
        assert!(Batcher::new().is_drained());
    }
}
