//! The reference schema: an immutable, per-class, byte-code-like description of where an
//! object's strong references live, so the tracer can visit them without per-type virtual
//! calls (spec §3 "Reference schema", §4.3).

use std::sync::Arc;

/// The closed set of schema entry kinds.
#[derive(Debug, Clone)]
pub enum SchemaKind {
    /// A single reference slot.
    Reference,
    /// A dynamic array of reference slots.
    ReferenceArray,
    /// A dynamic array of compound elements, each visited recursively via `sub_schema`.
    StructArray {
        element_stride: usize,
        sub_schema: Arc<ReferenceSchema>,
    },
    /// A set/map backing store: same traversal as `StructArray`, distinguished so a host can
    /// choose a different growth/tombstone strategy without the tracer caring.
    SparseStructArray {
        element_stride: usize,
        sub_schema: Arc<ReferenceSchema>,
    },
    /// A present-or-absent slot with a nested schema.
    Optional { sub_schema: Arc<ReferenceSchema> },
    /// A reference reached by following a fixed path of field offsets from the object base.
    FieldPath { path: Arc<[usize]> },
    /// An array of such paths.
    FieldPathArray { path: Arc<[usize]> },
    /// An out-of-band user callback with a class-specific address; not describable statically.
    MemberCallback { callback_id: u32 },
    /// Like `ReferenceArray`, but backed by the host's freezable allocator.
    FreezableReferenceArray,
    /// Like `StructArray`, but backed by the host's freezable allocator.
    FreezableStructArray {
        element_stride: usize,
        sub_schema: Arc<ReferenceSchema>,
    },
}

#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub offset: usize,
    pub kind: SchemaKind,
    /// Spec §4.3 "Mutability policy": whether the collector may null this slot in place once its
    /// target is condemned, rather than merely declining to trace through a dead reference.
    pub killable: bool,
}

/// An immutable, reference-counted per-class schema. Once built it is never mutated; subclasses
/// that add no new reference-bearing members may share their parent's `Arc<ReferenceSchema>`.
#[derive(Debug)]
pub struct ReferenceSchema {
    pub entries: Vec<SchemaEntry>,
    /// The structural stride of one instance, always a multiple of 8 (spec §3 invariant).
    pub stride: usize,
}

impl ReferenceSchema {
    pub fn empty() -> Arc<ReferenceSchema> {
        Arc::new(ReferenceSchema {
            entries: Vec::new(),
            stride: 8,
        })
    }

    /// Panics (a programming invariant violation per spec §7) if any entry's offset falls at or
    /// past `object_size`, or the stride is not a multiple of 8.
    pub fn validate(&self, object_size: usize) {
        assert!(
            self.stride % 8 == 0,
            "schema stride {} is not a multiple of 8",
            self.stride
        );
        for entry in &self.entries {
            assert!(
                entry.offset < object_size,
                "schema entry at offset {} is past the end of a {}-byte object",
                entry.offset,
                object_size
            );
        }
    }
}

/// Incrementally builds a `ReferenceSchema`. Grounded on the teacher's preference for small,
/// explicit builder types over derive-macro schema generation (the class/reflection system that
/// would drive such a macro is out of scope here).
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entries: Vec<SchemaEntry>,
    stride: usize,
}

impl SchemaBuilder {
    pub fn new(stride: usize) -> Self {
        debug_assert!(stride % 8 == 0, "stride must be a multiple of 8");
        Self {
            entries: Vec::new(),
            stride,
        }
    }

    pub fn reference(mut self, offset: usize) -> Self {
        self.entries.push(SchemaEntry {
            offset,
            kind: SchemaKind::Reference,
            killable: false,
        });
        self
    }

    /// Like [`SchemaBuilder::reference`], but the collector may null the slot in place once its
    /// target is condemned (spec §4.3 "Mutability policy").
    pub fn reference_killable(mut self, offset: usize) -> Self {
        self.entries.push(SchemaEntry {
            offset,
            kind: SchemaKind::Reference,
            killable: true,
        });
        self
    }

    pub fn reference_array(mut self, offset: usize) -> Self {
        self.entries.push(SchemaEntry {
            offset,
            kind: SchemaKind::ReferenceArray,
            killable: false,
        });
        self
    }

    pub fn struct_array(
        mut self,
        offset: usize,
        element_stride: usize,
        sub_schema: Arc<ReferenceSchema>,
    ) -> Self {
        self.entries.push(SchemaEntry {
            offset,
            kind: SchemaKind::StructArray {
                element_stride,
                sub_schema,
            },
            killable: false,
        });
        self
    }

    pub fn optional(mut self, offset: usize, sub_schema: Arc<ReferenceSchema>) -> Self {
        self.entries.push(SchemaEntry {
            offset,
            kind: SchemaKind::Optional { sub_schema },
            killable: false,
        });
        self
    }

    pub fn member_callback(mut self, offset: usize, callback_id: u32) -> Self {
        self.entries.push(SchemaEntry {
            offset,
            kind: SchemaKind::MemberCallback { callback_id },
            killable: false,
        });
        self
    }

    pub fn build(self) -> Arc<ReferenceSchema> {
        Arc::new(ReferenceSchema {
            entries: self.entries,
            stride: self.stride,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_offset_past_object_end() {
        let schema = SchemaBuilder::new(16).reference(8).build();
        schema.validate(16);
        let result = std::panic::catch_unwind(|| schema.validate(8));
        assert!(result.is_err());
    }
}
