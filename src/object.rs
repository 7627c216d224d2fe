//! The object table's per-slot state: a 32-bit index, an atomic flags word, and the small amount
//! of bookkeeping (owner/cluster index, class id) the collector needs per object. Mirrors the
//! teacher's `Address`/`ObjectReference` newtype style (`#[repr(transparent)]`, `Copy + Eq + Hash
//! + Ord`) without carrying over the raw-pointer semantics those types have in a moving-GC world.

use std::sync::atomic::{AtomicU32, Ordering};

/// A 32-bit index into the global chunked object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ObjectIndex(u32);

static_assertions::assert_eq_size!(ObjectIndex, u32);

impl ObjectIndex {
    pub const INVALID: ObjectIndex = ObjectIndex(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        ObjectIndex(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

impl std::fmt::Display for ObjectIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A small macro-free stand-in for the `bitflags` crate, matching the teacher's preference for
/// hand-rolled `AtomicU32` + mask constants over an extra dependency for bit twiddling.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name($repr);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub const EMPTY: $name = $name(0);

            pub const fn bits(self) -> $repr {
                self.0
            }

            pub const fn from_bits(bits: $repr) -> Self {
                $name(bits)
            }

            pub const fn contains(self, other: $name) -> bool {
                (self.0 & other.0) == other.0
            }

            pub const fn union(self, other: $name) -> Self {
                $name(self.0 | other.0)
            }

            pub const fn intersects(self, other: $name) -> bool {
                (self.0 & other.0) != 0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                self.union(rhs)
            }
        }
    };
}

bitflags_like! {
    /// Flags relevant to the core (spec §3). Objects also carry user-level "root set keep
    /// flags" tested only during mark; those are opaque to this crate and surfaced through
    /// `GarbageCollectionKeepFlags` once a `ClassReflection` implementation has decided they
    /// apply.
    pub struct ObjectFlags: u32 {
        const UNREACHABLE = 1 << 0;
        const REACHABLE_IN_CLUSTER = 1 << 1;
        const CLUSTER_ROOT = 1 << 2;
        const ROOT_SET = 1 << 3;
        const GC_KEEP_FLAGS = 1 << 4;
        const KILLABLE = 1 << 5;
        const DESTROYED = 1 << 6;
        const PENDING_CONSTRUCTION = 1 << 7;
        /// The object (always a cluster root, or a regular object) has been explicitly marked
        /// garbage ("PendingKill") ahead of the next mark, forcing it (and its cluster, if any)
        /// to be treated as unreachable regardless of incoming references.
        const GARBAGE = 1 << 8;
        /// `ConditionalBeginDestroy` has already been called for this object; calling it again
        /// would violate the "BeginDestroy may only be called once" invariant.
        const BEGIN_DESTROY_CALLED = 1 << 9;
    }
}

/// An atomic flags word, plus the single helper every concurrent call site uses to perform a
/// race-free "did I win the flip" update (spec §9's "this-thread-cleared-the-flag" idiom).
#[derive(Debug)]
pub struct AtomicObjectFlags(AtomicU32);

impl AtomicObjectFlags {
    pub fn new(initial: ObjectFlags) -> Self {
        Self(AtomicU32::new(initial.bits()))
    }

    pub fn load(&self, order: Ordering) -> ObjectFlags {
        ObjectFlags::from_bits(self.0.load(order))
    }

    /// Atomically clear `mask` from the flags word. Returns `true` if this call's CAS is the one
    /// that performed the clear (i.e. `mask` was previously set and this thread won the race to
    /// clear it). Exactly one concurrent caller ever observes `true` for a given transition,
    /// which is what lets the reachability processor enqueue follow-up work exactly once.
    pub fn try_clear(&self, mask: ObjectFlags) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current & mask.bits() == 0 {
                return false;
            }
            let new = current & !mask.bits();
            match self
                .0
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Atomically set `mask`. Returns `true` if this call's CAS is the one that performed the
    /// set (the mask was previously clear).
    pub fn try_set(&self, mask: ObjectFlags) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if current & mask.bits() == mask.bits() {
                return false;
            }
            let new = current | mask.bits();
            match self
                .0
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Unconditionally set `mask`, without caring who "won". Used for flags (e.g.
    /// `PENDING_CONSTRUCTION`) whose clear is only ever observed, never raced on.
    pub fn set(&self, mask: ObjectFlags) {
        self.0.fetch_or(mask.bits(), Ordering::AcqRel);
    }

    pub fn clear(&self, mask: ObjectFlags) {
        self.0.fetch_and(!mask.bits(), Ordering::AcqRel);
    }
}

/// `OwnerIndex` as described in spec §3: negative (stored as `Root`) for a cluster root, positive
/// (`Member`) pointing back at the root for a member, `None` for an object with no cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    None,
    Root { cluster_index: u32 },
    Member { root: ObjectIndex },
}

/// One slot of the global chunked object table.
pub struct ObjectEntry {
    pub flags: AtomicObjectFlags,
    pub owner: atomic_refcell::AtomicRefCell<Owner>,
    /// Opaque class identity, resolved to a `ReferenceSchema` via `ClassReflection`.
    pub class_id: u32,
}

impl ObjectEntry {
    pub fn new(class_id: u32, initial: ObjectFlags) -> Self {
        Self {
            flags: AtomicObjectFlags::new(initial),
            owner: atomic_refcell::AtomicRefCell::new(Owner::None),
            class_id,
        }
    }

    pub fn owner(&self) -> Owner {
        *self.owner.borrow()
    }

    pub fn set_owner(&self, owner: Owner) {
        *self.owner.borrow_mut() = owner;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::Ordering as O;

    #[test]
    fn try_clear_has_single_winner_under_contention() {
        let flags = Arc::new(AtomicObjectFlags::new(ObjectFlags::UNREACHABLE));
        let winners = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let flags = flags.clone();
                    scope.spawn(move || flags.try_clear(ObjectFlags::UNREACHABLE))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|&won| won)
                .count()
        });
        assert_eq!(winners, 1);
        assert!(!flags.load(O::Acquire).contains(ObjectFlags::UNREACHABLE));
    }

    #[test]
    fn try_clear_is_false_when_already_clear() {
        let flags = AtomicObjectFlags::new(ObjectFlags::EMPTY);
        assert!(!flags.try_clear(ObjectFlags::UNREACHABLE));
    }
}
