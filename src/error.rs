//! Error types for the small set of genuinely recoverable conditions (see the error taxonomy
//! in the crate's top-level documentation). Everything else — a schema offset past the end of an
//! object, a cluster member with no root, a weak-reference slot pointing at a freed chunk — is a
//! programming invariant violation and is handled with `log::error!` followed by a `panic!` at
//! the call site, not with this type.

use std::fmt;

/// The only two conditions a caller of this crate's public API can recover from without the
/// process aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcError {
    /// `try_collect` found the GC lock already held, and the caller's retry budget
    /// (`num_retries_before_forcing_gc`) has not yet been exhausted.
    Busy,
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcError::Busy => write!(f, "GC lock is held by another collection cycle"),
        }
    }
}

impl std::error::Error for GcError {}

pub type GcResult<T> = Result<T, GcError>;
