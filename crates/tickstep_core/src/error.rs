//! # Core Error Types
//!
//! All errors that can occur while allocating, copying or simulating state.

use thiserror::Error;

/// Errors that can occur in the core state engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No free or virgin block can hold the request.
    #[error("arena out of memory: requested {requested} bytes, capacity {capacity}")]
    OutOfMemory {
        /// Payload bytes requested.
        requested: usize,
        /// Total arena capacity in bytes.
        capacity: usize,
    },

    /// A zero-byte allocation would be indistinguishable from virgin space.
    #[error("zero-sized allocation")]
    ZeroSizedAllocation,

    /// Two arenas of different capacity cannot be copied into each other.
    #[error("arena capacity mismatch: expected {expected}, got {actual}")]
    CapacityMismatch {
        /// Capacity of the destination.
        expected: usize,
        /// Capacity of the source.
        actual: usize,
    },

    /// A byte image is larger than the arena it should be loaded into.
    #[error("image of {len} bytes does not fit arena of {capacity} bytes")]
    ImageTooLarge {
        /// Length of the image.
        len: usize,
        /// Arena capacity.
        capacity: usize,
    },

    /// A record names a prefab that is not in the prefab table.
    #[error("unknown prefab: {0}")]
    UnknownPrefab(i32),

    /// An id does not point at a live entity record.
    #[error("not an entity: {0}")]
    NotAnEntity(i32),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
