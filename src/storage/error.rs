//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage and index layers.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Buffer pool exhausted: no evictable frame")]
    OutOfMemory,

    #[error("Tuple of {size} bytes exceeds page capacity ({max} bytes)")]
    TupleTooLarge { size: usize, max: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Index handle has unexpected key layout: {0}")]
    TypeMismatch(String),

    #[error("Invariant violated: {0}")]
    BadInvariant(String),

    #[error("Tuple not found: slot {slot_id} is empty or deleted")]
    TupleNotFound { slot_id: u16 },

    #[error("Invalid slot ID: {slot_id} (max: {max_slot})")]
    InvalidSlotId { slot_id: u16, max_slot: u16 },

    #[error("Page is full: requires {required} bytes but only {available} available")]
    PageFull { required: usize, available: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type EngineResult<T> = Result<T, EngineError>;
