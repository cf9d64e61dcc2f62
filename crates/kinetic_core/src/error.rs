//! # Store Error Types
//!
//! Errors raised while restoring serialized state. Everything else in the
//! core degrades to sentinels instead of failing.

use thiserror::Error;

/// Errors that can occur while decoding a full-state blob.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Input ended before a field could be read.
    #[error("truncated state: needed {needed} bytes at offset {offset}")]
    Truncated {
        /// Byte offset of the failed read.
        offset: usize,
        /// Bytes the read required.
        needed: usize,
    },

    /// Blob does not start with the state magic.
    #[error("bad magic: {0:#010x}")]
    BadMagic(u32),

    /// Blob was written by a newer format.
    #[error("unsupported state version {0}")]
    UnsupportedVersion(u32),

    /// Next-id counter outside `0..=capacity`.
    #[error("next id {0} out of range")]
    NextIdOutOfRange(i32),

    /// Entity count negative or larger than the id space.
    #[error("entity count {count} inconsistent with next id {next_id}")]
    CountMismatch {
        /// Declared count.
        count: i32,
        /// Declared next id.
        next_id: i32,
    },

    /// Entity id not below the next-id counter.
    #[error("entity id {0} out of range")]
    EntityOutOfRange(i32),

    /// Same entity listed twice.
    #[error("duplicate entity {0}")]
    DuplicateEntity(i32),

    /// Tag bytes are not UTF-8.
    #[error("invalid tag on entity {0}")]
    InvalidTag(i32),

    /// Data left over after the last entity.
    #[error("{0} trailing bytes after state")]
    TrailingBytes(usize),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
