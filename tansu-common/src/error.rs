//! # Error Types
//!
//! Purpose: Provide one typed error enum for every storage operation so
//! callers can match on outcomes instead of parsing strings.

use thiserror::Error;

/// Result alias used across the workspace.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the storage engine.
///
/// `OutOfMemory` is the only error a well-formed write can hit at runtime;
/// the remaining variants reject malformed arguments up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The shard's arena cannot serve the allocation.
    #[error("out of memory")]
    OutOfMemory,

    /// Key is empty or exceeds the protocol maximum.
    #[error("invalid key length {0}")]
    BadKey(usize),

    /// Value exceeds the configured per-operation maximum.
    #[error("value too large ({0} bytes)")]
    ValueTooLarge(usize),

    /// No live, unexpired entry for the key.
    #[error("not found")]
    NotFound,

    /// Caller-supplied buffer is smaller than the stored value.
    #[error("buffer too small, {required} bytes required")]
    TooSmall {
        /// Length the buffer must have to receive the value.
        required: usize,
    },
}
