//! Error types for cache operations.

use std::fmt;

/// Errors that can occur during cache operations.
///
/// Absence of a key or range is never an error; lookups report it through
/// `Option` or an empty result instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// A caller supplied an argument the operation cannot accept, such as a
    /// zero-length range or a zero bucket count.
    InvalidArgument,

    /// `offset + count` does not fit in the 64-bit unit address space.
    RangeOverflow,

    /// The byte length of a value does not match `count * unit_size`.
    SizeMismatch,

    /// Allocating the bucket array failed.
    OutOfMemory,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::RangeOverflow => write!(f, "range overflows the address space"),
            Self::SizeMismatch => write!(f, "value size does not match range length"),
            Self::OutOfMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
