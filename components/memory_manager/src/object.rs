//! Heap object layout.
//!
//! An object is a run of 64-bit words in a semi-space:
//!
//! | word | contents |
//! |------|----------|
//! | 0 | class id, or the forwarding handle with [`FORWARDED`] set |
//! | 1 | total size in bytes, header included |
//! | 2.. | value area |
//!
//! Sizes are always a multiple of the word size.

use core_types::{EngineError, EngineResult};

/// Number of header words before the value area.
pub const HEADER_WORDS: usize = 2;

/// Size of one heap word in bytes.
pub const WORD_BYTES: usize = 8;

/// Set in word 0 of an object that has been copied to the other space.
pub const FORWARDED: u64 = 1 << 63;

/// Multiplies with overflow detection.
///
/// # Errors
///
/// Returns the size-overflow error if the product does not fit a `usize`.
///
/// # Examples
///
/// ```
/// use memory_manager::object::checked_size;
///
/// assert_eq!(checked_size(4, 8).unwrap(), 32);
/// assert!(checked_size(usize::MAX, 2).is_err());
/// ```
pub fn checked_size(items: usize, item_size: usize) -> EngineResult<usize> {
    items
        .checked_mul(item_size)
        .ok_or_else(EngineError::size_overflow)
}

/// Total object size in bytes for a payload of `bytes`, header included and
/// rounded up to whole words.
pub fn object_bytes(bytes: usize) -> EngineResult<usize> {
    bytes
        .checked_add(HEADER_WORDS * WORD_BYTES + WORD_BYTES - 1)
        .map(|total| total & !(WORD_BYTES - 1))
        .ok_or_else(EngineError::size_overflow)
}

/// Number of value words in an object of `total_bytes`.
pub fn value_words(total_bytes: usize) -> usize {
    (total_bytes / WORD_BYTES).saturating_sub(HEADER_WORDS)
}
