//! Strings as codepoint arrays.
//!
//! A string instance has two value words: the length in codepoints and an
//! array holding one `u32` per codepoint. Every string has an array, the
//! empty string included.

use core_types::{ClassId, EngineError, EngineResult, ErrorKind, ObjectRef, Value};
use memory_manager::object::checked_size;
use memory_manager::{Heap, Mutator, Trace, Tracer};

const LENGTH: usize = 0;
const CHARACTERS: usize = 1;

const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;

/// Operations on string instances.
pub struct StringObject;

impl StringObject {
    /// Number of value words in a string instance.
    pub const VALUE_WORDS: usize = 2;

    /// Allocates a string holding `text`.
    pub fn from_str<M: Mutator + ?Sized>(mutator: &mut M, text: &str) -> EngineResult<ObjectRef> {
        let chars: Vec<char> = text.chars().collect();
        Self::from_chars(mutator, &chars)
    }

    /// Allocates a string holding `chars`.
    ///
    /// # Errors
    ///
    /// Fails if the codepoint array or the instance cannot be allocated.
    pub fn from_chars<M: Mutator + ?Sized>(
        mutator: &mut M,
        chars: &[char],
    ) -> EngineResult<ObjectRef> {
        let characters = mutator.allocate_array(checked_size(chars.len(), 4)?)?;
        let pin = mutator.retain(characters)?;
        let string = mutator.allocate_object(ClassId::STRING, Self::VALUE_WORDS);
        let characters = mutator.retained(pin);
        mutator.release(1)?;
        let string = string?;

        let heap = mutator.heap();
        for (index, c) in chars.iter().enumerate() {
            heap.write_u32(characters, index, u32::from(*c));
        }
        heap.write(string, LENGTH, Value::from_raw(chars.len() as u64));
        heap.write(string, CHARACTERS, Value::from_object(characters));
        Ok(string)
    }

    /// Length in codepoints.
    pub fn len(heap: &Heap, string: ObjectRef) -> usize {
        heap.read(string, LENGTH).raw() as usize
    }

    /// True for the empty string.
    pub fn is_empty(heap: &Heap, string: ObjectRef) -> bool {
        Self::len(heap, string) == 0
    }

    /// The codepoint at `index`, if in range.
    pub fn char_at(heap: &Heap, string: ObjectRef, index: usize) -> Option<char> {
        if index >= Self::len(heap, string) {
            return None;
        }
        let characters = heap.read(string, CHARACTERS).as_object()?;
        char::from_u32(heap.read_u32(characters, index))
    }

    /// All codepoints. Invalid codepoints read as U+FFFD.
    pub fn chars(heap: &Heap, string: ObjectRef) -> Vec<char> {
        let length = Self::len(heap, string);
        let Some(characters) = heap.read(string, CHARACTERS).as_object() else {
            return Vec::new();
        };
        (0..length)
            .map(|index| {
                char::from_u32(heap.read_u32(characters, index))
                    .unwrap_or(char::REPLACEMENT_CHARACTER)
            })
            .collect()
    }

    /// Converts to a Rust string.
    pub fn to_string(heap: &Heap, string: ObjectRef) -> String {
        Self::chars(heap, string).into_iter().collect()
    }

    /// True if both strings hold the same codepoints.
    pub fn equals(heap: &Heap, a: ObjectRef, b: ObjectRef) -> bool {
        if a == b {
            return true;
        }
        let length = Self::len(heap, a);
        if length != Self::len(heap, b) {
            return false;
        }
        match (
            heap.read(a, CHARACTERS).as_object(),
            heap.read(b, CHARACTERS).as_object(),
        ) {
            (Some(x), Some(y)) => (0..length).all(|i| heap.read_u32(x, i) == heap.read_u32(y, i)),
            _ => length == 0,
        }
    }

    /// FNV-64 over the little-endian bytes of every codepoint.
    pub fn hash(heap: &Heap, string: ObjectRef) -> u64 {
        let length = Self::len(heap, string);
        let Some(characters) = heap.read(string, CHARACTERS).as_object() else {
            return FNV_OFFSET_BASIS;
        };
        (0..length)
            .flat_map(|index| heap.read_u32(characters, index).to_le_bytes())
            .fold(FNV_OFFSET_BASIS, |hash, byte| {
                (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
            })
    }

    /// Allocates the concatenation of `a` and `b`.
    ///
    /// # Errors
    ///
    /// Fails if the result cannot be allocated, or if its length overflows.
    pub fn concat<M: Mutator + ?Sized>(
        mutator: &mut M,
        a: ObjectRef,
        b: ObjectRef,
    ) -> EngineResult<ObjectRef> {
        let heap = mutator.heap();
        let mut chars = Self::chars(heap, a);
        chars.extend(Self::chars(heap, b));
        if chars.len() > u32::MAX as usize {
            return Err(EngineError::new(
                ErrorKind::SizeOverflow,
                "String concatenation is too long.",
            ));
        }
        Self::from_chars(mutator, &chars)
    }
}

impl Trace for StringObject {
    fn trace(string: ObjectRef, tracer: &mut Tracer<'_>) {
        tracer.mark_field(string, CHARACTERS);
    }
}

/// FNV-64 of a Rust string, equal to [`StringObject::hash`] of the same
/// text.
///
/// # Examples
///
/// ```
/// use builtins::string::fnv64;
///
/// assert_eq!(fnv64(""), 14695981039346656037);
/// assert_ne!(fnv64("a"), fnv64("b"));
/// ```
pub fn fnv64(text: &str) -> u64 {
    text.chars()
        .flat_map(|c| u32::from(c).to_le_bytes())
        .fold(FNV_OFFSET_BASIS, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        })
}
