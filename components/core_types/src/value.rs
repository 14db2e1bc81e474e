//! The untyped value word and handles into managed memory.
//!
//! A [`Value`] stores no runtime tag. The bytecode producer knows which
//! interpretation applies to every slot, and the engine only reinterprets
//! the bits it is told to.

use std::fmt;
use std::num::NonZeroU64;

use crate::ids::ClassId;

/// The "no value" sentinel of a simple optional, and the nothingness box type.
pub const T_NOTHINGNESS: u64 = 0;
/// First word of a simple optional that holds a value.
pub const T_OPTIONAL_VALUE: u64 = 1;
/// First word of an error union that holds an error code in its second word.
pub const T_ERROR: u64 = 0x7FFF_FFFF_FFFF_FFFF;

/// Box type: word 1 holds an object handle.
pub const T_OBJECT: u64 = 1;
/// Box type: word 1 holds a value reference.
pub const T_VT_REFERENCE: u64 = 2;
/// Box type: word 1 holds a boolean.
pub const T_BOOLEAN: u64 = 3;
/// Box type: word 1 holds an integer.
pub const T_INTEGER: u64 = 4;
/// Box type: word 1 holds a double.
pub const T_DOUBLE: u64 = 5;
/// Box type: word 1 holds a Unicode scalar.
pub const T_SYMBOL: u64 = 6;

/// Set on a box type whose payload lives in a separately allocated array
/// object referenced by word 1.
pub const REMOTE_MASK: u64 = 1 << 62;

/// Number of words in a box: one type word plus three payload words.
pub const BOX_WORDS: usize = 4;

const HEAP_REFERENCE: u64 = 1 << 63;
const FIELD_SHIFT: u32 = 40;
const OBJECT_MASK: u64 = (1 << FIELD_SHIFT) - 1;
const FIELD_MASK: u64 = (1 << (63 - FIELD_SHIFT)) - 1;

/// Handle to an object in the active semi-space.
///
/// The handle is the object's word index plus one, so that a zero word can
/// stand for "no object". A handle stays valid only until the next
/// allocation by any thread: a collection may move the object and rewrite
/// every rooted copy of the handle, but never a copy held in a Rust local.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(NonZeroU64);

impl ObjectRef {
    /// Creates a handle for the object starting at `index` words into a space.
    pub fn from_index(index: usize) -> Self {
        Self(NonZeroU64::MIN.saturating_add(index as u64))
    }

    /// Decodes a raw handle. Returns `None` for the null word.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Word index of the object's header within its semi-space.
    pub fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// The raw encoding stored in value slots.
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef(@{})", self.index())
    }
}

/// A reference to a value slot.
///
/// Stack references name an absolute word in the owning thread's stack.
/// Field references name a word in an object's value area through the
/// object's handle, so the collector can rewrite them when the object moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRef {
    /// Absolute word index into the current thread's stack.
    Stack(usize),
    /// Word `offset` of the value area of `object`.
    Field {
        /// Object containing the slot
        object: ObjectRef,
        /// Word offset into the value area
        offset: usize,
    },
}

impl ValueRef {
    /// Returns a reference `words` slots further along.
    pub fn offset_by(self, words: usize) -> Self {
        match self {
            ValueRef::Stack(index) => ValueRef::Stack(index + words),
            ValueRef::Field { object, offset } => ValueRef::Field {
                object,
                offset: offset + words,
            },
        }
    }

    fn encode(self) -> u64 {
        match self {
            ValueRef::Stack(index) => index as u64,
            ValueRef::Field { object, offset } => {
                HEAP_REFERENCE
                    | ((offset as u64 & FIELD_MASK) << FIELD_SHIFT)
                    | (object.raw() & OBJECT_MASK)
            }
        }
    }

    fn decode(raw: u64) -> Self {
        if raw & HEAP_REFERENCE == 0 {
            return ValueRef::Stack(raw as usize);
        }
        let offset = ((raw >> FIELD_SHIFT) & FIELD_MASK) as usize;
        match ObjectRef::from_raw(raw & OBJECT_MASK) {
            Some(object) => ValueRef::Field { object, offset },
            None => ValueRef::Stack(offset),
        }
    }
}

/// One machine word of untyped data.
///
/// A value can be read as an integer, a double, a boolean, a Unicode
/// scalar, an object handle, a class index or a value reference. Reading it
/// with the wrong interpretation is not undefined behaviour, just nonsense.
///
/// # Examples
///
/// ```
/// use core_types::Value;
///
/// let v = Value::from_double(1.5);
/// assert_eq!(v.as_double(), 1.5);
/// assert!(Value::TRUE.as_bool());
/// assert!(Value::NOTHINGNESS.as_object().is_none());
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    /// The nothingness sentinel, also the null object handle.
    pub const NOTHINGNESS: Value = Value(T_NOTHINGNESS);
    /// Boolean true.
    pub const TRUE: Value = Value(1);
    /// Boolean false.
    pub const FALSE: Value = Value(0);

    /// Wraps raw bits.
    pub const fn from_raw(raw: u64) -> Self {
        Value(raw)
    }

    /// The raw bits.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Stores a two's complement integer.
    pub const fn from_integer(value: i64) -> Self {
        Value(value as u64)
    }

    /// Reads the word as a two's complement integer.
    pub const fn as_integer(self) -> i64 {
        self.0 as i64
    }

    /// Stores the IEEE-754 bits of a double.
    pub fn from_double(value: f64) -> Self {
        Value(value.to_bits())
    }

    /// Reads the word as an IEEE-754 double.
    pub fn as_double(self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Stores a boolean as 0 or 1.
    pub const fn from_bool(value: bool) -> Self {
        Value(value as u64)
    }

    /// Any non-zero word is true.
    pub const fn as_bool(self) -> bool {
        self.0 != 0
    }

    /// Stores a Unicode scalar.
    pub const fn from_symbol(value: char) -> Self {
        Value(value as u64)
    }

    /// Reads the low 32 bits as a Unicode scalar, substituting U+FFFD for
    /// invalid code points.
    pub fn as_symbol(self) -> char {
        char::from_u32(self.0 as u32).unwrap_or(char::REPLACEMENT_CHARACTER)
    }

    /// Stores an object handle.
    pub const fn from_object(object: ObjectRef) -> Self {
        Value(object.0.get())
    }

    /// Stores an optional object handle, using zero for `None`.
    pub fn from_object_opt(object: Option<ObjectRef>) -> Self {
        object.map_or(Value::NOTHINGNESS, Value::from_object)
    }

    /// Reads the word as an object handle. Zero is `None`.
    pub fn as_object(self) -> Option<ObjectRef> {
        ObjectRef::from_raw(self.0)
    }

    /// Stores a class index.
    pub const fn from_class(class: ClassId) -> Self {
        Value(class.0 as u64)
    }

    /// Reads the word as a class index.
    pub const fn as_class(self) -> ClassId {
        ClassId(self.0 as u32)
    }

    /// Stores a value reference.
    pub fn from_reference(reference: ValueRef) -> Self {
        Value(reference.encode())
    }

    /// Reads the word as a value reference.
    pub fn as_reference(self) -> ValueRef {
        ValueRef::decode(self.0)
    }

    /// True if the word equals the nothingness sentinel.
    pub const fn is_nothingness(self) -> bool {
        self.0 == T_NOTHINGNESS
    }

    /// True if the word equals the error sentinel.
    pub const fn is_error(self) -> bool {
        self.0 == T_ERROR
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:#x})", self.0)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::from_integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::from_double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::from_bool(value)
    }
}

impl From<char> for Value {
    fn from(value: char) -> Self {
        Value::from_symbol(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        Value::from_object(object)
    }
}

impl From<ClassId> for Value {
    fn from(class: ClassId) -> Self {
        Value::from_class(class)
    }
}
