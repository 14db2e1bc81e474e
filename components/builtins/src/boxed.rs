//! Boxes: four-word containers for values of statically unknown type.
//!
//! Word 0 is the type discriminant, words 1 to 3 the payload. A box whose
//! discriminant is `T_OBJECT`, or carries `REMOTE_MASK`, holds an object
//! handle in word 1.

use core_types::{
    EngineResult, ObjectRef, Value, BOX_WORDS, REMOTE_MASK, T_BOOLEAN, T_DOUBLE, T_ERROR,
    T_INTEGER, T_NOTHINGNESS, T_OBJECT, T_SYMBOL,
};
use memory_manager::{Mutator, Retained};

/// The words of one box.
pub type BoxValue = [Value; BOX_WORDS];

/// An empty box.
pub const fn nothingness() -> BoxValue {
    [Value::NOTHINGNESS; BOX_WORDS]
}

/// A box holding an integer.
pub const fn integer(value: i64) -> BoxValue {
    single(T_INTEGER, Value::from_integer(value))
}

/// A box holding a double.
pub fn double(value: f64) -> BoxValue {
    single(T_DOUBLE, Value::from_double(value))
}

/// A box holding a boolean.
pub const fn boolean(value: bool) -> BoxValue {
    single(T_BOOLEAN, Value::from_bool(value))
}

/// A box holding a symbol.
pub const fn symbol(value: char) -> BoxValue {
    single(T_SYMBOL, Value::from_symbol(value))
}

/// A box holding an object.
pub const fn object(object: ObjectRef) -> BoxValue {
    single(T_OBJECT, Value::from_object(object))
}

/// A box holding an error code.
pub const fn error(code: i64) -> BoxValue {
    single(T_ERROR, Value::from_integer(code))
}

const fn single(kind: u64, payload: Value) -> BoxValue {
    [
        Value::from_raw(kind),
        payload,
        Value::NOTHINGNESS,
        Value::NOTHINGNESS,
    ]
}

/// The discriminant word.
pub fn kind(value: &BoxValue) -> u64 {
    value[0].raw()
}

/// The first payload word.
pub fn payload(value: &BoxValue) -> Value {
    value[1]
}

/// True for an empty box.
pub fn is_nothingness(value: &BoxValue) -> bool {
    kind(value) == T_NOTHINGNESS
}

/// True if word 1 is an object handle the collector must follow.
pub fn holds_object(value: &BoxValue) -> bool {
    let kind = kind(value);
    kind == T_OBJECT || kind & REMOTE_MASK != 0
}

/// A box whose object payload is pinned in the retain list.
///
/// Pinning a box before an allocation and reading it back afterwards keeps
/// the payload handle current:
///
/// ```no_run
/// # use builtins::{boxed, PinnedBox};
/// # use memory_manager::Mutator;
/// # use builtins::BoxValue;
/// # use core_types::EngineResult;
/// # fn demo<M: Mutator>(mutator: &mut M, value: BoxValue) -> EngineResult<()> {
/// let pinned = PinnedBox::pin(mutator, value)?;
/// let _array = mutator.allocate_array(64)?;
/// let value = pinned.get(mutator);
/// mutator.release(pinned.pins())?;
/// # let _ = value;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PinnedBox {
    value: BoxValue,
    ticket: Option<Retained>,
}

impl PinnedBox {
    /// Retains the payload object of `value`, if any.
    pub fn pin<M: Mutator + ?Sized>(mutator: &mut M, value: BoxValue) -> EngineResult<Self> {
        let ticket = match (holds_object(&value), payload(&value).as_object()) {
            (true, Some(object)) => Some(mutator.retain(object)?),
            _ => None,
        };
        Ok(Self { value, ticket })
    }

    /// The box with its payload handle re-read from the retain list.
    pub fn get<M: Mutator + ?Sized>(&self, mutator: &M) -> BoxValue {
        let mut value = self.value;
        if let Some(ticket) = self.ticket {
            value[1] = Value::from_object(mutator.retained(ticket));
        }
        value
    }

    /// Number of retain list entries this box occupies.
    pub fn pins(&self) -> usize {
        usize::from(self.ticket.is_some())
    }
}
