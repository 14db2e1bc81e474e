//! Native functions.
//!
//! A native function body names an entry of the [`NativeRegistry`], the
//! linking table handed to the runtime. The runtime refuses to start if a
//! program refers to an entry without a handler.
//!
//! The library classes get their methods from [`install_library`], which
//! adds one native function per method in the method table order given by
//! the [`list`], [`dictionary`], [`string`] and [`data`] modules.
//!
//! A handler runs in its own frame: the receiver is the frame context and
//! the arguments are the frame variables. Object arguments are rooted by
//! the function's object variable records, so a handler may allocate as
//! long as it re-reads arguments afterwards.

use std::fmt;

use builtins::{Data, Dictionary, List, StringObject};
use bytecode_system::{
    ContextType, Function, NativeId, ObjectVariableRecord, ProgramBuilder,
};
use core_types::{
    ClassId, EngineError, EngineResult, ErrorKind, ObjectRef, Value, T_OPTIONAL_VALUE,
};
use memory_manager::Mutator;

use crate::thread::{deliver, Thread};

/// A native function. Writes its result words into the destination slice.
pub type NativeHandler = fn(&mut Thread, &mut [Value]) -> EngineResult<()>;

/// First native id free for embedders. Lower ids belong to the library.
pub const FIRST_USER_NATIVE: u16 = 32;

/// Method indices of the list class.
pub mod list {
    /// `append(value: box)`
    pub const APPEND: u32 = 0;
    /// `get(index) -> box`
    pub const GET: u32 = 1;
    /// `count() -> integer`
    pub const COUNT: u32 = 2;
    /// `remove(index) -> boolean`
    pub const REMOVE: u32 = 3;
    /// `insert(index, value: box) -> boolean`
    pub const INSERT: u32 = 4;
    /// `pop() -> box`
    pub const POP: u32 = 5;
    /// `set(index, value: box) -> boolean`
    pub const SET: u32 = 6;
    /// `clear()`
    pub const CLEAR: u32 = 7;
}

/// Method indices of the dictionary class.
pub mod dictionary {
    /// `set(key: string, value: box)`
    pub const SET: u32 = 0;
    /// `get(key) -> box`
    pub const GET: u32 = 1;
    /// `remove(key) -> boolean`
    pub const REMOVE: u32 = 2;
    /// `contains(key) -> boolean`
    pub const CONTAINS: u32 = 3;
    /// `count() -> integer`
    pub const COUNT: u32 = 4;
    /// `clear() -> integer`, the number of removed entries
    pub const CLEAR: u32 = 5;
    /// `keys() -> list`
    pub const KEYS: u32 = 6;
}

/// Method indices of the string class.
pub mod string {
    /// `length() -> integer`
    pub const LENGTH: u32 = 0;
    /// `equals(other: string) -> boolean`
    pub const EQUALS: u32 = 1;
}

/// Method indices of the data class.
pub mod data {
    /// `length() -> integer`
    pub const LENGTH: u32 = 0;
    /// `byteAt(index) -> integer?`
    pub const BYTE_AT: u32 = 1;
}

/// The linking table from native ids to handlers.
#[derive(Clone, Default)]
pub struct NativeRegistry {
    handlers: Vec<Option<NativeHandler>>,
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("linked", &self.len())
            .finish()
    }
}

impl NativeRegistry {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table with the library natives linked.
    pub fn with_library() -> Self {
        let mut registry = Self::new();
        for entry in LIBRARY {
            registry.register(NativeId(entry.native), entry.handler);
        }
        registry
    }

    /// Links `native` to `handler`, replacing any previous handler.
    pub fn register(&mut self, native: NativeId, handler: NativeHandler) -> &mut Self {
        let index = usize::from(native.0);
        if self.handlers.len() <= index {
            self.handlers.resize(index + 1, None);
        }
        self.handlers[index] = Some(handler);
        self
    }

    /// The handler linked to `native`.
    ///
    /// # Errors
    ///
    /// Fails if nothing is linked to `native`.
    pub fn handler(&self, native: NativeId) -> EngineResult<NativeHandler> {
        self.handlers
            .get(usize::from(native.0))
            .copied()
            .flatten()
            .ok_or_else(|| {
                EngineError::new(
                    ErrorKind::UnlinkedNative,
                    format!("No native function is linked to id {}.", native.0),
                )
            })
    }

    /// Number of linked handlers.
    pub fn len(&self) -> usize {
        self.handlers.iter().flatten().count()
    }

    /// True if nothing is linked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct LibraryNative {
    class: ClassId,
    native: u16,
    handler: NativeHandler,
    arguments: usize,
    /// Variable holding an object argument
    object: Option<u32>,
    /// First variable of a box argument
    boxed: Option<u32>,
}

const fn native(
    class: ClassId,
    native: u16,
    handler: NativeHandler,
    arguments: usize,
) -> LibraryNative {
    LibraryNative {
        class,
        native,
        handler,
        arguments,
        object: None,
        boxed: None,
    }
}

const fn with_object(mut entry: LibraryNative, variable: u32) -> LibraryNative {
    entry.object = Some(variable);
    entry
}

const fn with_box(mut entry: LibraryNative, variable: u32) -> LibraryNative {
    entry.boxed = Some(variable);
    entry
}

/// Library methods, per class in method table order.
const LIBRARY: &[LibraryNative] = &[
    with_box(native(ClassId::LIST, 0, list_append, 4), 0),
    native(ClassId::LIST, 1, list_get, 1),
    native(ClassId::LIST, 2, list_count, 0),
    native(ClassId::LIST, 3, list_remove, 1),
    with_box(native(ClassId::LIST, 4, list_insert, 5), 1),
    native(ClassId::LIST, 5, list_pop, 0),
    with_box(native(ClassId::LIST, 6, list_set, 5), 1),
    native(ClassId::LIST, 7, list_clear, 0),
    with_box(with_object(native(ClassId::DICTIONARY, 8, dictionary_set, 5), 0), 1),
    with_object(native(ClassId::DICTIONARY, 9, dictionary_get, 1), 0),
    with_object(native(ClassId::DICTIONARY, 10, dictionary_remove, 1), 0),
    with_object(native(ClassId::DICTIONARY, 11, dictionary_contains, 1), 0),
    native(ClassId::DICTIONARY, 12, dictionary_count, 0),
    native(ClassId::DICTIONARY, 13, dictionary_clear, 0),
    native(ClassId::DICTIONARY, 14, dictionary_keys, 0),
    native(ClassId::STRING, 15, string_length, 0),
    with_object(native(ClassId::STRING, 16, string_equals, 1), 0),
    native(ClassId::DATA, 17, data_length, 0),
    native(ClassId::DATA, 18, data_byte_at, 1),
];

/// Adds the library natives to `builder` and appends them to the method
/// tables of the library classes.
pub fn install_library(builder: &mut ProgramBuilder) {
    for entry in LIBRARY {
        let mut function =
            Function::native(NativeId(entry.native), entry.arguments, ContextType::Object);
        if let Some(variable) = entry.object {
            function = function.with_record(ObjectVariableRecord::simple(variable), 0, 0);
        }
        if let Some(variable) = entry.boxed {
            function = function.with_record(ObjectVariableRecord::boxed(variable), 0, 0);
        }
        let id = builder.add_function(function);
        if let Some(class) = builder.class_mut(entry.class) {
            class.add_method(id);
        }
    }
}

fn answer(dest: &mut [Value], value: Value) -> EngineResult<()> {
    deliver(dest, &[value]);
    Ok(())
}

fn key_argument(thread: &Thread) -> EngineResult<ObjectRef> {
    thread
        .argument(0)?
        .as_object()
        .ok_or_else(|| EngineError::invalid_program("Dictionary keys must be strings"))
}

fn list_append(thread: &mut Thread, _: &mut [Value]) -> EngineResult<()> {
    let list = thread.this_object()?;
    let value = thread.argument_box(0)?;
    List::append(thread, list, value)
}

fn list_get(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let list = thread.this_object()?;
    let index = thread.argument(0)?.as_integer();
    deliver(dest, &List::get(thread.heap(), list, index));
    Ok(())
}

fn list_count(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let count = List::count(thread.heap(), thread.this_object()?);
    answer(dest, Value::from_integer(count as i64))
}

fn list_remove(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let list = thread.this_object()?;
    let index = thread.argument(0)?.as_integer();
    answer(dest, Value::from_bool(List::remove(thread.heap(), list, index)))
}

fn list_insert(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let list = thread.this_object()?;
    let index = thread.argument(0)?.as_integer();
    let value = thread.argument_box(1)?;
    let inserted = List::insert(thread, list, index, value)?;
    answer(dest, Value::from_bool(inserted))
}

fn list_pop(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let list = thread.this_object()?;
    deliver(dest, &List::pop(thread.heap(), list));
    Ok(())
}

fn list_set(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let list = thread.this_object()?;
    let index = thread.argument(0)?.as_integer();
    let value = thread.argument_box(1)?;
    let stored = List::set(thread, list, index, value)?;
    answer(dest, Value::from_bool(stored))
}

fn list_clear(thread: &mut Thread, _: &mut [Value]) -> EngineResult<()> {
    List::clear(thread.heap(), thread.this_object()?);
    Ok(())
}

fn dictionary_set(thread: &mut Thread, _: &mut [Value]) -> EngineResult<()> {
    let dictionary = thread.this_object()?;
    let key = key_argument(thread)?;
    let value = thread.argument_box(1)?;
    Dictionary::put(thread, dictionary, key, value)
}

fn dictionary_get(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let dictionary = thread.this_object()?;
    let key = key_argument(thread)?;
    deliver(dest, &Dictionary::get(thread.heap(), dictionary, key));
    Ok(())
}

fn dictionary_remove(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let dictionary = thread.this_object()?;
    let key = key_argument(thread)?;
    let removed = Dictionary::remove(thread.heap(), dictionary, key);
    answer(dest, Value::from_bool(removed))
}

fn dictionary_contains(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let dictionary = thread.this_object()?;
    let key = key_argument(thread)?;
    let found = Dictionary::contains(thread.heap(), dictionary, key);
    answer(dest, Value::from_bool(found))
}

fn dictionary_count(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let count = Dictionary::count(thread.heap(), thread.this_object()?);
    answer(dest, Value::from_integer(count as i64))
}

fn dictionary_clear(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let removed = Dictionary::clear(thread.heap(), thread.this_object()?);
    answer(dest, Value::from_integer(removed as i64))
}

fn dictionary_keys(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let dictionary = thread.this_object()?;
    let keys = Dictionary::keys(thread, dictionary)?;
    answer(dest, Value::from_object(keys))
}

fn string_length(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let length = StringObject::len(thread.heap(), thread.this_object()?);
    answer(dest, Value::from_integer(length as i64))
}

fn string_equals(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let string = thread.this_object()?;
    let equal = thread
        .argument(0)?
        .as_object()
        .is_some_and(|other| StringObject::equals(thread.heap(), string, other));
    answer(dest, Value::from_bool(equal))
}

fn data_length(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let length = Data::len(thread.heap(), thread.this_object()?);
    answer(dest, Value::from_integer(length as i64))
}

fn data_byte_at(thread: &mut Thread, dest: &mut [Value]) -> EngineResult<()> {
    let data = thread.this_object()?;
    let index = thread.argument(0)?.as_integer();
    match Data::byte_at(thread.heap(), data, index) {
        Some(byte) => deliver(
            dest,
            &[Value::from_raw(T_OPTIONAL_VALUE), Value::from_integer(i64::from(byte))],
        ),
        None => deliver(dest, &[Value::NOTHINGNESS]),
    }
    Ok(())
}
