//! Closures and captured calls.
//!
//! Both well-known callable classes share one layout:
//!
//! | Word | Content |
//! |------|---------|
//! | `FUNCTION` | function id |
//! | `THIS` | bound context value |
//! | `CONTEXT` | the function's context type, for tracing |
//! | `CAPTURES` | raw array with the captured words, or null |
//! | `CAPTURE_SIZE` | number of captured words |
//! | `CAPTURE_DESTINATION` | first callee variable receiving the captures |
//! | `RECORDS` | raw array of encoded capture records, or null |
//! | `RECORD_COUNT` | number of capture records |
//!
//! A captured call binds a method or function to a context and has no
//! captures. Captured words are copied when the closure is created, so
//! later changes to the captured variables are not seen by the closure.

use std::sync::atomic::{AtomicU64, Ordering};

use bytecode_system::{ContextType, ObjectVariableRecord};
use core_types::{ClassId, EngineError, EngineResult, FunctionId, ObjectRef, Value};
use memory_manager::{object::checked_size, Heap, Mutator, Retained, Trace, Tracer};

use crate::roots;

const FUNCTION: usize = 0;
const THIS: usize = 1;
const CONTEXT: usize = 2;
const CAPTURES: usize = 3;
const CAPTURE_SIZE: usize = 4;
const CAPTURE_DESTINATION: usize = 5;
const RECORDS: usize = 6;
const RECORD_COUNT: usize = 7;

const WORD_BYTES: usize = 8;

/// Operations on closure and captured call instances.
pub struct Closure;

impl Closure {
    /// Number of value words in a closure instance.
    pub const VALUE_WORDS: usize = 8;

    /// Allocates a closure with room for `capture_words` captured words and
    /// `record_count` capture records. The function, context and captures
    /// are filled in afterwards with [`Closure::bind`] and
    /// [`Closure::write_capture`], once no further allocation happens.
    ///
    /// # Errors
    ///
    /// Fails if an allocation fails.
    pub fn allocate<M: Mutator + ?Sized>(
        mutator: &mut M,
        capture_words: usize,
        record_count: usize,
    ) -> EngineResult<ObjectRef> {
        let capture_bytes = checked_size(capture_words, WORD_BYTES)?;
        let record_bytes = checked_size(record_count, 2 * WORD_BYTES)?;
        let closure = mutator.allocate_object(ClassId::CLOSURE, Self::VALUE_WORDS)?;
        let pin = mutator.retain(closure)?;
        let attached = Self::attach_array(mutator, pin, CAPTURES, capture_bytes)
            .and_then(|()| Self::attach_array(mutator, pin, RECORDS, record_bytes));
        let closure = mutator.retained(pin);
        mutator.release(1)?;
        attached?;

        let heap = mutator.heap();
        heap.write(closure, CAPTURE_SIZE, Value::from_raw(capture_words as u64));
        heap.write(closure, RECORD_COUNT, Value::from_raw(record_count as u64));
        Ok(closure)
    }

    fn attach_array<M: Mutator + ?Sized>(
        mutator: &mut M,
        closure: Retained,
        field: usize,
        bytes: usize,
    ) -> EngineResult<()> {
        if bytes == 0 {
            return Ok(());
        }
        let array = mutator.allocate_array(bytes)?;
        let closure = mutator.retained(closure);
        mutator.heap().write(closure, field, Value::from_object(array));
        Ok(())
    }

    /// Allocates a captured call: a closure without captures.
    pub fn captured_call<M: Mutator + ?Sized>(mutator: &mut M) -> EngineResult<ObjectRef> {
        mutator.allocate_object(ClassId::CAPTURED_CALL, Self::VALUE_WORDS)
    }

    /// Sets the function, its context type, the bound context and the
    /// variable receiving the first captured word.
    pub fn bind(
        heap: &Heap,
        closure: ObjectRef,
        function: FunctionId,
        context: ContextType,
        this: Value,
        destination: usize,
    ) {
        heap.write(closure, FUNCTION, Value::from_raw(u64::from(function.0)));
        heap.write(closure, THIS, this);
        heap.write(closure, CONTEXT, Value::from_raw(encode_context(context)));
        heap.write(closure, CAPTURE_DESTINATION, Value::from_raw(destination as u64));
    }

    /// Stores captured word `index`.
    pub fn write_capture(
        heap: &Heap,
        closure: ObjectRef,
        index: usize,
        value: Value,
    ) -> EngineResult<()> {
        match Self::captures(heap, closure) {
            Some(captures) if index < Self::capture_size(heap, closure) => {
                heap.write(captures, index, value);
                Ok(())
            }
            _ => Err(EngineError::invalid_program(format!(
                "Capture {} exceeds the closure's capture area",
                index
            ))),
        }
    }

    /// Stores capture record `index`.
    pub fn write_record(
        heap: &Heap,
        closure: ObjectRef,
        index: usize,
        record: ObjectVariableRecord,
    ) {
        if let Some(records) = heap.read(closure, RECORDS).as_object() {
            if index < heap.read(closure, RECORD_COUNT).raw() as usize {
                let (packed, kind) = record.encode();
                heap.write(records, 2 * index, Value::from_raw(u64::from(packed)));
                heap.write(records, 2 * index + 1, Value::from_raw(u64::from(kind)));
            }
        }
    }

    /// The function the closure calls.
    pub fn function(heap: &Heap, closure: ObjectRef) -> FunctionId {
        FunctionId(heap.read(closure, FUNCTION).raw() as u32)
    }

    /// The bound context value.
    pub fn this(heap: &Heap, closure: ObjectRef) -> Value {
        heap.read(closure, THIS)
    }

    /// Number of captured words.
    pub fn capture_size(heap: &Heap, closure: ObjectRef) -> usize {
        heap.read(closure, CAPTURE_SIZE).raw() as usize
    }

    /// The first callee variable receiving the captures.
    pub fn capture_destination(heap: &Heap, closure: ObjectRef) -> usize {
        heap.read(closure, CAPTURE_DESTINATION).raw() as usize
    }

    fn captures(heap: &Heap, closure: ObjectRef) -> Option<ObjectRef> {
        heap.read(closure, CAPTURES).as_object()
    }

    /// Copies the captured words into `variables`, the callee frame's
    /// variable slots.
    ///
    /// # Errors
    ///
    /// Fails if the captures do not fit the frame.
    pub fn replay_captures(
        heap: &Heap,
        closure: ObjectRef,
        variables: &[AtomicU64],
    ) -> EngineResult<()> {
        let Some(captures) = Self::captures(heap, closure) else {
            return Ok(());
        };
        let size = Self::capture_size(heap, closure);
        let destination = Self::capture_destination(heap, closure);
        let slots = destination
            .checked_add(size)
            .and_then(|end| variables.get(destination..end))
            .ok_or_else(|| {
                EngineError::invalid_program("Captured variables do not fit the callee frame")
            })?;
        for (index, slot) in slots.iter().enumerate() {
            slot.store(heap.read(captures, index).raw(), Ordering::Relaxed);
        }
        Ok(())
    }
}

impl Trace for Closure {
    fn trace(closure: ObjectRef, tracer: &mut Tracer<'_>) {
        let heap = tracer.heap();
        roots::mark_context(
            decode_context(heap.read(closure, CONTEXT).raw()),
            heap.field(closure, THIS),
            tracer,
        );
        tracer.mark_field(closure, CAPTURES);
        tracer.mark_field(closure, RECORDS);

        let (Some(captures), Some(records)) = (
            heap.read(closure, CAPTURES).as_object(),
            heap.read(closure, RECORDS).as_object(),
        ) else {
            return;
        };
        let size = Self::capture_size(heap, closure).min(heap.value_words(captures));
        let count = heap.read(closure, RECORD_COUNT).raw() as usize;
        let count = count.min(heap.value_words(records) / 2);
        let decoded = (0..count).map(|index| {
            let packed = heap.read(records, 2 * index).raw() as u32;
            let kind = heap.read(records, 2 * index + 1).raw() as u32;
            ObjectVariableRecord::decode(packed, kind).ok()
        });
        roots::mark_by_records(
            decoded,
            |index| (index < size).then(|| heap.field(captures, index)),
            tracer,
        );
    }
}

fn encode_context(context: ContextType) -> u64 {
    match context {
        ContextType::None => 0,
        ContextType::Object => 1,
        ContextType::ValueReference => 2,
    }
}

fn decode_context(word: u64) -> ContextType {
    match word {
        1 => ContextType::Object,
        2 => ContextType::ValueReference,
        _ => ContextType::None,
    }
}
