//! Immutable byte buffers.
//!
//! A data instance has three value words: the length in bytes, the backing
//! byte array and the offset of the first byte within that array. Slices
//! share the backing array of the data they were cut from.

use core_types::{ClassId, EngineResult, ObjectRef, Value};
use memory_manager::{Heap, Mutator, Trace, Tracer};

const LENGTH: usize = 0;
const BYTES: usize = 1;
const OFFSET: usize = 2;

/// Operations on data instances.
pub struct Data;

impl Data {
    /// Number of value words in a data instance.
    pub const VALUE_WORDS: usize = 3;

    /// Allocates a data instance holding a copy of `bytes`.
    pub fn from_bytes<M: Mutator + ?Sized>(
        mutator: &mut M,
        bytes: &[u8],
    ) -> EngineResult<ObjectRef> {
        let array = mutator.allocate_array(bytes.len())?;
        let pin = mutator.retain(array)?;
        let data = mutator.allocate_object(ClassId::DATA, Self::VALUE_WORDS);
        let array = mutator.retained(pin);
        mutator.release(1)?;
        let data = data?;

        let heap = mutator.heap();
        for (index, byte) in bytes.iter().enumerate() {
            heap.write_byte(array, index, *byte);
        }
        Self::install(heap, data, array, 0, bytes.len());
        Ok(data)
    }

    fn install(heap: &Heap, data: ObjectRef, array: ObjectRef, offset: usize, length: usize) {
        heap.write(data, LENGTH, Value::from_raw(length as u64));
        heap.write(data, BYTES, Value::from_object(array));
        heap.write(data, OFFSET, Value::from_raw(offset as u64));
    }

    /// Length in bytes.
    pub fn len(heap: &Heap, data: ObjectRef) -> usize {
        heap.read(data, LENGTH).raw() as usize
    }

    /// True if the data holds no bytes.
    pub fn is_empty(heap: &Heap, data: ObjectRef) -> bool {
        Self::len(heap, data) == 0
    }

    /// The byte at `index`. Negative indices count from the end.
    pub fn byte_at(heap: &Heap, data: ObjectRef, index: i64) -> Option<u8> {
        let length = Self::len(heap, data) as i64;
        let index = if index < 0 { index + length } else { index };
        if index < 0 || index >= length {
            return None;
        }
        let array = heap.read(data, BYTES).as_object()?;
        let offset = heap.read(data, OFFSET).raw() as usize;
        Some(heap.read_byte(array, offset + index as usize))
    }

    /// Copies the bytes out.
    pub fn bytes(heap: &Heap, data: ObjectRef) -> Vec<u8> {
        let length = Self::len(heap, data);
        let Some(array) = heap.read(data, BYTES).as_object() else {
            return Vec::new();
        };
        let offset = heap.read(data, OFFSET).raw() as usize;
        (0..length)
            .map(|index| heap.read_byte(array, offset + index))
            .collect()
    }

    /// A data instance sharing the bytes `from..from + length`, clamped to
    /// the end. A start past the end yields an empty slice.
    pub fn slice<M: Mutator + ?Sized>(
        mutator: &mut M,
        data: ObjectRef,
        from: usize,
        length: usize,
    ) -> EngineResult<ObjectRef> {
        let pin = mutator.retain(data)?;
        let slice = mutator.allocate_object(ClassId::DATA, Self::VALUE_WORDS);
        let data = mutator.retained(pin);
        mutator.release(1)?;
        let slice = slice?;

        let heap = mutator.heap();
        let total = Self::len(heap, data);
        let from = from.min(total);
        let length = length.min(total - from);
        if let Some(array) = heap.read(data, BYTES).as_object() {
            let offset = heap.read(data, OFFSET).raw() as usize;
            Self::install(heap, slice, array, offset + from, length);
        }
        Ok(slice)
    }

    /// True if both hold the same bytes.
    pub fn equals(heap: &Heap, a: ObjectRef, b: ObjectRef) -> bool {
        Self::len(heap, a) == Self::len(heap, b) && Self::bytes(heap, a) == Self::bytes(heap, b)
    }
}

impl Trace for Data {
    fn trace(data: ObjectRef, tracer: &mut Tracer<'_>) {
        tracer.mark_field(data, BYTES);
    }
}
