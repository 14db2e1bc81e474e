//! Growable array of boxes.
//!
//! A list instance has three value words: the element count, the capacity
//! and the items array. The items array is a raw array of `capacity` boxes
//! and is absent until the first element is added.

use core_types::{ClassId, EngineResult, ObjectRef, Value, BOX_WORDS};
use memory_manager::object::{checked_size, WORD_BYTES};
use memory_manager::{Heap, Mutator, Trace, Tracer};

use crate::boxed::{self, BoxValue, PinnedBox};

const COUNT: usize = 0;
const CAPACITY: usize = 1;
const ITEMS: usize = 2;

const INITIAL_CAPACITY: usize = 7;
const BOX_BYTES: usize = BOX_WORDS * WORD_BYTES;

/// Operations on list instances.
pub struct List;

impl List {
    /// Number of value words in a list instance.
    pub const VALUE_WORDS: usize = 3;

    /// Allocates an empty list.
    pub fn new<M: Mutator + ?Sized>(mutator: &mut M) -> EngineResult<ObjectRef> {
        mutator.allocate_object(ClassId::LIST, Self::VALUE_WORDS)
    }

    /// Allocates an empty list with room for `capacity` elements.
    pub fn with_capacity<M: Mutator + ?Sized>(
        mutator: &mut M,
        capacity: usize,
    ) -> EngineResult<ObjectRef> {
        let list = Self::new(mutator)?;
        Self::ensure_capacity(mutator, list, capacity)
    }

    /// Number of elements.
    pub fn count(heap: &Heap, list: ObjectRef) -> usize {
        heap.read(list, COUNT).raw() as usize
    }

    /// Number of elements the items array can hold.
    pub fn capacity(heap: &Heap, list: ObjectRef) -> usize {
        heap.read(list, CAPACITY).raw() as usize
    }

    fn items(heap: &Heap, list: ObjectRef) -> Option<ObjectRef> {
        heap.read(list, ITEMS).as_object()
    }

    fn set_count(heap: &Heap, list: ObjectRef, count: usize) {
        heap.write(list, COUNT, Value::from_raw(count as u64));
    }

    fn read_element(heap: &Heap, items: ObjectRef, index: usize) -> BoxValue {
        let mut value = boxed::nothingness();
        heap.read_words(items, index * BOX_WORDS, &mut value);
        value
    }

    fn write_element(heap: &Heap, items: ObjectRef, index: usize, value: &BoxValue) {
        heap.write_words(items, index * BOX_WORDS, value);
    }

    /// Resolves a possibly negative index against `count`.
    fn resolve(index: i64, count: usize) -> Option<usize> {
        let index = if index < 0 {
            index + count as i64
        } else {
            index
        };
        usize::try_from(index).ok()
    }

    /// Grows the items array to at least `size` elements. Returns the
    /// current handle of `list`.
    ///
    /// # Errors
    ///
    /// Fails if the new items array cannot be allocated.
    pub fn ensure_capacity<M: Mutator + ?Sized>(
        mutator: &mut M,
        list: ObjectRef,
        size: usize,
    ) -> EngineResult<ObjectRef> {
        if Self::capacity(mutator.heap(), list) >= size {
            return Ok(list);
        }
        let bytes = checked_size(size, BOX_BYTES)?;
        let pin = mutator.retain(list)?;
        let items = match Self::items(mutator.heap(), list) {
            Some(items) => mutator.resize_array(items, bytes),
            None => mutator.allocate_array(bytes),
        };
        let list = mutator.retained(pin);
        mutator.release(1)?;
        let items = items?;

        let heap = mutator.heap();
        heap.write(list, ITEMS, Value::from_object(items));
        heap.write(list, CAPACITY, Value::from_raw(size as u64));
        Ok(list)
    }

    /// Makes room for one more element and returns the current handle of
    /// `list`.
    fn grow<M: Mutator + ?Sized>(mutator: &mut M, list: ObjectRef) -> EngineResult<ObjectRef> {
        let heap = mutator.heap();
        let count = Self::count(heap, list);
        let capacity = Self::capacity(heap, list);
        if count < capacity {
            return Ok(list);
        }
        let expanded = if capacity == 0 {
            INITIAL_CAPACITY
        } else {
            capacity + (capacity >> 1)
        };
        Self::ensure_capacity(mutator, list, expanded.max(count + 1))
    }

    /// Appends `value`.
    ///
    /// # Errors
    ///
    /// Fails if the list had to grow and the allocation failed.
    pub fn append<M: Mutator + ?Sized>(
        mutator: &mut M,
        list: ObjectRef,
        value: BoxValue,
    ) -> EngineResult<()> {
        let value = PinnedBox::pin(mutator, value)?;
        let grown = Self::grow(mutator, list);
        let element = value.get(&*mutator);
        mutator.release(value.pins())?;
        let list = grown?;

        let heap = mutator.heap();
        let count = Self::count(heap, list);
        if let Some(items) = Self::items(heap, list) {
            Self::write_element(heap, items, count, &element);
            Self::set_count(heap, list, count + 1);
        }
        Ok(())
    }

    /// The element at `index`. Negative indices count from the end.
    /// Out-of-range indices yield an empty box.
    pub fn get(heap: &Heap, list: ObjectRef, index: i64) -> BoxValue {
        let count = Self::count(heap, list);
        match (Self::resolve(index, count), Self::items(heap, list)) {
            (Some(index), Some(items)) if index < count => Self::read_element(heap, items, index),
            _ => boxed::nothingness(),
        }
    }

    /// Stores `value` at `index`, growing the list as needed. Elements
    /// between the old end and `index` are empty boxes. Negative indices
    /// count from the end.
    ///
    /// Returns `false` if a negative index reaches before the start.
    pub fn set<M: Mutator + ?Sized>(
        mutator: &mut M,
        list: ObjectRef,
        index: i64,
        value: BoxValue,
    ) -> EngineResult<bool> {
        let count = Self::count(mutator.heap(), list);
        let Some(index) = Self::resolve(index, count) else {
            return Ok(false);
        };

        let value = PinnedBox::pin(mutator, value)?;
        let grown = Self::ensure_capacity(mutator, list, index + 1);
        let element = value.get(&*mutator);
        mutator.release(value.pins())?;
        let list = grown?;

        let heap = mutator.heap();
        if let Some(items) = Self::items(heap, list) {
            Self::write_element(heap, items, index, &element);
            if count <= index {
                Self::set_count(heap, list, index + 1);
            }
        }
        Ok(true)
    }

    /// Inserts `value` before the element at `index`. Negative indices
    /// count from the end; inserting at `count` appends.
    ///
    /// Returns `false` if the index is out of range.
    pub fn insert<M: Mutator + ?Sized>(
        mutator: &mut M,
        list: ObjectRef,
        index: i64,
        value: BoxValue,
    ) -> EngineResult<bool> {
        let count = Self::count(mutator.heap(), list);
        let index = match Self::resolve(index, count) {
            Some(index) if index <= count => index,
            _ => return Ok(false),
        };

        let value = PinnedBox::pin(mutator, value)?;
        let grown = Self::grow(mutator, list);
        let element = value.get(&*mutator);
        mutator.release(value.pins())?;
        let list = grown?;

        let heap = mutator.heap();
        if let Some(items) = Self::items(heap, list) {
            let tail = (count - index) * BOX_WORDS;
            heap.copy_words(
                items,
                index * BOX_WORDS,
                items,
                (index + 1) * BOX_WORDS,
                tail,
            );
            Self::write_element(heap, items, index, &element);
            Self::set_count(heap, list, count + 1);
        }
        Ok(true)
    }

    /// Removes the element at `index`, shifting the rest down. Negative
    /// indices count from the end.
    ///
    /// Returns `false` if the index is out of range.
    pub fn remove(heap: &Heap, list: ObjectRef, index: i64) -> bool {
        let count = Self::count(heap, list);
        let (Some(index), Some(items)) = (Self::resolve(index, count), Self::items(heap, list))
        else {
            return false;
        };
        if index >= count {
            return false;
        }
        let tail = (count - index - 1) * BOX_WORDS;
        heap.copy_words(
            items,
            (index + 1) * BOX_WORDS,
            items,
            index * BOX_WORDS,
            tail,
        );
        Self::write_element(heap, items, count - 1, &boxed::nothingness());
        Self::set_count(heap, list, count - 1);
        true
    }

    /// Removes and returns the last element, or an empty box.
    pub fn pop(heap: &Heap, list: ObjectRef) -> BoxValue {
        let count = Self::count(heap, list);
        let Some(items) = Self::items(heap, list) else {
            return boxed::nothingness();
        };
        if count == 0 {
            return boxed::nothingness();
        }
        let value = Self::read_element(heap, items, count - 1);
        Self::write_element(heap, items, count - 1, &boxed::nothingness());
        Self::set_count(heap, list, count - 1);
        value
    }

    /// Removes every element. The capacity is kept.
    pub fn clear(heap: &Heap, list: ObjectRef) {
        let count = Self::count(heap, list);
        if let Some(items) = Self::items(heap, list) {
            let empty = vec![Value::NOTHINGNESS; count * BOX_WORDS];
            heap.write_words(items, 0, &empty);
        }
        Self::set_count(heap, list, 0);
    }

    /// Copies all elements out of the list.
    pub fn elements(heap: &Heap, list: ObjectRef) -> Vec<BoxValue> {
        let count = Self::count(heap, list);
        match Self::items(heap, list) {
            Some(items) => (0..count)
                .map(|index| Self::read_element(heap, items, index))
                .collect(),
            None => Vec::new(),
        }
    }
}

impl Trace for List {
    fn trace(list: ObjectRef, tracer: &mut Tracer<'_>) {
        tracer.mark_field(list, ITEMS);
        let heap = tracer.heap();
        let Some(items) = Self::items(heap, list) else {
            return;
        };
        for index in 0..Self::count(heap, list) {
            tracer.mark_box_field(items, index * BOX_WORDS);
        }
    }
}
