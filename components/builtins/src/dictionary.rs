//! Hash map from strings to boxes.
//!
//! The dictionary is an array of buckets, each the head of a singly linked
//! chain of nodes. Nodes are raw arrays laid out as:
//!
//! | word | contents |
//! |------|----------|
//! | 0 | key string |
//! | 1..5 | value box |
//! | 5 | cached key hash |
//! | 6 | next node |
//!
//! When the number of entries passes three quarters of the bucket count,
//! the bucket array doubles. Every chain then splits into the nodes that
//! stay at their index and the nodes that move up by the old capacity,
//! both keeping their relative order.

use core_types::{ClassId, EngineResult, ObjectRef, Value, BOX_WORDS};
use memory_manager::object::WORD_BYTES;
use memory_manager::{Heap, Mutator, Retained, Trace, Tracer};

use crate::boxed::{self, BoxValue, PinnedBox};
use crate::list::List;
use crate::string::StringObject;

const BUCKETS: usize = 0;
const BUCKET_COUNT: usize = 1;
const SIZE: usize = 2;
const THRESHOLD: usize = 3;

const KEY: usize = 0;
const VALUE: usize = 1;
const HASH: usize = VALUE + BOX_WORDS;
const NEXT: usize = HASH + 1;
const NODE_BYTES: usize = (NEXT + 1) * WORD_BYTES;

/// Bucket count of the first bucket array.
pub const DEFAULT_CAPACITY: usize = 16;
/// Largest bucket count.
pub const MAXIMUM_CAPACITY: usize = 1 << 30;
const MAXIMUM_THRESHOLD: usize = i32::MAX as usize;
const LOAD_FACTOR: f64 = 0.75;

/// Operations on dictionary instances.
pub struct Dictionary;

impl Dictionary {
    /// Number of value words in a dictionary instance.
    pub const VALUE_WORDS: usize = 4;

    /// Allocates an empty dictionary. The bucket array is allocated by the
    /// first insertion.
    pub fn new<M: Mutator + ?Sized>(mutator: &mut M) -> EngineResult<ObjectRef> {
        mutator.allocate_object(ClassId::DICTIONARY, Self::VALUE_WORDS)
    }

    /// Number of entries.
    pub fn count(heap: &Heap, dictionary: ObjectRef) -> usize {
        heap.read(dictionary, SIZE).raw() as usize
    }

    /// Number of buckets, zero before the first insertion.
    pub fn capacity(heap: &Heap, dictionary: ObjectRef) -> usize {
        match Self::buckets(heap, dictionary) {
            Some(_) => Self::word(heap, dictionary, BUCKET_COUNT),
            None => 0,
        }
    }

    fn word(heap: &Heap, object: ObjectRef, offset: usize) -> usize {
        heap.read(object, offset).raw() as usize
    }

    fn set_word(heap: &Heap, object: ObjectRef, offset: usize, value: usize) {
        heap.write(object, offset, Value::from_raw(value as u64));
    }

    fn buckets(heap: &Heap, dictionary: ObjectRef) -> Option<ObjectRef> {
        heap.read(dictionary, BUCKETS).as_object()
    }

    fn next(heap: &Heap, node: ObjectRef) -> Option<ObjectRef> {
        heap.read(node, NEXT).as_object()
    }

    fn find(heap: &Heap, dictionary: ObjectRef, hash: u64, key: ObjectRef) -> Option<ObjectRef> {
        let buckets = Self::buckets(heap, dictionary)?;
        let capacity = Self::word(heap, dictionary, BUCKET_COUNT);
        let index = (hash & (capacity as u64 - 1)) as usize;
        let mut node = heap.read(buckets, index).as_object();
        while let Some(current) = node {
            if Self::matches(heap, current, hash, key) {
                return Some(current);
            }
            node = Self::next(heap, current);
        }
        None
    }

    fn matches(heap: &Heap, node: ObjectRef, hash: u64, key: ObjectRef) -> bool {
        heap.read(node, HASH).raw() == hash
            && heap
                .read(node, KEY)
                .as_object()
                .is_some_and(|stored| StringObject::equals(heap, stored, key))
    }

    /// Associates `value` with `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Fails if a node or a bucket array cannot be allocated.
    pub fn put<M: Mutator + ?Sized>(
        mutator: &mut M,
        dictionary: ObjectRef,
        key: ObjectRef,
        value: BoxValue,
    ) -> EngineResult<()> {
        let heap = mutator.heap();
        let hash = StringObject::hash(heap, key);
        if let Some(node) = Self::find(heap, dictionary, hash, key) {
            heap.write_words(node, VALUE, &value);
            return Ok(());
        }

        let value = PinnedBox::pin(mutator, value)?;
        let key = mutator.retain(key)?;
        let dictionary = mutator.retain(dictionary)?;
        let result = Self::insert_node(mutator, dictionary, key, &value, hash);
        mutator.release(2 + value.pins())?;
        result
    }

    fn insert_node<M: Mutator + ?Sized>(
        mutator: &mut M,
        dictionary: Retained,
        key: Retained,
        value: &PinnedBox,
        hash: u64,
    ) -> EngineResult<()> {
        let dict = mutator.retained(dictionary);
        if Self::buckets(mutator.heap(), dict).is_none() {
            Self::resize(mutator, dict)?;
        }
        let node = mutator.allocate_array(NODE_BYTES)?;

        let element = value.get(&*mutator);
        let dict = mutator.retained(dictionary);
        let heap = mutator.heap();
        heap.write(node, KEY, Value::from_object(mutator.retained(key)));
        heap.write_words(node, VALUE, &element);
        heap.write(node, HASH, Value::from_raw(hash));

        let buckets = match Self::buckets(heap, dict) {
            Some(buckets) => buckets,
            None => return Ok(()),
        };
        let capacity = Self::word(heap, dict, BUCKET_COUNT);
        let index = (hash & (capacity as u64 - 1)) as usize;
        match heap.read(buckets, index).as_object() {
            None => heap.write(buckets, index, Value::from_object(node)),
            Some(mut tail) => {
                while let Some(next) = Self::next(heap, tail) {
                    tail = next;
                }
                heap.write(tail, NEXT, Value::from_object(node));
            }
        }

        let size = Self::count(heap, dict) + 1;
        Self::set_word(heap, dict, SIZE, size);
        if size > Self::word(heap, dict, THRESHOLD) {
            Self::resize(mutator, dict)?;
        }
        Ok(())
    }

    /// Allocates the first bucket array, or doubles the current one.
    fn resize<M: Mutator + ?Sized>(mutator: &mut M, dictionary: ObjectRef) -> EngineResult<()> {
        let heap = mutator.heap();
        let old_capacity = Self::capacity(heap, dictionary);
        let old_threshold = Self::word(heap, dictionary, THRESHOLD);

        let (capacity, threshold) = if old_capacity == 0 {
            (
                DEFAULT_CAPACITY,
                (DEFAULT_CAPACITY as f64 * LOAD_FACTOR) as usize,
            )
        } else if old_capacity >= MAXIMUM_CAPACITY {
            Self::set_word(heap, dictionary, THRESHOLD, MAXIMUM_THRESHOLD);
            return Ok(());
        } else {
            let capacity = old_capacity << 1;
            let threshold = if capacity < MAXIMUM_CAPACITY && old_capacity >= DEFAULT_CAPACITY {
                old_threshold << 1
            } else if capacity < MAXIMUM_CAPACITY {
                (capacity as f64 * LOAD_FACTOR) as usize
            } else {
                MAXIMUM_THRESHOLD
            };
            (capacity, threshold)
        };

        let pin = mutator.retain(dictionary)?;
        let fresh = mutator.allocate_array(capacity * WORD_BYTES);
        let dictionary = mutator.retained(pin);
        mutator.release(1)?;
        let fresh = fresh?;

        let heap = mutator.heap();
        let old = Self::buckets(heap, dictionary);
        heap.write(dictionary, BUCKETS, Value::from_object(fresh));
        Self::set_word(heap, dictionary, BUCKET_COUNT, capacity);
        Self::set_word(heap, dictionary, THRESHOLD, threshold);
        tracing::trace!(capacity, threshold, "dictionary resized");

        let Some(old) = old else {
            return Ok(());
        };
        for index in 0..old_capacity {
            let Some(head) = heap.read(old, index).as_object() else {
                continue;
            };
            if Self::next(heap, head).is_none() {
                let hash = heap.read(head, HASH).raw();
                let target = (hash & (capacity as u64 - 1)) as usize;
                heap.write(fresh, target, Value::from_object(head));
                continue;
            }
            let (lo, hi) = Self::split_chain(heap, head, old_capacity);
            if let Some(lo) = lo {
                heap.write(fresh, index, Value::from_object(lo));
            }
            if let Some(hi) = hi {
                heap.write(fresh, index + old_capacity, Value::from_object(hi));
            }
        }
        Ok(())
    }

    /// Splits a chain by the `old_capacity` bit of each hash. Returns the
    /// heads of the lo and hi chains.
    fn split_chain(
        heap: &Heap,
        head: ObjectRef,
        old_capacity: usize,
    ) -> (Option<ObjectRef>, Option<ObjectRef>) {
        let mut lo: (Option<ObjectRef>, Option<ObjectRef>) = (None, None);
        let mut hi: (Option<ObjectRef>, Option<ObjectRef>) = (None, None);
        let mut node = Some(head);
        while let Some(current) = node {
            node = Self::next(heap, current);
            let hash = heap.read(current, HASH).raw();
            let chain = if hash & old_capacity as u64 == 0 {
                &mut lo
            } else {
                &mut hi
            };
            match chain.1 {
                Some(tail) => heap.write(tail, NEXT, Value::from_object(current)),
                None => chain.0 = Some(current),
            }
            chain.1 = Some(current);
        }
        for tail in [lo.1, hi.1].into_iter().flatten() {
            heap.write(tail, NEXT, Value::NOTHINGNESS);
        }
        (lo.0, hi.0)
    }

    /// The value stored for `key`, or an empty box.
    pub fn get(heap: &Heap, dictionary: ObjectRef, key: ObjectRef) -> BoxValue {
        let hash = StringObject::hash(heap, key);
        match Self::find(heap, dictionary, hash, key) {
            Some(node) => {
                let mut value = boxed::nothingness();
                heap.read_words(node, VALUE, &mut value);
                value
            }
            None => boxed::nothingness(),
        }
    }

    /// True if an entry for `key` exists.
    pub fn contains(heap: &Heap, dictionary: ObjectRef, key: ObjectRef) -> bool {
        let hash = StringObject::hash(heap, key);
        Self::find(heap, dictionary, hash, key).is_some()
    }

    /// Removes the entry for `key`. Returns `false` if there was none.
    pub fn remove(heap: &Heap, dictionary: ObjectRef, key: ObjectRef) -> bool {
        let Some(buckets) = Self::buckets(heap, dictionary) else {
            return false;
        };
        let hash = StringObject::hash(heap, key);
        let capacity = Self::word(heap, dictionary, BUCKET_COUNT);
        let index = (hash & (capacity as u64 - 1)) as usize;

        let mut previous: Option<ObjectRef> = None;
        let mut node = heap.read(buckets, index).as_object();
        while let Some(current) = node {
            if Self::matches(heap, current, hash, key) {
                let next = heap.read(current, NEXT);
                match previous {
                    Some(previous) => heap.write(previous, NEXT, next),
                    None => heap.write(buckets, index, next),
                }
                let size = Self::count(heap, dictionary);
                Self::set_word(heap, dictionary, SIZE, size.saturating_sub(1));
                return true;
            }
            previous = Some(current);
            node = Self::next(heap, current);
        }
        false
    }

    /// Drops every entry and the bucket array. Returns the previous number
    /// of entries.
    pub fn clear(heap: &Heap, dictionary: ObjectRef) -> usize {
        let size = Self::count(heap, dictionary);
        heap.write(dictionary, BUCKETS, Value::NOTHINGNESS);
        Self::set_word(heap, dictionary, BUCKET_COUNT, 0);
        Self::set_word(heap, dictionary, SIZE, 0);
        Self::set_word(heap, dictionary, THRESHOLD, 0);
        size
    }

    /// Allocates a list of every key, in bucket order.
    ///
    /// # Errors
    ///
    /// Fails if the list cannot be allocated.
    pub fn keys<M: Mutator + ?Sized>(
        mutator: &mut M,
        dictionary: ObjectRef,
    ) -> EngineResult<ObjectRef> {
        let size = Self::count(mutator.heap(), dictionary);
        let pin = mutator.retain(dictionary)?;
        let list = List::with_capacity(mutator, size);
        let dictionary = mutator.retained(pin);
        mutator.release(1)?;
        let list = list?;

        // The list has room for every key, so appending does not allocate.
        for key in Self::key_handles(mutator.heap(), dictionary) {
            List::append(mutator, list, boxed::object(key))?;
        }
        Ok(list)
    }

    /// Handles of every key, in bucket order.
    pub fn key_handles(heap: &Heap, dictionary: ObjectRef) -> Vec<ObjectRef> {
        let mut keys = Vec::with_capacity(Self::count(heap, dictionary));
        let Some(buckets) = Self::buckets(heap, dictionary) else {
            return keys;
        };
        for index in 0..Self::word(heap, dictionary, BUCKET_COUNT) {
            let mut node = heap.read(buckets, index).as_object();
            while let Some(current) = node {
                keys.extend(heap.read(current, KEY).as_object());
                node = Self::next(heap, current);
            }
        }
        keys
    }
}

impl Trace for Dictionary {
    fn trace(dictionary: ObjectRef, tracer: &mut Tracer<'_>) {
        tracer.mark_field(dictionary, BUCKETS);
        let heap = tracer.heap();
        let Some(buckets) = Self::buckets(heap, dictionary) else {
            return;
        };
        for index in 0..Self::word(heap, dictionary, BUCKET_COUNT) {
            tracer.mark_field(buckets, index);
            let mut node = heap.read(buckets, index).as_object();
            while let Some(current) = node {
                tracer.mark_field(current, KEY);
                tracer.mark_box_field(current, VALUE);
                tracer.mark_field(current, NEXT);
                node = Self::next(heap, current);
            }
        }
    }
}
