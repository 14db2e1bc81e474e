//! Semi-space heap with bump allocation.
//!
//! This module implements the managed heap:
//! - Two equal semi-spaces of atomic words; one is active at a time
//! - Allocation is a fetch-and-add on the active space's fill level
//! - An allocation crossing the threshold elects a collector with a
//!   try-lock; losers park until the collection is over
//! - The inactive space is kept zeroed, so fresh objects are always zero
//!
//! Handles returned by the heap are valid until the next checkpoint of the
//! calling thread. Anything that must survive one has to be rooted.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam::utils::Backoff;
use parking_lot::Mutex;

use core_types::{ClassId, EngineError, EngineResult, ObjectRef, Value};

use crate::barrier::PauseBarrier;
use crate::config::HeapConfig;
use crate::gc::{GcContext, GcStats, Tracer};
use crate::object::{self, HEADER_WORDS, WORD_BYTES};

/// The managed heap.
///
/// # Examples
///
/// ```
/// use core_types::{ClassId, ObjectRef};
/// use memory_manager::{GcContext, Heap, HeapConfig, Tracer};
///
/// struct NoRoots;
///
/// impl GcContext for NoRoots {
///     fn trace_roots(&self, _tracer: &mut Tracer<'_>) {}
///     fn trace_object(&self, _object: ObjectRef, _class: ClassId, _tracer: &mut Tracer<'_>) {}
/// }
///
/// let heap = Heap::new(HeapConfig::default().with_heap_size(4096));
/// let object = heap.allocate_object(&NoRoots, ClassId(7), 3).unwrap();
///
/// assert_eq!(heap.class_of(object), ClassId(7));
/// assert_eq!(heap.value_words(object), 3);
/// assert_eq!(heap.memory_use(), 40);
/// ```
pub struct Heap {
    spaces: [Box<[AtomicU64]>; 2],
    current: AtomicUsize,
    memory_use: AtomicUsize,
    threshold: usize,
    heap_size: usize,
    barrier: PauseBarrier,
    collection_lock: Mutex<()>,
    stats: Mutex<GcStats>,
}

fn zeroed_space(words: usize) -> Box<[AtomicU64]> {
    (0..words).map(|_| AtomicU64::new(0)).collect()
}

impl Heap {
    /// Reserves both semi-spaces.
    pub fn new(config: HeapConfig) -> Self {
        let threshold = config.threshold();
        let words = threshold / WORD_BYTES;
        tracing::debug!(heap_size = config.heap_size, threshold, "heap reserved");
        Self {
            spaces: [zeroed_space(words), zeroed_space(words)],
            current: AtomicUsize::new(0),
            memory_use: AtomicUsize::new(0),
            threshold,
            heap_size: config.heap_size,
            barrier: PauseBarrier::new(),
            collection_lock: Mutex::new(()),
            stats: Mutex::new(GcStats::default()),
        }
    }

    /// Total bytes reserved for both semi-spaces.
    pub fn heap_size(&self) -> usize {
        self.heap_size
    }

    /// Bytes usable in the active space before a collection runs.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Bytes allocated in the active space.
    pub fn memory_use(&self) -> usize {
        self.memory_use.load(Ordering::Acquire)
    }

    /// The pause barrier all mutator threads register with.
    pub fn barrier(&self) -> &PauseBarrier {
        &self.barrier
    }

    /// A snapshot of the collection statistics.
    pub fn stats(&self) -> GcStats {
        *self.stats.lock()
    }

    #[inline]
    fn space(&self) -> &[AtomicU64] {
        &self.spaces[self.current.load(Ordering::Relaxed)]
    }

    /// Allocates an object with `payload_bytes` of zeroed value area.
    ///
    /// The calling thread may be parked for a collection, and may become
    /// the collector itself. Handles held only in Rust locals are stale
    /// afterwards.
    ///
    /// # Errors
    ///
    /// - `AllocationTooLarge` if the object can never fit a semi-space
    /// - `OutOfMemory` if a collection did not free enough space
    /// - `SizeOverflow` if the size computation overflows
    pub fn allocate(
        &self,
        context: &dyn GcContext,
        class: ClassId,
        payload_bytes: usize,
    ) -> EngineResult<ObjectRef> {
        let bytes = object::object_bytes(payload_bytes)?;
        if bytes > self.threshold {
            return Err(EngineError::allocation_too_large(bytes, self.heap_size));
        }
        loop {
            self.barrier.checkpoint();
            let index = self.memory_use.fetch_add(bytes, Ordering::AcqRel);
            if index + bytes <= self.threshold {
                return Ok(self.install(index / WORD_BYTES, class, bytes));
            }
            self.memory_use.fetch_sub(bytes, Ordering::AcqRel);
            self.collect_or_wait(context, bytes)?;
        }
    }

    /// Allocates an instance with `value_words` zeroed value words.
    pub fn allocate_object(
        &self,
        context: &dyn GcContext,
        class: ClassId,
        value_words: usize,
    ) -> EngineResult<ObjectRef> {
        let bytes = object::checked_size(value_words, WORD_BYTES)?;
        self.allocate(context, class, bytes)
    }

    /// Allocates a raw array of at least `bytes` zeroed bytes. Arrays are
    /// never traced internally.
    pub fn allocate_array(&self, context: &dyn GcContext, bytes: usize) -> EngineResult<ObjectRef> {
        self.allocate(context, ClassId::ARRAY, bytes)
    }

    fn install(&self, index: usize, class: ClassId, bytes: usize) -> ObjectRef {
        let space = self.space();
        space[index].store(u64::from(class.0), Ordering::Relaxed);
        space[index + 1].store(bytes as u64, Ordering::Relaxed);
        ObjectRef::from_index(index)
    }

    /// Grows `array` to hold `bytes` without moving it, which succeeds only
    /// if it is the most recent allocation. Shrinking always succeeds and
    /// keeps the allocation unchanged.
    pub fn try_resize_in_place(&self, array: ObjectRef, bytes: usize) -> EngineResult<bool> {
        let new_total = object::object_bytes(bytes)?;
        let old_total = self.size_of(array);
        if new_total <= old_total {
            return Ok(true);
        }
        let start = array.index() * WORD_BYTES;
        let end = start + old_total;
        let new_end = start + new_total;
        if new_end > self.threshold {
            return Ok(false);
        }
        if self
            .memory_use
            .compare_exchange(end, new_end, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.space()[array.index() + 1].store(new_total as u64, Ordering::Relaxed);
            return Ok(true);
        }
        Ok(false)
    }

    /// Runs a collection now, or waits for the one already running.
    ///
    /// A caller that is not registered with the [`barrier`](Self::barrier)
    /// is not counted as parked, so the collection still waits for every
    /// registered mutator.
    pub fn collect_garbage(&self, context: &dyn GcContext) -> EngineResult<()> {
        match self.collection_lock.try_lock() {
            Some(_lock) => self.collect(context, 0),
            None => {
                self.wait_for_collection();
                Ok(())
            }
        }
    }

    fn collect_or_wait(&self, context: &dyn GcContext, request: usize) -> EngineResult<()> {
        match self.collection_lock.try_lock() {
            Some(_lock) => self.collect(context, request),
            None => {
                self.wait_for_collection();
                Ok(())
            }
        }
    }

    /// Spins until the thread that won the collection lock has requested
    /// the pause, then parks.
    fn wait_for_collection(&self) {
        let backoff = Backoff::new();
        loop {
            if self.barrier.pause_requested() {
                self.barrier.pause();
                return;
            }
            if !self.collection_lock.is_locked() {
                return;
            }
            backoff.snooze();
        }
    }

    fn collect(&self, context: &dyn GcContext, request: usize) -> EngineResult<()> {
        let pause = self.barrier.begin_collection();

        let before = self.memory_use.load(Ordering::Acquire);
        let from = self.current.load(Ordering::Relaxed);
        let to = 1 - from;
        self.current.store(to, Ordering::Relaxed);

        let (live, objects) = {
            let mut tracer = Tracer::new(self, &self.spaces[from], &self.spaces[to]);
            context.trace_roots(&mut tracer);
            tracer.scan(context);
            (tracer.live_bytes(), tracer.copied_objects())
        };
        self.memory_use.store(live, Ordering::Release);

        let used_words = before.min(self.threshold) / WORD_BYTES;
        for word in &self.spaces[from][..used_words] {
            word.store(0, Ordering::Relaxed);
        }

        let cycle = {
            let mut stats = self.stats.lock();
            stats.collections += 1;
            stats.bytes_before = before;
            stats.live_bytes = live;
            stats.reclaimed_bytes += before.saturating_sub(live) as u64;
            stats.collections
        };
        tracing::debug!(cycle, before, live, objects, request, "collection finished");

        drop(pause);

        if live + request > self.threshold {
            return Err(EngineError::out_of_memory());
        }
        Ok(())
    }

    /// Class id stored in the header of `object`.
    #[inline]
    pub fn class_of(&self, object: ObjectRef) -> ClassId {
        ClassId(self.space()[object.index()].load(Ordering::Relaxed) as u32)
    }

    /// Total size of `object` in bytes, header included.
    #[inline]
    pub fn size_of(&self, object: ObjectRef) -> usize {
        self.space()[object.index() + 1].load(Ordering::Relaxed) as usize
    }

    /// Number of value words in `object`.
    pub fn value_words(&self, object: ObjectRef) -> usize {
        object::value_words(self.size_of(object))
    }

    /// The atomic word backing value word `offset` of `object`.
    #[inline]
    pub fn field(&self, object: ObjectRef, offset: usize) -> &AtomicU64 {
        &self.space()[object.index() + HEADER_WORDS + offset]
    }

    /// `count` consecutive value words of `object` starting at `offset`.
    pub fn fields(&self, object: ObjectRef, offset: usize, count: usize) -> &[AtomicU64] {
        let start = object.index() + HEADER_WORDS + offset;
        &self.space()[start..start + count]
    }

    /// Reads value word `offset` of `object`.
    #[inline]
    pub fn read(&self, object: ObjectRef, offset: usize) -> Value {
        Value::from_raw(self.field(object, offset).load(Ordering::Relaxed))
    }

    /// Writes value word `offset` of `object`.
    #[inline]
    pub fn write(&self, object: ObjectRef, offset: usize, value: Value) {
        self.field(object, offset).store(value.raw(), Ordering::Relaxed);
    }

    /// Reads `dest.len()` value words of `object` starting at `offset`.
    pub fn read_words(&self, object: ObjectRef, offset: usize, dest: &mut [Value]) {
        let source = self.fields(object, offset, dest.len());
        for (value, word) in dest.iter_mut().zip(source) {
            *value = Value::from_raw(word.load(Ordering::Relaxed));
        }
    }

    /// Writes `source` into the value words of `object` starting at `offset`.
    pub fn write_words(&self, object: ObjectRef, offset: usize, source: &[Value]) {
        let dest = self.fields(object, offset, source.len());
        for (word, value) in dest.iter().zip(source) {
            word.store(value.raw(), Ordering::Relaxed);
        }
    }

    /// Copies `count` value words between objects, or within one object.
    /// Overlapping ranges are handled.
    pub fn copy_words(
        &self,
        from: ObjectRef,
        from_offset: usize,
        to: ObjectRef,
        to_offset: usize,
        count: usize,
    ) {
        let source = self.fields(from, from_offset, count);
        let dest = self.fields(to, to_offset, count);
        let forward = from.index() + from_offset >= to.index() + to_offset;
        let copy = |i: usize| dest[i].store(source[i].load(Ordering::Relaxed), Ordering::Relaxed);
        if forward {
            (0..count).for_each(copy);
        } else {
            (0..count).rev().for_each(copy);
        }
    }

    /// Reads byte `index` of the value area of `array`.
    pub fn read_byte(&self, array: ObjectRef, index: usize) -> u8 {
        let word = self.field(array, index / 8).load(Ordering::Relaxed);
        (word >> ((index % 8) * 8)) as u8
    }

    /// Writes byte `index` of the value area of `array`.
    pub fn write_byte(&self, array: ObjectRef, index: usize, byte: u8) {
        let slot = self.field(array, index / 8);
        let shift = (index % 8) * 8;
        let word = slot.load(Ordering::Relaxed);
        let word = (word & !(0xFF << shift)) | (u64::from(byte) << shift);
        slot.store(word, Ordering::Relaxed);
    }

    /// Reads the 32-bit element `index` of the value area of `array`.
    pub fn read_u32(&self, array: ObjectRef, index: usize) -> u32 {
        let word = self.field(array, index / 2).load(Ordering::Relaxed);
        (word >> ((index % 2) * 32)) as u32
    }

    /// Writes the 32-bit element `index` of the value area of `array`.
    pub fn write_u32(&self, array: ObjectRef, index: usize, element: u32) {
        let slot = self.field(array, index / 2);
        let shift = (index % 2) * 32;
        let word = slot.load(Ordering::Relaxed);
        let word = (word & !(0xFFFF_FFFF << shift)) | (u64::from(element) << shift);
        slot.store(word, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("heap_size", &self.heap_size)
            .field("threshold", &self.threshold)
            .field("memory_use", &self.memory_use())
            .field("current", &self.current.load(Ordering::Relaxed))
            .finish()
    }
}
