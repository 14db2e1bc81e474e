//! Copying collection.
//!
//! This module implements Cheney's algorithm over the two semi-spaces of a
//! [`Heap`]:
//! - The roots are copied to the to-space first, each root slot being
//!   rewritten to the new handle
//! - The to-space is then scanned linearly; every object found is handed to
//!   the [`GcContext`], which marks its outgoing references
//! - Marking an object that was already copied returns the forwarding handle
//!   left in its old header
//!
//! The scan ends when it catches up with the copy pointer.

use std::sync::atomic::{AtomicU64, Ordering};

use core_types::{ClassId, ObjectRef, Value, ValueRef, REMOTE_MASK, T_OBJECT};

use crate::heap::Heap;
use crate::object::{FORWARDED, HEADER_WORDS, WORD_BYTES};

/// The owner of the roots and of the class table.
///
/// The runtime implements this trait. The heap calls it while every other
/// thread is parked.
pub trait GcContext {
    /// Marks every root: thread stacks, retain lists and the string pool.
    fn trace_roots(&self, tracer: &mut Tracer<'_>);

    /// Marks the outgoing references of `object`, an instance of `class`
    /// that has just been copied to the to-space. Never called for raw
    /// arrays.
    fn trace_object(&self, object: ObjectRef, class: ClassId, tracer: &mut Tracer<'_>);
}

/// Tracing of a library layout whose references are not described by flat
/// instance variable records.
pub trait Trace {
    /// Marks the references held by `object`.
    fn trace(object: ObjectRef, tracer: &mut Tracer<'_>);
}

/// Collection statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Completed collections
    pub collections: u64,
    /// Bytes in use after the last collection
    pub live_bytes: usize,
    /// Bytes in use before the last collection
    pub bytes_before: usize,
    /// Bytes reclaimed over all collections
    pub reclaimed_bytes: u64,
}

/// Copies reachable objects into the to-space and rewrites references.
///
/// Object handles passed to the `mark_*` methods refer to the from-space.
/// Field helpers take objects already in the to-space, which is the active
/// space of the heap during a collection.
pub struct Tracer<'h> {
    heap: &'h Heap,
    from: &'h [AtomicU64],
    to: &'h [AtomicU64],
    top: usize,
    copied: usize,
}

impl<'h> Tracer<'h> {
    pub(crate) fn new(heap: &'h Heap, from: &'h [AtomicU64], to: &'h [AtomicU64]) -> Self {
        Self {
            heap,
            from,
            to,
            top: 0,
            copied: 0,
        }
    }

    /// The heap being collected. Reads through it see the to-space.
    pub fn heap(&self) -> &'h Heap {
        self.heap
    }

    /// Bytes copied so far.
    pub fn live_bytes(&self) -> usize {
        self.top * WORD_BYTES
    }

    /// Number of objects copied so far.
    pub fn copied_objects(&self) -> usize {
        self.copied
    }

    /// Copies `object` unless it was already copied, and returns its new
    /// handle.
    pub fn mark(&mut self, object: ObjectRef) -> ObjectRef {
        let index = object.index();
        let header = self.from[index].load(Ordering::Relaxed);
        if header & FORWARDED != 0 {
            if let Some(forwarded) = ObjectRef::from_raw(header & !FORWARDED) {
                return forwarded;
            }
        }

        let words = (self.from[index + 1].load(Ordering::Relaxed) as usize / WORD_BYTES)
            .max(HEADER_WORDS);
        let target = self.top;
        for offset in 0..words {
            let word = self.from[index + offset].load(Ordering::Relaxed);
            self.to[target + offset].store(word, Ordering::Relaxed);
        }
        self.top += words;
        self.copied += 1;

        let moved = ObjectRef::from_index(target);
        self.from[index].store(FORWARDED | moved.raw(), Ordering::Relaxed);
        moved
    }

    /// Marks the object a value word refers to. Null passes through.
    pub fn mark_value(&mut self, value: Value) -> Value {
        match value.as_object() {
            Some(object) => Value::from_object(self.mark(object)),
            None => value,
        }
    }

    /// Marks the object handle stored in `slot` and rewrites the slot.
    pub fn mark_slot(&mut self, slot: &AtomicU64) {
        let value = Value::from_raw(slot.load(Ordering::Relaxed));
        if let Some(object) = value.as_object() {
            let moved = self.mark(object);
            slot.store(moved.raw(), Ordering::Relaxed);
        }
    }

    /// Marks the payload of the box starting at `slots[0]` if the box holds
    /// an object or a remote value.
    pub fn mark_box(&mut self, slots: &[AtomicU64]) {
        let (Some(kind), Some(payload)) = (slots.first(), slots.get(1)) else {
            return;
        };
        let kind = kind.load(Ordering::Relaxed);
        if kind == T_OBJECT || kind & REMOTE_MASK != 0 {
            self.mark_slot(payload);
        }
    }

    /// Marks the object a value reference stored in `slot` points into.
    /// Stack references are left alone.
    pub fn mark_reference_slot(&mut self, slot: &AtomicU64) {
        let value = Value::from_raw(slot.load(Ordering::Relaxed));
        if let ValueRef::Field { object, offset } = value.as_reference() {
            let moved = self.mark(object);
            let reference = ValueRef::Field {
                object: moved,
                offset,
            };
            slot.store(Value::from_reference(reference).raw(), Ordering::Relaxed);
        }
    }

    /// Marks the object handle in field `offset` of the to-space object
    /// `object`.
    pub fn mark_field(&mut self, object: ObjectRef, offset: usize) {
        let heap = self.heap;
        self.mark_slot(heap.field(object, offset));
    }

    /// Marks the box at field `offset` of the to-space object `object`.
    pub fn mark_box_field(&mut self, object: ObjectRef, offset: usize) {
        let heap = self.heap;
        self.mark_box(heap.fields(object, offset, 2));
    }

    /// Marks the value reference in field `offset` of the to-space object
    /// `object`.
    pub fn mark_reference_field(&mut self, object: ObjectRef, offset: usize) {
        let heap = self.heap;
        self.mark_reference_slot(heap.field(object, offset));
    }

    /// Scans the to-space until every copied object has been traced.
    pub(crate) fn scan(&mut self, context: &dyn GcContext) {
        let mut scan = 0;
        while scan < self.top {
            let class = ClassId(self.to[scan].load(Ordering::Relaxed) as u32);
            let words = (self.to[scan + 1].load(Ordering::Relaxed) as usize / WORD_BYTES)
                .max(HEADER_WORDS);
            if class != ClassId::ARRAY {
                context.trace_object(ObjectRef::from_index(scan), class, self);
            }
            scan += words;
        }
    }
}

impl std::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("top", &self.top)
            .field("copied", &self.copied)
            .finish()
    }
}
