//! The allocation surface offered to native code.
//!
//! A [`Mutator`] is a thread that may allocate. Its allocations can move
//! every object, so a handle that must survive one has to be retained
//! first and read back through its [`Retained`] ticket afterwards:
//!
//! ```text
//! let pin = mutator.retain(list)?;
//! let array = mutator.allocate_array(64)?;
//! let list = mutator.retained(pin);
//! mutator.release(1)?;
//! ```
//!
//! Retains and releases must balance.

use core_types::{ClassId, EngineResult, ObjectRef};

use crate::heap::Heap;

/// Ticket for an object pinned in a thread's retain list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retained(pub usize);

/// A thread that allocates in the managed heap.
pub trait Mutator {
    /// The heap this thread allocates in.
    fn heap(&self) -> &Heap;

    /// Allocates an instance of `class` with `value_words` zeroed words.
    fn allocate_object(&mut self, class: ClassId, value_words: usize) -> EngineResult<ObjectRef>;

    /// Allocates a raw array of at least `bytes` zeroed bytes.
    fn allocate_array(&mut self, bytes: usize) -> EngineResult<ObjectRef>;

    /// Pins `object` so that it survives, and is relocated by, the
    /// collections run until the matching release.
    fn retain(&mut self, object: ObjectRef) -> EngineResult<Retained>;

    /// The current handle of a pinned object.
    fn retained(&self, ticket: Retained) -> ObjectRef;

    /// Unpins the `count` most recently retained objects.
    fn release(&mut self, count: usize) -> EngineResult<()>;

    /// Resizes a raw array to hold `bytes`, preserving its contents.
    ///
    /// Grows in place when the array is the most recent allocation.
    /// Otherwise allocates a new array and copies the contents over; the
    /// old array is left to the collector.
    fn resize_array(&mut self, array: ObjectRef, bytes: usize) -> EngineResult<ObjectRef> {
        if self.heap().try_resize_in_place(array, bytes)? {
            return Ok(array);
        }
        let pin = self.retain(array)?;
        let fresh = match self.allocate_array(bytes) {
            Ok(fresh) => fresh,
            Err(error) => {
                self.release(1)?;
                return Err(error);
            }
        };
        let old = self.retained(pin);
        self.release(1)?;

        let heap = self.heap();
        let words = heap.value_words(old).min(heap.value_words(fresh));
        heap.copy_words(old, 0, fresh, 0, words);
        Ok(fresh)
    }
}
