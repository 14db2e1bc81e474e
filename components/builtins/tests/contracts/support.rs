//! A single-threaded mutator over a small heap.

use std::cell::RefCell;

use builtins::{Data, Dictionary, List, StringObject};
use core_types::{ClassId, EngineError, EngineResult, ErrorKind, ObjectRef};
use memory_manager::{GcContext, Heap, HeapConfig, Mutator, Retained, Trace, Tracer};

pub struct TestMutator {
    heap: Heap,
    pins: RefCell<Vec<ObjectRef>>,
}

impl TestMutator {
    pub fn new(heap_size: usize) -> Self {
        Self {
            heap: Heap::new(HeapConfig::default().with_heap_size(heap_size)),
            pins: RefCell::new(Vec::new()),
        }
    }

    pub fn pinned(&self) -> usize {
        self.pins.borrow().len()
    }

    pub fn collect(&self) {
        self.heap.collect_garbage(self).unwrap();
    }

    pub fn collections(&self) -> u64 {
        self.heap.stats().collections
    }

    /// Pins `object` for the rest of the test and returns its ticket.
    pub fn pin(&mut self, object: ObjectRef) -> Retained {
        self.retain(object).unwrap()
    }
}

impl GcContext for TestMutator {
    fn trace_roots(&self, tracer: &mut Tracer<'_>) {
        for pin in self.pins.borrow_mut().iter_mut() {
            *pin = tracer.mark(*pin);
        }
    }

    fn trace_object(&self, object: ObjectRef, class: ClassId, tracer: &mut Tracer<'_>) {
        match class {
            ClassId::LIST => List::trace(object, tracer),
            ClassId::DICTIONARY => Dictionary::trace(object, tracer),
            ClassId::DATA => Data::trace(object, tracer),
            ClassId::STRING => StringObject::trace(object, tracer),
            _ => {}
        }
    }
}

impl Mutator for TestMutator {
    fn heap(&self) -> &Heap {
        &self.heap
    }

    fn allocate_object(&mut self, class: ClassId, value_words: usize) -> EngineResult<ObjectRef> {
        let this: &Self = self;
        this.heap.allocate_object(this, class, value_words)
    }

    fn allocate_array(&mut self, bytes: usize) -> EngineResult<ObjectRef> {
        let this: &Self = self;
        this.heap.allocate_array(this, bytes)
    }

    fn retain(&mut self, object: ObjectRef) -> EngineResult<Retained> {
        let mut pins = self.pins.borrow_mut();
        pins.push(object);
        Ok(Retained(pins.len() - 1))
    }

    fn retained(&self, ticket: Retained) -> ObjectRef {
        self.pins.borrow()[ticket.0]
    }

    fn release(&mut self, count: usize) -> EngineResult<()> {
        let mut pins = self.pins.borrow_mut();
        let remaining = pins.len().checked_sub(count).ok_or_else(|| {
            EngineError::new(ErrorKind::RetainListUnderflow, "Released more than retained")
        })?;
        pins.truncate(remaining);
        Ok(())
    }
}
