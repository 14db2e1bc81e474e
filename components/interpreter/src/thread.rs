//! Interpreter threads.
//!
//! Each thread owns a fixed-size stack of words holding its frames and a
//! small retain list. Both live in a [`ThreadState`] shared with the
//! registry, so a collector running on another thread can scan and rewrite
//! them while this thread is parked.
//!
//! Calls happen in two steps. [`Thread::reserve_frame`] places the callee
//! frame above the caller and links it at once, so arguments produced into
//! it are scanned by any collection they trigger. The frame becomes the
//! active one when the function is performed.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use arrayvec::ArrayVec;
use parking_lot::Mutex;

use builtins::BoxValue;
use core_types::{
    ClassId, EngineError, EngineResult, ErrorKind, FunctionId, ObjectRef, TraceFrame, Value,
    BOX_WORDS,
};
use memory_manager::{Heap, Mutator, Retained};

use crate::call_frame::{
    self, CallFrame, CURSOR, FRAME_HEADER_WORDS, FUNCTION, NO_CURSOR, PARENT, THIS,
};
use crate::runtime::Runtime;

/// Capacity of a thread's retain list.
pub const RETAIN_CAPACITY: usize = 100;

/// The parts of a thread the collector reads and rewrites.
#[derive(Debug)]
pub struct ThreadState {
    pub(crate) stack: Box<[AtomicU64]>,
    /// Base + 1 of the innermost linked frame, 0 if there is none
    pub(crate) top: AtomicUsize,
    pub(crate) retained: Mutex<ArrayVec<ObjectRef, RETAIN_CAPACITY>>,
}

impl ThreadState {
    /// Creates a state with a zeroed stack of `stack_words` words.
    pub fn new(stack_words: usize) -> Self {
        Self {
            stack: (0..stack_words).map(|_| AtomicU64::new(0)).collect(),
            top: AtomicUsize::new(0),
            retained: Mutex::new(ArrayVec::new()),
        }
    }

    /// Number of objects currently pinned.
    pub fn pinned(&self) -> usize {
        self.retained.lock().len()
    }

    /// The linked frames, innermost first.
    pub fn frames(&self) -> Vec<CallFrame> {
        call_frame::frames(&self.stack, self.top.load(Ordering::Relaxed)).collect()
    }

    pub(crate) fn pin(&self, object: ObjectRef) -> EngineResult<Retained> {
        let mut retained = self.retained.lock();
        let ticket = Retained(retained.len());
        retained
            .try_push(object)
            .map_err(|_| EngineError::new(ErrorKind::RetainListOverflow, "Retain list overflow."))?;
        Ok(ticket)
    }
}

/// An interpreter thread attached to a [`Runtime`].
///
/// Dropping the thread leaves the pause barrier. An attached thread also
/// leaves the registry; a spawned one stays there until it is joined.
pub struct Thread {
    pub(crate) runtime: Arc<Runtime>,
    pub(crate) state: Arc<ThreadState>,
    /// Base of the active frame
    pub(crate) frame: usize,
    /// First free stack word
    pub(crate) end: usize,
    /// Words produced by the last `Return`
    pub(crate) returned: Vec<Value>,
    /// Whether dropping the thread removes its state from the registry
    attached: bool,
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("frame", &self.frame)
            .field("end", &self.end)
            .field("pinned", &self.state.pinned())
            .finish()
    }
}

impl Thread {
    /// Attaches the calling OS thread to `runtime`. Waits for a running
    /// collection to finish first.
    pub fn attach(runtime: &Arc<Runtime>) -> Self {
        let state = Arc::new(ThreadState::new(runtime.config().stack_words));
        runtime.heap().barrier().register();
        runtime.threads().push(Arc::clone(&state));
        Self::with_state(Arc::clone(runtime), state, true)
    }

    /// Takes over a state the spawning thread already registered. The state
    /// stays registered after the thread is dropped, until it is joined.
    pub(crate) fn adopt(runtime: Arc<Runtime>, state: Arc<ThreadState>) -> Self {
        runtime.heap().barrier().register();
        Self::with_state(runtime, state, false)
    }

    fn with_state(runtime: Arc<Runtime>, state: Arc<ThreadState>, attached: bool) -> Self {
        Self {
            runtime,
            state,
            frame: 0,
            end: 0,
            returned: Vec::new(),
            attached,
        }
    }

    /// The runtime this thread belongs to.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// The state shared with the collector.
    pub fn state(&self) -> &Arc<ThreadState> {
        &self.state
    }

    /// Number of objects in the retain list.
    pub fn pinned(&self) -> usize {
        self.state.pinned()
    }

    #[inline]
    pub(crate) fn stack_word(&self, index: usize) -> EngineResult<u64> {
        self.state
            .stack
            .get(index)
            .map(|word| word.load(Ordering::Relaxed))
            .ok_or_else(|| out_of_frame(index))
    }

    #[inline]
    pub(crate) fn set_stack_word(&self, index: usize, word: u64) -> EngineResult<()> {
        self.state
            .stack
            .get(index)
            .map(|slot| slot.store(word, Ordering::Relaxed))
            .ok_or_else(|| out_of_frame(index))
    }

    /// Pushes a frame for `function` with the context `this` above every
    /// frame in use and links it. Variables start zeroed and the cursor at
    /// the start of the function's block.
    ///
    /// # Errors
    ///
    /// Fails with a stack overflow if the frame does not fit.
    pub fn reserve_frame(&mut self, function: FunctionId, this: Value) -> EngineResult<usize> {
        let descriptor = self.runtime.program().function(function)?;
        let cursor = descriptor
            .block()
            .map_or(NO_CURSOR, |(start, _)| start as u64);
        let base = self.end;
        let end = base
            .checked_add(FRAME_HEADER_WORDS + descriptor.frame_size)
            .filter(|end| *end <= self.state.stack.len())
            .ok_or_else(EngineError::stack_overflow)?;

        let stack = &self.state.stack;
        for word in &stack[base..end] {
            word.store(0, Ordering::Relaxed);
        }
        let parent = self.state.top.load(Ordering::Relaxed) as u64;
        stack[base + PARENT].store(parent, Ordering::Relaxed);
        stack[base + CURSOR].store(cursor, Ordering::Relaxed);
        stack[base + FUNCTION].store(u64::from(function.0), Ordering::Relaxed);
        stack[base + THIS].store(this.raw(), Ordering::Relaxed);
        self.state.top.store(base + 1, Ordering::Relaxed);
        self.end = end;
        Ok(base)
    }

    /// Unlinks the frame at `base`, which must be the innermost one.
    pub fn pop_frame(&mut self, base: usize) {
        let parent = self.state.stack[base + PARENT].load(Ordering::Relaxed);
        self.state.top.store(parent as usize, Ordering::Relaxed);
        self.end = base;
    }

    /// The frames of this thread, innermost first, as function and offset.
    pub fn backtrace(&self) -> Vec<TraceFrame> {
        let program = self.runtime.program();
        self.state
            .frames()
            .into_iter()
            .map(|frame| TraceFrame {
                function: frame.function,
                offset: program
                    .function(frame.function)
                    .map_or(0, |function| frame.offset(function)),
            })
            .collect()
    }

    /// The context value of the active frame.
    pub fn this(&self) -> Value {
        Value::from_raw(self.stack_word(self.frame + THIS).unwrap_or(0))
    }

    /// The context value of the active frame as an object.
    pub fn this_object(&self) -> EngineResult<ObjectRef> {
        self.this()
            .as_object()
            .ok_or_else(|| EngineError::invalid_program("The context is not an object"))
    }

    /// Variable `index` of the active frame. Native handlers find their
    /// arguments here.
    pub fn argument(&self, index: usize) -> EngineResult<Value> {
        self.stack_word(self.frame + FRAME_HEADER_WORDS + index)
            .map(Value::from_raw)
    }

    /// The box starting at variable `index` of the active frame.
    pub fn argument_box(&self, index: usize) -> EngineResult<BoxValue> {
        let mut value = [Value::NOTHINGNESS; BOX_WORDS];
        for (offset, word) in value.iter_mut().enumerate() {
            *word = self.argument(index + offset)?;
        }
        Ok(value)
    }

    /// Runs a collection now.
    pub fn collect_garbage(&self) -> EngineResult<()> {
        self.runtime.heap().collect_garbage(&*self.runtime)
    }

    /// Declares that this thread will not touch the heap until
    /// [`disallow_gc_and_pause_if_needed`](Self::disallow_gc_and_pause_if_needed).
    /// Object handles held in Rust locals are stale afterwards.
    pub fn allow_gc(&self) {
        self.runtime.heap().barrier().allow();
    }

    /// Ends an [`allow_gc`](Self::allow_gc) section, parking until a
    /// running collection is over.
    pub fn disallow_gc_and_pause_if_needed(&self) {
        self.runtime.heap().barrier().disallow();
    }

    /// Runs `operation`, which must not touch the heap, without holding up
    /// collections.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # fn demo(thread: &interpreter::Thread) {
    /// thread.blocking(|| std::thread::sleep(std::time::Duration::from_millis(5)));
    /// # }
    /// ```
    pub fn blocking<T>(&self, operation: impl FnOnce() -> T) -> T {
        self.allow_gc();
        let result = operation();
        self.disallow_gc_and_pause_if_needed();
        result
    }

    /// Starts a new interpreter thread executing `callable` without
    /// arguments. Its result is a primitive word.
    pub fn spawn(&mut self, callable: ObjectRef) -> EngineResult<SpawnedThread> {
        self.runtime.spawn_thread(callable, SpawnResult::Primitive)
    }

    /// Like [`spawn`](Self::spawn), for a callable returning an object. The
    /// object stays a collector root until the thread is joined.
    pub fn spawn_returning_object(&mut self, callable: ObjectRef) -> EngineResult<SpawnedThread> {
        self.runtime.spawn_thread(callable, SpawnResult::Object)
    }

    /// Waits for a spawned thread and returns the first word it produced.
    /// Collections may run while waiting. An object result is current
    /// until this thread's next checkpoint.
    pub fn join(&self, mut thread: SpawnedThread) -> EngineResult<Value> {
        let handle = thread
            .handle
            .take()
            .ok_or_else(|| EngineError::new(ErrorKind::ThreadSpawn, "Thread already joined."))?;
        let joined = self.blocking(|| handle.join());
        let value = joined
            .map_err(|_| EngineError::new(ErrorKind::ThreadSpawn, "A spawned thread panicked."))??;
        if thread.result == SpawnResult::Object && value.as_object().is_some() {
            if let Some(object) = thread.state.retained.lock().first() {
                return Ok(Value::from_object(*object));
            }
        }
        Ok(value)
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if self.attached {
            self.runtime.threads().remove(&self.state);
        }
        self.runtime.heap().barrier().deregister();
    }
}

impl Mutator for Thread {
    fn heap(&self) -> &Heap {
        self.runtime.heap()
    }

    fn allocate_object(&mut self, class: ClassId, value_words: usize) -> EngineResult<ObjectRef> {
        self.runtime
            .heap()
            .allocate_object(&*self.runtime, class, value_words)
    }

    fn allocate_array(&mut self, bytes: usize) -> EngineResult<ObjectRef> {
        self.runtime.heap().allocate_array(&*self.runtime, bytes)
    }

    fn retain(&mut self, object: ObjectRef) -> EngineResult<Retained> {
        self.state.pin(object)
    }

    fn retained(&self, ticket: Retained) -> ObjectRef {
        self.state.retained.lock()[ticket.0]
    }

    fn release(&mut self, count: usize) -> EngineResult<()> {
        let mut retained = self.state.retained.lock();
        let remaining = retained.len().checked_sub(count).ok_or_else(|| {
            EngineError::new(ErrorKind::RetainListUnderflow, "Released more objects than retained.")
        })?;
        retained.truncate(remaining);
        Ok(())
    }
}

/// What the first word returned by a spawned thread holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnResult {
    /// An integer, double, boolean or symbol
    Primitive,
    /// An object, pinned by the finished thread until it is joined
    Object,
}

/// A thread started by [`Runtime::spawn_thread`].
///
/// Its state remains in the registry until the handle is joined or
/// dropped.
#[derive(Debug)]
pub struct SpawnedThread {
    pub(crate) runtime: Arc<Runtime>,
    pub(crate) state: Arc<ThreadState>,
    pub(crate) handle: Option<JoinHandle<EngineResult<Value>>>,
    pub(crate) result: SpawnResult,
}

impl SpawnedThread {
    /// True once the thread has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for SpawnedThread {
    fn drop(&mut self) {
        self.runtime.threads().remove(&self.state);
    }
}

pub(crate) fn out_of_frame(index: usize) -> EngineError {
    EngineError::invalid_program(format!("Stack slot {} is out of bounds", index))
}

/// Copies as many of `words` as fit into `dest`.
#[inline]
pub(crate) fn deliver(dest: &mut [Value], words: &[Value]) {
    let count = dest.len().min(words.len());
    dest[..count].copy_from_slice(&words[..count]);
}
