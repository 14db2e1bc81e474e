//! The runtime context.
//!
//! A [`Runtime`] owns everything the engine shares between threads: the
//! program tables, the heap, the thread registry, the interned string pool
//! and the native linking table. It is created once per program and shared
//! through an `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use builtins::{Data, Dictionary, List, StringObject};
use bytecode_system::{FunctionBody, Marker, Program};
use core_types::{fatal, ClassId, EngineError, EngineResult, ErrorKind, ObjectRef, Value};
use memory_manager::{GcContext, Heap, Mutator, Retained, Trace, Tracer};

use crate::closure::Closure;
use crate::config::EngineConfig;
use crate::natives::NativeRegistry;
use crate::registry::ThreadRegistry;
use crate::roots;
use crate::thread::{SpawnResult, SpawnedThread, Thread, ThreadState};

/// Shared state of a running program.
///
/// # Examples
///
/// ```
/// use bytecode_system::{Assembler, BytecodeLoader, Opcode, ProgramBuilder};
/// use interpreter::{EngineConfig, Runtime};
///
/// let mut main = Assembler::new();
/// main.op(Opcode::Return)
///     .word(1)
///     .op(Opcode::MultiplyInteger)
///     .op(Opcode::Integer32)
///     .int32(6)
///     .op(Opcode::Integer32)
///     .int32(7);
///
/// let mut builder = ProgramBuilder::new();
/// let id = builder.add_bytecode_function(main, 0);
/// builder.set_main(id);
///
/// let config = EngineConfig::default()
///     .with_heap_size(1 << 20)
///     .with_stack_words(1024);
/// let runtime = Runtime::new(builder.load().unwrap(), config).unwrap();
/// assert_eq!(runtime.execute_main().unwrap().as_integer(), 42);
/// ```
pub struct Runtime {
    program: Program,
    heap: Heap,
    threads: ThreadRegistry,
    strings: Box<[AtomicU64]>,
    natives: NativeRegistry,
    config: EngineConfig,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("classes", &self.program.classes.len())
            .field("functions", &self.program.functions.len())
            .field("strings", &self.strings.len())
            .field("threads", &self.threads.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Runtime {
    /// Starts a runtime with the library natives linked.
    ///
    /// # Errors
    ///
    /// Fails if a native function has no handler or if the string pool
    /// does not fit the heap.
    pub fn new(program: Program, config: EngineConfig) -> EngineResult<Arc<Self>> {
        Self::with_natives(program, config, NativeRegistry::with_library())
    }

    /// Starts a runtime with a custom linking table.
    pub fn with_natives(
        mut program: Program,
        config: EngineConfig,
        natives: NativeRegistry,
    ) -> EngineResult<Arc<Self>> {
        for class in &mut program.classes {
            if let Some(marker) = class.marker {
                class.value_size = library_value_size(marker);
            }
        }
        for function in &program.functions {
            if let FunctionBody::Native(native) = function.body {
                natives.handler(native)?;
            }
        }

        let strings = program
            .strings
            .iter()
            .map(|_| AtomicU64::new(0))
            .collect();
        let runtime = Arc::new(Self {
            heap: Heap::new(config.heap),
            threads: ThreadRegistry::new(),
            strings,
            natives,
            config,
            program,
        });
        runtime.intern_strings()?;
        tracing::debug!(
            classes = runtime.program.classes.len(),
            functions = runtime.program.functions.len(),
            strings = runtime.strings.len(),
            "runtime started"
        );
        Ok(runtime)
    }

    fn intern_strings(self: &Arc<Self>) -> EngineResult<()> {
        let mut thread = Thread::attach(self);
        for (slot, text) in self.strings.iter().zip(&self.program.strings) {
            let string = StringObject::from_str(&mut thread, text)?;
            slot.store(string.raw(), Ordering::Relaxed);
        }
        Ok(())
    }

    /// The program tables.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The managed heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The registry of attached threads.
    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    /// The native linking table.
    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    /// The configuration the runtime was started with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The interned string at `index` of the pool. Valid until the next
    /// checkpoint of the calling thread.
    pub fn string(&self, index: usize) -> Option<ObjectRef> {
        self.strings
            .get(index)
            .and_then(|slot| ObjectRef::from_raw(slot.load(Ordering::Relaxed)))
    }

    /// Runs the entry point on a new interpreter thread and returns the
    /// first word it returned.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the program.
    pub fn execute_main(self: &Arc<Self>) -> EngineResult<Value> {
        let runtime = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("main".into())
            .stack_size(self.config.native_stack_bytes)
            .spawn(move || {
                let mut thread = Thread::attach(&runtime);
                thread.call_main()
            })
            .map_err(spawn_error)?;
        handle.join().map_err(|_| {
            EngineError::new(ErrorKind::ThreadSpawn, "The main interpreter thread panicked.")
        })?
    }

    /// Runs the entry point and terminates the process on a fatal error.
    pub fn run_main(self: &Arc<Self>) -> Value {
        match self.execute_main() {
            Ok(value) => value,
            Err(error) => fatal(&error),
        }
    }

    /// Starts an interpreter thread executing `callable`, a closure or
    /// captured call, without arguments. With [`SpawnResult::Object`] the
    /// finished thread pins its result and stays registered until joined.
    ///
    /// Must be called from an attached thread, with a current handle.
    ///
    /// # Errors
    ///
    /// Fails if the OS thread cannot be started.
    pub fn spawn_thread(
        self: &Arc<Self>,
        callable: ObjectRef,
        result: SpawnResult,
    ) -> EngineResult<SpawnedThread> {
        let state = Arc::new(ThreadState::new(self.config.stack_words));
        state.pin(callable)?;
        self.threads.push(Arc::clone(&state));

        let runtime = Arc::clone(self);
        let child = Arc::clone(&state);
        let spawned = std::thread::Builder::new()
            .name("interpreter".into())
            .stack_size(self.config.native_stack_bytes)
            .spawn(move || run_spawned(runtime, child, result));
        match spawned {
            Ok(handle) => Ok(SpawnedThread {
                runtime: Arc::clone(self),
                state,
                handle: Some(handle),
                result,
            }),
            Err(error) => {
                self.threads.remove(&state);
                Err(spawn_error(error))
            }
        }
    }
}

fn run_spawned(
    runtime: Arc<Runtime>,
    state: Arc<ThreadState>,
    result: SpawnResult,
) -> EngineResult<Value> {
    let mut thread = Thread::adopt(runtime, state);
    let callable = thread.retained(Retained(0));
    thread.release(1)?;
    let mut words = [Value::NOTHINGNESS];
    thread.execute_callable_extern(callable, &[], &mut words)?;
    if result == SpawnResult::Object {
        if let Some(object) = words[0].as_object() {
            thread.retain(object)?;
        }
    }
    Ok(words[0])
}

fn spawn_error(error: std::io::Error) -> EngineError {
    EngineError::new(
        ErrorKind::ThreadSpawn,
        format!("Could not start an interpreter thread: {}", error),
    )
}

fn library_value_size(marker: Marker) -> usize {
    match marker {
        Marker::List => List::VALUE_WORDS,
        Marker::Dictionary => Dictionary::VALUE_WORDS,
        Marker::Data => Data::VALUE_WORDS,
        Marker::String => StringObject::VALUE_WORDS,
        Marker::Closure => Closure::VALUE_WORDS,
    }
}

impl GcContext for Runtime {
    fn trace_roots(&self, tracer: &mut Tracer<'_>) {
        self.threads
            .for_each(|state| roots::trace_thread(&self.program, state, tracer));
        for slot in self.strings.iter() {
            tracer.mark_slot(slot);
        }
    }

    fn trace_object(&self, object: ObjectRef, class: ClassId, tracer: &mut Tracer<'_>) {
        let Ok(descriptor) = self.program.class(class) else {
            return;
        };
        match descriptor.marker {
            Some(Marker::List) => List::trace(object, tracer),
            Some(Marker::Dictionary) => Dictionary::trace(object, tracer),
            Some(Marker::Data) => Data::trace(object, tracer),
            Some(Marker::String) => StringObject::trace(object, tracer),
            Some(Marker::Closure) => Closure::trace(object, tracer),
            None => roots::trace_instance(descriptor, object, tracer),
        }
    }
}
