//! Contract tests for the runtime and thread APIs

#[path = "../common/mod.rs"]
mod common;

use bytecode_system::{Assembler, BytecodeLoader, ContextType, Opcode};
use builtins::{boxed, List, StringObject};
use core_types::{ErrorKind, FunctionId, ObjectRef, Value, T_INTEGER};
use interpreter::natives::list;
use interpreter::thread::RETAIN_CAPACITY;
use interpreter::{Closure, NativeRegistry, Runtime, Thread};
use memory_manager::Mutator;

use common::{add_native, add_rooted, builder, config, start_with, Emit, PINNED};

fn idle_runtime() -> std::sync::Arc<Runtime> {
    let mut builder = builder();
    let mut main = Assembler::new();
    main.ret().int(0);
    let main = builder.add_bytecode_function(main, 0);
    start_with(builder, main, config())
}

// ============================================================================
// Runtime
// ============================================================================

#[test]
fn test_runtime_refuses_unlinked_natives() {
    let mut builder = builder();
    add_native(&mut builder, 200);
    let mut main = Assembler::new();
    main.ret().int(0);
    let main = builder.add_bytecode_function(main, 0);
    builder.set_main(main);

    let program = builder.load().unwrap();
    let error = Runtime::with_natives(program, config(), NativeRegistry::with_library())
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::UnlinkedNative);
}

#[test]
fn test_string_pool_is_interned_at_startup() {
    let mut builder = builder();
    let greeting = builder.add_string("Hello 👋");
    let mut main = Assembler::new();
    main.ret().int(0);
    let main = builder.add_bytecode_function(main, 0);
    let runtime = start_with(builder, main, config());

    let string = runtime.string(greeting as usize).unwrap();
    assert_eq!(StringObject::to_string(runtime.heap(), string), "Hello 👋");
    let empty = runtime.string(0).unwrap();
    assert!(StringObject::is_empty(runtime.heap(), empty));
    assert!(runtime.string(greeting as usize + 1).is_none());
}

#[test]
fn test_threads_detach_when_dropped() {
    let runtime = idle_runtime();
    assert!(runtime.threads().is_empty());
    let thread = Thread::attach(&runtime);
    assert_eq!(runtime.threads().len(), 1);
    drop(thread);
    assert!(runtime.threads().is_empty());
    assert_eq!(runtime.execute_main().unwrap().as_integer(), 0);
    assert!(runtime.threads().is_empty());
}

// ============================================================================
// Frames and the retain list
// ============================================================================

#[test]
fn test_reserved_frames_are_linked_until_popped() {
    let runtime = idle_runtime();
    let main = runtime.program().main;
    let mut thread = Thread::attach(&runtime);

    let outer = thread.reserve_frame(main, Value::NOTHINGNESS).unwrap();
    let inner = thread.reserve_frame(main, Value::from_integer(3)).unwrap();
    let frames = thread.state().frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].base, inner);
    assert_eq!(frames[0].this, Value::from_integer(3));
    assert_eq!(frames[1].base, outer);

    thread.pop_frame(inner);
    thread.pop_frame(outer);
    assert!(thread.state().frames().is_empty());
}

#[test]
fn test_oversized_frame_overflows_the_stack() {
    let mut builder = builder();
    let mut body = Assembler::new();
    body.ret().int(0);
    let huge = builder.add_bytecode_function(body, 1 << 20);
    let mut main = Assembler::new();
    main.ret().op(Opcode::CallFunction).word(huge.0).word(0);
    let main = builder.add_bytecode_function(main, 0);
    let runtime = start_with(builder, main, config());

    let error = runtime.execute_main().unwrap_err();
    assert_eq!(error.kind, ErrorKind::StackOverflow);
    assert_eq!(error.backtrace.len(), 1);
    assert_eq!(error.backtrace[0].function, main);
}

#[test]
fn test_retain_list_bounds() {
    let runtime = idle_runtime();
    let mut thread = Thread::attach(&runtime);
    let object = Closure::captured_call(&mut thread).unwrap();
    let pin = thread.retain(object).unwrap();
    for _ in 1..RETAIN_CAPACITY {
        thread.retain(object).unwrap();
    }
    let error = thread.retain(object).unwrap_err();
    assert_eq!(error.kind, ErrorKind::RetainListOverflow);

    thread.collect_garbage().unwrap();
    let moved: ObjectRef = thread.retained(pin);
    assert_eq!(runtime.heap().class_of(moved), core_types::ClassId::CAPTURED_CALL);

    thread.release(RETAIN_CAPACITY).unwrap();
    let error = thread.release(1).unwrap_err();
    assert_eq!(error.kind, ErrorKind::RetainListUnderflow);
}

#[test]
fn test_instructions_leave_the_retain_list_balanced() {
    let mut builder = builder();
    let pinned = add_native(&mut builder, PINNED);
    let key = builder.add_string("key");

    let mut main = Assembler::new();
    main.set(0)
        .op(Opcode::DictionaryLiteral)
        .word(1)
        .op(Opcode::StringPool)
        .word(key)
        .op(Opcode::BoxProduceRemote)
        .word(T_INTEGER as u32)
        .word(1)
        .int(5);
    main.set(1)
        .op(Opcode::ConcatenateStrings)
        .word(3)
        .op(Opcode::StringPool)
        .word(key)
        .op(Opcode::StringPool)
        .word(key)
        .op(Opcode::StringPool)
        .word(key);
    main.set(2)
        .op(Opcode::SameObject)
        .var(0)
        .op(Opcode::ListLiteral)
        .word(1)
        .boxed_int(1);
    main.op(Opcode::DispatchMethod)
        .word(list::INSERT)
        .op(Opcode::ListLiteral)
        .word(0)
        .word(2)
        .word(1)
        .int(0)
        .word(4)
        .boxed_int(9);
    main.ret().op(Opcode::CallFunction).word(pinned.0).word(0);
    let main = add_rooted(&mut builder, main, 3, &[0, 1], &[]);

    let runtime = start_with(builder, main, config());
    assert_eq!(runtime.execute_main().unwrap().as_integer(), 0);
}

#[test]
fn test_failed_instruction_does_not_leak_pins() {
    let mut builder = builder();
    let mut main = Assembler::new();
    main.op(Opcode::ListLiteral)
        .word(2)
        .boxed_int(1)
        .op(Opcode::UnwrapBoxOptional)
        .op(Opcode::Nothingness);
    let main = builder.add_bytecode_function(main, 0);
    let runtime = start_with(builder, main, config());

    let mut thread = Thread::attach(&runtime);
    let error = thread
        .call_function(main, Value::NOTHINGNESS, &[], &mut [])
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::UnwrapNothingness);
    assert_eq!(thread.pinned(), 0);
    assert!(thread.state().frames().is_empty());
}

// ============================================================================
// Threads
// ============================================================================

/// Appends `count` integers to a fresh list, producing a short-lived list
/// per element, then sums the list.
fn worker(builder: &mut bytecode_system::ProgramBuilder, count: i32) -> FunctionId {
    let mut body = Assembler::new();
    body.set(0).op(Opcode::ListLiteral).word(0);
    body.op(Opcode::ForInRange)
        .word(2)
        .int(0)
        .int(count)
        .int(1)
        .block(|each| {
            each.op(Opcode::DispatchMethod)
                .word(list::APPEND)
                .var(0)
                .word(1)
                .word(4)
                .op(Opcode::BoxProduce)
                .word(T_INTEGER as u32)
                .word(1)
                .var(2);
            each.op(Opcode::ListLiteral)
                .word(2)
                .boxed_int(0)
                .boxed_int(1);
        });
    body.op(Opcode::ForInList)
        .word(4)
        .word(3)
        .var(0)
        .block(|each| {
            each.set(1)
                .op(Opcode::AddInteger)
                .var(1)
                .op(Opcode::Unbox)
                .word(1)
                .op(Opcode::GetVariableWide)
                .word(4)
                .word(4);
        });
    body.ret().var(1);
    add_rooted(builder, body, 8, &[0, 3], &[4])
}

#[test]
fn test_spawned_threads_share_the_heap() {
    let mut builder = builder();
    let worker = worker(&mut builder, 5_000);
    let mut main = Assembler::new();
    main.ret().int(0);
    let main = builder.add_bytecode_function(main, 0);
    let runtime = start_with(builder, main, config().with_heap_size(4 << 20));

    let mut thread = Thread::attach(&runtime);
    let mut spawned = Vec::new();
    for _ in 0..4 {
        let callable = Closure::captured_call(&mut thread).unwrap();
        Closure::bind(
            runtime.heap(),
            callable,
            worker,
            ContextType::None,
            Value::NOTHINGNESS,
            0,
        );
        spawned.push(thread.spawn(callable).unwrap());
    }
    for handle in spawned {
        assert_eq!(thread.join(handle).unwrap().as_integer(), 12_497_500);
    }
    assert!(runtime.heap().stats().collections > 0);
    assert_eq!(thread.pinned(), 0);

    drop(thread);
    assert!(runtime.threads().is_empty());
}

#[test]
fn test_blocking_section_lets_others_collect() {
    let mut builder = builder();
    let worker = worker(&mut builder, 2_000);
    let mut main = Assembler::new();
    main.ret().int(0);
    let main = builder.add_bytecode_function(main, 0);
    let runtime = start_with(builder, main, config().with_heap_size(1 << 20));

    let mut thread = Thread::attach(&runtime);
    let callable = Closure::captured_call(&mut thread).unwrap();
    Closure::bind(
        runtime.heap(),
        callable,
        worker,
        ContextType::None,
        Value::NOTHINGNESS,
        0,
    );
    let handle = thread.spawn(callable).unwrap();
    thread.blocking(|| {
        while !handle.is_finished() {
            std::thread::yield_now();
        }
    });
    assert_eq!(thread.join(handle).unwrap().as_integer(), 1_999_000);
}

#[test]
fn test_joined_object_survives_collections() {
    let mut builder = builder();
    let mut body = Assembler::new();
    body.set(0)
        .op(Opcode::ListLiteral)
        .word(3)
        .boxed_int(1)
        .boxed_int(2)
        .boxed_int(3);
    body.ret().var(0);
    let child = add_rooted(&mut builder, body, 1, &[0], &[]);
    let mut main = Assembler::new();
    main.ret().int(0);
    let main = builder.add_bytecode_function(main, 0);
    let runtime = start_with(builder, main, config());

    let mut thread = Thread::attach(&runtime);
    let callable = Closure::captured_call(&mut thread).unwrap();
    Closure::bind(
        runtime.heap(),
        callable,
        child,
        ContextType::None,
        Value::NOTHINGNESS,
        0,
    );
    let handle = thread.spawn_returning_object(callable).unwrap();
    thread.blocking(|| {
        while !handle.is_finished() {
            std::thread::yield_now();
        }
    });
    assert_eq!(runtime.threads().len(), 2);

    thread.collect_garbage().unwrap();
    thread.collect_garbage().unwrap();
    let list = thread.join(handle).unwrap().as_object().unwrap();
    assert_eq!(List::count(runtime.heap(), list), 3);
    assert_eq!(boxed::payload(&List::get(runtime.heap(), list, 0)).as_integer(), 1);
    assert_eq!(boxed::payload(&List::get(runtime.heap(), list, -1)).as_integer(), 3);
    assert!(runtime.heap().stats().collections >= 2);
    assert_eq!(runtime.threads().len(), 1);
}

#[test]
fn test_dropped_handle_unregisters_the_thread() {
    let mut builder = builder();
    let worker = worker(&mut builder, 10);
    let mut main = Assembler::new();
    main.ret().int(0);
    let main = builder.add_bytecode_function(main, 0);
    let runtime = start_with(builder, main, config());

    let mut thread = Thread::attach(&runtime);
    let callable = Closure::captured_call(&mut thread).unwrap();
    Closure::bind(
        runtime.heap(),
        callable,
        worker,
        ContextType::None,
        Value::NOTHINGNESS,
        0,
    );
    let handle = thread.spawn(callable).unwrap();
    thread.blocking(|| {
        while !handle.is_finished() {
            std::thread::yield_now();
        }
    });
    assert_eq!(runtime.threads().len(), 2);
    drop(handle);
    assert_eq!(runtime.threads().len(), 1);
}

const FATAL_CHILD: &str = "INTERPRETER_FATAL_CHILD";

#[test]
fn test_fatal_error_exits_the_process() {
    if std::env::var_os(FATAL_CHILD).is_some() {
        let mut builder = builder();
        let mut main = Assembler::new();
        main.ret()
            .op(Opcode::BoxProduceRemote)
            .word(T_INTEGER as u32)
            .word(1 << 20)
            .int(0);
        let main = builder.add_bytecode_function(main, 0);
        start_with(builder, main, config()).run_main();
        return;
    }

    let output = std::process::Command::new(std::env::current_exe().unwrap())
        .args(["test_fatal_error_exits_the_process", "--exact", "--nocapture"])
        .env(FATAL_CHILD, "1")
        .output()
        .unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1), "stderr: {}", stderr);
    assert!(stderr.contains("🚨 Fatal Error: Allocation of"), "stderr: {}", stderr);
}
