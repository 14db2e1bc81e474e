//! Integration tests: programs with several functions, classes and library
//! objects, run through a full runtime.

#[path = "../common/mod.rs"]
mod common;

use bytecode_system::{
    Assembler, Class, ContextType, ObjectVariableRecord, Opcode, ProgramBuilder, ProtocolTable,
};
use core_types::{ClassId, ErrorKind, FunctionId, Value, T_INTEGER, T_OBJECT};
use interpreter::natives::{dictionary, list, string};
use interpreter::{Closure, Thread};

use common::{add_native, add_rooted, builder, config, run_main, start_with, Emit, COLLECT};

// ============================================================================
// Calls
// ============================================================================

#[test]
fn test_call_function_with_arguments() {
    let mut builder = builder();
    let mut add = Assembler::new();
    add.ret().op(Opcode::AddInteger).var(0).var(1);
    let add = builder.add_bytecode_function(add, 2);

    let mut main = Assembler::new();
    main.ret()
        .op(Opcode::CallFunction)
        .word(add.0)
        .word(2)
        .word(1)
        .int(40)
        .word(1)
        .int(2);
    let main = builder.add_bytecode_function(main, 0);
    assert_eq!(run_main(builder, main).unwrap().as_integer(), 42);
}

fn factorial_program(argument: i32) -> (ProgramBuilder, FunctionId, FunctionId) {
    let mut builder = builder();
    let factorial = builder.reserve_function();
    let mut body = Assembler::new();
    body.op(Opcode::If);
    let length = body.begin_block();
    body.op(Opcode::LessOrEqualInteger).var(0).int(1);
    body.block(|then| {
        then.ret().int(1);
    });
    body.end_block(length);
    body.ret()
        .op(Opcode::MultiplyInteger)
        .var(0)
        .op(Opcode::CallFunction)
        .word(factorial.0)
        .word(1)
        .word(1)
        .op(Opcode::SubtractInteger)
        .var(0)
        .int(1);
    let function = builder.bytecode_function(body, 1).with_arguments(1);
    builder.set_function(factorial, function);

    let mut main = Assembler::new();
    main.ret()
        .op(Opcode::CallFunction)
        .word(factorial.0)
        .word(1)
        .word(1)
        .int(argument);
    let main = builder.add_bytecode_function(main, 0);
    (builder, main, factorial)
}

#[test]
fn test_recursion() {
    let (builder, main, _) = factorial_program(10);
    assert_eq!(run_main(builder, main).unwrap().as_integer(), 3_628_800);
}

#[test]
fn test_unbounded_recursion_overflows_the_stack() {
    let mut builder = builder();
    let recurse = builder.reserve_function();
    let mut body = Assembler::new();
    body.ret().op(Opcode::CallFunction).word(recurse.0).word(0);
    let function = builder.bytecode_function(body, 0);
    builder.set_function(recurse, function);

    let mut main = Assembler::new();
    main.ret().op(Opcode::CallFunction).word(recurse.0).word(0);
    let main = builder.add_bytecode_function(main, 0);

    let runtime = start_with(builder, main, config().with_stack_words(1024));
    let error = runtime.execute_main().unwrap_err();
    assert_eq!(error.kind, ErrorKind::StackOverflow);
    let (outermost, inner) = error.backtrace.split_last().unwrap();
    assert_eq!(error.backtrace.len(), 1024 / 4);
    assert_eq!(outermost.function, main);
    assert!(inner.iter().all(|frame| frame.function == recurse));
}

#[test]
fn test_arguments_beyond_callee_frame_are_invalid() {
    let mut builder = builder();
    let mut callee = Assembler::new();
    callee.ret().var(0);
    let callee = builder.add_bytecode_function(callee, 1);

    let mut main = Assembler::new();
    main.ret()
        .op(Opcode::CallFunction)
        .word(callee.0)
        .word(2)
        .word(1)
        .int(1)
        .word(1)
        .int(2);
    let main = builder.add_bytecode_function(main, 0);
    assert_eq!(
        run_main(builder, main).unwrap_err().kind,
        ErrorKind::InvalidProgram
    );
}

// ============================================================================
// Classes
// ============================================================================

struct Point {
    class: ClassId,
    sum: u32,
    init: u32,
}

/// A class with two integer instance variables, an initializer taking
/// both and a method returning their sum.
fn point_class(builder: &mut ProgramBuilder) -> Point {
    let mut init = Assembler::new();
    init.op(Opcode::SetInstanceVariableWide)
        .word(0)
        .word(2)
        .op(Opcode::GetVariableWide)
        .word(0)
        .word(2);
    let init = builder
        .bytecode_function(init, 2)
        .with_arguments(2)
        .with_context(ContextType::Object);
    let init = builder.add_function(init);

    let mut sum = Assembler::new();
    sum.ret()
        .op(Opcode::AddInteger)
        .op(Opcode::GetInstanceVariable)
        .word(0)
        .op(Opcode::GetInstanceVariable)
        .word(1);
    let sum = builder
        .bytecode_function(sum, 0)
        .with_context(ContextType::Object);
    let sum = builder.add_function(sum);

    let mut class = Class::new(2);
    let sum = class.add_method(sum);
    let init = class.add_initializer(init);
    let class = builder.add_class(class);
    Point { class, sum, init }
}

fn new_point(main: &mut Assembler, point: &Point, x: i32, y: i32) {
    main.op(Opcode::NewObject)
        .word(point.init)
        .op(Opcode::ClassFromIndex)
        .word(point.class.0)
        .word(2)
        .word(1)
        .int(x)
        .word(1)
        .int(y);
}

#[test]
fn test_new_object_and_method_dispatch() {
    let mut builder = builder();
    let point = point_class(&mut builder);

    let mut main = Assembler::new();
    main.set(0);
    new_point(&mut main, &point, 30, 12);
    main.ret()
        .op(Opcode::DispatchMethod)
        .word(point.sum)
        .var(0)
        .word(0);
    let main = add_rooted(&mut builder, main, 1, &[0], &[]);
    assert_eq!(run_main(builder, main).unwrap().as_integer(), 42);
}

#[test]
fn test_subclass_inherits_and_downcasts() {
    let mut builder = builder();
    let point = point_class(&mut builder);
    let base = builder.class_mut(point.class).unwrap().clone();
    let subclass = builder.add_class(Class {
        superclass: Some(point.class),
        ..base
    });

    let mut main = Assembler::new();
    main.set(0)
        .op(Opcode::NewObject)
        .word(point.init)
        .op(Opcode::ClassFromIndex)
        .word(subclass.0)
        .word(2)
        .word(1)
        .int(1)
        .word(1)
        .int(2);
    // An instance of the subclass downcasts to the base class, a base
    // instance does not downcast to the subclass.
    main.set(1)
        .op(Opcode::IsNothingness)
        .word(2)
        .op(Opcode::DowncastToClass)
        .var(0)
        .op(Opcode::ClassFromIndex)
        .word(point.class.0);
    main.set(2);
    new_point(&mut main, &point, 1, 2);
    main.set(3)
        .op(Opcode::IsNothingness)
        .word(2)
        .op(Opcode::DowncastToClass)
        .var(2)
        .op(Opcode::ClassFromIndex)
        .word(subclass.0);
    main.ret()
        .op(Opcode::AndBoolean)
        .op(Opcode::InvertBoolean)
        .var(1)
        .var(3);
    let main = add_rooted(&mut builder, main, 4, &[0, 2], &[]);
    assert!(run_main(builder, main).unwrap().as_bool());
}

#[test]
fn test_same_object() {
    let mut builder = builder();
    let point = point_class(&mut builder);

    let mut main = Assembler::new();
    main.set(0);
    new_point(&mut main, &point, 1, 1);
    main.set(1);
    new_point(&mut main, &point, 1, 1);
    main.ret()
        .op(Opcode::AndBoolean)
        .op(Opcode::SameObject)
        .var(0)
        .var(0)
        .op(Opcode::InvertBoolean)
        .op(Opcode::SameObject)
        .var(0)
        .var(1);
    let main = add_rooted(&mut builder, main, 2, &[0, 1], &[]);
    assert!(run_main(builder, main).unwrap().as_bool());
}

#[test]
fn test_instance_reference_writes_through() {
    let mut builder = builder();
    let mut bump = Assembler::new();
    // this.0 = this.0 + 1 through a reference to the field
    bump.set(0).op(Opcode::InstanceReference).word(0);
    bump.op(Opcode::IncrementInstanceVariable).word(0);
    bump.ret()
        .op(Opcode::GetValueFromReference)
        .word(1)
        .var(0);
    let bump = builder
        .bytecode_function(bump, 1)
        .with_context(ContextType::Object);
    let bump = builder.add_function(bump);
    let mut class = Class::new(1);
    let bump = class.add_method(bump);
    let class = builder.add_class(class);
    let mut init = Assembler::new();
    init.op(Opcode::SetInstanceVariable).word(0).int(41);
    let init = builder
        .bytecode_function(init, 0)
        .with_context(ContextType::Object);
    let init = builder.add_function(init);
    let init = builder.class_mut(class).unwrap().add_initializer(init);

    let mut main = Assembler::new();
    main.ret()
        .op(Opcode::DispatchMethod)
        .word(bump)
        .op(Opcode::NewObject)
        .word(init)
        .op(Opcode::ClassFromIndex)
        .word(class.0)
        .word(0)
        .word(0);
    let main = builder.add_bytecode_function(main, 0);
    assert_eq!(run_main(builder, main).unwrap().as_integer(), 42);
}

// ============================================================================
// Protocols
// ============================================================================

#[test]
fn test_protocol_dispatch_on_object() {
    let mut builder = builder();
    let point = point_class(&mut builder);
    let sum = builder.class_mut(point.class).unwrap().method(point.sum).unwrap();
    builder
        .class_mut(point.class)
        .unwrap()
        .protocols
        .add_conformance(0, vec![sum]);

    let mut main = Assembler::new();
    main.set(0);
    new_point(&mut main, &point, 20, 22);
    main.ret()
        .op(Opcode::DispatchProtocol)
        .word(0)
        .word(0)
        .word(1)
        .op(Opcode::BoxProduce)
        .word(T_OBJECT as u32)
        .word(1)
        .var(0)
        .word(0);
    let main = add_rooted(&mut builder, main, 5, &[0], &[1]);
    assert_eq!(run_main(builder, main).unwrap().as_integer(), 42);
}

#[test]
fn test_protocol_dispatch_on_value_type() {
    let mut builder = builder();
    let mut double = Assembler::new();
    double
        .ret()
        .op(Opcode::MultiplyInteger)
        .op(Opcode::GetVtVariable)
        .word(0)
        .int(2);
    let double = builder
        .bytecode_function(double, 0)
        .with_context(ContextType::ValueReference);
    let double = builder.add_function(double);
    let mut table = ProtocolTable::new(0);
    table.add_conformance(3, vec![double]);
    builder.set_value_type_protocols(T_INTEGER, vec![table]);

    let mut main = Assembler::new();
    main.ret()
        .op(Opcode::DispatchProtocol)
        .word(3)
        .word(0)
        .word(0)
        .boxed_int(21)
        .word(0);
    let main = builder.add_bytecode_function(main, 4);
    assert_eq!(run_main(builder, main).unwrap().as_integer(), 42);
}

#[test]
fn test_cast_to_protocol() {
    let mut builder = builder();
    builder.set_value_type_protocols(T_INTEGER, vec![ProtocolTable::new(0)]);

    let mut main = Assembler::new();
    main.ret()
        .op(Opcode::IsNothingness)
        .word(1)
        .op(Opcode::CastToProtocol)
        .word(1)
        .boxed_int(5);
    let main = builder.add_bytecode_function(main, 0);
    assert!(run_main(builder, main).unwrap().as_bool());
}

// ============================================================================
// Closures
// ============================================================================

fn closure_instruction(
    main: &mut Assembler,
    function: FunctionId,
    source: u32,
    bind_this: bool,
) {
    main.op(Opcode::Closure)
        .word(function.0)
        .word(1)
        .word(1)
        .word(1)
        .word(source)
        .word(1)
        .word(0)
        .word(u32::from(bind_this));
}

#[test]
fn test_closure_captures_by_value() {
    let mut builder = builder();
    let mut body = Assembler::new();
    body.ret().op(Opcode::AddInteger).var(0).var(1);
    let function = builder.bytecode_function(body, 2).with_arguments(1);
    let function = builder.add_function(function);

    let mut main = Assembler::new();
    main.set(0).int(5);
    main.set(1);
    closure_instruction(&mut main, function, 0, false);
    main.set(0).int(100);
    main.ret()
        .op(Opcode::ExecuteCallable)
        .var(1)
        .word(1)
        .word(1)
        .int(10);
    let main = add_rooted(&mut builder, main, 2, &[1], &[]);
    assert_eq!(run_main(builder, main).unwrap().as_integer(), 15);
}

#[test]
fn test_captured_method_keeps_receiver() {
    let mut builder = builder();
    let point = point_class(&mut builder);

    let mut main = Assembler::new();
    main.set(0)
        .op(Opcode::CaptureMethod)
        .word(point.sum);
    new_point(&mut main, &point, 40, 2);
    main.ret().op(Opcode::ExecuteCallable).var(0).word(0);
    let main = add_rooted(&mut builder, main, 1, &[0], &[]);
    assert_eq!(run_main(builder, main).unwrap().as_integer(), 42);
}

#[test]
fn test_capture_contexted_function() {
    let mut builder = builder();
    let mut body = Assembler::new();
    body.ret().op(Opcode::AddInteger).op(Opcode::This).var(0);
    let function = builder.bytecode_function(body, 1).with_arguments(1);
    let function = builder.add_function(function);

    let mut main = Assembler::new();
    main.set(0)
        .op(Opcode::CaptureContextedFunction)
        .word(function.0)
        .int(32);
    main.ret()
        .op(Opcode::ExecuteCallable)
        .var(0)
        .word(1)
        .word(1)
        .int(10);
    let main = add_rooted(&mut builder, main, 1, &[0], &[]);
    assert_eq!(run_main(builder, main).unwrap().as_integer(), 42);
}

#[test]
fn test_executing_a_non_callable_is_invalid() {
    let mut builder = builder();
    let mut main = Assembler::new();
    main.op(Opcode::ExecuteCallable)
        .op(Opcode::ListLiteral)
        .word(0)
        .word(0);
    let main = builder.add_bytecode_function(main, 0);
    assert_eq!(
        run_main(builder, main).unwrap_err().kind,
        ErrorKind::InvalidProgram
    );
}

// ============================================================================
// Library objects
// ============================================================================

#[test]
fn test_string_concatenation_and_length() {
    let mut builder = builder();
    let foo = builder.add_string("foo");
    let bar = builder.add_string("barbaz");

    let mut main = Assembler::new();
    main.ret()
        .op(Opcode::DispatchMethod)
        .word(string::LENGTH)
        .op(Opcode::ConcatenateStrings)
        .word(3)
        .op(Opcode::StringPool)
        .word(foo)
        .op(Opcode::StringPool)
        .word(0)
        .op(Opcode::StringPool)
        .word(bar)
        .word(0);
    let main = builder.add_bytecode_function(main, 0);
    assert_eq!(run_main(builder, main).unwrap().as_integer(), 9);
}

#[test]
fn test_empty_concatenation_reuses_the_pooled_empty_string() {
    let mut builder = builder();
    let foo = builder.add_string("foo");

    let mut main = Assembler::new();
    main.set(0)
        .op(Opcode::ConcatenateStrings)
        .word(2)
        .op(Opcode::StringPool)
        .word(0)
        .op(Opcode::StringPool)
        .word(0);
    main.set(1).op(Opcode::ConcatenateStrings).word(0);
    main.ret()
        .op(Opcode::AndBoolean)
        .op(Opcode::AndBoolean)
        .op(Opcode::SameObject)
        .var(0)
        .op(Opcode::StringPool)
        .word(0)
        .op(Opcode::SameObject)
        .var(1)
        .op(Opcode::StringPool)
        .word(0)
        .op(Opcode::InvertBoolean)
        .op(Opcode::SameObject)
        .op(Opcode::ConcatenateStrings)
        .word(1)
        .op(Opcode::StringPool)
        .word(foo)
        .op(Opcode::StringPool)
        .word(0);
    let main = add_rooted(&mut builder, main, 2, &[0, 1], &[]);
    assert!(run_main(builder, main).unwrap().as_bool());
}

#[test]
fn test_string_equality_compares_contents() {
    let mut builder = builder();
    let first = builder.add_string("emoji");
    let second = builder.add_string("emoji");
    assert_ne!(first, second);

    let mut main = Assembler::new();
    main.ret()
        .op(Opcode::DispatchMethod)
        .word(string::EQUALS)
        .op(Opcode::StringPool)
        .word(first)
        .word(1)
        .word(1)
        .op(Opcode::StringPool)
        .word(second);
    let main = builder.add_bytecode_function(main, 0);
    assert!(run_main(builder, main).unwrap().as_bool());
}

#[test]
fn test_list_literal_count_and_get() {
    let mut builder = builder();
    let mut main = Assembler::new();
    main.set(0).op(Opcode::ListLiteral).word(3);
    main.boxed_int(1).boxed_int(2).boxed_int(3);
    main.ret()
        .op(Opcode::AddInteger)
        .op(Opcode::DispatchMethod)
        .word(list::COUNT)
        .var(0)
        .word(0)
        .op(Opcode::Unbox)
        .word(1)
        .op(Opcode::DispatchMethod)
        .word(list::GET)
        .var(0)
        .word(1)
        .word(1)
        .int(-1);
    let main = add_rooted(&mut builder, main, 1, &[0], &[]);
    assert_eq!(run_main(builder, main).unwrap().as_integer(), 6);
}

#[test]
fn test_for_in_list() {
    let mut builder = builder();
    let mut main = Assembler::new();
    main.op(Opcode::ForInList)
        .word(0)
        .word(4)
        .op(Opcode::ListLiteral)
        .word(4)
        .boxed_int(1)
        .boxed_int(2)
        .boxed_int(3)
        .boxed_int(4)
        .block(|body| {
            body.set(5)
                .op(Opcode::AddInteger)
                .var(5)
                .op(Opcode::Unbox)
                .word(1)
                .op(Opcode::GetVariableWide)
                .word(0)
                .word(4);
        });
    main.ret().var(5);
    let main = add_rooted(&mut builder, main, 6, &[4], &[0]);
    assert_eq!(run_main(builder, main).unwrap().as_integer(), 10);
}

#[test]
fn test_dictionary_literal_lookup() {
    let mut builder = builder();
    let a = builder.add_string("a");
    let b = builder.add_string("b");
    let other_b = builder.add_string("b");
    let c = builder.add_string("c");

    let mut main = Assembler::new();
    main.set(0)
        .op(Opcode::DictionaryLiteral)
        .word(2)
        .op(Opcode::StringPool)
        .word(a)
        .boxed_int(1)
        .op(Opcode::StringPool)
        .word(b)
        .boxed_int(2);
    main.set(1)
        .op(Opcode::Unbox)
        .word(1)
        .op(Opcode::DispatchMethod)
        .word(dictionary::GET)
        .var(0)
        .word(1)
        .word(1)
        .op(Opcode::StringPool)
        .word(other_b);
    main.set(2)
        .op(Opcode::DispatchMethod)
        .word(dictionary::CONTAINS)
        .var(0)
        .word(1)
        .word(1)
        .op(Opcode::StringPool)
        .word(c);
    main.op(Opcode::If);
    let length = main.begin_block();
    main.var(2).block(|then| {
        then.ret().int(-1);
    });
    main.end_block(length);
    main.ret()
        .op(Opcode::AddInteger)
        .var(1)
        .op(Opcode::DispatchMethod)
        .word(dictionary::COUNT)
        .var(0)
        .word(0);
    let main = add_rooted(&mut builder, main, 3, &[0], &[]);
    assert_eq!(run_main(builder, main).unwrap().as_integer(), 4);
}

// ============================================================================
// Collections during execution
// ============================================================================

#[test]
fn test_frame_objects_survive_collection() {
    let mut builder = builder();
    let collect = add_native(&mut builder, COLLECT);
    let hello = builder.add_string("hello, ");
    let world = builder.add_string("world");

    let mut main = Assembler::new();
    main.set(0)
        .op(Opcode::ListLiteral)
        .word(2)
        .boxed_int(7)
        .op(Opcode::BoxProduce)
        .word(T_OBJECT as u32)
        .word(1)
        .op(Opcode::ConcatenateStrings)
        .word(2)
        .op(Opcode::StringPool)
        .word(hello)
        .op(Opcode::StringPool)
        .word(world);
    main.op(Opcode::CallFunction).word(collect.0).word(0);
    main.op(Opcode::CallFunction).word(collect.0).word(0);
    main.set(1)
        .op(Opcode::Unbox)
        .word(1)
        .op(Opcode::DispatchMethod)
        .word(list::GET)
        .var(0)
        .word(1)
        .word(1)
        .int(0);
    main.ret()
        .op(Opcode::AddInteger)
        .var(1)
        .op(Opcode::DispatchMethod)
        .word(string::LENGTH)
        .op(Opcode::Unbox)
        .word(1)
        .op(Opcode::DispatchMethod)
        .word(list::GET)
        .var(0)
        .word(1)
        .word(1)
        .int(1)
        .word(0);
    let main = add_rooted(&mut builder, main, 2, &[0], &[]);

    let runtime = start_with(builder, main, config());
    assert_eq!(runtime.execute_main().unwrap().as_integer(), 7 + 12);
    assert!(runtime.heap().stats().collections >= 2);
}

#[test]
fn test_closure_captures_survive_collection() {
    let mut builder = builder();
    let collect = add_native(&mut builder, COLLECT);
    let left = builder.add_string("left");
    let right = builder.add_string("right");

    let mut body = Assembler::new();
    body.ret()
        .op(Opcode::DispatchMethod)
        .word(string::LENGTH)
        .var(0)
        .word(0);
    let function = add_rooted(&mut builder, body, 1, &[0], &[]);

    let (packed, kind) = ObjectVariableRecord::simple(0).encode();
    let mut main = Assembler::new();
    main.set(0)
        .op(Opcode::ConcatenateStrings)
        .word(2)
        .op(Opcode::StringPool)
        .word(left)
        .op(Opcode::StringPool)
        .word(right);
    main.set(1)
        .op(Opcode::Closure)
        .word(function.0)
        .word(1)
        .word(1)
        .word(0)
        .word(0)
        .word(1)
        .word(1)
        .word(packed)
        .word(kind)
        .word(0);
    main.set(0).op(Opcode::Nothingness);
    main.op(Opcode::CallFunction).word(collect.0).word(0);
    main.ret().op(Opcode::ExecuteCallable).var(1).word(0);
    let main = add_rooted(&mut builder, main, 2, &[0, 1], &[]);

    let runtime = start_with(builder, main, config());
    assert_eq!(runtime.execute_main().unwrap().as_integer(), 9);
    assert_eq!(runtime.heap().stats().collections, 1);
}

#[test]
fn test_object_records_apply_only_within_their_range() {
    let mut builder = builder();
    let collect = add_native(&mut builder, COLLECT);

    let mut main = Assembler::new();
    main.set(0).int(5);
    main.op(Opcode::CallFunction).word(collect.0).word(0);
    main.set(1).var(0);
    main.set(0).op(Opcode::ListLiteral).word(1).boxed_int(42);
    let from = main.position() as u32;
    main.op(Opcode::CallFunction).word(collect.0).word(0);
    main.ret()
        .op(Opcode::AddInteger)
        .op(Opcode::Unbox)
        .word(1)
        .op(Opcode::DispatchMethod)
        .word(list::GET)
        .var(0)
        .word(1)
        .word(1)
        .int(0)
        .var(1);
    let function = builder
        .bytecode_function(main, 2)
        .with_record(ObjectVariableRecord::simple(0), from, u32::MAX);
    let main = builder.add_function(function);

    let runtime = start_with(builder, main, config());
    assert_eq!(runtime.execute_main().unwrap().as_integer(), 47);
    assert_eq!(runtime.heap().stats().collections, 2);
}

#[test]
fn test_allocation_heavy_loop_collects() {
    let mut builder = builder();
    let mut main = Assembler::new();
    main.set(0).op(Opcode::ListLiteral).word(0);
    main.op(Opcode::ForInRange)
        .word(1)
        .int(0)
        .int(20_000)
        .int(1)
        .block(|body| {
            body.op(Opcode::ListLiteral).word(2).boxed_int(0).boxed_int(1);
            body.op(Opcode::If);
            let length = body.begin_block();
            body.op(Opcode::EqualPrimitive)
                .op(Opcode::RemainderInteger)
                .var(1)
                .int(100)
                .int(0);
            body.block(|then| {
                then.op(Opcode::DispatchMethod)
                    .word(list::APPEND)
                    .var(0)
                    .word(1)
                    .word(4)
                    .op(Opcode::BoxProduce)
                    .word(T_INTEGER as u32)
                    .word(1)
                    .var(1);
            });
            body.end_block(length);
        });
    main.ret()
        .op(Opcode::DispatchMethod)
        .word(list::COUNT)
        .var(0)
        .word(0);
    let main = add_rooted(&mut builder, main, 2, &[0], &[]);

    let runtime = start_with(builder, main, config());
    assert_eq!(runtime.execute_main().unwrap().as_integer(), 200);
    assert!(runtime.heap().stats().collections > 0);
}

// ============================================================================
// Native entry points
// ============================================================================

#[test]
fn test_call_function_from_rust() {
    let (builder, main, factorial) = factorial_program(1);
    let runtime = start_with(builder, main, config());

    let mut thread = Thread::attach(&runtime);
    let mut result = [Value::NOTHINGNESS];
    thread
        .call_function(factorial, Value::NOTHINGNESS, &[Value::from_integer(5)], &mut result)
        .unwrap();
    assert_eq!(result[0].as_integer(), 120);
    assert_eq!(thread.pinned(), 0);
    assert!(thread.state().frames().is_empty());
}

#[test]
fn test_execute_callable_extern() {
    let mut builder = builder();
    let mut body = Assembler::new();
    body.ret().op(Opcode::SubtractInteger).var(0).var(1);
    let function = builder.bytecode_function(body, 2).with_arguments(2);
    let function = builder.add_function(function);
    let mut main = Assembler::new();
    main.ret().int(0);
    let main = builder.add_bytecode_function(main, 0);
    let runtime = start_with(builder, main, config());

    let mut thread = Thread::attach(&runtime);
    let callable = Closure::captured_call(&mut thread).unwrap();
    Closure::bind(
        runtime.heap(),
        callable,
        function,
        ContextType::None,
        Value::NOTHINGNESS,
        0,
    );
    let mut result = [Value::NOTHINGNESS];
    thread
        .execute_callable_extern(
            callable,
            &[Value::from_integer(50), Value::from_integer(8)],
            &mut result,
        )
        .unwrap();
    assert_eq!(result[0].as_integer(), 42);
    assert_eq!(thread.pinned(), 0);
}
