//! Precise root scanning.
//!
//! Frames are scanned with the object variable records of their function
//! that apply at the frame's current offset. Instances and closure
//! captures are scanned with unscoped records.

use std::sync::atomic::{AtomicU64, Ordering};

use bytecode_system::{Class, ContextType, ObjectVariableRecord, ObjectVariableType, Program};
use core_types::{ObjectRef, REMOTE_MASK, T_OBJECT};
use memory_manager::Tracer;

use crate::call_frame::{self, CallFrame, THIS};
use crate::thread::ThreadState;

/// Marks every root of one thread: its linked frames and its retain list.
pub(crate) fn trace_thread(program: &Program, state: &ThreadState, tracer: &mut Tracer<'_>) {
    let stack = &state.stack;
    for frame in call_frame::frames(stack, state.top.load(Ordering::Relaxed)) {
        trace_frame(program, stack, &frame, tracer);
    }
    for pin in state.retained.lock().iter_mut() {
        *pin = tracer.mark(*pin);
    }
}

fn trace_frame(program: &Program, stack: &[AtomicU64], frame: &CallFrame, tracer: &mut Tracer<'_>) {
    let Ok(function) = program.function(frame.function) else {
        return;
    };
    mark_context(function.context, &stack[frame.base + THIS], tracer);

    let offset = frame.offset(function);
    let records = function
        .records
        .iter()
        .map(|scoped| scoped.applies_at(offset).then_some(scoped.record));
    let variables = frame.variable(0);
    let size = function.frame_size;
    mark_by_records(
        records,
        |index| (index < size).then(|| stack.get(variables + index)).flatten(),
        tracer,
    );
}

/// Marks the context slot of a frame or closure according to `context`.
pub(crate) fn mark_context(context: ContextType, slot: &AtomicU64, tracer: &mut Tracer<'_>) {
    match context {
        ContextType::Object => tracer.mark_slot(slot),
        ContextType::ValueReference => tracer.mark_reference_slot(slot),
        ContextType::None => {}
    }
}

/// Marks the instance variables of an instance of a bytecode class.
pub(crate) fn trace_instance(class: &Class, object: ObjectRef, tracer: &mut Tracer<'_>) {
    let heap = tracer.heap();
    let words = heap.value_words(object);
    mark_by_records(
        class.instance_records.iter().copied().map(Some),
        |index| (index < words).then(|| heap.field(object, index)),
        tracer,
    );
}

/// Applies object variable records to the slots returned by `slot`.
///
/// `None` entries are records out of scope. They still count towards a
/// preceding conditional skip.
pub(crate) fn mark_by_records<'s>(
    records: impl Iterator<Item = Option<ObjectVariableRecord>>,
    slot: impl Fn(usize) -> Option<&'s AtomicU64>,
    tracer: &mut Tracer<'_>,
) {
    let mut skip = 0usize;
    for record in records {
        if skip > 0 {
            skip -= 1;
            continue;
        }
        let Some(record) = record else {
            continue;
        };
        let index = record.variable_index as usize;
        let condition = || {
            slot(record.condition as usize).map(|word| word.load(Ordering::Relaxed))
        };
        match record.kind {
            ObjectVariableType::Simple => {
                if let Some(word) = slot(index) {
                    tracer.mark_slot(word);
                }
            }
            ObjectVariableType::Condition => {
                if condition().is_some_and(|flag| flag != 0) {
                    if let Some(word) = slot(index) {
                        tracer.mark_slot(word);
                    }
                }
            }
            ObjectVariableType::Box => {
                if let (Some(kind), Some(payload)) = (slot(index), slot(index + 1)) {
                    let kind = kind.load(Ordering::Relaxed);
                    if kind == T_OBJECT || kind & REMOTE_MASK != 0 {
                        tracer.mark_slot(payload);
                    }
                }
            }
            ObjectVariableType::ConditionalSkip => {
                if condition().map_or(true, |flag| flag == 0) {
                    skip = index;
                }
            }
        }
    }
}
