//! The evaluator.
//!
//! [`Thread::produce`] reads one instruction at the active frame's cursor,
//! recursively produces its operands and writes its result into a
//! destination slice. Statements are instructions produced into an empty
//! destination. Writes to a destination are clipped to its length.
//!
//! An instruction writes its destination only after its last allocation.
//! Objects that must survive a later allocation are pinned in the retain
//! list, or live in frame slots covered by object variable records.

use builtins::{boxed, BoxValue, Dictionary, List, PinnedBox, StringObject};
use bytecode_system::{
    decode_double, decode_int32, decode_int64, ContextType, FunctionBody, ObjectVariableRecord,
    Opcode,
};
use core_types::{
    ClassId, EngineError, EngineResult, FunctionId, ObjectRef, Value, ValueRef, BOX_WORDS,
    REMOTE_MASK, T_ERROR, T_NOTHINGNESS, T_OBJECT, T_OPTIONAL_VALUE,
};
use memory_manager::{object::checked_size, Mutator, Retained};

use crate::call_frame::{CURSOR, FRAME_HEADER_WORDS, NO_CURSOR};
use crate::closure::Closure;
use crate::thread::{deliver, Thread};

/// Where the arguments of a call come from.
enum Arguments<'a> {
    /// An argument list in the instruction stream
    Stream,
    /// Words supplied by native code
    Values(&'a [Value]),
}

#[inline]
fn write(dest: &mut [Value], value: Value) {
    if let Some(slot) = dest.first_mut() {
        *slot = value;
    }
}

fn optional(object: Option<ObjectRef>) -> [Value; 2] {
    match object {
        Some(object) => [Value::from_raw(T_OPTIONAL_VALUE), Value::from_object(object)],
        None => [Value::NOTHINGNESS, Value::NOTHINGNESS],
    }
}

fn box_of(kind: u64, payload: &[Value]) -> EngineResult<BoxValue> {
    if payload.len() >= BOX_WORDS {
        return Err(EngineError::invalid_program(format!(
            "A box holds at most {} payload words, not {}",
            BOX_WORDS - 1,
            payload.len()
        )));
    }
    let mut value = boxed::nothingness();
    value[0] = Value::from_raw(kind);
    value[1..=payload.len()].copy_from_slice(payload);
    Ok(value)
}

fn box_payload(value: &BoxValue, width: usize) -> EngineResult<&[Value]> {
    value.get(1..=width).ok_or_else(|| {
        EngineError::invalid_program(format!("A box has no {} payload words", width))
    })
}

impl Thread {
    /// Runs the program's entry point on this thread.
    pub(crate) fn call_main(&mut self) -> EngineResult<Value> {
        let main = self.runtime.program().main;
        let mut result = [Value::NOTHINGNESS];
        self.call_function(main, Value::NOTHINGNESS, &[], &mut result)?;
        Ok(result[0])
    }

    /// Calls `function` with the context `this` and the argument words
    /// `arguments`. The words it returns are written into `dest`.
    ///
    /// Returns the context value the function ended with, which an
    /// initializer uses to hand back its possibly moved instance.
    ///
    /// # Errors
    ///
    /// Returns the fatal error raised by the function.
    pub fn call_function(
        &mut self,
        function: FunctionId,
        this: Value,
        arguments: &[Value],
        dest: &mut [Value],
    ) -> EngineResult<Value> {
        let base = self.reserve_frame(function, this)?;
        if let Err(error) = self.store_arguments(base, arguments) {
            self.pop_frame(base);
            return Err(error);
        }
        self.perform_function(base, function, dest)
    }

    /// Invokes a closure or captured call with argument words supplied by
    /// native code.
    ///
    /// # Errors
    ///
    /// Returns the fatal error raised by the callable.
    pub fn execute_callable_extern(
        &mut self,
        callable: ObjectRef,
        arguments: &[Value],
        dest: &mut [Value],
    ) -> EngineResult<()> {
        self.execute_callable(callable, Arguments::Values(arguments), dest)
    }

    /// Makes the reserved frame at `base` the active one and runs
    /// `function` in it, then pops it.
    ///
    /// A fatal error gets the backtrace of the frames active when it was
    /// raised.
    pub fn perform_function(
        &mut self,
        base: usize,
        function: FunctionId,
        dest: &mut [Value],
    ) -> EngineResult<Value> {
        let body = self.runtime.program().function(function)?.body;
        let caller = std::mem::replace(&mut self.frame, base);
        let outcome = match body {
            FunctionBody::Bytecode { start, len } => {
                self.run_block((start + len) as u64).map(|()| {
                    deliver(dest, &self.returned);
                    self.returned.clear();
                })
            }
            FunctionBody::Native(native) => match self.runtime.natives().handler(native) {
                Ok(handler) => handler(self, dest),
                Err(error) => Err(error),
            },
        };
        let outcome = outcome.map_err(|error| {
            let backtrace = self.backtrace();
            error.with_backtrace(backtrace)
        });
        let this = self.this();
        self.frame = caller;
        self.pop_frame(base);
        outcome.map(|()| this)
    }

    #[inline]
    fn cursor(&self) -> u64 {
        self.stack_word(self.frame + CURSOR).unwrap_or(NO_CURSOR)
    }

    #[inline]
    fn set_cursor(&self, cursor: u64) -> EngineResult<()> {
        self.set_stack_word(self.frame + CURSOR, cursor)
    }

    fn is_leaving(&self) -> bool {
        self.cursor() == NO_CURSOR
    }

    #[inline]
    fn next_word(&mut self) -> EngineResult<u32> {
        let cursor = self.cursor();
        let word = self.runtime.program().instruction(cursor as usize)?;
        self.set_cursor(cursor + 1)?;
        Ok(word)
    }

    #[inline]
    fn next_index(&mut self) -> EngineResult<usize> {
        self.next_word().map(|word| word as usize)
    }

    /// Reads a block length and returns the block's bounds. The cursor is
    /// left at the block's first word.
    fn read_block(&mut self) -> EngineResult<(u64, u64)> {
        let length = u64::from(self.next_word()?);
        let start = self.cursor();
        Ok((start, start + length))
    }

    /// Produces statements until the cursor reaches `end` or the function
    /// leaves.
    fn run_block(&mut self, end: u64) -> EngineResult<()> {
        while self.cursor() < end {
            self.runtime.heap().barrier().checkpoint();
            self.produce(&mut [])?;
        }
        Ok(())
    }

    /// Continues after the construct ending at `end`, unless the function
    /// is leaving.
    fn skip_to(&self, end: u64) -> EngineResult<()> {
        if self.is_leaving() {
            return Ok(());
        }
        self.set_cursor(end)
    }

    fn variable_slot(&self, index: usize, width: usize) -> EngineResult<usize> {
        let slot = self.frame + FRAME_HEADER_WORDS + index;
        if slot + width > self.end {
            return Err(EngineError::invalid_program(format!(
                "Variable {} is outside the frame",
                index + width.saturating_sub(1)
            )));
        }
        Ok(slot)
    }

    fn variable(&self, index: usize) -> EngineResult<Value> {
        let slot = self.variable_slot(index, 1)?;
        self.stack_word(slot).map(Value::from_raw)
    }

    fn set_variables(&self, index: usize, words: &[Value]) -> EngineResult<()> {
        let slot = self.variable_slot(index, words.len())?;
        self.store_words(slot, words)
    }

    fn store_words(&self, slot: usize, words: &[Value]) -> EngineResult<()> {
        for (offset, word) in words.iter().enumerate() {
            self.set_stack_word(slot + offset, word.raw())?;
        }
        Ok(())
    }

    fn instance(&self, index: usize, width: usize) -> EngineResult<ObjectRef> {
        let object = self.this_object()?;
        if index + width > self.heap().value_words(object) {
            return Err(EngineError::invalid_program(format!(
                "Instance variable {} is outside the object",
                index + width.saturating_sub(1)
            )));
        }
        Ok(object)
    }

    fn read_reference(&self, reference: ValueRef) -> EngineResult<Value> {
        match reference {
            ValueRef::Stack(slot) => self.stack_word(slot).map(Value::from_raw),
            ValueRef::Field { object, offset } => {
                self.check_field(object, offset)?;
                Ok(self.heap().read(object, offset))
            }
        }
    }

    fn write_reference(&self, reference: ValueRef, value: Value) -> EngineResult<()> {
        match reference {
            ValueRef::Stack(slot) => self.set_stack_word(slot, value.raw()),
            ValueRef::Field { object, offset } => {
                self.check_field(object, offset)?;
                self.heap().write(object, offset, value);
                Ok(())
            }
        }
    }

    fn check_field(&self, object: ObjectRef, offset: usize) -> EngineResult<()> {
        if offset >= self.heap().value_words(object) {
            return Err(EngineError::invalid_program(format!(
                "Reference to word {} is outside the object",
                offset
            )));
        }
        Ok(())
    }

    fn produce_value(&mut self) -> EngineResult<Value> {
        let mut value = [Value::NOTHINGNESS];
        self.produce(&mut value)?;
        Ok(value[0])
    }

    fn produce_words(&mut self, width: usize) -> EngineResult<Vec<Value>> {
        if width > self.state.stack.len() {
            return Err(EngineError::invalid_program(format!(
                "A value of {} words does not fit any frame",
                width
            )));
        }
        let mut words = vec![Value::NOTHINGNESS; width];
        if width > 0 {
            self.produce(&mut words)?;
        }
        Ok(words)
    }

    fn produce_box(&mut self) -> EngineResult<BoxValue> {
        let mut value = boxed::nothingness();
        self.produce(&mut value)?;
        Ok(value)
    }

    fn produce_object(&mut self) -> EngineResult<ObjectRef> {
        self.produce_value()?
            .as_object()
            .ok_or_else(|| EngineError::invalid_program("Expected an object, found null"))
    }

    fn produce_class(&mut self) -> EngineResult<ClassId> {
        self.produce_value().map(Value::as_class)
    }

    fn produce_integers(&mut self) -> EngineResult<(i64, i64)> {
        let a = self.produce_value()?.as_integer();
        let b = self.produce_value()?.as_integer();
        Ok((a, b))
    }

    fn produce_doubles(&mut self) -> EngineResult<(f64, f64)> {
        let a = self.produce_value()?.as_double();
        let b = self.produce_value()?.as_double();
        Ok((a, b))
    }

    fn produce_booleans(&mut self) -> EngineResult<(bool, bool)> {
        let a = self.produce_value()?.as_bool();
        let b = self.produce_value()?.as_bool();
        Ok((a, b))
    }

    /// Reserves a frame for `function`, produces the argument list from
    /// the instruction stream into it and performs the call.
    fn call(
        &mut self,
        function: FunctionId,
        this: Value,
        dest: &mut [Value],
    ) -> EngineResult<Value> {
        let base = self.reserve_frame(function, this)?;
        if let Err(error) = self.produce_arguments(base) {
            self.pop_frame(base);
            return Err(error);
        }
        self.perform_function(base, function, dest)
    }

    fn produce_arguments(&mut self, base: usize) -> EngineResult<()> {
        let limit = self.end;
        let mut slot = base + FRAME_HEADER_WORDS;
        let count = self.next_word()?;
        for _ in 0..count {
            let width = self.next_index()?;
            let words = self.produce_words(width)?;
            if slot + width > limit {
                return Err(EngineError::invalid_program(
                    "Arguments exceed the callee frame",
                ));
            }
            self.store_words(slot, &words)?;
            slot += width;
        }
        Ok(())
    }

    fn store_arguments(&mut self, base: usize, arguments: &[Value]) -> EngineResult<()> {
        let slot = base + FRAME_HEADER_WORDS;
        if slot + arguments.len() > self.end {
            return Err(EngineError::invalid_program(
                "Arguments exceed the callee frame",
            ));
        }
        self.store_words(slot, arguments)
    }

    fn execute_callable(
        &mut self,
        callable: ObjectRef,
        arguments: Arguments<'_>,
        dest: &mut [Value],
    ) -> EngineResult<()> {
        let class = self.heap().class_of(callable);
        if class != ClassId::CLOSURE && class != ClassId::CAPTURED_CALL {
            return Err(EngineError::invalid_program(format!(
                "Instance of {:?} is not callable",
                class
            )));
        }
        let pin = self.retain(callable)?;
        let prepared = self.prepare_callable(pin, arguments);
        self.release(1)?;
        let (base, function) = prepared?;
        self.perform_function(base, function, dest)?;
        Ok(())
    }

    fn prepare_callable(
        &mut self,
        pin: Retained,
        arguments: Arguments<'_>,
    ) -> EngineResult<(usize, FunctionId)> {
        let callable = self.retained(pin);
        let function = Closure::function(self.heap(), callable);
        let this = Closure::this(self.heap(), callable);
        let base = self.reserve_frame(function, this)?;
        let filled = match arguments {
            Arguments::Stream => self.produce_arguments(base),
            Arguments::Values(values) => self.store_arguments(base, values),
        };
        let replayed = filled.and_then(|()| {
            let callable = self.retained(pin);
            let variables = &self.state.stack[base + FRAME_HEADER_WORDS..self.end];
            Closure::replay_captures(self.runtime.heap(), callable, variables)
        });
        if let Err(error) = replayed {
            self.pop_frame(base);
            return Err(error);
        }
        Ok((base, function))
    }

    /// Pins the object a context value refers to, if `context` makes it a
    /// heap reference.
    fn retain_context(
        &mut self,
        context: ContextType,
        value: Value,
    ) -> EngineResult<Option<Retained>> {
        let object = match context {
            ContextType::Object => value.as_object(),
            ContextType::ValueReference => match value.as_reference() {
                ValueRef::Field { object, .. } => Some(object),
                ValueRef::Stack(_) => None,
            },
            ContextType::None => None,
        };
        object.map(|object| self.retain(object)).transpose()
    }

    /// Re-reads a context value pinned by [`Self::retain_context`] and
    /// releases the pin.
    fn release_context(
        &mut self,
        context: ContextType,
        value: Value,
        pin: Option<Retained>,
    ) -> EngineResult<Value> {
        let Some(pin) = pin else {
            return Ok(value);
        };
        let object = self.retained(pin);
        self.release(1)?;
        Ok(match (context, value.as_reference()) {
            (ContextType::ValueReference, ValueRef::Field { offset, .. }) => {
                Value::from_reference(ValueRef::Field { object, offset })
            }
            _ => Value::from_object(object),
        })
    }

    fn capture(
        &mut self,
        function: FunctionId,
        this: Value,
        dest: &mut [Value],
    ) -> EngineResult<()> {
        let context = self.runtime.program().function(function)?.context;
        let pin = self.retain_context(context, this)?;
        let closure = Closure::captured_call(self);
        let this = self.release_context(context, this, pin)?;
        let closure = closure?;
        Closure::bind(self.heap(), closure, function, context, this, 0);
        write(dest, Value::from_object(closure));
        Ok(())
    }

    /// Produces one instruction into `dest`.
    ///
    /// # Errors
    ///
    /// Fails on an illegal opcode, malformed operands, or any fatal
    /// condition raised while evaluating.
    pub fn produce(&mut self, dest: &mut [Value]) -> EngineResult<()> {
        let word = self.next_word()?;
        match Opcode::try_from(word)? {
            Opcode::DispatchMethod => {
                let vti = self.next_word()?;
                let receiver = self.produce_object()?;
                let class = self.heap().class_of(receiver);
                let function = self.runtime.program().class(class)?.method(vti)?;
                self.call(function, Value::from_object(receiver), dest)?;
            }
            Opcode::DispatchTypeMethod => {
                let vti = self.next_word()?;
                let class = self.produce_class()?;
                let function = self.runtime.program().class(class)?.method(vti)?;
                self.call(function, Value::from_class(class), dest)?;
            }
            Opcode::DispatchProtocol => self.dispatch_protocol(dest)?,
            Opcode::DispatchSuper => {
                let vti = self.next_word()?;
                let class = self.produce_class()?;
                let function = self.runtime.program().class(class)?.method(vti)?;
                let this = self.this();
                self.call(function, this, dest)?;
            }
            Opcode::CallContextedFunction => {
                let function = FunctionId(self.next_word()?);
                let context = self.produce_value()?;
                self.call(function, context, dest)?;
            }
            Opcode::CallFunction => {
                let function = FunctionId(self.next_word()?);
                self.call(function, Value::NOTHINGNESS, dest)?;
            }
            Opcode::SuperInitializer => {
                let vti = self.next_word()?;
                let class = self.produce_class()?;
                let initializer = self.runtime.program().class(class)?.initializer(vti)?;
                let this = self.this();
                self.call(initializer, this, &mut [])?;
            }
            Opcode::NewObject => {
                let vti = self.next_word()?;
                let class = self.produce_class()?;
                let descriptor = self.runtime.program().class(class)?;
                let (initializer, size) = (descriptor.initializer(vti)?, descriptor.value_size);
                let object = self.allocate_object(class, size)?;
                let object = self.call(initializer, Value::from_object(object), &mut [])?;
                write(dest, object);
            }

            Opcode::Return => {
                let width = self.next_index()?;
                let words = self.produce_words(width)?;
                self.returned = words;
                self.set_cursor(NO_CURSOR)?;
            }
            Opcode::RepeatWhile => {
                let condition = self.cursor();
                loop {
                    self.runtime.heap().barrier().checkpoint();
                    self.set_cursor(condition)?;
                    let holds = self.produce_value()?.as_bool();
                    let (_, end) = self.read_block()?;
                    if !holds {
                        self.set_cursor(end)?;
                        break;
                    }
                    self.run_block(end)?;
                    if self.is_leaving() {
                        break;
                    }
                }
            }
            Opcode::If => self.branch()?,
            Opcode::ElseIf | Opcode::Else => {
                return Err(EngineError::invalid_program(
                    "Else branch outside of an If instruction",
                ));
            }
            Opcode::ForInList => self.for_in_list()?,
            Opcode::ForInRange => self.for_in_range()?,

            Opcode::This => write(dest, self.this()),
            Opcode::SameObject => {
                let first = self.produce_value()?;
                let pin = self.retain_context(ContextType::Object, first)?;
                let second = self.produce_value();
                let first = self.release_context(ContextType::Object, first, pin)?;
                write(dest, Value::from_bool(first.raw() == second?.raw()));
            }

            Opcode::GetVariable => {
                let index = self.next_index()?;
                write(dest, self.variable(index)?);
            }
            Opcode::GetVariableWide => {
                let index = self.next_index()?;
                let width = self.next_index()?;
                let slot = self.variable_slot(index, width)?;
                for (offset, value) in dest.iter_mut().take(width).enumerate() {
                    *value = Value::from_raw(self.stack_word(slot + offset)?);
                }
            }
            Opcode::SetVariable => {
                let index = self.next_index()?;
                let value = self.produce_value()?;
                self.set_variables(index, &[value])?;
            }
            Opcode::SetVariableWide => {
                let index = self.next_index()?;
                let width = self.next_index()?;
                let words = self.produce_words(width)?;
                self.set_variables(index, &words)?;
            }
            Opcode::IncrementVariable | Opcode::DecrementVariable => {
                let index = self.next_index()?;
                let step = if word == Opcode::IncrementVariable as u32 { 1 } else { -1 };
                let value = self.variable(index)?.as_integer().wrapping_add(step);
                self.set_variables(index, &[Value::from_integer(value)])?;
            }

            Opcode::GetInstanceVariable => {
                let index = self.next_index()?;
                let object = self.instance(index, 1)?;
                write(dest, self.heap().read(object, index));
            }
            Opcode::GetInstanceVariableWide => {
                let index = self.next_index()?;
                let width = self.next_index()?;
                let object = self.instance(index, width)?;
                let count = width.min(dest.len());
                self.heap().read_words(object, index, &mut dest[..count]);
            }
            Opcode::SetInstanceVariable => {
                let index = self.next_index()?;
                let value = self.produce_value()?;
                let object = self.instance(index, 1)?;
                self.heap().write(object, index, value);
            }
            Opcode::SetInstanceVariableWide => {
                let index = self.next_index()?;
                let width = self.next_index()?;
                let words = self.produce_words(width)?;
                let object = self.instance(index, width)?;
                self.heap().write_words(object, index, &words);
            }
            Opcode::IncrementInstanceVariable | Opcode::DecrementInstanceVariable => {
                let index = self.next_index()?;
                let step = if word == Opcode::IncrementInstanceVariable as u32 { 1 } else { -1 };
                let object = self.instance(index, 1)?;
                let value = self.heap().read(object, index).as_integer().wrapping_add(step);
                self.heap().write(object, index, Value::from_integer(value));
            }

            Opcode::GetVtVariable => {
                let index = self.next_index()?;
                let reference = self.this().as_reference().offset_by(index);
                write(dest, self.read_reference(reference)?);
            }
            Opcode::SetVtVariable => {
                let index = self.next_index()?;
                let value = self.produce_value()?;
                let reference = self.this().as_reference().offset_by(index);
                self.write_reference(reference, value)?;
            }

            Opcode::StackReference => {
                let index = self.next_index()?;
                let slot = self.variable_slot(index, 1)?;
                write(dest, Value::from_reference(ValueRef::Stack(slot)));
            }
            Opcode::InstanceReference => {
                let index = self.next_index()?;
                let object = self.instance(index, 1)?;
                let reference = ValueRef::Field { object, offset: index };
                write(dest, Value::from_reference(reference));
            }
            Opcode::VtReference => {
                let index = self.next_index()?;
                let reference = self.this().as_reference().offset_by(index);
                write(dest, Value::from_reference(reference));
            }
            Opcode::GetValueFromReference => {
                let width = self.next_index()?;
                let reference = self.produce_value()?.as_reference();
                for (offset, value) in dest.iter_mut().take(width).enumerate() {
                    *value = self.read_reference(reference.offset_by(offset))?;
                }
            }
            Opcode::ClassFromInstance => {
                let object = self.produce_object()?;
                write(dest, Value::from_class(self.heap().class_of(object)));
            }
            Opcode::ClassFromIndex => {
                let class = ClassId(self.next_word()?);
                self.runtime.program().class(class)?;
                write(dest, Value::from_class(class));
            }
            Opcode::StringPool => {
                let index = self.next_index()?;
                let string = self.runtime.string(index).ok_or_else(|| {
                    EngineError::invalid_program(format!("No string #{} in the pool", index))
                })?;
                write(dest, Value::from_object(string));
            }
            Opcode::True => write(dest, Value::TRUE),
            Opcode::False => write(dest, Value::FALSE),
            Opcode::Integer32 => {
                let value = decode_int32(self.next_word()?);
                write(dest, value);
            }
            Opcode::Integer64 => {
                let hi = self.next_word()?;
                let lo = self.next_word()?;
                write(dest, decode_int64(hi, lo));
            }
            Opcode::Double => {
                let hi = self.next_word()?;
                let lo = self.next_word()?;
                let exponent = self.next_word()?;
                write(dest, decode_double(hi, lo, exponent));
            }
            Opcode::Symbol => {
                let word = self.next_word()?;
                let symbol = char::from_u32(word).ok_or_else(|| {
                    EngineError::invalid_program(format!("{:#x} is not a Unicode scalar", word))
                })?;
                write(dest, Value::from_symbol(symbol));
            }
            Opcode::Nothingness => write(dest, Value::NOTHINGNESS),

            Opcode::EqualPrimitive | Opcode::EqualSymbol => {
                let a = self.produce_value()?;
                let b = self.produce_value()?;
                write(dest, Value::from_bool(a.raw() == b.raw()));
            }
            Opcode::SubtractInteger => {
                let (a, b) = self.produce_integers()?;
                write(dest, Value::from_integer(a.wrapping_sub(b)));
            }
            Opcode::AddInteger => {
                let (a, b) = self.produce_integers()?;
                write(dest, Value::from_integer(a.wrapping_add(b)));
            }
            Opcode::MultiplyInteger => {
                let (a, b) = self.produce_integers()?;
                write(dest, Value::from_integer(a.wrapping_mul(b)));
            }
            Opcode::DivideInteger => {
                let (a, b) = self.produce_integers()?;
                if b == 0 {
                    return Err(EngineError::division_by_zero());
                }
                write(dest, Value::from_integer(a.wrapping_div(b)));
            }
            Opcode::RemainderInteger => {
                let (a, b) = self.produce_integers()?;
                if b == 0 {
                    return Err(EngineError::division_by_zero());
                }
                write(dest, Value::from_integer(a.wrapping_rem(b)));
            }
            Opcode::BinaryAnd => {
                let (a, b) = self.produce_integers()?;
                write(dest, Value::from_integer(a & b));
            }
            Opcode::BinaryOr => {
                let (a, b) = self.produce_integers()?;
                write(dest, Value::from_integer(a | b));
            }
            Opcode::BinaryXor => {
                let (a, b) = self.produce_integers()?;
                write(dest, Value::from_integer(a ^ b));
            }
            Opcode::BinaryNot => {
                let a = self.produce_value()?.as_integer();
                write(dest, Value::from_integer(!a));
            }
            Opcode::ShiftLeft => {
                let (a, b) = self.produce_integers()?;
                write(dest, Value::from_integer(a.wrapping_shl(b as u32)));
            }
            Opcode::ShiftRight => {
                let (a, b) = self.produce_integers()?;
                write(dest, Value::from_integer(a.wrapping_shr(b as u32)));
            }
            Opcode::LessInteger => {
                let (a, b) = self.produce_integers()?;
                write(dest, Value::from_bool(a < b));
            }
            Opcode::GreaterInteger => {
                let (a, b) = self.produce_integers()?;
                write(dest, Value::from_bool(a > b));
            }
            Opcode::GreaterOrEqualInteger => {
                let (a, b) = self.produce_integers()?;
                write(dest, Value::from_bool(a >= b));
            }
            Opcode::LessOrEqualInteger => {
                let (a, b) = self.produce_integers()?;
                write(dest, Value::from_bool(a <= b));
            }

            Opcode::InvertBoolean => {
                let a = self.produce_value()?.as_bool();
                write(dest, Value::from_bool(!a));
            }
            Opcode::OrBoolean => {
                let (a, b) = self.produce_booleans()?;
                write(dest, Value::from_bool(a || b));
            }
            Opcode::AndBoolean => {
                let (a, b) = self.produce_booleans()?;
                write(dest, Value::from_bool(a && b));
            }

            Opcode::EqualDouble => {
                let (a, b) = self.produce_doubles()?;
                write(dest, Value::from_bool(a == b));
            }
            Opcode::SubtractDouble => {
                let (a, b) = self.produce_doubles()?;
                write(dest, Value::from_double(a - b));
            }
            Opcode::AddDouble => {
                let (a, b) = self.produce_doubles()?;
                write(dest, Value::from_double(a + b));
            }
            Opcode::MultiplyDouble => {
                let (a, b) = self.produce_doubles()?;
                write(dest, Value::from_double(a * b));
            }
            Opcode::DivideDouble => {
                let (a, b) = self.produce_doubles()?;
                write(dest, Value::from_double(a / b));
            }
            Opcode::LessDouble => {
                let (a, b) = self.produce_doubles()?;
                write(dest, Value::from_bool(a < b));
            }
            Opcode::GreaterDouble => {
                let (a, b) = self.produce_doubles()?;
                write(dest, Value::from_bool(a > b));
            }
            Opcode::LessOrEqualDouble => {
                let (a, b) = self.produce_doubles()?;
                write(dest, Value::from_bool(a <= b));
            }
            Opcode::GreaterOrEqualDouble => {
                let (a, b) = self.produce_doubles()?;
                write(dest, Value::from_bool(a >= b));
            }
            Opcode::RemainderDouble => {
                let (a, b) = self.produce_doubles()?;
                write(dest, Value::from_double(a % b));
            }
            Opcode::IntegerToDouble => {
                let a = self.produce_value()?.as_integer();
                write(dest, Value::from_double(a as f64));
            }

            Opcode::UnwrapOptional => {
                let width = self.next_index()?;
                let words = self.produce_words(width + 1)?;
                if words[0].is_nothingness() {
                    return Err(EngineError::unwrap_nothingness());
                }
                deliver(dest, &words[1..]);
            }
            Opcode::UnwrapBoxOptional => {
                let value = self.produce_box()?;
                if boxed::is_nothingness(&value) {
                    return Err(EngineError::unwrap_nothingness());
                }
                deliver(dest, &value);
            }
            Opcode::IsNothingness => {
                let width = self.next_index()?;
                let words = self.produce_words(width)?;
                let empty = words.first().map_or(true, |flag| flag.is_nothingness());
                write(dest, Value::from_bool(empty));
            }
            Opcode::ErrorCheckOptional => {
                let width = self.next_index()?;
                let words = self.produce_words(width + 1)?;
                if words[0].is_error() {
                    let code = words.get(1).map_or(0, |code| code.as_integer());
                    return Err(EngineError::unwrap_error(code));
                }
                deliver(dest, &words[1..]);
            }
            Opcode::ErrorCheckBoxOptional => {
                let value = self.produce_box()?;
                if boxed::kind(&value) == T_ERROR {
                    return Err(EngineError::unwrap_error(boxed::payload(&value).as_integer()));
                }
                deliver(dest, &value);
            }
            Opcode::IsError => {
                let width = self.next_index()?;
                let words = self.produce_words(width)?;
                let error = words.first().is_some_and(|flag| flag.is_error());
                write(dest, Value::from_bool(error));
            }
            Opcode::OptionalProduce => {
                let width = self.next_index()?;
                let payload = self.produce_words(width)?;
                let mut words = Vec::with_capacity(width + 1);
                words.push(Value::from_raw(T_OPTIONAL_VALUE));
                words.extend(payload);
                deliver(dest, &words);
            }
            Opcode::ErrorProduce => {
                let code = self.produce_value()?;
                deliver(dest, &[Value::from_raw(T_ERROR), code]);
            }
            Opcode::ConditionalProduce => {
                let index = self.next_index()?;
                let width = self.next_index()?;
                let words = self.produce_words(width + 1)?;
                let present = !words[0].is_nothingness();
                if present {
                    self.set_variables(index, &words[1..])?;
                }
                write(dest, Value::from_bool(present));
            }
            Opcode::BoxProduce => {
                let kind = u64::from(self.next_word()?);
                let width = self.next_index()?;
                let words = self.produce_words(width)?;
                deliver(dest, &box_of(kind, &words)?);
            }
            Opcode::BoxProduceRemote => {
                let kind = u64::from(self.next_word()?);
                let width = self.next_index()?;
                let array = self.allocate_array(checked_size(width, 8)?)?;
                let pin = self.retain(array)?;
                let words = self.produce_words(width);
                let array = self.retained(pin);
                self.release(1)?;
                self.heap().write_words(array, 0, &words?);
                let remote = box_of(kind | REMOTE_MASK, &[Value::from_object(array)])?;
                deliver(dest, &remote);
            }
            Opcode::Unbox => {
                let width = self.next_index()?;
                let value = self.produce_box()?;
                deliver(dest, box_payload(&value, width)?);
            }
            Opcode::UnboxRemote => {
                let width = self.next_index()?;
                let words = self.produce_remote(width)?;
                deliver(dest, &words.unwrap_or_default());
            }
            Opcode::BoxToOptional => {
                let width = self.next_index()?;
                let value = self.produce_box()?;
                if boxed::is_nothingness(&value) {
                    write(dest, Value::NOTHINGNESS);
                } else {
                    let mut words = vec![Value::from_raw(T_OPTIONAL_VALUE)];
                    words.extend_from_slice(box_payload(&value, width)?);
                    deliver(dest, &words);
                }
            }
            Opcode::BoxToOptionalRemote => {
                let width = self.next_index()?;
                match self.produce_remote(width)? {
                    Some(payload) => {
                        let mut words = vec![Value::from_raw(T_OPTIONAL_VALUE)];
                        words.extend(payload);
                        deliver(dest, &words);
                    }
                    None => write(dest, Value::NOTHINGNESS),
                }
            }
            Opcode::OptionalToBox => {
                let kind = u64::from(self.next_word()?);
                let width = self.next_index()?;
                let words = self.produce_words(width + 1)?;
                let value = if words[0].is_nothingness() {
                    boxed::nothingness()
                } else {
                    box_of(kind, &words[1..])?
                };
                deliver(dest, &value);
            }

            Opcode::DowncastToClass => {
                let object = self.produce_value()?;
                let pin = self.retain_context(ContextType::Object, object)?;
                let class = self.produce_class();
                let object = self.release_context(ContextType::Object, object, pin)?;
                let object = object.as_object();
                let class = class?;
                let matched = object.filter(|object| self.is_instance(*object, class));
                deliver(dest, &optional(matched));
            }
            Opcode::CastToProtocol => {
                let protocol = self.next_word()?;
                let value = self.produce_box()?;
                let conforms = self.conforms_to(&value, protocol)?;
                deliver(dest, &if conforms { value } else { boxed::nothingness() });
            }
            Opcode::CastToClass => {
                let value = self.produce_box()?;
                let pinned = PinnedBox::pin(self, value)?;
                let class = self.produce_class();
                let value = pinned.get(&*self);
                self.release(pinned.pins())?;
                let class = class?;
                let matched = match boxed::kind(&value) {
                    T_OBJECT => boxed::payload(&value).as_object(),
                    _ => None,
                }
                .filter(|object| self.is_instance(*object, class));
                deliver(dest, &optional(matched));
            }
            Opcode::CastToValueType => {
                let kind = u64::from(self.next_word()?);
                let value = self.produce_box()?;
                let held = boxed::kind(&value);
                let matches = held != T_NOTHINGNESS && held & !REMOTE_MASK == kind;
                deliver(dest, &if matches { value } else { boxed::nothingness() });
            }

            Opcode::ExecuteCallable => {
                let callable = self.produce_object()?;
                self.execute_callable(callable, Arguments::Stream, dest)?;
            }
            Opcode::Closure => self.closure(dest)?,
            Opcode::CaptureMethod => {
                let vti = self.next_word()?;
                let receiver = self.produce_object()?;
                let class = self.heap().class_of(receiver);
                let function = self.runtime.program().class(class)?.method(vti)?;
                self.capture(function, Value::from_object(receiver), dest)?;
            }
            Opcode::CaptureTypeMethod => {
                let vti = self.next_word()?;
                let class = self.produce_class()?;
                let function = self.runtime.program().class(class)?.method(vti)?;
                self.capture(function, Value::from_class(class), dest)?;
            }
            Opcode::CaptureContextedFunction => {
                let function = FunctionId(self.next_word()?);
                let context = self.produce_value()?;
                self.capture(function, context, dest)?;
            }

            Opcode::ListLiteral => {
                let count = self.next_index()?;
                let list = List::with_capacity(self, count)?;
                let pin = self.retain(list)?;
                let filled = self.fill_list(pin, count);
                let list = self.retained(pin);
                self.release(1)?;
                filled?;
                write(dest, Value::from_object(list));
            }
            Opcode::DictionaryLiteral => {
                let count = self.next_index()?;
                let dictionary = Dictionary::new(self)?;
                let pin = self.retain(dictionary)?;
                let filled = self.fill_dictionary(pin, count);
                let dictionary = self.retained(pin);
                self.release(1)?;
                filled?;
                write(dest, Value::from_object(dictionary));
            }
            Opcode::ConcatenateStrings => {
                let count = self.next_index()?;
                let string = self.concatenate(count)?;
                write(dest, Value::from_object(string));
            }
        }
        Ok(())
    }

    fn dispatch_protocol(&mut self, dest: &mut [Value]) -> EngineResult<()> {
        let protocol = self.next_word()?;
        let method = self.next_word()?;
        let temporary = self.next_index()?;
        let value = self.produce_box()?;
        self.set_variables(temporary, &value)?;

        let kind = boxed::kind(&value);
        let program = self.runtime.program();
        let (function, this) = if kind == T_OBJECT {
            let object = boxed::payload(&value).as_object().ok_or_else(|| {
                EngineError::invalid_program("Protocol dispatch on a null object")
            })?;
            let class = program.class(self.heap().class_of(object))?;
            let function = class.protocols.dispatch(protocol, method)?;
            (function, Value::from_object(object))
        } else {
            let table = program.value_type_protocol(kind & !REMOTE_MASK).ok_or_else(|| {
                EngineError::invalid_program(format!(
                    "Box type {} has no protocol table",
                    kind & !REMOTE_MASK
                ))
            })?;
            let function = table.dispatch(protocol, method)?;
            let reference = if kind & REMOTE_MASK != 0 {
                let array = boxed::payload(&value).as_object().ok_or_else(|| {
                    EngineError::invalid_program("Remote box without a payload array")
                })?;
                ValueRef::Field {
                    object: array,
                    offset: 0,
                }
            } else {
                ValueRef::Stack(self.variable_slot(temporary, BOX_WORDS)? + 1)
            };
            (function, Value::from_reference(reference))
        };
        self.call(function, this, dest)?;
        Ok(())
    }

    fn branch(&mut self) -> EngineResult<()> {
        let length = u64::from(self.next_word()?);
        let end = self.cursor() + length;

        let holds = self.produce_value()?.as_bool();
        let (_, block_end) = self.read_block()?;
        if holds {
            self.run_block(block_end)?;
            return self.skip_to(end);
        }
        self.set_cursor(block_end)?;

        while self.cursor() < end {
            let marker = self.next_word()?;
            match Opcode::try_from(marker)? {
                Opcode::ElseIf => {
                    let holds = self.produce_value()?.as_bool();
                    let (_, block_end) = self.read_block()?;
                    if holds {
                        self.run_block(block_end)?;
                        return self.skip_to(end);
                    }
                    self.set_cursor(block_end)?;
                }
                Opcode::Else => {
                    let (_, block_end) = self.read_block()?;
                    self.run_block(block_end)?;
                    return self.skip_to(end);
                }
                other => {
                    return Err(EngineError::invalid_program(format!(
                        "Unexpected {:?} inside an If instruction",
                        other
                    )));
                }
            }
        }
        Ok(())
    }

    fn for_in_list(&mut self) -> EngineResult<()> {
        let variable = self.next_index()?;
        let temporary = self.next_index()?;
        let list = self.produce_object()?;
        self.set_variables(temporary, &[Value::from_object(list)])?;
        let (start, end) = self.read_block()?;

        let mut index = 0;
        loop {
            self.runtime.heap().barrier().checkpoint();
            let list = self.variable(temporary)?.as_object().ok_or_else(|| {
                EngineError::invalid_program("The iterated list slot was overwritten")
            })?;
            if index >= List::count(self.heap(), list) {
                break;
            }
            let element = List::get(self.heap(), list, index as i64);
            self.set_variables(variable, &element)?;
            self.set_cursor(start)?;
            self.run_block(end)?;
            if self.is_leaving() {
                return Ok(());
            }
            index += 1;
        }
        self.set_cursor(end)
    }

    fn for_in_range(&mut self) -> EngineResult<()> {
        let variable = self.next_index()?;
        let first = self.produce_value()?.as_integer();
        let stop = self.produce_value()?.as_integer();
        let step = self.produce_value()?.as_integer();
        let (start, end) = self.read_block()?;

        let mut current = first;
        loop {
            self.runtime.heap().barrier().checkpoint();
            let more = match step.signum() {
                1 => current < stop,
                -1 => current > stop,
                _ => false,
            };
            if !more {
                break;
            }
            self.set_variables(variable, &[Value::from_integer(current)])?;
            self.set_cursor(start)?;
            self.run_block(end)?;
            if self.is_leaving() {
                return Ok(());
            }
            match current.checked_add(step) {
                Some(next) => current = next,
                None => break,
            }
        }
        self.set_cursor(end)
    }

    /// Produces a remote box and reads `width` words of its payload array.
    /// Returns `None` for an empty box.
    fn produce_remote(&mut self, width: usize) -> EngineResult<Option<Vec<Value>>> {
        let value = self.produce_box()?;
        if boxed::is_nothingness(&value) {
            return Ok(None);
        }
        let array = boxed::payload(&value)
            .as_object()
            .ok_or_else(|| EngineError::invalid_program("Remote box without a payload array"))?;
        if width > self.heap().value_words(array) {
            return Err(EngineError::invalid_program(
                "Remote box payload is shorter than requested",
            ));
        }
        let mut words = vec![Value::NOTHINGNESS; width];
        self.heap().read_words(array, 0, &mut words);
        Ok(Some(words))
    }

    fn is_instance(&self, object: ObjectRef, class: ClassId) -> bool {
        self.runtime
            .program()
            .inherits_from(self.heap().class_of(object), class)
    }

    fn conforms_to(&self, value: &BoxValue, protocol: u32) -> EngineResult<bool> {
        let kind = boxed::kind(value);
        let program = self.runtime.program();
        if kind == T_OBJECT {
            return match boxed::payload(value).as_object() {
                Some(object) => {
                    let class = program.class(self.heap().class_of(object))?;
                    Ok(class.protocols.conforms_to(protocol))
                }
                None => Ok(false),
            };
        }
        Ok(program
            .value_type_protocol(kind & !REMOTE_MASK)
            .is_some_and(|table| table.conforms_to(protocol)))
    }

    fn closure(&mut self, dest: &mut [Value]) -> EngineResult<()> {
        let function = FunctionId(self.next_word()?);
        let count = self.next_index()?;
        let size = self.next_index()?;
        let destination = self.next_index()?;
        let mut sources = Vec::new();
        for _ in 0..count {
            let index = self.next_index()?;
            let width = self.next_index()?;
            sources.push((index, width));
        }
        let record_count = self.next_index()?;
        let mut records = Vec::new();
        for _ in 0..record_count {
            let packed = self.next_word()?;
            let kind = self.next_word()?;
            records.push(ObjectVariableRecord::decode(packed, kind)?);
        }
        let bind_this = self.next_word()? != 0;
        if sources.iter().map(|(_, width)| width).sum::<usize>() != size {
            return Err(EngineError::invalid_program(
                "Capture widths do not add up to the capture size",
            ));
        }
        let context = self.runtime.program().function(function)?.context;

        let closure = Closure::allocate(self, size, record_count)?;
        let heap = self.runtime.heap();
        let mut offset = 0;
        for (index, width) in sources {
            for word in 0..width {
                let value = self.variable(index + word)?;
                Closure::write_capture(heap, closure, offset, value)?;
                offset += 1;
            }
        }
        for (index, record) in records.into_iter().enumerate() {
            Closure::write_record(heap, closure, index, record);
        }
        let this = if bind_this {
            self.this()
        } else {
            Value::NOTHINGNESS
        };
        Closure::bind(heap, closure, function, context, this, destination);
        write(dest, Value::from_object(closure));
        Ok(())
    }

    fn fill_list(&mut self, list: Retained, count: usize) -> EngineResult<()> {
        for _ in 0..count {
            let value = self.produce_box()?;
            let target = self.retained(list);
            List::append(self, target, value)?;
        }
        Ok(())
    }

    fn fill_dictionary(&mut self, dictionary: Retained, count: usize) -> EngineResult<()> {
        for _ in 0..count {
            let key = self.produce_object()?;
            let pin = self.retain(key)?;
            let value = self.produce_box();
            let key = self.retained(pin);
            self.release(1)?;
            let value = value?;
            let target = self.retained(dictionary);
            Dictionary::put(self, target, key, value)?;
        }
        Ok(())
    }

    fn empty_string(&self) -> EngineResult<ObjectRef> {
        self.runtime
            .string(0)
            .ok_or_else(|| EngineError::invalid_program("The string pool is empty"))
    }

    fn concatenate(&mut self, count: usize) -> EngineResult<ObjectRef> {
        if count == 0 {
            return self.empty_string();
        }
        let mut string = self.produce_object()?;
        for _ in 1..count {
            let pin = self.retain(string)?;
            let next = self.produce_object();
            let current = self.retained(pin);
            self.release(1)?;
            string = StringObject::concat(self, current, next?)?;
        }
        if StringObject::is_empty(self.heap(), string) {
            return self.empty_string();
        }
        Ok(string)
    }
}
