//! The loaded program: class, function and protocol tables plus the shared
//! instruction array.

use core_types::{ClassId, EngineError, EngineResult, FunctionId};

use crate::assembler::Assembler;
use crate::class::{Class, Marker, ProtocolTable};
use crate::function::{Function, FunctionBody};

/// Tables consumed by the engine. Immutable once the runtime starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    /// Shared instruction array all bytecode functions point into
    pub instructions: Vec<u32>,
    /// Function table
    pub functions: Vec<Function>,
    /// Class table; the first seven entries are the well-known classes
    pub classes: Vec<Class>,
    /// Protocol tables of value types, indexed by `box type - offset`
    pub value_type_protocols: Vec<ProtocolTable>,
    /// Box type of the first entry of `value_type_protocols`
    pub value_type_protocol_offset: u64,
    /// String literals interned at startup; entry 0 is the empty string
    pub strings: Vec<String>,
    /// Entry point
    pub main: FunctionId,
}

impl Program {
    /// The instruction word at `index`.
    #[inline]
    pub fn instruction(&self, index: usize) -> EngineResult<u32> {
        self.instructions.get(index).copied().ok_or_else(|| {
            EngineError::invalid_program(format!("Instruction pointer {} out of bounds", index))
        })
    }

    /// Looks up a function.
    #[inline]
    pub fn function(&self, id: FunctionId) -> EngineResult<&Function> {
        self.functions
            .get(id.index())
            .ok_or_else(|| EngineError::invalid_program(format!("No function #{}", id.0)))
    }

    /// Looks up a class.
    #[inline]
    pub fn class(&self, id: ClassId) -> EngineResult<&Class> {
        self.classes
            .get(id.index())
            .ok_or_else(|| EngineError::invalid_program(format!("No class {:?}", id)))
    }

    /// Looks up a class for modification before the runtime starts.
    pub fn class_mut(&mut self, id: ClassId) -> EngineResult<&mut Class> {
        self.classes
            .get_mut(id.index())
            .ok_or_else(|| EngineError::invalid_program(format!("No class {:?}", id)))
    }

    /// The protocol table of a value type box, with the remote flag already
    /// stripped from `box_type`.
    pub fn value_type_protocol(&self, box_type: u64) -> Option<&ProtocolTable> {
        let slot = box_type.checked_sub(self.value_type_protocol_offset)?;
        self.value_type_protocols.get(slot as usize)
    }

    /// True if `class` is `ancestor` or one of its subclasses.
    pub fn inherits_from(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        for _ in 0..=self.classes.len() {
            match current {
                Some(id) if id == ancestor => return true,
                Some(id) => current = self.classes.get(id.index()).and_then(|c| c.superclass),
                None => return false,
            }
        }
        false
    }

    /// Checks that the tables are consistent with each other.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidProgram` error naming the first inconsistency.
    pub fn validate(&self) -> EngineResult<()> {
        if self.classes.len() < ClassId::WELL_KNOWN_COUNT {
            return Err(EngineError::invalid_program(format!(
                "Expected at least {} well-known classes, found {}",
                ClassId::WELL_KNOWN_COUNT,
                self.classes.len()
            )));
        }
        if self.strings.first().map(String::as_str) != Some("") {
            return Err(EngineError::invalid_program(
                "String pool entry 0 must be the empty string",
            ));
        }
        for (index, function) in self.functions.iter().enumerate() {
            if let FunctionBody::Bytecode { start, len } = function.body {
                let end = start.checked_add(len);
                if end.map_or(true, |end| end > self.instructions.len()) {
                    return Err(EngineError::invalid_program(format!(
                        "Block of function #{} exceeds the instruction array",
                        index
                    )));
                }
            }
            if function.argument_count > function.frame_size {
                return Err(EngineError::invalid_program(format!(
                    "Function #{} takes more arguments than its frame holds",
                    index
                )));
            }
        }
        for (index, class) in self.classes.iter().enumerate() {
            if let Some(superclass) = class.superclass {
                self.class(superclass)?;
            }
            for id in class.methods.iter().chain(&class.initializers) {
                self.function(*id).map_err(|_| {
                    EngineError::invalid_program(format!(
                        "Class #{} refers to missing function #{}",
                        index, id.0
                    ))
                })?;
            }
        }
        let main = self.function(self.main)?;
        if main.block().is_none() {
            return Err(EngineError::invalid_program(
                "The entry point must be a bytecode function",
            ));
        }
        Ok(())
    }
}

/// Source of a [`Program`]. Bytecode file readers implement this trait.
pub trait BytecodeLoader {
    /// Produces the complete, validated program tables.
    fn load(self) -> EngineResult<Program>;
}

/// Builds a [`Program`] in memory.
///
/// The builder starts with the seven well-known classes and the empty
/// string in the pool.
///
/// # Examples
///
/// ```
/// use bytecode_system::{Assembler, BytecodeLoader, Opcode, ProgramBuilder};
///
/// let mut main = Assembler::new();
/// main.op(Opcode::Return).word(1).op(Opcode::Integer32).int32(42);
///
/// let mut builder = ProgramBuilder::new();
/// let id = builder.add_bytecode_function(main, 0);
/// builder.set_main(id);
///
/// let program = builder.load().unwrap();
/// assert_eq!(program.functions.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    /// Creates a builder holding only the well-known classes.
    pub fn new() -> Self {
        let classes = vec![
            Class::library(Marker::String),
            Class::library(Marker::List),
            Class::new(0),
            Class::library(Marker::Data),
            Class::library(Marker::Dictionary),
            Class::library(Marker::Closure),
            Class::library(Marker::Closure),
        ];
        Self {
            program: Program {
                classes,
                strings: vec![String::new()],
                ..Program::default()
            },
        }
    }

    /// Appends a class and returns its id.
    pub fn add_class(&mut self, class: Class) -> ClassId {
        self.program.classes.push(class);
        ClassId((self.program.classes.len() - 1) as u32)
    }

    /// Mutable access to a class already added.
    pub fn class_mut(&mut self, id: ClassId) -> Option<&mut Class> {
        self.program.classes.get_mut(id.index())
    }

    /// Appends a function descriptor as is.
    pub fn add_function(&mut self, function: Function) -> FunctionId {
        self.program.functions.push(function);
        FunctionId((self.program.functions.len() - 1) as u32)
    }

    /// Appends the block of `assembler` to the instruction array and
    /// registers a function executing it.
    pub fn add_bytecode_function(&mut self, assembler: Assembler, frame_size: usize) -> FunctionId {
        let function = self.bytecode_function(assembler, frame_size);
        self.add_function(function)
    }

    /// Appends the block of `assembler` and returns a descriptor for it
    /// without registering it, so records and arguments can be added first.
    pub fn bytecode_function(&mut self, assembler: Assembler, frame_size: usize) -> Function {
        let start = self.program.instructions.len();
        let words = assembler.finish();
        let len = words.len();
        self.program.instructions.extend(words);
        Function::bytecode(start, len, frame_size)
    }

    /// Reserves a function slot to be filled by [`ProgramBuilder::set_function`].
    /// Recursive functions need their own id while being assembled.
    pub fn reserve_function(&mut self) -> FunctionId {
        self.add_function(Function::bytecode(0, 0, 0))
    }

    /// Replaces a reserved function.
    pub fn set_function(&mut self, id: FunctionId, function: Function) {
        if let Some(slot) = self.program.functions.get_mut(id.index()) {
            *slot = function;
        }
    }

    /// Adds a string literal to the pool and returns its index.
    pub fn add_string(&mut self, string: &str) -> u32 {
        if string.is_empty() {
            return 0;
        }
        self.program.strings.push(string.to_owned());
        (self.program.strings.len() - 1) as u32
    }

    /// Installs the protocol tables of value types.
    pub fn set_value_type_protocols(&mut self, offset: u64, tables: Vec<ProtocolTable>) {
        self.program.value_type_protocol_offset = offset;
        self.program.value_type_protocols = tables;
    }

    /// Sets the entry point.
    pub fn set_main(&mut self, main: FunctionId) {
        self.program.main = main;
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BytecodeLoader for ProgramBuilder {
    fn load(self) -> EngineResult<Program> {
        self.program.validate()?;
        Ok(self.program)
    }
}
