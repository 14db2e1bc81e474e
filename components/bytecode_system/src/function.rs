//! Function descriptors and their object variable records.

use core_types::{EngineError, EngineResult};

/// What the context value of a frame holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextType {
    /// No context, or a class value. Never traced.
    #[default]
    None,
    /// An object handle.
    Object,
    /// A value reference into a value-type instance.
    ValueReference,
}

impl TryFrom<u32> for ContextType {
    type Error = EngineError;

    fn try_from(word: u32) -> EngineResult<Self> {
        match word {
            0 => Ok(ContextType::None),
            1 => Ok(ContextType::Object),
            2 => Ok(ContextType::ValueReference),
            _ => Err(EngineError::invalid_program(format!(
                "Unknown context type {}",
                word
            ))),
        }
    }
}

/// How an object variable record locates a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectVariableType {
    /// The slot holds an object handle or zero.
    Simple,
    /// The slot holds an object handle if the `condition` slot is non-zero.
    Condition,
    /// The slot starts a box whose word 1 is traced for object and remote types.
    Box,
    /// If the `condition` slot is zero, skip the next `variable_index` records.
    ConditionalSkip,
}

impl TryFrom<u32> for ObjectVariableType {
    type Error = EngineError;

    fn try_from(word: u32) -> EngineResult<Self> {
        match word {
            0 => Ok(ObjectVariableType::Simple),
            1 => Ok(ObjectVariableType::Condition),
            2 => Ok(ObjectVariableType::Box),
            3 => Ok(ObjectVariableType::ConditionalSkip),
            _ => Err(EngineError::invalid_program(format!(
                "Unknown object variable type {}",
                word
            ))),
        }
    }
}

/// Describes one storage slot that may hold an object reference.
///
/// Used for instance variables, closure captures and, wrapped in a
/// [`FunctionRecord`], for frame slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectVariableRecord {
    /// Slot index, or the skip count for [`ObjectVariableType::ConditionalSkip`]
    pub variable_index: u32,
    /// Slot whose truthiness guards this record
    pub condition: u32,
    /// How to interpret the slot
    pub kind: ObjectVariableType,
}

impl ObjectVariableRecord {
    /// A record for a slot that always holds an object handle.
    pub fn simple(variable_index: u32) -> Self {
        Self {
            variable_index,
            condition: 0,
            kind: ObjectVariableType::Simple,
        }
    }

    /// A record for a box starting at `variable_index`.
    pub fn boxed(variable_index: u32) -> Self {
        Self {
            variable_index,
            condition: 0,
            kind: ObjectVariableType::Box,
        }
    }

    /// A record for a slot guarded by `condition`.
    pub fn conditional(variable_index: u32, condition: u32) -> Self {
        Self {
            variable_index,
            condition,
            kind: ObjectVariableType::Condition,
        }
    }

    /// A record skipping the next `count` records unless `condition` is set.
    pub fn skip_unless(condition: u32, count: u32) -> Self {
        Self {
            variable_index: count,
            condition,
            kind: ObjectVariableType::ConditionalSkip,
        }
    }

    /// Decodes the two-word form used in closure instructions: the low 16
    /// bits of `packed` are the slot, the high 16 bits the condition.
    ///
    /// # Examples
    ///
    /// ```
    /// use bytecode_system::{ObjectVariableRecord, ObjectVariableType};
    ///
    /// let record = ObjectVariableRecord::decode(3 | (1 << 16), 1).unwrap();
    /// assert_eq!(record.variable_index, 3);
    /// assert_eq!(record.condition, 1);
    /// assert_eq!(record.kind, ObjectVariableType::Condition);
    /// ```
    pub fn decode(packed: u32, kind: u32) -> EngineResult<Self> {
        Ok(Self {
            variable_index: packed & 0xFFFF,
            condition: packed >> 16,
            kind: ObjectVariableType::try_from(kind)?,
        })
    }

    /// The inverse of [`ObjectVariableRecord::decode`].
    pub fn encode(&self) -> (u32, u32) {
        let kind = match self.kind {
            ObjectVariableType::Simple => 0,
            ObjectVariableType::Condition => 1,
            ObjectVariableType::Box => 2,
            ObjectVariableType::ConditionalSkip => 3,
        };
        ((self.variable_index & 0xFFFF) | (self.condition << 16), kind)
    }
}

/// An object variable record valid while the execution offset lies in
/// `from..=to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionRecord {
    /// The slot description
    pub record: ObjectVariableRecord,
    /// First instruction offset at which the record applies
    pub from: u32,
    /// Last instruction offset at which the record applies
    pub to: u32,
}

impl FunctionRecord {
    /// True if the record applies at instruction offset `delta`.
    pub fn applies_at(&self, delta: usize) -> bool {
        self.from as usize <= delta && delta <= self.to as usize
    }
}

/// Index into the native linking table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeId(pub u16);

/// Where a function's behaviour comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionBody {
    /// A block in the program's shared instruction array
    Bytecode {
        /// First word of the block
        start: usize,
        /// Number of words in the block
        len: usize,
    },
    /// A host handler resolved through the native registry
    Native(NativeId),
}

/// A callable unit: a method, initializer, type method, closure body or
/// free function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Number of argument words the caller produces
    pub argument_count: usize,
    /// Number of local variable words, arguments included
    pub frame_size: usize,
    /// Frame slots holding references, scoped by instruction offset
    pub records: Vec<FunctionRecord>,
    /// What the frame's context value holds
    pub context: ContextType,
    /// The body
    pub body: FunctionBody,
}

impl Function {
    /// A bytecode function with no records and no context.
    pub fn bytecode(start: usize, len: usize, frame_size: usize) -> Self {
        Self {
            argument_count: 0,
            frame_size,
            records: Vec::new(),
            context: ContextType::None,
            body: FunctionBody::Bytecode { start, len },
        }
    }

    /// A native function taking `argument_count` words.
    pub fn native(native: NativeId, argument_count: usize, context: ContextType) -> Self {
        Self {
            argument_count,
            frame_size: argument_count,
            records: Vec::new(),
            context,
            body: FunctionBody::Native(native),
        }
    }

    /// Sets the number of argument words.
    pub fn with_arguments(mut self, argument_count: usize) -> Self {
        self.argument_count = argument_count;
        self
    }

    /// Sets the context type.
    pub fn with_context(mut self, context: ContextType) -> Self {
        self.context = context;
        self
    }

    /// Appends a frame record valid in `from..=to`.
    pub fn with_record(mut self, record: ObjectVariableRecord, from: u32, to: u32) -> Self {
        self.records.push(FunctionRecord { record, from, to });
        self
    }

    /// The bytecode block, or `None` for native functions.
    pub fn block(&self) -> Option<(usize, usize)> {
        match self.body {
            FunctionBody::Bytecode { start, len } => Some((start, len)),
            FunctionBody::Native(_) => None,
        }
    }
}
