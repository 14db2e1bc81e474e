//! Class descriptors and protocol dispatch tables.

use core_types::{ClassId, EngineError, EngineResult, FunctionId};

use crate::function::ObjectVariableRecord;

/// Library layouts whose internal references are traced by a dedicated
/// marker instead of flat instance variable records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// Growable array of boxes
    List,
    /// Chained hash map from strings to boxes
    Dictionary,
    /// Byte buffer slice
    Data,
    /// Codepoint array
    String,
    /// Function with captured variables and an optional receiver
    Closure,
}

/// Sparse two-dimensional table mapping a protocol index and a method index
/// to a function.
///
/// Protocol indices below `offset` or beyond the table never conform.
///
/// # Examples
///
/// ```
/// use bytecode_system::ProtocolTable;
/// use core_types::FunctionId;
///
/// let mut table = ProtocolTable::new(10);
/// table.add_conformance(12, vec![FunctionId(4), FunctionId(5)]);
///
/// assert!(table.conforms_to(12));
/// assert!(!table.conforms_to(11));
/// assert!(!table.conforms_to(3));
/// assert_eq!(table.dispatch(12, 1).unwrap(), FunctionId(5));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolTable {
    offset: u32,
    entries: Vec<Option<Vec<FunctionId>>>,
}

impl ProtocolTable {
    /// Creates an empty table whose first protocol index is `offset`.
    pub fn new(offset: u32) -> Self {
        Self {
            offset,
            entries: Vec::new(),
        }
    }

    /// Registers the method list of protocol `protocol`.
    pub fn add_conformance(&mut self, protocol: u32, methods: Vec<FunctionId>) {
        if protocol < self.offset {
            return;
        }
        let slot = (protocol - self.offset) as usize;
        if self.entries.len() <= slot {
            self.entries.resize(slot + 1, None);
        }
        self.entries[slot] = Some(methods);
    }

    /// True if the table holds methods for `protocol`.
    pub fn conforms_to(&self, protocol: u32) -> bool {
        self.methods(protocol).is_some()
    }

    /// Looks up method `method` of protocol `protocol`.
    pub fn dispatch(&self, protocol: u32, method: u32) -> EngineResult<FunctionId> {
        self.methods(protocol)
            .and_then(|methods| methods.get(method as usize))
            .copied()
            .ok_or_else(|| {
                EngineError::invalid_program(format!(
                    "No method {} for protocol {}",
                    method, protocol
                ))
            })
    }

    fn methods(&self, protocol: u32) -> Option<&Vec<FunctionId>> {
        let slot = protocol.checked_sub(self.offset)? as usize;
        self.entries.get(slot)?.as_ref()
    }
}

/// Layout and dispatch information of a class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Class {
    /// Superclass, `None` for a root class
    pub superclass: Option<ClassId>,
    /// Instance and type methods by virtual table index
    pub methods: Vec<FunctionId>,
    /// Initializers by virtual table index
    pub initializers: Vec<FunctionId>,
    /// Protocol conformances
    pub protocols: ProtocolTable,
    /// Instance variable slots holding references
    pub instance_records: Vec<ObjectVariableRecord>,
    /// Number of value words in an instance
    pub value_size: usize,
    /// Dedicated tracing for library layouts
    pub marker: Option<Marker>,
}

impl Class {
    /// A root class with `value_size` instance variable words.
    pub fn new(value_size: usize) -> Self {
        Self {
            value_size,
            ..Self::default()
        }
    }

    /// A library class traced by `marker`. Its size is filled in by the
    /// runtime from the library layout.
    pub fn library(marker: Marker) -> Self {
        Self {
            marker: Some(marker),
            ..Self::default()
        }
    }

    /// Sets the superclass.
    pub fn with_superclass(mut self, superclass: ClassId) -> Self {
        self.superclass = Some(superclass);
        self
    }

    /// Appends a method and returns its virtual table index.
    pub fn add_method(&mut self, function: FunctionId) -> u32 {
        self.methods.push(function);
        (self.methods.len() - 1) as u32
    }

    /// Appends an initializer and returns its virtual table index.
    pub fn add_initializer(&mut self, function: FunctionId) -> u32 {
        self.initializers.push(function);
        (self.initializers.len() - 1) as u32
    }

    /// Looks up a method by virtual table index.
    pub fn method(&self, vti: u32) -> EngineResult<FunctionId> {
        self.methods.get(vti as usize).copied().ok_or_else(|| {
            EngineError::invalid_program(format!("No method at virtual table index {}", vti))
        })
    }

    /// Looks up an initializer by virtual table index.
    pub fn initializer(&self, vti: u32) -> EngineResult<FunctionId> {
        self.initializers.get(vti as usize).copied().ok_or_else(|| {
            EngineError::invalid_program(format!(
                "No initializer at virtual table index {}",
                vti
            ))
        })
    }
}
