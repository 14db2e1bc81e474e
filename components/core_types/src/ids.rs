//! Indices into the program's class and function tables.

use std::fmt;

/// Index of a class in the program's class table.
///
/// Indices 0 to 6 are reserved for the well-known library classes the
/// engine itself allocates.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    /// The string class.
    pub const STRING: ClassId = ClassId(0);
    /// The list class.
    pub const LIST: ClassId = ClassId(1);
    /// The error class.
    pub const ERROR: ClassId = ClassId(2);
    /// The data class.
    pub const DATA: ClassId = ClassId(3);
    /// The dictionary class.
    pub const DICTIONARY: ClassId = ClassId(4);
    /// The captured-call class.
    pub const CAPTURED_CALL: ClassId = ClassId(5);
    /// The closure class.
    pub const CLOSURE: ClassId = ClassId(6);
    /// Number of well-known classes every program must define.
    pub const WELL_KNOWN_COUNT: usize = 7;

    /// Marker stored in the header of raw byte arrays. Never a table index.
    pub const ARRAY: ClassId = ClassId(u32::MAX);

    /// Table index as `usize`.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == ClassId::ARRAY {
            write!(f, "ClassId(array)")
        } else {
            write!(f, "ClassId({})", self.0)
        }
    }
}

/// Index of a function in the program's function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FunctionId(pub u32);

impl FunctionId {
    /// Table index as `usize`.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
