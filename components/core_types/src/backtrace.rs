//! Backtrace frames attached to fatal errors.

use crate::ids::FunctionId;

/// One interpreter frame active when a fatal error was raised.
///
/// # Examples
///
/// ```
/// use core_types::{FunctionId, TraceFrame};
///
/// let frame = TraceFrame {
///     function: FunctionId(3),
///     offset: 12,
/// };
///
/// assert_eq!(frame.to_string(), "function #3 at instruction 12");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceFrame {
    /// The function executing in this frame
    pub function: FunctionId,
    /// Instruction offset of the execution cursor within the function's block
    pub offset: usize,
}

impl std::fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "function #{} at instruction {}",
            self.function.0, self.offset
        )
    }
}
