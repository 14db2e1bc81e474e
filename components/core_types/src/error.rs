//! Fatal engine errors.
//!
//! Every error in this module is unrecoverable for the program being run:
//! it means either a corrupted program image or an exhausted resource.
//! Errors travel as `Result` values up to the outermost entry point, which
//! hands them to [`fatal`] to print the diagnostic and terminate.

use crate::backtrace::TraceFrame;

/// The kind of fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An instruction word does not decode to an opcode
    IllegalInstruction,
    /// A frame would not fit into the thread's stack
    StackOverflow,
    /// A single allocation can never fit into a semi-space
    AllocationTooLarge,
    /// A full collection did not free enough memory
    OutOfMemory,
    /// A size computation overflowed
    SizeOverflow,
    /// An optional holding nothingness was unwrapped
    UnwrapNothingness,
    /// An error union holding an error was unwrapped
    UnwrapError,
    /// Integer division or remainder by zero
    DivisionByZero,
    /// More objects were retained than the retain list can hold
    RetainListOverflow,
    /// More objects were released than were retained
    RetainListUnderflow,
    /// The program tables are inconsistent with the instruction stream
    InvalidProgram,
    /// A native function has no handler in the linking table
    UnlinkedNative,
    /// The host refused to start an interpreter thread
    ThreadSpawn,
}

/// A fatal error with its diagnostic and the interpreter frames active
/// when it was raised.
///
/// # Examples
///
/// ```
/// use core_types::{EngineError, ErrorKind};
///
/// let error = EngineError::allocation_too_large(4096, 1024);
/// assert_eq!(error.kind, ErrorKind::AllocationTooLarge);
/// assert_eq!(
///     error.to_string(),
///     "Allocation of 4096 bytes is too big. Try to enlarge the heap. (Heap size: 1024)"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    /// The kind of error
    pub kind: ErrorKind,
    /// Human-readable diagnostic
    pub message: String,
    /// Innermost frame first
    pub backtrace: Vec<TraceFrame>,
}

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Creates an error without a backtrace.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backtrace: Vec::new(),
        }
    }

    /// Attaches a backtrace unless one is already present.
    pub fn with_backtrace(mut self, backtrace: Vec<TraceFrame>) -> Self {
        if self.backtrace.is_empty() {
            self.backtrace = backtrace;
        }
        self
    }

    /// The instruction stream contains a word that is not an opcode.
    pub fn illegal_instruction(word: u32) -> Self {
        Self::new(
            ErrorKind::IllegalInstruction,
            format!("Illegal bytecode instruction {:#x}", word),
        )
    }

    /// A frame reservation crossed the stack limit.
    pub fn stack_overflow() -> Self {
        Self::new(
            ErrorKind::StackOverflow,
            "Your program triggered a stack overflow!",
        )
    }

    /// A request larger than a semi-space.
    pub fn allocation_too_large(requested: usize, heap_size: usize) -> Self {
        Self::new(
            ErrorKind::AllocationTooLarge,
            format!(
                "Allocation of {} bytes is too big. Try to enlarge the heap. (Heap size: {})",
                requested, heap_size
            ),
        )
    }

    /// The heap is still too full after a collection.
    pub fn out_of_memory() -> Self {
        Self::new(
            ErrorKind::OutOfMemory,
            "Terminating program due to too high memory pressure.",
        )
    }

    /// `items * item_size` overflowed.
    pub fn size_overflow() -> Self {
        Self::new(
            ErrorKind::SizeOverflow,
            "Integer overflow while allocating memory. It’s not possible to allocate objects of this \
             size due to hardware limitations.",
        )
    }

    /// An optional held nothingness where a value was required.
    pub fn unwrap_nothingness() -> Self {
        Self::new(
            ErrorKind::UnwrapNothingness,
            "Unexpectedly found ✨ while unwrapping a 🍬.",
        )
    }

    /// An error union held an error where a value was required.
    pub fn unwrap_error(code: i64) -> Self {
        Self::new(
            ErrorKind::UnwrapError,
            format!("Unexpectedly found 🚨 with value {}.", code),
        )
    }

    /// Integer division or remainder by zero.
    pub fn division_by_zero() -> Self {
        Self::new(ErrorKind::DivisionByZero, "Integer division by zero.")
    }

    /// The program tables do not match the instruction stream.
    pub fn invalid_program(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidProgram, message)
    }
}

/// Prints the diagnostic of a fatal error and terminates the process.
///
/// This is the only place where the engine exits. Library code returns
/// [`EngineError`] and leaves the decision to the entry point.
pub fn fatal(error: &EngineError) -> ! {
    tracing::error!(kind = ?error.kind, "{}", error.message);
    eprintln!("🚨 Fatal Error: {}", error.message);
    for frame in &error.backtrace {
        eprintln!("    in {}", frame);
    }
    std::process::exit(1)
}
