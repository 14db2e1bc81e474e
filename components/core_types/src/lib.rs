//! Core value types and error handling for the engine.
//!
//! This crate provides the foundational types shared by every other
//! component: the untyped [`Value`] word, handles into the managed heap,
//! table indices for classes and functions, and the fatal error type.
//!
//! # Overview
//!
//! - [`Value`] - One untagged 64-bit word
//! - [`ObjectRef`] - Handle to a heap object, valid between allocation-free points
//! - [`ValueRef`] - Reference to a value slot on a stack or inside an object
//! - [`ClassId`] / [`FunctionId`] - Indices into the program tables
//! - [`EngineError`] - Fatal conditions with a backtrace
//!
//! # Examples
//!
//! ```
//! use core_types::{ErrorKind, EngineError, Value, T_NOTHINGNESS};
//!
//! let answer = Value::from_integer(42);
//! assert_eq!(answer.as_integer(), 42);
//! assert_eq!(Value::NOTHINGNESS.raw(), T_NOTHINGNESS);
//!
//! let error = EngineError::stack_overflow();
//! assert_eq!(error.kind, ErrorKind::StackOverflow);
//! assert_eq!(error.to_string(), "Your program triggered a stack overflow!");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod backtrace;
mod error;
mod ids;
mod value;

pub use backtrace::TraceFrame;
pub use error::{fatal, EngineError, EngineResult, ErrorKind};
pub use ids::{ClassId, FunctionId};
pub use value::{
    ObjectRef, Value, ValueRef, BOX_WORDS, REMOTE_MASK, T_BOOLEAN, T_DOUBLE, T_ERROR, T_INTEGER,
    T_NOTHINGNESS, T_OBJECT, T_OPTIONAL_VALUE, T_SYMBOL, T_VT_REFERENCE,
};
