//! Bytecode evaluator and runtime of the engine
//!
//! This crate runs loaded programs:
//! - [`Runtime`] owns the program tables, the heap and the thread registry
//! - [`Thread`] evaluates instructions on its own stack of frames
//! - Precise root scanning of frames, retain lists and closures
//! - Native functions linked through a [`NativeRegistry`]
//!
//! # Example
//!
//! ```
//! use bytecode_system::{Assembler, BytecodeLoader, Opcode, ProgramBuilder};
//! use interpreter::{EngineConfig, Runtime};
//!
//! let mut main = Assembler::new();
//! main.op(Opcode::Return)
//!     .word(1)
//!     .op(Opcode::AddInteger)
//!     .op(Opcode::Integer32)
//!     .int32(40)
//!     .op(Opcode::Integer32)
//!     .int32(2);
//!
//! let mut builder = ProgramBuilder::new();
//! let main = builder.add_bytecode_function(main, 0);
//! builder.set_main(main);
//!
//! let config = EngineConfig::default()
//!     .with_heap_size(1 << 20)
//!     .with_stack_words(1024);
//! let runtime = Runtime::new(builder.load().unwrap(), config).unwrap();
//! assert_eq!(runtime.execute_main().unwrap().as_integer(), 42);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod call_frame;
pub mod closure;
pub mod config;
pub mod dispatch;
pub mod natives;
pub mod registry;
mod roots;
pub mod runtime;
pub mod thread;

pub use call_frame::CallFrame;
pub use closure::Closure;
pub use config::EngineConfig;
pub use natives::{install_library, NativeHandler, NativeRegistry, FIRST_USER_NATIVE};
pub use registry::ThreadRegistry;
pub use runtime::Runtime;
pub use thread::{SpawnResult, SpawnedThread, Thread, ThreadState};
