//! Bytecode tables and instruction set of the engine
//!
//! This crate describes what a loaded program looks like to the engine:
//! the opcode space, function and class descriptors, protocol dispatch
//! tables and the shared instruction array. Reading a program from a file
//! is left to implementors of [`BytecodeLoader`]; [`ProgramBuilder`] builds
//! one in memory.
//!
//! # Example
//!
//! ```
//! use bytecode_system::{Assembler, BytecodeLoader, Opcode, ProgramBuilder};
//!
//! let mut body = Assembler::new();
//! body.op(Opcode::Return)
//!     .word(1)
//!     .op(Opcode::AddInteger)
//!     .op(Opcode::Integer32)
//!     .int32(40)
//!     .op(Opcode::Integer32)
//!     .int32(2);
//!
//! let mut builder = ProgramBuilder::new();
//! let main = builder.add_bytecode_function(body, 0);
//! builder.set_main(main);
//! let program = builder.load().unwrap();
//!
//! assert_eq!(program.instruction(0).unwrap(), Opcode::Return as u32);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod assembler;
pub mod class;
pub mod function;
pub mod opcode;
pub mod program;

pub use assembler::{decode_double, decode_int32, decode_int64, frexp, ldexp, Assembler};
pub use class::{Class, Marker, ProtocolTable};
pub use function::{
    ContextType, Function, FunctionBody, FunctionRecord, NativeId, ObjectVariableRecord,
    ObjectVariableType,
};
pub use opcode::Opcode;
pub use program::{BytecodeLoader, Program, ProgramBuilder};
