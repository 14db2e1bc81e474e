//! Library types living in the managed heap
//!
//! This crate provides the layouts and operations of the well-known library
//! classes:
//! - [`List`] - growable array of boxes
//! - [`Dictionary`] - chained hash map from strings to boxes
//! - [`Data`] - byte buffer slice sharing its backing array
//! - [`StringObject`] - codepoint array
//!
//! Every type implements [`memory_manager::Trace`] so the collector can
//! follow its internal references. Operations that allocate take a
//! [`memory_manager::Mutator`] and keep their own handles pinned across the
//! allocation; operations that only read or write take the [`Heap`].
//!
//! # Example
//!
//! ```no_run
//! use builtins::{boxed, List};
//! use memory_manager::Mutator;
//!
//! fn fill<M: Mutator>(mutator: &mut M) -> core_types::EngineResult<i64> {
//!     let list = List::new(mutator)?;
//!     let pin = mutator.retain(list)?;
//!     for i in 0..10 {
//!         let list = mutator.retained(pin);
//!         List::append(mutator, list, boxed::integer(i))?;
//!     }
//!     let list = mutator.retained(pin);
//!     mutator.release(1)?;
//!     Ok(boxed::payload(&List::get(mutator.heap(), list, -1)).as_integer())
//! }
//! ```
//!
//! [`Heap`]: memory_manager::Heap

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod boxed;
pub mod data;
pub mod dictionary;
pub mod list;
pub mod string;

pub use boxed::{BoxValue, PinnedBox};
pub use data::Data;
pub use dictionary::Dictionary;
pub use list::List;
pub use string::StringObject;
