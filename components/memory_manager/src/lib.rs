//! Memory Manager - managed heap and copying garbage collector
//!
//! This component provides:
//! - A two-space heap with bump allocation and resize-in-place
//! - A stop-the-world copying collector (Cheney scan with forwarding)
//! - The pause barrier mutator threads cooperate through
//! - The seams the runtime plugs into: [`GcContext`] for roots and object
//!   tracing, [`Mutator`] for allocating threads, [`Trace`] for library
//!   layouts
//!
//! The heap stores 64-bit words in atomics, so objects can be shared
//! between threads without `unsafe`. Ordering between a collection and the
//! threads it paused comes from the barrier's mutex.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod barrier;
pub mod config;
pub mod gc;
pub mod heap;
pub mod mutator;
pub mod object;

pub use barrier::{CollectionGuard, PauseBarrier};
pub use config::{HeapConfig, DEFAULT_HEAP_SIZE};
pub use gc::{GcContext, GcStats, Trace, Tracer};
pub use heap::Heap;
pub use mutator::{Mutator, Retained};
