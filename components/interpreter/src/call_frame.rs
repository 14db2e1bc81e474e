//! Stack frame layout.
//!
//! A frame occupies `FRAME_HEADER_WORDS + frame_size` consecutive words of
//! its thread's stack:
//!
//! | Word | Content |
//! |------|---------|
//! | `PARENT` | link to the previous frame (its base + 1), 0 for none |
//! | `CURSOR` | absolute index of the next instruction word |
//! | `FUNCTION` | id of the function the frame belongs to |
//! | `THIS` | the context value |
//! | `FRAME_HEADER_WORDS..` | variables, arguments first |

use std::sync::atomic::{AtomicU64, Ordering};

use bytecode_system::Function;
use core_types::{FunctionId, Value};

/// Word holding the parent link.
pub const PARENT: usize = 0;
/// Word holding the execution cursor.
pub const CURSOR: usize = 1;
/// Word holding the function id.
pub const FUNCTION: usize = 2;
/// Word holding the context value.
pub const THIS: usize = 3;
/// Words before the first variable.
pub const FRAME_HEADER_WORDS: usize = 4;

/// Cursor of a frame that is leaving its function. Compares greater than
/// every block end, so enclosing blocks stop running.
pub const NO_CURSOR: u64 = u64::MAX;

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    /// First word of the frame
    pub base: usize,
    /// Base of the previous frame
    pub parent: Option<usize>,
    /// Execution cursor
    pub cursor: u64,
    /// Function executing in the frame
    pub function: FunctionId,
    /// Context value
    pub this: Value,
}

impl CallFrame {
    /// Reads the header of the frame starting at `base`.
    pub fn read(stack: &[AtomicU64], base: usize) -> Option<Self> {
        let header = stack.get(base..base.checked_add(FRAME_HEADER_WORDS)?)?;
        let link = header[PARENT].load(Ordering::Relaxed) as usize;
        Some(Self {
            base,
            parent: link.checked_sub(1),
            cursor: header[CURSOR].load(Ordering::Relaxed),
            function: FunctionId(header[FUNCTION].load(Ordering::Relaxed) as u32),
            this: Value::from_raw(header[THIS].load(Ordering::Relaxed)),
        })
    }

    /// True once the function executed a return.
    pub fn is_leaving(&self) -> bool {
        self.cursor == NO_CURSOR
    }

    /// Offset of the cursor within the function's block. Native frames and
    /// leaving frames are at offset 0.
    pub fn offset(&self, function: &Function) -> usize {
        match function.block() {
            Some((start, _)) if !self.is_leaving() => {
                (self.cursor as usize).saturating_sub(start)
            }
            _ => 0,
        }
    }

    /// Index of variable `index` in the stack.
    pub fn variable(&self, index: usize) -> usize {
        self.base + FRAME_HEADER_WORDS + index
    }
}

/// Iterates the frames linked from `top`, innermost first.
pub fn frames(stack: &[AtomicU64], top: usize) -> impl Iterator<Item = CallFrame> + '_ {
    let mut link = top;
    std::iter::from_fn(move || {
        let base = link.checked_sub(1)?;
        let frame = CallFrame::read(stack, base)?;
        link = frame.parent.map_or(0, |parent| parent + 1);
        Some(frame)
    })
}
