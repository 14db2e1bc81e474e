//! Instruction stream construction and literal encodings.
//!
//! The assembler appends words and patches block lengths. It does not check
//! operand grammar; the interpreter reports malformed streams when it runs
//! them.

use core_types::Value;

use crate::opcode::Opcode;

/// Builds the words of one function block.
///
/// # Examples
///
/// ```
/// use bytecode_system::{Assembler, Opcode};
///
/// let mut asm = Assembler::new();
/// asm.op(Opcode::RepeatWhile)
///     .op(Opcode::False)
///     .block(|body| {
///         body.op(Opcode::IncrementVariable).word(0);
///     });
///
/// let words = asm.finish();
/// // opcode, condition, block length, two body words
/// assert_eq!(words.len(), 5);
/// assert_eq!(words[2], 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assembler {
    words: Vec<u32>,
}

impl Assembler {
    /// Creates an empty stream.
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Appends an opcode.
    pub fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.words.push(opcode.into());
        self
    }

    /// Appends a raw immediate word.
    pub fn word(&mut self, word: u32) -> &mut Self {
        self.words.push(word);
        self
    }

    /// Appends the immediate of an `Integer32` literal.
    ///
    /// `i32::MIN` has no such encoding; use [`Assembler::int64`] for it.
    pub fn int32(&mut self, value: i32) -> &mut Self {
        debug_assert!(value != i32::MIN);
        self.word((i64::from(value) + i64::from(i32::MAX)) as u32)
    }

    /// Appends the two immediates of an `Integer64` literal.
    pub fn int64(&mut self, value: i64) -> &mut Self {
        let bits = value as u64;
        self.word((bits >> 32) as u32).word(bits as u32)
    }

    /// Appends the three immediates of a `Double` literal.
    pub fn double(&mut self, value: f64) -> &mut Self {
        let (mantissa, exponent) = frexp(value);
        let scale = (mantissa * i64::MAX as f64) as i64;
        let bits = scale as u64;
        self.word((bits >> 32) as u32)
            .word(bits as u32)
            .word(exponent as u32)
    }

    /// Appends the immediate of a `Symbol` literal.
    pub fn symbol(&mut self, value: char) -> &mut Self {
        self.word(value as u32)
    }

    /// Opens a block and returns the position of its length word.
    pub fn begin_block(&mut self) -> usize {
        self.words.push(0);
        self.words.len() - 1
    }

    /// Closes the block opened at `position`.
    pub fn end_block(&mut self, position: usize) -> &mut Self {
        let len = self.words.len() - position - 1;
        if let Some(word) = self.words.get_mut(position) {
            *word = len as u32;
        }
        self
    }

    /// Appends a block whose body is written by `body`.
    pub fn block(&mut self, body: impl FnOnce(&mut Assembler)) -> &mut Self {
        let position = self.begin_block();
        body(self);
        self.end_block(position)
    }

    /// Offset of the next word. Used to compute record scopes.
    pub fn position(&self) -> usize {
        self.words.len()
    }

    /// The finished stream.
    pub fn finish(self) -> Vec<u32> {
        self.words
    }
}

/// Splits `value` into a mantissa in `[0.5, 1)` (sign preserved) and a
/// power of two.
pub fn frexp(value: f64) -> (f64, i32) {
    if value == 0.0 || !value.is_finite() {
        return (value, 0);
    }
    let bits = value.to_bits();
    let exponent = ((bits >> 52) & 0x7FF) as i32;
    if exponent == 0 {
        // Subnormal: normalize first.
        let (mantissa, e) = frexp(value * f64::from_bits(0x4350_0000_0000_0000));
        return (mantissa, e - 54);
    }
    let mantissa = f64::from_bits((bits & !(0x7FF << 52)) | (1022 << 52));
    (mantissa, exponent - 1022)
}

/// Computes `value * 2^exponent`.
pub fn ldexp(value: f64, exponent: i32) -> f64 {
    let mut result = value;
    let mut remaining = exponent;
    while remaining > 1023 {
        result *= 2f64.powi(1023);
        remaining -= 1023;
    }
    while remaining < -1022 {
        result *= 2f64.powi(-1022);
        remaining += 1022;
    }
    result * 2f64.powi(remaining)
}

/// Decodes the immediates of a `Double` literal.
pub fn decode_double(hi: u32, lo: u32, exponent: u32) -> Value {
    let scale = ((u64::from(hi) << 32) ^ u64::from(lo)) as i64;
    Value::from_double(ldexp(scale as f64 / i64::MAX as f64, exponent as i32))
}

/// Decodes the immediates of an `Integer64` literal.
pub fn decode_int64(hi: u32, lo: u32) -> Value {
    Value::from_raw((u64::from(hi) << 32) | u64::from(lo))
}

/// Decodes the immediate of an `Integer32` literal.
pub fn decode_int32(word: u32) -> Value {
    Value::from_integer(i64::from(word) - i64::from(i32::MAX))
}
