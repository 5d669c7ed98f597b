//! Decoded CIL instructions.

use crate::metadata::token::Token;

/// Immediate operand values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit
    Int8(i8),
    /// Unsigned 8-bit
    UInt8(u8),
    /// Unsigned 16-bit
    UInt16(u16),
    /// Signed 32-bit
    Int32(i32),
    /// Signed 64-bit
    Int64(i64),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    Float64(f64),
}

/// The operand of an instruction.
///
/// Branch displacements are resolved to absolute IL offsets during decoding, so two
/// instructions with the same target compare equal regardless of encoding length.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Immediate value
    Immediate(Immediate),
    /// Metadata token
    Token(Token),
    /// Absolute branch target
    Target(u32),
    /// Absolute switch targets
    Switch(Vec<u32>),
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset of the first byte (prefix included) within the method body
    pub offset: u32,
    /// Encoded size in bytes
    pub size: u32,
    /// `0xFE` for two byte opcodes, 0 otherwise
    pub prefix: u8,
    /// The opcode byte
    pub opcode: u8,
    /// Textual mnemonic
    pub mnemonic: &'static str,
    /// The operand
    pub operand: Operand,
}

impl Instruction {
    /// Returns the token operand, if any.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self.operand {
            Operand::Token(token) => Some(token),
            _ => None,
        }
    }

    /// Offset of the byte following this instruction.
    #[must_use]
    pub fn next_offset(&self) -> u32 {
        self.offset + self.size
    }

    /// Offset of the operand bytes within the method body.
    #[must_use]
    pub fn operand_offset(&self) -> u32 {
        self.offset + if self.prefix == 0 { 1 } else { 2 }
    }
}
