//! CIL instruction decoding.
//!
//! # Usage Examples
//!
//! ```rust
//! use dotpatch::{Parser, assembly::{decode_instruction, decode_stream, Operand}};
//!
//! let code = [0x2A]; // ret
//! let mut parser = Parser::new(&code);
//! let instr = decode_instruction(&mut parser)?;
//! assert_eq!(instr.mnemonic, "ret");
//!
//! let code = [0x2B, 0x00, 0x2A]; // br.s +0, ret
//! let instrs = decode_stream(&code)?;
//! assert_eq!(instrs[0].operand, Operand::Target(2));
//! # Ok::<(), dotpatch::Error>(())
//! ```

use crate::{
    assembly::{
        opcodes::{lookup_fe, lookup_single, OperandType, FE_PREFIX},
        Immediate, Instruction, Operand,
    },
    file::parser::Parser,
    metadata::token::Token,
    Result,
};

fn branch_target(next: usize, displacement: i64) -> Result<u32> {
    let target = next as i64 + displacement;
    u32::try_from(target).map_err(|_| malformed_error!("Branch target out of range - {}", target))
}

/// Decode the instruction at the parser's current position.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for unknown or reserved opcodes and
/// [`crate::Error::OutOfBounds`] if the operand is truncated.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let offset = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let (info, prefix, opcode) = if first_byte == FE_PREFIX {
        let second_byte = parser.read_le::<u8>()?;
        match lookup_fe(second_byte) {
            Some(info) => (info, FE_PREFIX, second_byte),
            None => return Err(malformed_error!("Invalid opcode: FE {:02X}", second_byte)),
        }
    } else {
        match lookup_single(first_byte) {
            Some(info) => (info, 0, first_byte),
            None => return Err(malformed_error!("Invalid opcode: {:02X}", first_byte)),
        }
    };

    let operand = match info.operand {
        OperandType::None => Operand::None,
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
        OperandType::UInt16 => Operand::Immediate(Immediate::UInt16(parser.read_le::<u16>()?)),
        OperandType::Int32 => Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::ShortBranch => {
            let displacement = parser.read_le::<i8>()?;
            Operand::Target(branch_target(parser.pos(), i64::from(displacement))?)
        }
        OperandType::Branch => {
            let displacement = parser.read_le::<i32>()?;
            Operand::Target(branch_target(parser.pos(), i64::from(displacement))?)
        }
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            if case_count.saturating_mul(4) > parser.remaining() {
                return Err(out_of_bounds_error!());
            }

            let mut displacements = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                displacements.push(parser.read_le::<i32>()?);
            }

            // Switch displacements are relative to the end of the whole instruction
            let next = parser.pos();
            let targets = displacements
                .into_iter()
                .map(|displacement| branch_target(next, i64::from(displacement)))
                .collect::<Result<Vec<_>>>()?;
            Operand::Switch(targets)
        }
    };

    Ok(Instruction {
        offset: offset as u32,
        size: (parser.pos() - offset) as u32,
        prefix,
        opcode,
        mnemonic: info.mnemonic,
        operand,
    })
}

/// Decode a complete method body.
///
/// # Errors
/// Fails on the first undecodable instruction.
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();

    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }

    Ok(instructions)
}
