//! CIL instruction stream decoding.
//!
//! Raw code bytes are turned into a list of [`Instruction`]s whose branch operands point at
//! other instructions by index. [`decode_instruction`] works on a single instruction and leaves
//! branch targets as absolute byte offsets; [`decode_stream`] decodes a whole method and maps
//! every such offset onto the instruction starting there.
//!
//! # Examples
//!
//! ```rust
//! use repolib_patcher::assembly::{decode_stream, Operand};
//!
//! // br.s +0; ret
//! let stream = decode_stream(&[0x2B, 0x00, 0x2A])?;
//! assert_eq!(stream.instructions.len(), 2);
//! assert_eq!(stream.instructions[0].operand, Operand::Target(1));
//! # Ok::<(), repolib_patcher::Error>(())
//! ```

use crate::{
    assembly::{
        instruction::{Immediate, Instruction, Operand},
        FlowType, OperandType, INSTRUCTIONS, INSTRUCTIONS_FE,
    },
    file::parser::Parser,
    metadata::token::Token,
    Result,
};

/// A decoded instruction stream together with the byte offset of every instruction.
#[derive(Debug, Clone)]
pub struct DecodedStream {
    /// The instructions, branch targets already mapped to indices
    pub instructions: Vec<Instruction>,
    /// Byte offset of each instruction, followed by the total code size
    pub offsets: Vec<usize>,
}

impl DecodedStream {
    /// Maps a byte offset onto the index of the instruction starting there.
    ///
    /// The code size itself maps onto `instructions.len()`, which exception handler regions use
    /// to express an end at the very end of the method.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `offset` is not an instruction boundary.
    pub fn index_of(&self, offset: usize) -> Result<usize> {
        self.offsets
            .binary_search(&offset)
            .map_err(|_| malformed_error!("Offset {:#x} is not an instruction boundary", offset))
    }
}

/// Decodes every instruction in `code`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for reserved opcodes, truncated operands and branches
/// that land outside the method or in the middle of an instruction.
pub fn decode_stream(code: &[u8]) -> Result<DecodedStream> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();
    let mut offsets = Vec::new();

    while parser.has_more_data() {
        offsets.push(parser.pos());
        instructions.push(decode_instruction(&mut parser)?);
    }
    offsets.push(code.len());

    let mut stream = DecodedStream {
        instructions,
        offsets,
    };

    for index in 0..stream.instructions.len() {
        let operand = match &stream.instructions[index].operand {
            Operand::Target(offset) => Operand::Target(stream.branch_index(*offset)?),
            Operand::Switch(offsets) => Operand::Switch(
                offsets
                    .iter()
                    .map(|offset| stream.branch_index(*offset))
                    .collect::<Result<Vec<_>>>()?,
            ),
            _ => continue,
        };
        stream.instructions[index].operand = operand;
    }

    Ok(stream)
}

impl DecodedStream {
    fn branch_index(&self, offset: usize) -> Result<usize> {
        let index = self.index_of(offset)?;
        if index == self.instructions.len() {
            return Err(malformed_error!("Branch to {:#x} leaves the method", offset));
        }
        Ok(index)
    }
}

/// Decodes a single CIL instruction from the current parser position.
///
/// Branch and switch operands are returned as absolute byte offsets from the start of the
/// code, computed relative to the end of the instruction as ECMA-335 III.1.7 describes.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for reserved opcodes, backward branches before the start
/// of the code, and [`crate::Error::OutOfBounds`] for truncated operands.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let first_byte = parser.read_le::<u8>()?;

    let (cil_instruction, prefix, opcode) = match first_byte {
        0xFE => {
            let second_byte = parser.read_le::<u8>()?;

            match INSTRUCTIONS_FE.get(second_byte as usize) {
                Some(instr) => (instr, 0xFE, second_byte),
                None => return Err(malformed_error!("Invalid opcode: FE {:02X}", second_byte)),
            }
        }
        _ => match INSTRUCTIONS.get(first_byte as usize) {
            Some(instr) => (instr, 0, first_byte),
            None => return Err(malformed_error!("Invalid opcode: {:X}", first_byte)),
        },
    };

    if cil_instruction.instr.is_empty() {
        return Err(malformed_error!("Reserved opcode: {:02X} {:02X}", prefix, opcode));
    }

    let is_branch = matches!(
        cil_instruction.flow,
        FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
    );

    let operand = match cil_instruction.op_type {
        OperandType::None => Operand::None,
        OperandType::Int8 if is_branch => {
            let displacement = i64::from(parser.read_le::<i8>()?);
            Operand::Target(branch_target(parser.pos(), displacement)?)
        }
        OperandType::Int32 if is_branch => {
            let displacement = i64::from(parser.read_le::<i32>()?);
            Operand::Target(branch_target(parser.pos(), displacement)?)
        }
        OperandType::Int8 => Operand::Immediate(Immediate::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => Operand::Immediate(Immediate::UInt8(parser.read_le::<u8>()?)),
        OperandType::UInt16 => Operand::Immediate(Immediate::UInt16(parser.read_le::<u16>()?)),
        OperandType::Int32 => Operand::Immediate(Immediate::Int32(parser.read_le::<i32>()?)),
        OperandType::Int64 => Operand::Immediate(Immediate::Int64(parser.read_le::<i64>()?)),
        OperandType::Float32 => Operand::Immediate(Immediate::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => Operand::Immediate(Immediate::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            if case_count > parser.remaining() / 4 {
                return Err(malformed_error!("Switch with {} cases is truncated", case_count));
            }

            let mut displacements = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                displacements.push(i64::from(parser.read_le::<i32>()?));
            }

            // relative to the end of the whole jump table
            let base = parser.pos();
            Operand::Switch(
                displacements
                    .into_iter()
                    .map(|displacement| branch_target(base, displacement))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
    };

    Ok(Instruction {
        prefix,
        opcode,
        operand,
    })
}

fn branch_target(next: usize, displacement: i64) -> Result<usize> {
    let target = next as i64 + displacement;
    usize::try_from(target)
        .map_err(|_| malformed_error!("Branch target {} before start of method", target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::instruction::opcodes;

    #[test]
    fn call_then_ret() {
        let code = [0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A];
        let stream = decode_stream(&code).unwrap();

        assert_eq!(stream.instructions.len(), 2);
        assert_eq!(stream.offsets, vec![0, 5, 6]);
        assert!(stream.instructions[0].is(opcodes::CALL));
        assert_eq!(stream.instructions[0].token(), Some(Token::new(0x0A00_0001)));
        assert!(stream.instructions[1].is(opcodes::RET));
    }

    #[test]
    fn backward_branch() {
        // IL_0: nop; IL_1: br.s IL_0
        let code = [0x00, 0x2B, 0xFD];
        let stream = decode_stream(&code).unwrap();
        assert_eq!(stream.instructions[1].operand, Operand::Target(0));
    }

    #[test]
    fn long_branch_and_two_byte_opcodes() {
        // br +1; tail.; ret; ret
        let code = [0x38, 0x02, 0x00, 0x00, 0x00, 0xFE, 0x14, 0x2A, 0x2A];
        let stream = decode_stream(&code).unwrap();

        assert_eq!(stream.instructions.len(), 4);
        assert_eq!(stream.instructions[0].operand, Operand::Target(2));
        assert!(stream.instructions[1].is_tail_prefix());
    }

    #[test]
    fn switch_targets() {
        // switch (IL_a, IL_b); IL_a: nop; IL_b: ret
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
            0x2A,
        ];
        let stream = decode_stream(&code).unwrap();
        assert_eq!(stream.instructions[0].operand, Operand::Switch(vec![1, 2]));
    }

    #[test]
    fn immediates() {
        // ldc.i4.s -1; ldc.i8 5; ldarg.s 3
        let code = [
            0x1F, 0xFF, 0x21, 0x05, 0, 0, 0, 0, 0, 0, 0, 0x0E, 0x03,
        ];
        let stream = decode_stream(&code).unwrap();
        assert_eq!(
            stream.instructions[0].operand,
            Operand::Immediate(Immediate::Int8(-1))
        );
        assert_eq!(
            stream.instructions[1].operand,
            Operand::Immediate(Immediate::Int64(5))
        );
        assert_eq!(
            stream.instructions[2].operand,
            Operand::Immediate(Immediate::UInt8(3))
        );
    }

    #[test]
    fn invalid_streams() {
        // branch into the middle of the call
        assert!(decode_stream(&[0x28, 0x01, 0x00, 0x00, 0x0A, 0x2B, 0xFC]).is_err());
        // branch past the end
        assert!(decode_stream(&[0x2B, 0x05]).is_err());
        // branch before the start
        assert!(decode_stream(&[0x2B, 0x80]).is_err());
        // reserved opcode
        assert!(decode_stream(&[0x24]).is_err());
        // truncated token
        assert!(decode_stream(&[0x28, 0x01]).is_err());
    }
}
