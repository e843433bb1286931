//! CIL instruction stream encoding.
//!
//! The inverse of [`crate::assembly::decode_stream`]. Branch targets are instruction indices,
//! so displacements are computed from the final layout. A short branch whose displacement no
//! longer fits in one byte is promoted to its long form; since promotion grows the code, the
//! layout is recomputed until no more promotions are needed.

use crate::{
    assembly::{
        instruction::{Immediate, Instruction, Operand},
        OperandType,
    },
    Result,
};

/// Encodes `instructions`, promoting short branches in place where required.
///
/// Returns the code bytes and the byte offset of each instruction followed by the total code
/// size, so index-based exception regions can be turned back into byte ranges.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a branch targets an index past the end of the stream
/// or an operand does not match the operand kind of its opcode.
pub fn encode_stream(instructions: &mut [Instruction]) -> Result<(Vec<u8>, Vec<usize>)> {
    let offsets = loop {
        let offsets = layout(instructions);

        let mut promoted = false;
        for (index, instruction) in instructions.iter_mut().enumerate() {
            if !instruction.is_short_branch() {
                continue;
            }

            let displacement = displacement(&offsets, index, instruction)?;
            if i8::try_from(displacement).is_err() {
                instruction.promote_branch();
                promoted = true;
            }
        }

        if !promoted {
            break offsets;
        }
    };

    let mut code = Vec::with_capacity(offsets.last().copied().unwrap_or(0));
    for (index, instruction) in instructions.iter().enumerate() {
        encode_instruction(instruction, index, &offsets, &mut code)?;
    }

    Ok((code, offsets))
}

fn layout(instructions: &[Instruction]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(instructions.len() + 1);
    let mut offset = 0;
    for instruction in instructions {
        offsets.push(offset);
        offset += instruction.size();
    }
    offsets.push(offset);
    offsets
}

fn target_offset(offsets: &[usize], target: usize) -> Result<i64> {
    // the final entry is the code size, which is not a valid branch target
    match offsets.get(target) {
        Some(offset) if target + 1 < offsets.len() => Ok(*offset as i64),
        _ => Err(malformed_error!("Branch target {} is out of range", target)),
    }
}

fn displacement(offsets: &[usize], index: usize, instruction: &Instruction) -> Result<i64> {
    let Operand::Target(target) = instruction.operand else {
        return Err(malformed_error!(
            "{} at {} has no branch target",
            instruction.mnemonic(),
            index
        ));
    };

    let next = (offsets[index] + instruction.size()) as i64;
    Ok(target_offset(offsets, target)? - next)
}

fn encode_instruction(
    instruction: &Instruction,
    index: usize,
    offsets: &[usize],
    code: &mut Vec<u8>,
) -> Result<()> {
    if instruction.prefix != 0 {
        code.push(instruction.prefix);
    }
    code.push(instruction.opcode);

    let op_type = instruction.info().op_type;
    match (op_type, &instruction.operand) {
        (OperandType::None, Operand::None) => {}
        (OperandType::Int8, Operand::Target(_)) => {
            let displacement = i8::try_from(displacement(offsets, index, instruction)?)
                .map_err(|_| malformed_error!("Short branch at {} out of range", index))?;
            code.extend_from_slice(&displacement.to_le_bytes());
        }
        (OperandType::Int32, Operand::Target(_)) => {
            let displacement = i32::try_from(displacement(offsets, index, instruction)?)
                .map_err(|_| malformed_error!("Branch at {} out of range", index))?;
            code.extend_from_slice(&displacement.to_le_bytes());
        }
        (OperandType::Switch, Operand::Switch(targets)) => {
            let count = u32::try_from(targets.len())
                .map_err(|_| malformed_error!("Switch at {} has too many targets", index))?;
            code.extend_from_slice(&count.to_le_bytes());

            let next = (offsets[index] + instruction.size()) as i64;
            for target in targets {
                let displacement = i32::try_from(target_offset(offsets, *target)? - next)
                    .map_err(|_| malformed_error!("Switch at {} out of range", index))?;
                code.extend_from_slice(&displacement.to_le_bytes());
            }
        }
        (OperandType::Token, Operand::Token(token)) => {
            code.extend_from_slice(&token.value().to_le_bytes());
        }
        (_, Operand::Immediate(value)) => encode_immediate(op_type, *value, index, code)?,
        _ => {
            return Err(malformed_error!(
                "Operand {:?} does not fit {} at {}",
                instruction.operand,
                instruction.mnemonic(),
                index
            ))
        }
    }

    Ok(())
}

fn encode_immediate(
    op_type: OperandType,
    value: Immediate,
    index: usize,
    code: &mut Vec<u8>,
) -> Result<()> {
    match (op_type, value) {
        (OperandType::Int8, Immediate::Int8(v)) => code.extend_from_slice(&v.to_le_bytes()),
        (OperandType::UInt8, Immediate::UInt8(v)) => code.push(v),
        (OperandType::UInt16, Immediate::UInt16(v)) => code.extend_from_slice(&v.to_le_bytes()),
        (OperandType::Int32, Immediate::Int32(v)) => code.extend_from_slice(&v.to_le_bytes()),
        (OperandType::Int64, Immediate::Int64(v)) => code.extend_from_slice(&v.to_le_bytes()),
        (OperandType::Float32, Immediate::Float32(v)) => code.extend_from_slice(&v.to_le_bytes()),
        (OperandType::Float64, Immediate::Float64(v)) => code.extend_from_slice(&v.to_le_bytes()),
        _ => {
            return Err(malformed_error!(
                "Immediate {:?} does not fit operand kind {:?} at {}",
                value,
                op_type,
                index
            ))
        }
    }

    Ok(())
}
