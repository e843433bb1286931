//! Editable CIL instructions.
//!
//! Branch targets are instruction indices rather than byte offsets, so instructions can be
//! inserted into a stream without recomputing displacements by hand.

use std::fmt;

use crate::{
    assembly::{CilInstruction, FlowType, OperandType, INSTRUCTIONS, INSTRUCTIONS_FE},
    metadata::token::Token,
};

#[allow(non_snake_case, missing_docs)]
/// Opcodes the rewriting code refers to by name
pub mod opcodes {
    pub const NOP: u8 = 0x00;
    pub const POP: u8 = 0x26;
    pub const CALL: u8 = 0x28;
    pub const RET: u8 = 0x2A;
    pub const BR_S: u8 = 0x2B;
    pub const BLT_UN_S: u8 = 0x37;
    pub const BR: u8 = 0x38;
    pub const SWITCH: u8 = 0x45;
    pub const CALLVIRT: u8 = 0x6F;
    pub const LEAVE: u8 = 0xDD;
    pub const LEAVE_S: u8 = 0xDE;
    pub const PREFIX_FE: u8 = 0xFE;
    // following the 0xFE prefix
    pub const TAIL: u8 = 0x14;
}

/// An immediate inline operand.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub enum Immediate {
    Int8(i8),
    UInt8(u8),
    UInt16(u16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
}

/// The operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Inline constant or index
    Immediate(Immediate),
    /// Metadata token
    Token(Token),
    /// Branch target, as an index into the instruction list
    Target(usize),
    /// Jump table targets, as indices into the instruction list
    Switch(Vec<usize>),
}

/// One CIL instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// `0xFE` for two byte opcodes, 0 otherwise
    pub prefix: u8,
    /// The opcode, or the second byte of a two byte opcode
    pub opcode: u8,
    /// The inline operand
    pub operand: Operand,
}

impl Instruction {
    /// A single byte instruction without operand, e.g. `pop`.
    #[must_use]
    pub fn new(opcode: u8) -> Self {
        Instruction {
            prefix: 0,
            opcode,
            operand: Operand::None,
        }
    }

    /// A single byte instruction with a token operand, e.g. `call`.
    #[must_use]
    pub fn with_token(opcode: u8, token: Token) -> Self {
        Instruction {
            prefix: 0,
            opcode,
            operand: Operand::Token(token),
        }
    }

    /// A single byte branch to the instruction at `target`.
    #[must_use]
    pub fn branch(opcode: u8, target: usize) -> Self {
        Instruction {
            prefix: 0,
            opcode,
            operand: Operand::Target(target),
        }
    }

    /// The opcode table entry of this instruction.
    #[must_use]
    pub fn info(&self) -> &'static CilInstruction {
        let table: &'static [CilInstruction] = if self.prefix == opcodes::PREFIX_FE {
            &INSTRUCTIONS_FE
        } else {
            &INSTRUCTIONS
        };

        // decoded and constructed instructions always index a valid entry
        table.get(self.opcode as usize).unwrap_or(&INSTRUCTIONS[0x24])
    }

    /// The mnemonic, e.g. `callvirt`.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.info().instr
    }

    /// How this instruction affects control flow.
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        self.info().flow
    }

    /// Whether this is the single byte opcode `opcode`.
    #[must_use]
    pub fn is(&self, opcode: u8) -> bool {
        self.prefix == 0 && self.opcode == opcode
    }

    /// Whether this is `call` or `callvirt`.
    #[must_use]
    pub fn is_call(&self) -> bool {
        self.is(opcodes::CALL) || self.is(opcodes::CALLVIRT)
    }

    /// Whether this is the `tail.` prefix.
    #[must_use]
    pub fn is_tail_prefix(&self) -> bool {
        self.prefix == opcodes::PREFIX_FE && self.opcode == opcodes::TAIL
    }

    /// The token operand, if any.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self.operand {
            Operand::Token(token) => Some(token),
            _ => None,
        }
    }

    /// Whether this is a branch with a one byte displacement.
    #[must_use]
    pub fn is_short_branch(&self) -> bool {
        self.prefix == 0
            && ((opcodes::BR_S..=opcodes::BLT_UN_S).contains(&self.opcode)
                || self.opcode == opcodes::LEAVE_S)
    }

    /// Rewrites a short branch into its four byte displacement form.
    pub fn promote_branch(&mut self) {
        if !self.is_short_branch() {
            return;
        }

        self.opcode = if self.opcode == opcodes::LEAVE_S {
            opcodes::LEAVE
        } else {
            self.opcode + (opcodes::BR - opcodes::BR_S)
        };
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        let opcode_size = if self.prefix == opcodes::PREFIX_FE { 2 } else { 1 };

        let operand_size = match self.info().op_type {
            OperandType::None => 0,
            OperandType::Int8 | OperandType::UInt8 => 1,
            OperandType::UInt16 => 2,
            OperandType::Int32 | OperandType::Float32 | OperandType::Token => 4,
            OperandType::Int64 | OperandType::Float64 => 8,
            OperandType::Switch => match &self.operand {
                Operand::Switch(targets) => 4 + 4 * targets.len(),
                _ => 4,
            },
        };

        opcode_size + operand_size
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operand {
            Operand::None => write!(f, "{}", self.mnemonic()),
            Operand::Immediate(value) => write!(f, "{} {:?}", self.mnemonic(), value),
            Operand::Token(token) => write!(f, "{} {}", self.mnemonic(), token),
            Operand::Target(target) => write!(f, "{} IL_{:04}", self.mnemonic(), target),
            Operand::Switch(targets) => write!(f, "{} ({} targets)", self.mnemonic(), targets.len()),
        }
    }
}
