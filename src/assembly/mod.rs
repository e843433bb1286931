//! CIL instruction handling.
//!
//! The opcode tables, an editable instruction model, and the decoder and encoder that move
//! method bodies between their binary form and an index-based instruction list. Only what
//! call-site rewriting needs is modelled: there is no control flow or stack analysis.
//!
//! # Key Components
//!
//! - [`INSTRUCTIONS`] / [`INSTRUCTIONS_FE`] - opcode tables with mnemonics and operand kinds
//! - [`Instruction`] / [`Operand`] - one editable instruction
//! - [`decode_stream`] / [`encode_stream`] - code bytes to instructions and back
//! - [`CilBody`] - a whole method body with index-based exception regions

mod body;
mod decoder;
mod encoder;
mod instruction;
mod instructions;

pub use body::{CilBody, HandlerKind, HandlerRegion};
pub use decoder::{decode_instruction, decode_stream, DecodedStream};
pub use encoder::encode_stream;
pub use instruction::{opcodes, Immediate, Instruction, Operand};
pub use instructions::{CilInstruction, FlowType, OperandType, INSTRUCTIONS, INSTRUCTIONS_FE};
