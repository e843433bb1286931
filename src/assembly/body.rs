//! Editable method bodies.
//!
//! [`CilBody`] is the decoded, index-based form of a [`MethodBody`]: branch targets and
//! exception handler boundaries refer to instructions by position. Inserting an instruction
//! shifts every reference at or after the insertion point, so branches and protected regions
//! stay attached to the instructions they pointed at before.

use crate::{
    assembly::{decode_stream, encode_stream, instruction::Instruction, Operand},
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags, MethodBody},
        token::Token,
    },
    Result,
};

/// What kind of handler protects a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Typed catch clause, with the caught type
    Catch(Token),
    /// Filter clause, with the index of the first filter instruction
    Filter(usize),
    /// Finally clause
    Finally,
    /// Fault clause
    Fault,
}

/// An exception handling clause with instruction index boundaries.
///
/// Ends are exclusive; an end equal to the instruction count means the end of the method.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct HandlerRegion {
    pub kind: HandlerKind,
    pub try_start: usize,
    pub try_end: usize,
    pub handler_start: usize,
    pub handler_end: usize,
}

/// A method body with an editable instruction list.
#[derive(Debug, Clone, PartialEq)]
pub struct CilBody {
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Whether locals are zero-initialised
    pub init_locals: bool,
    /// `StandAloneSig` token of the locals, 0 for none
    pub local_var_sig_token: u32,
    /// The instructions in order
    pub instructions: Vec<Instruction>,
    /// Exception handling clauses, in their original order
    pub handlers: Vec<HandlerRegion>,
}

impl CilBody {
    /// Decodes the IL code and exception clauses of `body`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the code can not be decoded or a clause boundary
    /// does not fall on an instruction.
    pub fn decode(body: &MethodBody) -> Result<CilBody> {
        let stream = decode_stream(&body.code)?;

        let mut handlers = Vec::with_capacity(body.exception_handlers.len());
        for handler in &body.exception_handlers {
            let try_start = handler.try_offset as usize;
            let handler_start = handler.handler_offset as usize;

            let kind = if handler.flags.contains(ExceptionHandlerFlags::FILTER) {
                HandlerKind::Filter(stream.index_of(handler.class_token_or_filter as usize)?)
            } else if handler.flags.contains(ExceptionHandlerFlags::FINALLY) {
                HandlerKind::Finally
            } else if handler.flags.contains(ExceptionHandlerFlags::FAULT) {
                HandlerKind::Fault
            } else {
                HandlerKind::Catch(Token::new(handler.class_token_or_filter))
            };

            handlers.push(HandlerRegion {
                kind,
                try_start: stream.index_of(try_start)?,
                try_end: stream.index_of(try_start + handler.try_length as usize)?,
                handler_start: stream.index_of(handler_start)?,
                handler_end: stream.index_of(handler_start + handler.handler_length as usize)?,
            });
        }

        Ok(CilBody {
            max_stack: body.max_stack,
            init_locals: body.init_locals,
            local_var_sig_token: body.local_var_sig_token,
            instructions: stream.instructions,
            handlers,
        })
    }

    /// Re-encodes this body, promoting short branches that no longer reach their target.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a branch or clause boundary is out of range.
    pub fn encode(&self) -> Result<MethodBody> {
        let mut instructions = self.instructions.clone();
        let (code, offsets) = encode_stream(&mut instructions)?;

        let offset = |index: usize| -> Result<u32> {
            offsets
                .get(index)
                .and_then(|offset| u32::try_from(*offset).ok())
                .ok_or_else(|| malformed_error!("Handler boundary {} is out of range", index))
        };

        let mut exception_handlers = Vec::with_capacity(self.handlers.len());
        for region in &self.handlers {
            let (flags, class_token_or_filter) = match region.kind {
                HandlerKind::Catch(token) => (ExceptionHandlerFlags::EXCEPTION, token.value()),
                HandlerKind::Filter(start) => (ExceptionHandlerFlags::FILTER, offset(start)?),
                HandlerKind::Finally => (ExceptionHandlerFlags::FINALLY, 0),
                HandlerKind::Fault => (ExceptionHandlerFlags::FAULT, 0),
            };

            let try_offset = offset(region.try_start)?;
            let handler_offset = offset(region.handler_start)?;
            exception_handlers.push(ExceptionHandler {
                flags,
                try_offset,
                try_length: offset(region.try_end)?.saturating_sub(try_offset),
                handler_offset,
                handler_length: offset(region.handler_end)?.saturating_sub(handler_offset),
                class_token_or_filter,
            });
        }

        Ok(MethodBody {
            max_stack: self.max_stack,
            init_locals: self.init_locals,
            local_var_sig_token: self.local_var_sig_token,
            code,
            exception_handlers,
        })
    }

    /// Inserts `instruction` at `index`, shifting every branch target and region boundary that
    /// refers to `index` or later.
    ///
    /// A region that ended right before `index` grows to include the new instruction, the same
    /// way it would if the instruction had been emitted there by a compiler.
    pub fn insert(&mut self, index: usize, instruction: Instruction) {
        let index = index.min(self.instructions.len());
        let shift = |position: &mut usize| {
            if *position >= index {
                *position += 1;
            }
        };

        for existing in &mut self.instructions {
            match &mut existing.operand {
                Operand::Target(target) => shift(target),
                Operand::Switch(targets) => targets.iter_mut().for_each(shift),
                _ => {}
            }
        }

        for region in &mut self.handlers {
            shift(&mut region.try_start);
            shift(&mut region.try_end);
            shift(&mut region.handler_start);
            shift(&mut region.handler_end);
            if let HandlerKind::Filter(start) = &mut region.kind {
                shift(start);
            }
        }

        self.instructions.insert(index, instruction);
    }

    /// Inserts `instruction` directly after the instruction at `index`.
    ///
    /// Branches to the instruction that used to follow `index` keep targeting it.
    pub fn insert_after(&mut self, index: usize, instruction: Instruction) {
        self.insert(index + 1, instruction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::instruction::opcodes;

    fn body(code: Vec<u8>, handlers: Vec<ExceptionHandler>) -> MethodBody {
        MethodBody {
            max_stack: 2,
            init_locals: true,
            local_var_sig_token: 0x1100_0001,
            code,
            exception_handlers: handlers,
        }
    }

    #[test]
    fn insert_after_call_keeps_branch_on_ret() {
        // IL_0: brtrue.s IL_2; IL_1: call; IL_2: ret
        let method = body(
            vec![0x2D, 0x05, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A],
            Vec::new(),
        );
        let mut cil = CilBody::decode(&method).unwrap();
        assert_eq!(cil.instructions[0].operand, Operand::Target(2));

        cil.insert_after(1, Instruction::new(opcodes::POP));
        assert_eq!(cil.instructions[0].operand, Operand::Target(3));

        let encoded = cil.encode().unwrap();
        assert_eq!(
            encoded.code,
            vec![0x2D, 0x06, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x26, 0x2A]
        );
        assert_eq!(encoded.local_var_sig_token, 0x1100_0001);
        assert!(encoded.init_locals);
    }

    #[test]
    fn protected_region_grows_around_insertion() {
        // try { call; leave.s IL_4 } finally { endfinally } IL_4: ret
        let code = vec![
            0x28, 0x01, 0x00, 0x00, 0x0A, // 0: call
            0xDE, 0x01, // 5: leave.s -> 8
            0xDC, // 7: endfinally
            0x2A, // 8: ret
        ];
        let handler = ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_offset: 0,
            try_length: 7,
            handler_offset: 7,
            handler_length: 1,
            class_token_or_filter: 0,
        };
        let mut cil = CilBody::decode(&body(code, vec![handler])).unwrap();
        assert_eq!(
            cil.handlers[0],
            HandlerRegion {
                kind: HandlerKind::Finally,
                try_start: 0,
                try_end: 2,
                handler_start: 2,
                handler_end: 3,
            }
        );

        cil.insert_after(0, Instruction::new(opcodes::POP));
        let encoded = cil.encode().unwrap();

        assert_eq!(encoded.code[5], 0x26);
        let clause = &encoded.exception_handlers[0];
        assert_eq!(clause.try_offset, 0);
        assert_eq!(clause.try_length, 8);
        assert_eq!(clause.handler_offset, 8);
        assert_eq!(clause.handler_length, 1);
        // leave.s still reaches ret
        assert_eq!(encoded.code[6..8], [0xDE, 0x01]);
    }

    #[test]
    fn catch_and_filter_clauses() {
        // try { nop; leave.s } filter { pop; ldc.i4.1; endfilter } handler { pop; leave.s } ret
        let code = vec![
            0x00, 0xDE, 0x07, // 0..3
            0x26, 0x17, 0xFE, 0x11, // 3..7 filter
            0x26, 0xDE, 0x00, // 7..10 handler
            0x2A, // 10
        ];
        let filter = ExceptionHandler {
            flags: ExceptionHandlerFlags::FILTER,
            try_offset: 0,
            try_length: 3,
            handler_offset: 7,
            handler_length: 3,
            class_token_or_filter: 3,
        };
        let cil = CilBody::decode(&body(code.clone(), vec![filter.clone()])).unwrap();
        assert_eq!(cil.handlers[0].kind, HandlerKind::Filter(2));

        let encoded = cil.encode().unwrap();
        assert_eq!(encoded.code, code);
        assert_eq!(encoded.exception_handlers, vec![filter]);

        let catch = ExceptionHandler {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_offset: 0,
            try_length: 3,
            handler_offset: 3,
            handler_length: 1,
            class_token_or_filter: 0x0100_0005,
        };
        let cil = CilBody::decode(&body(vec![0x00, 0xDE, 0x01, 0x26, 0x2A], vec![catch])).unwrap();
        assert_eq!(
            cil.handlers[0].kind,
            HandlerKind::Catch(Token::new(0x0100_0005))
        );
    }

    #[test]
    fn misaligned_clause() {
        let handler = ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_offset: 1,
            try_length: 1,
            handler_offset: 5,
            handler_length: 1,
            class_token_or_filter: 0,
        };
        let method = body(vec![0x28, 0x01, 0x00, 0x00, 0x0A, 0xDC], vec![handler]);
        assert!(CilBody::decode(&method).is_err());
    }
}
