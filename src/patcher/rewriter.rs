//! Call-site rewriting inside one method body.

use std::collections::HashMap;

use crate::{
    assembly::{opcodes, CilBody, Instruction, Operand},
    metadata::{tables::TableId, token::Token},
    patcher::{
        logging::LogSink,
        module::{ModuleEditor, ModuleProvider},
        replacements::ReplacementTable,
        resolver::ReferenceResolver,
        signature::{DeprecatedApi, SignatureKey},
    },
    Result,
};

/// Rewrites deprecated calls in the methods of one module.
///
/// A rewriter is created per module: the imported replacement tokens it remembers are only
/// valid in that module.
pub struct MethodRewriter<'r, 'a, P: ModuleProvider> {
    api: &'r DeprecatedApi,
    table: &'r ReplacementTable,
    resolver: &'r mut ReferenceResolver<'a, P>,
    log: &'r dyn LogSink,
    module_name: String,
    imported: HashMap<SignatureKey, (Token, String)>,
}

impl<'r, 'a, P: ModuleProvider> MethodRewriter<'r, 'a, P> {
    /// A rewriter for the module named `module_name`.
    pub fn new(
        api: &'r DeprecatedApi,
        table: &'r ReplacementTable,
        resolver: &'r mut ReferenceResolver<'a, P>,
        log: &'r dyn LogSink,
        module_name: &str,
    ) -> Self {
        MethodRewriter {
            api,
            table,
            resolver,
            log,
            module_name: module_name.to_string(),
            imported: HashMap::new(),
        }
    }

    /// Retargets every deprecated call in `body` that has a resolvable replacement and returns
    /// the number of calls retargeted.
    ///
    /// A `pop` is inserted after each retargeted call unless one already follows, and
    /// `max_stack` grows by one for the value the new call leaves behind.
    ///
    /// # Errors
    /// Returns an error if a call operand can not be resolved in `module`. Failing to find or
    /// import a replacement is logged and the call left as it is.
    pub fn rewrite<M: ModuleEditor + ?Sized>(
        &mut self,
        module: &mut M,
        method_name: &str,
        body: &mut CilBody,
    ) -> Result<usize> {
        let mut substitutions = 0;
        let mut index = 0;

        while index < body.instructions.len() {
            let instruction = &body.instructions[index];
            let token = match instruction.operand {
                Operand::Token(token) if instruction.is_call() => token,
                _ => {
                    index += 1;
                    continue;
                }
            };

            // generic method instantiations never target the deprecated API
            if !matches!(token.table_id(), Some(TableId::MethodDef | TableId::MemberRef)) {
                index += 1;
                continue;
            }

            let Some(called) = module.resolve_method(token)? else {
                index += 1;
                continue;
            };

            if !self.api.is_deprecated_call(&called) {
                index += 1;
                continue;
            }

            let key = called.key();
            self.log.info(&format!(
                "[{}] Found old call in {}: {}",
                self.module_name, method_name, called
            ));

            let Some(replacement) = self.table.lookup(&key) else {
                self.log.warning(&format!(
                    "[{}] No replacement known for {}; call left unchanged",
                    self.module_name, key
                ));
                index += 1;
                continue;
            };

            let Some((new_token, target)) = self.replacement_token(module, replacement) else {
                index += 1;
                continue;
            };
            self.log.info(&format!("Would replace with: {target}"));

            body.instructions[index].operand = Operand::Token(new_token);
            if index > 0 && body.instructions[index - 1].is_tail_prefix() {
                body.instructions[index - 1] = Instruction::new(opcodes::NOP);
            }

            if substitutions == 0 {
                body.max_stack = body.max_stack.saturating_add(1);
            }
            substitutions += 1;

            let followed_by_pop = body
                .instructions
                .get(index + 1)
                .is_some_and(|next| next.is(opcodes::POP));
            if !followed_by_pop {
                body.insert_after(index, Instruction::new(opcodes::POP));
                index += 1;
            }
            index += 1;
        }

        Ok(substitutions)
    }

    fn replacement_token<M: ModuleEditor + ?Sized>(
        &mut self,
        module: &mut M,
        replacement: &SignatureKey,
    ) -> Option<(Token, String)> {
        if let Some(imported) = self.imported.get(replacement) {
            return Some(imported.clone());
        }

        let method = self.resolver.resolve(replacement)?;
        match module.import_method(&method) {
            Ok(token) => {
                let imported = (token, method.to_string());
                self.imported.insert(replacement.clone(), imported.clone());
                Some(imported)
            }
            Err(error) => {
                self.log.error(&format!(
                    "[{}] Failed to import {}: {}",
                    self.module_name, method, error
                ));
                None
            }
        }
    }
}
