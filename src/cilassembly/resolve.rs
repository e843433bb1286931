//! Token to name resolution.
//!
//! Turns `TypeDef`, `TypeRef` and `TypeSpec` tokens and the signatures that use them into
//! [`TypeSig`] values, and `MethodDef` and `MemberRef` tokens into [`MethodReference`]s.

use crate::{
    cilassembly::CilAssembly,
    metadata::{
        signatures::{
            parse_method_signature, parse_type_spec_signature, SignatureMethod,
            SignatureParameter, TypeSignature, CALLING_CONVENTION, ELEMENT_TYPE,
        },
        tables::{col, CodedIndexType, TableId},
        token::Token,
    },
    patcher::{MethodReference, NamedType, TypeKind, TypeName, TypeScope, TypeSig},
    Error::{RecursionLimit, TokenNotFound},
    Result,
};

/// Nesting limit for enclosing types and type specifications
const MAX_DEPTH: usize = 64;

/// First byte of a `FieldSig`
const FIELD_SIGNATURE: u8 = 0x06;

impl CilAssembly {
    /// The name of the type behind a `TypeDef` or `TypeRef` token.
    ///
    /// # Errors
    /// Returns an error for other tables, missing rows or cyclic nesting.
    pub fn type_name(&self, token: Token) -> Result<TypeName> {
        self.type_name_at(token, 0)
    }

    fn type_name_at(&self, token: Token, depth: usize) -> Result<TypeName> {
        if depth > MAX_DEPTH {
            return Err(RecursionLimit(MAX_DEPTH));
        }

        let tables = &self.metadata.tables;
        match token.table_id() {
            Some(TableId::TypeDef) => {
                let values = tables
                    .row(TableId::TypeDef, token.row())
                    .map_err(|_| TokenNotFound(token))?;
                let name = self.string(values[col::typedef::NAME])?;

                match self.enclosing.get(&token.row()) {
                    Some(enclosing) => {
                        let enclosing = self.type_name_at(
                            Token::from_parts(TableId::TypeDef, *enclosing),
                            depth + 1,
                        )?;
                        Ok(TypeName::nested(enclosing, name))
                    }
                    None => Ok(TypeName::new(
                        self.string(values[col::typedef::NAMESPACE])?,
                        name,
                        self.own_scope(),
                    )),
                }
            }
            Some(TableId::TypeRef) => {
                let values = tables
                    .row(TableId::TypeRef, token.row())
                    .map_err(|_| TokenNotFound(token))?;
                let name = self.string(values[col::typeref::NAME])?;
                let namespace = self.string(values[col::typeref::NAMESPACE])?;

                let scope = CodedIndexType::ResolutionScope
                    .decode(values[col::typeref::RESOLUTION_SCOPE])?;
                if scope.row == 0 {
                    // Resolved through the ExportedType table of this module
                    return Ok(TypeName::new(namespace, name, self.own_scope()));
                }

                match scope.tag {
                    TableId::TypeRef => {
                        let enclosing = self.type_name_at(scope.token, depth + 1)?;
                        Ok(TypeName::nested(enclosing, name))
                    }
                    TableId::AssemblyRef => Ok(TypeName::new(
                        namespace,
                        name,
                        TypeScope::Assembly(self.assembly_ref_identity(scope.row)?),
                    )),
                    TableId::ModuleRef => {
                        let module =
                            tables.value(TableId::ModuleRef, scope.row, col::moduleref::NAME)?;
                        Ok(TypeName::new(
                            namespace,
                            name,
                            TypeScope::ModuleRef(self.string(module)?.to_string()),
                        ))
                    }
                    _ => Ok(TypeName::new(namespace, name, self.own_scope())),
                }
            }
            _ => Err(TokenNotFound(token)),
        }
    }

    /// The type behind a `TypeDef`, `TypeRef` or `TypeSpec` token.
    ///
    /// # Errors
    /// Returns an error if the token does not lead to a well formed type.
    pub fn type_of_token(&self, token: Token, kind: TypeKind) -> Result<TypeSig> {
        self.type_of_token_at(token, kind, 0)
    }

    fn type_of_token_at(&self, token: Token, kind: TypeKind, depth: usize) -> Result<TypeSig> {
        match token.table_id() {
            Some(TableId::TypeSpec) => {
                if depth > MAX_DEPTH {
                    return Err(RecursionLimit(MAX_DEPTH));
                }
                let blob = self.metadata.tables.value(
                    TableId::TypeSpec,
                    token.row(),
                    col::typespec::SIGNATURE,
                )?;
                let signature = parse_type_spec_signature(self.metadata.blobs.get(blob as usize)?)?;
                self.type_sig_at(&signature, depth + 1)
            }
            _ => Ok(TypeSig::Named(NamedType {
                name: self.type_name(token)?,
                kind,
            })),
        }
    }

    /// Replaces every token of a parsed signature type with the name it resolves to.
    ///
    /// Custom modifiers and `pinned` are dropped.
    ///
    /// # Errors
    /// Returns an error if a contained token can not be resolved.
    pub fn type_sig(&self, signature: &TypeSignature) -> Result<TypeSig> {
        self.type_sig_at(signature, 0)
    }

    fn type_sig_at(&self, signature: &TypeSignature, depth: usize) -> Result<TypeSig> {
        if depth > MAX_DEPTH {
            return Err(RecursionLimit(MAX_DEPTH));
        }
        let next = depth + 1;

        if let Some(element_type) = primitive_element_type(signature) {
            if let Some(primitive) = TypeSig::primitive(element_type) {
                return Ok(primitive);
            }
        }

        Ok(match signature {
            TypeSignature::Class(token) => self.type_of_token_at(*token, TypeKind::Class, next)?,
            TypeSignature::ValueType(token) => {
                self.type_of_token_at(*token, TypeKind::ValueType, next)?
            }
            TypeSignature::GenericInst(base, arguments) => TypeSig::GenericInst(
                Box::new(self.type_sig_at(base, next)?),
                arguments
                    .iter()
                    .map(|argument| self.type_sig_at(argument, next))
                    .collect::<Result<_>>()?,
            ),
            TypeSignature::SzArray(array) => {
                TypeSig::SzArray(Box::new(self.type_sig_at(&array.base, next)?))
            }
            TypeSignature::Array(array) => {
                TypeSig::Array(Box::new(self.type_sig_at(&array.base, next)?), array.rank)
            }
            TypeSignature::ByRef(inner) => TypeSig::ByRef(Box::new(self.type_sig_at(inner, next)?)),
            TypeSignature::Ptr(pointer) => {
                TypeSig::Ptr(Box::new(self.type_sig_at(&pointer.base, next)?))
            }
            TypeSignature::GenericParamType(index) => TypeSig::Var(*index),
            TypeSignature::GenericParamMethod(index) => TypeSig::MVar(*index),
            TypeSignature::FnPtr(method) => TypeSig::FnPtr {
                calling_convention: calling_convention_byte(method),
                return_type: Box::new(self.parameter_sig(&method.return_type, next)?),
                parameters: method
                    .params
                    .iter()
                    .map(|parameter| self.parameter_sig(parameter, next))
                    .collect::<Result<_>>()?,
            },
            TypeSignature::Modified(_, inner) | TypeSignature::Pinned(inner) => {
                self.type_sig_at(inner, next)?
            }
            other => {
                return Err(malformed_error!("Unexpected signature type {:?}", other));
            }
        })
    }

    fn parameter_sig(&self, parameter: &SignatureParameter, depth: usize) -> Result<TypeSig> {
        let base = self.type_sig_at(&parameter.base, depth)?;
        Ok(if parameter.by_ref {
            TypeSig::ByRef(Box::new(base))
        } else {
            base
        })
    }

    /// Resolves a `MethodDef` or `MemberRef` token; see
    /// [`crate::patcher::ModuleView::resolve_method`].
    pub(crate) fn method_reference(&self, token: Token) -> Result<Option<MethodReference>> {
        let tables = &self.metadata.tables;
        match token.table_id() {
            Some(TableId::MethodDef) => {
                let values = tables
                    .row(TableId::MethodDef, token.row())
                    .map_err(|_| TokenNotFound(token))?;
                let owner = self.owner_of_method(token.row())?;
                let declaring_type = self.type_of_token(
                    Token::from_parts(TableId::TypeDef, owner),
                    TypeKind::Class,
                )?;
                let signature = parse_method_signature(
                    self.metadata
                        .blobs
                        .get(values[col::methoddef::SIGNATURE] as usize)?,
                )?;

                self.build_reference(
                    declaring_type,
                    self.string(values[col::methoddef::NAME])?,
                    &signature,
                )
                .map(Some)
            }
            Some(TableId::MemberRef) => {
                let values = tables
                    .row(TableId::MemberRef, token.row())
                    .map_err(|_| TokenNotFound(token))?;
                let blob = self
                    .metadata
                    .blobs
                    .get(values[col::memberref::SIGNATURE] as usize)?;
                if blob.first() == Some(&FIELD_SIGNATURE) {
                    return Ok(None);
                }

                let parent =
                    CodedIndexType::MemberRefParent.decode(values[col::memberref::CLASS])?;
                let declaring_type = match parent.tag {
                    TableId::ModuleRef => {
                        let module =
                            tables.value(TableId::ModuleRef, parent.row, col::moduleref::NAME)?;
                        TypeSig::Named(NamedType {
                            name: TypeName::new(
                                "",
                                "<Module>",
                                TypeScope::ModuleRef(self.string(module)?.to_string()),
                            ),
                            kind: TypeKind::Class,
                        })
                    }
                    TableId::MethodDef => {
                        // vararg call site of a method defined in this module
                        let owner = self.owner_of_method(parent.row)?;
                        self.type_of_token(
                            Token::from_parts(TableId::TypeDef, owner),
                            TypeKind::Class,
                        )?
                    }
                    _ => self.type_of_token(parent.token, TypeKind::Class)?,
                };

                let signature = parse_method_signature(blob)?;
                self.build_reference(
                    declaring_type,
                    self.string(values[col::memberref::NAME])?,
                    &signature,
                )
                .map(Some)
            }
            Some(TableId::MethodSpec) => Ok(None),
            _ => Err(TokenNotFound(token)),
        }
    }

    fn build_reference(
        &self,
        declaring_type: TypeSig,
        name: &str,
        signature: &SignatureMethod,
    ) -> Result<MethodReference> {
        Ok(MethodReference {
            declaring_type,
            name: name.to_string(),
            has_this: signature.has_this,
            explicit_this: signature.explicit_this,
            calling_convention: signature.calling_convention,
            generic_param_count: signature.param_count_generic,
            return_type: self.parameter_sig(&signature.return_type, 0)?,
            parameters: signature
                .params
                .iter()
                .map(|parameter| self.parameter_sig(parameter, 0))
                .collect::<Result<_>>()?,
        })
    }
}

/// The element type byte of a primitive signature type.
pub(crate) fn primitive_element_type(signature: &TypeSignature) -> Option<u8> {
    Some(match signature {
        TypeSignature::Void => ELEMENT_TYPE::VOID,
        TypeSignature::Boolean => ELEMENT_TYPE::BOOLEAN,
        TypeSignature::Char => ELEMENT_TYPE::CHAR,
        TypeSignature::I1 => ELEMENT_TYPE::I1,
        TypeSignature::U1 => ELEMENT_TYPE::U1,
        TypeSignature::I2 => ELEMENT_TYPE::I2,
        TypeSignature::U2 => ELEMENT_TYPE::U2,
        TypeSignature::I4 => ELEMENT_TYPE::I4,
        TypeSignature::U4 => ELEMENT_TYPE::U4,
        TypeSignature::I8 => ELEMENT_TYPE::I8,
        TypeSignature::U8 => ELEMENT_TYPE::U8,
        TypeSignature::R4 => ELEMENT_TYPE::R4,
        TypeSignature::R8 => ELEMENT_TYPE::R8,
        TypeSignature::String => ELEMENT_TYPE::STRING,
        TypeSignature::TypedByRef => ELEMENT_TYPE::TYPEDBYREF,
        TypeSignature::I => ELEMENT_TYPE::I,
        TypeSignature::U => ELEMENT_TYPE::U,
        TypeSignature::Object => ELEMENT_TYPE::OBJECT,
        _ => return None,
    })
}

/// The primitive signature type of an element type byte.
pub(crate) fn primitive_signature(element_type: u8) -> Option<TypeSignature> {
    Some(match element_type {
        ELEMENT_TYPE::VOID => TypeSignature::Void,
        ELEMENT_TYPE::BOOLEAN => TypeSignature::Boolean,
        ELEMENT_TYPE::CHAR => TypeSignature::Char,
        ELEMENT_TYPE::I1 => TypeSignature::I1,
        ELEMENT_TYPE::U1 => TypeSignature::U1,
        ELEMENT_TYPE::I2 => TypeSignature::I2,
        ELEMENT_TYPE::U2 => TypeSignature::U2,
        ELEMENT_TYPE::I4 => TypeSignature::I4,
        ELEMENT_TYPE::U4 => TypeSignature::U4,
        ELEMENT_TYPE::I8 => TypeSignature::I8,
        ELEMENT_TYPE::U8 => TypeSignature::U8,
        ELEMENT_TYPE::R4 => TypeSignature::R4,
        ELEMENT_TYPE::R8 => TypeSignature::R8,
        ELEMENT_TYPE::STRING => TypeSignature::String,
        ELEMENT_TYPE::TYPEDBYREF => TypeSignature::TypedByRef,
        ELEMENT_TYPE::I => TypeSignature::I,
        ELEMENT_TYPE::U => TypeSignature::U,
        ELEMENT_TYPE::OBJECT => TypeSignature::Object,
        _ => return None,
    })
}

fn calling_convention_byte(method: &SignatureMethod) -> u8 {
    let mut value = method.calling_convention & CALLING_CONVENTION::MASK;
    if method.has_this {
        value |= CALLING_CONVENTION::HASTHIS;
    }
    if method.explicit_this {
        value |= CALLING_CONVENTION::EXPLICITTHIS;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_mapping_is_symmetric() {
        for element_type in 0..=0x1F_u8 {
            if let Some(signature) = primitive_signature(element_type) {
                assert_eq!(primitive_element_type(&signature), Some(element_type));
                assert!(TypeSig::primitive(element_type).is_some());
            }
        }
        assert_eq!(primitive_signature(ELEMENT_TYPE::CLASS), None);
    }
}
