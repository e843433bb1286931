//! Importing name-based references into the metadata of a module.
//!
//! Every row this module appends is looked up first, so importing a reference the module
//! already has reuses the existing `AssemblyRef`, `TypeRef`, `TypeSpec` or `MemberRef`.

use crate::{
    cilassembly::{resolve::primitive_signature, CilAssembly},
    metadata::{
        signatures::{
            encode_method_signature, encode_typespec_signature, SignatureArray,
            SignatureMethod, SignatureParameter, SignaturePointer, SignatureSzArray,
            TypeSignature, CALLING_CONVENTION,
        },
        tables::{col, CodedIndexType, TableId},
        token::Token,
    },
    patcher::{AssemblyIdentity, MethodReference, TypeKind, TypeName, TypeScope, TypeSig},
    Error::ImportFailed,
    Result,
};

impl CilAssembly {
    /// Finds or appends the `MemberRef` row for `method`.
    pub(crate) fn import_member_ref(&mut self, method: &MethodReference) -> Result<Token> {
        let parent = self.import_parent(&method.declaring_type)?;
        let Some(parent_table) = parent.table_id() else {
            return Err(ImportFailed(method.to_string()));
        };
        let class = CodedIndexType::MemberRefParent.encode(parent_table, parent.row())?;

        let signature = SignatureMethod {
            has_this: method.has_this,
            explicit_this: method.explicit_this,
            calling_convention: method.calling_convention & CALLING_CONVENTION::MASK,
            param_count_generic: method.generic_param_count,
            return_type: SignatureParameter::new(self.import_signature_type(&method.return_type)?),
            params: method
                .parameters
                .iter()
                .map(|parameter| self.import_signature_type(parameter).map(SignatureParameter::new))
                .collect::<Result<_>>()?,
            varargs: Vec::new(),
        };
        let blob = encode_method_signature(&signature)?;

        let name = self.metadata.strings.add(&method.name)?;
        let signature = self.metadata.blobs.add(&blob)?;

        let existing = self
            .metadata
            .tables
            .rows(TableId::MemberRef)
            .find(|(_, values)| {
                values[col::memberref::CLASS] == class
                    && values[col::memberref::NAME] == name
                    && values[col::memberref::SIGNATURE] == signature
            })
            .map(|(row, _)| row);

        let row = match existing {
            Some(row) => row,
            None => self
                .metadata
                .tables
                .push_row(TableId::MemberRef, &[class, name, signature])?,
        };

        log::trace!(
            target: "repolib_patcher",
            "[{}] imported {} as MemberRef {}",
            self.module_name,
            method,
            row
        );
        Ok(Token::from_parts(TableId::MemberRef, row))
    }

    fn import_parent(&mut self, declaring_type: &TypeSig) -> Result<Token> {
        match declaring_type {
            TypeSig::Named(named) => match &named.name.scope {
                TypeScope::ModuleRef(module)
                    if named.name.enclosing.is_none() && named.name.name == "<Module>" =>
                {
                    self.import_module_ref(module)
                }
                _ => self.import_type_name(&named.name),
            },
            other => self.import_type_spec(other),
        }
    }

    /// Token for a `TypeDef` or `TypeRef` of `name` usable from this module.
    ///
    /// Types defined by this module resolve to their `TypeDef`; everything else becomes a
    /// `TypeRef` scoped to an `AssemblyRef`, a `ModuleRef`, or the `TypeRef` of the
    /// enclosing type.
    ///
    /// # Errors
    /// Returns [`crate::Error::ImportFailed`] if the name is scoped to this module but not
    /// defined in it.
    pub fn import_type_name(&mut self, name: &TypeName) -> Result<Token> {
        if let Some(enclosing) = &name.enclosing {
            let enclosing = self.import_type_name(enclosing)?;
            return match enclosing.table_id() {
                Some(TableId::TypeDef) => self.find_nested_type_def(enclosing.row(), &name.name),
                _ => {
                    let scope =
                        CodedIndexType::ResolutionScope.encode(TableId::TypeRef, enclosing.row())?;
                    self.find_or_add_type_ref(scope, "", &name.name)
                }
            };
        }

        let defined_here = match &name.scope {
            TypeScope::CurrentModule => true,
            TypeScope::Assembly(identity) => {
                self.assembly_name.as_deref() == Some(identity.name.as_str())
            }
            TypeScope::ModuleRef(_) => false,
        };
        if defined_here {
            return self.find_type_def(&name.namespace, &name.name);
        }

        let scope = match &name.scope {
            TypeScope::Assembly(identity) => {
                let reference = self.import_assembly_ref(identity)?;
                CodedIndexType::ResolutionScope.encode(TableId::AssemblyRef, reference.row())?
            }
            TypeScope::ModuleRef(module) => {
                let reference = self.import_module_ref(module)?;
                CodedIndexType::ResolutionScope.encode(TableId::ModuleRef, reference.row())?
            }
            TypeScope::CurrentModule => {
                return Err(ImportFailed(name.full_name()));
            }
        };
        self.find_or_add_type_ref(scope, &name.namespace, &name.name)
    }

    /// Finds the `AssemblyRef` with the name of `identity`, appending one if there is none.
    ///
    /// # Errors
    /// Returns an error if the heaps or the table can not take the new row.
    pub fn import_assembly_ref(&mut self, identity: &AssemblyIdentity) -> Result<Token> {
        for (row, values) in self.metadata.tables.rows(TableId::AssemblyRef) {
            if self.string(values[col::assemblyref::NAME])? == identity.name {
                return Ok(Token::from_parts(TableId::AssemblyRef, row));
            }
        }

        let name = self.metadata.strings.add(&identity.name)?;
        let culture = self.metadata.strings.add(&identity.culture)?;
        let token = match identity.public_key_token {
            Some(token) => self.metadata.blobs.add(&token)?,
            None => 0,
        };
        let [major, minor, build, revision] = identity.version.map(u32::from);

        let row = self.metadata.tables.push_row(
            TableId::AssemblyRef,
            &[major, minor, build, revision, 0, token, name, culture, 0],
        )?;
        log::debug!(
            target: "repolib_patcher",
            "[{}] added assembly reference {}",
            self.module_name,
            identity
        );
        Ok(Token::from_parts(TableId::AssemblyRef, row))
    }

    fn import_module_ref(&mut self, module: &str) -> Result<Token> {
        for (row, values) in self.metadata.tables.rows(TableId::ModuleRef) {
            if self.string(values[col::moduleref::NAME])? == module {
                return Ok(Token::from_parts(TableId::ModuleRef, row));
            }
        }

        let name = self.metadata.strings.add(module)?;
        let row = self.metadata.tables.push_row(TableId::ModuleRef, &[name])?;
        Ok(Token::from_parts(TableId::ModuleRef, row))
    }

    fn import_type_spec(&mut self, signature: &TypeSig) -> Result<Token> {
        let encoded = self.import_signature_type(signature)?;
        let blob = encode_typespec_signature(&encoded)?;
        let blob = self.metadata.blobs.add(&blob)?;

        let existing = self
            .metadata
            .tables
            .rows(TableId::TypeSpec)
            .find(|(_, values)| values[col::typespec::SIGNATURE] == blob)
            .map(|(row, _)| row);

        let row = match existing {
            Some(row) => row,
            None => self.metadata.tables.push_row(TableId::TypeSpec, &[blob])?,
        };
        Ok(Token::from_parts(TableId::TypeSpec, row))
    }

    /// Converts a name-based type into a signature type whose tokens are valid in this
    /// module, importing the types it names.
    fn import_signature_type(&mut self, signature: &TypeSig) -> Result<TypeSignature> {
        Ok(match signature {
            TypeSig::Named(named) => match named.kind {
                TypeKind::Primitive(element_type) => match primitive_signature(element_type) {
                    Some(primitive) => primitive,
                    None => return Err(ImportFailed(named.name.full_name())),
                },
                TypeKind::Class => TypeSignature::Class(self.import_type_name(&named.name)?),
                TypeKind::ValueType => {
                    TypeSignature::ValueType(self.import_type_name(&named.name)?)
                }
            },
            TypeSig::GenericInst(base, arguments) => TypeSignature::GenericInst(
                Box::new(self.import_signature_type(base)?),
                arguments
                    .iter()
                    .map(|argument| self.import_signature_type(argument))
                    .collect::<Result<_>>()?,
            ),
            TypeSig::SzArray(element) => TypeSignature::SzArray(SignatureSzArray {
                modifiers: Vec::new(),
                base: Box::new(self.import_signature_type(element)?),
            }),
            TypeSig::Array(element, rank) => TypeSignature::Array(SignatureArray {
                base: Box::new(self.import_signature_type(element)?),
                rank: *rank,
                dimensions: Vec::new(),
            }),
            TypeSig::ByRef(inner) => {
                TypeSignature::ByRef(Box::new(self.import_signature_type(inner)?))
            }
            TypeSig::Ptr(inner) => TypeSignature::Ptr(SignaturePointer {
                modifiers: Vec::new(),
                base: Box::new(self.import_signature_type(inner)?),
            }),
            TypeSig::Var(index) => TypeSignature::GenericParamType(*index),
            TypeSig::MVar(index) => TypeSignature::GenericParamMethod(*index),
            TypeSig::FnPtr {
                calling_convention,
                return_type,
                parameters,
            } => TypeSignature::FnPtr(Box::new(SignatureMethod {
                has_this: calling_convention & CALLING_CONVENTION::HASTHIS != 0,
                explicit_this: calling_convention & CALLING_CONVENTION::EXPLICITTHIS != 0,
                calling_convention: calling_convention & CALLING_CONVENTION::MASK,
                param_count_generic: 0,
                return_type: SignatureParameter::new(self.import_signature_type(return_type)?),
                params: parameters
                    .iter()
                    .map(|parameter| {
                        self.import_signature_type(parameter)
                            .map(SignatureParameter::new)
                    })
                    .collect::<Result<_>>()?,
                varargs: Vec::new(),
            })),
        })
    }

    fn find_type_def(&self, namespace: &str, name: &str) -> Result<Token> {
        for (row, values) in self.metadata.tables.rows(TableId::TypeDef) {
            if self.enclosing.contains_key(&row) {
                continue;
            }
            if self.string(values[col::typedef::NAME])? == name
                && self.string(values[col::typedef::NAMESPACE])? == namespace
            {
                return Ok(Token::from_parts(TableId::TypeDef, row));
            }
        }
        Err(ImportFailed(if namespace.is_empty() {
            name.to_string()
        } else {
            format!("{namespace}.{name}")
        }))
    }

    fn find_nested_type_def(&self, enclosing_row: u32, name: &str) -> Result<Token> {
        for (nested, enclosing) in &self.enclosing {
            if *enclosing != enclosing_row {
                continue;
            }
            let nested_name = self
                .metadata
                .tables
                .value(TableId::TypeDef, *nested, col::typedef::NAME)?;
            if self.string(nested_name)? == name {
                return Ok(Token::from_parts(TableId::TypeDef, *nested));
            }
        }
        Err(ImportFailed(name.to_string()))
    }

    fn find_or_add_type_ref(&mut self, scope: u32, namespace: &str, name: &str) -> Result<Token> {
        for (row, values) in self.metadata.tables.rows(TableId::TypeRef) {
            if values[col::typeref::RESOLUTION_SCOPE] == scope
                && self.string(values[col::typeref::NAME])? == name
                && self.string(values[col::typeref::NAMESPACE])? == namespace
            {
                return Ok(Token::from_parts(TableId::TypeRef, row));
            }
        }

        let name = self.metadata.strings.add(name)?;
        let namespace = self.metadata.strings.add(namespace)?;
        let row = self
            .metadata
            .tables
            .push_row(TableId::TypeRef, &[scope, name, namespace])?;
        Ok(Token::from_parts(TableId::TypeRef, row))
    }
}
