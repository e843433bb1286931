//! The module interface call-site rewriting is written against.
//!
//! [`ModuleView`] answers the questions the scanner and the resolver ask of a binary,
//! [`ModuleEditor`] adds what the rewriter needs to change it, and [`ModuleProvider`] opens
//! modules from disk. [`crate::CilAssembly`] implements all of them for real PE images; tests
//! use an in-memory implementation.

use std::{fmt, path::Path};

use crate::{
    assembly::CilBody,
    metadata::{signatures::CALLING_CONVENTION, token::Token},
    patcher::{
        signature::SignatureKey,
        types::{write_list, TypeSig},
    },
    Result,
};

/// A method, referenced by name and signature rather than by token.
///
/// Produced from a `MethodDef` or `MemberRef` row of one module; [`ModuleEditor::import_method`]
/// turns it into a token valid in another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodReference {
    /// The type declaring the method
    pub declaring_type: TypeSig,
    /// Method name
    pub name: String,
    /// Whether the method is an instance method
    pub has_this: bool,
    /// Whether `this` is passed explicitly
    pub explicit_this: bool,
    /// Low four bits of the calling convention byte
    pub calling_convention: u8,
    /// Number of generic parameters of the method
    pub generic_param_count: u32,
    /// Return type
    pub return_type: TypeSig,
    /// Parameter types in order
    pub parameters: Vec<TypeSig>,
}

impl MethodReference {
    /// The signature key: declaring type, name and parameters, without the return type.
    #[must_use]
    pub fn key(&self) -> SignatureKey {
        SignatureKey {
            declaring_type: self.declaring_type.clone(),
            name: self.name.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// The calling convention byte of a `MethodRefSig` for this method.
    #[must_use]
    pub fn calling_convention_byte(&self) -> u8 {
        let mut value = self.calling_convention & CALLING_CONVENTION::MASK;
        if self.has_this {
            value |= CALLING_CONVENTION::HASTHIS;
        }
        if self.explicit_this {
            value |= CALLING_CONVENTION::EXPLICITTHIS;
        }
        if self.generic_param_count > 0 {
            value |= CALLING_CONVENTION::GENERIC;
        }
        value
    }
}

impl fmt::Display for MethodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}::{}(",
            self.return_type, self.declaring_type, self.name
        )?;
        write_list(f, &self.parameters)?;
        write!(f, ")")
    }
}

/// A method defined in a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDefinition {
    /// `MethodDef` token
    pub token: Token,
    /// Method name
    pub name: String,
    /// Whether the method has an IL body to rewrite
    pub has_body: bool,
}

/// A type defined in a module, with its methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    /// `TypeDef` token
    pub token: Token,
    /// Full name, nested types as `Outer/Inner`
    pub full_name: String,
    /// Methods in declaration order
    pub methods: Vec<MethodDefinition>,
}

/// Read access to a loaded module.
pub trait ModuleView {
    /// Name of the assembly manifest, if the module has one.
    fn assembly_name(&self) -> Option<&str>;

    /// Name of the module, usually the file name.
    fn module_name(&self) -> &str;

    /// Whether an `AssemblyRef` with the given name exists.
    fn references_assembly(&self, name: &str) -> bool;

    /// Every type defined in the module, nested types included.
    ///
    /// # Errors
    /// Returns an error if the type or method tables are malformed.
    fn types(&self) -> Result<Vec<TypeDefinition>>;

    /// Resolves a `MethodDef` or `MemberRef` token into a name-based reference.
    ///
    /// Returns `Ok(None)` for tokens that do not reference a plain method, such as a
    /// `MethodSpec` generic instantiation or a `MemberRef` to a field.
    ///
    /// # Errors
    /// Returns an error if the token or the rows it leads to are malformed.
    fn resolve_method(&self, token: Token) -> Result<Option<MethodReference>>;
}

/// Write access to a loaded module.
pub trait ModuleEditor: ModuleView {
    /// The decoded body of a method, `None` if it has no IL body.
    ///
    /// # Errors
    /// Returns an error if the body can not be located or decoded.
    fn method_body(&self, method: Token) -> Result<Option<CilBody>>;

    /// Replaces the body of a method.
    ///
    /// # Errors
    /// Returns an error if `method` is not a method of this module or the module is
    /// read-only.
    fn set_method_body(&mut self, method: Token, body: CilBody) -> Result<()>;

    /// Makes `method` referable from this module and returns the token to call it with.
    ///
    /// Importing the same method twice returns the same token.
    ///
    /// # Errors
    /// Returns an error if the module is read-only or the reference can not be represented.
    fn import_method(&mut self, method: &MethodReference) -> Result<Token>;

    /// Whether any body was replaced or reference imported since the module was opened.
    fn is_modified(&self) -> bool;

    /// Writes the module back to the file it was opened from.
    ///
    /// # Errors
    /// Returns an error if the module is read-only or the file can not be written.
    fn save(&mut self) -> Result<()>;
}

/// Opens modules from disk.
pub trait ModuleProvider {
    /// The module type handed out.
    type Module: ModuleEditor;

    /// Whether a module file exists at `path`.
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Opens `path` for inspection only.
    ///
    /// # Errors
    /// Returns an error if the file can not be read or is not a .NET module.
    fn open_read(&self, path: &Path) -> Result<Self::Module>;

    /// Opens `path` with the intent to modify and save it.
    ///
    /// # Errors
    /// Returns an error if the file can not be read or is not a .NET module.
    fn open_write(&self, path: &Path) -> Result<Self::Module>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signatures::ELEMENT_TYPE;

    #[test]
    fn key_and_display() {
        let reference = MethodReference {
            declaring_type: TypeSig::class("REPOLib.Modules", "Items"),
            name: "RegisterItem".to_string(),
            has_this: false,
            explicit_this: false,
            calling_convention: 0,
            generic_param_count: 0,
            return_type: TypeSig::void(),
            parameters: vec![
                TypeSig::class("", "ItemAttributes"),
                TypeSig::primitive(ELEMENT_TYPE::I4).unwrap(),
            ],
        };

        assert_eq!(
            reference.to_string(),
            "System.Void REPOLib.Modules.Items::RegisterItem(ItemAttributes,System.Int32)"
        );
        assert_eq!(
            reference.key().to_string(),
            "REPOLib.Modules.Items::RegisterItem(ItemAttributes,System.Int32)"
        );
        assert_eq!(reference.calling_convention_byte(), 0);
    }

    #[test]
    fn calling_convention_flags() {
        let reference = MethodReference {
            declaring_type: TypeSig::class("N", "T"),
            name: "M".to_string(),
            has_this: true,
            explicit_this: false,
            calling_convention: 0,
            generic_param_count: 1,
            return_type: TypeSig::void(),
            parameters: Vec::new(),
        };
        assert_eq!(reference.calling_convention_byte(), 0x30);
    }
}
