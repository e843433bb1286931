//! Signature keys and the deprecated call matcher.

use std::fmt;

use crate::patcher::{
    config::LibraryTarget,
    module::MethodReference,
    types::{write_list, TypeSig},
};

/// Identifies a method by declaring type, name and parameter types.
///
/// The return type is not part of the key, so a deprecated `void` method and its replacement
/// returning a wrapper share one key. Equality is structural: see [`TypeSig`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureKey {
    /// Declaring type
    pub declaring_type: TypeSig,
    /// Method name
    pub name: String,
    /// Parameter types in order
    pub parameters: Vec<TypeSig>,
}

impl SignatureKey {
    /// Creates a key.
    #[must_use]
    pub fn new(declaring_type: TypeSig, name: &str, parameters: Vec<TypeSig>) -> Self {
        SignatureKey {
            declaring_type,
            name: name.to_string(),
            parameters,
        }
    }
}

impl fmt::Display for SignatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}(", self.declaring_type, self.name)?;
        write_list(f, &self.parameters)?;
        write!(f, ")")
    }
}

/// Decides whether a called method is one of the deprecated operations.
#[derive(Debug, Clone)]
pub struct DeprecatedApi {
    namespace_prefix: String,
    operations: Vec<(String, String)>,
}

impl DeprecatedApi {
    /// The deprecated surface of `library`.
    #[must_use]
    pub fn new(library: &LibraryTarget) -> Self {
        DeprecatedApi {
            namespace_prefix: library.deprecated_namespace.clone(),
            operations: library.deprecated_operations.clone(),
        }
    }

    /// Whether `method` is a deprecated operation: declared below the deprecated namespace,
    /// returning `void`, and named like one of the deprecated operations. Any overload matches.
    #[must_use]
    pub fn is_deprecated_call(&self, method: &MethodReference) -> bool {
        let declaring_type = method.declaring_type.full_name();
        if !declaring_type.starts_with(&self.namespace_prefix) {
            return false;
        }

        if !method.return_type.is_void() {
            return false;
        }

        self.operations
            .iter()
            .any(|(type_name, name)| *type_name == declaring_type && *name == method.name)
    }
}
