//! Name-resolved types and method references.
//!
//! Metadata signatures refer to types through module-local tokens, which can not be compared
//! across modules. The types in this module replace every token with the full name of the
//! type it resolves to, and remember where the type lives so it can be referenced again from
//! another module.

use std::{
    fmt,
    hash::{Hash, Hasher},
};

use crate::metadata::signatures::ELEMENT_TYPE;

/// Identity of a referenced or defining assembly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AssemblyIdentity {
    /// Simple name, e.g. `REPOLib`
    pub name: String,
    /// Major, minor, build and revision
    pub version: [u16; 4],
    /// Culture, empty for neutral
    pub culture: String,
    /// Public key token, if the assembly is strong named
    pub public_key_token: Option<[u8; 8]>,
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, build, revision] = self.version;
        write!(
            f,
            "{}, Version={}.{}.{}.{}, Culture={}, PublicKeyToken=",
            self.name,
            major,
            minor,
            build,
            revision,
            if self.culture.is_empty() {
                "neutral"
            } else {
                &self.culture
            }
        )?;
        match self.public_key_token {
            Some(token) => token.iter().try_for_each(|byte| write!(f, "{byte:02x}")),
            None => write!(f, "null"),
        }
    }
}

/// Where a type is defined.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TypeScope {
    /// Defined in the named assembly
    Assembly(AssemblyIdentity),
    /// Defined in another module of the same assembly
    ModuleRef(String),
    /// Defined in the module the name was read from, which has no assembly manifest
    #[default]
    CurrentModule,
}

/// The full name of a type, with the scope it was resolved from.
///
/// Equality and hashing only consider the namespace, the name and the enclosing types: the
/// same type referenced from two modules compares equal even though it was reached through
/// different scopes.
#[derive(Debug, Clone, Default)]
pub struct TypeName {
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name including any generic arity suffix, e.g. ``List`1``
    pub name: String,
    /// Enclosing type of a nested type
    pub enclosing: Option<Box<TypeName>>,
    /// Where the outermost type is defined
    pub scope: TypeScope,
}

impl TypeName {
    /// A top level type in `scope`.
    #[must_use]
    pub fn new(namespace: &str, name: &str, scope: TypeScope) -> Self {
        TypeName {
            namespace: namespace.to_string(),
            name: name.to_string(),
            enclosing: None,
            scope,
        }
    }

    /// A type nested in `enclosing`, inheriting its scope.
    #[must_use]
    pub fn nested(enclosing: TypeName, name: &str) -> Self {
        TypeName {
            namespace: String::new(),
            name: name.to_string(),
            scope: enclosing.scope.clone(),
            enclosing: Some(Box::new(enclosing)),
        }
    }

    /// The full name, e.g. `REPOLib.Modules.Items` or `Outer/Inner`.
    #[must_use]
    pub fn full_name(&self) -> String {
        self.to_string()
    }

    /// Replaces the scope of this name and of every enclosing name.
    pub fn set_scope(&mut self, scope: TypeScope) {
        if let Some(enclosing) = &mut self.enclosing {
            enclosing.set_scope(scope.clone());
        }
        self.scope = scope;
    }
}

impl PartialEq for TypeName {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && self.name == other.name
            && self.enclosing == other.enclosing
    }
}

impl Eq for TypeName {}

impl Hash for TypeName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.name.hash(state);
        self.enclosing.hash(state);
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(enclosing) = &self.enclosing {
            write!(f, "{enclosing}/")?;
        }
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

/// How a named type was encoded in a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// One of the built-in element types, e.g. `ELEMENT_TYPE_I4`
    Primitive(u8),
    /// `ELEMENT_TYPE_CLASS`
    Class,
    /// `ELEMENT_TYPE_VALUETYPE`
    ValueType,
}

/// A named type as it appears in a signature.
///
/// The encoding kind is needed to write the type back but does not take part in equality,
/// so `int32` and `valuetype System.Int32` are the same type.
#[derive(Debug, Clone)]
pub struct NamedType {
    /// The resolved name
    pub name: TypeName,
    /// How the type was encoded
    pub kind: TypeKind,
}

impl PartialEq for NamedType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for NamedType {}

impl Hash for NamedType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// A signature type with every token replaced by a [`TypeName`].
///
/// Custom modifiers are not kept; they never distinguish the methods this crate compares.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// A primitive, class or value type
    Named(NamedType),
    /// A generic instantiation, e.g. ``List`1<System.String>``
    GenericInst(Box<TypeSig>, Vec<TypeSig>),
    /// A single dimensional, zero based array
    SzArray(Box<TypeSig>),
    /// A general array of the given rank
    Array(Box<TypeSig>, u32),
    /// A managed reference
    ByRef(Box<TypeSig>),
    /// An unmanaged pointer
    Ptr(Box<TypeSig>),
    /// Generic parameter of the declaring type
    Var(u32),
    /// Generic parameter of the method
    MVar(u32),
    /// Function pointer
    FnPtr {
        /// Raw calling convention byte
        calling_convention: u8,
        /// Return type
        return_type: Box<TypeSig>,
        /// Parameter types
        parameters: Vec<TypeSig>,
    },
}

/// Name of the built-in type behind a primitive element type.
#[must_use]
pub fn primitive_name(element_type: u8) -> Option<&'static str> {
    Some(match element_type {
        ELEMENT_TYPE::VOID => "Void",
        ELEMENT_TYPE::BOOLEAN => "Boolean",
        ELEMENT_TYPE::CHAR => "Char",
        ELEMENT_TYPE::I1 => "SByte",
        ELEMENT_TYPE::U1 => "Byte",
        ELEMENT_TYPE::I2 => "Int16",
        ELEMENT_TYPE::U2 => "UInt16",
        ELEMENT_TYPE::I4 => "Int32",
        ELEMENT_TYPE::U4 => "UInt32",
        ELEMENT_TYPE::I8 => "Int64",
        ELEMENT_TYPE::U8 => "UInt64",
        ELEMENT_TYPE::R4 => "Single",
        ELEMENT_TYPE::R8 => "Double",
        ELEMENT_TYPE::STRING => "String",
        ELEMENT_TYPE::TYPEDBYREF => "TypedReference",
        ELEMENT_TYPE::I => "IntPtr",
        ELEMENT_TYPE::U => "UIntPtr",
        ELEMENT_TYPE::OBJECT => "Object",
        _ => return None,
    })
}

impl TypeSig {
    /// The built-in type for `element_type`, e.g. `System.Void` for `ELEMENT_TYPE_VOID`.
    ///
    /// Returns `None` for element types that are not primitives.
    #[must_use]
    pub fn primitive(element_type: u8) -> Option<TypeSig> {
        primitive_name(element_type).map(|name| {
            TypeSig::Named(NamedType {
                name: TypeName::new("System", name, TypeScope::CurrentModule),
                kind: TypeKind::Primitive(element_type),
            })
        })
    }

    /// `System.Void`.
    #[must_use]
    pub fn void() -> TypeSig {
        TypeSig::Named(NamedType {
            name: TypeName::new("System", "Void", TypeScope::CurrentModule),
            kind: TypeKind::Primitive(ELEMENT_TYPE::VOID),
        })
    }

    /// A reference type with the given namespace and name.
    #[must_use]
    pub fn class(namespace: &str, name: &str) -> TypeSig {
        TypeSig::Named(NamedType {
            name: TypeName::new(namespace, name, TypeScope::CurrentModule),
            kind: TypeKind::Class,
        })
    }

    /// Whether this is `System.Void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Named(named)
            if named.name.enclosing.is_none()
                && named.name.namespace == "System"
                && named.name.name == "Void")
    }

    /// The full name, e.g. ``System.Collections.Generic.List`1<System.String>``.
    #[must_use]
    pub fn full_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Named(named) => write!(f, "{}", named.name),
            TypeSig::GenericInst(base, arguments) => {
                write!(f, "{base}<")?;
                write_list(f, arguments)?;
                write!(f, ">")
            }
            TypeSig::SzArray(element) => write!(f, "{element}[]"),
            TypeSig::Array(element, rank) => {
                let commas = ",".repeat((*rank as usize).saturating_sub(1));
                write!(f, "{element}[{commas}]")
            }
            TypeSig::ByRef(inner) => write!(f, "{inner}&"),
            TypeSig::Ptr(inner) => write!(f, "{inner}*"),
            TypeSig::Var(index) => write!(f, "!{index}"),
            TypeSig::MVar(index) => write!(f, "!!{index}"),
            TypeSig::FnPtr {
                return_type,
                parameters,
                ..
            } => {
                write!(f, "method {return_type} *(")?;
                write_list(f, parameters)?;
                write!(f, ")")
            }
        }
    }
}

pub(crate) fn write_list(f: &mut fmt::Formatter<'_>, items: &[TypeSig]) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            write!(f, ",")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(argument: TypeSig) -> TypeSig {
        TypeSig::GenericInst(
            Box::new(TypeSig::class("System.Collections.Generic", "List`1")),
            vec![argument],
        )
    }

    #[test]
    fn display_matches_full_names() {
        let string = TypeSig::primitive(ELEMENT_TYPE::STRING).unwrap();
        assert_eq!(
            list_of(string.clone()).to_string(),
            "System.Collections.Generic.List`1<System.String>"
        );
        assert_eq!(
            list_of(TypeSig::class("", "LevelValuables")).to_string(),
            "System.Collections.Generic.List`1<LevelValuables>"
        );
        assert_eq!(TypeSig::SzArray(Box::new(string.clone())).to_string(), "System.String[]");
        assert_eq!(TypeSig::Array(Box::new(string.clone()), 2).to_string(), "System.String[,]");
        assert_eq!(TypeSig::ByRef(Box::new(string)).to_string(), "System.String&");
        assert_eq!(TypeSig::MVar(0).to_string(), "!!0");

        let outer = TypeName::new("REPOLib", "Outer", TypeScope::CurrentModule);
        assert_eq!(TypeName::nested(outer, "Inner").to_string(), "REPOLib.Outer/Inner");
    }

    #[test]
    fn equality_ignores_scope_and_encoding() {
        let library = TypeScope::Assembly(AssemblyIdentity {
            name: "UnityEngine.CoreModule".to_string(),
            ..Default::default()
        });
        let local = TypeName::new("UnityEngine", "GameObject", TypeScope::CurrentModule);
        let remote = TypeName::new("UnityEngine", "GameObject", library);
        assert_eq!(local, remote);

        let primitive = TypeSig::primitive(ELEMENT_TYPE::I4).unwrap();
        let value_type = TypeSig::Named(NamedType {
            name: TypeName::new("System", "Int32", TypeScope::CurrentModule),
            kind: TypeKind::ValueType,
        });
        assert_eq!(primitive, value_type);
        assert_ne!(primitive, TypeSig::primitive(ELEMENT_TYPE::U4).unwrap());
    }

    #[test]
    fn void_detection() {
        assert!(TypeSig::void().is_void());
        assert!(TypeSig::class("System", "Void").is_void());
        assert!(!TypeSig::class("REPOLib.Objects", "PrefabRef").is_void());
        assert!(TypeSig::primitive(0x40).is_none());
    }

    #[test]
    fn identity_display() {
        let identity = AssemblyIdentity {
            name: "REPOLib".to_string(),
            version: [2, 1, 0, 0],
            culture: String::new(),
            public_key_token: Some([0xb7, 0x7a, 0x5c, 0x56, 0x19, 0x34, 0xe0, 0x89]),
        };
        assert_eq!(
            identity.to_string(),
            "REPOLib, Version=2.1.0.0, Culture=neutral, PublicKeyToken=b77a5c561934e089"
        );
    }
}
