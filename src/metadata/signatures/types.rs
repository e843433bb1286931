use crate::{metadata::token::Token, Result};

#[allow(non_snake_case, dead_code, missing_docs)]
/// Bytes that introduce the types of a signature blob
pub mod ELEMENT_TYPE {
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    // Followed by type
    pub const PTR: u8 = 0x0f;
    // Followed by type
    pub const BYREF: u8 = 0x10;
    // Followed by TypeDef or TypeRef token
    pub const VALUETYPE: u8 = 0x11;
    // Followed by TypeDef or TypeRef token
    pub const CLASS: u8 = 0x12;
    // Generic parameter in a generic type definition, followed by number
    pub const VAR: u8 = 0x13;
    // type rank boundsCount bound1 … loCount lo1 …
    pub const ARRAY: u8 = 0x14;
    // Generic type instantiation. Followed by type type-arg-count type-1 ... type-n
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    // System.IntPtr
    pub const I: u8 = 0x18;
    // System.UIntPtr
    pub const U: u8 = 0x19;
    // Followed by full method signature
    pub const FNPTR: u8 = 0x1b;
    // System.Object
    pub const OBJECT: u8 = 0x1c;
    // Single-dim array with 0 lower bound
    pub const SZARRAY: u8 = 0x1d;
    // Generic parameter in a generic method definition, followed by number
    pub const MVAR: u8 = 0x1e;
    // Required modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_REQD: u8 = 0x1f;
    // Optional modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_OPT: u8 = 0x20;
    // Sentinel for vararg method signature
    pub const SENTINEL: u8 = 0x41;
    // Denotes a local variable that points at a pinned object
    pub const PINNED: u8 = 0x45;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// Flags of the first byte of a method signature
pub mod CALLING_CONVENTION {
    pub const DEFAULT: u8 = 0x00;
    pub const C: u8 = 0x01;
    pub const STDCALL: u8 = 0x02;
    pub const THISCALL: u8 = 0x03;
    pub const FASTCALL: u8 = 0x04;
    pub const VARARG: u8 = 0x05;
    pub const MASK: u8 = 0x0f;
    pub const GENERIC: u8 = 0x10;
    pub const HASTHIS: u8 = 0x20;
    pub const EXPLICITTHIS: u8 = 0x40;
}

/// Represents a parsed type in various signatures
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSignature {
    /// void
    Void,
    /// bool
    Boolean,
    /// char
    Char,
    /// signed 8bit integer
    I1,
    /// unsigned 8bit integer
    U1,
    /// signed 16bit integer
    I2,
    /// unsigned 16bit integer
    U2,
    /// signed 32bit integer
    I4,
    /// unsigned 32bit integer
    U4,
    /// signed 64bit integer
    I8,
    /// unsigned 64bit integer
    U8,
    /// 32bit floating-point
    R4,
    /// 64bit floating-point
    R8,
    /// System.String
    String,
    /// A pointer to a type
    Ptr(SignaturePointer),
    /// Type by reference
    ByRef(Box<TypeSignature>),
    /// CIL value-type
    // TypeDefOrRefOrSpecEncoded
    ValueType(Token),
    /// CIL Class
    // TypeDefOrRefOrSpecEncoded
    Class(Token),
    /// Generic type parameter
    GenericParamType(u32),
    /// Array
    Array(SignatureArray),
    /// Generic type and its arguments
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    /// Type is referenced during runtime
    TypedByRef,
    /// signed integer, sized to executing platform
    I,
    /// unsigned integer, sized to executing platform
    U,
    /// Function pointer
    FnPtr(Box<SignatureMethod>),
    /// System.Object
    Object,
    /// Single dimension array
    SzArray(SignatureSzArray),
    /// Generic method parameter
    GenericParamMethod(u32),
    /// A type preceded by custom modifiers, outside the positions that carry their own list
    Modified(Vec<CustomModifier>, Box<TypeSignature>),
    /// A pinned type
    Pinned(Box<TypeSignature>),
}

/// A `modreq` or `modopt` custom modifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomModifier {
    /// `modreq` when set, `modopt` otherwise
    pub is_required: bool,
    /// `TypeDefOrRefOrSpecEncoded` modifier type
    pub modifier_type: Token,
}

/// Size and lower bound of one array dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArrayDimensions {
    /// The size of this dimension
    pub size: Option<u32>,
    /// The lower bound of this dimension
    pub lower_bound: Option<u32>,
}

/// A general array
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureArray {
    /// The type in the array
    pub base: Box<TypeSignature>,
    /// The number of dimensions
    pub rank: u32,
    /// The dimensions (can be less than 'rank', are in order from 0..count)
    pub dimensions: Vec<ArrayDimensions>,
}

/// A single dimension array with zero lower bound
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureSzArray {
    /// Custom modifiers
    pub modifiers: Vec<CustomModifier>,
    /// The type in the array
    pub base: Box<TypeSignature>,
}

/// A pointer to a type
#[derive(Debug, Clone, PartialEq)]
pub struct SignaturePointer {
    /// Custom modifiers
    pub modifiers: Vec<CustomModifier>,
    /// The type pointed to
    pub base: Box<TypeSignature>,
}

/// Parameter with optional custom modifiers
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureParameter {
    /// Custom modifiers of the parameter
    pub modifiers: Vec<CustomModifier>,
    /// Parameter is passed by reference
    pub by_ref: bool,
    /// The type of the parameter
    pub base: TypeSignature,
}

impl SignatureParameter {
    /// A plain parameter of type `base`
    #[must_use]
    pub fn new(base: TypeSignature) -> Self {
        SignatureParameter {
            modifiers: Vec::new(),
            by_ref: false,
            base,
        }
    }
}

/// Represents a method signature (II.23.2.1)
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureMethod {
    /// Used to encode the keyword instance in the calling convention, see §II.15.3
    pub has_this: bool,
    /// Used to encode the keyword explicit in the calling convention, see §II.15.3
    pub explicit_this: bool,
    /// The low four bits of the first byte, see [`CALLING_CONVENTION`]
    pub calling_convention: u8,
    /// Number of generic parameters, 0 for non-generic methods
    pub param_count_generic: u32,
    /// The return type of this `Method`
    pub return_type: SignatureParameter,
    /// The parameters of this `Method`
    pub params: Vec<SignatureParameter>,
    /// The vararg parameters that follow the sentinel
    pub varargs: Vec<SignatureParameter>,
}

impl SignatureMethod {
    /// Whether the return type is `void`.
    #[must_use]
    pub fn returns_void(&self) -> bool {
        !self.return_type.by_ref
            && self.return_type.modifiers.is_empty()
            && self.return_type.base == TypeSignature::Void
    }

    /// Rewrites every type token in the signature through `map`.
    ///
    /// # Errors
    /// Propagates the first error returned by `map`.
    pub fn map_tokens<F>(&mut self, map: &mut F) -> Result<()>
    where
        F: FnMut(Token) -> Result<Token>,
    {
        self.return_type.map_tokens(map)?;
        for param in self.params.iter_mut().chain(self.varargs.iter_mut()) {
            param.map_tokens(map)?;
        }
        Ok(())
    }
}

impl SignatureParameter {
    /// Rewrites every type token of the parameter through `map`.
    ///
    /// # Errors
    /// Propagates the first error returned by `map`.
    pub fn map_tokens<F>(&mut self, map: &mut F) -> Result<()>
    where
        F: FnMut(Token) -> Result<Token>,
    {
        map_modifiers(&mut self.modifiers, map)?;
        self.base.map_tokens(map)
    }
}

impl TypeSignature {
    /// Rewrites every type token in the signature through `map`.
    ///
    /// # Errors
    /// Propagates the first error returned by `map`.
    pub fn map_tokens<F>(&mut self, map: &mut F) -> Result<()>
    where
        F: FnMut(Token) -> Result<Token>,
    {
        match self {
            TypeSignature::ValueType(token) | TypeSignature::Class(token) => {
                *token = map(*token)?;
            }
            TypeSignature::Ptr(pointer) => {
                map_modifiers(&mut pointer.modifiers, map)?;
                pointer.base.map_tokens(map)?;
            }
            TypeSignature::SzArray(array) => {
                map_modifiers(&mut array.modifiers, map)?;
                array.base.map_tokens(map)?;
            }
            TypeSignature::Array(array) => array.base.map_tokens(map)?,
            TypeSignature::ByRef(inner) | TypeSignature::Pinned(inner) => inner.map_tokens(map)?,
            TypeSignature::Modified(modifiers, inner) => {
                map_modifiers(modifiers, map)?;
                inner.map_tokens(map)?;
            }
            TypeSignature::GenericInst(base, args) => {
                base.map_tokens(map)?;
                for arg in args {
                    arg.map_tokens(map)?;
                }
            }
            TypeSignature::FnPtr(method) => method.map_tokens(map)?,
            _ => {}
        }
        Ok(())
    }
}

fn map_modifiers<F>(modifiers: &mut [CustomModifier], map: &mut F) -> Result<()>
where
    F: FnMut(Token) -> Result<Token>,
{
    for modifier in modifiers {
        modifier.modifier_type = map(modifier.modifier_type)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_tokens_reaches_nested_types() {
        let mut method = SignatureMethod {
            has_this: false,
            explicit_this: false,
            calling_convention: CALLING_CONVENTION::DEFAULT,
            param_count_generic: 0,
            return_type: SignatureParameter::new(TypeSignature::Void),
            params: vec![
                SignatureParameter::new(TypeSignature::Class(Token::new(0x0100_0001))),
                SignatureParameter::new(TypeSignature::GenericInst(
                    Box::new(TypeSignature::Class(Token::new(0x0100_0002))),
                    vec![TypeSignature::SzArray(SignatureSzArray {
                        modifiers: Vec::new(),
                        base: Box::new(TypeSignature::ValueType(Token::new(0x0100_0003))),
                    })],
                )),
            ],
            varargs: Vec::new(),
        };

        let mut seen = Vec::new();
        method
            .map_tokens(&mut |token| {
                seen.push(token.row());
                Ok(Token::new(0x0100_0000 | (token.row() + 10)))
            })
            .unwrap();

        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(
            method.params[0].base,
            TypeSignature::Class(Token::new(0x0100_000B))
        );
        assert!(method.returns_void());
    }
}
