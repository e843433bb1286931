//! Method and type signature parsing and encoding.
//!
//! Signatures encode type information, method parameters and calling conventions in a
//! compact binary format inside the `#Blob` heap. Type references inside a signature are
//! module-local tokens; comparing signatures across modules therefore goes through name
//! resolution, and moving one into another module goes through
//! [`SignatureMethod::map_tokens`].
//!
//! # Examples
//!
//! ```rust
//! use repolib_patcher::metadata::signatures::parse_method_signature;
//!
//! let signature_data = &[0x20, 0x01, 0x01, 0x0E]; // instance void (string)
//! let method_sig = parse_method_signature(signature_data)?;
//! assert!(method_sig.returns_void());
//! # Ok::<(), repolib_patcher::Error>(())
//! ```
//!
//! # References
//!
//! - ECMA-335 6th Edition, Partition II, Section 23.2 - Blobs and Signatures

mod encoders;
mod parser;
mod types;

pub use encoders::{
    encode_method_signature, encode_type_def_or_ref, encode_type_signature,
    encode_typespec_signature,
};
pub use parser::SignatureParser;
pub use types::*;

use crate::Result;

/// Parse a method signature (`MethodDefSig` or `MethodRefSig`) from blob data.
///
/// # Errors
/// Returns an error if the signature data is malformed.
pub fn parse_method_signature(data: &[u8]) -> Result<SignatureMethod> {
    let mut parser = SignatureParser::new(data);
    parser.parse_method_signature()
}

/// Parse a `TypeSpec` signature, which is a single type, from blob data.
///
/// # Errors
/// Returns an error if the signature data is malformed.
pub fn parse_type_spec_signature(data: &[u8]) -> Result<TypeSignature> {
    let mut parser = SignatureParser::new(data);
    parser.parse_type()
}
