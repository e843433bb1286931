//! Signature blob encoders (ECMA-335 II.23.2).
//!
//! The inverse of [`crate::metadata::signatures::SignatureParser`]: a parsed signature,
//! possibly with its tokens remapped into another module, is written back as a blob.

use crate::{
    file::io::write_compressed_uint,
    metadata::{
        signatures::{
            CustomModifier, SignatureMethod, SignatureParameter, TypeSignature,
            CALLING_CONVENTION, ELEMENT_TYPE,
        },
        tables::TableId,
        token::Token,
    },
    Result,
};

/// Encodes a token as a `TypeDefOrRefOrSpecEncoded` value (II.23.2.8).
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the token is not a `TypeDef`, `TypeRef` or `TypeSpec`.
pub fn encode_type_def_or_ref(token: Token, buffer: &mut Vec<u8>) -> Result<()> {
    let tag = match token.table_id() {
        Some(TableId::TypeDef) => 0,
        Some(TableId::TypeRef) => 1,
        Some(TableId::TypeSpec) => 2,
        _ => {
            return Err(malformed_error!(
                "Token {} can not be encoded as TypeDefOrRef",
                token
            ))
        }
    };

    write_compressed_uint(buffer, (token.row() << 2) | tag)
}

fn encode_custom_modifiers(modifiers: &[CustomModifier], buffer: &mut Vec<u8>) -> Result<()> {
    for modifier in modifiers {
        buffer.push(if modifier.is_required {
            ELEMENT_TYPE::CMOD_REQD
        } else {
            ELEMENT_TYPE::CMOD_OPT
        });
        encode_type_def_or_ref(modifier.modifier_type, buffer)?;
    }
    Ok(())
}

fn encode_parameter(param: &SignatureParameter, buffer: &mut Vec<u8>) -> Result<()> {
    encode_custom_modifiers(&param.modifiers, buffer)?;
    if param.by_ref {
        buffer.push(ELEMENT_TYPE::BYREF);
    }
    encode_type_signature(&param.base, buffer)
}

/// Appends the encoding of a single type to `buffer`.
///
/// # Errors
/// Returns an error if a contained token can not be encoded.
pub fn encode_type_signature(signature: &TypeSignature, buffer: &mut Vec<u8>) -> Result<()> {
    match signature {
        TypeSignature::Void => buffer.push(ELEMENT_TYPE::VOID),
        TypeSignature::Boolean => buffer.push(ELEMENT_TYPE::BOOLEAN),
        TypeSignature::Char => buffer.push(ELEMENT_TYPE::CHAR),
        TypeSignature::I1 => buffer.push(ELEMENT_TYPE::I1),
        TypeSignature::U1 => buffer.push(ELEMENT_TYPE::U1),
        TypeSignature::I2 => buffer.push(ELEMENT_TYPE::I2),
        TypeSignature::U2 => buffer.push(ELEMENT_TYPE::U2),
        TypeSignature::I4 => buffer.push(ELEMENT_TYPE::I4),
        TypeSignature::U4 => buffer.push(ELEMENT_TYPE::U4),
        TypeSignature::I8 => buffer.push(ELEMENT_TYPE::I8),
        TypeSignature::U8 => buffer.push(ELEMENT_TYPE::U8),
        TypeSignature::R4 => buffer.push(ELEMENT_TYPE::R4),
        TypeSignature::R8 => buffer.push(ELEMENT_TYPE::R8),
        TypeSignature::String => buffer.push(ELEMENT_TYPE::STRING),
        TypeSignature::TypedByRef => buffer.push(ELEMENT_TYPE::TYPEDBYREF),
        TypeSignature::I => buffer.push(ELEMENT_TYPE::I),
        TypeSignature::U => buffer.push(ELEMENT_TYPE::U),
        TypeSignature::Object => buffer.push(ELEMENT_TYPE::OBJECT),
        TypeSignature::Ptr(pointer) => {
            buffer.push(ELEMENT_TYPE::PTR);
            encode_custom_modifiers(&pointer.modifiers, buffer)?;
            encode_type_signature(&pointer.base, buffer)?;
        }
        TypeSignature::ByRef(inner) => {
            buffer.push(ELEMENT_TYPE::BYREF);
            encode_type_signature(inner, buffer)?;
        }
        TypeSignature::ValueType(token) => {
            buffer.push(ELEMENT_TYPE::VALUETYPE);
            encode_type_def_or_ref(*token, buffer)?;
        }
        TypeSignature::Class(token) => {
            buffer.push(ELEMENT_TYPE::CLASS);
            encode_type_def_or_ref(*token, buffer)?;
        }
        TypeSignature::GenericParamType(index) => {
            buffer.push(ELEMENT_TYPE::VAR);
            write_compressed_uint(buffer, *index)?;
        }
        TypeSignature::GenericParamMethod(index) => {
            buffer.push(ELEMENT_TYPE::MVAR);
            write_compressed_uint(buffer, *index)?;
        }
        TypeSignature::Array(array) => {
            buffer.push(ELEMENT_TYPE::ARRAY);
            encode_type_signature(&array.base, buffer)?;
            write_compressed_uint(buffer, array.rank)?;

            let sizes: Vec<u32> = array
                .dimensions
                .iter()
                .map_while(|dimension| dimension.size)
                .collect();
            write_len(buffer, sizes.len())?;
            for size in sizes {
                write_compressed_uint(buffer, size)?;
            }

            let bounds: Vec<u32> = array
                .dimensions
                .iter()
                .map_while(|dimension| dimension.lower_bound)
                .collect();
            write_len(buffer, bounds.len())?;
            for bound in bounds {
                write_compressed_uint(buffer, bound)?;
            }
        }
        TypeSignature::GenericInst(base, args) => {
            buffer.push(ELEMENT_TYPE::GENERICINST);
            encode_type_signature(base, buffer)?;
            write_len(buffer, args.len())?;
            for arg in args {
                encode_type_signature(arg, buffer)?;
            }
        }
        TypeSignature::FnPtr(method) => {
            buffer.push(ELEMENT_TYPE::FNPTR);
            buffer.extend_from_slice(&encode_method_signature(method)?);
        }
        TypeSignature::SzArray(array) => {
            buffer.push(ELEMENT_TYPE::SZARRAY);
            encode_custom_modifiers(&array.modifiers, buffer)?;
            encode_type_signature(&array.base, buffer)?;
        }
        TypeSignature::Modified(modifiers, inner) => {
            encode_custom_modifiers(modifiers, buffer)?;
            encode_type_signature(inner, buffer)?;
        }
        TypeSignature::Pinned(inner) => {
            buffer.push(ELEMENT_TYPE::PINNED);
            encode_type_signature(inner, buffer)?;
        }
    }

    Ok(())
}

/// Encodes a method signature blob (`MethodDefSig` or `MethodRefSig`).
///
/// # Errors
/// Returns an error if a contained token can not be encoded.
///
/// # Examples
///
/// ```rust
/// use repolib_patcher::metadata::signatures::{encode_method_signature, SignatureParser};
/// let blob = [0x20, 0x01, 0x01, 0x0E];
/// let sig = SignatureParser::new(&blob).parse_method_signature()?;
/// assert_eq!(encode_method_signature(&sig)?, blob);
/// # Ok::<(), repolib_patcher::Error>(())
/// ```
pub fn encode_method_signature(method: &SignatureMethod) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(8 + method.params.len() * 2);

    let mut convention = method.calling_convention & CALLING_CONVENTION::MASK;
    if method.param_count_generic > 0 {
        convention |= CALLING_CONVENTION::GENERIC;
    }
    if method.has_this {
        convention |= CALLING_CONVENTION::HASTHIS;
    }
    if method.explicit_this {
        convention |= CALLING_CONVENTION::EXPLICITTHIS;
    }
    buffer.push(convention);

    if method.param_count_generic > 0 {
        write_compressed_uint(&mut buffer, method.param_count_generic)?;
    }
    write_len(&mut buffer, method.params.len() + method.varargs.len())?;
    encode_parameter(&method.return_type, &mut buffer)?;

    for param in &method.params {
        encode_parameter(param, &mut buffer)?;
    }
    if !method.varargs.is_empty() {
        buffer.push(ELEMENT_TYPE::SENTINEL);
        for param in &method.varargs {
            encode_parameter(param, &mut buffer)?;
        }
    }

    Ok(buffer)
}

/// Encodes a `TypeSpec` blob, which is a bare type.
///
/// # Errors
/// Returns an error if a contained token can not be encoded.
pub fn encode_typespec_signature(signature: &TypeSignature) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    encode_type_signature(signature, &mut buffer)?;
    Ok(buffer)
}

fn write_len(buffer: &mut Vec<u8>, len: usize) -> Result<()> {
    let Ok(len) = u32::try_from(len) else {
        return Err(malformed_error!("Signature list too long - {}", len));
    };
    write_compressed_uint(buffer, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signatures::SignatureParser;

    fn reencode(blob: &[u8]) -> Vec<u8> {
        let sig = SignatureParser::new(blob).parse_method_signature().unwrap();
        encode_method_signature(&sig).unwrap()
    }

    #[test]
    fn reencodes_parsed_blobs() {
        for blob in [
            &[0x00, 0x01, 0x01, 0x12, 0x0D][..],
            &[0x00, 0x02, 0x01, 0x15, 0x12, 0x09, 0x01, 0x0E, 0x10, 0x08],
            &[0x10, 0x01, 0x01, 0x1E, 0x00, 0x1D, 0x1E, 0x00],
            &[0x05, 0x02, 0x01, 0x08, 0x41, 0x0E],
            &[0x20, 0x00, 0x14, 0x08, 0x02, 0x01, 0x04, 0x02, 0x00, 0x00],
        ] {
            assert_eq!(reencode(blob), blob);
        }
    }

    #[test]
    fn type_def_or_ref_tags() {
        let mut buffer = Vec::new();
        encode_type_def_or_ref(Token::new(0x0200_0003), &mut buffer).unwrap();
        encode_type_def_or_ref(Token::new(0x0100_0003), &mut buffer).unwrap();
        encode_type_def_or_ref(Token::new(0x1B00_0003), &mut buffer).unwrap();
        assert_eq!(buffer, vec![0x0C, 0x0D, 0x0E]);

        assert!(encode_type_def_or_ref(Token::new(0x0A00_0001), &mut buffer).is_err());
    }
}
