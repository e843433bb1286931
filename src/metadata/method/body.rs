//! CIL method bodies: header, IL code and exception handling sections.
//!
//! Supports both tiny and fat method headers, and small and fat exception handling
//! sections, for reading and for writing.
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use crate::{
    file::io::{read_le, read_le_at},
    metadata::method::{ExceptionHandler, ExceptionHandlerFlags, MethodBodyFlags, SectionFlags},
    Error::OutOfBounds,
    Result,
};

/// Describes one method that has been compiled to CIL bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Maximum number of items on the operand stack
    pub max_stack: u16,
    /// Flag, indicating to call default constructor on all local variables
    pub init_locals: bool,
    /// `StandAloneSig` token describing the local variables. 0 == no local variables
    pub local_var_sig_token: u32,
    /// The IL code
    pub code: Vec<u8>,
    /// A list of exception handlers this method has
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Parses a method body starting at its header.
    ///
    /// `data` may extend past the end of the body; only the bytes the header describes are
    /// consumed.
    ///
    /// # Errors
    /// Returns an error if the data is empty, out of bounds, or malformed.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(malformed_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_0000_0011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(MethodBody {
                    max_stack: 8,
                    init_locals: false,
                    local_var_sig_token: 0,
                    code: data[1..=size_code].to_vec(),
                    exception_handlers: Vec::new(),
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < 12 {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;
                let size_header = ((first_duo >> 12) * 4) as usize;
                if size_header < 12 {
                    return Err(malformed_error!("Fat header size {} too small", size_header));
                }

                let size_code = read_le::<u32>(&data[4..])? as usize;
                let Some(code_end) = size_header.checked_add(size_code) else {
                    return Err(OutOfBounds);
                };
                if data.len() < code_end {
                    return Err(OutOfBounds);
                }

                let local_var_sig_token = read_le::<u32>(&data[8..])?;
                let flags_header =
                    MethodBodyFlags::from_bits_truncate(first_duo & 0b_0000_1111_1111_1111_u16);
                let max_stack = read_le::<u16>(&data[2..])?;

                let exception_handlers = if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
                    read_sections(data, (code_end + 3) & !3)?
                } else {
                    Vec::new()
                };

                Ok(MethodBody {
                    max_stack,
                    init_locals: flags_header.contains(MethodBodyFlags::INIT_LOCALS),
                    local_var_sig_token,
                    code: data[size_header..code_end].to_vec(),
                    exception_handlers,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    /// Whether this body can be written with a one-byte tiny header.
    #[must_use]
    pub fn fits_tiny(&self) -> bool {
        self.code.len() < 64
            && self.max_stack <= 8
            && self.local_var_sig_token == 0
            && self.exception_handlers.is_empty()
    }

    /// Encodes header, code and exception handling sections.
    ///
    /// The result is padded so that the next body can start on a four byte boundary.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the code is too large for a method body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let Ok(code_size) = u32::try_from(self.code.len()) else {
            return Err(malformed_error!("Method code exceeds 4GB"));
        };

        let mut out = Vec::with_capacity(12 + self.code.len() + 4);
        if self.fits_tiny() {
            #[allow(clippy::cast_possible_truncation)]
            out.push(((code_size as u8) << 2) | MethodBodyFlags::TINY_FORMAT.bits() as u8);
            out.extend_from_slice(&self.code);
        } else {
            let mut flags = MethodBodyFlags::FAT_FORMAT.bits() | (3 << 12);
            if self.init_locals {
                flags |= MethodBodyFlags::INIT_LOCALS.bits();
            }
            if !self.exception_handlers.is_empty() {
                flags |= MethodBodyFlags::MORE_SECTS.bits();
            }

            out.extend_from_slice(&flags.to_le_bytes());
            out.extend_from_slice(&self.max_stack.to_le_bytes());
            out.extend_from_slice(&code_size.to_le_bytes());
            out.extend_from_slice(&self.local_var_sig_token.to_le_bytes());
            out.extend_from_slice(&self.code);

            if !self.exception_handlers.is_empty() {
                out.resize((out.len() + 3) & !3, 0);
                write_section(&mut out, &self.exception_handlers)?;
            }
        }

        out.resize((out.len() + 3) & !3, 0);
        Ok(out)
    }
}

fn read_sections(data: &[u8], mut cursor: usize) -> Result<Vec<ExceptionHandler>> {
    let mut exception_handlers = Vec::new();

    while data.len() >= cursor + 4 {
        let section_flags = SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
        if !section_flags.contains(SectionFlags::EHTABLE) {
            break;
        }

        if section_flags.contains(SectionFlags::FAT_FORMAT) {
            let section_size = (read_le::<u32>(&data[cursor..])? >> 8) as usize;
            if section_size < 4 || data.len() < cursor + section_size {
                return Err(OutOfBounds);
            }

            let mut offset = cursor + 4;
            for _ in 0..(section_size - 4) / 24 {
                #[allow(clippy::cast_possible_truncation)]
                let flags = read_le_at::<u32>(data, &mut offset)? as u16;
                exception_handlers.push(ExceptionHandler {
                    flags: ExceptionHandlerFlags::from_bits_truncate(flags),
                    try_offset: read_le_at::<u32>(data, &mut offset)?,
                    try_length: read_le_at::<u32>(data, &mut offset)?,
                    handler_offset: read_le_at::<u32>(data, &mut offset)?,
                    handler_length: read_le_at::<u32>(data, &mut offset)?,
                    class_token_or_filter: read_le_at::<u32>(data, &mut offset)?,
                });
            }
            cursor += section_size;
        } else {
            let section_size = read_le::<u8>(&data[cursor + 1..])? as usize;
            if section_size < 4 || data.len() < cursor + section_size {
                return Err(OutOfBounds);
            }

            let mut offset = cursor + 4;
            for _ in 0..(section_size - 4) / 12 {
                exception_handlers.push(ExceptionHandler {
                    flags: ExceptionHandlerFlags::from_bits_truncate(read_le_at::<u16>(
                        data,
                        &mut offset,
                    )?),
                    try_offset: u32::from(read_le_at::<u16>(data, &mut offset)?),
                    try_length: u32::from(read_le_at::<u8>(data, &mut offset)?),
                    handler_offset: u32::from(read_le_at::<u16>(data, &mut offset)?),
                    handler_length: u32::from(read_le_at::<u8>(data, &mut offset)?),
                    class_token_or_filter: read_le_at::<u32>(data, &mut offset)?,
                });
            }
            cursor += section_size;
        }

        if !section_flags.contains(SectionFlags::MORE_SECTS) {
            break;
        }
        cursor = (cursor + 3) & !3;
    }

    Ok(exception_handlers)
}

#[allow(clippy::cast_possible_truncation)]
fn write_section(out: &mut Vec<u8>, handlers: &[ExceptionHandler]) -> Result<()> {
    let small_size = 4 + 12 * handlers.len();
    if small_size <= 0xFF && handlers.iter().all(ExceptionHandler::fits_small) {
        out.push(SectionFlags::EHTABLE.bits());
        out.push(small_size as u8);
        out.extend_from_slice(&[0, 0]);
        for handler in handlers {
            out.extend_from_slice(&handler.flags.bits().to_le_bytes());
            out.extend_from_slice(&(handler.try_offset as u16).to_le_bytes());
            out.push(handler.try_length as u8);
            out.extend_from_slice(&(handler.handler_offset as u16).to_le_bytes());
            out.push(handler.handler_length as u8);
            out.extend_from_slice(&handler.class_token_or_filter.to_le_bytes());
        }
        return Ok(());
    }

    let fat_size = 4 + 24 * handlers.len();
    if fat_size > 0x00FF_FFFF {
        return Err(malformed_error!("Too many exception handlers - {}", handlers.len()));
    }

    let kind = u32::from((SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits());
    out.extend_from_slice(&(kind | ((fat_size as u32) << 8)).to_le_bytes());
    for handler in handlers {
        out.extend_from_slice(&u32::from(handler.flags.bits()).to_le_bytes());
        out.extend_from_slice(&handler.try_offset.to_le_bytes());
        out.extend_from_slice(&handler.try_length.to_le_bytes());
        out.extend_from_slice(&handler.handler_offset.to_le_bytes());
        out.extend_from_slice(&handler.handler_length.to_le_bytes());
        out.extend_from_slice(&handler.class_token_or_filter.to_le_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny() {
        // ldarg.0, call 0x0A000001, ret
        let data = [0x1E, 0x02, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A, 0xFF, 0xFF];
        let body = MethodBody::from(&data).unwrap();

        assert_eq!(body.code, &data[1..8]);
        assert_eq!(body.max_stack, 8);
        assert!(body.fits_tiny());
        assert_eq!(body.encode().unwrap(), &data[..8]);
    }

    #[test]
    fn fat_with_locals() {
        #[rustfmt::skip]
        let data = [
            0x13, 0x30, 0x02, 0x00, // fat, init locals, 3 dwords; max stack 2
            0x02, 0x00, 0x00, 0x00, // code size
            0x01, 0x00, 0x00, 0x11, // StandAloneSig 1
            0x00, 0x2A,
        ];
        let body = MethodBody::from(&data).unwrap();

        assert!(body.init_locals);
        assert_eq!(body.max_stack, 2);
        assert_eq!(body.local_var_sig_token, 0x1100_0001);
        assert_eq!(body.code, vec![0x00, 0x2A]);
        assert!(!body.fits_tiny());

        let encoded = body.encode().unwrap();
        assert_eq!(&encoded[..14], &data);
        assert_eq!(MethodBody::from(&encoded).unwrap(), body);
    }

    #[test]
    fn small_exception_section() {
        #[rustfmt::skip]
        let data = [
            0x1B, 0x30, 0x01, 0x00, // fat, more sects, init locals
            0x06, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0xDE, 0x02, 0x26, 0xDE, 0x00, // nop; leave.s; pop; leave.s
            0x00, 0x00,                         // padding
            0x01, 0x10, 0x00, 0x00,             // small EH section, 16 bytes
            0x00, 0x00, 0x00, 0x00, 0x03, 0x03, 0x00, 0x03,
            0x05, 0x00, 0x00, 0x01,
        ];
        let body = MethodBody::from(&data).unwrap();

        assert_eq!(body.exception_handlers.len(), 1);
        let handler = &body.exception_handlers[0];
        assert_eq!(handler.flags, ExceptionHandlerFlags::EXCEPTION);
        assert_eq!(handler.try_length, 3);
        assert_eq!(handler.handler_offset, 3);
        assert_eq!(handler.handler_length, 3);
        assert_eq!(handler.class_token_or_filter, 0x0100_0005);

        assert_eq!(body.encode().unwrap(), data.to_vec());
    }

    #[test]
    fn large_handlers_use_fat_section() {
        let body = MethodBody {
            max_stack: 1,
            init_locals: false,
            local_var_sig_token: 0,
            code: vec![0x00; 0x200],
            exception_handlers: vec![ExceptionHandler {
                flags: ExceptionHandlerFlags::FINALLY,
                try_offset: 0,
                try_length: 0x100,
                handler_offset: 0x100,
                handler_length: 0x100,
                class_token_or_filter: 0,
            }],
        };

        let encoded = body.encode().unwrap();
        let section = 12 + 0x200;
        assert_eq!(encoded[section], 0x41);
        assert_eq!(MethodBody::from(&encoded).unwrap(), body);
    }

    #[test]
    fn truncated() {
        assert!(MethodBody::from(&[]).is_err());
        assert!(MethodBody::from(&[0x1E, 0x02]).is_err());
        assert!(MethodBody::from(&[0x03, 0x30, 0x01]).is_err());
    }
}
