//! CLR 2.0 (Cor20) header.
//!
//! Found through the `IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR` data directory. Only the fields
//! a rewrite has to touch are exposed as offsets; everything else is carried through as-is.
//!
//! # Reference
//! - [ECMA-335 II.25.3.3](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::{file::parser::Parser, Error::OutOfBounds, Result};

/// Size of the CLI header in bytes
pub const COR20_HEADER_SIZE: usize = 72;
/// Offset of the metadata RVA field
pub const META_DATA_RVA_OFFSET: usize = 8;
/// Offset of the metadata size field
pub const META_DATA_SIZE_OFFSET: usize = 12;
/// Offset of the flags field
pub const FLAGS_OFFSET: usize = 16;

/// `COMIMAGE_FLAGS_ILONLY`
pub const FLAG_IL_ONLY: u32 = 0x0000_0001;
/// `COMIMAGE_FLAGS_STRONGNAMESIGNED`
pub const FLAG_STRONG_NAME_SIGNED: u32 = 0x0000_0008;

/// The main header of CIL.
#[derive(Clone, Debug)]
pub struct Cor20Header {
    /// Size of the header, always 72
    pub cb: u32,
    /// Major runtime version
    pub major_runtime_version: u16,
    /// Minor runtime version
    pub minor_runtime_version: u16,
    /// RVA of the metadata root
    pub meta_data_rva: u32,
    /// Size of the metadata
    pub meta_data_size: u32,
    /// `COMIMAGE_FLAGS_*`
    pub flags: u32,
    /// Entry point token, or RVA of a native entry point
    pub entry_point_token: u32,
    /// RVA of managed resources
    pub resource_rva: u32,
    /// Size of managed resources
    pub resource_size: u32,
    /// RVA of the strong name signature
    pub strong_name_signature_rva: u32,
    /// Size of the strong name signature
    pub strong_name_signature_size: u32,
}

impl Cor20Header {
    /// Reads the header from `data`.
    ///
    /// # Errors
    /// Returns an error if the data is too short or the header fails basic validation.
    pub fn read(data: &[u8]) -> Result<Cor20Header> {
        if data.len() < COR20_HEADER_SIZE {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(data);

        let cb = parser.read_le::<u32>()?;
        if cb as usize != COR20_HEADER_SIZE {
            return Err(malformed_error!(
                "Invalid CLR header size: expected 72, got {}",
                cb
            ));
        }

        let major_runtime_version = parser.read_le::<u16>()?;
        let minor_runtime_version = parser.read_le::<u16>()?;

        let meta_data_rva = parser.read_le::<u32>()?;
        let meta_data_size = parser.read_le::<u32>()?;
        if meta_data_rva == 0 || meta_data_size == 0 {
            return Err(malformed_error!("Assembly has no metadata"));
        }

        let flags = parser.read_le::<u32>()?;
        let entry_point_token = parser.read_le::<u32>()?;
        let resource_rva = parser.read_le::<u32>()?;
        let resource_size = parser.read_le::<u32>()?;
        let strong_name_signature_rva = parser.read_le::<u32>()?;
        let strong_name_signature_size = parser.read_le::<u32>()?;

        Ok(Cor20Header {
            cb,
            major_runtime_version,
            minor_runtime_version,
            meta_data_rva,
            meta_data_size,
            flags,
            entry_point_token,
            resource_rva,
            resource_size,
            strong_name_signature_rva,
            strong_name_signature_size,
        })
    }

    /// Whether the image carries a strong name signature.
    #[must_use]
    pub fn is_strong_name_signed(&self) -> bool {
        self.flags & FLAG_STRONG_NAME_SIGNED != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let header_bytes = [
            0x48, 0x00, 0x00, 0x00, // cb = 72
            0x02, 0x00,             // major_runtime_version = 2
            0x05, 0x00,             // minor_runtime_version = 5
            0x00, 0x21, 0x00, 0x00, // meta_data_rva = 0x2100
            0x40, 0x03, 0x00, 0x00, // meta_data_size = 0x340
            0x09, 0x00, 0x00, 0x00, // flags = ILONLY | STRONGNAMESIGNED
            0x00, 0x00, 0x00, 0x00, // entry_point_token
            0x00, 0x00, 0x00, 0x00, // resource_rva
            0x00, 0x00, 0x00, 0x00, // resource_size
            0x80, 0x24, 0x00, 0x00, // strong_name_signature_rva
            0x80, 0x00, 0x00, 0x00, // strong_name_signature_size
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];

        let parsed_header = Cor20Header::read(&header_bytes).unwrap();

        assert_eq!(parsed_header.cb, 72);
        assert_eq!(parsed_header.major_runtime_version, 2);
        assert_eq!(parsed_header.meta_data_rva, 0x2100);
        assert_eq!(parsed_header.meta_data_size, 0x340);
        assert!(parsed_header.is_strong_name_signed());
        assert_eq!(parsed_header.strong_name_signature_size, 0x80);
    }

    #[test]
    fn too_short() {
        assert!(Cor20Header::read(&[0x48, 0, 0, 0]).is_err());
    }
}
