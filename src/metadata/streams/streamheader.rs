use crate::{file::io::read_le, Error::OutOfBounds, Result};

/// Stream names this crate accepts in a metadata root.
///
/// `#-` is the uncompressed tables stream some obfuscators and edit-and-continue builds emit;
/// `#JTD` and `#Pdb` appear in a few toolchains and are carried through untouched.
pub const STREAM_NAMES: [&str; 8] = ["#Strings", "#US", "#Blob", "#GUID", "#~", "#-", "#JTD", "#Pdb"];

/// A stream header in the metadata root: where a stream lives and what it is called.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    /// Offset of the stream, relative to the metadata root
    pub offset: u32,
    /// Size of the stream in bytes
    pub size: u32,
    /// Name of the stream, e.g. `#Strings`
    pub name: String,
}

impl StreamHeader {
    /// Parses a stream header.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated data and [`crate::Error::Malformed`]
    /// for unknown stream names.
    pub fn from(data: &[u8]) -> Result<StreamHeader> {
        if data.len() < 9 {
            return Err(OutOfBounds);
        }

        let name_bytes = &data[8..std::cmp::min(data.len(), 8 + 32)];
        let Some(name_len) = name_bytes.iter().position(|&b| b == 0) else {
            return Err(malformed_error!("Unterminated stream header name"));
        };
        let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();

        if !STREAM_NAMES.iter().any(|valid_name| name == *valid_name) {
            return Err(malformed_error!("Invalid stream header name - {}", name));
        }

        Ok(StreamHeader {
            offset: read_le::<u32>(data)?,
            size: read_le::<u32>(&data[4..])?,
            name,
        })
    }

    /// Size of this header on disk: two `u32` fields plus the name, null-terminated and
    /// padded to four bytes.
    #[must_use]
    pub fn encoded_size(name: &str) -> usize {
        8 + ((name.len() + 1 + 3) & !3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let header_bytes = [
            0x6C, 0x00, 0x00, 0x00,
            0xA4, 0x45, 0x00, 0x00,
            0x23, 0x7E, 0x00, 0x00,
        ];

        let parsed_header = StreamHeader::from(&header_bytes).unwrap();

        assert_eq!(parsed_header.offset, 0x6C);
        assert_eq!(parsed_header.size, 0x45A4);
        assert_eq!(parsed_header.name, "#~");
    }

    #[test]
    fn crafted_invalid() {
        #[rustfmt::skip]
        let header_bytes = [
            0x6C, 0x00, 0x00, 0x00,
            0xA4, 0x45, 0x00, 0x00,
            0x24, 0x7E, 0x00,
        ];

        assert!(StreamHeader::from(&header_bytes).is_err());
    }

    #[test]
    fn encoded_size() {
        assert_eq!(StreamHeader::encoded_size("#~"), 12);
        assert_eq!(StreamHeader::encoded_size("#Strings"), 20);
        assert_eq!(StreamHeader::encoded_size("#GUID"), 16);
    }
}
