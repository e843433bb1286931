//! Metadata root header and stream directory.
//!
//! The metadata root is the entry point of the physical metadata: a `BSJB` signature, the
//! runtime version string, and a directory of named streams (`#~`, `#Strings`, `#Blob`, ...)
//! given as offsets relative to the root itself.
//!
//! # References
//!
//! - [ECMA-335 II.24.2.1: Metadata root](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::{
    file::io::{read_le, write_le_at},
    metadata::streams::StreamHeader,
    Error::OutOfBounds,
    Result,
};

/// The MAGIC value indicating the CIL header
pub const CIL_HEADER_MAGIC: u32 = 0x424A_5342;

/// Upper bound on the number of streams a root may declare.
const MAX_STREAMS: u16 = 8;

/// The header of the present metadata, providing the stream directory.
///
/// # Example
///
/// ```rust
/// use repolib_patcher::metadata::root::Root;
/// let root = Root::read(&[
///            0x42, 0x53, 0x4A, 0x42,
///            0x01, 0x00,
///            0x01, 0x00,
///            0x00, 0x00, 0x00, 0x00,
///            0x08, 0x00, 0x00, 0x00,
///            b'v', b'4', b'.', b'0', 0x00, 0x00, 0x00, 0x00,
///            0x00, 0x00,
///            0x01, 0x00,
///            0x2C, 0x00, 0x00, 0x00, // StreamHeader
///            0x04, 0x00, 0x00, 0x00,
///            0x23, 0x7E, 0x00, 0x00,
///            0x00, 0x00, 0x00, 0x00, // #~ payload
///            0x00, 0x00, 0x00, 0x00,
///        ])?;
/// assert_eq!(root.version, "v4.0");
/// assert_eq!(root.stream_headers[0].name, "#~");
/// # Ok::<(), repolib_patcher::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct Root {
    /// `MajorVersion`, 1 for all current runtimes
    pub major_version: u16,
    /// `MinorVersion`, 1 for all current runtimes
    pub minor_version: u16,
    /// Runtime version, without the null padding
    pub version: String,
    /// Reserved, always 0
    pub flags: u16,
    /// Stream directory in file order
    pub stream_headers: Vec<StreamHeader>,
}

impl Root {
    /// Reads a [`Root`] metadata header from a byte slice.
    ///
    /// # Errors
    /// Returns an error if the data is too short, the signature is invalid, or the stream
    /// directory is malformed.
    pub fn read(data: &[u8]) -> Result<Root> {
        if data.len() < 20 {
            return Err(OutOfBounds);
        }

        let signature = read_le::<u32>(data)?;
        if signature != CIL_HEADER_MAGIC {
            return Err(malformed_error!(
                "CIL_HEADER_MAGIC does not match - {:#x}",
                signature
            ));
        }

        let version_length = read_le::<u32>(&data[12..])? as usize;
        let Some(version_end) = version_length.checked_add(16) else {
            return Err(malformed_error!(
                "Version string length causing integer overflow - {}",
                version_length
            ));
        };
        if version_end + 4 > data.len() {
            return Err(OutOfBounds);
        }

        let version_bytes = &data[16..version_end];
        let version_len = version_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(version_bytes.len());
        let version = String::from_utf8_lossy(&version_bytes[..version_len]).into_owned();

        let flags = read_le::<u16>(&data[version_end..])?;
        let stream_count = read_le::<u16>(&data[version_end + 2..])?;
        if stream_count == 0 || stream_count > MAX_STREAMS {
            return Err(malformed_error!("Invalid stream count - {}", stream_count));
        }

        let mut stream_headers = Vec::with_capacity(stream_count as usize);
        let mut stream_offset = version_end + 4;
        for _ in 0..stream_count {
            if stream_offset >= data.len() {
                return Err(OutOfBounds);
            }

            let header = StreamHeader::from(&data[stream_offset..])?;
            match header.offset.checked_add(header.size) {
                Some(end) if end as usize <= data.len() => {}
                Some(_) => return Err(OutOfBounds),
                None => {
                    return Err(malformed_error!(
                        "Stream offset and size cause integer overflow - {} + {}",
                        header.offset,
                        header.size
                    ))
                }
            }

            if stream_headers
                .iter()
                .any(|existing: &StreamHeader| existing.name == header.name)
            {
                return Err(malformed_error!("Duplicate stream - {}", header.name));
            }

            stream_offset += StreamHeader::encoded_size(&header.name);
            stream_headers.push(header);
        }

        Ok(Root {
            major_version: read_le::<u16>(&data[4..])?,
            minor_version: read_le::<u16>(&data[6..])?,
            version,
            flags,
            stream_headers,
        })
    }

    /// Returns the header of the stream called `name`.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.stream_headers.iter().find(|header| header.name == name)
    }

    /// Size of the padded version string field.
    #[must_use]
    pub fn version_field_size(&self) -> usize {
        (self.version.len() + 1 + 3) & !3
    }

    /// Size of the encoded root, including the stream directory.
    #[must_use]
    pub fn header_size(&self) -> usize {
        16 + self.version_field_size()
            + 4
            + self
                .stream_headers
                .iter()
                .map(|header| StreamHeader::encoded_size(&header.name))
                .sum::<usize>()
    }

    /// Encodes the root with its current stream directory.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the directory holds more streams than a root
    /// can describe.
    pub fn write(&self) -> Result<Vec<u8>> {
        let Ok(stream_count) = u16::try_from(self.stream_headers.len()) else {
            return Err(malformed_error!("Too many streams"));
        };

        let mut out = vec![0_u8; self.header_size()];
        let mut offset = 0;
        write_le_at(&mut out, &mut offset, CIL_HEADER_MAGIC)?;
        write_le_at(&mut out, &mut offset, self.major_version)?;
        write_le_at(&mut out, &mut offset, self.minor_version)?;
        write_le_at(&mut out, &mut offset, 0_u32)?;

        let version_field = self.version_field_size();
        #[allow(clippy::cast_possible_truncation)]
        write_le_at(&mut out, &mut offset, version_field as u32)?;
        out[offset..offset + self.version.len()].copy_from_slice(self.version.as_bytes());
        offset += version_field;

        write_le_at(&mut out, &mut offset, self.flags)?;
        write_le_at(&mut out, &mut offset, stream_count)?;

        for header in &self.stream_headers {
            let start = offset;
            write_le_at(&mut out, &mut offset, header.offset)?;
            write_le_at(&mut out, &mut offset, header.size)?;
            out[offset..offset + header.name.len()].copy_from_slice(header.name.as_bytes());
            offset = start + StreamHeader::encoded_size(&header.name);
        }

        Ok(out)
    }
}
