//! PE file access for .NET assemblies.
//!
//! [`crate::file::File`] couples a data source ([`crate::file::Backend`]) with the `goblin`
//! PE parse of that data. The parse borrows from the backend, so the pair is held together
//! with `ouroboros`. On top of the parsed headers it offers the address translation and raw
//! header offsets the metadata reader and the image writer need.
//!
//! # Key Components
//!
//! - [`crate::file::File`] - Parsed PE image with CLR runtime header
//! - [`crate::file::Backend`] - Data source abstraction
//! - [`crate::file::parser::Parser`] - Cursor used by all binary decoders
//! - [`crate::file::io`] - Little-endian and compressed integer helpers

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use goblin::pe::{data_directories::DataDirectoryType, section_table::SectionTable, PE};
use memory::Memory;
use ouroboros::self_referencing;
use physical::Physical;

use crate::{
    Error::{Empty, GoblinErr, OutOfBounds},
    Result,
};

/// Backend trait for file data sources.
///
/// Implemented by the memory-mapped [`Physical`] backend used for read-only access and the
/// owned [`Memory`] backend used when an assembly is opened for rewriting.
pub trait Backend: Send + Sync {
    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let data = self.data();
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(OutOfBounds);
        };

        data.get(offset..offset_end).ok_or(OutOfBounds)
    }

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize {
        self.data().len()
    }
}

#[self_referencing]
/// Represents a loaded PE file with .NET metadata.
///
/// Loading fails unless the image has an optional header and a CLR runtime header
/// directory, so every accessor can rely on both being present.
///
/// # Examples
///
/// ```rust,no_run
/// use repolib_patcher::File;
/// use std::path::Path;
///
/// let file = File::from_file(Path::new("BepInEx/plugins/SomeMod.dll"))?;
/// let (clr_rva, clr_size) = file.clr();
/// let clr_offset = file.rva_to_offset(clr_rva)?;
/// println!("CLI header at 0x{:x} ({} bytes)", clr_offset, clr_size);
/// # Ok::<(), repolib_patcher::Error>(())
/// ```
pub struct File {
    /// The underlying data source
    data: Box<dyn Backend>,
    /// The parsed PE structure
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Loads a PE file from the given path using a read-only memory mapping.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid .NET PE image.
    pub fn from_file(file: &Path) -> Result<File> {
        Self::load(Physical::new(file)?)
    }

    /// Reads a PE file fully into memory.
    ///
    /// The returned [`File`] holds no handle on `file`, so the path can be overwritten while
    /// it is alive.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid .NET PE image.
    pub fn from_file_owned(file: &Path) -> Result<File> {
        Self::load(Memory::read(file)?)
    }

    /// Loads a PE file from a memory buffer.
    ///
    /// # Errors
    /// Returns an error if the buffer is empty or not a valid .NET PE image.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        Self::load(Memory::new(data))
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let data: Box<dyn Backend> = Box::new(data);

        File::try_new(data, |data| match PE::parse(data.data()) {
            Ok(pe) => match pe.header.optional_header {
                Some(optional_header) => {
                    let has_clr = optional_header
                        .data_directories
                        .dirs()
                        .any(|(dir_type, dir)| {
                            dir_type == DataDirectoryType::ClrRuntimeHeader
                                && dir.virtual_address != 0
                        });
                    if has_clr {
                        Ok(pe)
                    } else {
                        Err(malformed_error!(
                            "File does not have a CLR runtime header directory"
                        ))
                    }
                }
                None => Err(malformed_error!("File does not have an OptionalHeader")),
            },
            Err(error) => Err(GoblinErr(error)),
        })
    }

    /// Returns the total size of the loaded file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns true if the file has a length of zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Returns the full raw image.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// Returns `len` bytes starting at file offset `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the image.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }

    /// Returns the RVA and size of the CLR runtime header.
    #[must_use]
    pub fn clr(&self) -> (usize, usize) {
        self.get_data_directory(DataDirectoryType::ClrRuntimeHeader)
            .map_or((0, 0), |(rva, size)| (rva as usize, size as usize))
    }

    /// Returns the section headers of the image.
    #[must_use]
    pub fn sections(&self) -> &[SectionTable] {
        self.with_pe(|pe| pe.sections.as_slice())
    }

    /// Returns the RVA and size of a data directory entry, if present and non-empty.
    #[must_use]
    pub fn get_data_directory(&self, dir_type: DataDirectoryType) -> Option<(u32, u32)> {
        self.with_pe(|pe| {
            pe.header.optional_header.and_then(|optional_header| {
                optional_header
                    .data_directories
                    .dirs()
                    .find(|(directory_type, directory)| {
                        *directory_type == dir_type
                            && directory.virtual_address != 0
                            && directory.size != 0
                    })
                    .map(|(_, directory)| (directory.virtual_address, directory.size))
            })
        })
    }

    /// Returns `(file_alignment, section_alignment)` from the optional header.
    #[must_use]
    pub fn alignments(&self) -> (u32, u32) {
        self.with_pe(|pe| {
            pe.header.optional_header.map_or((0x200, 0x2000), |optional_header| {
                (
                    optional_header.windows_fields.file_alignment,
                    optional_header.windows_fields.section_alignment,
                )
            })
        })
    }

    /// Returns the `SizeOfHeaders` field of the optional header.
    #[must_use]
    pub fn size_of_headers(&self) -> u32 {
        self.with_pe(|pe| {
            pe.header
                .optional_header
                .map_or(0, |optional_header| optional_header.windows_fields.size_of_headers)
        })
    }

    /// Returns true if the optional header is in PE32+ format.
    #[must_use]
    pub fn is_pe32_plus(&self) -> bool {
        self.with_pe(|pe| {
            pe.header
                .optional_header
                .is_some_and(|optional_header| optional_header.standard_fields.magic != 0x10b)
        })
    }

    /// Returns the file offset of the `PE\0\0` signature, read from `e_lfanew`.
    #[must_use]
    pub fn pe_signature_offset(&self) -> usize {
        self.with_pe(|pe| pe.header.dos_header.pe_pointer as usize)
    }

    /// Returns the file offset of the optional header.
    #[must_use]
    pub fn optional_header_offset(&self) -> usize {
        // PE signature (4) + COFF header (20)
        self.pe_signature_offset() + 4 + 20
    }

    /// Returns the file offset of the first section header.
    #[must_use]
    pub fn section_table_offset(&self) -> usize {
        let optional_size = self.with_pe(|pe| pe.header.coff_header.size_of_optional_header);
        self.optional_header_offset() + usize::from(optional_size)
    }

    /// Converts a relative virtual address to a file offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no section contains the RVA.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        for section in self.sections() {
            let start = section.virtual_address as usize;
            let size = section.virtual_size.max(section.size_of_raw_data) as usize;
            let Some(end) = start.checked_add(size) else {
                return Err(malformed_error!(
                    "Section malformed, causing integer overflow - {} + {}",
                    start,
                    size
                ));
            };

            if start <= rva && rva < end {
                return Ok(rva - start + section.pointer_to_raw_data as usize);
            }
        }

        Err(malformed_error!("RVA could not be converted to offset - {}", rva))
    }

    /// Converts a file offset to a relative virtual address.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if no section contains the offset.
    pub fn offset_to_rva(&self, offset: usize) -> Result<usize> {
        for section in self.sections() {
            let start = section.pointer_to_raw_data as usize;
            let Some(end) = start.checked_add(section.size_of_raw_data as usize) else {
                return Err(malformed_error!(
                    "Section malformed, causing integer overflow - {} + {}",
                    start,
                    section.size_of_raw_data
                ));
            };

            if start <= offset && offset < end {
                return Ok(offset - start + section.virtual_address as usize);
            }
        }

        Err(malformed_error!("Offset could not be converted to RVA - {}", offset))
    }
}
