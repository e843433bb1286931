//! Image generation and file replacement.
//!
//! The patched image is the original image plus one appended section. The section holds the
//! re-encoded method bodies followed by the complete, re-serialized metadata; the CLR header
//! and the `RVA` column of every rewritten `MethodDef` are pointed at it. Nothing in the
//! original sections moves, so no other RVA in the image needs fixing.
//!
//! ```text
//! ┌──────────────┐
//! │ headers      │  +1 section header, SizeOfImage, SizeOfCode, CheckSum = 0
//! ├──────────────┤
//! │ .text ...    │  unchanged, CLR header updated in place
//! ├──────────────┤
//! │ .patch       │  bodies (4-aligned) | metadata
//! └──────────────┘
//! ```
//!
//! Any strong name or Authenticode signature is invalidated by the edit, so the
//! strong-name flag and the certificate directory are cleared.

use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::{
    cilassembly::CilAssembly,
    file::{
        io::{read_le_at, write_le_at},
        File,
    },
    metadata::tables::{col, TableId},
    Error, Result,
};

const SECTION_NAME: [u8; 8] = *b".patch\0\0";
/// `CNT_CODE | MEM_EXECUTE | MEM_READ`
const SECTION_CHARACTERISTICS: u32 = 0x6000_0020;
const SECTION_HEADER_SIZE: usize = 40;
const DEBUG_ENTRY_SIZE: usize = 28;
const DIRECTORY_CERTIFICATE: usize = 4;
const DIRECTORY_DEBUG: usize = 6;
const COMIMAGE_FLAGS_STRONGNAMESIGNED: u32 = 0x08;

/// Builds the patched image of `assembly`.
pub(super) fn write_image(assembly: &CilAssembly) -> Result<Vec<u8>> {
    let file = &assembly.file;
    let (file_alignment, section_alignment) = file.alignments();
    let file_alignment = file_alignment as usize;
    let section_alignment = section_alignment as usize;
    if !file_alignment.is_power_of_two() || !section_alignment.is_power_of_two() {
        return Err(malformed_error!(
            "Invalid alignments - file {:#x}, section {:#x}",
            file_alignment,
            section_alignment
        ));
    }

    let sections = file.sections();
    let section_rva = sections
        .iter()
        .map(|section| {
            let size = section.virtual_size.max(section.size_of_raw_data);
            align(section.virtual_address as usize + size as usize, section_alignment)
        })
        .max()
        .unwrap_or_else(|| align(file.size_of_headers() as usize, section_alignment));

    // Payload: bodies first, so their RVAs are known before the metadata is encoded
    let mut metadata = assembly.metadata.clone();
    let mut payload = Vec::new();
    for (row, body) in &assembly.bodies {
        pad(&mut payload, 4);
        let rva = to_u32(section_rva + payload.len())?;
        metadata
            .tables
            .set_value(TableId::MethodDef, *row, col::methoddef::RVA, rva)?;
        payload.extend_from_slice(&body.encode()?);
    }
    pad(&mut payload, 4);
    let metadata_rva = to_u32(section_rva + payload.len())?;
    let encoded = metadata.serialize()?;
    let metadata_size = to_u32(encoded.len())?;
    payload.extend_from_slice(&encoded);

    let mut data = file.data().to_vec();
    let shift = grow_headers(assembly, &mut data, file_alignment)?;

    let raw_pointer = align(data.len(), file_alignment);
    let raw_size = align(payload.len(), file_alignment);

    let header = file.section_table_offset() + sections.len() * SECTION_HEADER_SIZE;
    data[header..header + 8].copy_from_slice(&SECTION_NAME);
    let mut offset = header + 8;
    write_le_at(&mut data, &mut offset, to_u32(payload.len())?)?;
    write_le_at(&mut data, &mut offset, to_u32(section_rva)?)?;
    write_le_at(&mut data, &mut offset, to_u32(raw_size)?)?;
    write_le_at(&mut data, &mut offset, to_u32(raw_pointer)?)?;
    write_le_at(&mut data, &mut offset, 0_u32)?;
    write_le_at(&mut data, &mut offset, 0_u32)?;
    write_le_at(&mut data, &mut offset, 0_u16)?;
    write_le_at(&mut data, &mut offset, 0_u16)?;
    write_le_at(&mut data, &mut offset, SECTION_CHARACTERISTICS)?;

    let Ok(section_count) = u16::try_from(sections.len() + 1) else {
        return Err(malformed_error!("Too many sections"));
    };
    let mut offset = file.pe_signature_offset() + 4 + 2;
    write_le_at(&mut data, &mut offset, section_count)?;

    let optional = file.optional_header_offset();
    add_u32(&mut data, optional + 4, to_u32(raw_size)?)?;
    let mut offset = optional + 56;
    write_le_at(
        &mut data,
        &mut offset,
        to_u32(align(section_rva + payload.len(), section_alignment))?,
    )?;
    let mut offset = optional + 64;
    write_le_at(&mut data, &mut offset, 0_u32)?;

    if directory_count(file, &data)? > DIRECTORY_CERTIFICATE {
        let mut offset = directory_offset(file, DIRECTORY_CERTIFICATE);
        write_le_at(&mut data, &mut offset, 0_u64)?;
    }

    let clr = assembly.clr_offset + shift;
    let mut offset = clr + 8;
    write_le_at(&mut data, &mut offset, metadata_rva)?;
    write_le_at(&mut data, &mut offset, metadata_size)?;
    let flags = assembly.cor20.flags & !COMIMAGE_FLAGS_STRONGNAMESIGNED;
    write_le_at(&mut data, &mut offset, flags)?;

    data.resize(raw_pointer, 0);
    data.extend_from_slice(&payload);
    data.resize(raw_pointer + raw_size, 0);

    Ok(data)
}

/// Makes room for one more section header, shifting all section data if the header area
/// is full. Returns the number of bytes section data moved by.
fn grow_headers(
    assembly: &CilAssembly,
    data: &mut Vec<u8>,
    file_alignment: usize,
) -> Result<usize> {
    let file = &assembly.file;
    let sections = file.sections();
    let table = file.section_table_offset();
    let needed = table + (sections.len() + 1) * SECTION_HEADER_SIZE;
    let old_headers = file.size_of_headers() as usize;

    if needed <= old_headers {
        let Some(slot) = data.get(needed - SECTION_HEADER_SIZE..needed) else {
            return Err(Error::OutOfBounds);
        };
        if slot.iter().any(|byte| *byte != 0) {
            return Err(malformed_error!("No free slot after the section table"));
        }
        return Ok(0);
    }

    let new_headers = align(needed, file_alignment);
    let first_section = sections
        .iter()
        .map(|section| section.virtual_address as usize)
        .min()
        .unwrap_or(usize::MAX);
    if new_headers > first_section || old_headers > data.len() {
        return Err(malformed_error!(
            "No room for another section header - need {:#x} bytes of headers",
            new_headers
        ));
    }

    let shift = new_headers - old_headers;
    data.splice(old_headers..old_headers, std::iter::repeat(0).take(shift));

    let mut offset = file.optional_header_offset() + 60;
    write_le_at(data, &mut offset, to_u32(new_headers)?)?;

    for index in 0..sections.len() {
        let pointer = table + index * SECTION_HEADER_SIZE + 20;
        let mut offset = pointer;
        if read_le_at::<u32>(data, &mut offset)? != 0 {
            add_u32(data, pointer, to_u32(shift)?)?;
        }
    }

    if directory_count(file, data)? > DIRECTORY_DEBUG {
        let mut offset = directory_offset(file, DIRECTORY_DEBUG);
        let rva = read_le_at::<u32>(data, &mut offset)?;
        let size = read_le_at::<u32>(data, &mut offset)? as usize;
        if rva != 0 {
            let start = file.rva_to_offset(rva as usize)? + shift;
            for entry in 0..size / DEBUG_ENTRY_SIZE {
                let pointer = start + entry * DEBUG_ENTRY_SIZE + 24;
                let mut offset = pointer;
                if read_le_at::<u32>(data, &mut offset)? != 0 {
                    add_u32(data, pointer, to_u32(shift)?)?;
                }
            }
        }
    }

    log::debug!(
        target: "repolib_patcher",
        "[{}] grew headers to {:#x}, section data moved by {:#x}",
        assembly.module_name,
        new_headers,
        shift
    );
    Ok(shift)
}

fn directory_offset(file: &File, index: usize) -> usize {
    let start = if file.is_pe32_plus() { 112 } else { 96 };
    file.optional_header_offset() + start + index * 8
}

fn directory_count(file: &File, data: &[u8]) -> Result<usize> {
    let mut offset = directory_offset(file, 0) - 4;
    Ok(read_le_at::<u32>(data, &mut offset)? as usize)
}

fn add_u32(data: &mut [u8], at: usize, value: u32) -> Result<()> {
    let mut offset = at;
    let current = read_le_at::<u32>(data, &mut offset)?;
    let Some(sum) = current.checked_add(value) else {
        return Err(malformed_error!("Header field overflow at {:#x}", at));
    };
    let mut offset = at;
    write_le_at(data, &mut offset, sum)
}

fn align(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

fn pad(buffer: &mut Vec<u8>, alignment: usize) {
    buffer.resize(align(buffer.len(), alignment), 0);
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed_error!("Image exceeds 4GB - {:#x}", value))
}

/// Replaces `target` with `data` through a temporary sibling file.
pub(super) fn replace_file(target: &Path, data: &[u8]) -> Result<()> {
    let mut output = Output::create(target, data.len())?;
    output.as_mut_slice().copy_from_slice(data);
    output.finalize()
}

/// A memory-mapped temporary file that replaces its target when finalized.
///
/// The temporary file lives next to the target so the final rename stays on one file
/// system. Dropping an unfinalized output deletes the temporary file and leaves the target
/// untouched.
struct Output {
    mmap: Option<MmapMut>,
    temp_path: PathBuf,
    target_path: PathBuf,
    finalized: bool,
}

impl Output {
    fn create(target: &Path, size: usize) -> Result<Output> {
        let Some(file_name) = target.file_name() else {
            return Err(Error::WriteFailed {
                message: format!("{} is not a file path", target.display()),
            });
        };
        let temp_path =
            target.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|error| Error::WriteFailed {
                message: format!("Failed to create {}: {error}", temp_path.display()),
            })?;

        let mut output = Output {
            mmap: None,
            temp_path,
            target_path: target.to_path_buf(),
            finalized: false,
        };

        file.set_len(size as u64).map_err(|error| Error::WriteFailed {
            message: format!("Failed to set file size: {error}"),
        })?;

        // SAFETY: the temporary file was created by this process and is not shared
        let mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(|error| {
            Error::WriteFailed {
                message: format!("Failed to create memory mapping: {error}"),
            }
        })?;
        output.mmap = Some(mmap);

        Ok(output)
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.mmap {
            Some(mmap) => &mut mmap[..],
            None => &mut [],
        }
    }

    fn finalize(mut self) -> Result<()> {
        if let Some(mmap) = self.mmap.take() {
            mmap.flush().map_err(|error| Error::WriteFailed {
                message: format!("Failed to flush memory mapping: {error}"),
            })?;
        }

        std::fs::rename(&self.temp_path, &self.target_path).map_err(|error| {
            Error::WriteFailed {
                message: format!(
                    "Failed to replace {}: {error}",
                    self.target_path.display()
                ),
            }
        })?;

        self.finalized = true;
        Ok(())
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if !self.finalized {
            self.mmap = None;
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment() {
        assert_eq!(align(0, 0x200), 0);
        assert_eq!(align(1, 0x200), 0x200);
        assert_eq!(align(0x200, 0x200), 0x200);
        assert_eq!(align(0x2001, 0x2000), 0x4000);
    }

    #[test]
    fn replace_file_overwrites_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("Plugin.dll");
        std::fs::write(&target, b"old contents").unwrap();

        replace_file(&target, b"new").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert!(!dir.path().join(".Plugin.dll.tmp").exists());
    }

    #[test]
    fn unfinalized_output_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("Plugin.dll");
        std::fs::write(&target, b"original").unwrap();

        {
            let mut output = Output::create(&target, 4).unwrap();
            output.as_mut_slice().copy_from_slice(b"half");
        }

        assert_eq!(std::fs::read(&target).unwrap(), b"original");
        assert!(!dir.path().join(".Plugin.dll.tmp").exists());
    }
}
