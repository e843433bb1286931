//! Low-level byte order and safe reading/writing utilities for PE and metadata structures.
//!
//! Everything in a .NET image is little-endian, so this module only carries the little-endian
//! half of the usual helpers, plus the ECMA-335 compressed integer encoders used when
//! signatures and blob heap entries are written back.
//!
//! # Key Components
//!
//! - [`crate::file::io::CilIO`] - Trait defining endian-aware conversions for primitive types
//! - [`crate::file::io::read_le`] / [`crate::file::io::read_le_at`] - Bounds-checked reads
//! - [`crate::file::io::read_le_at_dyn`] - 2 or 4 byte index reads, used by the tables stream
//! - [`crate::file::io::write_le_at`] / [`crate::file::io::write_le_at_dyn`] - In-place writes
//! - [`crate::file::io::write_compressed_uint`] - ECMA-335 II.23.2 compressed integers
//!
//! All reading and writing functions return [`crate::Result<T>`] and will return
//! [`crate::Error::OutOfBounds`] if the operation would exceed buffer boundaries.

use crate::{Error::OutOfBounds, Result};

/// Trait for implementing type-specific safe binary data reading and writing operations.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size
/// byte array required for that particular type (e.g., `[u8; 4]` for `u32`).
pub trait CilIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]> + AsRef<[u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cil_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl CilIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cil_io! {
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
    f32 => 4,
    f64 => 8,
}

/// Safely reads a value of type `T` in little-endian byte order from the start of a buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing it.
///
/// # Arguments
///
/// * `data` - The byte buffer to read from
/// * `offset` - Mutable reference to the offset position (will be advanced after reading)
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;

    Ok(T::from_le_bytes(read))
}

/// Dynamically reads either a 2-byte or 4-byte value in little-endian byte order.
///
/// Metadata table columns that index heaps or other tables are 2 bytes wide unless the
/// referenced heap or table is large, in which case they are 4 bytes wide.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    let res = if is_large {
        read_le_at::<u32>(data, offset)?
    } else {
        u32::from(read_le_at::<u16>(data, offset)?)
    };

    Ok(res)
}

/// Writes `value` in little-endian byte order at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();

    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;

    Ok(())
}

/// Writes either a 2-byte or 4-byte index in little-endian byte order, advancing `offset`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small, or
/// [`crate::Error::Malformed`] if a value does not fit into a small index.
pub fn write_le_at_dyn(data: &mut [u8], offset: &mut usize, value: u32, is_large: bool) -> Result<()> {
    if is_large {
        write_le_at(data, offset, value)
    } else {
        let Ok(small) = u16::try_from(value) else {
            return Err(malformed_error!("Value {} does not fit a 2-byte index", value));
        };
        write_le_at(data, offset, small)
    }
}

/// Appends an ECMA-335 compressed unsigned integer to `out`.
///
/// Values up to `0x7F` take one byte, up to `0x3FFF` two bytes and up to `0x1FFF_FFFF`
/// four bytes.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for values above `0x1FFF_FFFF`.
pub fn write_compressed_uint(out: &mut Vec<u8>, value: u32) -> Result<()> {
    match value {
        0..=0x7F => out.push(value as u8),
        0x80..=0x3FFF => {
            out.push(0x80 | (value >> 8) as u8);
            out.push((value & 0xFF) as u8);
        }
        0x4000..=0x1FFF_FFFF => {
            out.push(0xC0 | (value >> 24) as u8);
            out.push(((value >> 16) & 0xFF) as u8);
            out.push(((value >> 8) & 0xFF) as u8);
            out.push((value & 0xFF) as u8);
        }
        _ => return Err(malformed_error!("Value too large for compressed uint - {}", value)),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_u32() {
        let result = read_le::<u32>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0403_0201);
    }

    #[test]
    fn read_le_at_advances() {
        let mut offset = 2;
        let value: u16 = read_le_at(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(value, 0x0403);
        assert_eq!(offset, 4);
    }

    #[test]
    fn read_dyn() {
        let mut offset = 0;
        assert_eq!(read_le_at_dyn(&TEST_BUFFER, &mut offset, false).unwrap(), 0x0201);
        assert_eq!(read_le_at_dyn(&TEST_BUFFER, &mut offset, true).unwrap(), 0x0605_0403);
        assert_eq!(offset, 6);
    }

    #[test]
    fn errors() {
        let buffer = [0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(read_le::<u64>(&buffer), Err(Error::OutOfBounds)));

        let mut offset = usize::MAX;
        assert!(matches!(read_le_at::<u8>(&buffer, &mut offset), Err(Error::OutOfBounds)));
    }

    #[test]
    fn write_in_place() {
        let mut buffer = [0u8; 6];
        let mut offset = 0;
        write_le_at(&mut buffer, &mut offset, 0xAABB_u16).unwrap();
        write_le_at_dyn(&mut buffer, &mut offset, 0x1122_3344, true).unwrap();
        assert_eq!(buffer, [0xBB, 0xAA, 0x44, 0x33, 0x22, 0x11]);
        assert!(write_le_at(&mut buffer, &mut offset, 1u8).is_err());
    }

    #[test]
    fn write_dyn_rejects_wide_small_index() {
        let mut buffer = [0u8; 4];
        let mut offset = 0;
        assert!(write_le_at_dyn(&mut buffer, &mut offset, 0x1_0000, false).is_err());
    }

    #[test]
    fn compressed_uint_examples() {
        // ECMA-335 II.23.2 examples
        let cases: [(u32, &[u8]); 6] = [
            (0x03, &[0x03]),
            (0x7F, &[0x7F]),
            (0x80, &[0x80, 0x80]),
            (0x2E57, &[0xAE, 0x57]),
            (0x3FFF, &[0xBF, 0xFF]),
            (0x4000, &[0xC0, 0x00, 0x40, 0x00]),
        ];
        for (value, expected) in cases {
            let mut out = Vec::new();
            write_compressed_uint(&mut out, value).unwrap();
            assert_eq!(out, expected, "value {value:#x}");
        }

        assert!(write_compressed_uint(&mut Vec::new(), 0x2000_0000).is_err());
    }
}
