//! The `#~` (or uncompressed `#-`) tables stream.
//!
//! The stream is decoded into owned rows of raw column values, so that rows can be appended
//! and values patched before the whole stream is encoded again. Column widths depend on row
//! counts and heap sizes, and are recomputed from scratch on every encode.
//!
//! ## Reference
//! * ECMA-335 Partition II, Section 24.2.6 - #~ stream

use strum::{EnumCount, IntoEnumIterator};

use crate::{
    file::io::{read_le, read_le_at, read_le_at_dyn, write_le_at, write_le_at_dyn},
    metadata::tables::{columns, row_size, ColumnKind, TableId, TableInfo},
    Error::{NotSupported, OutOfBounds},
    Result,
};

/// Heap-size flag: `#Strings` indices are 4 bytes wide
pub const HEAP_LARGE_STRINGS: u8 = 0x01;
/// Heap-size flag: `#GUID` indices are 4 bytes wide
pub const HEAP_LARGE_GUID: u8 = 0x02;
/// Heap-size flag: `#Blob` indices are 4 bytes wide
pub const HEAP_LARGE_BLOB: u8 = 0x04;
/// Heap-size flag: four bytes of extra data follow the row counts
const HEAP_EXTRA_DATA: u8 = 0x40;

/// Rows of one table, stored as a flat vector of column values.
#[derive(Clone, Debug, Default)]
struct TableRows {
    columns: usize,
    values: Vec<u32>,
}

impl TableRows {
    fn count(&self) -> u32 {
        if self.columns == 0 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation)]
        let count = (self.values.len() / self.columns) as u32;
        count
    }
}

/// Owned representation of the metadata tables stream.
///
/// Row numbers are 1-based, matching metadata tokens.
///
/// # Examples
///
/// ```rust,ignore
/// let tables = TablesHeader::from(stream_data)?;
/// for (row, values) in tables.rows(TableId::TypeDef) {
///     println!("TypeDef {} flags {:#x}", row, values[0]);
/// }
/// ```
#[derive(Clone, Debug)]
pub struct TablesHeader {
    /// Major version of the table schema, 2 for all current runtimes
    pub major_version: u8,
    /// Minor version of the table schema
    pub minor_version: u8,
    /// Bit vector of tables that the producer declared sorted
    pub sorted: u64,
    heap_sizes: u8,
    tables: Vec<TableRows>,
}

impl TablesHeader {
    /// Decodes a tables stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated streams and
    /// [`crate::Error::NotSupported`] if tables beyond `GenericParamConstraint` are present.
    pub fn from(data: &[u8]) -> Result<TablesHeader> {
        if data.len() < 24 {
            return Err(OutOfBounds);
        }

        let major_version = read_le::<u8>(&data[4..])?;
        let minor_version = read_le::<u8>(&data[5..])?;
        let heap_sizes = read_le::<u8>(&data[6..])?;
        let valid = read_le::<u64>(&data[8..])?;
        let sorted = read_le::<u64>(&data[16..])?;

        if valid == 0 {
            return Err(malformed_error!("No valid rows in any of the tables"));
        }
        if valid >> TableId::COUNT != 0 {
            return Err(NotSupported);
        }

        let mut offset = 24;
        let mut row_counts = vec![0_u32; TableId::COUNT];
        for table_id in TableId::iter() {
            if valid & (1 << table_id as u64) != 0 {
                row_counts[table_id as usize] = read_le_at::<u32>(data, &mut offset)?;
            }
        }

        if heap_sizes & HEAP_EXTRA_DATA != 0 {
            offset += 4;
        }

        let info = TableInfo::new(&row_counts, heap_sizes);
        let mut tables = Vec::with_capacity(TableId::COUNT);

        for table_id in TableId::iter() {
            let layout = columns(table_id);
            let count = row_counts[table_id as usize] as usize;

            let Some(needed) = count.checked_mul(row_size(table_id, &info)) else {
                return Err(OutOfBounds);
            };
            if offset + needed > data.len() {
                return Err(OutOfBounds);
            }

            let mut values = Vec::with_capacity(count * layout.len());
            for _ in 0..count {
                for column in layout {
                    let value = match column.size(&info) {
                        1 => u32::from(read_le_at::<u8>(data, &mut offset)?),
                        2 => read_le_at_dyn(data, &mut offset, false)?,
                        _ => read_le_at_dyn(data, &mut offset, true)?,
                    };
                    values.push(value);
                }
            }

            tables.push(TableRows {
                columns: layout.len(),
                values,
            });
        }

        Ok(TablesHeader {
            major_version,
            minor_version,
            sorted,
            heap_sizes,
            tables,
        })
    }

    /// Creates an empty tables stream (schema 2.0).
    #[must_use]
    pub fn new() -> TablesHeader {
        TablesHeader {
            major_version: 2,
            minor_version: 0,
            sorted: 0x0000_1600_3301_FA00,
            heap_sizes: 0,
            tables: TableId::iter()
                .map(|table| TableRows {
                    columns: columns(table).len(),
                    values: Vec::new(),
                })
                .collect(),
        }
    }

    /// Number of rows in `table`.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.tables[table as usize].count()
    }

    /// Returns the column values of `row` (1-based) in `table`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the row does not exist.
    pub fn row(&self, table: TableId, row: u32) -> Result<&[u32]> {
        let rows = &self.tables[table as usize];
        if row == 0 || row > rows.count() {
            return Err(OutOfBounds);
        }

        let start = (row as usize - 1) * rows.columns;
        Ok(&rows.values[start..start + rows.columns])
    }

    /// Returns a single column value.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the row or column does not exist.
    pub fn value(&self, table: TableId, row: u32, column: usize) -> Result<u32> {
        self.row(table, row)?
            .get(column)
            .copied()
            .ok_or(OutOfBounds)
    }

    /// Overwrites a single column value.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the row or column does not exist.
    pub fn set_value(&mut self, table: TableId, row: u32, column: usize, value: u32) -> Result<()> {
        let rows = &mut self.tables[table as usize];
        if row == 0 || row > rows.count() || column >= rows.columns {
            return Err(OutOfBounds);
        }

        rows.values[(row as usize - 1) * rows.columns + column] = value;
        Ok(())
    }

    /// Appends a row and returns its 1-based row number.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `values` does not match the table layout.
    pub fn push_row(&mut self, table: TableId, values: &[u32]) -> Result<u32> {
        let rows = &mut self.tables[table as usize];
        if values.len() != rows.columns {
            return Err(malformed_error!(
                "{:?} row needs {} columns, got {}",
                table,
                rows.columns,
                values.len()
            ));
        }

        rows.values.extend_from_slice(values);
        Ok(rows.count())
    }

    /// Iterates over `(row, values)` pairs of `table`.
    pub fn rows(&self, table: TableId) -> impl Iterator<Item = (u32, &[u32])> {
        let rows = &self.tables[table as usize];
        // `max(1)` keeps chunks_exact valid for the never-empty schema
        rows.values
            .chunks_exact(rows.columns.max(1))
            .enumerate()
            .map(|(index, values)| {
                #[allow(clippy::cast_possible_truncation)]
                let row = index as u32 + 1;
                (row, values)
            })
    }

    /// Encodes the stream with index widths recomputed for the current row counts.
    ///
    /// `heap_sizes` carries the large-heap flags matching the heaps this stream will be
    /// written next to. The result is padded to a multiple of four bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a value does not fit its column.
    pub fn serialize(&self, heap_sizes: u8) -> Result<Vec<u8>> {
        let heap_flags = (self.heap_sizes & !(HEAP_LARGE_STRINGS
            | HEAP_LARGE_GUID
            | HEAP_LARGE_BLOB
            | HEAP_EXTRA_DATA))
            | (heap_sizes & (HEAP_LARGE_STRINGS | HEAP_LARGE_GUID | HEAP_LARGE_BLOB));

        let row_counts: Vec<u32> = TableId::iter().map(|t| self.row_count(t)).collect();
        let info = TableInfo::new(&row_counts, heap_flags);

        let mut valid = 0_u64;
        for table_id in TableId::iter() {
            if row_counts[table_id as usize] > 0 {
                valid |= 1 << table_id as u64;
            }
        }

        let header_size = 24 + 4 * valid.count_ones() as usize;
        let body_size: usize = TableId::iter()
            .map(|t| row_counts[t as usize] as usize * row_size(t, &info))
            .sum();
        let total = (header_size + body_size + 3) & !3;

        let mut out = vec![0_u8; total];
        let mut offset = 0;
        write_le_at(&mut out, &mut offset, 0_u32)?;
        write_le_at(&mut out, &mut offset, self.major_version)?;
        write_le_at(&mut out, &mut offset, self.minor_version)?;
        write_le_at(&mut out, &mut offset, heap_flags)?;
        write_le_at(&mut out, &mut offset, 1_u8)?;
        write_le_at(&mut out, &mut offset, valid)?;
        write_le_at(&mut out, &mut offset, self.sorted)?;

        for table_id in TableId::iter() {
            if row_counts[table_id as usize] > 0 {
                write_le_at(&mut out, &mut offset, row_counts[table_id as usize])?;
            }
        }

        for table_id in TableId::iter() {
            let layout = columns(table_id);
            for (_, values) in self.rows(table_id) {
                for (column, value) in layout.iter().zip(values) {
                    write_column(&mut out, &mut offset, *column, *value, &info)?;
                }
            }
        }

        Ok(out)
    }
}

impl Default for TablesHeader {
    fn default() -> Self {
        Self::new()
    }
}

fn write_column(
    out: &mut [u8],
    offset: &mut usize,
    column: ColumnKind,
    value: u32,
    info: &TableInfo,
) -> Result<()> {
    match column.size(info) {
        1 => {
            let Ok(byte) = u8::try_from(value) else {
                return Err(malformed_error!("Value {} does not fit a 1-byte column", value));
            };
            write_le_at(out, offset, byte)
        }
        2 => write_le_at_dyn(out, offset, value, false),
        _ => write_le_at_dyn(out, offset, value, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tables::col;

    fn sample() -> TablesHeader {
        let mut tables = TablesHeader::new();
        tables.push_row(TableId::Module, &[0, 10, 1, 0, 0]).unwrap();
        tables.push_row(TableId::TypeRef, &[(1 << 2) | 2, 20, 30]).unwrap();
        tables
            .push_row(TableId::TypeDef, &[0, 1, 0, 0, 1, 1])
            .unwrap();
        tables
            .push_row(TableId::MethodDef, &[0x2050, 0, 0x96, 40, 1, 1])
            .unwrap();
        tables
            .push_row(TableId::AssemblyRef, &[1, 0, 0, 0, 0, 0, 50, 0, 0])
            .unwrap();
        tables
    }

    #[test]
    fn serialize_and_reparse() {
        let tables = sample();
        let data = tables.serialize(0).unwrap();
        assert_eq!(data.len() % 4, 0);

        let parsed = TablesHeader::from(&data).unwrap();
        assert_eq!(parsed.row_count(TableId::Module), 1);
        assert_eq!(parsed.row_count(TableId::TypeRef), 1);
        assert_eq!(parsed.row_count(TableId::MemberRef), 0);
        assert_eq!(
            parsed
                .value(TableId::MethodDef, 1, col::methoddef::RVA)
                .unwrap(),
            0x2050
        );
        assert_eq!(parsed.row(TableId::TypeRef, 1).unwrap(), &[(1 << 2) | 2, 20, 30]);
    }

    #[test]
    fn large_heaps_are_encoded() {
        let tables = sample();
        let data = tables.serialize(HEAP_LARGE_STRINGS).unwrap();
        assert_eq!(data[6] & HEAP_LARGE_STRINGS, HEAP_LARGE_STRINGS);

        let parsed = TablesHeader::from(&data).unwrap();
        assert_eq!(parsed.value(TableId::TypeRef, 1, col::typeref::NAME).unwrap(), 20);
    }

    #[test]
    fn push_and_patch() {
        let mut tables = sample();
        let row = tables.push_row(TableId::MemberRef, &[9, 60, 70]).unwrap();
        assert_eq!(row, 1);
        tables
            .set_value(TableId::MemberRef, 1, col::memberref::NAME, 61)
            .unwrap();
        assert_eq!(tables.value(TableId::MemberRef, 1, 1).unwrap(), 61);

        assert!(tables.push_row(TableId::MemberRef, &[1, 2]).is_err());
        assert!(tables.set_value(TableId::MemberRef, 2, 0, 0).is_err());
        assert!(tables.row(TableId::MemberRef, 0).is_err());
    }

    #[test]
    fn truncated_stream() {
        let data = sample().serialize(0).unwrap();
        assert!(TablesHeader::from(&data[..30]).is_err());
        assert!(TablesHeader::from(&data[..10]).is_err());
    }

    #[test]
    fn one_byte_column_overflow() {
        let mut tables = TablesHeader::new();
        tables.push_row(TableId::Module, &[0, 0, 0, 0, 0]).unwrap();
        tables.push_row(TableId::Constant, &[0x100, 0, 0, 0]).unwrap();
        assert!(tables.serialize(0).is_err());
    }
}
