use strum::{EnumCount, IntoEnumIterator};

use crate::metadata::tables::{CodedIndexType, TableId};

/// Row count and index width information for one metadata table.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct TableRowInfo {
    /// Number of rows in the table
    pub rows: u32,
    /// Bits needed to address any row
    pub bits: u8,
    /// Whether an index into this table needs 4 bytes
    pub is_large: bool,
}

impl TableRowInfo {
    /// Creates the row info for a table with `rows` rows.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(rows: u32) -> Self {
        let bits = if rows == 0 {
            1
        } else {
            (32 - rows.leading_zeros()) as u8
        };

        Self {
            rows,
            bits,
            is_large: rows > u32::from(u16::MAX),
        }
    }
}

/// Index widths for every table column kind, derived from row counts and heap sizes.
///
/// Column widths in the tables stream are not fixed: table and coded indices grow to four
/// bytes once the referenced tables are large, and heap indices grow once the heap-size
/// flags are set. The same calculation serves decoding (counts from the header) and
/// encoding (counts after rows were appended).
#[derive(Clone, Debug)]
pub struct TableInfo {
    rows: Vec<TableRowInfo>,
    coded_indexes: Vec<u8>,
    is_large_index_str: bool,
    is_large_index_guid: bool,
    is_large_index_blob: bool,
}

impl TableInfo {
    /// Builds the width information from per-table row counts and the heap-size flags byte.
    #[must_use]
    pub fn new(row_counts: &[u32], heap_size_flags: u8) -> Self {
        let mut rows = vec![TableRowInfo::default(); TableId::COUNT];
        for (index, count) in row_counts.iter().enumerate().take(TableId::COUNT) {
            rows[index] = TableRowInfo::new(*count);
        }

        let mut table_info = TableInfo {
            rows,
            coded_indexes: vec![0; CodedIndexType::COUNT],
            is_large_index_str: heap_size_flags & 0x01 != 0,
            is_large_index_guid: heap_size_flags & 0x02 != 0,
            is_large_index_blob: heap_size_flags & 0x04 != 0,
        };

        table_info.calculate_coded_index_bits();
        table_info
    }

    /// Returns the row info of `table`.
    #[must_use]
    pub fn get(&self, table: TableId) -> &TableRowInfo {
        &self.rows[table as usize]
    }

    /// Width in bytes of a `#Strings` index.
    #[must_use]
    pub fn str_bytes(&self) -> u8 {
        if self.is_large_index_str {
            4
        } else {
            2
        }
    }

    /// Width in bytes of a `#GUID` index.
    #[must_use]
    pub fn guid_bytes(&self) -> u8 {
        if self.is_large_index_guid {
            4
        } else {
            2
        }
    }

    /// Width in bytes of a `#Blob` index.
    #[must_use]
    pub fn blob_bytes(&self) -> u8 {
        if self.is_large_index_blob {
            4
        } else {
            2
        }
    }

    /// Width in bytes of a simple index into `table_id`.
    #[must_use]
    pub fn table_index_bytes(&self, table_id: TableId) -> u8 {
        if self.rows[table_id as usize].bits > 16 {
            4
        } else {
            2
        }
    }

    /// Width in bytes of a coded index of the given type.
    #[must_use]
    pub fn coded_index_bytes(&self, coded_index_type: CodedIndexType) -> u8 {
        if self.coded_indexes[coded_index_type as usize] > 16 {
            4
        } else {
            2
        }
    }

    fn calculate_coded_index_size(&self, coded_index_type: CodedIndexType) -> u8 {
        let max_bits = coded_index_type
            .tables()
            .iter()
            .flatten()
            .map(|table| self.rows[*table as usize].bits)
            .max()
            .unwrap_or(1);

        max_bits + coded_index_type.tag_bits()
    }

    fn calculate_coded_index_bits(&mut self) {
        for coded_index in CodedIndexType::iter() {
            self.coded_indexes[coded_index as usize] = self.calculate_coded_index_size(coded_index);
        }
    }
}
