//! Metadata table identifiers, coded indices and column layouts.
//!
//! The row data itself lives in [`crate::metadata::streams::TablesHeader`]; this module
//! describes how that data is shaped.

mod codedindex;
mod schema;
mod tableid;
mod tableinfo;

pub use codedindex::{CodedIndex, CodedIndexType};
pub use schema::{col, columns, row_size, ColumnKind};
pub use tableid::TableId;
pub use tableinfo::{TableInfo, TableRowInfo};
