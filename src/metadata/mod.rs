//! Metadata parsing and serialisation for .NET assemblies.
//!
//! This module holds the ECMA-335 metadata model the patcher reads and rewrites: the CLI
//! header, the metadata root with its streams, the tables stream as owned rows, signatures and
//! method bodies. Everything here is mutable and can be written back; higher level name
//! resolution lives in [`crate::cilassembly`].
//!
//! # Key Components
//!
//! - [`cor20header`] - The CLI header pointing at metadata and flags
//! - [`Metadata`] - The metadata root and every stream, read and serialised as a whole
//! - [`token`] - Metadata table row references used throughout .NET
//! - [`tables`] - Table identifiers, coded indices and column layouts
//! - [`signatures`] - Method and type signature parsing and encoding
//! - [`method`] - Method body headers and exception sections
//!
//! # Examples
//!
//! ```rust
//! use repolib_patcher::metadata::{tables::TableId, Metadata};
//!
//! let mut metadata = Metadata::new("v4.0.30319");
//! let name = metadata.strings.add("Plugin.dll")?;
//! metadata.tables.push_row(TableId::Module, &[0, name, 0, 0, 0])?;
//!
//! let bytes = metadata.serialize()?;
//! let reread = Metadata::read(&bytes)?;
//! assert_eq!(reread.version(), "v4.0.30319");
//! assert_eq!(reread.tables.row_count(TableId::Module), 1);
//! assert_eq!(reread.tables.row_count(TableId::TypeDef), 0);
//! # Ok::<(), repolib_patcher::Error>(())
//! ```

/// Implementation of the Header of CIL
pub mod cor20header;
mod image;
/// Method bodies and method flags
pub mod method;
/// Implementation of the root metadata structure
pub mod root;
/// Implementation of method and type signatures
pub mod signatures;
/// Implementation of all metadata streams (tables, heaps, etc.)
pub mod streams;
/// Implementation of the .NET metadata tables
pub mod tables;
/// Commonly used metadata token type
pub mod token;

pub use image::Metadata;
