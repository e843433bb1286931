//! Metadata streams: the heaps and the tables stream.
//!
//! `#Strings` and `#Blob` are held as owned, appendable heaps because importing a method
//! reference adds names and signatures. `#US` and `#GUID` are never modified and are kept as
//! raw bytes by [`crate::metadata::Metadata`].

mod blob;
mod streamheader;
mod strings;
mod tablesheader;

pub use blob::Blob;
pub use streamheader::{StreamHeader, STREAM_NAMES};
pub use strings::Strings;
pub use tablesheader::{TablesHeader, HEAP_LARGE_BLOB, HEAP_LARGE_GUID, HEAP_LARGE_STRINGS};
