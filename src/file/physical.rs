//! Memory-mapped, read-only backend.

use std::{fs, path::Path};

use memmap2::Mmap;

use super::Backend;
use crate::{Error::Error, Result};

/// A PE image mapped read-only from disk.
///
/// Used for every read-only open: dependency checks on candidate plugins and lookups in the
/// reference library, where copying the whole file would be wasted work.
#[derive(Debug)]
pub struct Physical {
    data: Mmap,
}

impl Physical {
    /// Maps the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file can not be opened, or
    /// [`crate::Error::Error`] if mapping fails.
    pub fn new(path: &Path) -> Result<Physical> {
        let file = fs::File::open(path)?;

        // SAFETY: the mapping is read-only and owned by `Physical` for its whole lifetime.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|error| Error(error.to_string()))?;

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }
}
