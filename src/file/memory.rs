//! Owned, in-memory backend.
//!
//! Assemblies opened for rewriting are read into memory so that the original file can be
//! replaced on disk while the parsed image is still alive.

use std::{fs, path::Path};

use super::Backend;
use crate::Result;

/// Owned byte buffer holding a complete PE image.
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Wraps an existing buffer.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Memory {
        Memory { data }
    }

    /// Reads the file at `path` fully into memory.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file can not be read.
    pub fn read(path: &Path) -> Result<Memory> {
        Ok(Memory {
            data: fs::read(path)?,
        })
    }
}

impl Backend for Memory {
    fn data(&self) -> &[u8] {
        self.data.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn memory() {
        let mut data = vec![0xCC_u8; 64];
        data[10..15].copy_from_slice(&[0xBB; 5]);

        let memory = Memory::new(data);

        assert_eq!(memory.len(), 64);
        assert_eq!(memory.data()[0], 0xCC);
        assert_eq!(memory.data_slice(10, 5).unwrap(), &[0xBB; 5]);
        assert!(matches!(memory.data_slice(60, 5), Err(Error::OutOfBounds)));
        assert!(matches!(
            memory.data_slice(usize::MAX, 2),
            Err(Error::OutOfBounds)
        ));
    }
}
