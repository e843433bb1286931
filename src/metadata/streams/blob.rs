//! The `#Blob` heap: length-prefixed binary entries, mostly signatures.

use crate::{
    file::{io::write_compressed_uint, parser::Parser},
    Error::OutOfBounds,
    Result,
};

/// Owned, appendable `#Blob` heap.
///
/// Entries are prefixed with their length as an ECMA-335 compressed unsigned integer.
/// Offset 0 always holds the empty blob.
#[derive(Clone, Debug)]
pub struct Blob {
    data: Vec<u8>,
}

impl Blob {
    /// Copies a `#Blob` heap.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap does not start with the empty blob.
    pub fn from(data: &[u8]) -> Result<Blob> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Invalid memory for #Blob heap"));
        }

        Ok(Blob {
            data: data.to_vec(),
        })
    }

    /// Creates a heap containing only the empty blob.
    #[must_use]
    pub fn new() -> Blob {
        Blob { data: vec![0] }
    }

    /// Returns the blob stored at byte offset `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the entry exceeds the heap.
    pub fn get(&self, index: usize) -> Result<&[u8]> {
        if index >= self.data.len() {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(&self.data[index..]);
        let len = parser.read_compressed_uint()? as usize;
        let data_start = index + parser.pos();

        let Some(data_end) = data_start.checked_add(len) else {
            return Err(OutOfBounds);
        };

        self.data.get(data_start..data_end).ok_or(OutOfBounds)
    }

    /// Iterates `(offset, bytes)` over the entries of the heap, stopping at the first entry
    /// that can not be decoded.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[u8])> {
        let mut position = 0;
        std::iter::from_fn(move || {
            if position >= self.data.len() {
                return None;
            }

            let mut parser = Parser::new(&self.data[position..]);
            let len = parser.read_compressed_uint().ok()? as usize;
            let start = position + parser.pos();
            let entry = self.data.get(start..start.checked_add(len)?)?;

            let offset = position;
            position = start + len;
            Some((offset, entry))
        })
    }

    /// Returns the offset of an entry equal to `value`, if any.
    #[must_use]
    pub fn find(&self, value: &[u8]) -> Option<u32> {
        self.iter()
            .find(|(_, entry)| *entry == value)
            .and_then(|(offset, _)| u32::try_from(offset).ok())
    }

    /// Returns the offset of `value`, appending it if no equal entry exists.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is too long to encode.
    pub fn add(&mut self, value: &[u8]) -> Result<u32> {
        if let Some(existing) = self.find(value) {
            return Ok(existing);
        }

        let Ok(index) = u32::try_from(self.data.len()) else {
            return Err(malformed_error!("#Blob heap exceeds 4GB"));
        };
        let Ok(len) = u32::try_from(value.len()) else {
            return Err(malformed_error!("Blob entry too large"));
        };

        write_compressed_uint(&mut self.data, len)?;
        self.data.extend_from_slice(value);

        Ok(index)
    }

    /// Raw heap bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Default for Blob {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries() {
        let heap = Blob::from(&[0x00, 0x03, 0x20, 0x01, 0x01, 0x02, 0x06, 0x08]).unwrap();
        assert_eq!(heap.get(0).unwrap(), &[] as &[u8]);
        assert_eq!(heap.get(1).unwrap(), &[0x20, 0x01, 0x01]);
        assert_eq!(heap.get(5).unwrap(), &[0x06, 0x08]);
        assert!(heap.get(8).is_err());

        let offsets: Vec<usize> = heap.iter().map(|(offset, _)| offset).collect();
        assert_eq!(offsets, vec![0, 1, 5]);
    }

    #[test]
    fn add_deduplicates() {
        let mut heap = Blob::from(&[0x00, 0x03, 0x00, 0x01, 0x01]).unwrap();
        assert_eq!(heap.add(&[0x00, 0x01, 0x01]).unwrap(), 1);

        let index = heap.add(&[0x00, 0x01, 0x12, 0x09]).unwrap();
        assert_eq!(index, 5);
        assert_eq!(heap.get(5).unwrap(), &[0x00, 0x01, 0x12, 0x09]);
        assert_eq!(heap.add(&[0x00, 0x01, 0x12, 0x09]).unwrap(), 5);
        assert_eq!(heap.add(&[]).unwrap(), 0);
    }

    #[test]
    fn truncated_entry() {
        let heap = Blob::from(&[0x00, 0x05, 0x01]).unwrap();
        assert!(heap.get(1).is_err());
        assert_eq!(heap.iter().count(), 1);
    }
}
