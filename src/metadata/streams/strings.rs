//! The `#Strings` heap: null-terminated UTF-8 identifiers.

use std::ffi::CStr;

use crate::{Error::OutOfBounds, Result};

/// Owned, appendable `#Strings` heap.
///
/// Index 0 is always the empty string. New strings are appended at the end; an existing
/// occurrence, including a suffix of a longer string, is reused instead.
#[derive(Clone, Debug)]
pub struct Strings {
    data: Vec<u8>,
}

impl Strings {
    /// Copies a `#Strings` heap.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap does not start with a null byte.
    pub fn from(data: &[u8]) -> Result<Strings> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Provided #Strings heap is empty"));
        }

        Ok(Strings {
            data: data.to_vec(),
        })
    }

    /// Creates a heap containing only the empty string.
    #[must_use]
    pub fn new() -> Strings {
        Strings { data: vec![0] }
    }

    /// Returns the string at byte offset `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for offsets past the heap, or
    /// [`crate::Error::Malformed`] if the entry is unterminated or not UTF-8.
    pub fn get(&self, index: usize) -> Result<&str> {
        if index >= self.data.len() {
            return Err(OutOfBounds);
        }

        match CStr::from_bytes_until_nul(&self.data[index..]) {
            Ok(result) => result
                .to_str()
                .map_err(|_| malformed_error!("Invalid string at index - {}", index)),
            Err(_) => Err(malformed_error!("Invalid string at index - {}", index)),
        }
    }

    /// Returns the offset of `value` if it is already present.
    #[must_use]
    pub fn find(&self, value: &str) -> Option<u32> {
        if value.is_empty() {
            return Some(0);
        }

        let needle_len = value.len() + 1;
        self.data
            .windows(needle_len)
            .position(|window| {
                &window[..value.len()] == value.as_bytes() && window[value.len()] == 0
            })
            .and_then(|position| u32::try_from(position).ok())
    }

    /// Returns the offset of `value`, appending it if necessary.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `value` contains a null byte.
    pub fn add(&mut self, value: &str) -> Result<u32> {
        if value.as_bytes().contains(&0) {
            return Err(malformed_error!("Identifier contains a null byte - {:?}", value));
        }

        if let Some(existing) = self.find(value) {
            return Ok(existing);
        }

        let Ok(index) = u32::try_from(self.data.len()) else {
            return Err(malformed_error!("#Strings heap exceeds 4GB"));
        };
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);

        Ok(index)
    }

    /// Raw heap bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Default for Strings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup() {
        let heap = Strings::from(b"\0<Module>\0REPOLib.Modules\0Valuables\0").unwrap();
        assert_eq!(heap.get(0).unwrap(), "");
        assert_eq!(heap.get(1).unwrap(), "<Module>");
        assert_eq!(heap.get(10).unwrap(), "REPOLib.Modules");
        assert_eq!(heap.get(26).unwrap(), "Valuables");
        assert!(heap.get(100).is_err());
        assert!(Strings::from(b"x\0").is_err());
    }

    #[test]
    fn add_reuses_existing_and_suffixes() {
        let mut heap = Strings::from(b"\0RegisterValuable\0").unwrap();
        assert_eq!(heap.add("RegisterValuable").unwrap(), 1);
        assert_eq!(heap.add("Valuable").unwrap(), 9);
        assert_eq!(heap.add("").unwrap(), 0);

        let before = heap.data().len();
        let index = heap.add("PrefabRef").unwrap();
        assert_eq!(index as usize, before);
        assert_eq!(heap.get(index as usize).unwrap(), "PrefabRef");
        assert_eq!(heap.add("PrefabRef").unwrap(), index);
    }

    #[test]
    fn rejects_embedded_null() {
        let mut heap = Strings::new();
        assert!(heap.add("a\0b").is_err());
    }
}
