//! The complete metadata image: root, heaps and tables, ready to be edited and re-encoded.

use crate::{
    metadata::{
        root::Root,
        streams::{
            Blob, StreamHeader, Strings, TablesHeader, HEAP_LARGE_BLOB, HEAP_LARGE_GUID,
            HEAP_LARGE_STRINGS,
        },
    },
    Result,
};

/// Owned metadata of one module.
///
/// `#Strings`, `#Blob` and the tables stream are decoded into editable structures; every
/// other stream (`#US`, `#GUID`, ...) is kept as raw bytes. [`Metadata::serialize`] writes
/// the streams back in their original order with offsets and index widths recomputed.
#[derive(Clone, Debug)]
pub struct Metadata {
    root: Root,
    /// The `#Strings` heap
    pub strings: Strings,
    /// The `#Blob` heap
    pub blobs: Blob,
    /// The `#~` or `#-` tables stream
    pub tables: TablesHeader,
    raw_streams: Vec<(String, Vec<u8>)>,
}

impl Metadata {
    /// Decodes the metadata starting at the root signature.
    ///
    /// # Errors
    /// Returns an error if the root or any of the edited streams is malformed, or if the
    /// tables or `#Strings` stream is missing.
    pub fn read(data: &[u8]) -> Result<Metadata> {
        let mut root = Root::read(data)?;

        let mut tables = None;
        let mut strings = None;
        let mut blobs = None;
        let mut raw_streams = Vec::new();

        for header in &root.stream_headers {
            let start = header.offset as usize;
            let stream = &data[start..start + header.size as usize];

            match header.name.as_str() {
                "#~" | "#-" => tables = Some(TablesHeader::from(stream)?),
                "#Strings" => strings = Some(Strings::from(stream)?),
                "#Blob" => blobs = Some(Blob::from(stream)?),
                name => raw_streams.push((name.to_string(), stream.to_vec())),
            }
        }

        let Some(tables) = tables else {
            return Err(malformed_error!("Metadata has no tables stream"));
        };
        let Some(strings) = strings else {
            return Err(malformed_error!("Metadata has no #Strings stream"));
        };
        let blobs = match blobs {
            Some(blobs) => blobs,
            None => {
                root.stream_headers.push(StreamHeader {
                    offset: 0,
                    size: 0,
                    name: "#Blob".to_string(),
                });
                Blob::new()
            }
        };

        Ok(Metadata {
            root,
            strings,
            blobs,
            tables,
            raw_streams,
        })
    }

    /// Creates empty metadata with the usual five streams.
    #[must_use]
    pub fn new(version: &str) -> Metadata {
        let stream_headers = ["#~", "#Strings", "#US", "#GUID", "#Blob"]
            .iter()
            .map(|name| StreamHeader {
                offset: 0,
                size: 0,
                name: (*name).to_string(),
            })
            .collect();

        Metadata {
            root: Root {
                major_version: 1,
                minor_version: 1,
                version: version.to_string(),
                flags: 0,
                stream_headers,
            },
            strings: Strings::new(),
            blobs: Blob::new(),
            tables: TablesHeader::new(),
            raw_streams: vec![
                ("#US".to_string(), vec![0]),
                ("#GUID".to_string(), Vec::new()),
            ],
        }
    }

    /// The runtime version string of the root.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.root.version
    }

    /// Raw bytes of a stream that is not decoded, e.g. `#GUID`.
    #[must_use]
    pub fn raw_stream(&self, name: &str) -> Option<&[u8]> {
        self.raw_streams
            .iter()
            .find(|(stream, _)| stream == name)
            .map(|(_, data)| data.as_slice())
    }

    /// Mutable access to the raw bytes of an undecoded stream.
    pub fn raw_stream_mut(&mut self, name: &str) -> Option<&mut Vec<u8>> {
        self.raw_streams
            .iter_mut()
            .find(|(stream, _)| stream == name)
            .map(|(_, data)| data)
    }

    /// Heap-size flags matching the current heap sizes.
    #[must_use]
    pub fn heap_sizes(&self) -> u8 {
        let mut flags = 0;
        if self.strings.data().len() > 0xFFFF {
            flags |= HEAP_LARGE_STRINGS;
        }
        if self.raw_stream("#GUID").map_or(0, <[u8]>::len) / 16 > 0xFFFF {
            flags |= HEAP_LARGE_GUID;
        }
        if self.blobs.data().len() > 0xFFFF {
            flags |= HEAP_LARGE_BLOB;
        }
        flags
    }

    /// Encodes the metadata, root first, every stream padded to four bytes.
    ///
    /// # Errors
    /// Returns an error if a stream can not be encoded.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let heap_sizes = self.heap_sizes();

        let mut payloads = Vec::with_capacity(self.root.stream_headers.len());
        for header in &self.root.stream_headers {
            let mut payload = match header.name.as_str() {
                "#~" | "#-" => self.tables.serialize(heap_sizes)?,
                "#Strings" => self.strings.data().to_vec(),
                "#Blob" => self.blobs.data().to_vec(),
                name => self.raw_stream(name).unwrap_or_default().to_vec(),
            };
            payload.resize((payload.len() + 3) & !3, 0);
            payloads.push(payload);
        }

        let mut root = self.root.clone();
        let mut offset = root.header_size();
        for (header, payload) in root.stream_headers.iter_mut().zip(&payloads) {
            let (Ok(start), Ok(size)) = (u32::try_from(offset), u32::try_from(payload.len()))
            else {
                return Err(malformed_error!("Metadata exceeds 4GB"));
            };
            header.offset = start;
            header.size = size;
            offset += payload.len();
        }

        let mut out = root.write()?;
        out.reserve(offset - out.len());
        for payload in payloads {
            out.extend_from_slice(&payload);
        }

        Ok(out)
    }
}
