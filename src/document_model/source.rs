use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Anything that can be read at arbitrary positions.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// The external origin of a document's initial bytes.
pub enum BackingSource {
    /// A block already in memory, wrapped as a single loaded chunk.
    Memory(Vec<u8>),
    /// A seekable stream whose content is only read on demand.
    Stream(Box<dyn ReadSeek>),
}

impl BackingSource {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        BackingSource::Memory(bytes.into())
    }

    pub fn from_stream(stream: impl ReadSeek + 'static) -> Self {
        BackingSource::Stream(Box::new(stream))
    }

    /// Open a file for the lifetime of the document
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_stream(file))
    }

    /// Total length of the source. Streams are measured by seeking to the end.
    pub fn len(&mut self) -> io::Result<u64> {
        match self {
            BackingSource::Memory(bytes) => Ok(bytes.len() as u64),
            BackingSource::Stream(stream) => stream.seek(SeekFrom::End(0)),
        }
    }

    pub fn is_empty(&mut self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// A source that ends early (for example a file truncated behind our
    /// back) is reported as an `UnexpectedEof` error rather than padded.
    pub fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        match self {
            BackingSource::Memory(bytes) => {
                let start = usize::try_from(offset)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
                let end = start.checked_add(len).filter(|&end| end <= bytes.len());
                match end {
                    Some(end) => Ok(bytes[start..end].to_vec()),
                    None => Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "read past end of in-memory source",
                    )),
                }
            }
            BackingSource::Stream(stream) => {
                stream.seek(SeekFrom::Start(offset))?;
                let mut buffer = vec![0; len];
                stream.read_exact(&mut buffer)?;
                Ok(buffer)
            }
        }
    }
}

impl fmt::Debug for BackingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackingSource::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
            BackingSource::Stream(_) => write!(f, "Stream"),
        }
    }
}

impl From<Vec<u8>> for BackingSource {
    fn from(bytes: Vec<u8>) -> Self {
        BackingSource::Memory(bytes)
    }
}
