use std::io;

/// Errors surfaced by the chunk store and everything layered on it.
///
/// Malformed lengths are clamped rather than rejected, so the only
/// input error is an offset that lies past the end of the document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("offset {offset} is beyond document size {size}")]
    OutOfRange { offset: u64, size: u64 },

    #[error("backing source unavailable: {0}")]
    SourceUnavailable(#[from] io::Error),
}

impl DocumentError {
    pub fn out_of_range(offset: u64, size: u64) -> Self {
        DocumentError::OutOfRange { offset, size }
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, DocumentError::OutOfRange { .. })
    }
}

pub type DocumentResult<T> = Result<T, DocumentError>;
