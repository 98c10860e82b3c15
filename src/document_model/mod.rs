/// Document model subsystem - Chunked byte storage and editing operations
///
/// This module holds the byte-level data core: the backing source, the
/// chunk store that pages it in on demand, invertible edit commands, the
/// undo stack and the document facade tying them together.

pub mod chunk;
pub mod chunk_store;
pub mod document;
pub mod edit_command;
pub mod error;
pub mod search;
pub mod source;
pub mod undo;

// Re-export main types for convenience
pub use chunk::{ByteChunk, ChangeMask, ChunkData};
pub use chunk_store::{ChunkStore, StoreLimits};
pub use document::Document;
pub use edit_command::{CommandKind, EditCommand};
pub use error::{DocumentError, DocumentResult};
pub use search::SearchDirection;
pub use source::BackingSource;
pub use undo::{ChangeEvent, UndoGroup, UndoStack};
