//! Byte-level editing of documents of any size.
//!
//! A [`Document`] pages its backing file in on demand through a chunk
//! store, so a multi-gigabyte file costs only the bytes actually touched
//! plus the edits made to it. Every edit is undoable.

pub mod cli;
pub mod config;
pub mod document_model;
pub mod hex;

pub use document_model::{
    BackingSource, ChangeEvent, Document, DocumentError, DocumentResult, SearchDirection,
    StoreLimits,
};
