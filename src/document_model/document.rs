use super::chunk_store::{ChunkStore, StoreLimits};
use super::error::{DocumentError, DocumentResult};
use super::search::SearchDirection;
use super::source::BackingSource;
use super::undo::{ChangeEvent, UndoStack};
use crate::hex;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

type ChangeListener = Box<dyn FnMut(&ChangeEvent)>;

/// The editing surface handed to a presentation layer.
///
/// Reads and searches go straight to the chunk store; every mutation goes
/// through the undo stack so it can be undone, and every change is
/// announced to the registered listeners.
pub struct Document {
    store: ChunkStore,
    undo_stack: UndoStack,
    listeners: Vec<ChangeListener>,
    pub filename: Option<PathBuf>,
}

impl Document {
    pub fn new() -> Self {
        Self::with_limits(StoreLimits::default(), None)
    }

    pub fn with_limits(limits: StoreLimits, undo_limit: Option<usize>) -> Self {
        Self {
            store: ChunkStore::with_limits(limits),
            undo_stack: UndoStack::with_limit(undo_limit),
            listeners: Vec::new(),
            filename: None,
        }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let mut document = Self::new();
        document.store.attach_bytes(bytes.into());
        document
    }

    pub fn from_file(filename: PathBuf) -> DocumentResult<Self> {
        let mut document = Self::new();
        document.open(filename)?;
        Ok(document)
    }

    pub fn set_limits(&mut self, limits: StoreLimits, undo_limit: Option<usize>) {
        self.store.set_limits(limits);
        self.undo_stack.set_limit(undo_limit);
    }

    /// Register a callback run after every mutation, undo, redo and attach.
    pub fn on_change(&mut self, listener: impl FnMut(&ChangeEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Replace the document content with a new source. History is cleared
    /// whether or not the source could be indexed.
    pub fn attach(&mut self, source: BackingSource) -> DocumentResult<()> {
        let result = self.store.attach(source);
        self.undo_stack.clear();
        let event = self.current_event();
        self.notify(&event);
        result
    }

    /// Attach a file as a stream source and remember its name.
    pub fn open(&mut self, filename: PathBuf) -> DocumentResult<()> {
        let source = BackingSource::open(&filename).inspect_err(|err| {
            warn!("cannot open {}: {err}", filename.display());
        })?;
        self.attach(source)?;
        info!(size = self.size(), "opened {}", filename.display());
        self.filename = Some(filename);
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.store.size()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn read(&mut self, offset: u64, length: usize) -> DocumentResult<Vec<u8>> {
        self.store.read(offset, length)
    }

    pub fn read_with_change_flags(
        &mut self,
        offset: u64,
        length: usize,
    ) -> DocumentResult<(Vec<u8>, Vec<bool>)> {
        self.store.read_with_change_flags(offset, length)
    }

    pub fn data(&mut self) -> DocumentResult<Vec<u8>> {
        self.store.data()
    }

    /// Edits return `None` when they change nothing (an empty insert, a
    /// zero-length removal); such calls leave history and listeners alone.
    pub fn insert(&mut self, offset: u64, bytes: &[u8]) -> DocumentResult<Option<ChangeEvent>> {
        let event = self.undo_stack.insert(&mut self.store, offset, bytes)?;
        Ok(self.publish(event))
    }

    pub fn insert_byte(&mut self, offset: u64, byte: u8) -> DocumentResult<Option<ChangeEvent>> {
        self.insert(offset, &[byte])
    }

    pub fn remove_at(&mut self, offset: u64, length: u64) -> DocumentResult<Option<ChangeEvent>> {
        let event = self.undo_stack.remove_at(&mut self.store, offset, length)?;
        Ok(self.publish(event))
    }

    pub fn overwrite(&mut self, offset: u64, bytes: &[u8]) -> DocumentResult<Option<ChangeEvent>> {
        let event = self.undo_stack.overwrite(&mut self.store, offset, bytes)?;
        Ok(self.publish(event))
    }

    pub fn overwrite_byte(
        &mut self,
        offset: u64,
        byte: u8,
    ) -> DocumentResult<Option<ChangeEvent>> {
        self.overwrite(offset, &[byte])
    }

    /// Replace `length` bytes at `offset` with `bytes` of any length.
    pub fn replace(
        &mut self,
        offset: u64,
        length: u64,
        bytes: &[u8],
    ) -> DocumentResult<Option<ChangeEvent>> {
        let event = self
            .undo_stack
            .replace(&mut self.store, offset, length, bytes)?;
        Ok(self.publish(event))
    }

    pub fn index_of(&mut self, pattern: &[u8], from: u64) -> DocumentResult<Option<u64>> {
        self.store.index_of(pattern, from)
    }

    pub fn last_index_of(&mut self, pattern: &[u8], from: u64) -> DocumentResult<Option<u64>> {
        self.store.last_index_of(pattern, from)
    }

    pub fn find(
        &mut self,
        pattern: &[u8],
        from: u64,
        direction: SearchDirection,
    ) -> DocumentResult<Option<u64>> {
        self.store.find(pattern, from, direction)
    }

    /// Returns `false` when there was nothing to undo.
    pub fn undo(&mut self) -> DocumentResult<bool> {
        let event = self.undo_stack.undo(&mut self.store)?;
        Ok(self.publish(event).is_some())
    }

    /// Returns `false` when there was nothing to redo.
    pub fn redo(&mut self) -> DocumentResult<bool> {
        let event = self.undo_stack.redo(&mut self.store)?;
        Ok(self.publish(event).is_some())
    }

    /// Collect the following edits into one undo step until `end_group`.
    pub fn begin_group(&mut self) {
        self.undo_stack.begin_group();
    }

    pub fn end_group(&mut self) {
        self.undo_stack.end_group();
    }

    pub fn is_modified(&self) -> bool {
        self.undo_stack.is_modified()
    }

    pub fn can_undo(&self) -> bool {
        self.undo_stack.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo_stack.can_redo()
    }

    pub fn history_index(&self) -> usize {
        self.undo_stack.index()
    }

    /// Offset of the most recent edit, undo or redo.
    pub fn position(&self) -> u64 {
        self.undo_stack.position()
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Write part of the document to `sink`.
    pub fn flush(
        &mut self,
        sink: &mut impl Write,
        offset: u64,
        length: u64,
    ) -> DocumentResult<u64> {
        self.store.flush(sink, offset, length)
    }

    pub fn save(&mut self) -> DocumentResult<u64> {
        match self.filename.clone() {
            Some(filename) => self.save_as(filename),
            None => Err(DocumentError::SourceUnavailable(io::Error::new(
                io::ErrorKind::InvalidInput,
                "No filename specified",
            ))),
        }
    }

    /// Write the whole document to `filename` and continue editing the
    /// written file.
    ///
    /// The content goes to a temporary file next to the destination first,
    /// which then replaces it. The file currently backing the document is
    /// still read while writing, so saving over it is safe.
    pub fn save_as(&mut self, filename: PathBuf) -> DocumentResult<u64> {
        let directory = match filename.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut temp = tempfile::NamedTempFile::new_in(&directory)?;
        let size = self.size();
        let written = self.store.flush(temp.as_file_mut(), 0, size)?;
        temp.persist(&filename).map_err(|err| err.error)?;
        info!(written, "saved {}", filename.display());

        self.open(filename)?;
        Ok(written)
    }

    /// Address / hex / ASCII dump of a range, addresses counted from
    /// `address_offset`.
    pub fn to_readable_string(
        &mut self,
        offset: u64,
        length: usize,
        address_offset: u64,
    ) -> DocumentResult<String> {
        let bytes = self.read(offset, length)?;
        Ok(hex::to_readable(
            &bytes,
            address_offset + offset,
            hex::DEFAULT_BYTES_PER_LINE,
        ))
    }

    pub fn file_name(&self) -> Option<&Path> {
        self.filename.as_deref()
    }

    fn current_event(&self) -> ChangeEvent {
        ChangeEvent {
            size: self.size(),
            modified: self.is_modified(),
            position: self.position(),
        }
    }

    fn publish(&mut self, event: Option<ChangeEvent>) -> Option<ChangeEvent> {
        if let Some(event) = &event {
            self.notify(event);
        }
        event
    }

    fn notify(&mut self, event: &ChangeEvent) {
        for listener in &mut self.listeners {
            listener(event);
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("filename", &self.filename)
            .field("size", &self.size())
            .field("modified", &self.is_modified())
            .field("chunks", &self.store.chunk_count())
            .finish()
    }
}
