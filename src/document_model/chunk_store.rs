use super::chunk::ByteChunk;
use super::error::{DocumentError, DocumentResult};
use super::source::BackingSource;
use std::io::Write;
use tracing::{debug, warn};

/// Granularity of reads from a stream source.
pub const DEFAULT_CHUNK_SIZE: usize = 0x1000;
/// Largest chunk produced by merging adjacent loaded chunks.
pub const DEFAULT_MERGE_CEILING: usize = 0x1000;
/// Clean bytes kept resident before least-recently-used chunks are evicted.
pub const DEFAULT_MAX_RESIDENT: usize = 16 * 1024 * 1024;
/// Block size used when scanning for patterns or flushing.
pub const DEFAULT_SEARCH_WINDOW: usize = 0x10000;
/// Upper bound for `chunk_size`, `merge_ceiling` and `search_window`; each
/// of them sizes a single allocation.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub chunk_size: usize,
    pub merge_ceiling: usize,
    pub max_resident: usize,
    pub search_window: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            merge_ceiling: DEFAULT_MERGE_CEILING,
            max_resident: DEFAULT_MAX_RESIDENT,
            search_window: DEFAULT_SEARCH_WINDOW,
        }
    }
}

/// An ordered, contiguous collection of chunks spanning the document.
///
/// Chunks are kept sorted by `start`, never overlap, and together cover
/// exactly `[0, size)`. Offsets are addressed through binary search over
/// that order; chunks never refer to one another.
#[derive(Debug, Default)]
pub struct ChunkStore {
    chunks: Vec<ByteChunk>,
    size: u64,
    source: Option<BackingSource>,
    limits: StoreLimits,
    /// Bytes held by loaded chunks, clean or not.
    loaded: u64,
    tick: u64,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: StoreLimits) -> Self {
        Self {
            limits: Self::sanitize(limits),
            ..Self::default()
        }
    }

    fn sanitize(mut limits: StoreLimits) -> StoreLimits {
        limits.chunk_size = limits.chunk_size.clamp(1, MAX_BLOCK_SIZE);
        limits.merge_ceiling = limits.merge_ceiling.min(MAX_BLOCK_SIZE);
        limits.search_window = limits.search_window.clamp(1, MAX_BLOCK_SIZE);
        limits
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: StoreLimits) {
        self.limits = Self::sanitize(limits);
        self.trim_working_set();
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn loaded_bytes(&self) -> u64 {
        self.loaded
    }

    /// Discard every chunk and index a new source.
    ///
    /// An in-memory block becomes one resident chunk. A stream is only
    /// measured; its content stays behind a single placeholder until read.
    /// On failure the store is left empty and the source is dropped.
    pub fn attach(&mut self, source: BackingSource) -> DocumentResult<()> {
        match source {
            BackingSource::Memory(bytes) => self.attach_bytes(bytes),
            mut source @ BackingSource::Stream(_) => {
                self.reset();
                let len = source.len().inspect_err(|err| {
                    warn!("failed to measure backing stream: {err}");
                })?;
                self.size = len;
                if len > 0 {
                    self.chunks.push(ByteChunk::placeholder(0, 0, len));
                }
                self.source = Some(source);
                debug!(size = self.size, "attached backing stream");
                self.check_invariants();
            }
        }
        Ok(())
    }

    /// Attach an in-memory block. This cannot fail.
    pub fn attach_bytes(&mut self, bytes: Vec<u8>) {
        self.reset();
        self.size = bytes.len() as u64;
        self.loaded = self.size;
        if !bytes.is_empty() {
            self.chunks.push(ByteChunk::resident(0, bytes));
        }
        debug!(size = self.size, "attached in-memory block");
        self.check_invariants();
    }

    fn reset(&mut self) {
        self.chunks.clear();
        self.source = None;
        self.size = 0;
        self.loaded = 0;
    }

    /// Read up to `length` bytes at `offset`. A request running past the
    /// end returns only the in-range prefix.
    pub fn read(&mut self, offset: u64, length: usize) -> DocumentResult<Vec<u8>> {
        let end = self.clamped_end(offset, length as u64)?;
        self.tick += 1;
        self.load_range(offset, end)?;

        let mut result = Vec::with_capacity((end - offset) as usize);
        self.for_each_slice(offset, end, |bytes, _| result.extend_from_slice(bytes));
        Ok(result)
    }

    /// Like `read`, plus one flag per byte telling whether it was modified
    /// since it was loaded.
    pub fn read_with_change_flags(
        &mut self,
        offset: u64,
        length: usize,
    ) -> DocumentResult<(Vec<u8>, Vec<bool>)> {
        let end = self.clamped_end(offset, length as u64)?;
        self.tick += 1;
        self.load_range(offset, end)?;

        let capacity = (end - offset) as usize;
        let mut bytes = Vec::with_capacity(capacity);
        let mut flags = Vec::with_capacity(capacity);
        self.for_each_slice(offset, end, |slice, changed| {
            bytes.extend_from_slice(slice);
            flags.extend(changed);
        });
        Ok((bytes, flags))
    }

    /// The whole document.
    pub fn data(&mut self) -> DocumentResult<Vec<u8>> {
        self.read(0, self.size as usize)
    }

    /// Insert `bytes` at `offset`, shifting everything after it.
    pub fn insert(&mut self, offset: u64, bytes: &[u8]) -> DocumentResult<()> {
        if offset > self.size {
            return Err(DocumentError::out_of_range(offset, self.size));
        }
        if bytes.is_empty() {
            return Ok(());
        }
        self.tick += 1;

        let len = bytes.len() as u64;
        let index = self.split_at(offset);
        let mut chunk = ByteChunk::inserted(offset, bytes.to_vec());
        chunk.last_used = self.tick;
        self.chunks.insert(index, chunk);
        self.shift_from(index + 1, len as i64);
        self.size += len;
        self.loaded += len;

        self.coalesce(index, index);
        self.check_invariants();
        Ok(())
    }

    /// Remove up to `length` bytes at `offset`, returning what was removed.
    pub fn remove(&mut self, offset: u64, length: u64) -> DocumentResult<Vec<u8>> {
        let end = self.clamped_end(offset, length)?;
        if end == offset {
            return Ok(Vec::new());
        }
        let removed = self.read(offset, (end - offset) as usize)?;

        let first = self.split_at(offset);
        let last = self.split_at(end);
        let released: u64 = self
            .chunks
            .drain(first..last)
            .filter(|chunk| chunk.is_loaded())
            .map(|chunk| chunk.len())
            .sum();
        self.loaded -= released;
        self.shift_from(first, -((end - offset) as i64));
        self.size -= end - offset;

        self.coalesce(first, first);
        self.check_invariants();
        Ok(removed)
    }

    /// Replace bytes at `offset` without changing chunk lengths. Bytes that
    /// run past the end are appended. Returns the bytes that were replaced.
    pub fn overwrite(&mut self, offset: u64, bytes: &[u8]) -> DocumentResult<Vec<u8>> {
        let end = self.clamped_end(offset, bytes.len() as u64)?;
        self.tick += 1;
        self.load_range(offset, end)?;

        let in_range = (end - offset) as usize;
        let mut previous = Vec::with_capacity(in_range);
        if in_range > 0 {
            let first = self.split_at(offset);
            let last = self.split_at(end);
            let mut written = 0;
            for chunk in &mut self.chunks[first..last] {
                let len = chunk.len() as usize;
                previous.extend(chunk.overwrite(0, &bytes[written..written + len]));
                chunk.last_used = self.tick;
                written += len;
            }
            self.coalesce(first, last);
        }

        if in_range < bytes.len() {
            let tail = &bytes[in_range..];
            let mut chunk = ByteChunk::inserted(self.size, tail.to_vec());
            chunk.last_used = self.tick;
            self.chunks.push(chunk);
            self.size += tail.len() as u64;
            self.loaded += tail.len() as u64;
            let index = self.chunks.len() - 1;
            self.coalesce(index, index);
        }

        self.check_invariants();
        Ok(previous)
    }

    /// Write `[offset, offset + length)` to `sink`, materializing pending
    /// chunks a window at a time. Returns the number of bytes written.
    pub fn flush(
        &mut self,
        sink: &mut impl Write,
        offset: u64,
        length: u64,
    ) -> DocumentResult<u64> {
        let end = self.clamped_end(offset, length)?;
        let window = self.limits.search_window as u64;

        let mut position = offset;
        while position < end {
            let block = window.min(end - position) as usize;
            let bytes = self.read(position, block)?;
            sink.write_all(&bytes).inspect_err(|err| {
                warn!("failed to write to sink at offset {position}: {err}");
            })?;
            position += bytes.len() as u64;
        }
        sink.flush()?;
        Ok(end - offset)
    }

    fn clamped_end(&self, offset: u64, length: u64) -> DocumentResult<u64> {
        if offset > self.size {
            return Err(DocumentError::out_of_range(offset, self.size));
        }
        Ok(offset.saturating_add(length).min(self.size))
    }

    /// Index of the chunk containing `offset`; `offset` must be below size.
    fn locate(&self, offset: u64) -> usize {
        self.chunks.partition_point(|chunk| chunk.end() <= offset)
    }

    /// Make sure a chunk starts at `offset` and return its index, or the
    /// chunk count when `offset` is the end of the document.
    fn split_at(&mut self, offset: u64) -> usize {
        if offset >= self.size {
            return self.chunks.len();
        }
        let index = self.locate(offset);
        let chunk = &mut self.chunks[index];
        if chunk.start == offset {
            return index;
        }
        let right = chunk.split_off(offset - chunk.start);
        self.chunks.insert(index + 1, right);
        index + 1
    }

    fn shift_from(&mut self, index: usize, delta: i64) {
        for chunk in &mut self.chunks[index..] {
            chunk.start = chunk.start.wrapping_add_signed(delta);
        }
    }

    /// Visit the bytes of `[offset, end)` chunk by chunk. Every chunk in the
    /// range must already be loaded.
    fn for_each_slice(
        &self,
        offset: u64,
        end: u64,
        mut visit: impl FnMut(&[u8], &mut dyn Iterator<Item = bool>),
    ) {
        if offset >= end {
            return;
        }
        let mut index = self.locate(offset);
        while index < self.chunks.len() && self.chunks[index].start < end {
            let chunk = &self.chunks[index];
            let from = (offset.max(chunk.start) - chunk.start) as usize;
            let to = (end.min(chunk.end()) - chunk.start) as usize;
            let (Some(bytes), Some(changed)) = (chunk.bytes(), chunk.changed()) else {
                panic!("chunk at {} was not loaded before access", chunk.start);
            };
            let mut flags = (from..to).map(|i| changed.get(i));
            visit(&bytes[from..to], &mut flags);
            index += 1;
        }
    }

    /// Materialize every placeholder intersecting `[offset, end)`.
    ///
    /// Large placeholders are cut down to a `chunk_size` window aligned in
    /// source coordinates, so only the touched part of the source is read.
    /// Source reads happen before the placeholder is split, so a failed
    /// read leaves the store as it was.
    fn load_range(&mut self, offset: u64, end: u64) -> DocumentResult<()> {
        let chunk_size = self.limits.chunk_size as u64;
        let mut position = offset;

        while position < end {
            let index = self.locate(position);
            let chunk = &mut self.chunks[index];
            chunk.last_used = self.tick;

            let Some((source_offset, len)) = chunk.pending_region() else {
                position = chunk.end();
                continue;
            };

            let block = (source_offset + position - chunk.start) / chunk_size;
            let window_start = (block * chunk_size).max(source_offset);
            let window_end = ((block + 1) * chunk_size).min(source_offset + len);
            let logical_start = chunk.start + (window_start - source_offset);
            let logical_end = chunk.start + (window_end - source_offset);

            let Some(source) = self.source.as_mut() else {
                panic!("placeholder chunk without a backing source");
            };
            let bytes = source
                .read_at(window_start, (window_end - window_start) as usize)
                .inspect_err(|err| warn!("failed to read source at {window_start}: {err}"))?;

            self.split_at(logical_end);
            let index = self.split_at(logical_start);
            let chunk = &mut self.chunks[index];
            chunk.materialize(bytes);
            chunk.last_used = self.tick;
            self.loaded += logical_end - logical_start;
            debug!(start = logical_start, len = logical_end - logical_start, "loaded chunk");

            position = logical_end;
        }

        self.trim_working_set();
        Ok(())
    }

    /// Evict least-recently-used clean chunks once loaded bytes exceed the
    /// resident budget. Chunks touched by the current operation stay.
    fn trim_working_set(&mut self) {
        let budget = self.limits.max_resident as u64;
        if self.loaded <= budget {
            return;
        }

        let mut victims: Vec<(u64, usize)> = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, chunk)| chunk.is_evictable() && chunk.last_used < self.tick)
            .map(|(index, chunk)| (chunk.last_used, index))
            .collect();
        if victims.is_empty() {
            return;
        }
        victims.sort_unstable();

        let target = budget - budget / 4;
        let mut evicted = 0;
        for (_, index) in victims {
            if self.loaded <= target {
                break;
            }
            let released = self.chunks[index].evict();
            self.loaded -= released;
            evicted += 1;
        }
        debug!(evicted, loaded = self.loaded, "trimmed working set");

        let count = self.chunks.len();
        self.coalesce(0, count);
        self.check_invariants();
    }

    /// Merge mergeable neighbours among the chunks in `[from - 1, to + 1]`.
    fn coalesce(&mut self, from: usize, to: usize) {
        let ceiling = self.limits.merge_ceiling as u64;
        let mut index = from.saturating_sub(1);
        let mut to = to;
        while index < to + 1 && index + 1 < self.chunks.len() {
            if self.chunks[index].can_merge(&self.chunks[index + 1], ceiling) {
                let next = self.chunks.remove(index + 1);
                self.chunks[index].merge(next);
                to = to.saturating_sub(1);
            } else {
                index += 1;
            }
        }
    }

    /// Contiguity is the structural invariant everything else relies on;
    /// a violation is a defect in this module, not bad input.
    fn check_invariants(&self) {
        let end = self.chunks.last().map_or(0, |chunk| chunk.end());
        assert_eq!(end, self.size, "chunk extents do not cover the document");

        #[cfg(debug_assertions)]
        {
            let mut expected = 0;
            for chunk in &self.chunks {
                assert_eq!(chunk.start, expected, "chunk extents are not contiguous");
                assert!(!chunk.is_empty(), "empty chunk at {}", chunk.start);
                expected = chunk.end();
            }
            let loaded: u64 = self
                .chunks
                .iter()
                .filter(|chunk| chunk.is_loaded())
                .map(|chunk| chunk.len())
                .sum();
            assert_eq!(loaded, self.loaded, "resident byte count drifted");
        }
    }
}
