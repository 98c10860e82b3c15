//! Chunks: bounded slices of the document plus their "changed" bits.

const WORD_BITS: usize = u64::BITS as usize;

/// A word-packed bit-set recording which bytes of a chunk were modified
/// since the chunk was loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeMask {
    words: Vec<u64>,
    len: usize,
}

impl ChangeMask {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    pub fn all_set(len: usize) -> Self {
        let mut mask = Self::new(len);
        mask.set_range(0, len);
        mask
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.len);
        self.words[index / WORD_BITS] |= 1 << (index % WORD_BITS);
    }

    pub fn set_range(&mut self, start: usize, end: usize) {
        let end = end.min(self.len);
        for index in start..end {
            self.set(index);
        }
    }

    pub fn any(&self) -> bool {
        self.words.iter().any(|&word| word != 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Split the mask at `at`, keeping `[0, at)` and returning `[at, len)`.
    pub fn split_off(&mut self, at: usize) -> ChangeMask {
        let at = at.min(self.len);
        let mut right = ChangeMask::new(self.len - at);
        for index in at..self.len {
            if self.get(index) {
                right.set(index - at);
            }
        }
        self.truncate(at);
        right
    }

    pub fn append(&mut self, other: &ChangeMask) {
        let offset = self.len;
        self.len += other.len;
        self.words.resize(self.len.div_ceil(WORD_BITS), 0);
        for index in 0..other.len {
            if other.get(index) {
                self.set(offset + index);
            }
        }
    }

    fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        self.len = len;
        self.words.truncate(len.div_ceil(WORD_BITS));
        let tail = len % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1 << tail) - 1;
            }
        }
    }
}

/// Content state of a chunk.
///
/// A placeholder only knows which region of the backing source it stands
/// for; every access path has to materialize it before touching bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkData {
    Placeholder {
        source_offset: u64,
        len: u64,
    },
    Loaded {
        bytes: Vec<u8>,
        changed: ChangeMask,
        /// Source offset the bytes were read from, as long as they are
        /// still a pristine copy of the source.
        origin: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteChunk {
    pub start: u64,
    pub data: ChunkData,
    /// Tick of the last access, used to pick eviction victims.
    pub last_used: u64,
}

impl ByteChunk {
    pub fn placeholder(start: u64, source_offset: u64, len: u64) -> Self {
        Self {
            start,
            data: ChunkData::Placeholder { source_offset, len },
            last_used: 0,
        }
    }

    /// A chunk holding bytes that mirror the source at `origin`.
    pub fn pristine(start: u64, bytes: Vec<u8>, origin: u64) -> Self {
        let changed = ChangeMask::new(bytes.len());
        Self {
            start,
            data: ChunkData::Loaded {
                bytes,
                changed,
                origin: Some(origin),
            },
            last_used: 0,
        }
    }

    /// A chunk wrapping an in-memory block. It has no source to reload
    /// from, so it is never evicted.
    pub fn resident(start: u64, bytes: Vec<u8>) -> Self {
        let changed = ChangeMask::new(bytes.len());
        Self {
            start,
            data: ChunkData::Loaded {
                bytes,
                changed,
                origin: None,
            },
            last_used: 0,
        }
    }

    /// A chunk of freshly inserted bytes, all marked changed.
    pub fn inserted(start: u64, bytes: Vec<u8>) -> Self {
        let changed = ChangeMask::all_set(bytes.len());
        Self {
            start,
            data: ChunkData::Loaded {
                bytes,
                changed,
                origin: None,
            },
            last_used: 0,
        }
    }

    pub fn len(&self) -> u64 {
        match &self.data {
            ChunkData::Placeholder { len, .. } => *len,
            ChunkData::Loaded { bytes, .. } => bytes.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn end(&self) -> u64 {
        self.start + self.len()
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.data, ChunkData::Loaded { .. })
    }

    /// Loaded, unmodified, and therefore safe to drop back to a placeholder.
    pub fn is_evictable(&self) -> bool {
        matches!(
            &self.data,
            ChunkData::Loaded { origin: Some(_), changed, .. } if !changed.any()
        )
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.data {
            ChunkData::Placeholder { .. } => None,
            ChunkData::Loaded { bytes, .. } => Some(bytes),
        }
    }

    pub fn changed(&self) -> Option<&ChangeMask> {
        match &self.data {
            ChunkData::Placeholder { .. } => None,
            ChunkData::Loaded { changed, .. } => Some(changed),
        }
    }

    /// Source region a placeholder stands for, `None` once loaded.
    pub fn pending_region(&self) -> Option<(u64, u64)> {
        match self.data {
            ChunkData::Placeholder { source_offset, len } => Some((source_offset, len)),
            ChunkData::Loaded { .. } => None,
        }
    }

    /// Replace a placeholder's state with the bytes read for it.
    pub fn materialize(&mut self, bytes: Vec<u8>) {
        if let ChunkData::Placeholder { source_offset, len } = self.data {
            assert_eq!(bytes.len() as u64, len, "materialized chunk has the wrong length");
            *self = ByteChunk {
                last_used: self.last_used,
                ..ByteChunk::pristine(self.start, bytes, source_offset)
            };
        }
    }

    /// Drop a clean chunk's bytes, keeping its extent. Returns the number
    /// of bytes released.
    pub fn evict(&mut self) -> u64 {
        let (released, source_offset) = match &self.data {
            ChunkData::Loaded {
                bytes,
                changed,
                origin: Some(offset),
            } if !changed.any() => (bytes.len() as u64, *offset),
            _ => return 0,
        };
        self.data = ChunkData::Placeholder {
            source_offset,
            len: released,
        };
        released
    }

    /// Split at `at` bytes into the chunk, keeping `[0, at)` here and
    /// returning the remainder as a new chunk. Placeholders split without
    /// touching the source.
    pub fn split_off(&mut self, at: u64) -> ByteChunk {
        debug_assert!(at <= self.len());
        let start = self.start + at;
        let data = match &mut self.data {
            ChunkData::Placeholder { source_offset, len } => {
                let right = ChunkData::Placeholder {
                    source_offset: *source_offset + at,
                    len: *len - at,
                };
                *len = at;
                right
            }
            ChunkData::Loaded {
                bytes,
                changed,
                origin,
            } => ChunkData::Loaded {
                bytes: bytes.split_off(at as usize),
                changed: changed.split_off(at as usize),
                origin: origin.map(|offset| offset + at),
            },
        };
        ByteChunk {
            start,
            data,
            last_used: self.last_used,
        }
    }

    /// Whether `next` (immediately following) can be folded into this
    /// chunk. Loaded chunks stay within `ceiling` bytes and only merge when
    /// the result keeps a source mapping or neither side had one, so clean
    /// bytes never get pinned next to edited ones. Placeholders merge
    /// whenever they map to adjacent source regions.
    pub fn can_merge(&self, next: &ByteChunk, ceiling: u64) -> bool {
        match (&self.data, &next.data) {
            (
                ChunkData::Loaded { origin, .. },
                ChunkData::Loaded {
                    origin: next_origin,
                    ..
                },
            ) => {
                let same_kind = match (origin, next_origin) {
                    (None, None) => true,
                    (Some(at), Some(next_at)) => at + self.len() == *next_at,
                    _ => false,
                };
                same_kind && self.len() + next.len() <= ceiling
            }
            (
                ChunkData::Placeholder { source_offset, len },
                ChunkData::Placeholder {
                    source_offset: next_offset,
                    ..
                },
            ) => source_offset + len == *next_offset,
            _ => false,
        }
    }

    /// Fold `next` into this chunk. Callers check `can_merge` first.
    pub fn merge(&mut self, next: ByteChunk) {
        debug_assert_eq!(self.end(), next.start);
        self.last_used = self.last_used.max(next.last_used);
        match (&mut self.data, next.data) {
            (
                ChunkData::Loaded {
                    bytes,
                    changed,
                    origin,
                },
                ChunkData::Loaded {
                    bytes: next_bytes,
                    changed: next_changed,
                    origin: next_origin,
                },
            ) => {
                let contiguous = matches!(
                    (*origin, next_origin),
                    (Some(a), Some(b)) if a + bytes.len() as u64 == b
                );
                if !contiguous {
                    *origin = None;
                }
                bytes.extend_from_slice(&next_bytes);
                changed.append(&next_changed);
            }
            (ChunkData::Placeholder { len, .. }, ChunkData::Placeholder { len: next_len, .. }) => {
                *len += next_len;
            }
            _ => panic!("merging a placeholder with a loaded chunk"),
        }
    }

    /// Overwrite bytes in place starting at `at`, marking them changed.
    /// Returns the bytes that were replaced. The chunk must be loaded and
    /// large enough.
    pub fn overwrite(&mut self, at: usize, data: &[u8]) -> Vec<u8> {
        match &mut self.data {
            ChunkData::Loaded {
                bytes,
                changed,
                origin,
            } => {
                let end = at + data.len();
                let previous = bytes[at..end].to_vec();
                bytes[at..end].copy_from_slice(data);
                changed.set_range(at, end);
                *origin = None;
                previous
            }
            ChunkData::Placeholder { .. } => panic!("overwrite on an unloaded chunk"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_set_and_get() {
        let mut mask = ChangeMask::new(130);
        assert!(!mask.any());
        mask.set(0);
        mask.set(64);
        mask.set(129);
        assert!(mask.get(0));
        assert!(mask.get(64));
        assert!(mask.get(129));
        assert!(!mask.get(1));
        assert!(!mask.get(500));
        assert_eq!(mask.count(), 3);
    }

    #[test]
    fn test_mask_split_and_append() {
        let mut mask = ChangeMask::new(100);
        mask.set_range(60, 70);
        let right = mask.split_off(65);
        assert_eq!(mask.len(), 65);
        assert_eq!(right.len(), 35);
        assert_eq!(mask.count(), 5);
        assert_eq!(right.count(), 5);
        assert!(right.get(0) && right.get(4) && !right.get(5));

        mask.append(&right);
        assert_eq!(mask.len(), 100);
        assert_eq!(mask.count(), 10);
        assert!(mask.get(60) && mask.get(69) && !mask.get(70));
    }

    #[test]
    fn test_placeholder_split_keeps_source_mapping() {
        let mut chunk = ByteChunk::placeholder(100, 4096, 50);
        let right = chunk.split_off(20);
        assert_eq!(chunk.pending_region(), Some((4096, 20)));
        assert_eq!(right.pending_region(), Some((4116, 30)));
        assert_eq!(right.start, 120);
        assert!(chunk.can_merge(&right, 4096));
    }

    #[test]
    fn test_loaded_split_and_merge() {
        let mut chunk = ByteChunk::pristine(0, vec![1, 2, 3, 4], 10);
        let right = chunk.split_off(1);
        assert_eq!(chunk.bytes(), Some(&[1u8][..]));
        assert_eq!(right.bytes(), Some(&[2u8, 3, 4][..]));
        assert!(right.is_evictable());

        chunk.merge(right);
        assert_eq!(chunk.bytes(), Some(&[1u8, 2, 3, 4][..]));
        assert!(chunk.is_evictable());
    }

    #[test]
    fn test_merge_with_inserted_chunk_is_not_evictable() {
        let mut chunk = ByteChunk::pristine(0, vec![1, 2], 0);
        chunk.merge(ByteChunk::inserted(2, vec![9]));
        assert!(!chunk.is_evictable());
        let changed = chunk.changed().unwrap();
        assert!(!changed.get(0) && !changed.get(1) && changed.get(2));
    }

    #[test]
    fn test_clean_chunk_does_not_merge_with_edited_neighbour() {
        let pristine = ByteChunk::pristine(0, vec![1, 2], 0);
        let inserted = ByteChunk::inserted(2, vec![9]);
        assert!(!pristine.can_merge(&inserted, 4096));
        assert!(!inserted.can_merge(&ByteChunk::pristine(3, vec![3], 2), 4096));

        let gap = ByteChunk::pristine(2, vec![5], 40);
        assert!(!pristine.can_merge(&gap, 4096));
        let adjacent = ByteChunk::pristine(2, vec![3], 2);
        assert!(pristine.can_merge(&adjacent, 4096));
    }

    #[test]
    fn test_overwrite_marks_and_pins() {
        let mut chunk = ByteChunk::pristine(0, vec![0, 1, 2, 3], 0);
        let previous = chunk.overwrite(1, &[0xAA, 0xBB]);
        assert_eq!(previous, vec![1, 2]);
        assert_eq!(chunk.bytes(), Some(&[0u8, 0xAA, 0xBB, 3][..]));
        assert!(!chunk.is_evictable());
        assert_eq!(chunk.evict(), 0);
    }

    #[test]
    fn test_materialize_and_evict() {
        let mut chunk = ByteChunk::placeholder(0, 8, 3);
        assert!(!chunk.is_loaded());
        chunk.materialize(vec![7, 8, 9]);
        assert!(chunk.is_loaded());
        assert_eq!(chunk.evict(), 3);
        assert_eq!(chunk.pending_region(), Some((8, 3)));
    }

    #[test]
    fn test_cannot_merge_past_ceiling() {
        let chunk = ByteChunk::inserted(0, vec![0; 8]);
        let next = ByteChunk::inserted(8, vec![0; 8]);
        assert!(chunk.can_merge(&next, 16));
        assert!(!chunk.can_merge(&next, 15));
    }
}
