use super::chunk_store::ChunkStore;
use super::error::DocumentResult;
use memchr::memmem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    Backward,
}

impl ChunkStore {
    /// Search for `pattern` in the given direction.
    ///
    /// Forward finds the first match starting at or after `from`. Backward
    /// finds the last match that ends at or before `from`.
    pub fn find(
        &mut self,
        pattern: &[u8],
        from: u64,
        direction: SearchDirection,
    ) -> DocumentResult<Option<u64>> {
        match direction {
            SearchDirection::Forward => self.index_of(pattern, from),
            SearchDirection::Backward => self.last_index_of(pattern, from),
        }
    }

    pub fn index_of(&mut self, pattern: &[u8], from: u64) -> DocumentResult<Option<u64>> {
        if pattern.is_empty() {
            return Ok(None);
        }
        let window = self.limits().search_window;
        let overlap = pattern.len() - 1;
        let finder = memmem::Finder::new(pattern);

        // Each block reaches `overlap` bytes into the next one so a match
        // straddling the block edge is still seen whole.
        let mut position = from;
        while position < self.size() {
            let block = self.read(position, window.saturating_add(overlap))?;
            if let Some(found) = finder.find(&block) {
                return Ok(Some(position + found as u64));
            }
            if block.len() < pattern.len() {
                break;
            }
            position = position.saturating_add(window as u64);
        }
        Ok(None)
    }

    pub fn last_index_of(&mut self, pattern: &[u8], from: u64) -> DocumentResult<Option<u64>> {
        if pattern.is_empty() {
            return Ok(None);
        }
        let window = self.limits().search_window as u64;
        let span = window.saturating_add(pattern.len() as u64 - 1);
        let finder = memmem::FinderRev::new(pattern);

        let mut position = from.min(self.size());
        while position > 0 {
            let start = position.saturating_sub(span);
            let block = self.read(start, (position - start) as usize)?;
            if let Some(found) = finder.rfind(&block) {
                return Ok(Some(start + found as u64));
            }
            position = position.saturating_sub(window);
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_model::chunk_store::{MAX_BLOCK_SIZE, StoreLimits};
    use crate::document_model::source::BackingSource;
    use std::io::Cursor;

    fn store_with(bytes: Vec<u8>, search_window: usize) -> ChunkStore {
        let mut store = ChunkStore::with_limits(StoreLimits {
            chunk_size: 8,
            merge_ceiling: 8,
            max_resident: 64,
            search_window,
        });
        store
            .attach(BackingSource::from_stream(Cursor::new(bytes)))
            .unwrap();
        store
    }

    #[test]
    fn test_index_of_simple() {
        let mut store = ChunkStore::new();
        store
            .attach(BackingSource::from_bytes((0u8..16).collect::<Vec<_>>()))
            .unwrap();
        assert_eq!(store.index_of(&[0x0A, 0x0B], 0).unwrap(), Some(10));
        assert_eq!(store.index_of(&[0x0A, 0x0B], 11).unwrap(), None);
        assert_eq!(store.index_of(&[0x0F, 0x10], 0).unwrap(), None);
    }

    #[test]
    fn test_empty_pattern_and_past_end() {
        let mut store = store_with(vec![1, 2, 3], 4);
        assert_eq!(store.index_of(&[], 0).unwrap(), None);
        assert_eq!(store.last_index_of(&[], 3).unwrap(), None);
        assert_eq!(store.index_of(&[1], 10).unwrap(), None);
    }

    #[test]
    fn test_match_straddling_search_blocks() {
        let mut bytes = vec![0u8; 64];
        bytes[30..34].copy_from_slice(b"WXYZ");
        let mut store = store_with(bytes, 32);
        assert_eq!(store.index_of(b"WXYZ", 0).unwrap(), Some(30));
        assert_eq!(store.last_index_of(b"WXYZ", 64).unwrap(), Some(30));
    }

    #[test]
    fn test_match_straddling_inserted_chunk() {
        let mut store = store_with(vec![0u8; 40], 4);
        store.insert(20, b"AB").unwrap();
        store.insert(22, b"CD").unwrap();
        assert_eq!(store.index_of(b"BC", 0).unwrap(), Some(21));
        assert_eq!(store.index_of(b"ABCD", 3).unwrap(), Some(20));
        assert_eq!(store.last_index_of(b"ABCD", 44).unwrap(), Some(20));
    }

    #[test]
    fn test_backward_requires_match_before_from() {
        let mut store = store_with(b"abcabcabc".to_vec(), 2);
        assert_eq!(store.last_index_of(b"abc", 9).unwrap(), Some(6));
        assert_eq!(store.last_index_of(b"abc", 8).unwrap(), Some(3));
        assert_eq!(store.last_index_of(b"abc", 2).unwrap(), None);
        assert_eq!(store.find(b"abc", 1, SearchDirection::Forward).unwrap(), Some(3));
        assert_eq!(store.find(b"abc", 6, SearchDirection::Backward).unwrap(), Some(3));
    }

    #[test]
    fn test_forward_search_over_many_windows() {
        let mut bytes = vec![0u8; 1000];
        bytes[997..1000].copy_from_slice(&[7, 8, 9]);
        let mut store = store_with(bytes, 16);
        assert_eq!(store.index_of(&[7, 8, 9], 0).unwrap(), Some(997));
        assert_eq!(store.last_index_of(&[7, 8, 9], 999).unwrap(), None);
        assert!(store.loaded_bytes() <= 64 + 24);
    }

    #[test]
    fn test_unbounded_search_window_is_capped() {
        let mut store = ChunkStore::with_limits(StoreLimits {
            chunk_size: usize::MAX,
            merge_ceiling: usize::MAX,
            max_resident: 64,
            search_window: usize::MAX,
        });
        store
            .attach(BackingSource::from_stream(Cursor::new(vec![0u8, 1, 2, 3, 4, 5])))
            .unwrap();
        assert_eq!(store.limits().search_window, MAX_BLOCK_SIZE);
        assert_eq!(store.limits().chunk_size, MAX_BLOCK_SIZE);
        assert_eq!(store.limits().merge_ceiling, MAX_BLOCK_SIZE);

        assert_eq!(store.index_of(&[3, 4], 0).unwrap(), Some(3));
        assert_eq!(store.index_of(&[3, 4], 4).unwrap(), None);
        assert_eq!(store.last_index_of(&[3, 4], 6).unwrap(), Some(3));
        assert_eq!(store.last_index_of(&[3, 4], u64::MAX).unwrap(), Some(3));
    }
}
