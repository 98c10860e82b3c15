use super::chunk_store::ChunkStore;
use super::error::DocumentResult;
use tracing::trace;

/// One invertible mutation of the chunk store.
///
/// Each variant carries everything needed to build its inverse, so that
/// applying a command and then its `reverse()` restores the store byte for
/// byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditCommand {
    Insert {
        offset: u64,
        bytes: Vec<u8>,
    },
    Remove {
        offset: u64,
        removed: Vec<u8>,
    },
    /// In-place replacement; `bytes` and `previous` have the same length.
    Overwrite {
        offset: u64,
        bytes: Vec<u8>,
        previous: Vec<u8>,
    },
}

impl EditCommand {
    pub fn apply(&self, store: &mut ChunkStore) -> DocumentResult<()> {
        trace!(command = ?self.kind(), offset = self.offset(), len = self.len(), "apply");
        match self {
            EditCommand::Insert { offset, bytes } => store.insert(*offset, bytes),
            EditCommand::Remove { offset, removed } => {
                store.remove(*offset, removed.len() as u64).map(|_| ())
            }
            EditCommand::Overwrite { offset, bytes, .. } => {
                store.overwrite(*offset, bytes).map(|_| ())
            }
        }
    }

    pub fn reverse(&self) -> EditCommand {
        match self {
            EditCommand::Insert { offset, bytes } => EditCommand::Remove {
                offset: *offset,
                removed: bytes.clone(),
            },
            EditCommand::Remove { offset, removed } => EditCommand::Insert {
                offset: *offset,
                bytes: removed.clone(),
            },
            EditCommand::Overwrite {
                offset,
                bytes,
                previous,
            } => EditCommand::Overwrite {
                offset: *offset,
                bytes: previous.clone(),
                previous: bytes.clone(),
            },
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            EditCommand::Insert { .. } => CommandKind::Insert,
            EditCommand::Remove { .. } => CommandKind::Remove,
            EditCommand::Overwrite { .. } => CommandKind::Overwrite,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            EditCommand::Insert { offset, .. }
            | EditCommand::Remove { offset, .. }
            | EditCommand::Overwrite { offset, .. } => *offset,
        }
    }

    /// Number of bytes the command touches.
    pub fn len(&self) -> usize {
        match self {
            EditCommand::Insert { bytes, .. } | EditCommand::Overwrite { bytes, .. } => bytes.len(),
            EditCommand::Remove { removed, .. } => removed.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Change in document size caused by applying the command.
    pub fn size_delta(&self) -> i64 {
        match self {
            EditCommand::Insert { bytes, .. } => bytes.len() as i64,
            EditCommand::Remove { removed, .. } => -(removed.len() as i64),
            EditCommand::Overwrite { .. } => 0,
        }
    }

    /// Offset just past the edit once applied, where a caret would sit.
    pub fn end_position(&self) -> u64 {
        match self {
            EditCommand::Remove { offset, .. } => *offset,
            _ => self.offset() + self.len() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Insert,
    Remove,
    Overwrite,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_model::source::BackingSource;

    fn store() -> ChunkStore {
        let mut store = ChunkStore::new();
        store
            .attach(BackingSource::from_bytes((0u8..10).collect::<Vec<_>>()))
            .unwrap();
        store
    }

    fn round_trip(command: EditCommand) {
        let mut store = store();
        let before = store.data().unwrap();
        command.apply(&mut store).unwrap();
        assert_eq!(
            store.size() as i64,
            before.len() as i64 + command.size_delta()
        );
        command.reverse().apply(&mut store).unwrap();
        assert_eq!(store.data().unwrap(), before);
    }

    #[test]
    fn test_insert_inverse() {
        round_trip(EditCommand::Insert {
            offset: 3,
            bytes: vec![0xAA, 0xBB],
        });
    }

    #[test]
    fn test_remove_inverse() {
        round_trip(EditCommand::Remove {
            offset: 2,
            removed: vec![2, 3, 4],
        });
    }

    #[test]
    fn test_overwrite_inverse() {
        round_trip(EditCommand::Overwrite {
            offset: 8,
            bytes: vec![0xFF, 0xFF],
            previous: vec![8, 9],
        });
    }

    #[test]
    fn test_positions() {
        let insert = EditCommand::Insert {
            offset: 4,
            bytes: vec![1, 2, 3],
        };
        assert_eq!(insert.end_position(), 7);
        assert_eq!(insert.reverse().end_position(), 4);
        assert_eq!(insert.reverse().kind(), CommandKind::Remove);
    }

    #[test]
    fn test_out_of_range_apply_fails() {
        let mut store = store();
        let command = EditCommand::Insert {
            offset: 11,
            bytes: vec![1],
        };
        assert!(command.apply(&mut store).unwrap_err().is_out_of_range());
        assert_eq!(store.size(), 10);
    }
}
