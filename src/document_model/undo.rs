use super::chunk_store::ChunkStore;
use super::edit_command::EditCommand;
use super::error::{DocumentError, DocumentResult};
use tracing::{debug, warn};

/// Sent after every mutation that changed the document, and after undo and redo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub size: u64,
    pub modified: bool,
    /// Where the caret belongs after the change.
    pub position: u64,
}

/// Commands that are applied and undone as one step.
#[derive(Debug, Clone, Default)]
pub struct UndoGroup {
    pub commands: Vec<EditCommand>,
}

impl UndoGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Apply the commands in order. If one fails, the ones already applied
    /// are reverted so the store is left as it was.
    pub fn apply(&self, store: &mut ChunkStore) -> DocumentResult<()> {
        for (done, command) in self.commands.iter().enumerate() {
            if let Err(err) = command.apply(store) {
                for applied in self.commands[..done].iter().rev() {
                    if let Err(rollback) = applied.reverse().apply(store) {
                        warn!("rollback of {:?} failed: {rollback}", applied.kind());
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Apply the inverse of every command, last first.
    pub fn apply_reverse(&self, store: &mut ChunkStore) -> DocumentResult<()> {
        let reversed = UndoGroup {
            commands: self.commands.iter().rev().map(EditCommand::reverse).collect(),
        };
        reversed.apply(store)
    }

    fn position_after(&self) -> u64 {
        self.commands.last().map_or(0, EditCommand::end_position)
    }

    fn position_before(&self) -> u64 {
        self.commands.first().map_or(0, EditCommand::offset)
    }
}

/// A linear command log with a cursor.
///
/// Groups below the cursor are applied, groups at or above it can be redone.
/// Recording a new group discards everything above the cursor.
#[derive(Debug, Clone)]
pub struct UndoStack {
    groups: Vec<UndoGroup>,
    cursor: usize,
    /// Cursor value at which the store matches its source, if still reachable.
    clean: Option<usize>,
    current_group: Option<UndoGroup>,
    max_undo_levels: Option<usize>,
    position: u64,
}

impl UndoStack {
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            cursor: 0,
            clean: Some(0),
            current_group: None,
            max_undo_levels: None,
            position: 0,
        }
    }

    pub fn with_limit(max_undo_levels: Option<usize>) -> Self {
        Self {
            max_undo_levels,
            ..Self::new()
        }
    }

    pub fn set_limit(&mut self, max_undo_levels: Option<usize>) {
        self.max_undo_levels = max_undo_levels;
        self.enforce_limit();
    }

    pub fn insert(
        &mut self,
        store: &mut ChunkStore,
        offset: u64,
        bytes: &[u8],
    ) -> DocumentResult<Option<ChangeEvent>> {
        if offset > store.size() {
            return Err(DocumentError::out_of_range(offset, store.size()));
        }
        let command = EditCommand::Insert {
            offset,
            bytes: bytes.to_vec(),
        };
        self.record(store, vec![command])
    }

    pub fn remove_at(
        &mut self,
        store: &mut ChunkStore,
        offset: u64,
        length: u64,
    ) -> DocumentResult<Option<ChangeEvent>> {
        let removed = store.read(offset, length as usize)?;
        self.record(store, vec![EditCommand::Remove { offset, removed }])
    }

    /// Overwrite bytes in place. Whatever runs past the end of the document
    /// is recorded as an insertion, so the step inverts exactly.
    pub fn overwrite(
        &mut self,
        store: &mut ChunkStore,
        offset: u64,
        bytes: &[u8],
    ) -> DocumentResult<Option<ChangeEvent>> {
        let previous = store.read(offset, bytes.len())?;
        let (in_place, appended) = bytes.split_at(previous.len());

        let mut commands = Vec::with_capacity(2);
        if !in_place.is_empty() {
            commands.push(EditCommand::Overwrite {
                offset,
                bytes: in_place.to_vec(),
                previous,
            });
        }
        if !appended.is_empty() {
            commands.push(EditCommand::Insert {
                offset: store.size(),
                bytes: appended.to_vec(),
            });
        }
        self.record(store, commands)
    }

    /// Replace `length` bytes at `offset` with `bytes`, which may differ in
    /// length. Equal lengths overwrite in place; otherwise the step is a
    /// removal followed by an insertion, undone together.
    pub fn replace(
        &mut self,
        store: &mut ChunkStore,
        offset: u64,
        length: u64,
        bytes: &[u8],
    ) -> DocumentResult<Option<ChangeEvent>> {
        if length == bytes.len() as u64 {
            return self.overwrite(store, offset, bytes);
        }
        let removed = store.read(offset, length as usize)?;
        let mut commands = Vec::with_capacity(2);
        if !removed.is_empty() {
            commands.push(EditCommand::Remove { offset, removed });
        }
        if !bytes.is_empty() {
            commands.push(EditCommand::Insert {
                offset,
                bytes: bytes.to_vec(),
            });
        }
        self.record(store, commands)
    }

    /// Undo the group just below the cursor. Returns `None` when there is
    /// nothing to undo.
    pub fn undo(&mut self, store: &mut ChunkStore) -> DocumentResult<Option<ChangeEvent>> {
        self.end_group();
        if self.cursor == 0 {
            return Ok(None);
        }

        let group = &self.groups[self.cursor - 1];
        group.apply_reverse(store)?;
        self.position = group.position_before();
        self.cursor -= 1;
        debug!(cursor = self.cursor, "undo");
        Ok(Some(self.event(store)))
    }

    /// Reapply the group at the cursor. Returns `None` when there is nothing
    /// to redo.
    pub fn redo(&mut self, store: &mut ChunkStore) -> DocumentResult<Option<ChangeEvent>> {
        self.end_group();
        if self.cursor == self.groups.len() {
            return Ok(None);
        }

        let group = &self.groups[self.cursor];
        group.apply(store)?;
        self.position = group.position_after();
        self.cursor += 1;
        debug!(cursor = self.cursor, "redo");
        Ok(Some(self.event(store)))
    }

    /// Start collecting edits into a single undo step.
    pub fn begin_group(&mut self) {
        self.end_group();
        self.current_group = Some(UndoGroup::new());
    }

    /// Close the open group, if any, and record it.
    pub fn end_group(&mut self) {
        if let Some(group) = self.current_group.take() {
            if !group.is_empty() {
                self.push_undo_group(group);
            }
        }
    }

    /// Drop all history. The store content is left alone and the current
    /// state becomes the clean one.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.cursor = 0;
        self.clean = Some(0);
        self.current_group = None;
        self.position = 0;
    }

    /// Mark the current state as matching what is on disk.
    pub fn set_clean(&mut self) {
        self.end_group();
        self.clean = Some(self.cursor);
    }

    pub fn index(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0 || self.current_group.as_ref().is_some_and(|g| !g.is_empty())
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.groups.len()
    }

    pub fn is_modified(&self) -> bool {
        let pending = self.current_group.as_ref().is_some_and(|g| !g.is_empty());
        pending || self.clean != Some(self.cursor)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Apply and log the non-empty commands as one step. Returns `None`
    /// without touching history when there is nothing to do.
    fn record(
        &mut self,
        store: &mut ChunkStore,
        mut commands: Vec<EditCommand>,
    ) -> DocumentResult<Option<ChangeEvent>> {
        commands.retain(|command| !command.is_empty());
        let group = UndoGroup { commands };
        if group.is_empty() {
            return Ok(None);
        }
        group.apply(store)?;
        self.position = group.position_after();

        match self.current_group.as_mut() {
            Some(open) => open.commands.extend(group.commands),
            None => self.push_undo_group(group),
        }
        Ok(Some(self.event(store)))
    }

    fn push_undo_group(&mut self, group: UndoGroup) {
        // Clear redo history when new actions are performed
        self.groups.truncate(self.cursor);
        if self.clean.is_some_and(|clean| clean > self.cursor) {
            self.clean = None;
        }
        self.groups.push(group);
        self.cursor += 1;
        self.enforce_limit();
    }

    fn enforce_limit(&mut self) {
        let Some(limit) = self.max_undo_levels else {
            return;
        };
        while self.groups.len() > limit && self.cursor > 0 {
            self.groups.remove(0);
            self.cursor -= 1;
            self.clean = self.clean.and_then(|clean| clean.checked_sub(1));
        }
    }

    fn event(&self, store: &ChunkStore) -> ChangeEvent {
        ChangeEvent {
            size: store.size(),
            modified: self.is_modified(),
            position: self.position,
        }
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_model::source::BackingSource;

    fn setup(len: u8) -> (ChunkStore, UndoStack) {
        let mut store = ChunkStore::new();
        store
            .attach(BackingSource::from_bytes((0..len).collect::<Vec<_>>()))
            .unwrap();
        (store, UndoStack::new())
    }

    #[test]
    fn test_insert_then_undo_redo() {
        let (mut store, mut undo) = setup(16);
        let event = undo.insert(&mut store, 4, &[0x41]).unwrap().unwrap();
        assert_eq!(event.size, 17);
        assert!(event.modified);
        assert_eq!(event.position, 5);

        let event = undo.undo(&mut store).unwrap().unwrap();
        assert_eq!(event.size, 16);
        assert!(!event.modified);
        assert_eq!(event.position, 4);
        assert_eq!(store.data().unwrap(), (0..16).collect::<Vec<u8>>());

        undo.redo(&mut store).unwrap().unwrap();
        assert_eq!(store.read(3, 3).unwrap(), vec![3, 0x41, 4]);
    }

    #[test]
    fn test_noop_undo_redo() {
        let (mut store, mut undo) = setup(4);
        assert!(undo.undo(&mut store).unwrap().is_none());
        assert!(undo.redo(&mut store).unwrap().is_none());
        assert!(!undo.can_undo());
        assert!(!undo.can_redo());
    }

    #[test]
    fn test_empty_edits_leave_history_alone() {
        let (mut store, mut undo) = setup(8);
        undo.insert(&mut store, 2, &[0x41]).unwrap();
        undo.undo(&mut store).unwrap();

        assert!(undo.insert(&mut store, 2, &[]).unwrap().is_none());
        assert!(undo.remove_at(&mut store, 1, 0).unwrap().is_none());
        assert!(undo.remove_at(&mut store, 8, 4).unwrap().is_none());
        assert!(undo.overwrite(&mut store, 3, &[]).unwrap().is_none());
        assert!(undo.replace(&mut store, 3, 0, &[]).unwrap().is_none());
        assert!(undo.insert(&mut store, 9, &[]).unwrap_err().is_out_of_range());

        assert_eq!(undo.index(), 0);
        assert!(undo.can_redo());
        assert!(!undo.is_modified());
        assert_eq!(store.size(), 8);
    }

    #[test]
    fn test_new_edit_discards_redo_tail() {
        let (mut store, mut undo) = setup(8);
        undo.insert(&mut store, 0, &[1]).unwrap();
        undo.insert(&mut store, 0, &[2]).unwrap();
        undo.undo(&mut store).unwrap();
        undo.undo(&mut store).unwrap();
        assert!(undo.can_redo());

        undo.remove_at(&mut store, 0, 1).unwrap();
        assert!(!undo.can_redo());
        assert_eq!(undo.len(), 1);
        assert!(undo.redo(&mut store).unwrap().is_none());
    }

    #[test]
    fn test_failed_edit_is_not_recorded() {
        let (mut store, mut undo) = setup(8);
        undo.insert(&mut store, 1, &[9]).unwrap();
        assert!(undo.insert(&mut store, 100, &[1]).unwrap_err().is_out_of_range());
        assert!(undo.remove_at(&mut store, 100, 1).is_err());
        assert_eq!(undo.index(), 1);
        assert_eq!(store.size(), 9);
    }

    #[test]
    fn test_replace_with_different_length_is_one_step() {
        let (mut store, mut undo) = setup(8);
        undo.replace(&mut store, 2, 3, &[0xAA]).unwrap();
        assert_eq!(store.data().unwrap(), vec![0, 1, 0xAA, 5, 6, 7]);
        assert_eq!(undo.index(), 1);

        undo.undo(&mut store).unwrap();
        assert_eq!(store.data().unwrap(), (0..8).collect::<Vec<u8>>());
    }

    #[test]
    fn test_overwrite_past_end_inverts() {
        let (mut store, mut undo) = setup(4);
        undo.overwrite(&mut store, 3, &[9, 9, 9]).unwrap();
        assert_eq!(store.data().unwrap(), vec![0, 1, 2, 9, 9, 9]);
        undo.undo(&mut store).unwrap();
        assert_eq!(store.data().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_explicit_group_undoes_as_unit() {
        let (mut store, mut undo) = setup(4);
        undo.begin_group();
        undo.insert(&mut store, 0, &[7]).unwrap();
        undo.overwrite(&mut store, 1, &[8]).unwrap();
        undo.remove_at(&mut store, 4, 1).unwrap();
        assert!(undo.is_modified());
        undo.end_group();
        assert_eq!(undo.len(), 1);

        undo.undo(&mut store).unwrap();
        assert_eq!(store.data().unwrap(), vec![0, 1, 2, 3]);
        assert!(!undo.is_modified());
    }

    #[test]
    fn test_modified_tracks_clean_marker() {
        let (mut store, mut undo) = setup(4);
        undo.insert(&mut store, 0, &[1]).unwrap();
        undo.set_clean();
        assert!(!undo.is_modified());
        undo.undo(&mut store).unwrap();
        assert!(undo.is_modified());
        undo.redo(&mut store).unwrap();
        assert!(!undo.is_modified());

        undo.undo(&mut store).unwrap();
        undo.insert(&mut store, 0, &[2]).unwrap();
        // the clean state was in the discarded redo tail
        undo.undo(&mut store).unwrap();
        assert!(undo.is_modified());
    }

    #[test]
    fn test_undo_limit_drops_oldest() {
        let (mut store, mut undo) = setup(4);
        undo.set_limit(Some(2));
        for i in 0..5 {
            undo.insert(&mut store, 0, &[i]).unwrap();
        }
        assert_eq!(undo.len(), 2);
        undo.undo(&mut store).unwrap();
        undo.undo(&mut store).unwrap();
        assert!(undo.undo(&mut store).unwrap().is_none());
        assert_eq!(store.size(), 7);
        assert!(undo.is_modified());
    }

    #[test]
    fn test_clear_keeps_content() {
        let (mut store, mut undo) = setup(4);
        undo.insert(&mut store, 0, &[5]).unwrap();
        undo.clear();
        assert_eq!(undo.index(), 0);
        assert!(!undo.is_modified());
        assert_eq!(store.size(), 5);
    }
}
