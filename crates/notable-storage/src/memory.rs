//! Volatile note store backed by a `HashMap`. Lives for the process only.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use notable_core::error::{NotableError, Result};
use notable_core::types::{Note, NoteId};

use crate::store::NoteStore;

/// In-memory note store.
pub struct MemoryNoteStore {
    notes: Mutex<HashMap<NoteId, Note>>,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self {
            notes: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<NoteId, Note>>> {
        self.notes
            .lock()
            .map_err(|e| NotableError::Storage(format!("Lock poisoned: {}", e)))
    }
}

impl Default for MemoryNoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn get(&self, id: NoteId) -> Result<Option<Note>> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Note>> {
        let mut notes: Vec<Note> = self.lock()?.values().cloned().collect();
        notes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(notes)
    }

    async fn add(&self, mut note: Note) -> Result<()> {
        note.dedup_references();
        let mut notes = self.lock()?;
        if notes.contains_key(&note.id) {
            return Err(NotableError::Storage(format!(
                "Note already exists: {}",
                note.id
            )));
        }
        notes.insert(note.id, note);
        Ok(())
    }

    async fn update(&self, mut note: Note) -> Result<Note> {
        note.dedup_references();
        note.touch();
        self.lock()?.insert(note.id, note.clone());
        Ok(note)
    }

    async fn delete(&self, id: NoteId) -> Result<bool> {
        let mut notes = self.lock()?;
        let existed = notes.remove(&id).is_some();
        if existed {
            for other in notes.values_mut() {
                other.references.retain(|r| *r != id);
            }
        }
        Ok(existed)
    }

    async fn get_references(&self, id: NoteId) -> Result<Vec<NoteId>> {
        Ok(self
            .lock()?
            .get(&id)
            .map(|n| n.references.clone())
            .unwrap_or_default())
    }

    async fn add_reference(&self, from: NoteId, to: NoteId) -> Result<()> {
        let mut notes = self.lock()?;
        let note = notes.get_mut(&from).ok_or(NotableError::NoteNotFound(from))?;
        if note.link(to) {
            note.touch();
        }
        Ok(())
    }

    async fn remove_reference(&self, from: NoteId, to: NoteId) -> Result<()> {
        let mut notes = self.lock()?;
        let note = notes.get_mut(&from).ok_or(NotableError::NoteNotFound(from))?;
        let before = note.references.len();
        note.references.retain(|r| *r != to);
        if note.references.len() != before {
            note.touch();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notable_core::types::NoteStatus;

    #[tokio::test]
    async fn test_add_then_get_returns_equal_value() {
        let store = MemoryNoteStore::new();
        let note = Note::task("Round trip", 7).with_description("desc");
        store.add(note.clone()).await.unwrap();
        assert_eq!(store.get(note.id).await.unwrap(), Some(note));
    }

    #[tokio::test]
    async fn test_add_duplicate_fails() {
        let store = MemoryNoteStore::new();
        let note = Note::task("dup", 0);
        store.add(note.clone()).await.unwrap();
        let err = store.add(note).await.unwrap_err();
        assert!(matches!(err, NotableError::Storage(_)));
    }

    #[tokio::test]
    async fn test_update_reflects_change_and_stamps() {
        let store = MemoryNoteStore::new();
        let note = Note::task("before", 1);
        store.add(note.clone()).await.unwrap();

        let mut changed = note.clone();
        changed.title = "after".to_string();
        changed.status = NoteStatus::Active;
        let stored = store.update(changed).await.unwrap();

        let fetched = store.get(note.id).await.unwrap().unwrap();
        assert_eq!(fetched, stored);
        assert_eq!(fetched.title, "after");
        assert_eq!(fetched.status, NoteStatus::Active);
        assert_eq!(fetched.priority, note.priority);
        assert_eq!(fetched.created_at, note.created_at);
        assert!(fetched.updated_at >= note.updated_at);
    }

    #[tokio::test]
    async fn test_update_upserts_missing_note() {
        let store = MemoryNoteStore::new();
        let note = Note::task("new", 0);
        store.update(note.clone()).await.unwrap();
        assert!(store.get(note.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_then_get_is_not_found() {
        let store = MemoryNoteStore::new();
        let note = Note::task("gone", 0);
        store.add(note.clone()).await.unwrap();
        assert!(store.delete(note.id).await.unwrap());
        assert!(store.get(note.id).await.unwrap().is_none());
        assert!(!store.delete(note.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_references_roundtrip() {
        let store = MemoryNoteStore::new();
        let a = Note::task("a", 0);
        let b = Note::task("b", 0);
        let c = Note::task("c", 0);
        for n in [&a, &b, &c] {
            store.add(n.clone()).await.unwrap();
        }

        store.add_reference(a.id, b.id).await.unwrap();
        store.add_reference(a.id, c.id).await.unwrap();
        store.add_reference(a.id, b.id).await.unwrap();
        assert_eq!(store.get_references(a.id).await.unwrap(), vec![b.id, c.id]);

        store.remove_reference(a.id, b.id).await.unwrap();
        assert_eq!(store.get_references(a.id).await.unwrap(), vec![c.id]);
    }

    #[tokio::test]
    async fn test_add_reference_missing_source() {
        let store = MemoryNoteStore::new();
        let err = store
            .add_reference(NoteId::new(), NoteId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NotableError::NoteNotFound(_)));
        assert!(store.get_references(NoteId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_drops_inbound_references() {
        let store = MemoryNoteStore::new();
        let a = Note::task("a", 0);
        let b = Note::task("b", 0);
        store.add(a.clone()).await.unwrap();
        store.add(b.clone()).await.unwrap();
        store.add_reference(a.id, b.id).await.unwrap();

        store.delete(b.id).await.unwrap();
        assert!(store.get_references(a.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_all_oldest_first() {
        let store = MemoryNoteStore::new();
        let mut first = Note::task("first", 0);
        first.created_at = first.created_at - chrono::Duration::seconds(10);
        let second = Note::task("second", 0);
        store.add(second.clone()).await.unwrap();
        store.add(first.clone()).await.unwrap();

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[1].id, second.id);
    }

    #[tokio::test]
    async fn test_repeated_references_stored_once() {
        let store = MemoryNoteStore::new();
        let (a, b) = (NoteId::new(), NoteId::new());
        let mut note = Note::task("links", 1);
        note.references = vec![a, b, a];
        store.add(note.clone()).await.unwrap();

        let mut expected = note.clone();
        expected.references = vec![a, b];
        assert_eq!(store.get(note.id).await.unwrap(), Some(expected));

        note.references = vec![b, b];
        let stored = store.update(note.clone()).await.unwrap();
        assert_eq!(stored.references, vec![b]);
        assert_eq!(store.get_references(note.id).await.unwrap(), vec![b]);
    }
}
