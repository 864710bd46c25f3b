//! The persistence contract shared by every note backend.

use async_trait::async_trait;

use notable_core::error::Result;
use notable_core::types::{Note, NoteId};

/// Persistence of notes and their reference edges.
///
/// Implementations must be linearizable per note id. `update` is an upsert
/// with last-write-wins semantics and always stamps `updated_at`.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Fetch a note, or `None` if it does not exist.
    async fn get(&self, id: NoteId) -> Result<Option<Note>>;

    /// Every stored note, oldest first.
    async fn get_all(&self) -> Result<Vec<Note>>;

    /// Insert a new note exactly as given. Fails if the id is taken.
    async fn add(&self, note: Note) -> Result<()>;

    /// Insert or replace a note, returning the stored value.
    async fn update(&self, note: Note) -> Result<Note>;

    /// Remove a note and every edge touching it. Returns whether it existed.
    async fn delete(&self, id: NoteId) -> Result<bool>;

    /// Outgoing references of a note in insertion order. Empty if the note
    /// does not exist.
    async fn get_references(&self, id: NoteId) -> Result<Vec<NoteId>>;

    /// Append `to` to the references of `from` unless already present.
    async fn add_reference(&self, from: NoteId, to: NoteId) -> Result<()>;

    /// Remove `to` from the references of `from`.
    async fn remove_reference(&self, from: NoteId, to: NoteId) -> Result<()>;
}
