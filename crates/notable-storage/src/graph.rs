//! Durable note store modelled as a triple graph in SQLite.
//!
//! A note `n` is stored as `(n, type, <kind>)` and `(n, data, <json>)`.
//! Each reference is an edge `(n, references, <target>)` whose `position`
//! preserves list order. Edges are the source of truth for `references`;
//! the JSON blob is written with an empty reference list.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use notable_core::error::{NotableError, Result};
use notable_core::types::{Note, NoteId, NoteKind};

use crate::db::Database;
use crate::store::NoteStore;

const PRED_TYPE: &str = "type";
const PRED_DATA: &str = "data";
const PRED_REFERENCES: &str = "references";

/// SQLite-backed note graph.
pub struct GraphNoteStore {
    db: Arc<Database>,
}

impl GraphNoteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open a store over a fresh in-memory database.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Database::in_memory()?)))
    }

    /// Every note id transitively reachable from `id` through reference
    /// edges, excluding `id` itself. Cycles are followed once.
    pub async fn reachable(&self, id: NoteId) -> Result<Vec<NoteId>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "WITH RECURSIVE reach(node) AS (
                         SELECT object FROM triples
                         WHERE subject = ?1 AND predicate = 'references'
                         UNION
                         SELECT t.object FROM triples t
                         JOIN reach r ON t.subject = r.node
                         WHERE t.predicate = 'references'
                     )
                     SELECT node FROM reach WHERE node != ?1 ORDER BY node",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            collect_ids(rows)
        })
    }

    /// Ids of notes whose references contain `id`.
    pub async fn referenced_by(&self, id: NoteId) -> Result<Vec<NoteId>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT subject FROM triples
                     WHERE predicate = 'references' AND object = ?1
                     ORDER BY subject",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            collect_ids(rows)
        })
    }

    /// Ids of every note of the given kind.
    pub async fn ids_of_kind(&self, kind: NoteKind) -> Result<Vec<NoteId>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT subject FROM triples
                     WHERE predicate = 'type' AND object = ?1
                     ORDER BY subject",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(params![kind.to_string()], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            collect_ids(rows)
        })
    }
}

#[async_trait]
impl NoteStore for GraphNoteStore {
    async fn get(&self, id: NoteId) -> Result<Option<Note>> {
        self.db.with_conn(|conn| load_note(conn, id))
    }

    async fn get_all(&self) -> Result<Vec<Note>> {
        let mut notes = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT subject FROM triples WHERE predicate = 'data'")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            let ids = collect_ids(rows)?;

            let mut notes = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(note) = load_note(conn, id)? {
                    notes.push(note);
                }
            }
            Ok(notes)
        })?;
        notes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(notes)
    }

    async fn add(&self, mut note: Note) -> Result<()> {
        note.dedup_references();
        self.db.with_conn(|conn| {
            if note_exists(conn, note.id)? {
                return Err(NotableError::Storage(format!(
                    "Note already exists: {}",
                    note.id
                )));
            }
            write_note(conn, &note)
        })?;
        debug!(note_id = %note.id, kind = %note.kind, "Note added to graph");
        Ok(())
    }

    async fn update(&self, mut note: Note) -> Result<Note> {
        note.dedup_references();
        note.touch();
        self.db.with_conn(|conn| write_note(conn, &note))?;
        Ok(note)
    }

    async fn delete(&self, id: NoteId) -> Result<bool> {
        self.db.with_conn(|conn| {
            let key = id.to_string();
            let removed = conn
                .execute(
                    "DELETE FROM triples WHERE subject = ?1 AND predicate = 'data'",
                    params![key],
                )
                .map_err(storage_err)?;
            conn.execute(
                "DELETE FROM triples
                 WHERE subject = ?1 OR (predicate = 'references' AND object = ?1)",
                params![key],
            )
            .map_err(storage_err)?;
            Ok(removed > 0)
        })
    }

    async fn get_references(&self, id: NoteId) -> Result<Vec<NoteId>> {
        self.db.with_conn(|conn| load_references(conn, id))
    }

    async fn add_reference(&self, from: NoteId, to: NoteId) -> Result<()> {
        self.db.with_conn(|conn| {
            let mut note = load_note(conn, from)?.ok_or(NotableError::NoteNotFound(from))?;
            if !note.link(to) {
                return Ok(());
            }
            note.touch();

            let tx = conn.unchecked_transaction().map_err(storage_err)?;
            tx.execute(
                "INSERT INTO triples (subject, predicate, object, position)
                 SELECT ?1, 'references', ?2, COALESCE(MAX(position) + 1, 0)
                 FROM triples WHERE subject = ?1 AND predicate = 'references'",
                params![from.to_string(), to.to_string()],
            )
            .map_err(storage_err)?;
            write_data(&tx, &note)?;
            tx.commit().map_err(storage_err)
        })
    }

    async fn remove_reference(&self, from: NoteId, to: NoteId) -> Result<()> {
        self.db.with_conn(|conn| {
            let mut note = load_note(conn, from)?.ok_or(NotableError::NoteNotFound(from))?;
            let tx = conn.unchecked_transaction().map_err(storage_err)?;
            let removed = tx
                .execute(
                    "DELETE FROM triples
                     WHERE subject = ?1 AND predicate = 'references' AND object = ?2",
                    params![from.to_string(), to.to_string()],
                )
                .map_err(storage_err)?;
            if removed > 0 {
                note.touch();
                write_data(&tx, &note)?;
            }
            tx.commit().map_err(storage_err)
        })
    }
}

fn storage_err(e: rusqlite::Error) -> NotableError {
    NotableError::Storage(e.to_string())
}

fn parse_id(raw: &str) -> Result<NoteId> {
    raw.parse()
        .map_err(|e| NotableError::Storage(format!("Corrupt note id {:?}: {}", raw, e)))
}

fn collect_ids<I>(rows: I) -> Result<Vec<NoteId>>
where
    I: Iterator<Item = rusqlite::Result<String>>,
{
    let mut ids = Vec::new();
    for row in rows {
        ids.push(parse_id(&row.map_err(storage_err)?)?);
    }
    Ok(ids)
}

fn note_exists(conn: &Connection, id: NoteId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM triples WHERE subject = ?1 AND predicate = 'data'",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage_err)?;
    Ok(found.is_some())
}

fn load_note(conn: &Connection, id: NoteId) -> Result<Option<Note>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT object FROM triples WHERE subject = ?1 AND predicate = 'data'",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage_err)?;

    let Some(data) = data else {
        return Ok(None);
    };
    let mut note: Note = serde_json::from_str(&data)?;
    note.references = load_references(conn, id)?;
    Ok(Some(note))
}

fn load_references(conn: &Connection, id: NoteId) -> Result<Vec<NoteId>> {
    let mut stmt = conn
        .prepare(
            "SELECT object FROM triples
             WHERE subject = ?1 AND predicate = 'references'
             ORDER BY position",
        )
        .map_err(storage_err)?;
    let rows = stmt
        .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
        .map_err(storage_err)?;
    collect_ids(rows)
}

/// Serialize the note without its references, which live as edges.
fn data_blob(note: &Note) -> Result<String> {
    let mut value = serde_json::to_value(note)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("references".to_string(), serde_json::Value::Array(Vec::new()));
    }
    Ok(serde_json::to_string(&value)?)
}

fn write_data(conn: &Connection, note: &Note) -> Result<()> {
    let key = note.id.to_string();
    conn.execute(
        "DELETE FROM triples WHERE subject = ?1 AND predicate = 'data'",
        params![key],
    )
    .map_err(storage_err)?;
    conn.execute(
        "INSERT INTO triples (subject, predicate, object) VALUES (?1, ?2, ?3)",
        params![key, PRED_DATA, data_blob(note)?],
    )
    .map_err(storage_err)?;
    Ok(())
}

/// Replace every triple of the note in one transaction.
fn write_note(conn: &Connection, note: &Note) -> Result<()> {
    let key = note.id.to_string();
    let tx = conn.unchecked_transaction().map_err(storage_err)?;

    tx.execute("DELETE FROM triples WHERE subject = ?1", params![key])
        .map_err(storage_err)?;
    tx.execute(
        "INSERT INTO triples (subject, predicate, object) VALUES (?1, ?2, ?3)",
        params![key, PRED_TYPE, note.kind.to_string()],
    )
    .map_err(storage_err)?;
    write_data(&tx, note)?;

    let mut position: i64 = 0;
    for target in &note.references {
        tx.execute(
            "INSERT INTO triples (subject, predicate, object, position)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, PRED_REFERENCES, target.to_string(), position],
        )
        .map_err(storage_err)?;
        position += 1;
    }

    tx.commit().map_err(storage_err)
}
