//! Database schema migrations.
//!
//! The note graph is a single subject/predicate/object table plus the
//! schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use notable_core::error::NotableError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), NotableError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| NotableError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| NotableError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: note_graph");
    }

    Ok(())
}

/// Version 1: triple table.
///
/// Each note is a subject with a `type` and a `data` predicate; references
/// are `subject --references--> object` edges ordered by `position`.
fn apply_v1(conn: &Connection) -> Result<(), NotableError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS triples (
            subject     TEXT NOT NULL,
            predicate   TEXT NOT NULL
                        CHECK (predicate IN ('type', 'data', 'references')),
            object      TEXT NOT NULL,
            position    INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (subject, predicate, object)
        );

        CREATE INDEX IF NOT EXISTS idx_triples_object
            ON triples (object, predicate);

        CREATE INDEX IF NOT EXISTS idx_triples_predicate
            ON triples (predicate, object);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'note_graph');
        ",
    )
    .map_err(|e| NotableError::Storage(format!("Migration v1 failed: {}", e)))?;
    Ok(())
}
