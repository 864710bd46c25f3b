//! Notable storage crate - the note persistence contract and its backends.
//!
//! Provides the `NoteStore` trait, a volatile in-memory implementation, and
//! a durable SQLite triple-graph implementation with migrations.

pub mod db;
pub mod graph;
pub mod memory;
pub mod migrations;
pub mod store;

pub use db::Database;
pub use graph::GraphNoteStore;
pub use memory::MemoryNoteStore;
pub use store::NoteStore;
