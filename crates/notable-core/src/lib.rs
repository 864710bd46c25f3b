//! Core domain model for Notable.
//!
//! Notes, their status lifecycle, step pipelines, domain events, and
//! configuration shared by every other crate.

pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod types;

pub use config::NotableConfig;
pub use error::{NotableError, Result};
pub use events::{EventBus, NoteEvent, Subscription};
pub use pipeline::{Pipeline, Step, StepAction};
pub use types::*;
