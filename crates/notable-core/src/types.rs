use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::pipeline::Pipeline;

// =============================================================================
// Identifiers
// =============================================================================

/// Globally unique identifier of a note. Immutable once assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(pub Uuid);

impl NoteId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(NoteId)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Determines how a note's `content` and `logic` are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoteKind {
    Task,
    Tool,
    Template,
    System,
    Root,
    /// Plain record with no execution semantics.
    Generic,
}

impl fmt::Display for NoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteKind::Task => write!(f, "task"),
            NoteKind::Tool => write!(f, "tool"),
            NoteKind::Template => write!(f, "template"),
            NoteKind::System => write!(f, "system"),
            NoteKind::Root => write!(f, "root"),
            NoteKind::Generic => write!(f, "generic"),
        }
    }
}

impl FromStr for NoteKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(NoteKind::Task),
            "tool" => Ok(NoteKind::Tool),
            "template" => Ok(NoteKind::Template),
            "system" => Ok(NoteKind::System),
            "root" => Ok(NoteKind::Root),
            "generic" => Ok(NoteKind::Generic),
            _ => Err(format!("Unknown note kind: {}", s)),
        }
    }
}

/// Note lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoteStatus {
    Pending,
    Active,
    Running,
    Completed,
    Failed,
    Dormant,
    Bypassed,
    PendingRefinement,
}

impl NoteStatus {
    /// Whether a note in this status may be admitted to `Running`.
    pub fn is_runnable(self) -> bool {
        matches!(self, NoteStatus::Pending | NoteStatus::Active)
    }
}

impl fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoteStatus::Pending => write!(f, "pending"),
            NoteStatus::Active => write!(f, "active"),
            NoteStatus::Running => write!(f, "running"),
            NoteStatus::Completed => write!(f, "completed"),
            NoteStatus::Failed => write!(f, "failed"),
            NoteStatus::Dormant => write!(f, "dormant"),
            NoteStatus::Bypassed => write!(f, "bypassed"),
            NoteStatus::PendingRefinement => write!(f, "pendingRefinement"),
        }
    }
}

impl FromStr for NoteStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NoteStatus::Pending),
            "active" => Ok(NoteStatus::Active),
            "running" => Ok(NoteStatus::Running),
            "completed" => Ok(NoteStatus::Completed),
            "failed" => Ok(NoteStatus::Failed),
            "dormant" => Ok(NoteStatus::Dormant),
            "bypassed" => Ok(NoteStatus::Bypassed),
            "pendingRefinement" => Ok(NoteStatus::PendingRefinement),
            _ => Err(format!("Unknown note status: {}", s)),
        }
    }
}

/// Author tag of a transcript message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageRole {
    User,
    System,
    Tool,
    Error,
}

// =============================================================================
// Content
// =============================================================================

/// One timestamped entry of a note's transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub timestamp: DateTime<Utc>,
    pub role: MessageRole,
    pub content: String,
}

impl TranscriptMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            role,
            content: content.into(),
        }
    }
}

/// Free-form payload of a note.
///
/// Task notes keep their transcript and retry counter here. Unknown keys are
/// preserved in `extra` so records written by other clients survive a
/// read-modify-write cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub messages: Vec<TranscriptMessage>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl NoteContent {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

// =============================================================================
// Note
// =============================================================================

/// The universal work-item record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub kind: NoteKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: NoteContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<Pipeline>,
    pub status: NoteStatus,
    #[serde(default)]
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub references: Vec<NoteId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_web_search: Option<bool>,
}

impl Note {
    /// Create a pending note of the given kind with a fresh id.
    pub fn new(kind: NoteKind, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: NoteId::new(),
            kind,
            title: title.into(),
            description: String::new(),
            content: NoteContent::default(),
            logic: None,
            status: NoteStatus::Pending,
            priority: 0,
            created_at: now,
            updated_at: now,
            references: Vec::new(),
            input_schema: None,
            output_schema: None,
            config: BTreeMap::new(),
            requires_web_search: None,
        }
    }

    /// Create a pending task note.
    pub fn task(title: impl Into<String>, priority: i64) -> Self {
        let mut note = Self::new(NoteKind::Task, title);
        note.priority = priority;
        note
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_logic(mut self, logic: Pipeline) -> Self {
        self.logic = Some(logic);
        self
    }

    /// Append a transcript message.
    pub fn push_message(&mut self, role: MessageRole, content: impl Into<String>) {
        self.content.messages.push(TranscriptMessage::new(role, content));
    }

    /// Add `target` to this note's references unless already present.
    /// Returns `true` if the reference was added.
    pub fn link(&mut self, target: NoteId) -> bool {
        if self.references.contains(&target) {
            return false;
        }
        self.references.push(target);
        true
    }

    /// Drop repeated references, keeping the first occurrence of each.
    /// Stores hold references as a set of edges.
    pub fn dedup_references(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.references.retain(|id| seen.insert(*id));
    }

    /// Stamp `updated_at` with the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
