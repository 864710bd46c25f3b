//! Tool model: definitions, local implementations, and their note form.
//!
//! A tool is a note of kind `Tool`. Its body (custom, orchestrated, or api)
//! is stored in the note's `config` so that a tool survives a round trip
//! through any [`NoteStore`](notable_storage::NoteStore).

pub mod dispatcher;
pub mod http;
pub mod registry;
pub mod schema;

pub use dispatcher::Dispatcher;
pub use http::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use registry::{RegisteredTool, ToolRegistry};
pub use schema::CompiledSchema;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use notable_core::types::{Note, NoteContent, NoteId, NoteKind, NoteStatus};

use crate::error::{BoxError, ToolError};

const BODY_KEY: &str = "tool";

/// Dispatch strategy of a tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolType {
    Custom,
    Orchestrated,
    Api,
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolType::Custom => write!(f, "custom"),
            ToolType::Orchestrated => write!(f, "orchestrated"),
            ToolType::Api => write!(f, "api"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthType {
    #[default]
    None,
    ApiKey,
}

/// Request settings of an api-backed tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiToolConfig {
    #[serde(default)]
    pub method: HttpMethod,
    /// Extra request headers as a JSON object string, e.g. `{"Accept": "application/json"}`.
    #[serde(default = "default_headers")]
    pub headers: String,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_value: Option<String>,
}

fn default_headers() -> String {
    "{}".to_string()
}

impl Default for ApiToolConfig {
    fn default() -> Self {
        Self {
            method: HttpMethod::default(),
            headers: default_headers(),
            auth_type: AuthType::default(),
            api_key_header: None,
            api_key_value: None,
        }
    }
}

impl ApiToolConfig {
    /// Parse `headers` into name/value pairs. Blank means no headers.
    pub fn parsed_headers(&self) -> Result<BTreeMap<String, String>, ToolError> {
        if self.headers.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let value: Value = serde_json::from_str(&self.headers)
            .map_err(|e| ToolError::Validation(format!("headers are not valid JSON: {}", e)))?;
        let Value::Object(map) = value else {
            return Err(ToolError::Validation(
                "headers must be a JSON object".to_string(),
            ));
        };
        Ok(map
            .into_iter()
            .map(|(name, value)| match value {
                Value::String(s) => (name, s),
                other => (name, other.to_string()),
            })
            .collect())
    }
}

/// Type-specific part of a tool definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolBody {
    /// Backed by a locally bound [`ToolImplementation`].
    Custom,
    /// Backed by the language model; `prompt` is a template rendered with the input.
    Orchestrated { prompt: String },
    /// Backed by an HTTP endpoint.
    Api {
        endpoint: String,
        #[serde(default)]
        config: ApiToolConfig,
    },
}

impl ToolBody {
    pub fn tool_type(&self) -> ToolType {
        match self {
            ToolBody::Custom => ToolType::Custom,
            ToolBody::Orchestrated { .. } => ToolType::Orchestrated,
            ToolBody::Api { .. } => ToolType::Api,
        }
    }
}

/// A tool registration record.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub id: NoteId,
    pub title: String,
    pub description: String,
    pub body: ToolBody,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub status: NoteStatus,
    pub priority: i64,
}

impl ToolDefinition {
    fn new(title: impl Into<String>, body: ToolBody) -> Self {
        Self {
            id: NoteId::new(),
            title: title.into(),
            description: String::new(),
            body,
            input_schema: None,
            output_schema: None,
            status: NoteStatus::Active,
            priority: 50,
        }
    }

    pub fn custom(title: impl Into<String>) -> Self {
        Self::new(title, ToolBody::Custom)
    }

    pub fn orchestrated(title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(
            title,
            ToolBody::Orchestrated {
                prompt: prompt.into(),
            },
        )
    }

    pub fn api(title: impl Into<String>, endpoint: impl Into<String>, config: ApiToolConfig) -> Self {
        Self::new(
            title,
            ToolBody::Api {
                endpoint: endpoint.into(),
                config,
            },
        )
    }

    pub fn with_id(mut self, id: NoteId) -> Self {
        self.id = id;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn tool_type(&self) -> ToolType {
        self.body.tool_type()
    }

    /// The note form of this definition.
    pub fn to_note(&self) -> Result<Note, ToolError> {
        let mut note = Note::new(NoteKind::Tool, self.title.clone());
        note.id = self.id;
        note.description = self.description.clone();
        note.content = NoteContent::with_text(self.description.clone());
        note.status = self.status;
        note.priority = self.priority;
        note.input_schema = self.input_schema.clone();
        note.output_schema = self.output_schema.clone();
        let body = serde_json::to_value(&self.body)
            .map_err(|e| ToolError::Validation(format!("unserializable tool body: {}", e)))?;
        note.config.insert(BODY_KEY.to_string(), body);
        Ok(note)
    }

    /// Rebuild a definition from a stored tool note.
    pub fn from_note(note: &Note) -> Result<Self, ToolError> {
        if note.kind != NoteKind::Tool {
            return Err(ToolError::Validation(format!(
                "note {} is a {} note, not a tool",
                note.id, note.kind
            )));
        }
        let raw = note
            .config
            .get(BODY_KEY)
            .cloned()
            .ok_or_else(|| ToolError::Validation(format!("tool note {} has no body", note.id)))?;
        let body: ToolBody = serde_json::from_value(raw)
            .map_err(|e| ToolError::Validation(format!("tool note {}: {}", note.id, e)))?;
        Ok(Self {
            id: note.id,
            title: note.title.clone(),
            description: note.description.clone(),
            body,
            input_schema: note.input_schema.clone(),
            output_schema: note.output_schema.clone(),
            status: note.status,
            priority: note.priority,
        })
    }
}

/// A locally implemented tool body.
#[async_trait]
pub trait ToolImplementation: Send + Sync {
    async fn call(&self, input: Value) -> Result<Value, BoxError>;
}

struct FnTool<F>(F);

#[async_trait]
impl<F, Fut> ToolImplementation for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    async fn call(&self, input: Value) -> Result<Value, BoxError> {
        (self.0)(input).await
    }
}

/// Wrap an async closure as a [`ToolImplementation`].
pub fn tool_fn<F, Fut>(f: F) -> Arc<dyn ToolImplementation>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(FnTool(f))
}
