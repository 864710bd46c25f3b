//! Executes a single tool invocation, dispatching on the tool's type.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::llm::LanguageModel;
use crate::tool::http::{HttpRequest, HttpTransport};
use crate::tool::registry::RegisteredTool;
use crate::tool::{ApiToolConfig, AuthType, HttpMethod, ToolBody};

const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Runs tools against their backing implementation, model, or endpoint.
pub struct Dispatcher {
    http: Arc<dyn HttpTransport>,
    llm: Option<Arc<dyn LanguageModel>>,
}

impl Dispatcher {
    pub fn new(http: Arc<dyn HttpTransport>, llm: Option<Arc<dyn LanguageModel>>) -> Self {
        Self { http, llm }
    }

    pub fn language_model(&self) -> Option<&Arc<dyn LanguageModel>> {
        self.llm.as_ref()
    }

    pub async fn execute(&self, tool: &RegisteredTool, input: Value) -> Result<Value, ToolError> {
        let definition = tool.definition();
        debug!(tool_id = %definition.id, tool_type = %definition.tool_type(), "Dispatching tool");

        match &definition.body {
            ToolBody::Custom => self.execute_custom(tool, input).await,
            ToolBody::Orchestrated { prompt } => self.execute_orchestrated(tool, prompt, input).await,
            ToolBody::Api { endpoint, config } => {
                self.execute_api(tool, endpoint, config, input).await
            }
        }
    }

    async fn execute_custom(&self, tool: &RegisteredTool, input: Value) -> Result<Value, ToolError> {
        let implementation = tool.implementation().ok_or_else(|| ToolError::Execution {
            tool_id: tool.id(),
            message: "no implementation is bound to this tool".to_string(),
        })?;
        implementation
            .call(input)
            .await
            .map_err(|e| ToolError::Execution {
                tool_id: tool.id(),
                message: e.to_string(),
            })
    }

    async fn execute_orchestrated(
        &self,
        tool: &RegisteredTool,
        template: &str,
        input: Value,
    ) -> Result<Value, ToolError> {
        if let Some(schema) = tool.input_schema() {
            schema.validate(&input, "input")?;
        }

        let llm = self.llm.as_ref().ok_or_else(|| ToolError::Execution {
            tool_id: tool.id(),
            message: "no language model is configured".to_string(),
        })?;

        let prompt = render_template(template, &input);
        let reply = llm.invoke(&prompt).await.map_err(|e| ToolError::Execution {
            tool_id: tool.id(),
            message: e.to_string(),
        })?;

        let output = parse_reply(&reply);
        if let Some(schema) = tool.output_schema() {
            schema.validate(&output, "output")?;
        }
        Ok(output)
    }

    async fn execute_api(
        &self,
        tool: &RegisteredTool,
        endpoint: &str,
        config: &ApiToolConfig,
        input: Value,
    ) -> Result<Value, ToolError> {
        let mut headers = config.parsed_headers()?;
        if config.auth_type == AuthType::ApiKey {
            if let Some(key) = config.api_key_value.as_deref().filter(|k| !k.is_empty()) {
                let name = config
                    .api_key_header
                    .as_deref()
                    .filter(|h| !h.is_empty())
                    .unwrap_or(DEFAULT_API_KEY_HEADER);
                headers.insert(name.to_string(), key.to_string());
            }
        }

        let body = match config.method {
            HttpMethod::Get => None,
            _ => Some(input),
        };

        let response = self
            .http
            .send(HttpRequest {
                url: endpoint.to_string(),
                method: config.method,
                headers,
                body,
            })
            .await
            .map_err(|e| ToolError::Execution {
                tool_id: tool.id(),
                message: e.to_string(),
            })?;

        if !response.is_success() {
            warn!(tool_id = %tool.id(), status = response.status, "Api tool returned an error status");
            return Err(ToolError::Http {
                tool_id: tool.id(),
                status: response.status,
                body: response.body,
            });
        }

        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(parse_reply(&response.body))
    }
}

/// Render a prompt template.
///
/// `{{input}}` becomes the whole input (strings verbatim, everything else as
/// JSON) and `{{field}}` becomes the matching top-level scalar field.
pub(crate) fn render_template(template: &str, input: &Value) -> String {
    let whole = match input {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut rendered = template.replace("{{input}}", &whole);

    if let Value::Object(fields) = input {
        for (name, value) in fields {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => continue,
            };
            rendered = rendered.replace(&format!("{{{{{}}}}}", name), &text);
        }
    }
    rendered
}

/// Decode a model or endpoint reply as JSON, wrapping plain text as
/// `{"output": text}`.
pub(crate) fn parse_reply(text: &str) -> Value {
    serde_json::from_str(text.trim()).unwrap_or_else(|_| json!({ "output": text }))
}
