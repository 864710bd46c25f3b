//! Step pipelines attached to notes as `logic`.
//!
//! A pipeline is linear: each step's output becomes the context of the next.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NotableError, Result};
use crate::types::NoteId;

/// Ordered list of execution steps.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub steps: Vec<Step>,
}

/// A single pipeline step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(flatten)]
    pub action: StepAction,
}

/// What a step does, tagged by `type` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StepAction {
    /// Resolve `tool_id` in the tool registry and dispatch `input` to it.
    Tool {
        #[serde(rename = "toolId")]
        tool_id: NoteId,
        #[serde(default)]
        input: Value,
    },
    /// Return `input` unchanged.
    Passthrough {
        #[serde(default)]
        input: Value,
    },
    /// Send a rendered prompt to the language model collaborator.
    Prompt { prompt: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPipeline {
    Wrapped(Pipeline),
    Bare(Vec<Step>),
}

impl Pipeline {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    /// Parse a pipeline from JSON text.
    ///
    /// Accepts `{"steps": [...]}` or a bare array of steps, optionally wrapped
    /// in a Markdown code fence. Empty pipelines and duplicate step ids are
    /// rejected.
    pub fn parse(text: &str) -> Result<Self> {
        let body = strip_code_fence(text);
        let raw: RawPipeline = serde_json::from_str(body)
            .map_err(|e| NotableError::PipelineParse(e.to_string()))?;
        let pipeline = match raw {
            RawPipeline::Wrapped(p) => p,
            RawPipeline::Bare(steps) => Pipeline { steps },
        };

        if pipeline.steps.is_empty() {
            return Err(NotableError::PipelineParse(
                "pipeline has no steps".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for step in &pipeline.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(NotableError::PipelineParse(format!(
                    "duplicate step id: {}",
                    step.id
                )));
            }
        }

        Ok(pipeline)
    }

    /// Ids of every tool referenced by the pipeline, in step order.
    pub fn tool_ids(&self) -> Vec<NoteId> {
        self.steps
            .iter()
            .filter_map(|s| match &s.action {
                StepAction::Tool { tool_id, .. } => Some(*tool_id),
                _ => None,
            })
            .collect()
    }
}

impl Step {
    pub fn tool(id: impl Into<String>, tool_id: NoteId, input: Value) -> Self {
        Self {
            id: id.into(),
            action: StepAction::Tool { tool_id, input },
        }
    }

    pub fn passthrough(id: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            action: StepAction::Passthrough { input },
        }
    }

    pub fn prompt(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: StepAction::Prompt {
                prompt: prompt.into(),
            },
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_wire_format() {
        let tool_id = NoteId::new();
        let step = Step::tool("s1", tool_id, json!({"input": "hi"}));
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["id"], "s1");
        assert_eq!(value["type"], "tool");
        assert_eq!(value["toolId"], tool_id.to_string());
        assert_eq!(value["input"]["input"], "hi");
    }

    #[test]
    fn test_parse_wrapped() {
        let text = r#"{"steps": [{"id": "a", "type": "passthrough", "input": 1}]}"#;
        let pipeline = Pipeline::parse(text).unwrap();
        assert_eq!(pipeline.steps.len(), 1);
        assert_eq!(
            pipeline.steps[0].action,
            StepAction::Passthrough { input: json!(1) }
        );
    }

    #[test]
    fn test_parse_bare_array_in_fence() {
        let text = "```json\n[{\"id\": \"p\", \"type\": \"prompt\", \"prompt\": \"hello\"}]\n```";
        let pipeline = Pipeline::parse(text).unwrap();
        assert_eq!(pipeline.steps[0].id, "p");
        assert!(matches!(pipeline.steps[0].action, StepAction::Prompt { .. }));
    }

    #[test]
    fn test_parse_missing_input_defaults_to_null() {
        let id = NoteId::new();
        let text = format!(r#"[{{"id": "t", "type": "tool", "toolId": "{}"}}]"#, id);
        let pipeline = Pipeline::parse(&text).unwrap();
        assert_eq!(
            pipeline.steps[0].action,
            StepAction::Tool {
                tool_id: id,
                input: Value::Null
            }
        );
        assert_eq!(pipeline.tool_ids(), vec![id]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let err = Pipeline::parse("{not json").unwrap_err();
        assert!(matches!(err, NotableError::PipelineParse(_)));

        let err = Pipeline::parse(r#"[{"id": "x", "type": "teleport"}]"#).unwrap_err();
        assert!(matches!(err, NotableError::PipelineParse(_)));
    }

    #[test]
    fn test_parse_rejects_empty_and_duplicates() {
        assert!(Pipeline::parse("[]").is_err());

        let dup = r#"[{"id": "a", "type": "passthrough"}, {"id": "a", "type": "passthrough"}]"#;
        let err = Pipeline::parse(dup).unwrap_err();
        assert!(err.to_string().contains("duplicate step id: a"));
    }
}
