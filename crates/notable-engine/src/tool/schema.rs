//! JSON Schema compilation and validation for tool input/output.

use std::sync::Arc;

use jsonschema::JSONSchema;
use serde_json::Value;

use crate::error::ToolError;

/// A tool schema compiled once at registration time.
#[derive(Clone)]
pub struct CompiledSchema {
    compiled: Arc<JSONSchema>,
}

impl CompiledSchema {
    pub fn compile(schema: &Value) -> Result<Self, ToolError> {
        let compiled = JSONSchema::compile(schema)
            .map_err(|e| ToolError::Validation(format!("invalid schema: {}", e)))?;
        Ok(Self {
            compiled: Arc::new(compiled),
        })
    }

    /// Validate `instance`, joining every violation into one message.
    pub fn validate(&self, instance: &Value, what: &str) -> Result<(), ToolError> {
        if let Err(errors) = self.compiled.validate(instance) {
            let details: Vec<String> = errors
                .map(|e| format!("{} at '{}'", e, e.instance_path))
                .collect();
            return Err(ToolError::Validation(format!(
                "{} does not match schema: {}",
                what,
                details.join("; ")
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema").finish_non_exhaustive()
    }
}
