//! Catalog of registered tools.
//!
//! Tool notes are persisted through the [`NoteStore`]; compiled schemas and
//! bound implementations live in memory alongside them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use notable_core::error::NotableError;
use notable_core::types::{NoteId, NoteKind};
use notable_storage::NoteStore;

use crate::error::ToolError;
use crate::tool::schema::CompiledSchema;
use crate::tool::{AuthType, ToolBody, ToolDefinition, ToolImplementation, ToolType};

/// A validated tool ready for dispatch.
pub struct RegisteredTool {
    definition: ToolDefinition,
    input_schema: Option<CompiledSchema>,
    output_schema: Option<CompiledSchema>,
    implementation: Option<Arc<dyn ToolImplementation>>,
}

impl RegisteredTool {
    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub fn id(&self) -> NoteId {
        self.definition.id
    }

    pub fn input_schema(&self) -> Option<&CompiledSchema> {
        self.input_schema.as_ref()
    }

    pub fn output_schema(&self) -> Option<&CompiledSchema> {
        self.output_schema.as_ref()
    }

    pub fn implementation(&self) -> Option<&Arc<dyn ToolImplementation>> {
        self.implementation.as_ref()
    }
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("definition", &self.definition)
            .field("bound", &self.implementation.is_some())
            .finish()
    }
}

/// Registry of tools keyed by note id.
pub struct ToolRegistry {
    store: Arc<dyn NoteStore>,
    tools: RwLock<HashMap<NoteId, Arc<RegisteredTool>>>,
}

impl ToolRegistry {
    pub fn new(store: Arc<dyn NoteStore>) -> Self {
        Self {
            store,
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Validate and register a tool, persisting its note.
    ///
    /// `implementation` is bound only for custom tools. Registering an id
    /// that already exists replaces it.
    pub async fn register(
        &self,
        definition: ToolDefinition,
        implementation: Option<Arc<dyn ToolImplementation>>,
    ) -> Result<Arc<RegisteredTool>, ToolError> {
        let implementation = match definition.tool_type() {
            ToolType::Custom => implementation,
            other => {
                if implementation.is_some() {
                    warn!(tool_id = %definition.id, tool_type = %other, "Ignoring implementation for non-custom tool");
                }
                None
            }
        };
        let tool = build(definition, implementation)?;

        self.store.update(tool.definition.to_note()?).await?;

        let tool = Arc::new(tool);
        self.write()?.insert(tool.id(), Arc::clone(&tool));
        info!(
            tool_id = %tool.id(),
            title = %tool.definition.title,
            tool_type = %tool.definition.tool_type(),
            "Tool registered"
        );
        Ok(tool)
    }

    /// Replace the definition of a registered tool.
    ///
    /// Runs the same validation as [`register`](Self::register). A custom
    /// tool keeps its bound implementation.
    pub async fn update(&self, definition: ToolDefinition) -> Result<Arc<RegisteredTool>, ToolError> {
        let existing = self
            .get(definition.id)?
            .ok_or(ToolError::NotFound(definition.id))?;
        let implementation = existing.implementation.clone();
        self.register(definition, implementation).await
    }

    /// Unregister a tool and delete its note. Returns whether it existed.
    pub async fn remove(&self, id: NoteId) -> Result<bool, ToolError> {
        let removed = self.write()?.remove(&id).is_some();
        let deleted = self.store.delete(id).await?;
        if removed || deleted {
            info!(tool_id = %id, "Tool removed");
        }
        Ok(removed || deleted)
    }

    /// Drop the in-memory entry for `id` without touching the store.
    pub(crate) fn forget(&self, id: NoteId) -> Result<bool, ToolError> {
        Ok(self.write()?.remove(&id).is_some())
    }

    pub fn get(&self, id: NoteId) -> Result<Option<Arc<RegisteredTool>>, ToolError> {
        Ok(self.read()?.get(&id).cloned())
    }

    pub fn get_implementation(
        &self,
        id: NoteId,
    ) -> Result<Option<Arc<dyn ToolImplementation>>, ToolError> {
        Ok(self
            .read()?
            .get(&id)
            .and_then(|tool| tool.implementation.clone()))
    }

    /// Every registered tool definition, ordered by title.
    pub fn get_all(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        let mut all: Vec<ToolDefinition> = self
            .read()?
            .values()
            .map(|tool| tool.definition.clone())
            .collect();
        all.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    /// Look up a tool for dispatch.
    ///
    /// Falls back to the store for tool notes written by an earlier process;
    /// those come back without a bound implementation.
    pub async fn resolve(&self, id: NoteId) -> Result<Arc<RegisteredTool>, ToolError> {
        if let Some(tool) = self.get(id)? {
            return Ok(tool);
        }
        let note = match self.store.get(id).await? {
            Some(note) if note.kind == NoteKind::Tool => note,
            _ => return Err(ToolError::NotFound(id)),
        };
        let tool = Arc::new(build(ToolDefinition::from_note(&note)?, None)?);
        debug!(tool_id = %id, "Tool loaded from store");
        Ok(Arc::clone(
            self.write()?.entry(id).or_insert(tool),
        ))
    }

    /// Load every stored tool note that is not yet registered.
    ///
    /// Invalid tool notes are logged and skipped. Returns how many were loaded.
    pub async fn restore(&self) -> Result<usize, ToolError> {
        let notes = self.store.get_all().await?;
        let mut loaded = 0;
        for note in notes.iter().filter(|n| n.kind == NoteKind::Tool) {
            if self.get(note.id)?.is_some() {
                continue;
            }
            let tool = match ToolDefinition::from_note(note).and_then(|def| build(def, None)) {
                Ok(tool) => tool,
                Err(e) => {
                    warn!(tool_id = %note.id, error = %e, "Skipping invalid stored tool");
                    continue;
                }
            };
            self.write()?.insert(note.id, Arc::new(tool));
            loaded += 1;
        }
        if loaded > 0 {
            info!(count = loaded, "Restored tools from store");
        }
        Ok(loaded)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<NoteId, Arc<RegisteredTool>>>, ToolError> {
        self.tools
            .read()
            .map_err(|e| NotableError::Storage(format!("Tool registry lock poisoned: {}", e)).into())
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<NoteId, Arc<RegisteredTool>>>, ToolError> {
        self.tools
            .write()
            .map_err(|e| NotableError::Storage(format!("Tool registry lock poisoned: {}", e)).into())
    }
}

/// Validate a definition and compile its schemas.
fn build(
    definition: ToolDefinition,
    implementation: Option<Arc<dyn ToolImplementation>>,
) -> Result<RegisteredTool, ToolError> {
    if definition.title.trim().is_empty() {
        return Err(ToolError::Validation("tool title is empty".to_string()));
    }

    match &definition.body {
        ToolBody::Custom => {}
        ToolBody::Orchestrated { prompt } => {
            if prompt.trim().is_empty() {
                return Err(ToolError::Validation(
                    "orchestrated tool has an empty prompt".to_string(),
                ));
            }
        }
        ToolBody::Api { endpoint, config } => {
            let url = reqwest::Url::parse(endpoint)
                .map_err(|e| ToolError::Validation(format!("invalid endpoint '{}': {}", endpoint, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ToolError::Validation(format!(
                    "endpoint '{}' must use http or https",
                    endpoint
                )));
            }
            config.parsed_headers()?;
            if config.auth_type == AuthType::ApiKey
                && config.api_key_value.as_deref().map_or(true, str::is_empty)
            {
                return Err(ToolError::Validation(
                    "apiKey auth requires an api key value".to_string(),
                ));
            }
        }
    }

    let input_schema = definition
        .input_schema
        .as_ref()
        .map(CompiledSchema::compile)
        .transpose()?;
    let output_schema = definition
        .output_schema
        .as_ref()
        .map(CompiledSchema::compile)
        .transpose()?;

    Ok(RegisteredTool {
        definition,
        input_schema,
        output_schema,
        implementation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{tool_fn, ApiToolConfig};
    use notable_storage::MemoryNoteStore;
    use serde_json::{json, Value};

    fn registry() -> (Arc<MemoryNoteStore>, ToolRegistry) {
        let store = Arc::new(MemoryNoteStore::new());
        let registry = ToolRegistry::new(store.clone());
        (store, registry)
    }

    fn echo() -> Arc<dyn ToolImplementation> {
        tool_fn(|input: Value| async move { Ok(json!({"output": input["input"]})) })
    }

    #[tokio::test]
    async fn test_register_custom_binds_implementation() {
        let (store, registry) = registry();
        let def = ToolDefinition::custom("Echo");
        let id = def.id;
        registry.register(def, Some(echo())).await.unwrap();

        assert!(registry.get(id).unwrap().is_some());
        assert!(registry.get_implementation(id).unwrap().is_some());
        let note = store.get(id).await.unwrap().unwrap();
        assert_eq!(note.kind, NoteKind::Tool);
        assert_eq!(note.title, "Echo");
    }

    #[tokio::test]
    async fn test_implementation_ignored_for_api_tool() {
        let (_store, registry) = registry();
        let def = ToolDefinition::api("Search", "https://example.com/s", ApiToolConfig::default());
        let id = def.id;
        registry.register(def, Some(echo())).await.unwrap();
        assert!(registry.get_implementation(id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_rejects_bad_endpoint() {
        let (store, registry) = registry();
        let def = ToolDefinition::api("Bad", "not a url", ApiToolConfig::default());
        let id = def.id;
        let err = registry.register(def, None).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
        assert!(store.get(id).await.unwrap().is_none());

        let def = ToolDefinition::api("Ftp", "ftp://example.com", ApiToolConfig::default());
        assert!(matches!(
            registry.register(def, None).await,
            Err(ToolError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_bad_headers_and_missing_key() {
        let (_store, registry) = registry();
        let config = ApiToolConfig {
            headers: "{broken".to_string(),
            ..ApiToolConfig::default()
        };
        let def = ToolDefinition::api("Headers", "https://example.com", config);
        assert!(matches!(
            registry.register(def, None).await,
            Err(ToolError::Validation(_))
        ));

        let config = ApiToolConfig {
            auth_type: AuthType::ApiKey,
            ..ApiToolConfig::default()
        };
        let def = ToolDefinition::api("Keyless", "https://example.com", config);
        assert!(matches!(
            registry.register(def, None).await,
            Err(ToolError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_bad_schema() {
        let (_store, registry) = registry();
        let def = ToolDefinition::custom("Schema").with_input_schema(json!({"type": 7}));
        assert!(matches!(
            registry.register(def, None).await,
            Err(ToolError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_keeps_implementation_and_revalidates() {
        let (store, registry) = registry();
        let def = ToolDefinition::custom("Echo");
        let id = def.id;
        registry.register(def.clone(), Some(echo())).await.unwrap();

        let renamed = ToolDefinition {
            title: "Echo v2".to_string(),
            ..def.clone()
        };
        registry.update(renamed).await.unwrap();
        assert!(registry.get_implementation(id).unwrap().is_some());
        assert_eq!(store.get(id).await.unwrap().unwrap().title, "Echo v2");

        let broken = def.with_output_schema(json!({"type": "nope"}));
        assert!(registry.update(broken).await.is_err());
        assert_eq!(registry.get(id).unwrap().unwrap().definition().title, "Echo v2");
    }

    #[tokio::test]
    async fn test_update_unknown_tool() {
        let (_store, registry) = registry();
        let def = ToolDefinition::custom("Ghost");
        let id = def.id;
        assert!(matches!(
            registry.update(def).await,
            Err(ToolError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, registry) = registry();
        let def = ToolDefinition::custom("Echo");
        let id = def.id;
        registry.register(def, Some(echo())).await.unwrap();

        assert!(registry.remove(id).await.unwrap());
        assert!(registry.get(id).unwrap().is_none());
        assert!(store.get(id).await.unwrap().is_none());
        assert!(!registry.remove(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_all_sorted_by_title() {
        let (_store, registry) = registry();
        registry
            .register(ToolDefinition::custom("Zeta"), None)
            .await
            .unwrap();
        registry
            .register(ToolDefinition::custom("Alpha"), None)
            .await
            .unwrap();
        let titles: Vec<String> = registry
            .get_all()
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["Alpha", "Zeta"]);
    }

    #[tokio::test]
    async fn test_resolve_and_restore_from_store() {
        let store = Arc::new(MemoryNoteStore::new());
        let def = ToolDefinition::orchestrated("Summarize", "Summarize {{input}}");
        let id = def.id;
        store.add(def.to_note().unwrap()).await.unwrap();

        let registry = ToolRegistry::new(store.clone());
        let tool = registry.resolve(id).await.unwrap();
        assert_eq!(tool.definition().title, "Summarize");

        let fresh = ToolRegistry::new(store.clone());
        assert_eq!(fresh.restore().await.unwrap(), 1);
        assert_eq!(fresh.restore().await.unwrap(), 0);
        assert_eq!(fresh.get_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_unknown_and_non_tool() {
        let store = Arc::new(MemoryNoteStore::new());
        let task = notable_core::types::Note::task("task", 1);
        let task_id = task.id;
        store.add(task).await.unwrap();
        let registry = ToolRegistry::new(store);

        assert!(matches!(
            registry.resolve(task_id).await,
            Err(ToolError::NotFound(_))
        ));
        assert!(matches!(
            registry.resolve(NoteId::new()).await,
            Err(ToolError::NotFound(_))
        ));
    }
}
