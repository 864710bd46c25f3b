mod cli;

use std::sync::Arc;

use clap::Parser;
use serde_json::{json, Value};

use notable_core::config::NotableConfig;
use notable_core::pipeline::{Pipeline, Step};
use notable_core::types::{MessageRole, NoteId};
use notable_engine::{tool_fn, NewTask, NoteSystem, ToolDefinition};
use notable_storage::{Database, GraphNoteStore, MemoryNoteStore, NoteStore};

use cli::CliArgs;

/// Title of the built-in tool every CLI task runs through.
const ECHO_TOOL: &str = "Echo";

/// Open the note store selected by the storage config.
fn open_store(config: &NotableConfig) -> Result<Arc<dyn NoteStore>, Box<dyn std::error::Error>> {
    if config.storage.persist {
        let db_path = config.db_path();
        let db = Database::new(&db_path)?;
        tracing::info!(path = %db_path.display(), "SQLite note store opened");
        Ok(Arc::new(GraphNoteStore::new(Arc::new(db))))
    } else {
        tracing::info!("Using in-memory note store");
        Ok(Arc::new(MemoryNoteStore::new()))
    }
}

/// Register the echo tool, reusing the id of a previously persisted one.
async fn register_echo(system: &NoteSystem) -> Result<NoteId, Box<dyn std::error::Error>> {
    let mut definition = ToolDefinition::custom(ECHO_TOOL).with_description("Returns its input");
    if let Some(existing) = system.tools()?.into_iter().find(|t| t.title == ECHO_TOOL) {
        definition = definition.with_id(existing.id);
    }
    let tool = system
        .register_tool(
            definition,
            Some(tool_fn(|input: Value| async move {
                Ok(json!({ "output": input["input"] }))
            })),
        )
        .await?;
    Ok(tool.id())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = NotableConfig::load_or_default(&config_file);
    args.apply_overrides(&mut config);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Notable v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");
    config.validate()?;

    // Storage and engine.
    let store = open_store(&config)?;
    let system = NoteSystem::builder(store)
        .config(config.engine.clone())
        .build();
    let _trace = system.subscribe(|event| tracing::debug!(?event, "note event"));

    let boot = system.bootstrap().await?;
    tracing::info!(root = %boot.root, system = %boot.system, "Note graph bootstrapped");

    let echo_id = register_echo(&system).await?;

    // Tasks from the command line.
    let mut created = Vec::new();
    for (title, priority) in args.parsed_tasks() {
        let logic = Pipeline::new(vec![Step::tool(
            "echo",
            echo_id,
            json!({ "input": title.clone() }),
        )]);
        let note = system
            .create_task(
                NewTask::new(title)
                    .priority(priority)
                    .logic(logic)
                    .reference(boot.root),
            )
            .await?;
        system.enqueue(note.id).await?;
        created.push(note.id);
    }

    if created.is_empty() {
        tracing::info!("No tasks given, nothing to run");
        return Ok(());
    }

    system.start()?;
    tokio::select! {
        _ = system.wait_idle() => {
            tracing::info!(count = created.len(), "All tasks settled");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, shutting down");
        }
    }
    system.shutdown().await;

    for id in created {
        if let Some(note) = system.get_note(id).await? {
            let last = note
                .content
                .messages
                .iter()
                .rev()
                .find(|m| matches!(m.role, MessageRole::Tool | MessageRole::Error))
                .map(|m| m.content.as_str())
                .unwrap_or("");
            println!("{}\t{}\t{}\t{}", note.id, note.status, note.title, last);
        }
    }

    Ok(())
}
