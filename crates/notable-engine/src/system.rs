//! The note system service object.
//!
//! Owns the tool registry, rule engine, scheduler, runner, and event bus
//! around an injected [`NoteStore`]. Construct one per process (or per test)
//! with [`NoteSystem::builder`] and share it by reference.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use notable_core::config::EngineConfig;
use notable_core::error::NotableError;
use notable_core::events::{EventBus, NoteEvent, Subscription};
use notable_core::pipeline::Pipeline;
use notable_core::types::{Note, NoteId, NoteKind, NoteStatus};
use notable_storage::NoteStore;

use crate::error::{RunError, SystemError, ToolError};
use crate::llm::LanguageModel;
use crate::rules::{PlanningRule, RuleContext, RuleEngine};
use crate::runner::{validate_transition, NoteRunner};
use crate::scheduler::Scheduler;
use crate::tool::{
    Dispatcher, HttpTransport, RegisteredTool, ReqwestTransport, ToolDefinition,
    ToolImplementation, ToolRegistry,
};

/// Parameters for [`NoteSystem::create_task`].
#[derive(Clone, Debug, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: i64,
    pub logic: Option<Pipeline>,
    pub requires_web_search: Option<bool>,
    pub references: Vec<NoteId>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            priority: 50,
            ..Self::default()
        }
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn logic(mut self, logic: Pipeline) -> Self {
        self.logic = Some(logic);
        self
    }

    pub fn requires_web_search(mut self, required: bool) -> Self {
        self.requires_web_search = Some(required);
        self
    }

    pub fn reference(mut self, id: NoteId) -> Self {
        self.references.push(id);
        self
    }
}

/// Ids of the singleton notes created by [`NoteSystem::bootstrap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bootstrap {
    pub root: NoteId,
    pub system: NoteId,
}

pub struct NoteSystemBuilder {
    store: Arc<dyn NoteStore>,
    config: EngineConfig,
    llm: Option<Arc<dyn LanguageModel>>,
    http: Option<Arc<dyn HttpTransport>>,
    default_rules: bool,
}

impl NoteSystemBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn http(mut self, http: Arc<dyn HttpTransport>) -> Self {
        self.http = Some(http);
        self
    }

    /// Start with an empty rule list instead of the built-in rules.
    pub fn without_default_rules(mut self) -> Self {
        self.default_rules = false;
        self
    }

    pub fn build(self) -> NoteSystem {
        let events = EventBus::new();
        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new()));

        let tools = Arc::new(ToolRegistry::new(Arc::clone(&self.store)));
        let dispatcher = Arc::new(Dispatcher::new(http, self.llm.clone()));
        let ctx = RuleContext {
            store: Arc::clone(&self.store),
            tools: Arc::clone(&tools),
            llm: self.llm,
        };
        let rules = Arc::new(if self.default_rules {
            RuleEngine::with_default_rules(ctx, events.clone())
        } else {
            RuleEngine::new(ctx, events.clone())
        });
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&self.store),
            self.config.concurrency_limit,
            events.clone(),
        ));
        let runner = Arc::new(NoteRunner::new(
            Arc::clone(&self.store),
            Arc::clone(&tools),
            dispatcher,
            Arc::clone(&rules),
            Arc::clone(&scheduler),
            self.config,
            events.clone(),
        ));

        NoteSystem {
            store: self.store,
            tools,
            rules,
            scheduler,
            runner,
            events,
            admission: Mutex::new(None),
        }
    }
}

pub struct NoteSystem {
    store: Arc<dyn NoteStore>,
    tools: Arc<ToolRegistry>,
    rules: Arc<RuleEngine>,
    scheduler: Arc<Scheduler>,
    runner: Arc<NoteRunner>,
    events: EventBus,
    admission: Mutex<Option<JoinHandle<()>>>,
}

impl NoteSystem {
    pub fn builder(store: Arc<dyn NoteStore>) -> NoteSystemBuilder {
        NoteSystemBuilder {
            store,
            config: EngineConfig::default(),
            llm: None,
            http: None,
            default_rules: true,
        }
    }

    pub fn store(&self) -> &Arc<dyn NoteStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn runner(&self) -> &Arc<NoteRunner> {
        &self.runner
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Create the Root and System notes if missing and load stored tools.
    ///
    /// Safe to call more than once.
    pub async fn bootstrap(&self) -> Result<Bootstrap, SystemError> {
        let notes = self.store.get_all().await?;
        let find = |kind: NoteKind| notes.iter().find(|n| n.kind == kind).map(|n| n.id);

        let system = match find(NoteKind::System) {
            Some(id) => id,
            None => self.create_singleton(NoteKind::System, "System").await?,
        };
        let root = match find(NoteKind::Root) {
            Some(id) => id,
            None => self.create_singleton(NoteKind::Root, "Root").await?,
        };
        self.store.add_reference(root, system).await?;

        let restored = self.tools.restore().await?;
        let recovered = self.recover_interrupted(&notes).await?;
        info!(%root, %system, restored_tools = restored, recovered, "Note system bootstrapped");
        Ok(Bootstrap { root, system })
    }

    /// Route notes left `running` by an earlier process through the failure
    /// path. Notes this process is running are left alone.
    async fn recover_interrupted(&self, notes: &[Note]) -> Result<usize, SystemError> {
        let mut recovered = 0;
        for note in notes {
            if note.status != NoteStatus::Running || self.runner.is_in_flight(note.id) {
                continue;
            }
            let Some(current) = self.store.get(note.id).await? else {
                continue;
            };
            if current.status != NoteStatus::Running {
                continue;
            }
            match self.runner.recover_interrupted(current).await {
                Ok(outcome) => {
                    info!(note_id = %note.id, ?outcome, "Interrupted run recovered");
                    recovered += 1;
                }
                Err(e) => warn!(note_id = %note.id, error = %e, "Could not recover interrupted run"),
            }
        }
        Ok(recovered)
    }

    async fn create_singleton(&self, kind: NoteKind, title: &str) -> Result<NoteId, SystemError> {
        let mut note = Note::new(kind, title);
        note.status = NoteStatus::Active;
        let id = note.id;
        self.store.add(note).await?;
        self.events.emit(NoteEvent::NoteCreated { note_id: id });
        Ok(id)
    }

    /// Create a pending task note. It is not enqueued.
    pub async fn create_task(&self, task: NewTask) -> Result<Note, SystemError> {
        let mut note = Note::task(task.title, task.priority).with_description(task.description);
        note.logic = task.logic;
        note.requires_web_search = task.requires_web_search;
        for reference in task.references {
            note.link(reference);
        }

        self.store.add(note.clone()).await?;
        info!(note_id = %note.id, title = %note.title, priority = note.priority, "Task created");
        self.events.emit(NoteEvent::NoteCreated { note_id: note.id });
        Ok(note)
    }

    pub async fn get_note(&self, id: NoteId) -> Result<Option<Note>, SystemError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list_notes(&self) -> Result<Vec<Note>, SystemError> {
        Ok(self.store.get_all().await?)
    }

    /// Persist an edited note.
    ///
    /// A status change must be a legal transition, and notes this process is
    /// running cannot be edited. A `running` note with no live run may be
    /// moved to `failed`.
    pub async fn update_note(&self, note: Note) -> Result<Note, SystemError> {
        let current = self
            .store
            .get(note.id)
            .await?
            .ok_or(SystemError::NoteNotFound(note.id))?;
        if self.runner.is_in_flight(note.id) {
            return Err(RunError::InvalidTransition(NoteStatus::Running, note.status).into());
        }
        if current.status != note.status {
            validate_transition(current.status, note.status)?;
        }

        let stored = self.store.update(note).await?;
        self.events.emit(NoteEvent::NoteUpdated {
            note_id: stored.id,
            status: stored.status,
        });
        Ok(stored)
    }

    /// Delete a note and purge it from the queue. Tool notes are also
    /// unregistered. Returns whether the note existed.
    pub async fn delete_note(&self, id: NoteId) -> Result<bool, SystemError> {
        self.scheduler.remove(id)?;
        self.tools.forget(id)?;
        let existed = self.store.delete(id).await?;
        if existed {
            info!(note_id = %id, "Note deleted");
            self.events.emit(NoteEvent::NoteDeleted { note_id: id });
        }
        Ok(existed)
    }

    /// Queue a note for execution. Returns `false` if it was already queued.
    pub async fn enqueue(&self, id: NoteId) -> Result<bool, SystemError> {
        if self.store.get(id).await?.is_none() {
            return Err(SystemError::NoteNotFound(id));
        }
        Ok(self.scheduler.enqueue(id)?)
    }

    pub async fn register_tool(
        &self,
        definition: ToolDefinition,
        implementation: Option<Arc<dyn ToolImplementation>>,
    ) -> Result<Arc<RegisteredTool>, ToolError> {
        let tool = self.tools.register(definition, implementation).await?;
        self.events.emit(NoteEvent::NoteCreated { note_id: tool.id() });
        Ok(tool)
    }

    pub async fn update_tool(&self, definition: ToolDefinition) -> Result<Arc<RegisteredTool>, ToolError> {
        let tool = self.tools.update(definition).await?;
        self.events.emit(NoteEvent::NoteUpdated {
            note_id: tool.id(),
            status: tool.definition().status,
        });
        Ok(tool)
    }

    pub fn tools(&self) -> Result<Vec<ToolDefinition>, ToolError> {
        self.tools.get_all()
    }

    pub fn add_rule(&self, rule: Arc<dyn PlanningRule>) {
        self.rules.add_rule(rule);
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NoteEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    /// Spawn the admission loop on the current tokio runtime.
    pub fn start(&self) -> Result<(), SystemError> {
        let mut admission = self
            .admission
            .lock()
            .map_err(|e| NotableError::Storage(format!("Admission lock poisoned: {}", e)))?;
        if admission.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(SystemError::AlreadyStarted);
        }
        let scheduler = Arc::clone(&self.scheduler);
        let runner = Arc::clone(&self.runner);
        *admission = Some(tokio::spawn(scheduler.run(runner)));
        Ok(())
    }

    /// Stop admitting notes and wait for the admission loop to exit.
    ///
    /// Runs already in flight keep going.
    pub async fn shutdown(&self) {
        let handle = match self.admission.lock() {
            Ok(mut admission) => admission.take(),
            Err(e) => {
                warn!(error = %e, "Admission lock poisoned");
                None
            }
        };
        let Some(handle) = handle else {
            return;
        };
        self.scheduler.shutdown();
        if let Err(e) = handle.await {
            warn!(error = %e, "Admission loop ended abnormally");
        }
    }

    /// Wait until nothing is queued or running.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }
}
