//! Planning rules: before/after hooks around a note's run.
//!
//! A rule inspects a note and returns a [`Decision`]. The [`RuleEngine`]
//! applies the decision's mutations and persists the result, so rules never
//! write to the store themselves. A failing rule is logged and skipped.

pub mod generate_logic;
pub mod web_search;

pub use generate_logic::GenerateLogicRule;
pub use web_search::WebSearchRule;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use notable_core::events::{EventBus, NoteEvent};
use notable_core::pipeline::{Pipeline, Step};
use notable_core::types::{MessageRole, Note};
use notable_storage::NoteStore;

use crate::error::RuleError;
use crate::llm::LanguageModel;
use crate::tool::ToolRegistry;

/// When a rule runs relative to the note's pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RulePhase {
    Before,
    After,
}

/// A single change a rule asks the engine to make.
#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    SetLogic(Pipeline),
    /// Insert a step at the front of the note's logic, creating it if absent.
    PrependStep(Step),
    SetPriority(i64),
    AppendMessage { role: MessageRole, content: String },
    SetConfig { key: String, value: Value },
    /// Create a pending task and add it to the note's references.
    CreateSubtask {
        title: String,
        description: String,
        priority: i64,
    },
}

/// Outcome of evaluating a rule.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    NoOp,
    Apply(Vec<Mutation>),
}

/// Read-only collaborators available to rules.
#[derive(Clone)]
pub struct RuleContext {
    pub store: Arc<dyn NoteStore>,
    pub tools: Arc<ToolRegistry>,
    pub llm: Option<Arc<dyn LanguageModel>>,
}

#[async_trait]
pub trait PlanningRule: Send + Sync {
    fn name(&self) -> &str;

    fn phase(&self) -> RulePhase;

    /// Whether [`evaluate`](Self::evaluate) should run for this note.
    async fn applies(&self, _note: &Note, _ctx: &RuleContext) -> Result<bool, RuleError> {
        Ok(true)
    }

    async fn evaluate(&self, note: &Note, ctx: &RuleContext) -> Result<Decision, RuleError>;
}

/// Ordered set of planning rules.
pub struct RuleEngine {
    rules: RwLock<Vec<Arc<dyn PlanningRule>>>,
    ctx: RuleContext,
    events: EventBus,
}

impl RuleEngine {
    pub fn new(ctx: RuleContext, events: EventBus) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            ctx,
            events,
        }
    }

    /// Engine preloaded with the built-in rules.
    pub fn with_default_rules(ctx: RuleContext, events: EventBus) -> Self {
        let engine = Self::new(ctx, events);
        engine.add_rule(Arc::new(GenerateLogicRule));
        engine.add_rule(Arc::new(WebSearchRule));
        engine
    }

    /// Append a rule. Rules run in the order they were added.
    pub fn add_rule(&self, rule: Arc<dyn PlanningRule>) {
        match self.rules.write() {
            Ok(mut rules) => {
                debug!(rule = rule.name(), "Planning rule added");
                rules.push(rule);
            }
            Err(e) => warn!(error = %e, "Rule list lock poisoned; rule not added"),
        }
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.snapshot().iter().map(|r| r.name().to_string()).collect()
    }

    /// Run every rule of `phase` against `note` and return the updated note.
    pub async fn run_phase(&self, phase: RulePhase, note: Note) -> Note {
        let mut note = note;
        for rule in self.snapshot().into_iter().filter(|r| r.phase() == phase) {
            match self.run_rule(rule.as_ref(), &note).await {
                Ok(Some(updated)) => note = updated,
                Ok(None) => {}
                Err(e) => {
                    warn!(note_id = %note.id, rule = rule.name(), error = %e, "Planning rule failed");
                    self.events.emit(NoteEvent::RuleFailed {
                        note_id: note.id,
                        rule: rule.name().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        note
    }

    async fn run_rule(&self, rule: &dyn PlanningRule, note: &Note) -> Result<Option<Note>, RuleError> {
        if !rule.applies(note, &self.ctx).await? {
            return Ok(None);
        }
        let mutations = match rule.evaluate(note, &self.ctx).await? {
            Decision::NoOp => return Ok(None),
            Decision::Apply(mutations) => mutations,
        };
        if mutations.is_empty() {
            return Ok(None);
        }

        let count = mutations.len();
        let mut updated = note.clone();
        for mutation in mutations {
            self.apply(&mut updated, mutation).await?;
        }
        let stored = self.ctx.store.update(updated).await?;
        info!(note_id = %stored.id, rule = rule.name(), mutations = count, "Planning rule applied");
        Ok(Some(stored))
    }

    async fn apply(&self, note: &mut Note, mutation: Mutation) -> Result<(), RuleError> {
        match mutation {
            Mutation::SetLogic(pipeline) => note.logic = Some(pipeline),
            Mutation::PrependStep(step) => {
                note.logic
                    .get_or_insert_with(Pipeline::default)
                    .steps
                    .insert(0, step);
            }
            Mutation::SetPriority(priority) => note.priority = priority,
            Mutation::AppendMessage { role, content } => note.push_message(role, content),
            Mutation::SetConfig { key, value } => {
                note.config.insert(key, value);
            }
            Mutation::CreateSubtask {
                title,
                description,
                priority,
            } => {
                let subtask = Note::task(title, priority).with_description(description);
                let subtask_id = subtask.id;
                self.ctx.store.add(subtask).await?;
                note.link(subtask_id);
                self.events.emit(NoteEvent::NoteCreated {
                    note_id: subtask_id,
                });
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<Arc<dyn PlanningRule>> {
        match self.rules.read() {
            Ok(rules) => rules.clone(),
            Err(e) => {
                warn!(error = %e, "Rule list lock poisoned");
                Vec::new()
            }
        }
    }
}
