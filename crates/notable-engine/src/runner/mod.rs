//! Runs a single note: its step pipeline, reflection, and the
//! retry/escalation policy.

pub mod state_machine;

pub use state_machine::validate_transition;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use notable_core::config::EngineConfig;
use notable_core::events::{EventBus, NoteEvent};
use notable_core::pipeline::StepAction;
use notable_core::types::{MessageRole, Note, NoteId, NoteStatus};
use notable_storage::NoteStore;

use crate::error::RunError;
use crate::rules::{RuleEngine, RulePhase};
use crate::scheduler::Scheduler;
use crate::tool::dispatcher::parse_reply;
use crate::tool::{Dispatcher, ToolRegistry};

/// Output reported for a note that has no logic attached.
pub const NO_LOGIC_OUTPUT: &str = "No logic attached; nothing to execute";

/// Phrases in a run's output that suggest more work remains.
const FOLLOW_UP_MARKERS: &[&str] = &[
    "follow up",
    "follow-up",
    "next step",
    "todo",
    "remaining work",
    "further work",
];

/// How a run ended.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Completed {
        output: Value,
        follow_up: Option<NoteId>,
    },
    /// The run failed and the note was re-enqueued.
    Retrying { attempt: u32 },
    /// The run failed with no retries left.
    Escalated { escalation_id: NoteId },
}

pub struct NoteRunner {
    store: Arc<dyn NoteStore>,
    tools: Arc<ToolRegistry>,
    dispatcher: Arc<Dispatcher>,
    rules: Arc<RuleEngine>,
    scheduler: Arc<Scheduler>,
    config: EngineConfig,
    events: EventBus,
    in_flight: Mutex<HashSet<NoteId>>,
}

impl NoteRunner {
    pub fn new(
        store: Arc<dyn NoteStore>,
        tools: Arc<ToolRegistry>,
        dispatcher: Arc<Dispatcher>,
        rules: Arc<RuleEngine>,
        scheduler: Arc<Scheduler>,
        config: EngineConfig,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            tools,
            dispatcher,
            rules,
            scheduler,
            config,
            events,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run one note to completion or to its failure decision.
    ///
    /// Pipeline failures are not returned as errors; they end in
    /// [`RunOutcome::Retrying`] or [`RunOutcome::Escalated`]. Errors mean the
    /// run was rejected (unknown note, not runnable, already running) or the
    /// store failed.
    pub async fn run(&self, id: NoteId) -> Result<RunOutcome, RunError> {
        let outcome = {
            let _claim = InFlight::claim(&self.in_flight, id)?;
            self.run_claimed(id).await
        };

        self.requeue_if_retrying(id, &outcome);
        outcome
    }

    /// Whether this runner is currently running `id`.
    pub fn is_in_flight(&self, id: NoteId) -> bool {
        self.in_flight
            .lock()
            .map(|ids| ids.contains(&id))
            .unwrap_or(false)
    }

    /// Settle a note left `running` by a process that stopped mid-run.
    ///
    /// The note goes through the normal failure path: it is retried while
    /// budget remains and escalated otherwise.
    pub async fn recover_interrupted(&self, note: Note) -> Result<RunOutcome, RunError> {
        let id = note.id;
        if note.status != NoteStatus::Running {
            return Err(RunError::InvalidTransition(note.status, NoteStatus::Failed));
        }
        let outcome = {
            let _claim = InFlight::claim(&self.in_flight, id)?;
            warn!(note_id = %id, "Recovering note interrupted mid-run");
            self.finish(note, Err(RunError::Interrupted)).await
        };
        self.requeue_if_retrying(id, &outcome);
        outcome
    }

    fn requeue_if_retrying(&self, id: NoteId, outcome: &Result<RunOutcome, RunError>) {
        if let Ok(RunOutcome::Retrying { attempt }) = outcome {
            if let Err(e) = self.scheduler.enqueue(id) {
                warn!(note_id = %id, attempt, error = %e, "Failed to re-enqueue note");
            }
        }
    }

    async fn run_claimed(&self, id: NoteId) -> Result<RunOutcome, RunError> {
        let mut note = self
            .store
            .get(id)
            .await?
            .ok_or(RunError::NoteNotFound(id))?;

        validate_transition(note.status, NoteStatus::Running)?;
        note.status = NoteStatus::Running;
        let note = self.store.update(note).await?;
        info!(note_id = %id, title = %note.title, priority = note.priority, "Run started");
        self.events.emit(NoteEvent::RunStarted { note_id: id });

        // From here on the note is `running`; every error must settle it.
        let note = self.rules.run_phase(RulePhase::Before, note).await;
        let result = self.execute_logic(&note).await;
        let note = self.rules.run_phase(RulePhase::After, note).await;
        self.finish(note, result).await
    }

    /// Record the result of a run on a `running` note.
    ///
    /// A failed completion write is routed through the failure path, and a
    /// failed failure write falls back to [`settle`](Self::settle).
    async fn finish(&self, note: Note, result: Result<Value, RunError>) -> Result<RunOutcome, RunError> {
        let error = match result {
            Ok(output) => match self.complete(note.clone(), output).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(note_id = %note.id, error = %e, "Could not record completion");
                    e
                }
            },
            Err(e) => e,
        };
        match self.fail(note.clone(), error).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.settle(note, e).await,
        }
    }

    /// Last-resort write that moves a note out of `running` with a single
    /// update. Escalation is skipped; the transcript records the error.
    async fn settle(&self, mut note: Note, error: RunError) -> Result<RunOutcome, RunError> {
        let id = note.id;
        let message = error.to_string();
        error!(note_id = %id, error = %message, "Could not record run failure");

        note.push_message(MessageRole::Error, format!("Run failed: {}", message));
        let outcome = if note.content.retry_count < self.config.max_retries {
            note.content.retry_count += 1;
            note.status = NoteStatus::Pending;
            Some(note.content.retry_count)
        } else {
            note.status = NoteStatus::Failed;
            None
        };

        match self.store.update(note).await {
            Ok(note) => {
                self.events.emit(NoteEvent::RunFailed {
                    note_id: note.id,
                    error: message,
                    will_retry: outcome.is_some(),
                });
                self.events.emit(NoteEvent::NoteUpdated {
                    note_id: note.id,
                    status: note.status,
                });
                match outcome {
                    Some(attempt) => Ok(RunOutcome::Retrying { attempt }),
                    None => Err(error),
                }
            }
            Err(e) => {
                error!(note_id = %id, error = %e, "Note left running until the next bootstrap");
                Err(error)
            }
        }
    }

    /// Execute the note's steps in order, feeding each output forward.
    async fn execute_logic(&self, note: &Note) -> Result<Value, RunError> {
        let steps = match &note.logic {
            Some(pipeline) if !pipeline.steps.is_empty() => &pipeline.steps,
            _ => {
                debug!(note_id = %note.id, "No logic attached");
                return Ok(json!({ "output": NO_LOGIC_OUTPUT }));
            }
        };

        let mut previous = Value::Null;
        for step in steps {
            debug!(note_id = %note.id, step = %step.id, "Executing step");
            previous = match &step.action {
                StepAction::Tool { tool_id, input } => {
                    let tool = self.tools.resolve(*tool_id).await?;
                    let input = if input.is_null() {
                        previous
                    } else {
                        input.clone()
                    };
                    self.dispatcher.execute(&tool, input).await?
                }
                StepAction::Passthrough { input } => {
                    if input.is_null() {
                        previous
                    } else {
                        input.clone()
                    }
                }
                StepAction::Prompt { prompt } => {
                    let llm = self
                        .dispatcher
                        .language_model()
                        .ok_or_else(|| RunError::ModelUnavailable(step.id.clone()))?;
                    let rendered = prompt.replace("{{previous}}", &value_text(&previous));
                    let reply = llm
                        .invoke(&rendered)
                        .await
                        .map_err(|e| RunError::Model(e.to_string()))?;
                    parse_reply(&reply)
                }
            };
        }
        Ok(previous)
    }

    async fn complete(&self, mut note: Note, output: Value) -> Result<RunOutcome, RunError> {
        validate_transition(note.status, NoteStatus::Completed)?;
        note.status = NoteStatus::Completed;
        note.content.retry_count = 0;

        let text = output_text(&output);
        note.push_message(MessageRole::Tool, text.clone());

        let follow_up = if suggests_follow_up(&text) {
            let mut follow_up = Note::task(
                format!("Follow up: {}", note.title),
                note.priority - self.config.follow_up_priority_drop,
            )
            .with_description(text.clone());
            follow_up.link(note.id);
            let follow_up_id = follow_up.id;
            self.store.add(follow_up).await?;
            note.link(follow_up_id);
            note.push_message(
                MessageRole::System,
                format!("Created follow-up task {}", follow_up_id),
            );
            Some(follow_up_id)
        } else {
            None
        };

        let note = self.store.update(note).await?;
        info!(note_id = %note.id, "Run completed");

        self.events.emit(NoteEvent::NoteUpdated {
            note_id: note.id,
            status: NoteStatus::Completed,
        });
        self.events.emit(NoteEvent::RunCompleted { note_id: note.id });
        if let Some(follow_up_id) = follow_up {
            info!(note_id = %note.id, %follow_up_id, "Follow-up task created");
            self.events.emit(NoteEvent::NoteCreated {
                note_id: follow_up_id,
            });
            self.events.emit(NoteEvent::FollowUpCreated {
                note_id: note.id,
                follow_up_id,
            });
        }

        Ok(RunOutcome::Completed { output, follow_up })
    }

    async fn fail(&self, mut note: Note, error: RunError) -> Result<RunOutcome, RunError> {
        let message = error.to_string();
        warn!(note_id = %note.id, error = %message, retry_count = note.content.retry_count, "Run failed");

        note.push_message(MessageRole::Error, format!("Run failed: {}", message));
        validate_transition(note.status, NoteStatus::Failed)?;
        note.status = NoteStatus::Failed;

        let max_retries = self.config.max_retries;
        if note.content.retry_count < max_retries {
            note.content.retry_count += 1;
            let attempt = note.content.retry_count;
            validate_transition(note.status, NoteStatus::Pending)?;
            note.status = NoteStatus::Pending;
            note.push_message(
                MessageRole::System,
                format!("Retrying (attempt {} of {})", attempt, max_retries),
            );
            let note = self.store.update(note).await?;
            info!(note_id = %note.id, attempt, max_retries, "Note scheduled for retry");

            self.events.emit(NoteEvent::RunFailed {
                note_id: note.id,
                error: message,
                will_retry: true,
            });
            self.events.emit(NoteEvent::NoteUpdated {
                note_id: note.id,
                status: NoteStatus::Pending,
            });
            return Ok(RunOutcome::Retrying { attempt });
        }

        let mut escalation = Note::task(
            format!("Escalation: {}", note.title),
            note.priority + self.config.escalation_priority_boost,
        )
        .with_description(format!(
            "'{}' failed after {} retries and needs review. Last error: {}",
            note.title, max_retries, message
        ));
        escalation.link(note.id);
        let escalation_id = escalation.id;
        self.store.add(escalation).await?;

        note.link(escalation_id);
        note.push_message(
            MessageRole::System,
            format!("Retry budget exhausted; escalated to {}", escalation_id),
        );
        let note = self.store.update(note).await?;
        warn!(note_id = %note.id, %escalation_id, "Note escalated");

        self.events.emit(NoteEvent::RunFailed {
            note_id: note.id,
            error: message,
            will_retry: false,
        });
        self.events.emit(NoteEvent::NoteUpdated {
            note_id: note.id,
            status: NoteStatus::Failed,
        });
        self.events.emit(NoteEvent::NoteCreated {
            note_id: escalation_id,
        });
        self.events.emit(NoteEvent::NoteEscalated {
            note_id: note.id,
            escalation_id,
        });

        Ok(RunOutcome::Escalated { escalation_id })
    }
}

/// Marks a note as being run by this runner until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<NoteId>>,
    id: NoteId,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<NoteId>>, id: NoteId) -> Result<Self, RunError> {
        let mut ids = set.lock().map_err(|e| {
            RunError::Storage(notable_core::NotableError::Storage(format!(
                "In-flight lock poisoned: {}",
                e
            )))
        })?;
        if !ids.insert(id) {
            return Err(RunError::InvalidTransition(
                NoteStatus::Running,
                NoteStatus::Running,
            ));
        }
        Ok(Self { set, id })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.set.lock() {
            ids.remove(&self.id);
        }
    }
}

/// Text for transcripts and prompts: strings verbatim, everything else as JSON.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The human-readable part of a step output.
fn output_text(output: &Value) -> String {
    match output.get("output") {
        Some(inner) => value_text(inner),
        None => value_text(output),
    }
}

fn suggests_follow_up(text: &str) -> bool {
    let lower = text.to_lowercase();
    FOLLOW_UP_MARKERS.iter().any(|m| lower.contains(m))
}
