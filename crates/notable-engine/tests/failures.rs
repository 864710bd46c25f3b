mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use notable_core::events::NoteEvent;
use notable_core::pipeline::{Pipeline, Step};
use notable_core::types::{MessageRole, Note, NoteId, NoteStatus};
use notable_engine::{
    tool_fn, BoxError, Decision, NewTask, NoteSystem, PlanningRule, RuleContext, RuleError,
    RulePhase, SystemError, ToolDefinition,
};
use notable_storage::{Database, GraphNoteStore};

use common::{run_until_idle, system, Recorder};

#[tokio::test]
async fn unknown_tool_retries_then_escalates() {
    let system = system(1);
    let recorder = Recorder::attach(&system);

    let logic = Pipeline::new(vec![Step::tool("ghost", NoteId::new(), json!({}))]);
    let note = system
        .create_task(NewTask::new("call a ghost").priority(60).logic(logic))
        .await
        .unwrap();
    system.enqueue(note.id).await.unwrap();

    run_until_idle(&system).await;

    let failed = system.get_note(note.id).await.unwrap().unwrap();
    assert_eq!(failed.status, NoteStatus::Failed);
    assert_eq!(failed.content.retry_count, 3);
    let errors = failed
        .content
        .messages
        .iter()
        .filter(|m| m.role == MessageRole::Error)
        .count();
    assert_eq!(errors, 4);

    let escalations: Vec<Note> = system
        .list_notes()
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.title.starts_with("Escalation:"))
        .collect();
    assert_eq!(escalations.len(), 1);
    let escalation = &escalations[0];
    assert_eq!(escalation.priority, 70);
    assert_eq!(escalation.status, NoteStatus::Pending);
    assert!(escalation.references.contains(&note.id));
    assert!(failed.references.contains(&escalation.id));

    let retries = recorder
        .all()
        .into_iter()
        .filter(|e| matches!(e, NoteEvent::RunFailed { will_retry: true, .. }))
        .count();
    assert_eq!(retries, 3);
    assert_eq!(recorder.run_started().len(), 4);
    assert!(recorder.all().contains(&NoteEvent::NoteEscalated {
        note_id: note.id,
        escalation_id: escalation.id,
    }));
}

#[tokio::test]
async fn transient_failure_recovers_on_retry() {
    let system = system(1);
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let flaky = ToolDefinition::custom("Flaky");
    let flaky_id = flaky.id;
    system
        .register_tool(
            flaky,
            Some(tool_fn(move |_input: Value| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                        Err::<Value, BoxError>("connection reset".into())
                    } else {
                        Ok(json!({"output": "ok"}))
                    }
                }
            })),
        )
        .await
        .unwrap();

    let logic = Pipeline::new(vec![Step::tool("flaky", flaky_id, json!({}))]);
    let note = system
        .create_task(NewTask::new("flaky work").logic(logic))
        .await
        .unwrap();
    system.enqueue(note.id).await.unwrap();
    run_until_idle(&system).await;

    let done = system.get_note(note.id).await.unwrap().unwrap();
    assert_eq!(done.status, NoteStatus::Completed);
    assert_eq!(done.content.retry_count, 0);
    assert!(done
        .content
        .messages
        .iter()
        .any(|m| m.content == "Retrying (attempt 1 of 3)"));
    assert!(done
        .content
        .messages
        .iter()
        .any(|m| m.role == MessageRole::Error && m.content.contains("connection reset")));
}

struct ExplodingRule;

#[async_trait]
impl PlanningRule for ExplodingRule {
    fn name(&self) -> &str {
        "exploding"
    }

    fn phase(&self) -> RulePhase {
        RulePhase::Before
    }

    async fn evaluate(&self, _note: &Note, _ctx: &RuleContext) -> Result<Decision, RuleError> {
        Err(RuleError::Failed("rule blew up".to_string()))
    }
}

#[tokio::test]
async fn rule_failure_does_not_abort_run() {
    let system = system(1);
    let recorder = Recorder::attach(&system);
    system.add_rule(Arc::new(ExplodingRule));

    let note = system.create_task(NewTask::new("survivor")).await.unwrap();
    system.enqueue(note.id).await.unwrap();
    run_until_idle(&system).await;

    let done = system.get_note(note.id).await.unwrap().unwrap();
    assert_eq!(done.status, NoteStatus::Completed);
    assert!(!done
        .content
        .messages
        .iter()
        .any(|m| m.content.contains("rule blew up")));
    assert!(recorder.all().iter().any(|e| matches!(
        e,
        NoteEvent::RuleFailed { rule, .. } if rule == "exploding"
    )));
}

#[tokio::test]
async fn update_note_enforces_transitions() {
    let system = system(1);
    let note = system.create_task(NewTask::new("park me")).await.unwrap();

    let mut parked = note.clone();
    parked.status = NoteStatus::Dormant;
    let parked = system.update_note(parked).await.unwrap();
    assert_eq!(parked.status, NoteStatus::Dormant);

    let mut skip = parked.clone();
    skip.status = NoteStatus::Completed;
    assert!(matches!(
        system.update_note(skip).await,
        Err(SystemError::Run(_))
    ));

    let mut retitled = parked;
    retitled.title = "parked".to_string();
    assert_eq!(system.update_note(retitled).await.unwrap().title, "parked");

    let ghost = Note::task("ghost", 1);
    assert!(matches!(
        system.update_note(ghost).await,
        Err(SystemError::NoteNotFound(_))
    ));
}

#[tokio::test]
async fn stale_running_note_can_be_failed_by_hand() {
    let system = system(1);
    let note = system.create_task(NewTask::new("orphan")).await.unwrap();
    let mut stuck = note.clone();
    stuck.status = NoteStatus::Running;
    system.store().update(stuck).await.unwrap();

    let mut reset = system.get_note(note.id).await.unwrap().unwrap();
    reset.status = NoteStatus::Pending;
    assert!(matches!(
        system.update_note(reset.clone()).await,
        Err(SystemError::Run(_))
    ));

    reset.status = NoteStatus::Failed;
    assert_eq!(
        system.update_note(reset).await.unwrap().status,
        NoteStatus::Failed
    );
}

#[tokio::test]
async fn bootstrap_recovers_runs_cut_short_by_exit() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("notes.db");

    let (id, exhausted) = {
        let store = Arc::new(GraphNoteStore::new(Arc::new(Database::new(&db_path).unwrap())));
        let system = NoteSystem::builder(store).build();
        system.bootstrap().await.unwrap();

        let note = system.create_task(NewTask::new("cut short").priority(40)).await.unwrap();
        let mut running = note.clone();
        running.status = NoteStatus::Running;
        system.store().update(running).await.unwrap();

        let spent = system.create_task(NewTask::new("out of retries")).await.unwrap();
        let mut running = spent.clone();
        running.status = NoteStatus::Running;
        running.content.retry_count = 3;
        system.store().update(running).await.unwrap();
        (note.id, spent.id)
    };

    let store = Arc::new(GraphNoteStore::new(Arc::new(Database::new(&db_path).unwrap())));
    let system = NoteSystem::builder(store).without_default_rules().build();
    system.bootstrap().await.unwrap();

    let recovered = system.get_note(id).await.unwrap().unwrap();
    assert_eq!(recovered.status, NoteStatus::Pending);
    assert_eq!(recovered.content.retry_count, 1);
    assert!(recovered
        .content
        .messages
        .iter()
        .any(|m| m.role == MessageRole::Error && m.content.contains("interrupted")));
    assert_eq!(system.scheduler().queued().unwrap(), vec![id]);

    let failed = system.get_note(exhausted).await.unwrap().unwrap();
    assert_eq!(failed.status, NoteStatus::Failed);
    assert_eq!(failed.references.len(), 1);

    // A second bootstrap finds nothing left to recover.
    system.bootstrap().await.unwrap();
    assert_eq!(system.scheduler().queued().unwrap(), vec![id]);

    run_until_idle(&system).await;
    assert_eq!(
        system.get_note(id).await.unwrap().unwrap().status,
        NoteStatus::Completed
    );
}
