#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use notable_core::config::EngineConfig;
use notable_core::events::{NoteEvent, Subscription};
use notable_engine::{BoxError, LanguageModel, NoteSystem};
use notable_storage::MemoryNoteStore;

/// Upper bound for any scenario to reach idle.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn system(concurrency_limit: usize) -> NoteSystem {
    NoteSystem::builder(Arc::new(MemoryNoteStore::new()))
        .config(EngineConfig {
            concurrency_limit,
            ..EngineConfig::default()
        })
        .without_default_rules()
        .build()
}

/// Collects every event emitted while the subscription is alive.
pub struct Recorder {
    pub events: Arc<Mutex<Vec<NoteEvent>>>,
    _subscription: Subscription,
}

impl Recorder {
    pub fn attach(system: &NoteSystem) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = system.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        Self {
            events,
            _subscription: subscription,
        }
    }

    pub fn all(&self) -> Vec<NoteEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn run_started(&self) -> Vec<notable_core::NoteId> {
        self.all()
            .into_iter()
            .filter_map(|e| match e {
                NoteEvent::RunStarted { note_id } => Some(note_id),
                _ => None,
            })
            .collect()
    }
}

pub async fn run_until_idle(system: &NoteSystem) {
    system.start().unwrap();
    tokio::time::timeout(IDLE_TIMEOUT, system.wait_idle())
        .await
        .expect("system should go idle");
    system.shutdown().await;
}

/// Language model that always answers with the same text.
pub struct FixedModel(pub String);

#[async_trait]
impl LanguageModel for FixedModel {
    async fn invoke(&self, _prompt: &str) -> Result<String, BoxError> {
        Ok(self.0.clone())
    }
}
