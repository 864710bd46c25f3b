//! Priority scheduler for note execution.
//!
//! Holds the queue of pending note ids and admits the highest-priority one
//! whenever a concurrency slot is free. The admission loop sleeps on a
//! [`Notify`] that fires on enqueue and on slot release.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use notable_core::events::{EventBus, NoteEvent};
use notable_core::types::NoteId;
use notable_storage::NoteStore;

use crate::error::SchedulerError;
use crate::runner::NoteRunner;

/// Pause before retrying admission after a store error.
const ERROR_BACKOFF: Duration = Duration::from_millis(250);

pub struct Scheduler {
    store: Arc<dyn NoteStore>,
    queue: Mutex<VecDeque<NoteId>>,
    running: AtomicUsize,
    concurrency_limit: usize,
    wake: Notify,
    idle: Notify,
    shutdown: Notify,
    events: EventBus,
}

impl Scheduler {
    /// Create a scheduler. A limit of 0 is treated as 1.
    pub fn new(store: Arc<dyn NoteStore>, concurrency_limit: usize, events: EventBus) -> Self {
        Self {
            store,
            queue: Mutex::new(VecDeque::new()),
            running: AtomicUsize::new(0),
            concurrency_limit: concurrency_limit.max(1),
            wake: Notify::new(),
            idle: Notify::new(),
            shutdown: Notify::new(),
            events,
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Number of notes currently holding a slot.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Append `id` to the queue. Returns `false` if it was already queued.
    pub fn enqueue(&self, id: NoteId) -> Result<bool, SchedulerError> {
        {
            let mut queue = self.lock()?;
            if queue.contains(&id) {
                return Ok(false);
            }
            queue.push_back(id);
        }
        debug!(note_id = %id, "Note enqueued");
        self.wake.notify_one();
        self.events.emit(NoteEvent::NoteEnqueued { note_id: id });
        Ok(true)
    }

    /// Drop `id` from the queue. Returns whether it was queued.
    pub fn remove(&self, id: NoteId) -> Result<bool, SchedulerError> {
        let removed = {
            let mut queue = self.lock()?;
            let before = queue.len();
            queue.retain(|queued| *queued != id);
            queue.len() != before
        };
        if removed {
            debug!(note_id = %id, "Note removed from queue");
            self.notify_if_idle();
        }
        Ok(removed)
    }

    /// Queued ids in enqueue order.
    pub fn queued(&self) -> Result<Vec<NoteId>, SchedulerError> {
        Ok(self.lock()?.iter().copied().collect())
    }

    pub fn len(&self) -> Result<usize, SchedulerError> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, SchedulerError> {
        Ok(self.lock()?.is_empty())
    }

    /// Remove and return the highest-priority queued id.
    ///
    /// Equal priorities resolve to the earliest enqueued id. Ids whose note no
    /// longer exists are dropped from the queue.
    pub async fn dequeue(&self) -> Result<Option<NoteId>, SchedulerError> {
        self.take_next(false).await
    }

    /// Run the admission loop until [`shutdown`](Self::shutdown) is called.
    ///
    /// Each admitted note runs on its own task and holds one slot until its
    /// run finishes. In-flight runs are not cancelled on shutdown.
    pub async fn run(self: Arc<Self>, runner: Arc<NoteRunner>) {
        info!(concurrency_limit = self.concurrency_limit, "Scheduler started");
        loop {
            match self.take_next(true).await {
                Ok(Some(id)) => {
                    let slot = RunSlot {
                        scheduler: Arc::clone(&self),
                    };
                    let runner = Arc::clone(&runner);
                    tokio::spawn(async move {
                        let _slot = slot;
                        match runner.run(id).await {
                            Ok(outcome) => debug!(note_id = %id, ?outcome, "Run finished"),
                            Err(e) => warn!(note_id = %id, error = %e, "Run rejected"),
                        }
                    });
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "Admission failed");
                    tokio::select! {
                        _ = tokio::time::sleep(ERROR_BACKOFF) => continue,
                        _ = self.shutdown.notified() => break,
                    }
                }
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = self.shutdown.notified() => break,
            }
        }
        info!("Scheduler stopped");
    }

    /// Signal the admission loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Wait until the queue is empty and no note is running.
    ///
    /// Requires the admission loop to be running if anything is queued.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    fn is_idle(&self) -> bool {
        match self.lock() {
            Ok(queue) => queue.is_empty() && self.running.load(Ordering::SeqCst) == 0,
            Err(_) => false,
        }
    }

    fn notify_if_idle(&self) {
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }

    /// Pick the next id. With `claim`, also take a slot in the same critical
    /// section, or return `None` if every slot is busy.
    async fn take_next(&self, claim: bool) -> Result<Option<NoteId>, SchedulerError> {
        loop {
            let snapshot = self.queued()?;
            if snapshot.is_empty() {
                return Ok(None);
            }
            if claim && self.running() >= self.concurrency_limit {
                return Ok(None);
            }

            let mut best: Option<(NoteId, i64)> = None;
            let mut missing = HashSet::new();
            for id in snapshot {
                match self.store.get(id).await? {
                    // Strict comparison keeps the earliest id on ties.
                    Some(note) => {
                        if best.map_or(true, |(_, priority)| note.priority > priority) {
                            best = Some((id, note.priority));
                        }
                    }
                    None => {
                        missing.insert(id);
                    }
                }
            }

            let chosen = {
                let mut queue = self.lock()?;
                if !missing.is_empty() {
                    queue.retain(|id| !missing.contains(id));
                }
                match best.and_then(|(id, _)| queue.iter().position(|q| *q == id)) {
                    Some(pos) => {
                        if claim {
                            if self.running.load(Ordering::SeqCst) >= self.concurrency_limit {
                                return Ok(None);
                            }
                            self.running.fetch_add(1, Ordering::SeqCst);
                        }
                        queue.remove(pos)
                    }
                    None => None,
                }
            };

            for id in &missing {
                warn!(note_id = %id, "Dropping queued id with no note");
            }

            match chosen {
                Some(id) => return Ok(Some(id)),
                // The chosen id was removed while priorities were read.
                None if best.is_some() => continue,
                None => {
                    self.notify_if_idle();
                    return Ok(None);
                }
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<NoteId>>, SchedulerError> {
        self.queue
            .lock()
            .map_err(|e| SchedulerError::Failed(format!("Queue lock poisoned: {}", e)))
    }
}

/// One claimed concurrency slot, released on drop.
struct RunSlot {
    scheduler: Arc<Scheduler>,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.scheduler.running.fetch_sub(1, Ordering::SeqCst);
        self.scheduler.wake.notify_one();
        self.scheduler.notify_if_idle();
    }
}
