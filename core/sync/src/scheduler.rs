//! Background worker that serializes commits and updates.
//!
//! Manual requests arrive over a channel and are answered through a oneshot
//! reply. Between requests the worker runs periodic ticks that commit and
//! update on their own, as allowed by the session preferences.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use revsync_common::{DocumentId, Error, Result};
use revsync_remote::RemoteAuthority;

use crate::engine::{SyncEngine, SyncOutcome};
use crate::state::SyncStatus;
use crate::throttle::{FailureLog, SyncOperation};

const AUTO_COMMIT_COMMENT: &str = "Automatic commit";

/// A manual sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    Commit { document: DocumentId, comment: String },
    Update { document: DocumentId },
}

impl SyncRequest {
    pub fn document(&self) -> &DocumentId {
        match self {
            SyncRequest::Commit { document, .. } | SyncRequest::Update { document } => document,
        }
    }
}

enum Command {
    Run(SyncRequest, oneshot::Sender<Result<SyncOutcome>>),
    Shutdown,
}

/// Manual requests queued per document; ticks leave these documents alone.
#[derive(Debug, Default, Clone)]
struct PendingRequests(Arc<Mutex<HashMap<DocumentId, usize>>>);

impl PendingRequests {
    fn add(&self, document: &DocumentId) {
        if let Ok(mut pending) = self.0.lock() {
            *pending.entry(document.clone()).or_default() += 1;
        }
    }

    fn done(&self, document: &DocumentId) {
        if let Ok(mut pending) = self.0.lock() {
            if let Some(count) = pending.get_mut(document) {
                *count -= 1;
                if *count == 0 {
                    pending.remove(document);
                }
            }
        }
    }

    fn contains(&self, document: &DocumentId) -> bool {
        self.0
            .lock()
            .map(|pending| pending.contains_key(document))
            .unwrap_or(false)
    }
}

/// Client side of the scheduler: submits requests and controls ticks.
#[derive(Clone)]
pub struct SyncScheduler {
    commands: mpsc::Sender<Command>,
    period: Arc<watch::Sender<Option<Duration>>>,
    pending: PendingRequests,
}

impl SyncScheduler {
    /// Create a scheduler ticking every `period`, or never if `None`.
    ///
    /// Nothing runs until the returned handle is spawned.
    pub fn new(period: Option<Duration>) -> (Self, SyncSchedulerHandle) {
        let (commands, rx) = mpsc::channel(100);
        let (period, period_rx) = watch::channel(period);
        let pending = PendingRequests::default();

        let scheduler = Self {
            commands,
            period: Arc::new(period),
            pending: pending.clone(),
        };
        let handle = SyncSchedulerHandle {
            commands: rx,
            period: period_rx,
            pending,
        };
        (scheduler, handle)
    }

    pub async fn request_commit(
        &self,
        document: DocumentId,
        comment: impl Into<String>,
    ) -> Result<SyncOutcome> {
        self.request(SyncRequest::Commit {
            document,
            comment: comment.into(),
        })
        .await
    }

    pub async fn request_update(&self, document: DocumentId) -> Result<SyncOutcome> {
        self.request(SyncRequest::Update { document }).await
    }

    /// Queue a request and wait for the worker to answer it.
    pub async fn request(&self, request: SyncRequest) -> Result<SyncOutcome> {
        let document = request.document().clone();
        let (reply, response) = oneshot::channel();

        self.pending.add(&document);
        if self.commands.send(Command::Run(request, reply)).await.is_err() {
            self.pending.done(&document);
            return Err(Error::InvalidState("Scheduler not running".to_string()));
        }

        response
            .await
            .map_err(|_| Error::InvalidState("Scheduler dropped the request".to_string()))?
    }

    /// Change the tick period. The next tick is one new period away, or
    /// one period after the running operation if there is one.
    pub fn set_period(&self, period: Duration) {
        self.period.send_replace(Some(period));
    }

    /// Stop periodic ticks, including one already scheduled. An operation
    /// already running completes.
    pub fn cancel_periodic(&self) {
        self.period.send_replace(None);
    }

    pub fn period(&self) -> Option<Duration> {
        *self.period.borrow()
    }

    /// Stop the worker once the operation it is running completes.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// Worker side of the scheduler.
pub struct SyncSchedulerHandle {
    commands: mpsc::Receiver<Command>,
    period: watch::Receiver<Option<Duration>>,
    pending: PendingRequests,
}

impl SyncSchedulerHandle {
    /// Run the worker until shutdown or until every scheduler is dropped.
    ///
    /// This should be spawned in a tokio task. Manual requests take
    /// priority over ticks. Failures of ticks are logged, never returned.
    pub async fn run<A>(mut self, engine: Arc<SyncEngine<A>>)
    where
        A: RemoteAuthority + ?Sized + 'static,
    {
        let initial = *self.period.borrow_and_update();
        let mut ticks = initial.map(periodic);
        let mut period_open = true;
        let mut failures = FailureLog::new();

        info!("Sync scheduler started");

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Run(request, reply)) => {
                        debug!("Processing sync request: {:?}", request);
                        let document = request.document().clone();
                        let result = match request {
                            SyncRequest::Commit { document, comment } => {
                                engine.commit(&document, &comment).await
                            }
                            SyncRequest::Update { document } => engine.update(&document).await,
                        };
                        self.pending.done(&document);
                        // The requester may have given up.
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown) | None => {
                        info!("Sync scheduler shutting down");
                        break;
                    }
                },

                changed = self.period.changed(), if period_open => {
                    if changed.is_err() {
                        period_open = false;
                        continue;
                    }
                    let period = *self.period.borrow_and_update();
                    debug!("Sync period changed to {:?}", period);
                    ticks = period.map(periodic);
                }

                _ = wait_for_tick(&mut ticks) => {
                    self.tick(&engine, &mut failures).await;
                }
            }
        }
    }

    async fn tick<A>(&self, engine: &SyncEngine<A>, failures: &mut FailureLog)
    where
        A: RemoteAuthority + ?Sized,
    {
        let session = engine.session();
        let preferences = session.preferences();
        if !preferences.any_enabled() {
            return;
        }

        let documents = session.document_ids().await;
        for id in &documents {
            if self.pending.contains(id) {
                debug!("Skipping tick for {}: manual request queued", id);
                continue;
            }
            let Ok(document) = session.lookup(id).await else {
                continue;
            };
            if document.is_auto_sync_disabled() {
                continue;
            }

            if preferences.auto_commit() && document.status() != SyncStatus::Conflict {
                match session.editor().has_uncommitted(id) {
                    Ok(true) => {
                        let result = engine.commit(id, AUTO_COMMIT_COMMENT).await;
                        record(failures, id, SyncOperation::Commit, result);
                    }
                    Ok(false) => {}
                    Err(err) => {
                        failures.failure(id, SyncOperation::Commit, &err);
                    }
                }
            }

            if preferences.auto_update() {
                let result = engine.update(id).await;
                record(failures, id, SyncOperation::Update, result);
            }
        }

        failures.retain(|id| documents.contains(id));
    }
}

fn record(
    failures: &mut FailureLog,
    document: &DocumentId,
    operation: SyncOperation,
    result: Result<SyncOutcome>,
) {
    match result {
        Ok(outcome) => {
            debug!("Scheduled {} of {}: {}", operation, document, outcome);
            failures.success(document, operation);
        }
        Err(err) => {
            failures.failure(document, operation, &err);
        }
    }
}

fn periodic(period: Duration) -> Interval {
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticks
}

async fn wait_for_tick(ticks: &mut Option<Interval>) {
    match ticks {
        Some(ticks) => {
            ticks.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
