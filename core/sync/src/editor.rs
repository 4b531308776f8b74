//! Foreground editing state and the handoff used to replay remote changes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use revsync_changes::{ChangeRecorder, ChangeSet, Document, RecordedEdit, RecorderEvent};
use revsync_common::{DocumentId, Error, Result};

/// Uncommitted changes captured for a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSnapshot {
    pub changes: ChangeSet,
    /// Undo entries covered by `changes`; cleared once the commit lands.
    pub edits: Vec<RecordedEdit>,
}

struct EditorState {
    recorder: ChangeRecorder,
    documents: HashMap<DocumentId, Box<dyn Document>>,
}

fn not_open(id: &DocumentId) -> Error {
    Error::NotFound(format!("Document {} is not open", id))
}

/// Open documents and their edit recorder.
///
/// Cloning yields another handle to the same state. Edits, undo and redo
/// come from the foreground; the sync worker reads uncommitted snapshots
/// and replays remote changes. Every access holds the lock only briefly.
#[derive(Clone)]
pub struct LocalEditor {
    state: Arc<Mutex<EditorState>>,
}

impl LocalEditor {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EditorState {
                recorder: ChangeRecorder::new(),
                documents: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, EditorState>> {
        self.state
            .lock()
            .map_err(|_| Error::InvalidState("Editor lock poisoned".to_string()))
    }

    /// Subscribe to edit notifications.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<RecorderEvent>> {
        Ok(self.lock()?.recorder.subscribe())
    }

    /// Start holding a document.
    ///
    /// # Errors
    /// - A document with the same id is already open
    pub fn open(&self, id: DocumentId, document: Box<dyn Document>) -> Result<()> {
        let mut state = self.lock()?;
        if state.documents.contains_key(&id) {
            return Err(Error::AlreadyExists(format!("Document {} is already open", id)));
        }
        state.documents.insert(id, document);
        Ok(())
    }

    pub fn is_open(&self, id: &DocumentId) -> Result<bool> {
        Ok(self.lock()?.documents.contains_key(id))
    }

    /// Close a document and drop its undo history.
    pub fn close(&self, id: &DocumentId) -> Result<Option<Box<dyn Document>>> {
        let mut state = self.lock()?;
        state.recorder.drop_document(id);
        Ok(state.documents.remove(id))
    }

    /// Close every document except `keep`.
    pub fn retain_only(&self, keep: Option<&DocumentId>) -> Result<()> {
        let mut state = self.lock()?;
        state.documents.retain(|id, _| Some(id) == keep);
        state.recorder.retain(|id| Some(id) == keep);
        Ok(())
    }

    /// Make `id` the document edits, undo and redo apply to.
    pub fn activate(&self, id: &DocumentId) -> Result<()> {
        let mut state = self.lock()?;
        if !state.documents.contains_key(id) {
            return Err(not_open(id));
        }
        state.recorder.activate(id.clone());
        Ok(())
    }

    pub fn active(&self) -> Result<Option<DocumentId>> {
        Ok(self.lock()?.recorder.active().cloned())
    }

    fn active_id(state: &EditorState) -> Result<DocumentId> {
        state
            .recorder
            .active()
            .cloned()
            .ok_or_else(|| Error::InvalidState("No active document".to_string()))
    }

    /// Apply a local edit to the active document and record it.
    ///
    /// Returns the operations that took effect.
    pub fn apply_edit(&self, changes: &ChangeSet) -> Result<ChangeSet> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let id = Self::active_id(state)?;
        let document = state
            .documents
            .get_mut(&id)
            .ok_or_else(|| not_open(&id))?;
        state.recorder.record_edit(document.as_mut(), changes)
    }

    pub fn undo(&self) -> Result<bool> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let id = Self::active_id(state)?;
        let document = state
            .documents
            .get_mut(&id)
            .ok_or_else(|| not_open(&id))?;
        state.recorder.undo(document.as_mut())
    }

    pub fn redo(&self) -> Result<bool> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let id = Self::active_id(state)?;
        let document = state
            .documents
            .get_mut(&id)
            .ok_or_else(|| not_open(&id))?;
        state.recorder.redo(document.as_mut())
    }

    /// Empty the undo and redo stacks of a document.
    pub fn reset_history(&self, id: &DocumentId) -> Result<()> {
        self.lock()?.recorder.reset(id);
        Ok(())
    }

    pub fn uncommitted(&self, id: &DocumentId) -> Result<ChangeSet> {
        Ok(self.lock()?.recorder.uncommitted_for(id))
    }

    pub fn has_uncommitted(&self, id: &DocumentId) -> Result<bool> {
        Ok(!self.uncommitted(id)?.is_empty())
    }

    /// Capture the uncommitted changes of a document for a commit.
    pub fn snapshot(&self, id: &DocumentId) -> Result<CommitSnapshot> {
        let state = self.lock()?;
        Ok(CommitSnapshot {
            changes: state.recorder.uncommitted_for(id),
            edits: state.recorder.undo_entries(id),
        })
    }

    /// Forget the undo entries a successful commit covered.
    ///
    /// Returns the changes that became uncommitted again because their
    /// edit was undone while the commit was in flight.
    pub fn clear_committed(
        &self,
        id: &DocumentId,
        snapshot: &CommitSnapshot,
    ) -> Result<ChangeSet> {
        Ok(self.lock()?.recorder.clear_committed(id, &snapshot.edits))
    }

    /// Replay remotely authored changes without recording them.
    ///
    /// Listener notifications are suppressed for the duration.
    pub fn apply_remote(&self, id: &DocumentId, changes: &ChangeSet) -> Result<ChangeSet> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let document = state
            .documents
            .get_mut(id)
            .ok_or_else(|| not_open(id))?;

        let was_quiet = state.recorder.is_quiet();
        state.recorder.set_quiet(true);
        let result = state.recorder.apply_remote(id, document.as_mut(), changes);
        state.recorder.set_quiet(was_quiet);
        result
    }

    /// Current contents of a document.
    pub fn contents(&self, id: &DocumentId) -> Result<ChangeSet> {
        let state = self.lock()?;
        let document = state.documents.get(id).ok_or_else(|| not_open(id))?;
        Ok(document.contents())
    }

    pub fn undo_len(&self, id: &DocumentId) -> Result<usize> {
        Ok(self.lock()?.recorder.undo_len(id))
    }

    pub fn redo_len(&self, id: &DocumentId) -> Result<usize> {
        Ok(self.lock()?.recorder.redo_len(id))
    }
}

impl Default for LocalEditor {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs remote replays on whichever thread owns document mutation.
#[async_trait]
pub trait MutationExecutor: Send + Sync {
    /// Apply `changes` to a document and wait until that has happened.
    async fn apply_remote(
        &self,
        editor: &LocalEditor,
        document: &DocumentId,
        changes: ChangeSet,
    ) -> Result<ChangeSet>;
}

/// Applies replays directly on the calling task.
///
/// For headless clients with no thread affinity on documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectExecutor;

#[async_trait]
impl MutationExecutor for DirectExecutor {
    async fn apply_remote(
        &self,
        editor: &LocalEditor,
        document: &DocumentId,
        changes: ChangeSet,
    ) -> Result<ChangeSet> {
        editor.apply_remote(document, &changes)
    }
}

struct MutationJob {
    document: DocumentId,
    changes: ChangeSet,
    reply: oneshot::Sender<Result<ChangeSet>>,
}

/// Sends replays to the foreground and waits for them to be applied.
pub struct ForegroundQueue {
    jobs: mpsc::UnboundedSender<MutationJob>,
}

/// Foreground end of a [`ForegroundQueue`].
pub struct ForegroundPump {
    jobs: mpsc::UnboundedReceiver<MutationJob>,
    editor: LocalEditor,
}

impl ForegroundQueue {
    /// Create the queue and the pump the foreground drains it with.
    pub fn new(editor: LocalEditor) -> (Self, ForegroundPump) {
        let (jobs, rx) = mpsc::unbounded_channel();
        (Self { jobs }, ForegroundPump { jobs: rx, editor })
    }
}

#[async_trait]
impl MutationExecutor for ForegroundQueue {
    async fn apply_remote(
        &self,
        _editor: &LocalEditor,
        document: &DocumentId,
        changes: ChangeSet,
    ) -> Result<ChangeSet> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(MutationJob {
                document: document.clone(),
                changes,
                reply,
            })
            .map_err(|_| Error::InvalidState("Foreground pump is gone".to_string()))?;

        response.await.map_err(|_| {
            Error::InvalidState("Foreground dropped a replay without answering".to_string())
        })?
    }
}

impl ForegroundPump {
    /// Apply every queued replay without blocking. Returns how many ran.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(job) = self.jobs.try_recv() {
            self.run(job);
            handled += 1;
        }
        handled
    }

    /// Block the calling (non-async) thread until one replay arrives and
    /// apply it. Returns `false` once the queue is closed.
    pub fn wait_and_pump(&mut self) -> bool {
        match self.jobs.blocking_recv() {
            Some(job) => {
                self.run(job);
                true
            }
            None => false,
        }
    }

    fn run(&self, job: MutationJob) {
        debug!(
            "Applying {} remote changes to {} on the foreground",
            job.changes.len(),
            job.document
        );
        let result = self.editor.apply_remote(&job.document, &job.changes);
        // The requester may have given up.
        let _ = job.reply.send(result);
    }
}
