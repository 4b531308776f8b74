//! Undo/redo recording of document edits.

use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;

use revsync_common::{DocumentId, Error, Result};

use crate::document::Document;
use crate::set::ChangeSet;

/// What the recorder is currently doing with the batches it is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingMode {
    /// Fresh edits: push on undo, invalidate redo.
    #[default]
    Normal,
    /// An undo is being applied: its effect becomes a redo entry.
    Undoing,
    /// A redo is being applied: it re-enters undo history.
    Redoing,
}

/// Notifications for listeners interested in the edit history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// A batch was recorded in a document's undo or redo stack.
    ChangesLogged {
        document: DocumentId,
        mode: RecordingMode,
        changes: usize,
    },
    /// Remotely authored changes were applied without being recorded.
    RemoteApplied { document: DocumentId, changes: usize },
    /// Another document's stacks became active.
    Activated { document: DocumentId },
}

/// One batch on an undo or redo stack.
///
/// `seq` identifies the edit the batch came from and stays the same while
/// the batch moves between the undo and redo stacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEdit {
    pub seq: u64,
    pub changes: ChangeSet,
}

/// Forward change sets of one document.
#[derive(Debug, Default)]
struct StackPair {
    undo: Vec<RecordedEdit>,
    redo: Vec<RecordedEdit>,
}

impl StackPair {
    fn flattened(&self) -> ChangeSet {
        ChangeSet::concat(self.undo.iter().map(|edit| &edit.changes)).minimized()
    }
}

/// Records every batch of edits applied to the active document and keeps a
/// separate undo/redo stack pair per document.
pub struct ChangeRecorder {
    stacks: HashMap<DocumentId, StackPair>,
    active: Option<DocumentId>,
    mode: RecordingMode,
    /// Edit being moved by an in-progress undo or redo.
    moving: Option<u64>,
    next_seq: u64,
    quiet: bool,
    events: broadcast::Sender<RecorderEvent>,
}

impl ChangeRecorder {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            stacks: HashMap::new(),
            active: None,
            mode: RecordingMode::Normal,
            moving: None,
            next_seq: 0,
            quiet: false,
            events,
        }
    }

    /// Subscribe to recorder notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    pub fn mode(&self) -> RecordingMode {
        self.mode
    }

    pub fn active(&self) -> Option<&DocumentId> {
        self.active.as_ref()
    }

    /// Suppress listener notifications, e.g. for background replays.
    ///
    /// Recording itself is unaffected.
    pub fn set_quiet(&mut self, quiet: bool) {
        self.quiet = quiet;
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Swap in the stacks of `document`, creating them on first use.
    pub fn activate(&mut self, document: DocumentId) {
        self.stacks.entry(document.clone()).or_default();
        if self.active.as_ref() != Some(&document) {
            debug!("Activating undo history of {}", document);
            self.notify(RecorderEvent::Activated {
                document: document.clone(),
            });
        }
        self.active = Some(document);
    }

    fn active_pair(&mut self) -> Result<(DocumentId, &mut StackPair)> {
        let document = self
            .active
            .clone()
            .ok_or_else(|| Error::InvalidState("No active document to record".to_string()))?;
        let pair = self.stacks.entry(document.clone()).or_default();
        Ok((document, pair))
    }

    /// Record a batch of changes that was just applied to the active document.
    pub fn log_changes(&mut self, changes: ChangeSet) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mode = self.mode;
        let count = changes.len();
        let seq = match (mode, self.moving) {
            (RecordingMode::Normal, _) | (_, None) => self.fresh_seq(),
            (_, Some(seq)) => seq,
        };
        let (document, pair) = self.active_pair()?;
        match mode {
            RecordingMode::Normal => {
                pair.redo.clear();
                pair.undo.push(RecordedEdit { seq, changes });
            }
            RecordingMode::Redoing => pair.undo.push(RecordedEdit { seq, changes }),
            RecordingMode::Undoing => pair.redo.push(RecordedEdit {
                seq,
                changes: changes.inverse(),
            }),
        }

        self.notify(RecorderEvent::ChangesLogged {
            document,
            mode,
            changes: count,
        });
        Ok(())
    }

    /// Apply a local edit to the active document and record what took effect.
    pub fn record_edit(
        &mut self,
        doc: &mut dyn Document,
        changes: &ChangeSet,
    ) -> Result<ChangeSet> {
        if self.active.is_none() {
            return Err(Error::InvalidState(
                "No active document to record".to_string(),
            ));
        }
        let applied = doc.apply(changes)?;
        self.log_changes(applied.clone())?;
        Ok(applied)
    }

    /// Revert the most recent edit of the active document.
    ///
    /// Returns `false` when there is nothing to undo.
    pub fn undo(&mut self, doc: &mut dyn Document) -> Result<bool> {
        let (_, pair) = self.active_pair()?;
        let Some(batch) = pair.undo.pop() else {
            return Ok(false);
        };

        self.mode = RecordingMode::Undoing;
        self.moving = Some(batch.seq);
        let result = doc
            .apply(&batch.changes.inverse())
            .and_then(|applied| self.log_changes(applied));
        self.mode = RecordingMode::Normal;
        self.moving = None;

        if let Err(err) = result {
            self.active_pair()?.1.undo.push(batch);
            return Err(err);
        }
        Ok(true)
    }

    /// Re-apply the most recently undone edit of the active document.
    ///
    /// Returns `false` when there is nothing to redo.
    pub fn redo(&mut self, doc: &mut dyn Document) -> Result<bool> {
        let (_, pair) = self.active_pair()?;
        let Some(batch) = pair.redo.pop() else {
            return Ok(false);
        };

        self.mode = RecordingMode::Redoing;
        self.moving = Some(batch.seq);
        let result = doc
            .apply(&batch.changes)
            .and_then(|applied| self.log_changes(applied));
        self.mode = RecordingMode::Normal;
        self.moving = None;

        if let Err(err) = result {
            self.active_pair()?.1.redo.push(batch);
            return Err(err);
        }
        Ok(true)
    }

    /// Apply remotely authored changes without recording them.
    pub fn apply_remote(
        &mut self,
        document: &DocumentId,
        doc: &mut dyn Document,
        changes: &ChangeSet,
    ) -> Result<ChangeSet> {
        let applied = doc.apply(changes)?;
        self.notify(RecorderEvent::RemoteApplied {
            document: document.clone(),
            changes: applied.len(),
        });
        Ok(applied)
    }

    /// Minimized change set of every edit still on the active undo stack.
    pub fn uncommitted_changes(&self) -> ChangeSet {
        self.active
            .as_ref()
            .map(|document| self.uncommitted_for(document))
            .unwrap_or_default()
    }

    /// Minimized change set of every edit still on `document`'s undo stack.
    pub fn uncommitted_for(&self, document: &DocumentId) -> ChangeSet {
        self.stacks
            .get(document)
            .map(StackPair::flattened)
            .unwrap_or_default()
    }

    /// Undo stack of `document`, oldest first.
    pub fn undo_entries(&self, document: &DocumentId) -> Vec<RecordedEdit> {
        self.stacks
            .get(document)
            .map(|pair| pair.undo.clone())
            .unwrap_or_default()
    }

    pub fn undo_len(&self, document: &DocumentId) -> usize {
        self.stacks.get(document).map(|p| p.undo.len()).unwrap_or(0)
    }

    pub fn redo_len(&self, document: &DocumentId) -> usize {
        self.stacks.get(document).map(|p| p.redo.len()).unwrap_or(0)
    }

    pub fn can_undo(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|document| self.undo_len(document) > 0)
    }

    pub fn can_redo(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|document| self.redo_len(document) > 0)
    }

    /// Forget the undo entries of `document` that went into a commit.
    ///
    /// `committed` is the undo stack as it was captured for the commit.
    /// Edits recorded since stay on the stack. A committed edit that was
    /// undone in the meantime is now part of the remote history but missing
    /// locally, so its inverse is queued at the bottom of the undo stack as
    /// a new uncommitted edit. Returns what was queued that way.
    pub fn clear_committed(
        &mut self,
        document: &DocumentId,
        committed: &[RecordedEdit],
    ) -> ChangeSet {
        let Some(pair) = self.stacks.get(document) else {
            return ChangeSet::new();
        };
        let undone: Vec<ChangeSet> = committed
            .iter()
            .rev()
            .filter(|edit| !pair.undo.iter().any(|entry| entry.seq == edit.seq))
            .map(|edit| edit.changes.inverse())
            .collect();
        let requeued: Vec<RecordedEdit> = undone
            .iter()
            .map(|changes| RecordedEdit {
                seq: self.fresh_seq(),
                changes: changes.clone(),
            })
            .collect();

        let Some(pair) = self.stacks.get_mut(document) else {
            return ChangeSet::new();
        };
        let before = pair.undo.len();
        pair.undo
            .retain(|entry| !committed.iter().any(|edit| edit.seq == entry.seq));
        debug!(
            "Cleared {} committed edits of {}",
            before - pair.undo.len(),
            document
        );
        pair.undo.splice(0..0, requeued);
        ChangeSet::concat(undone.iter())
    }

    /// Empty both stacks of `document` without forgetting the document.
    pub fn reset(&mut self, document: &DocumentId) {
        if let Some(pair) = self.stacks.get_mut(document) {
            pair.undo.clear();
            pair.redo.clear();
        }
    }

    /// Forget the stacks of a closed document.
    pub fn drop_document(&mut self, document: &DocumentId) {
        self.stacks.remove(document);
        if self.active.as_ref() == Some(document) {
            self.active = None;
        }
    }

    /// Keep only the stacks of documents matching `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&DocumentId) -> bool) {
        self.stacks.retain(|document, _| keep(document));
        if let Some(active) = &self.active {
            if !self.stacks.contains_key(active) {
                self.active = None;
            }
        }
    }

    fn fresh_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn notify(&self, event: RecorderEvent) {
        if !self.quiet {
            // No receivers is fine.
            let _ = self.events.send(event);
        }
    }
}

impl Default for ChangeRecorder {
    fn default() -> Self {
        Self::new()
    }
}
