//! Log throttling for failures of unattended sync operations.

use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

use revsync_common::{DocumentId, Error};

/// Operations the scheduler runs on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOperation {
    Commit,
    Update,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOperation::Commit => write!(f, "commit"),
            SyncOperation::Update => write!(f, "update"),
        }
    }
}

/// Remembers the last failure per document and operation so a server
/// that stays down produces one warning, not one per tick.
#[derive(Debug, Default)]
pub struct FailureLog {
    last: HashMap<(DocumentId, SyncOperation), String>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a failure. Returns `true` if it was reported at warn level.
    pub fn failure(
        &mut self,
        document: &DocumentId,
        operation: SyncOperation,
        error: &Error,
    ) -> bool {
        let message = error.to_string();
        let key = (document.clone(), operation);

        if self.last.get(&key) == Some(&message) {
            debug!("Scheduled {} of {} still failing: {}", operation, document, message);
            return false;
        }

        warn!("Scheduled {} of {} failed: {}", operation, document, message);
        self.last.insert(key, message);
        true
    }

    /// Clear the failure state after a success.
    pub fn success(&mut self, document: &DocumentId, operation: SyncOperation) {
        if self.last.remove(&(document.clone(), operation)).is_some() {
            info!("Scheduled {} of {} recovered", operation, document);
        }
    }

    pub fn is_failing(&self, document: &DocumentId, operation: SyncOperation) -> bool {
        self.last.contains_key(&(document.clone(), operation))
    }

    /// Drop state for documents that are no longer tracked.
    pub fn retain(&mut self, mut keep: impl FnMut(&DocumentId) -> bool) {
        self.last.retain(|(document, _), _| keep(document));
    }
}
