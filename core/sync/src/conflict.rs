//! Conflict detection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use revsync_changes::ChangeHistory;
use revsync_common::{DocumentId, Error, Revision};

/// A commit rejected because its base revision was behind the remote head.
///
/// Conflicts are never resolved automatically: the document has to be
/// updated to the remote head before it may commit again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub document: DocumentId,
    /// Revision the rejected commit was based on.
    pub base: Revision,
    /// Remote head at the time of rejection.
    pub head: Revision,
    pub detected_at: DateTime<Utc>,
}

impl ConflictInfo {
    pub fn new(document: DocumentId, base: Revision, head: Revision) -> Self {
        Self {
            document,
            base,
            head,
            detected_at: Utc::now(),
        }
    }

    /// Build conflict info from a commit error, if it is a conflict.
    pub fn from_error(document: &DocumentId, err: &Error) -> Option<Self> {
        match err {
            Error::Conflict { base, head } => Some(Self::new(document.clone(), *base, *head)),
            _ => None,
        }
    }

    /// How many revisions the local copy is behind.
    pub fn revisions_behind(&self) -> i64 {
        ChangeHistory::revision_difference(self.head, self.base)
    }
}
