//! Versioned documents and their synchronization state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use revsync_changes::ChangeHistory;
use revsync_common::{DocumentId, Error, RemoteLocation, Result, Revision};

use crate::conflict::ConflictInfo;

/// Synchronization status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// No commit or update in flight.
    Idle,
    /// Local changes are being pushed.
    Committing,
    /// Remote changes are being pulled and replayed.
    Updating,
    /// Last commit was rejected; an update is required before committing.
    Conflict,
}

/// Locally persisted state of a document, owned by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document: DocumentId,
    pub remote: RemoteLocation,
    pub revision: Revision,
}

/// A local document bound to a remote location and a revision.
///
/// The current revision is the highest revision reflected in the local
/// document state and never decreases.
#[derive(Debug, Clone)]
pub struct VersionedDocument {
    id: DocumentId,
    remote: RemoteLocation,
    revision: Revision,
    /// Cached history from the revision the document was opened at.
    history: ChangeHistory,
    status: SyncStatus,
    conflict: Option<ConflictInfo>,
    auto_sync_disabled: bool,
    last_synced: Option<DateTime<Utc>>,
    failure_count: u32,
    last_error: Option<String>,
}

impl VersionedDocument {
    /// Bind a document to a remote location at revision 0.
    pub fn new(id: DocumentId, remote: RemoteLocation) -> Self {
        Self::at_revision(id, remote, Revision::ZERO)
    }

    /// Bind a document whose local state already reflects `revision`.
    pub fn at_revision(id: DocumentId, remote: RemoteLocation, revision: Revision) -> Self {
        Self {
            history: ChangeHistory::starting_at(remote.clone(), revision),
            id,
            remote,
            revision,
            status: SyncStatus::Idle,
            conflict: None,
            auto_sync_disabled: false,
            last_synced: None,
            failure_count: 0,
            last_error: None,
        }
    }

    pub fn from_record(record: &DocumentRecord) -> Self {
        Self::at_revision(
            record.document.clone(),
            record.remote.clone(),
            record.revision,
        )
    }

    pub fn to_record(&self) -> DocumentRecord {
        DocumentRecord {
            document: self.id.clone(),
            remote: self.remote.clone(),
            revision: self.revision,
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn remote(&self) -> &RemoteLocation {
        &self.remote
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn history(&self) -> &ChangeHistory {
        &self.history
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn conflict(&self) -> Option<&ConflictInfo> {
        self.conflict.as_ref()
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.last_synced
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Automatic sync is off after an authorization failure, until the
    /// document is reopened under another identity.
    pub fn is_auto_sync_disabled(&self) -> bool {
        self.auto_sync_disabled
    }

    pub fn disable_auto_sync(&mut self) {
        self.auto_sync_disabled = true;
    }

    /// Enter `Committing`.
    ///
    /// # Errors
    /// - `InvalidState` when in conflict (update first) or already busy
    pub fn begin_commit(&mut self) -> Result<()> {
        match self.status {
            SyncStatus::Idle => {
                self.status = SyncStatus::Committing;
                Ok(())
            }
            SyncStatus::Conflict => Err(Error::InvalidState(format!(
                "{} is in conflict at revision {}; update before committing",
                self.id, self.revision
            ))),
            busy => Err(Error::InvalidState(format!(
                "{} cannot commit while {:?}",
                self.id, busy
            ))),
        }
    }

    /// Enter `Updating`, from `Idle` or `Conflict`.
    pub fn begin_update(&mut self) -> Result<()> {
        match self.status {
            SyncStatus::Idle | SyncStatus::Conflict => {
                self.status = SyncStatus::Updating;
                Ok(())
            }
            busy => Err(Error::InvalidState(format!(
                "{} cannot update while {:?}",
                self.id, busy
            ))),
        }
    }

    /// Record an accepted commit and advance to the new head.
    pub fn complete_commit(&mut self, slice: &ChangeHistory) -> Result<Revision> {
        self.expect_status(SyncStatus::Committing)?;
        self.advance(slice)?;
        self.conflict = None;
        self.mark_success();
        Ok(self.revision)
    }

    /// Record a successful update and advance to the remote head.
    pub fn complete_update(&mut self, slice: &ChangeHistory) -> Result<Revision> {
        self.expect_status(SyncStatus::Updating)?;
        self.advance(slice)?;
        self.conflict = None;
        self.mark_success();
        Ok(self.revision)
    }

    /// Record a rejected commit. Local revision and contents are unchanged.
    pub fn mark_conflict(&mut self, conflict: ConflictInfo) -> Result<()> {
        self.expect_status(SyncStatus::Committing)?;
        self.status = SyncStatus::Conflict;
        self.last_error = Some(format!(
            "Base revision {} is behind remote head {}",
            conflict.base, conflict.head
        ));
        self.conflict = Some(conflict);
        Ok(())
    }

    /// Record a failed commit or update.
    ///
    /// A document that was in conflict stays in conflict.
    pub fn mark_failed(&mut self, error: &Error) {
        self.status = if self.conflict.is_some() {
            SyncStatus::Conflict
        } else {
            SyncStatus::Idle
        };
        self.failure_count += 1;
        self.last_error = Some(error.to_string());
        if error.is_unauthorized() {
            self.auto_sync_disabled = true;
        }
    }

    fn mark_success(&mut self) {
        self.status = SyncStatus::Idle;
        self.last_synced = Some(Utc::now());
        self.failure_count = 0;
        self.last_error = None;
    }

    fn expect_status(&self, expected: SyncStatus) -> Result<()> {
        if self.status != expected {
            return Err(Error::InvalidState(format!(
                "{} expected to be {:?} but is {:?}",
                self.id, expected, self.status
            )));
        }
        Ok(())
    }

    fn advance(&mut self, slice: &ChangeHistory) -> Result<()> {
        if slice.head() < self.revision {
            return Err(Error::InvalidState(format!(
                "Refusing to move {} back from revision {} to {}",
                self.id,
                self.revision,
                slice.head()
            )));
        }
        self.history.merge(slice)?;
        self.revision = slice.head();
        Ok(())
    }
}
