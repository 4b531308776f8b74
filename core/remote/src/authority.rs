//! Remote authority trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use revsync_changes::{ChangeHistory, ChangeSet, CommitMetadata};
use revsync_common::{Error, RemoteLocation, Result, Revision, UserId};

/// Push of locally accumulated changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub location: RemoteLocation,
    /// Revision the changes were made on top of.
    pub base_revision: Revision,
    pub changes: ChangeSet,
    pub metadata: CommitMetadata,
    pub acting_as: UserId,
}

/// Pull of everything committed after `from_revision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub location: RemoteLocation,
    pub from_revision: Revision,
    pub acting_as: UserId,
}

/// Permission level of an identity on one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Access {
    Read,
    Write,
}

/// The authoritative side of the revision protocol.
///
/// Implementations own transport, authentication and storage. They must
/// apply commits with single-writer discipline: a commit is accepted only
/// when its base revision equals the current head.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Get the authority name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Append a change set to a document's history.
    ///
    /// # Postconditions
    /// - On success the history head advanced by exactly one revision
    /// - Returns the slice from the base revision to the new head
    ///
    /// # Errors
    /// - `Conflict` if the base revision is behind the head
    /// - `Unauthorized` if the identity may not write
    /// - `NotFound` if the document does not exist
    /// - `InvalidInput` if the change set is empty
    /// - `Transport` if the authority is unreachable
    async fn commit(&self, request: CommitRequest) -> Result<ChangeHistory>;

    /// Fetch the history from a revision up to the current head.
    ///
    /// # Errors
    /// - `Range` if `from_revision` is beyond the head
    /// - `Unauthorized` if the identity may not read
    /// - `NotFound` if the document does not exist
    /// - `Transport` if the authority is unreachable
    async fn update(&self, request: UpdateRequest) -> Result<ChangeHistory>;

    /// Current head revision of a document.
    async fn head(&self, location: &RemoteLocation, acting_as: &UserId) -> Result<Revision>;
}

/// Check a commit against a history and append it.
///
/// Shared by the bundled authorities so they agree on conflict semantics.
pub(crate) fn accept_commit(
    history: &mut ChangeHistory,
    request: CommitRequest,
) -> Result<ChangeHistory> {
    let head = history.head();
    if request.base_revision != head {
        return Err(Error::Conflict {
            base: request.base_revision,
            head,
        });
    }
    if request.changes.is_empty() {
        return Err(Error::InvalidInput(format!(
            "Empty commit to {}",
            request.location
        )));
    }

    let revision = history.append(request.changes, request.metadata)?;
    history.crop(head, revision)
}

/// Slice of a history from `from` to its head.
pub(crate) fn slice_from(history: &ChangeHistory, from: Revision) -> Result<ChangeHistory> {
    history.crop(from, history.head())
}
