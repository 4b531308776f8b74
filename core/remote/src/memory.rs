//! In-memory remote authority for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use revsync_changes::ChangeHistory;
use revsync_common::{Error, RemoteLocation, Result, Revision, UserId};

use crate::authority::{accept_commit, slice_from, Access, CommitRequest, RemoteAuthority, UpdateRequest};

/// Authoritative copy of one document.
#[derive(Debug, Clone)]
struct RemoteDocument {
    history: ChangeHistory,
    /// `None` means open to every identity.
    acl: Option<HashMap<UserId, Access>>,
}

impl RemoteDocument {
    fn check_access(&self, user: &UserId, needed: Access) -> Result<()> {
        let Some(acl) = &self.acl else {
            return Ok(());
        };
        match acl.get(user) {
            Some(granted) if *granted >= needed => Ok(()),
            _ => Err(Error::Unauthorized(format!(
                "{} lacks {:?} access to {}",
                user,
                needed,
                self.history.location()
            ))),
        }
    }
}

/// In-memory remote authority.
///
/// Useful for testing and development. All histories are stored in memory
/// and lost on drop. Availability can be toggled to simulate an unreachable
/// server.
pub struct MemoryAuthority {
    documents: RwLock<HashMap<RemoteLocation, RemoteDocument>>,
    available: AtomicBool,
    commit_requests: AtomicUsize,
    update_requests: AtomicUsize,
}

impl MemoryAuthority {
    /// Create a new authority holding no documents.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            commit_requests: AtomicUsize::new(0),
            update_requests: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<RemoteLocation, RemoteDocument>>> {
        self.documents
            .read()
            .map_err(|_| Error::InvalidState("Memory authority lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<RemoteLocation, RemoteDocument>>> {
        self.documents
            .write()
            .map_err(|_| Error::InvalidState("Memory authority lock poisoned".to_string()))
    }

    /// Create an empty document open to every identity.
    ///
    /// # Errors
    /// - Document already exists
    pub fn create_document(&self, location: RemoteLocation) -> Result<()> {
        let mut documents = self.write()?;
        if documents.contains_key(&location) {
            return Err(Error::AlreadyExists(format!("Document {}", location)));
        }
        documents.insert(
            location.clone(),
            RemoteDocument {
                history: ChangeHistory::new(location),
                acl: None,
            },
        );
        Ok(())
    }

    /// Restrict a document to the identities granted through this call.
    pub fn grant(&self, location: &RemoteLocation, user: UserId, access: Access) -> Result<()> {
        let mut documents = self.write()?;
        let document = documents
            .get_mut(location)
            .ok_or_else(|| Error::NotFound(format!("Document {}", location)))?;
        document.acl.get_or_insert_with(HashMap::new).insert(user, access);
        Ok(())
    }

    /// Simulate the authority going offline or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Full history of a document, bypassing permissions.
    pub fn history(&self, location: &RemoteLocation) -> Result<ChangeHistory> {
        let documents = self.read()?;
        documents
            .get(location)
            .map(|document| document.history.clone())
            .ok_or_else(|| Error::NotFound(format!("Document {}", location)))
    }

    /// Number of commit requests received so far.
    pub fn commit_requests(&self) -> usize {
        self.commit_requests.load(Ordering::SeqCst)
    }

    /// Number of update requests received so far.
    pub fn update_requests(&self) -> usize {
        self.update_requests.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Transport("Memory authority is offline".to_string()))
        }
    }
}

impl Default for MemoryAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteAuthority for MemoryAuthority {
    fn name(&self) -> &str {
        "memory"
    }

    async fn commit(&self, request: CommitRequest) -> Result<ChangeHistory> {
        self.commit_requests.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let mut documents = self.write()?;
        let document = documents
            .get_mut(&request.location)
            .ok_or_else(|| Error::NotFound(format!("Document {}", request.location)))?;
        document.check_access(&request.acting_as, Access::Write)?;

        debug!(
            "Commit to {} on base {} by {}",
            request.location, request.base_revision, request.acting_as
        );
        accept_commit(&mut document.history, request)
    }

    async fn update(&self, request: UpdateRequest) -> Result<ChangeHistory> {
        self.update_requests.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let documents = self.read()?;
        let document = documents
            .get(&request.location)
            .ok_or_else(|| Error::NotFound(format!("Document {}", request.location)))?;
        document.check_access(&request.acting_as, Access::Read)?;

        slice_from(&document.history, request.from_revision)
    }

    async fn head(&self, location: &RemoteLocation, acting_as: &UserId) -> Result<Revision> {
        self.ensure_available()?;

        let documents = self.read()?;
        let document = documents
            .get(location)
            .ok_or_else(|| Error::NotFound(format!("Document {}", location)))?;
        document.check_access(acting_as, Access::Read)?;
        Ok(document.history.head())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revsync_changes::{ChangeOp, ChangeSet, CommitMetadata, Statement};

    fn location() -> RemoteLocation {
        RemoteLocation::new("pizza").unwrap()
    }

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    fn commit(base: u64, by: &str) -> CommitRequest {
        CommitRequest {
            location: location(),
            base_revision: Revision::new(base),
            changes: ChangeSet::from(vec![ChangeOp::Add(Statement::resource(
                format!("P{}", base),
                "subClassOf",
                "Pizza",
            ))]),
            metadata: CommitMetadata::new(user(by), "test"),
            acting_as: user(by),
        }
    }

    fn update(from: u64, by: &str) -> UpdateRequest {
        UpdateRequest {
            location: location(),
            from_revision: Revision::new(from),
            acting_as: user(by),
        }
    }

    #[tokio::test]
    async fn test_commit_and_update() {
        let authority = MemoryAuthority::new();
        authority.create_document(location()).unwrap();

        authority.commit(commit(0, "alice")).await.unwrap();
        authority.commit(commit(1, "alice")).await.unwrap();

        let slice = authority.update(update(1, "bob")).await.unwrap();
        assert_eq!(slice.start(), Revision::new(1));
        assert_eq!(slice.head(), Revision::new(2));
        assert_eq!(
            authority.head(&location(), &user("bob")).await.unwrap(),
            Revision::new(2)
        );
        assert_eq!(authority.commit_requests(), 2);
        assert_eq!(authority.update_requests(), 1);
    }

    #[tokio::test]
    async fn test_stale_commit_conflicts() {
        let authority = MemoryAuthority::new();
        authority.create_document(location()).unwrap();
        authority.commit(commit(0, "alice")).await.unwrap();

        let result = authority.commit(commit(0, "bob")).await;
        assert!(matches!(result, Err(Error::Conflict { .. })));
        assert_eq!(authority.history(&location()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_beyond_head_is_range_error() {
        let authority = MemoryAuthority::new();
        authority.create_document(location()).unwrap();
        assert!(matches!(
            authority.update(update(3, "alice")).await,
            Err(Error::Range(_))
        ));
    }

    #[tokio::test]
    async fn test_permissions() {
        let authority = MemoryAuthority::new();
        authority.create_document(location()).unwrap();
        authority.grant(&location(), user("alice"), Access::Write).unwrap();
        authority.grant(&location(), user("bob"), Access::Read).unwrap();

        assert!(authority.commit(commit(0, "alice")).await.is_ok());
        assert!(matches!(
            authority.commit(commit(1, "bob")).await,
            Err(Error::Unauthorized(_))
        ));
        assert!(authority.update(update(0, "bob")).await.is_ok());
        assert!(matches!(
            authority.update(update(0, "mallory")).await,
            Err(Error::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_is_transport_error() {
        let authority = MemoryAuthority::new();
        authority.create_document(location()).unwrap();
        authority.set_available(false);

        let err = authority.update(update(0, "alice")).await.unwrap_err();
        assert!(err.is_retryable());

        authority.set_available(true);
        assert!(authority.update(update(0, "alice")).await.is_ok());
    }

    #[test]
    fn test_duplicate_document_fails() {
        let authority = MemoryAuthority::new();
        authority.create_document(location()).unwrap();
        assert!(matches!(
            authority.create_document(location()),
            Err(Error::AlreadyExists(_))
        ));
    }
}
