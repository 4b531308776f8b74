//! Commit and update of versioned documents against a remote authority.

use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use revsync_changes::{ChangeHistory, ChangeSet, CommitMetadata, Document, StatementDocument};
use revsync_common::{DocumentId, Error, RemoteLocation, Result, Revision, UserId};
use revsync_remote::{CommitRequest, RemoteAuthority, UpdateRequest};

use crate::config::SyncConfig;
use crate::conflict::ConflictInfo;
use crate::editor::{DirectExecutor, MutationExecutor};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::session::ClientSession;
use crate::state::{DocumentRecord, VersionedDocument};
use crate::store::LocalStateStore;

/// What a commit or update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Local changes were accepted and produced `revision`.
    Committed { revision: Revision },
    /// There were no uncommitted changes.
    NothingToCommit,
    /// Remote changes from `from` to `to` were replayed.
    Updated {
        from: Revision,
        to: Revision,
        applied: usize,
    },
    /// The document already was at the remote head.
    UpToDate,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Committed { revision } => write!(f, "committed revision {}", revision),
            SyncOutcome::NothingToCommit => write!(f, "nothing to commit"),
            SyncOutcome::Updated { from, to, applied } => {
                write!(f, "updated {} -> {} ({} changes)", from, to, applied)
            }
            SyncOutcome::UpToDate => write!(f, "up to date"),
        }
    }
}

/// Moves changes between the local editor and the remote authority.
///
/// The engine holds no lock across a remote request: it snapshots what it
/// needs from the session, talks to the authority, then records the
/// result. Foreground editing continues meanwhile.
pub struct SyncEngine<A: RemoteAuthority + ?Sized> {
    authority: Arc<A>,
    session: Arc<ClientSession>,
    executor: Arc<dyn MutationExecutor>,
    retry_executor: RetryExecutor,
    store: Option<Arc<Mutex<LocalStateStore>>>,
}

impl<A: RemoteAuthority + ?Sized> SyncEngine<A> {
    /// Create an engine that replays remote changes on the calling task.
    pub fn new(authority: Arc<A>, session: Arc<ClientSession>, config: &SyncConfig) -> Self {
        Self {
            authority,
            session,
            executor: Arc::new(DirectExecutor),
            retry_executor: RetryExecutor::new(RetryConfig::new(config.max_retries)),
            store: None,
        }
    }

    /// Replay remote changes through `executor` instead.
    pub fn with_executor(mut self, executor: Arc<dyn MutationExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Persist revisions and unsent edits to `store`.
    pub fn with_store(mut self, store: Arc<Mutex<LocalStateStore>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry_executor = RetryExecutor::new(config);
        self
    }

    pub fn authority(&self) -> &Arc<A> {
        &self.authority
    }

    pub fn session(&self) -> &Arc<ClientSession> {
        &self.session
    }

    /// Start tracking a document whose contents reflect `revision`.
    ///
    /// # Errors
    /// - The id is already open or tracked
    pub async fn open_document(
        &self,
        id: DocumentId,
        remote: RemoteLocation,
        document: Box<dyn Document>,
        revision: Revision,
    ) -> Result<()> {
        self.session.editor().open(id.clone(), document)?;
        let versioned = VersionedDocument::at_revision(id.clone(), remote, revision);
        if let Err(err) = self.session.register_document(versioned).await {
            self.session.editor().close(&id)?;
            return Err(err);
        }
        Ok(())
    }

    /// Track a document that is still open in the editor, such as the one
    /// kept across an identity switch. Contents and undo history are left
    /// as they are.
    ///
    /// # Errors
    /// - `NotFound` if the document is not open
    /// - `AlreadyExists` if it is already tracked
    pub async fn rebind(&self, record: DocumentRecord) -> Result<()> {
        if !self.session.editor().is_open(&record.document)? {
            return Err(Error::NotFound(format!(
                "Document {} is not open",
                record.document
            )));
        }
        info!(
            "Tracking {} again at revision {}",
            record.document, record.revision
        );
        self.session
            .register_document(VersionedDocument::from_record(&record))
            .await
    }

    /// Open a remote document from scratch and bring it to the head.
    ///
    /// Edits saved in the local store are replayed on top and become the
    /// active document's uncommitted changes. Nothing stays open if the
    /// first update fails.
    pub async fn checkout(&self, id: DocumentId, remote: RemoteLocation) -> Result<SyncOutcome> {
        self.open_document(
            id.clone(),
            remote,
            Box::new(StatementDocument::new()),
            Revision::ZERO,
        )
        .await?;

        let outcome = match self.update(&id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("Checkout of {} failed: {}", id, err);
                if let Err(close) = self.session.close_document(&id).await {
                    debug!("Could not close {} after failed checkout: {}", id, close);
                }
                return Err(err);
            }
        };
        self.session.set_active_document(&id).await?;

        let pending = match &self.store {
            Some(store) => store.lock().await.pending(&id),
            None => ChangeSet::new(),
        };
        if !pending.is_empty() {
            info!("Restoring {} unsent changes to {}", pending.len(), id);
            self.session.editor().apply_edit(&pending)?;
        }
        Ok(outcome)
    }

    /// Stop tracking a document, saving its unsent edits first.
    pub async fn close_document(&self, id: &DocumentId) -> Result<VersionedDocument> {
        self.persist(id).await?;
        self.session.close_document(id).await
    }

    /// Push the uncommitted changes of a document.
    ///
    /// # Errors
    /// - `Conflict` if the remote head moved; the document then needs an
    ///   update before it can commit again
    /// - `InvalidState` if the document is in conflict or busy
    /// - `InvalidInput` if the authority answered with a slice that does
    ///   not continue the local history
    /// - `Unauthorized` or `Transport` from the authority
    pub async fn commit(&self, id: &DocumentId, comment: &str) -> Result<SyncOutcome> {
        let snapshot = self.session.editor().snapshot(id)?;
        if snapshot.changes.is_empty() {
            debug!("Nothing to commit for {}", id);
            return Ok(SyncOutcome::NothingToCommit);
        }

        let (remote, base) = self
            .session
            .update_document(id, |doc| {
                doc.begin_commit()?;
                Ok::<_, Error>((doc.remote().clone(), doc.revision()))
            })
            .await??;

        let identity = self.session.identity().await;
        info!(
            "Committing {} changes to {} on top of revision {}",
            snapshot.changes.len(),
            remote,
            base
        );

        let request = CommitRequest {
            location: remote.clone(),
            base_revision: base,
            changes: snapshot.changes.clone(),
            metadata: CommitMetadata::new(identity.clone(), comment),
            acting_as: identity,
        };

        // Never retried: a lost answer to an accepted commit would apply it twice.
        let slice = match self.authority.commit(request).await {
            Ok(slice) => slice,
            Err(err) => {
                match ConflictInfo::from_error(id, &err) {
                    Some(conflict) => {
                        warn!(
                            "Commit of {} rejected: {} revisions behind",
                            id,
                            conflict.revisions_behind()
                        );
                        let marked = self
                            .session
                            .update_document(id, |doc| doc.mark_conflict(conflict))
                            .await
                            .and_then(|marked| marked);
                        if let Err(state) = marked {
                            debug!("Could not record conflict of {}: {}", id, state);
                        }
                    }
                    None => self.record_failure(id, &err).await,
                }
                return Err(err);
            }
        };

        let revision = match self.complete_commit(id, &remote, base, &slice).await {
            Ok(revision) => revision,
            Err(err) => {
                self.record_failure(id, &err).await;
                return Err(err);
            }
        };

        match self.session.editor().clear_committed(id, &snapshot) {
            Ok(requeued) if !requeued.is_empty() => info!(
                "{} changes undone while committing {} stay uncommitted",
                requeued.len(),
                id
            ),
            Ok(_) => {}
            Err(err) => warn!("Could not clear committed edits of {}: {}", id, err),
        }
        self.persist_after_sync(id).await;
        info!("Committed {} as revision {}", id, revision);
        Ok(SyncOutcome::Committed { revision })
    }

    async fn complete_commit(
        &self,
        id: &DocumentId,
        remote: &RemoteLocation,
        base: Revision,
        slice: &ChangeHistory,
    ) -> Result<Revision> {
        check_slice(slice, remote, base)?;
        if slice.head() <= base {
            return Err(Error::InvalidInput(format!(
                "Accepted commit of {} did not advance revision {}",
                id, base
            )));
        }
        self.session
            .update_document(id, |doc| doc.complete_commit(slice))
            .await?
    }

    /// Pull and replay everything committed after the local revision.
    ///
    /// Uncommitted local edits stay uncommitted. This is also the way out
    /// of a conflict.
    pub async fn update(&self, id: &DocumentId) -> Result<SyncOutcome> {
        let (remote, from) = self
            .session
            .update_document(id, |doc| {
                doc.begin_update()?;
                Ok::<_, Error>((doc.remote().clone(), doc.revision()))
            })
            .await??;
        let identity = self.session.identity().await;

        match self.pull(id, &remote, from, &identity).await {
            Ok((to, _)) if to == from => {
                debug!("{} is up to date at revision {}", id, to);
                Ok(SyncOutcome::UpToDate)
            }
            Ok((to, applied)) => {
                self.persist_after_sync(id).await;
                info!("Updated {} from revision {} to {}", id, from, to);
                Ok(SyncOutcome::Updated { from, to, applied })
            }
            Err(err) => {
                self.record_failure(id, &err).await;
                Err(err)
            }
        }
    }

    /// Fetch the remote changes after `from`, replay them and advance.
    ///
    /// The slice is checked before anything is replayed.
    async fn pull(
        &self,
        id: &DocumentId,
        remote: &RemoteLocation,
        from: Revision,
        identity: &UserId,
    ) -> Result<(Revision, usize)> {
        let slice = self
            .retry_executor
            .execute(|| {
                self.authority.update(UpdateRequest {
                    location: remote.clone(),
                    from_revision: from,
                    acting_as: identity.clone(),
                })
            })
            .await?;
        check_slice(&slice, remote, from)?;

        let mut applied = 0;
        if !slice.is_empty() {
            let changes = ChangeSet::concat(slice.entries().iter().map(|entry| &entry.changes));
            debug!(
                "Replaying {} changes from {} revisions into {}",
                changes.len(),
                slice.len(),
                id
            );
            applied = self
                .executor
                .apply_remote(self.session.editor(), id, changes)
                .await?
                .len();
        }

        let to = self
            .session
            .update_document(id, |doc| doc.complete_update(&slice))
            .await??;
        Ok((to, applied))
    }

    /// Return a busy document to rest after a failed commit or update.
    async fn record_failure(&self, id: &DocumentId, err: &Error) {
        if let Err(state) = self
            .session
            .update_document(id, |doc| doc.mark_failed(err))
            .await
        {
            debug!("Could not record failure of {}: {}", id, state);
        }
    }

    /// Persist after the authority already applied a sync. A failure is
    /// logged, not returned.
    async fn persist_after_sync(&self, id: &DocumentId) {
        if let Err(err) = self.persist(id).await {
            warn!("Could not save local state of {}: {}", id, err);
        }
    }

    /// Current remote head of a document.
    pub async fn remote_head(&self, id: &DocumentId) -> Result<Revision> {
        let document = self.session.lookup(id).await?;
        let identity = self.session.identity().await;
        self.retry_executor
            .execute(|| self.authority.head(document.remote(), &identity))
            .await
    }

    /// How many revisions the local copy trails the remote head.
    pub async fn revisions_behind(&self, id: &DocumentId) -> Result<i64> {
        let local = self.session.lookup(id).await?.revision();
        let head = self.remote_head(id).await?;
        Ok(ChangeHistory::revision_difference(head, local))
    }

    /// Save the revision and unsent edits of a document, if a store is set.
    pub async fn persist(&self, id: &DocumentId) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let record = self.session.lookup(id).await?.to_record();
        let pending = self.session.editor().uncommitted(id)?;

        let mut store = store.lock().await;
        store.save_record(record).await?;
        store.save_pending(id, pending).await
    }
}

/// Reject a slice that does not continue the local history at `from`.
fn check_slice(slice: &ChangeHistory, remote: &RemoteLocation, from: Revision) -> Result<()> {
    if slice.location() != remote {
        return Err(Error::InvalidInput(format!(
            "Authority answered for {} instead of {}",
            slice.location(),
            remote
        )));
    }
    if slice.start() != from {
        return Err(Error::InvalidInput(format!(
            "Authority answered from revision {} instead of {}",
            slice.start(),
            from
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use revsync_changes::{ChangeOp, Statement};
    use revsync_remote::{Access, MemoryAuthority};
    use tempfile::TempDir;

    use crate::state::SyncStatus;

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    fn doc_id(name: &str) -> DocumentId {
        DocumentId::new(name).unwrap()
    }

    fn location() -> RemoteLocation {
        RemoteLocation::new("pizza.owl").unwrap()
    }

    fn add(subject: &str) -> ChangeSet {
        ChangeSet::from(vec![ChangeOp::Add(Statement::resource(
            subject,
            "subClassOf",
            "Pizza",
        ))])
    }

    fn quick_retry() -> RetryConfig {
        RetryConfig::new(2)
            .with_initial_delay(std::time::Duration::from_millis(1))
            .with_jitter(false)
    }

    async fn client(
        authority: &Arc<MemoryAuthority>,
        name: &str,
        document: &str,
    ) -> SyncEngine<MemoryAuthority> {
        let session = Arc::new(ClientSession::new(user(name), false, false));
        let engine = SyncEngine::new(authority.clone(), session, &SyncConfig::default())
            .with_retry(quick_retry());
        engine.checkout(doc_id(document), location()).await.unwrap();
        engine
    }

    fn shared_authority() -> Arc<MemoryAuthority> {
        let authority = Arc::new(MemoryAuthority::new());
        authority.create_document(location()).unwrap();
        authority
    }

    #[tokio::test]
    async fn test_commit_advances_revision() {
        let authority = shared_authority();
        let engine = client(&authority, "alice", "pizza").await;
        let editor = engine.session().editor();

        editor.apply_edit(&add("Margherita")).unwrap();
        editor.apply_edit(&add("Funghi")).unwrap();

        let outcome = engine.commit(&doc_id("pizza"), "two pizzas").await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Committed {
                revision: Revision::new(1)
            }
        );
        assert!(editor.uncommitted(&doc_id("pizza")).unwrap().is_empty());

        let doc = engine.session().lookup(&doc_id("pizza")).await.unwrap();
        assert_eq!(doc.revision(), Revision::new(1));
        assert_eq!(doc.status(), SyncStatus::Idle);
        assert_eq!(doc.history().head(), Revision::new(1));

        let remote = authority.history(&location()).unwrap();
        assert_eq!(remote.get(Revision::new(1)).unwrap().metadata.comment(), "two pizzas");
    }

    #[tokio::test]
    async fn test_nothing_to_commit() {
        let authority = shared_authority();
        let engine = client(&authority, "alice", "pizza").await;

        assert_eq!(
            engine.commit(&doc_id("pizza"), "empty").await.unwrap(),
            SyncOutcome::NothingToCommit
        );
        assert_eq!(authority.commit_requests(), 0);
    }

    #[tokio::test]
    async fn test_stale_commit_conflicts_until_update() {
        let authority = shared_authority();
        let alice = client(&authority, "alice", "pizza").await;
        let bob = client(&authority, "bob", "pizza").await;

        alice.session().editor().apply_edit(&add("Margherita")).unwrap();
        alice.commit(&doc_id("pizza"), "alice").await.unwrap();

        bob.session().editor().apply_edit(&add("Funghi")).unwrap();
        let before = bob.session().editor().contents(&doc_id("pizza")).unwrap();
        let err = bob.commit(&doc_id("pizza"), "bob").await.unwrap_err();
        assert!(err.is_conflict());

        let doc = bob.session().lookup(&doc_id("pizza")).await.unwrap();
        assert_eq!(doc.status(), SyncStatus::Conflict);
        assert_eq!(doc.revision(), Revision::ZERO);
        assert_eq!(bob.session().editor().contents(&doc_id("pizza")).unwrap(), before);
        assert_eq!(
            bob.session().editor().uncommitted(&doc_id("pizza")).unwrap(),
            add("Funghi")
        );

        // Commit stays blocked until an update.
        assert!(matches!(
            bob.commit(&doc_id("pizza"), "again").await,
            Err(Error::InvalidState(_))
        ));

        let outcome = bob.update(&doc_id("pizza")).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Updated {
                from: Revision::ZERO,
                to: Revision::new(1),
                applied: 1
            }
        );
        assert_eq!(
            bob.session().editor().uncommitted(&doc_id("pizza")).unwrap(),
            add("Funghi")
        );
        assert_eq!(
            bob.commit(&doc_id("pizza"), "bob").await.unwrap(),
            SyncOutcome::Committed {
                revision: Revision::new(2)
            }
        );
    }

    #[tokio::test]
    async fn test_update_up_to_date() {
        let authority = shared_authority();
        let engine = client(&authority, "alice", "pizza").await;
        assert_eq!(
            engine.update(&doc_id("pizza")).await.unwrap(),
            SyncOutcome::UpToDate
        );
    }

    #[tokio::test]
    async fn test_update_retries_transport_errors_then_fails() {
        let authority = shared_authority();
        let engine = client(&authority, "alice", "pizza").await;
        let before = authority.update_requests();

        authority.set_available(false);
        let err = engine.update(&doc_id("pizza")).await.unwrap_err();
        assert!(err.is_retryable());
        // Initial attempt plus two retries.
        assert_eq!(authority.update_requests() - before, 3);

        let doc = engine.session().lookup(&doc_id("pizza")).await.unwrap();
        assert_eq!(doc.status(), SyncStatus::Idle);
        assert_eq!(doc.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_transport_error_is_not_retried() {
        let authority = shared_authority();
        let engine = client(&authority, "alice", "pizza").await;
        engine.session().editor().apply_edit(&add("Margherita")).unwrap();

        authority.set_available(false);
        assert!(engine.commit(&doc_id("pizza"), "offline").await.is_err());
        assert_eq!(authority.commit_requests(), 1);
        assert!(engine
            .session()
            .editor()
            .has_uncommitted(&doc_id("pizza"))
            .unwrap());
    }

    #[tokio::test]
    async fn test_unauthorized_disables_auto_sync() {
        let authority = shared_authority();
        authority
            .grant(&location(), user("alice"), Access::Write)
            .unwrap();
        authority
            .grant(&location(), user("guest"), Access::Read)
            .unwrap();

        let engine = client(&authority, "guest", "pizza").await;
        engine.session().editor().apply_edit(&add("Margherita")).unwrap();

        let err = engine.commit(&doc_id("pizza"), "nope").await.unwrap_err();
        assert!(err.is_unauthorized());
        let doc = engine.session().lookup(&doc_id("pizza")).await.unwrap();
        assert!(doc.is_auto_sync_disabled());
        assert_eq!(doc.status(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_revisions_behind() {
        let authority = shared_authority();
        let alice = client(&authority, "alice", "pizza").await;
        let bob = client(&authority, "bob", "pizza").await;

        for name in ["A", "B"] {
            alice.session().editor().apply_edit(&add(name)).unwrap();
            alice.commit(&doc_id("pizza"), name).await.unwrap();
        }

        assert_eq!(bob.revisions_behind(&doc_id("pizza")).await.unwrap(), 2);
        assert_eq!(alice.revisions_behind(&doc_id("pizza")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_restores_pending_edits() {
        let temp = TempDir::new().unwrap();
        let authority = shared_authority();
        let store = Arc::new(Mutex::new(
            LocalStateStore::open(temp.path()).await.unwrap(),
        ));

        {
            let session = Arc::new(ClientSession::new(user("alice"), false, false));
            let engine = SyncEngine::new(authority.clone(), session, &SyncConfig::default())
                .with_store(store.clone());
            engine.checkout(doc_id("pizza"), location()).await.unwrap();
            engine.session().editor().apply_edit(&add("Margherita")).unwrap();
            engine.close_document(&doc_id("pizza")).await.unwrap();
        }

        let session = Arc::new(ClientSession::new(user("alice"), false, false));
        let engine = SyncEngine::new(authority.clone(), session, &SyncConfig::default())
            .with_store(store.clone());
        engine.checkout(doc_id("pizza"), location()).await.unwrap();

        assert_eq!(
            engine.session().editor().uncommitted(&doc_id("pizza")).unwrap(),
            add("Margherita")
        );
    }

    #[tokio::test]
    async fn test_failed_checkout_can_be_retried() {
        let authority = shared_authority();
        let session = Arc::new(ClientSession::new(user("alice"), false, false));
        let engine = SyncEngine::new(authority.clone(), session, &SyncConfig::default())
            .with_retry(quick_retry());

        authority.set_available(false);
        let err = engine
            .checkout(doc_id("pizza"), location())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!engine.session().is_tracked(&doc_id("pizza")).await);
        assert!(!engine.session().editor().is_open(&doc_id("pizza")).unwrap());

        authority.set_available(true);
        assert_eq!(
            engine.checkout(doc_id("pizza"), location()).await.unwrap(),
            SyncOutcome::UpToDate
        );
    }

    #[tokio::test]
    async fn test_store_failure_does_not_fail_commit() {
        let temp = TempDir::new().unwrap();
        let state_dir = temp.path().join("state");
        let authority = shared_authority();
        let store = Arc::new(Mutex::new(LocalStateStore::open(&state_dir).await.unwrap()));
        let session = Arc::new(ClientSession::new(user("alice"), false, false));
        let engine = SyncEngine::new(authority.clone(), session, &SyncConfig::default())
            .with_store(store);
        engine.checkout(doc_id("pizza"), location()).await.unwrap();
        engine.session().editor().apply_edit(&add("Margherita")).unwrap();

        std::fs::remove_dir_all(&state_dir).unwrap();
        assert!(engine.persist(&doc_id("pizza")).await.is_err());

        assert_eq!(
            engine.commit(&doc_id("pizza"), "landed").await.unwrap(),
            SyncOutcome::Committed {
                revision: Revision::new(1)
            }
        );
        assert_eq!(authority.history(&location()).unwrap().head(), Revision::new(1));
    }

    #[tokio::test]
    async fn test_rebind_requires_open_document() {
        let authority = shared_authority();
        let engine = client(&authority, "alice", "pizza").await;
        let record = engine.session().lookup(&doc_id("pizza")).await.unwrap().to_record();

        assert!(matches!(
            engine.rebind(record.clone()).await,
            Err(Error::AlreadyExists(_))
        ));

        let missing = DocumentRecord {
            document: doc_id("missing"),
            ..record
        };
        assert!(matches!(
            engine.rebind(missing).await,
            Err(Error::NotFound(_))
        ));
    }

    /// Sends every request to another document than the one asked for.
    struct MisroutedAuthority {
        inner: MemoryAuthority,
        target: RemoteLocation,
    }

    #[async_trait::async_trait]
    impl RemoteAuthority for MisroutedAuthority {
        fn name(&self) -> &str {
            "misrouted"
        }

        async fn commit(&self, mut request: CommitRequest) -> Result<ChangeHistory> {
            request.location = self.target.clone();
            self.inner.commit(request).await
        }

        async fn update(&self, mut request: UpdateRequest) -> Result<ChangeHistory> {
            request.location = self.target.clone();
            self.inner.update(request).await
        }

        async fn head(&self, _location: &RemoteLocation, acting_as: &UserId) -> Result<Revision> {
            self.inner.head(&self.target, acting_as).await
        }
    }

    async fn misrouted_engine(target_revisions: usize) -> SyncEngine<MisroutedAuthority> {
        let target = RemoteLocation::new("other.owl").unwrap();
        let inner = MemoryAuthority::new();
        inner.create_document(target.clone()).unwrap();
        for revision in 0..target_revisions {
            inner
                .commit(CommitRequest {
                    location: target.clone(),
                    base_revision: Revision::new(revision as u64),
                    changes: add("Other"),
                    metadata: CommitMetadata::new(user("carol"), "other"),
                    acting_as: user("carol"),
                })
                .await
                .unwrap();
        }

        let session = Arc::new(ClientSession::new(user("alice"), false, false));
        let authority = Arc::new(MisroutedAuthority { inner, target });
        let engine = SyncEngine::new(authority, session, &SyncConfig::default())
            .with_retry(quick_retry());
        engine
            .open_document(
                doc_id("pizza"),
                location(),
                Box::new(StatementDocument::new()),
                Revision::ZERO,
            )
            .await
            .unwrap();
        engine.session().set_active_document(&doc_id("pizza")).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_foreign_update_is_rejected_before_replay() {
        let engine = misrouted_engine(1).await;

        for _ in 0..2 {
            let err = engine.update(&doc_id("pizza")).await.unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)));

            let doc = engine.session().lookup(&doc_id("pizza")).await.unwrap();
            assert_eq!(doc.status(), SyncStatus::Idle);
            assert_eq!(doc.revision(), Revision::ZERO);
            assert!(engine
                .session()
                .editor()
                .contents(&doc_id("pizza"))
                .unwrap()
                .is_empty());
        }
    }

    #[tokio::test]
    async fn test_foreign_commit_answer_leaves_document_usable() {
        let engine = misrouted_engine(0).await;
        engine.session().editor().apply_edit(&add("Margherita")).unwrap();

        let err = engine.commit(&doc_id("pizza"), "lost").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let doc = engine.session().lookup(&doc_id("pizza")).await.unwrap();
        assert_eq!(doc.status(), SyncStatus::Idle);
        assert_eq!(doc.revision(), Revision::ZERO);
        assert_eq!(doc.failure_count(), 1);
        assert_eq!(
            engine.session().editor().uncommitted(&doc_id("pizza")).unwrap(),
            add("Margherita")
        );
    }

    #[tokio::test]
    async fn test_open_twice_fails() {
        let authority = shared_authority();
        let engine = client(&authority, "alice", "pizza").await;
        let result = engine
            .open_document(
                doc_id("pizza"),
                location(),
                Box::new(StatementDocument::new()),
                Revision::ZERO,
            )
            .await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
        assert!(engine.session().editor().is_open(&doc_id("pizza")).unwrap());
    }
}
