//! Client session: identity, tracked documents and session events.

use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use revsync_common::{DocumentId, Error, Result, UserId};

use crate::editor::LocalEditor;
use crate::preferences::ServerPreferences;
use crate::state::{DocumentRecord, VersionedDocument};

const EVENT_CAPACITY: usize = 64;

/// Notifications published by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The active identity changed.
    SwitchClient { identity: UserId },
    /// The document receiving edits changed.
    SwitchOntology { document: DocumentId },
    /// Every tracked document was evicted.
    ClearSession,
    PreferencesChanged { auto_commit: bool, auto_update: bool },
}

/// Per-client context shared by the foreground, the sync engine and the
/// scheduler.
///
/// Holds the acting identity, the registry of versioned documents, the
/// local editor and the sync preferences. Pass it around as
/// `Arc<ClientSession>`.
pub struct ClientSession {
    identity: RwLock<UserId>,
    documents: RwLock<HashMap<DocumentId, VersionedDocument>>,
    active: RwLock<Option<DocumentId>>,
    editor: LocalEditor,
    preferences: ServerPreferences,
    events: broadcast::Sender<SessionEvent>,
}

impl ClientSession {
    pub fn new(identity: UserId, auto_commit: bool, auto_update: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            identity: RwLock::new(identity),
            documents: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
            editor: LocalEditor::new(),
            preferences: ServerPreferences::new(auto_commit, auto_update, events.clone()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn editor(&self) -> &LocalEditor {
        &self.editor
    }

    pub fn preferences(&self) -> &ServerPreferences {
        &self.preferences
    }

    pub async fn identity(&self) -> UserId {
        self.identity.read().await.clone()
    }

    /// Act as another identity.
    ///
    /// Every tracked document is evicted because permissions are per
    /// identity. The editor keeps only the active document and its undo
    /// history; the record of that document is returned so it can be
    /// tracked again under the new identity.
    pub async fn set_active_identity(
        &self,
        identity: UserId,
    ) -> Result<Option<DocumentRecord>> {
        let active = self.active.read().await.clone();
        let (evicted, kept) = {
            let mut documents = self.documents.write().await;
            let kept = active
                .as_ref()
                .and_then(|id| documents.get(id))
                .map(VersionedDocument::to_record);
            let count = documents.len();
            documents.clear();
            (count, kept)
        };

        self.editor.retain_only(active.as_ref())?;

        *self.identity.write().await = identity.clone();
        info!("Switched to identity {} ({} documents evicted)", identity, evicted);

        self.publish(SessionEvent::ClearSession);
        self.publish(SessionEvent::SwitchClient { identity });
        Ok(kept)
    }

    /// Start tracking a versioned document.
    ///
    /// # Errors
    /// - A document with the same id is already tracked
    pub async fn register_document(&self, document: VersionedDocument) -> Result<()> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(document.id()) {
            return Err(Error::AlreadyExists(format!(
                "Document {} is already tracked",
                document.id()
            )));
        }
        debug!(
            "Tracking {} at {} revision {}",
            document.id(),
            document.remote(),
            document.revision()
        );
        documents.insert(document.id().clone(), document);
        Ok(())
    }

    /// Snapshot of a tracked document.
    pub async fn lookup(&self, id: &DocumentId) -> Result<VersionedDocument> {
        self.documents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Document {} is not tracked", id)))
    }

    pub async fn is_tracked(&self, id: &DocumentId) -> bool {
        self.documents.read().await.contains_key(id)
    }

    /// Mutate a tracked document in place.
    pub async fn update_document<R>(
        &self,
        id: &DocumentId,
        f: impl FnOnce(&mut VersionedDocument) -> R,
    ) -> Result<R> {
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Document {} is not tracked", id)))?;
        Ok(f(document))
    }

    /// Stop tracking a document and close it in the editor.
    pub async fn close_document(&self, id: &DocumentId) -> Result<VersionedDocument> {
        let document = self
            .documents
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("Document {} is not tracked", id)))?;
        self.editor.close(id)?;

        let mut active = self.active.write().await;
        if active.as_ref() == Some(id) {
            *active = None;
        }
        Ok(document)
    }

    /// Ids of every tracked document, sorted.
    pub async fn document_ids(&self) -> Vec<DocumentId> {
        let mut ids: Vec<_> = self.documents.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Route edits, undo and redo to another document.
    pub async fn set_active_document(&self, id: &DocumentId) -> Result<()> {
        self.editor.activate(id)?;
        *self.active.write().await = Some(id.clone());
        self.publish(SessionEvent::SwitchOntology {
            document: id.clone(),
        });
        Ok(())
    }

    pub async fn active_document(&self) -> Option<DocumentId> {
        self.active.read().await.clone()
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revsync_changes::{ChangeOp, ChangeSet, Statement, StatementDocument};
    use revsync_common::RemoteLocation;

    fn doc_id(name: &str) -> DocumentId {
        DocumentId::new(name).unwrap()
    }

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    async fn session_with(ids: &[&str]) -> ClientSession {
        let session = ClientSession::new(user("alice"), false, false);
        for id in ids {
            session
                .editor()
                .open(doc_id(id), Box::new(StatementDocument::new()))
                .unwrap();
            session
                .register_document(VersionedDocument::new(
                    doc_id(id),
                    RemoteLocation::new(*id).unwrap(),
                ))
                .await
                .unwrap();
        }
        session
    }

    fn add(name: &str) -> ChangeSet {
        ChangeSet::from(vec![ChangeOp::Add(Statement::resource(
            name, "type", "Class",
        ))])
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let session = session_with(&["a"]).await;
        assert_eq!(session.lookup(&doc_id("a")).await.unwrap().id(), &doc_id("a"));
        assert!(matches!(
            session.lookup(&doc_id("b")).await,
            Err(Error::NotFound(_))
        ));

        let duplicate = VersionedDocument::new(doc_id("a"), RemoteLocation::new("a").unwrap());
        assert!(matches!(
            session.register_document(duplicate).await,
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_set_active_document_publishes() {
        let session = session_with(&["a", "b"]).await;
        let mut events = session.subscribe();

        session.set_active_document(&doc_id("b")).await.unwrap();
        assert_eq!(session.active_document().await, Some(doc_id("b")));
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::SwitchOntology {
                document: doc_id("b")
            }
        );
    }

    #[tokio::test]
    async fn test_identity_switch_evicts_documents() {
        let session = session_with(&["a", "b"]).await;
        session.set_active_document(&doc_id("a")).await.unwrap();
        session.editor().apply_edit(&add("A")).unwrap();
        let mut events = session.subscribe();

        let kept = session.set_active_identity(user("bob")).await.unwrap();

        assert_eq!(kept.map(|record| record.document), Some(doc_id("a")));
        assert_eq!(session.identity().await, user("bob"));
        assert!(session.document_ids().await.is_empty());
        assert!(matches!(
            session.lookup(&doc_id("a")).await,
            Err(Error::NotFound(_))
        ));
        assert!(session.editor().is_open(&doc_id("a")).unwrap());
        assert!(!session.editor().is_open(&doc_id("b")).unwrap());
        assert_eq!(session.editor().undo_len(&doc_id("a")).unwrap(), 1);

        assert_eq!(events.recv().await.unwrap(), SessionEvent::ClearSession);
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::SwitchClient {
                identity: user("bob")
            }
        );
    }

    #[tokio::test]
    async fn test_identity_switch_without_active_document() {
        let session = session_with(&["a"]).await;
        assert_eq!(session.set_active_identity(user("bob")).await.unwrap(), None);
        assert!(!session.editor().is_open(&doc_id("a")).unwrap());
    }

    #[tokio::test]
    async fn test_close_active_document() {
        let session = session_with(&["a"]).await;
        session.set_active_document(&doc_id("a")).await.unwrap();

        session.close_document(&doc_id("a")).await.unwrap();
        assert_eq!(session.active_document().await, None);
        assert!(!session.editor().is_open(&doc_id("a")).unwrap());
    }

    #[tokio::test]
    async fn test_update_document() {
        let session = session_with(&["a"]).await;
        session
            .update_document(&doc_id("a"), |doc| doc.disable_auto_sync())
            .await
            .unwrap();
        assert!(session
            .lookup(&doc_id("a"))
            .await
            .unwrap()
            .is_auto_sync_disabled());
    }
}
