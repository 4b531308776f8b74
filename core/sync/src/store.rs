//! Local persistence of document revisions and unsent edits.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use revsync_changes::ChangeSet;
use revsync_common::{DocumentId, Result};

use crate::state::DocumentRecord;

const STATE_FILE: &str = "documents.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    documents: Vec<DocumentRecord>,
    #[serde(default)]
    pending: Vec<(DocumentId, ChangeSet)>,
}

/// Remembers, per document, the revision its local copy reflects and any
/// edits not yet committed, so a client can resume after a restart.
///
/// The whole state lives in one JSON file that is rewritten atomically on
/// every change.
#[derive(Debug)]
pub struct LocalStateStore {
    path: PathBuf,
    records: HashMap<DocumentId, DocumentRecord>,
    pending: HashMap<DocumentId, ChangeSet>,
}

impl LocalStateStore {
    /// Open the store in `dir`, creating the directory if needed.
    ///
    /// # Errors
    /// - Directory cannot be created
    /// - Existing state file is malformed
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let path = dir.join(STATE_FILE);

        let state: StateFile = if fs::try_exists(&path).await? {
            let content = fs::read_to_string(&path).await?;
            serde_json::from_str(&content)?
        } else {
            StateFile::default()
        };

        debug!(
            "Loaded {} document records from {}",
            state.documents.len(),
            path.display()
        );

        Ok(Self {
            path,
            records: state
                .documents
                .into_iter()
                .map(|record| (record.document.clone(), record))
                .collect(),
            pending: state.pending.into_iter().collect(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, document: &DocumentId) -> Option<&DocumentRecord> {
        self.records.get(document)
    }

    /// All records, sorted by document id.
    pub fn records(&self) -> Vec<&DocumentRecord> {
        let mut records: Vec<_> = self.records.values().collect();
        records.sort_by(|a, b| a.document.cmp(&b.document));
        records
    }

    /// Uncommitted edits saved for a document (empty if none).
    pub fn pending(&self, document: &DocumentId) -> ChangeSet {
        self.pending.get(document).cloned().unwrap_or_default()
    }

    pub async fn save_record(&mut self, record: DocumentRecord) -> Result<()> {
        self.records.insert(record.document.clone(), record);
        self.persist().await
    }

    /// Replace the saved uncommitted edits of a document.
    pub async fn save_pending(&mut self, document: &DocumentId, changes: ChangeSet) -> Result<()> {
        if changes.is_empty() {
            self.pending.remove(document);
        } else {
            self.pending.insert(document.clone(), changes);
        }
        self.persist().await
    }

    /// Forget a document entirely.
    pub async fn remove(&mut self, document: &DocumentId) -> Result<bool> {
        let existed = self.records.remove(document).is_some();
        self.pending.remove(document);
        self.persist().await?;
        Ok(existed)
    }

    async fn persist(&self) -> Result<()> {
        let mut pending: Vec<_> = self
            .pending
            .iter()
            .map(|(id, changes)| (id.clone(), changes.clone()))
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));

        let state = StateFile {
            documents: self.records().into_iter().cloned().collect(),
            pending,
        };
        let json = serde_json::to_string_pretty(&state)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
