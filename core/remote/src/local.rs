//! File-backed remote authority.

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use revsync_changes::ChangeHistory;
use revsync_common::{Error, RemoteLocation, Result, Revision, UserId};

use crate::authority::{accept_commit, slice_from, CommitRequest, RemoteAuthority, UpdateRequest};

const HISTORY_SUFFIX: &str = ".history.json";

/// Remote authority that keeps every document's history as a JSON file in
/// a local directory.
///
/// Serves as a shared repository for clients on the same machine. There is
/// no access control: every identity may read and write.
pub struct LocalAuthority {
    root: PathBuf,
    /// Serializes read-modify-write cycles on history files.
    write_lock: Mutex<()>,
}

impl LocalAuthority {
    /// Create a new local authority with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn history_path(&self, location: &RemoteLocation) -> PathBuf {
        let encoded = utf8_percent_encode(location.as_str(), NON_ALPHANUMERIC);
        self.root.join(format!("{}{}", encoded, HISTORY_SUFFIX))
    }

    /// Create an empty document.
    ///
    /// # Errors
    /// - Document already exists
    pub async fn create_document(&self, location: RemoteLocation) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.history_path(&location);
        if fs::try_exists(&path).await? {
            return Err(Error::AlreadyExists(format!("Document {}", location)));
        }

        self.store(&ChangeHistory::new(location.clone())).await?;
        info!("Created document {} at {:?}", location, path);
        Ok(())
    }

    /// Full history of a document.
    pub async fn history(&self, location: &RemoteLocation) -> Result<ChangeHistory> {
        let path = self.history_path(location);
        if !fs::try_exists(&path).await? {
            return Err(Error::NotFound(format!("Document {}", location)));
        }

        let json = fs::read_to_string(&path).await?;
        let history = ChangeHistory::from_json(&json)?;
        if history.location() != location {
            return Err(Error::InvalidState(format!(
                "History file {:?} belongs to {}",
                path,
                history.location()
            )));
        }
        Ok(history)
    }

    /// Locations of every stored document.
    pub async fn documents(&self) -> Result<Vec<RemoteLocation>> {
        let mut locations = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(encoded) = name.to_str().and_then(|n| n.strip_suffix(HISTORY_SUFFIX)) else {
                continue;
            };
            let decoded = percent_decode_str(encoded)
                .decode_utf8()
                .map_err(|e| Error::Serialization(e.to_string()))?;
            locations.push(RemoteLocation::new(decoded)?);
        }

        locations.sort();
        Ok(locations)
    }

    /// Write a history atomically (temp file + rename).
    async fn store(&self, history: &ChangeHistory) -> Result<()> {
        let path = self.history_path(history.location());
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, history.to_json()?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteAuthority for LocalAuthority {
    fn name(&self) -> &str {
        "local"
    }

    async fn commit(&self, request: CommitRequest) -> Result<ChangeHistory> {
        let _guard = self.write_lock.lock().await;
        let mut history = self.history(&request.location).await?;

        debug!(
            "Commit to {} on base {} by {}",
            request.location, request.base_revision, request.acting_as
        );
        let slice = accept_commit(&mut history, request)?;
        self.store(&history).await?;
        Ok(slice)
    }

    async fn update(&self, request: UpdateRequest) -> Result<ChangeHistory> {
        let history = self.history(&request.location).await?;
        slice_from(&history, request.from_revision)
    }

    async fn head(&self, location: &RemoteLocation, _acting_as: &UserId) -> Result<Revision> {
        Ok(self.history(location).await?.head())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revsync_changes::{ChangeOp, ChangeSet, CommitMetadata, Statement};
    use tempfile::TempDir;

    fn location() -> RemoteLocation {
        RemoteLocation::new("projects/pizza").unwrap()
    }

    fn commit(base: u64) -> CommitRequest {
        let user = UserId::new("alice").unwrap();
        CommitRequest {
            location: location(),
            base_revision: Revision::new(base),
            changes: ChangeSet::from(vec![ChangeOp::Add(Statement::resource(
                format!("P{}", base),
                "subClassOf",
                "Pizza",
            ))]),
            metadata: CommitMetadata::new(user.clone(), "test"),
            acting_as: user,
        }
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let temp = TempDir::new().unwrap();

        {
            let authority = LocalAuthority::new(temp.path()).unwrap();
            authority.create_document(location()).await.unwrap();
            authority.commit(commit(0)).await.unwrap();
            authority.commit(commit(1)).await.unwrap();
        }

        let authority = LocalAuthority::new(temp.path()).unwrap();
        let history = authority.history(&location()).await.unwrap();
        assert_eq!(history.head(), Revision::new(2));
        assert_eq!(authority.documents().await.unwrap(), vec![location()]);
    }

    #[tokio::test]
    async fn test_conflict_leaves_file_untouched() {
        let temp = TempDir::new().unwrap();
        let authority = LocalAuthority::new(temp.path()).unwrap();
        authority.create_document(location()).await.unwrap();
        authority.commit(commit(0)).await.unwrap();

        assert!(matches!(
            authority.commit(commit(0)).await,
            Err(Error::Conflict { .. })
        ));
        assert_eq!(
            authority
                .head(&location(), &UserId::new("bob").unwrap())
                .await
                .unwrap(),
            Revision::new(1)
        );
    }

    #[tokio::test]
    async fn test_missing_document() {
        let temp = TempDir::new().unwrap();
        let authority = LocalAuthority::new(temp.path()).unwrap();
        let result = authority
            .update(UpdateRequest {
                location: location(),
                from_revision: Revision::ZERO,
                acting_as: UserId::new("alice").unwrap(),
            })
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let temp = TempDir::new().unwrap();
        let authority = LocalAuthority::new(temp.path()).unwrap();
        authority.create_document(location()).await.unwrap();
        assert!(matches!(
            authority.create_document(location()).await,
            Err(Error::AlreadyExists(_))
        ));
    }
}
