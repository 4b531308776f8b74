//! Commit metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use revsync_common::UserId;

/// Who committed a change set, when and why.
///
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
    commit_id: Uuid,
    author: UserId,
    timestamp: DateTime<Utc>,
    comment: String,
}

impl CommitMetadata {
    /// Create metadata for a commit made now.
    pub fn new(author: UserId, comment: impl Into<String>) -> Self {
        Self::with_timestamp(author, comment, Utc::now())
    }

    pub fn with_timestamp(
        author: UserId,
        comment: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            commit_id: Uuid::new_v4(),
            author,
            timestamp,
            comment: comment.into(),
        }
    }

    pub fn commit_id(&self) -> Uuid {
        self.commit_id
    }

    pub fn author(&self) -> &UserId {
        &self.author
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_ids_are_unique() {
        let author = UserId::new("alice").unwrap();
        let a = CommitMetadata::new(author.clone(), "first");
        let b = CommitMetadata::new(author, "first");
        assert_ne!(a.commit_id(), b.commit_id());
        assert_eq!(a.comment(), "first");
        assert_eq!(a.author().as_str(), "alice");
    }
}
