//! Revision synchronization for locally edited documents.
//!
//! This crate provides:
//! - Versioned documents bound to a remote location and revision
//! - Commit and update against a remote authority
//! - Conflict detection on stale commits
//! - A background scheduler for manual and periodic sync
//! - The client session with its editor, preferences and events
//! - Retry with exponential backoff for transient update failures
//! - Local persistence of revisions and unsent edits

pub mod config;
pub mod conflict;
pub mod editor;
pub mod engine;
pub mod preferences;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod store;
pub mod throttle;

// Re-export main types
pub use config::SyncConfig;
pub use conflict::ConflictInfo;
pub use editor::{
    CommitSnapshot, DirectExecutor, ForegroundPump, ForegroundQueue, LocalEditor,
    MutationExecutor,
};
pub use engine::{SyncEngine, SyncOutcome};
pub use preferences::ServerPreferences;
pub use retry::{RetryConfig, RetryExecutor};
pub use scheduler::{SyncRequest, SyncScheduler, SyncSchedulerHandle};
pub use session::{ClientSession, SessionEvent};
pub use state::{DocumentRecord, SyncStatus, VersionedDocument};
pub use store::LocalStateStore;
pub use throttle::{FailureLog, SyncOperation};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _config = SyncConfig::default();
        let _retry_config = RetryConfig::default();
        let _editor = LocalEditor::new();
        let _failures = FailureLog::new();
    }
}
