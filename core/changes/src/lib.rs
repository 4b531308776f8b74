//! Change tracking for revision-synchronized documents.
//!
//! This crate provides:
//! - Reversible change operations and ordered change sets
//! - Change-set minimization
//! - The append-only, gap-free change history
//! - The per-document undo/redo recorder

pub mod document;
pub mod history;
pub mod metadata;
pub mod op;
pub mod recorder;
pub mod set;

pub use document::{Document, StatementDocument};
pub use history::{ChangeHistory, HistoryEntry};
pub use metadata::CommitMetadata;
pub use op::{ChangeOp, FactKey, Statement, Value};
pub use recorder::{ChangeRecorder, RecordedEdit, RecorderEvent, RecordingMode};
pub use set::ChangeSet;
