//! Append-only change history.

use serde::{Deserialize, Serialize};

use revsync_common::{Error, RemoteLocation, Result, Revision};

use crate::metadata::CommitMetadata;
use crate::set::ChangeSet;

/// One committed change set and the revision it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub revision: Revision,
    pub changes: ChangeSet,
    pub metadata: CommitMetadata,
}

/// Ordered log mapping revisions to the change sets that produced them.
///
/// Entries are contiguous: the first entry produces `start + 1`, the last
/// produces `head`. A full history starts at revision 0; a cropped slice
/// starts wherever it was cut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeHistory {
    location: RemoteLocation,
    start: Revision,
    entries: Vec<HistoryEntry>,
}

impl ChangeHistory {
    /// Create an empty history rooted at revision 0.
    pub fn new(location: RemoteLocation) -> Self {
        Self::starting_at(location, Revision::ZERO)
    }

    /// Create an empty history whose first entry will produce `start + 1`.
    pub fn starting_at(location: RemoteLocation, start: Revision) -> Self {
        Self {
            location,
            start,
            entries: Vec::new(),
        }
    }

    /// Location of the document this history belongs to.
    pub fn location(&self) -> &RemoteLocation {
        &self.location
    }

    pub fn start(&self) -> Revision {
        self.start
    }

    /// Revision produced by the last entry, or `start` when empty.
    pub fn head(&self) -> Revision {
        self.entries
            .last()
            .map(|entry| entry.revision)
            .unwrap_or(self.start)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Entry that produced `revision`.
    pub fn get(&self, revision: Revision) -> Option<&HistoryEntry> {
        if revision <= self.start {
            return None;
        }
        let index = revision.difference(self.start) as usize - 1;
        self.entries.get(index)
    }

    /// Store a change set as the next revision and return that revision.
    pub fn append(&mut self, changes: ChangeSet, metadata: CommitMetadata) -> Result<Revision> {
        let revision = self.head().next();
        self.append_at(revision, changes, metadata)?;
        Ok(revision)
    }

    /// Store a change set under an explicit revision.
    ///
    /// # Errors
    /// - `InvalidState` if `revision` is not exactly `head + 1`
    /// - `InvalidInput` if the change set is empty
    pub fn append_at(
        &mut self,
        revision: Revision,
        changes: ChangeSet,
        metadata: CommitMetadata,
    ) -> Result<()> {
        self.push_entry(HistoryEntry {
            revision,
            changes,
            metadata,
        })
    }

    fn push_entry(&mut self, entry: HistoryEntry) -> Result<()> {
        let expected = self.head().next();
        if entry.revision != expected {
            return Err(Error::InvalidState(format!(
                "History for {} expected revision {} but got {}",
                self.location, expected, entry.revision
            )));
        }
        if entry.changes.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Refusing to record empty change set at revision {}",
                entry.revision
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Sub-log of the entries that move the document from `from` to `to`.
    ///
    /// # Errors
    /// - `Range` if `from > to`, `from < start` or `to > head`
    pub fn crop(&self, from: Revision, to: Revision) -> Result<ChangeHistory> {
        if from > to || from < self.start || to > self.head() {
            return Err(Error::Range(format!(
                "Cannot crop [{}, {}) from history of {} covering [{}, {})",
                from,
                to,
                self.location,
                self.start,
                self.head()
            )));
        }

        let skip = from.difference(self.start) as usize;
        let take = to.difference(from) as usize;
        Ok(Self {
            location: self.location.clone(),
            start: from,
            entries: self.entries[skip..skip + take].to_vec(),
        })
    }

    /// Ordered concatenation of every change set between `from` and `to`.
    pub fn changes_affecting(
        &self,
        location: &RemoteLocation,
        from: Revision,
        to: Revision,
    ) -> Result<ChangeSet> {
        if location != &self.location {
            return Err(Error::InvalidInput(format!(
                "History belongs to {}, not {}",
                self.location, location
            )));
        }
        let slice = self.crop(from, to)?;
        Ok(ChangeSet::concat(
            slice.entries.iter().map(|entry| &entry.changes),
        ))
    }

    /// `a - b`, e.g. how many revisions a local copy is behind.
    pub fn revision_difference(a: Revision, b: Revision) -> i64 {
        a.difference(b)
    }

    /// Extend this history with a slice fetched from the authority.
    ///
    /// The slice may overlap entries already held; overlapping entries must
    /// carry the same commits. It must not leave a gap.
    pub fn merge(&mut self, slice: &ChangeHistory) -> Result<()> {
        if slice.location != self.location {
            return Err(Error::InvalidInput(format!(
                "Cannot merge history of {} into {}",
                slice.location, self.location
            )));
        }
        if slice.start > self.head() {
            return Err(Error::Range(format!(
                "Slice starting at {} leaves a gap after head {}",
                slice.start,
                self.head()
            )));
        }

        for entry in &slice.entries {
            if entry.revision <= self.head() {
                if let Some(known) = self.get(entry.revision) {
                    if known.metadata.commit_id() != entry.metadata.commit_id() {
                        return Err(Error::InvalidState(format!(
                            "Revision {} of {} diverges from cached history",
                            entry.revision, self.location
                        )));
                    }
                }
                continue;
            }
            self.push_entry(entry.clone())?;
        }
        Ok(())
    }

    /// Check the contiguity invariant, e.g. after deserializing.
    pub fn validate(&self) -> Result<()> {
        let mut expected = self.start;
        for entry in &self.entries {
            expected = expected.next();
            if entry.revision != expected {
                return Err(Error::InvalidState(format!(
                    "History for {} has a gap: expected revision {} but found {}",
                    self.location, expected, entry.revision
                )));
            }
        }
        Ok(())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON, rejecting histories with gaps.
    pub fn from_json(json: &str) -> Result<Self> {
        let history: Self = serde_json::from_str(json)?;
        history.validate()?;
        Ok(history)
    }
}
