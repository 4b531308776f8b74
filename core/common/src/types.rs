//! Common types used throughout revsync.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from a string.
            ///
            /// # Errors
            /// - Returns error if the value is empty or only whitespace
            pub fn new(id: impl Into<String>) -> crate::Result<Self> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(crate::Error::InvalidInput(
                        concat!($label, " cannot be empty").to_string(),
                    ));
                }
                Ok(Self(id))
            }

            /// Get the inner string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Stable identity of a locally open document.
    ///
    /// This is a value type: per-document state is keyed by it rather than by
    /// a handle to the document itself, so the document may change its own
    /// identity without orphaning its undo history.
    DocumentId,
    "DocumentId"
);

string_id!(
    /// Location of the authoritative copy of a document at the remote side.
    RemoteLocation,
    "RemoteLocation"
);

string_id!(
    /// Identity acting against the remote authority.
    UserId,
    "UserId"
);

/// Position in a document's change history.
///
/// Revision 0 is the initial empty state; every committed change set
/// produces the next revision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Revision(u64);

impl Revision {
    /// The initial empty state.
    pub const ZERO: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// The revision produced by the next committed change set.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Signed distance `self - other`, used to report how far behind a
    /// local copy is.
    pub fn difference(self, other: Revision) -> i64 {
        self.0 as i64 - other.0 as i64
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
