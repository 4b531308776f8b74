//! Atomic, reversible document mutations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Object position of a statement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Reference to another resource.
    Resource(String),
    /// Literal value.
    Literal(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Resource(iri) => write!(f, "<{}>", iri),
            Value::Literal(text) => write!(f, "{:?}", text),
        }
    }
}

/// A single fact held by a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Statement {
    pub subject: String,
    pub predicate: String,
    pub object: Value,
}

impl Statement {
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, object: Value) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object,
        }
    }

    /// Statement whose object is another resource.
    pub fn resource(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self::new(subject, predicate, Value::Resource(object.into()))
    }

    /// Statement whose object is a literal value.
    pub fn literal(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::new(subject, predicate, Value::Literal(value.into()))
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> <{}> {}", self.subject, self.predicate, self.object)
    }
}

/// The fact a change operation touches.
///
/// Two operations with the same key can cancel each other out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FactKey {
    Statement(Statement),
    Identity,
}

/// Atomic, reversible mutation of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeOp {
    /// Add a statement.
    Add(Statement),
    /// Remove a statement.
    Remove(Statement),
    /// Change the document's own identity.
    SetIdentity {
        from: Option<String>,
        to: Option<String>,
    },
}

impl ChangeOp {
    /// The operation that undoes this one.
    pub fn inverse(&self) -> ChangeOp {
        match self {
            ChangeOp::Add(statement) => ChangeOp::Remove(statement.clone()),
            ChangeOp::Remove(statement) => ChangeOp::Add(statement.clone()),
            ChangeOp::SetIdentity { from, to } => ChangeOp::SetIdentity {
                from: to.clone(),
                to: from.clone(),
            },
        }
    }

    /// Whether `other` exactly undoes this operation.
    pub fn is_inverse_of(&self, other: &ChangeOp) -> bool {
        self.inverse() == *other
    }

    pub fn key(&self) -> FactKey {
        match self {
            ChangeOp::Add(statement) | ChangeOp::Remove(statement) => {
                FactKey::Statement(statement.clone())
            }
            ChangeOp::SetIdentity { .. } => FactKey::Identity,
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOp::Add(statement) => write!(f, "+ {}", statement),
            ChangeOp::Remove(statement) => write!(f, "- {}", statement),
            ChangeOp::SetIdentity { from, to } => write!(
                f,
                "~ identity {} -> {}",
                from.as_deref().unwrap_or("<none>"),
                to.as_deref().unwrap_or("<none>")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_remove_are_inverses() {
        let s = Statement::resource("Margherita", "subClassOf", "Pizza");
        let add = ChangeOp::Add(s.clone());
        assert_eq!(add.inverse(), ChangeOp::Remove(s));
        assert!(add.is_inverse_of(&add.inverse()));
        assert_eq!(add.inverse().inverse(), add);
    }

    #[test]
    fn test_identity_inverse_swaps() {
        let op = ChangeOp::SetIdentity {
            from: Some("http://a".to_string()),
            to: Some("http://b".to_string()),
        };
        assert_eq!(
            op.inverse(),
            ChangeOp::SetIdentity {
                from: Some("http://b".to_string()),
                to: Some("http://a".to_string()),
            }
        );
        assert_eq!(op.key(), FactKey::Identity);
    }

    #[test]
    fn test_display() {
        let op = ChangeOp::Add(Statement::literal("Margherita", "label", "Margherita"));
        assert_eq!(op.to_string(), "+ <Margherita> <label> \"Margherita\"");
    }
}
