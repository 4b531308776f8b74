//! Documents that change sets are applied to.

use std::collections::BTreeSet;

use revsync_common::Result;

use crate::op::{ChangeOp, Statement};
use crate::set::ChangeSet;

/// A locally held document that accepts change sets.
///
/// What an operation means to application state is up to the
/// implementation; the sync machinery only needs to apply changes and learn
/// which of them actually took effect.
pub trait Document: Send {
    /// Apply `changes` in order.
    ///
    /// Returns the operations that actually changed the document (adding a
    /// statement that is already present has no effect and is left out).
    /// On error the document must be left as it was.
    fn apply(&mut self, changes: &ChangeSet) -> Result<ChangeSet>;

    /// The document's state expressed as the change set that builds it from
    /// an empty document, in a canonical order.
    fn contents(&self) -> ChangeSet;
}

/// In-memory document made of statements and an optional identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementDocument {
    identity: Option<String>,
    statements: BTreeSet<Statement>,
}

impl StatementDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn contains(&self, statement: &Statement) -> bool {
        self.statements.contains(statement)
    }

    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.identity.is_none()
    }

    fn apply_op(&mut self, op: &ChangeOp) -> Option<ChangeOp> {
        match op {
            ChangeOp::Add(statement) => self
                .statements
                .insert(statement.clone())
                .then(|| op.clone()),
            ChangeOp::Remove(statement) => {
                self.statements.remove(statement).then(|| op.clone())
            }
            ChangeOp::SetIdentity { to, .. } => {
                if self.identity == *to {
                    return None;
                }
                let from = std::mem::replace(&mut self.identity, to.clone());
                Some(ChangeOp::SetIdentity {
                    from,
                    to: to.clone(),
                })
            }
        }
    }
}

impl Document for StatementDocument {
    fn apply(&mut self, changes: &ChangeSet) -> Result<ChangeSet> {
        Ok(changes.iter().filter_map(|op| self.apply_op(op)).collect())
    }

    fn contents(&self) -> ChangeSet {
        let identity = self.identity.as_ref().map(|iri| ChangeOp::SetIdentity {
            from: None,
            to: Some(iri.clone()),
        });
        identity
            .into_iter()
            .chain(self.statements.iter().cloned().map(ChangeOp::Add))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement(name: &str) -> Statement {
        Statement::resource(name, "subClassOf", "Pizza")
    }

    #[test]
    fn test_apply_reports_effective_changes() {
        let mut doc = StatementDocument::new();
        let changes = ChangeSet::from(vec![
            ChangeOp::Add(statement("A")),
            ChangeOp::Add(statement("A")),
            ChangeOp::Remove(statement("B")),
        ]);

        let applied = doc.apply(&changes).unwrap();
        assert_eq!(applied, ChangeSet::from(vec![ChangeOp::Add(statement("A"))]));
        assert!(doc.contains(&statement("A")));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_identity_change_records_actual_previous_value() {
        let mut doc = StatementDocument::new();
        let applied = doc
            .apply(&ChangeSet::from(vec![ChangeOp::SetIdentity {
                from: Some("stale".to_string()),
                to: Some("http://pizza".to_string()),
            }]))
            .unwrap();

        assert_eq!(
            applied.ops()[0],
            ChangeOp::SetIdentity {
                from: None,
                to: Some("http://pizza".to_string()),
            }
        );
        assert_eq!(doc.identity(), Some("http://pizza"));
    }

    #[test]
    fn test_applied_inverse_restores_contents() {
        let mut doc = StatementDocument::new();
        doc.apply(&ChangeSet::from(vec![ChangeOp::Add(statement("Base"))]))
            .unwrap();
        let before = doc.contents();

        let applied = doc
            .apply(&ChangeSet::from(vec![
                ChangeOp::Add(statement("A")),
                ChangeOp::Remove(statement("Base")),
            ]))
            .unwrap();
        doc.apply(&applied.inverse()).unwrap();

        assert_eq!(doc.contents(), before);
    }
}
