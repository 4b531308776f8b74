//! Ordered change sets and change-list minimization.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::op::{ChangeOp, FactKey};

/// Ordered sequence of change operations.
///
/// Order matters: operations are applied front to back, and reversed by
/// applying the inverses back to front.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet {
    ops: Vec<ChangeOp>,
}

impl ChangeSet {
    /// Create an empty change set.
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    pub fn push(&mut self, op: ChangeOp) {
        self.ops.push(op);
    }

    /// Append all operations of `other`, preserving order.
    pub fn extend_from(&mut self, other: &ChangeSet) {
        self.ops.extend(other.ops.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeOp> {
        self.ops.iter()
    }

    pub fn ops(&self) -> &[ChangeOp] {
        &self.ops
    }

    /// The change set that reverts this one: inverses in reverse order.
    pub fn inverse(&self) -> ChangeSet {
        self.ops.iter().rev().map(ChangeOp::inverse).collect()
    }

    /// Concatenate change sets in order.
    pub fn concat<'a>(sets: impl IntoIterator<Item = &'a ChangeSet>) -> ChangeSet {
        let mut out = ChangeSet::new();
        for set in sets {
            out.extend_from(set);
        }
        out
    }

    /// Cancel out pairs of mutually inverse operations on the same fact.
    ///
    /// For every fact a stack of surviving operations is kept; an operation
    /// that inverts the top of its fact's stack removes both. Survivors keep
    /// their original relative order. Minimizing a minimized set is a no-op.
    pub fn minimized(&self) -> ChangeSet {
        let mut keep = vec![true; self.ops.len()];
        let mut surviving: HashMap<FactKey, Vec<usize>> = HashMap::new();

        for (index, op) in self.ops.iter().enumerate() {
            let stack = surviving.entry(op.key()).or_default();
            match stack.last() {
                Some(&top) if self.ops[top].is_inverse_of(op) => {
                    stack.pop();
                    keep[top] = false;
                    keep[index] = false;
                }
                _ => stack.push(index),
            }
        }

        self.ops
            .iter()
            .zip(keep)
            .filter_map(|(op, kept)| kept.then(|| op.clone()))
            .collect()
    }
}

impl From<Vec<ChangeOp>> for ChangeSet {
    fn from(ops: Vec<ChangeOp>) -> Self {
        Self { ops }
    }
}

impl FromIterator<ChangeOp> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = ChangeOp>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ChangeSet {
    type Item = ChangeOp;
    type IntoIter = std::vec::IntoIter<ChangeOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = &'a ChangeOp;
    type IntoIter = std::slice::Iter<'a, ChangeOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.iter()
    }
}
