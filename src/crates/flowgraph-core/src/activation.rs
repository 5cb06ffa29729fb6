//! Activation tracker
//!
//! Three sets per run: `activated` (executed and produced output), `inactivated`
//! (will never run in this run) and `conditionally_excluded` (parked until its
//! remaining inputs decide whether it runs or is inactivated). A vertex is never
//! in both `activated` and `inactivated`, and an excluded vertex is in neither.
//! Any transition that would break this is a scheduler bug and returns
//! [`GraphError::Invariant`].

use crate::error::{GraphError, Result};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationTracker {
    activated: BTreeSet<String>,
    inactivated: BTreeSet<String>,
    conditionally_excluded: BTreeSet<String>,
}

impl ActivationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from list encodings, checking the disjointness invariants
    pub fn from_lists(
        activated: &[String],
        inactivated: &[String],
        conditionally_excluded: &[String],
    ) -> Result<Self> {
        let tracker = Self {
            activated: activated.iter().cloned().collect(),
            inactivated: inactivated.iter().cloned().collect(),
            conditionally_excluded: conditionally_excluded.iter().cloned().collect(),
        };

        if let Some(id) = tracker.activated.intersection(&tracker.inactivated).next() {
            return Err(GraphError::InvalidSnapshot(format!(
                "vertex '{}' is both activated and inactivated",
                id
            )));
        }
        let decided = tracker
            .conditionally_excluded
            .iter()
            .find(|id| tracker.activated.contains(*id) || tracker.inactivated.contains(*id));
        if let Some(id) = decided {
            return Err(GraphError::InvalidSnapshot(format!(
                "vertex '{}' is conditionally excluded but already decided",
                id
            )));
        }
        Ok(tracker)
    }

    /// Record a successful execution
    pub fn activate(&mut self, id: &str) -> Result<()> {
        if self.inactivated.contains(id) {
            return Err(GraphError::Invariant(format!(
                "cannot activate inactivated vertex '{}'",
                id
            )));
        }
        if !self.activated.insert(id.to_string()) {
            return Err(GraphError::Invariant(format!("vertex '{}' activated twice", id)));
        }
        self.conditionally_excluded.remove(id);
        Ok(())
    }

    /// Exclude a vertex for the rest of the run
    pub fn inactivate(&mut self, id: &str) -> Result<()> {
        if self.activated.contains(id) {
            return Err(GraphError::Invariant(format!(
                "cannot inactivate activated vertex '{}'",
                id
            )));
        }
        if !self.inactivated.insert(id.to_string()) {
            return Err(GraphError::Invariant(format!("vertex '{}' inactivated twice", id)));
        }
        self.conditionally_excluded.remove(id);
        Ok(())
    }

    /// Park a vertex pending a later decision; no-op if already parked
    pub fn exclude(&mut self, id: &str) -> Result<()> {
        if self.activated.contains(id) || self.inactivated.contains(id) {
            return Err(GraphError::Invariant(format!(
                "cannot conditionally exclude decided vertex '{}'",
                id
            )));
        }
        self.conditionally_excluded.insert(id.to_string());
        Ok(())
    }

    /// Lift a conditional exclusion; returns whether one existed
    pub fn release(&mut self, id: &str) -> bool {
        self.conditionally_excluded.remove(id)
    }

    pub fn is_activated(&self, id: &str) -> bool {
        self.activated.contains(id)
    }

    pub fn is_inactivated(&self, id: &str) -> bool {
        self.inactivated.contains(id)
    }

    pub fn is_excluded(&self, id: &str) -> bool {
        self.conditionally_excluded.contains(id)
    }

    pub fn activated(&self) -> &BTreeSet<String> {
        &self.activated
    }

    pub fn inactivated(&self) -> &BTreeSet<String> {
        &self.inactivated
    }

    pub fn conditionally_excluded(&self) -> &BTreeSet<String> {
        &self.conditionally_excluded
    }

    pub fn clear(&mut self) {
        self.activated.clear();
        self.inactivated.clear();
        self.conditionally_excluded.clear();
    }
}

/// Sorted list encoding of a set
pub(crate) fn to_sorted_list(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}
