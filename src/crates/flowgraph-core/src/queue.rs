//! FIFO run queue of vertex ids

use crate::error::{GraphError, Result};
use std::collections::{HashSet, VecDeque};

/// Vertices ready to execute, in execution order.
///
/// An id is never present twice; [`push`](Self::push) on a queued id is a no-op.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunQueue {
    items: VecDeque<String>,
    members: HashSet<String>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an ordered list, rejecting duplicates
    pub fn from_list(ids: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut queue = Self::new();
        for id in ids {
            if !queue.push(id.clone()) {
                return Err(GraphError::InvalidSnapshot(format!(
                    "vertex '{}' appears twice in the run queue",
                    id
                )));
            }
        }
        Ok(queue)
    }

    /// Append `id`; returns false if it was already queued
    pub fn push(&mut self, id: String) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.items.push_back(id);
        true
    }

    pub fn peek(&self) -> Option<&str> {
        self.items.front().map(String::as_str)
    }

    pub fn pop(&mut self) -> Option<String> {
        let id = self.items.pop_front()?;
        self.members.remove(&id);
        Some(id)
    }

    /// Remove `id` wherever it sits; returns false if it was not queued
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        self.items.retain(|queued| queued != id);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> + '_ {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.items.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.members.clear();
    }
}
