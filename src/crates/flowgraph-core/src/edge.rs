//! Edge table: which producer feeds each vertex input
//!
//! Every input field of a vertex has at most one source edge. The table keeps
//! three indexes over the same edge list so the scheduler can answer "who feeds
//! `(target, input)`", "who consumes `source`" and "how many distinct consumers
//! does `source` have" without scanning.

use crate::error::{GraphError, Result};
use flowgraph_checkpoint::EdgeRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// A directed data dependency `(source, source_output) -> (target, target_input)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub source_output: String,
    pub target: String,
    pub target_input: String,
}

impl Edge {
    pub fn new(
        source: impl Into<String>,
        source_output: impl Into<String>,
        target: impl Into<String>,
        target_input: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_output: source_output.into(),
            target: target.into(),
            target_input: target_input.into(),
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source, self.source_output, self.target, self.target_input
        )
    }
}

impl From<Edge> for EdgeRecord {
    fn from(edge: Edge) -> Self {
        EdgeRecord {
            source: edge.source,
            source_output: edge.source_output,
            target: edge.target,
            target_input: edge.target_input,
        }
    }
}

impl From<EdgeRecord> for Edge {
    fn from(record: EdgeRecord) -> Self {
        Edge {
            source: record.source,
            source_output: record.source_output,
            target: record.target,
            target_input: record.target_input,
        }
    }
}

/// Indexed, insertion-ordered set of edges
#[derive(Debug, Clone, Default)]
pub struct EdgeTable {
    edges: Vec<Edge>,
    incoming: HashMap<String, BTreeMap<String, usize>>,
    outgoing: HashMap<String, Vec<usize>>,
    successors: HashMap<String, BTreeSet<String>>,
    predecessors: HashMap<String, BTreeSet<String>>,
}

impl EdgeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table, rejecting a second source for any `(target, input)`
    pub fn build(edges: impl IntoIterator<Item = Edge>) -> Result<Self> {
        let mut table = Self::new();
        for edge in edges {
            table.insert(edge)?;
        }
        Ok(table)
    }

    pub fn insert(&mut self, edge: Edge) -> Result<()> {
        if self.source_of(&edge.target, &edge.target_input).is_some() {
            return Err(GraphError::DuplicateSource {
                vertex: edge.target,
                input: edge.target_input,
            });
        }

        let index = self.edges.len();
        self.incoming
            .entry(edge.target.clone())
            .or_default()
            .insert(edge.target_input.clone(), index);
        self.outgoing.entry(edge.source.clone()).or_default().push(index);
        self.successors
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.target.clone());
        self.predecessors
            .entry(edge.target.clone())
            .or_default()
            .insert(edge.source.clone());
        self.edges.push(edge);
        Ok(())
    }

    /// The edge feeding `target.input`, if any
    pub fn source_of(&self, target: &str, input: &str) -> Option<&Edge> {
        self.incoming
            .get(target)
            .and_then(|inputs| inputs.get(input))
            .map(|&index| &self.edges[index])
    }

    /// Edges into `target`, ordered by input name
    pub fn incoming(&self, target: &str) -> impl Iterator<Item = &Edge> + '_ {
        self.incoming
            .get(target)
            .into_iter()
            .flat_map(|inputs| inputs.values())
            .map(|&index| &self.edges[index])
    }

    /// Edges out of `source`, in insertion order
    pub fn outgoing(&self, source: &str) -> impl Iterator<Item = &Edge> + '_ {
        self.outgoing
            .get(source)
            .into_iter()
            .flatten()
            .map(|&index| &self.edges[index])
    }

    /// Distinct downstream vertices of `id`, ascending
    pub fn successors(&self, id: &str) -> impl Iterator<Item = &String> + '_ {
        self.successors.get(id).into_iter().flatten()
    }

    /// Distinct upstream vertices of `id`, ascending
    pub fn predecessors(&self, id: &str) -> impl Iterator<Item = &String> + '_ {
        self.predecessors.get(id).into_iter().flatten()
    }

    /// Number of distinct downstream consumers of `id`
    pub fn consumer_count(&self, id: &str) -> usize {
        self.successors.get(id).map_or(0, BTreeSet::len)
    }

    pub fn has_incoming(&self, id: &str) -> bool {
        self.incoming.get(id).map_or(false, |inputs| !inputs.is_empty())
    }

    pub fn contains(&self, edge: &Edge) -> bool {
        self.source_of(&edge.target, &edge.target_input) == Some(edge)
    }

    /// All edges in insertion order
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Every vertex reachable backwards from `id`, excluding `id` itself
    pub fn ancestors(&self, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = vec![id];
        while let Some(current) = stack.pop() {
            for parent in self.predecessors(current) {
                if seen.insert(parent.clone()) {
                    stack.push(parent);
                }
            }
        }
        seen.remove(id);
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> EdgeTable {
        EdgeTable::build(vec![
            Edge::new("a", "out", "b", "in"),
            Edge::new("a", "out", "c", "in"),
            Edge::new("b", "out", "d", "left"),
            Edge::new("c", "out", "d", "right"),
        ])
        .unwrap()
    }

    #[test]
    fn test_source_lookup() {
        let table = diamond();
        let edge = table.source_of("d", "right").unwrap();
        assert_eq!(edge.source, "c");
        assert!(table.source_of("d", "missing").is_none());
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let mut table = diamond();
        let err = table.insert(Edge::new("a", "out", "d", "left")).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateSource { ref vertex, ref input } if vertex == "d" && input == "left"));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_shared_source_counts_distinct_consumers() {
        let mut table = diamond();
        table.insert(Edge::new("a", "out", "b", "extra")).unwrap();
        assert_eq!(table.consumer_count("a"), 2);
        assert_eq!(table.outgoing("a").count(), 3);
        assert_eq!(table.consumer_count("d"), 0);
    }

    #[test]
    fn test_incoming_ordered_by_input_name() {
        let table = diamond();
        let inputs: Vec<_> = table.incoming("d").map(|e| e.target_input.as_str()).collect();
        assert_eq!(inputs, vec!["left", "right"]);
        assert!(!table.has_incoming("a"));
    }

    #[test]
    fn test_ancestors() {
        let table = diamond();
        let ancestors: Vec<_> = table.ancestors("d").into_iter().collect();
        assert_eq!(ancestors, vec!["a", "b", "c"]);
        assert!(table.ancestors("a").is_empty());
    }

    #[test]
    fn test_record_conversion() {
        let edge = Edge::new("a", "out", "b", "in");
        let record: EdgeRecord = edge.clone().into();
        assert_eq!(Edge::from(record), edge);
        assert_eq!(edge.to_string(), "a.out -> b.in");
    }
}
