//! Topological layering with deterministic tie-breaking
//!
//! Layer `n` holds every not-yet-ordered vertex whose in-scope predecessors all
//! sit in layers `< n`. Inside a layer vertices are ordered by number of
//! distinct downstream consumers (descending), then by id (ascending), so two
//! graphs with the same topology always produce the same layering no matter the
//! order vertices were declared in.
//!
//! When an iteration finds no eligible vertex while some remain, the graph has a
//! cycle; [`GraphError::Cycle`] carries one offending cycle path.

use crate::edge::EdgeTable;
use crate::error::{GraphError, Result};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashSet};

/// Order `ids` in place by (consumer count desc, id asc)
pub fn sort_by_priority(ids: &mut [String], edges: &EdgeTable) {
    ids.sort_by_cached_key(|id| (Reverse(edges.consumer_count(id)), id.clone()));
}

/// Layer every vertex in `vertices`.
///
/// Predecessors outside `vertices` are treated as already satisfied, which lets
/// callers layer a closed sub-scope of a larger graph.
pub fn compute_layers<'a, I>(vertices: I, edges: &EdgeTable) -> Result<Vec<Vec<String>>>
where
    I: IntoIterator<Item = &'a String>,
{
    let scope: BTreeSet<&str> = vertices.into_iter().map(String::as_str).collect();
    let mut remaining: BTreeSet<&str> = scope.clone();
    let mut ordered: HashSet<&str> = HashSet::with_capacity(scope.len());
    let mut layers = Vec::new();

    while !remaining.is_empty() {
        let mut layer: Vec<String> = remaining
            .iter()
            .filter(|id| {
                edges
                    .predecessors(id)
                    .all(|p| !scope.contains(p.as_str()) || ordered.contains(p.as_str()))
            })
            .map(|id| (*id).to_string())
            .collect();

        if layer.is_empty() {
            return Err(GraphError::Cycle {
                path: find_cycle(&remaining, edges),
            });
        }

        sort_by_priority(&mut layer, edges);
        for id in &layer {
            if let Some(owned) = remaining.take(id.as_str()) {
                ordered.insert(owned);
            }
        }
        layers.push(layer);
    }

    Ok(layers)
}

/// Flatten layers into one execution order
pub fn flatten(layers: &[Vec<String>]) -> Vec<String> {
    layers.iter().flatten().cloned().collect()
}

/// Walk predecessors inside `stuck` until a vertex repeats.
///
/// Every vertex in `stuck` has at least one predecessor in `stuck`, so the walk
/// always closes a loop.
fn find_cycle(stuck: &BTreeSet<&str>, edges: &EdgeTable) -> Vec<String> {
    let Some(&start) = stuck.iter().next() else {
        return Vec::new();
    };

    let mut path: Vec<&str> = vec![start];
    let mut current: &str = start;
    loop {
        let next = edges
            .predecessors(current)
            .map(String::as_str)
            .find(|p| stuck.contains(p));
        let Some(next) = next else {
            return path.iter().rev().map(|id| id.to_string()).collect();
        };
        if let Some(pos) = path.iter().position(|id| *id == next) {
            let mut cycle: Vec<String> = path[pos..].iter().rev().map(|id| id.to_string()).collect();
            if let Some(first) = cycle.first().cloned() {
                cycle.push(first);
            }
            return cycle;
        }
        path.push(next);
        current = next;
    }
}
