//! Snapshot and restore of run state
//!
//! [`CheckpointManager::snapshot`] projects a graph's run state into a plain
//! data [`Snapshot`]; [`CheckpointManager::restore`] validates a snapshot
//! against the live graph and, only if every check passes, swaps the state in.
//! A failed restore leaves the graph untouched.
//!
//! Restoring what was just snapshotted is a no-op on queue order, context
//! contents, activation membership and vertex results.
//!
//! Snapshots taken after structural mutations can be applied to a graph rebuilt
//! from its original definition with [`CheckpointManager::rehydrate`], which
//! replays the recorded mutations first.

use crate::activation::{to_sorted_list, ActivationTracker};
use crate::context::ContextStore;
use crate::definition::VertexDefinition;
use crate::edge::Edge;
use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::queue::RunQueue;
use crate::run::OutputSelection;
use crate::vertex::{VertexRunState, VertexStatus};
use flowgraph_checkpoint::{
    CheckpointError, EdgeRecord, RunManagerState, Snapshot, SnapshotConfig, SnapshotMetadata,
    SnapshotSaver, SnapshotSource, StructuralChange,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Snapshot, restore and rehydrate operations over a [`Graph`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointManager;

impl CheckpointManager {
    /// Project the current run state. Call between steps only.
    pub fn snapshot(graph: &Graph) -> Snapshot {
        let state = &graph.state;

        let mut vertex_results = BTreeMap::new();
        let mut vertex_status = BTreeMap::new();
        let mut vertex_errors = BTreeMap::new();
        let mut stopped_branches = BTreeMap::new();
        for (id, vertex) in &graph.vertices {
            let run = vertex.run_state();
            if !run.results.is_empty() {
                vertex_results.insert(id.clone(), run.results.clone());
            }
            if run.status != VertexStatus::Pending {
                vertex_status.insert(id.clone(), run.status.as_str().to_string());
            }
            if let Some(error) = &run.error {
                vertex_errors.insert(id.clone(), error.clone());
            }
            if !run.stopped_branches.is_empty() {
                stopped_branches.insert(id.clone(), to_sorted_list(&run.stopped_branches));
            }
        }

        Snapshot {
            version: Snapshot::CURRENT_VERSION,
            run_id: Some(graph.run_id.clone()),
            run_manager: RunManagerState {
                edges: graph.edges.edges().iter().cloned().map(EdgeRecord::from).collect(),
                vertices_to_run: to_sorted_list(&state.vertices_to_run),
            },
            queue: state.queue.to_vec(),
            layers: state.layers.clone(),
            first_layer: state.first_layer.clone(),
            context: state.context.as_map().clone(),
            activated: to_sorted_list(state.activation.activated()),
            inactivated: to_sorted_list(state.activation.inactivated()),
            conditionally_excluded: to_sorted_list(state.activation.conditionally_excluded()),
            mutation_step: state.mutation_step,
            vertex_results,
            vertex_status,
            vertex_errors,
            stopped_branches,
            call_order: state.call_order.clone(),
            mutations: state.mutations.clone(),
            step_count: state.step_count,
            run_input: state.run_input.clone(),
            outputs: Some(state.outputs.to_record()),
            prepared: state.prepared,
            finished: state.finished,
            created_at: chrono::Utc::now(),
        }
    }

    /// Validate `snapshot` against `graph`, then replace its run state.
    ///
    /// # Errors
    ///
    /// - [`GraphError::UnknownVertex`] if any referenced id is not in the graph
    /// - [`GraphError::StructuralDrift`] if the mutation counter or edge table
    ///   differs from the live graph
    /// - [`GraphError::InvalidSnapshot`] on duplicate queue entries, overlapping
    ///   activation sets, unknown statuses, an unknown output selection or an
    ///   unsupported version
    pub fn restore(graph: &mut Graph, snapshot: &Snapshot) -> Result<()> {
        if snapshot.version > Snapshot::CURRENT_VERSION {
            return Err(GraphError::InvalidSnapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        for (field, id) in snapshot.vertex_references() {
            if !graph.vertices.contains_key(id) {
                return Err(GraphError::unknown_vertex(
                    id,
                    format!("snapshot field '{}'", field),
                ));
            }
        }
        for record in &snapshot.run_manager.edges {
            for endpoint in [&record.source, &record.target] {
                if !graph.vertices.contains_key(endpoint.as_str()) {
                    return Err(GraphError::unknown_vertex(
                        endpoint.clone(),
                        "snapshot field 'run_manager.edges'",
                    ));
                }
            }
        }

        if snapshot.mutation_step != graph.state.mutation_step {
            return Err(GraphError::StructuralDrift(format!(
                "snapshot was taken at mutation step {}, graph is at {}",
                snapshot.mutation_step, graph.state.mutation_step
            )));
        }
        let snapshot_edges: BTreeSet<Edge> = snapshot
            .run_manager
            .edges
            .iter()
            .cloned()
            .map(Edge::from)
            .collect();
        let live_edges: BTreeSet<Edge> = graph.edges.edges().iter().cloned().collect();
        if let Some(edge) = snapshot_edges.symmetric_difference(&live_edges).next() {
            let side = if live_edges.contains(edge) { "snapshot" } else { "live graph" };
            return Err(GraphError::StructuralDrift(format!(
                "edge {} is missing from the {}",
                edge, side
            )));
        }

        let queue = RunQueue::from_list(snapshot.queue.iter().cloned())?;
        let activation = ActivationTracker::from_lists(
            &snapshot.activated,
            &snapshot.inactivated,
            &snapshot.conditionally_excluded,
        )?;
        let outputs = match &snapshot.outputs {
            Some(record) => OutputSelection::from_record(record)?,
            None => OutputSelection::All,
        };

        let mut vertex_states: BTreeMap<String, VertexRunState> = BTreeMap::new();
        for id in graph.vertices.keys() {
            let status = match snapshot.vertex_status.get(id) {
                Some(status) => status.parse::<VertexStatus>()?,
                None => VertexStatus::Pending,
            };
            vertex_states.insert(
                id.clone(),
                VertexRunState {
                    status,
                    results: snapshot.vertex_results.get(id).cloned().unwrap_or_default(),
                    stopped_branches: snapshot
                        .stopped_branches
                        .get(id)
                        .map(|branches| branches.iter().cloned().collect())
                        .unwrap_or_default(),
                    error: snapshot.vertex_errors.get(id).cloned(),
                },
            );
        }

        // Validated; nothing below can fail.
        for (id, vertex) in graph.vertices.iter_mut() {
            if let Some(run) = vertex_states.remove(id) {
                vertex.state = run;
            }
        }
        if let Some(run_id) = &snapshot.run_id {
            graph.run_id = run_id.clone();
        }
        let state = &mut graph.state;
        state.queue = queue;
        state.layers = snapshot.layers.clone();
        state.first_layer = snapshot.first_layer.clone();
        state.vertices_to_run = snapshot.run_manager.vertices_to_run.iter().cloned().collect();
        state.context = ContextStore::from_map(snapshot.context.clone());
        state.activation = activation;
        state.mutation_step = snapshot.mutation_step;
        state.mutations = snapshot.mutations.clone();
        state.call_order = snapshot.call_order.clone();
        state.step_count = snapshot.step_count;
        state.run_input = snapshot.run_input.clone();
        state.outputs = outputs;
        state.prepared = snapshot.prepared;
        state.finished = snapshot.finished;

        tracing::info!(
            run_id = %graph.run_id,
            queue = ?graph.state.queue.to_vec(),
            mutation_step = graph.state.mutation_step,
            "run state restored"
        );
        Ok(())
    }

    /// Decode an untyped document and restore it.
    ///
    /// A missing required key fails with [`GraphError::MissingField`].
    pub fn restore_value(graph: &mut Graph, document: &Value) -> Result<()> {
        let snapshot = Snapshot::from_value(document).map_err(|e| match e {
            CheckpointError::MissingField(field) => GraphError::MissingField(field),
            other => GraphError::InvalidSnapshot(other.to_string()),
        })?;
        Self::restore(graph, &snapshot)
    }

    /// Replay the snapshot's mutations newer than the graph's counter, then
    /// restore. All or nothing.
    pub fn rehydrate(graph: &mut Graph, snapshot: &Snapshot) -> Result<()> {
        let live = graph.state.mutation_step;
        let mut staged = graph.clone();

        for record in snapshot.mutations.iter().filter(|m| m.mutation_step > live) {
            match &record.change {
                StructuralChange::AddVertex { vertex } => {
                    let definition: VertexDefinition = serde_json::from_value(vertex.clone())?;
                    staged.apply_structural(vec![definition], Vec::new())?;
                }
                StructuralChange::AddEdge { edge } => {
                    staged.apply_structural(Vec::new(), vec![Edge::from(edge.clone())])?;
                }
            }
            if staged.state.mutation_step != record.mutation_step {
                return Err(GraphError::StructuralDrift(format!(
                    "mutation log is not contiguous: expected step {}, graph reached {}",
                    record.mutation_step, staged.state.mutation_step
                )));
            }
        }

        Self::restore(&mut staged, snapshot)?;
        *graph = staged;
        Ok(())
    }
}

impl Graph {
    /// Shorthand for [`CheckpointManager::snapshot`]
    pub fn snapshot(&self) -> Snapshot {
        CheckpointManager::snapshot(self)
    }

    /// Shorthand for [`CheckpointManager::restore`]
    pub fn restore(&mut self, snapshot: &Snapshot) -> Result<()> {
        CheckpointManager::restore(self, snapshot)
    }

    /// Store the current state through `saver`
    pub async fn save_snapshot(
        &self,
        saver: &dyn SnapshotSaver,
        config: &SnapshotConfig,
    ) -> Result<SnapshotConfig> {
        let metadata = SnapshotMetadata::new()
            .with_source(SnapshotSource::Manual)
            .with_step(self.state.step_count)
            .with_run_id(self.run_id.as_str());
        Ok(saver.put(config, self.snapshot(), metadata).await?)
    }

    /// Load the snapshot addressed by `config` and rehydrate from it
    pub async fn resume_from(
        &mut self,
        saver: &dyn SnapshotSaver,
        config: &SnapshotConfig,
    ) -> Result<()> {
        let snapshot = saver.get(config).await?.ok_or_else(|| {
            CheckpointError::NotFound(format!(
                "no snapshot for thread {:?}",
                config.thread_id.as_deref().unwrap_or("<none>")
            ))
        })?;
        CheckpointManager::rehydrate(self, &snapshot)
    }
}
