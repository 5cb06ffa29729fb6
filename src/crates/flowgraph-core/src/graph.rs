//! Graph construction, run preparation and structural mutation
//!
//! A [`Graph`] owns everything one execution needs: vertices, the edge table,
//! the run queue, the context store and the activation sets. It is built from a
//! [`FlowDefinition`] against a [`UnitRegistry`]; shared services such as a
//! [`SnapshotSaver`] are injected through [`GraphBuilder`] rather than looked up
//! globally.
//!
//! ```rust,no_run
//! use flowgraph_core::{builtin_registry, FlowDefinition, Graph, RunConfig, RunRequest};
//! use serde_json::json;
//!
//! # async fn example() -> flowgraph_core::Result<()> {
//! let flow = FlowDefinition::from_file("flows/chain.yaml")?;
//! let mut graph = Graph::builder(flow).with_registry(builtin_registry()).build()?;
//!
//! let summary = graph
//!     .run(RunRequest::new().with_input(json!("hello")), RunConfig::default())
//!     .await?;
//! println!("{:?}", summary.outputs);
//! # Ok(())
//! # }
//! ```

use crate::activation::ActivationTracker;
use crate::builtins::{builtin_registry, INPUT_VALUE};
use crate::context::ContextStore;
use crate::definition::{FlowDefinition, VertexDefinition};
use crate::edge::{Edge, EdgeTable};
use crate::error::{GraphError, Result};
use crate::layering::{compute_layers, sort_by_priority};
use crate::queue::RunQueue;
use crate::run::OutputSelection;
use crate::unit::UnitRegistry;
use crate::vertex::{Vertex, VertexStatus};
use flowgraph_checkpoint::{MutationRecord, SnapshotSaver, StructuralChange};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Which vertices a run covers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RunScope {
    /// Every vertex
    #[default]
    Full,
    /// The named vertex and everything it depends on; all others are
    /// inactivated up front
    StopAt(String),
}

/// Scheduler state of one run
#[derive(Debug, Clone, Default)]
pub(crate) struct RunState {
    pub queue: RunQueue,
    pub layers: Vec<Vec<String>>,
    pub first_layer: Vec<String>,
    pub vertices_to_run: BTreeSet<String>,
    pub context: ContextStore,
    pub activation: ActivationTracker,
    pub mutation_step: u64,
    pub mutations: Vec<MutationRecord>,
    pub call_order: Vec<String>,
    pub step_count: u64,
    pub run_input: Option<Value>,
    pub prepared: bool,
    pub finished: bool,
    pub scope: RunScope,
    pub outputs: OutputSelection,
}

/// A computation graph plus the state of its current run
#[derive(Clone)]
pub struct Graph {
    pub(crate) name: String,
    pub(crate) run_id: String,
    pub(crate) vertices: BTreeMap<String, Vertex>,
    pub(crate) edges: EdgeTable,
    pub(crate) registry: UnitRegistry,
    pub(crate) checkpointer: Option<Arc<dyn SnapshotSaver>>,
    pub(crate) state: RunState,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("run_id", &self.run_id)
            .field("vertices", &self.vertices.keys().collect::<Vec<_>>())
            .field("edges", &self.edges.len())
            .field("checkpointer", &self.checkpointer.is_some())
            .field("queue", &self.state.queue)
            .field("mutation_step", &self.state.mutation_step)
            .finish()
    }
}

/// Builder for [`Graph`]
pub struct GraphBuilder {
    definition: FlowDefinition,
    registry: UnitRegistry,
    checkpointer: Option<Arc<dyn SnapshotSaver>>,
    run_id: Option<String>,
}

impl GraphBuilder {
    /// Unit registry; defaults to [`builtin_registry`]
    pub fn with_registry(mut self, registry: UnitRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Saver used for per-step snapshots
    pub fn with_checkpointer(mut self, saver: Arc<dyn SnapshotSaver>) -> Self {
        self.checkpointer = Some(saver);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Validate the definition and build the graph.
    ///
    /// Fails with a definition error on duplicate ids, dangling edges, unknown
    /// unit types or fields, unresolved required inputs, or a cycle.
    pub fn build(self) -> Result<Graph> {
        self.definition.validate()?;

        let edges = EdgeTable::build(self.definition.edges.iter().cloned())?;
        let mut vertices = BTreeMap::new();
        for definition in &self.definition.vertices {
            let unit = self.registry.create(definition)?;
            let vertex = Vertex::new(definition.clone(), unit)?;
            vertices.insert(definition.id.clone(), vertex);
        }

        for edge in edges.edges() {
            check_edge_fields(&vertices, edge)?;
        }
        for vertex in vertices.values() {
            check_required_inputs(vertex, &edges)?;
        }
        compute_layers(vertices.keys(), &edges)?;

        let run_id = self
            .run_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tracing::debug!(
            graph = %self.definition.name,
            run_id = %run_id,
            vertices = vertices.len(),
            edges = edges.len(),
            "graph built"
        );

        Ok(Graph {
            name: self.definition.name,
            run_id,
            vertices,
            edges,
            registry: self.registry,
            checkpointer: self.checkpointer,
            state: RunState::default(),
        })
    }
}

/// Both endpoints of `edge` must declare the fields it connects
fn check_edge_fields(vertices: &BTreeMap<String, Vertex>, edge: &Edge) -> Result<()> {
    let source = vertices
        .get(&edge.source)
        .ok_or_else(|| GraphError::unknown_vertex(&edge.source, format!("edge {}", edge)))?;
    let target = vertices
        .get(&edge.target)
        .ok_or_else(|| GraphError::unknown_vertex(&edge.target, format!("edge {}", edge)))?;

    if !source.has_output(&edge.source_output) {
        return Err(GraphError::unknown_field(
            &edge.source,
            &edge.source_output,
            "output",
        ));
    }
    if !target.has_input(&edge.target_input) {
        return Err(GraphError::unknown_field(
            &edge.target,
            &edge.target_input,
            "input",
        ));
    }
    Ok(())
}

/// Every required input needs an edge, a literal, a default or the run input
fn check_required_inputs(vertex: &Vertex, edges: &EdgeTable) -> Result<()> {
    for field in vertex.input_fields().iter().filter(|f| f.required) {
        let bound = edges.source_of(vertex.id(), &field.name).is_some()
            || vertex.literal_for(&field.name).is_some()
            || (vertex.is_input() && field.name == INPUT_VALUE);
        if !bound {
            return Err(GraphError::UnresolvedInput {
                vertex: vertex.id().to_string(),
                input: field.name.clone(),
            });
        }
    }
    Ok(())
}

impl Graph {
    pub fn builder(definition: FlowDefinition) -> GraphBuilder {
        GraphBuilder {
            definition,
            registry: builtin_registry(),
            checkpointer: None,
            run_id: None,
        }
    }

    /// Build with `registry` and no checkpointer
    pub fn new(definition: FlowDefinition, registry: UnitRegistry) -> Result<Self> {
        Self::builder(definition).with_registry(registry).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn vertex(&self, id: &str) -> Option<&Vertex> {
        self.vertices.get(id)
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> + '_ {
        self.vertices.values()
    }

    pub fn vertex_ids(&self) -> impl Iterator<Item = &String> + '_ {
        self.vertices.keys()
    }

    pub fn contains_vertex(&self, id: &str) -> bool {
        self.vertices.contains_key(id)
    }

    pub fn edges(&self) -> &EdgeTable {
        &self.edges
    }

    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    pub fn checkpointer(&self) -> Option<&Arc<dyn SnapshotSaver>> {
        self.checkpointer.as_ref()
    }

    pub fn set_checkpointer(&mut self, saver: Arc<dyn SnapshotSaver>) {
        self.checkpointer = Some(saver);
    }

    /// Full layering of the current structure
    pub fn layers(&self) -> Result<Vec<Vec<String>>> {
        compute_layers(self.vertices.keys(), &self.edges)
    }

    /// Layering computed by the last `prepare`
    pub fn run_layers(&self) -> &[Vec<String>] {
        &self.state.layers
    }

    pub fn first_layer(&self) -> &[String] {
        &self.state.first_layer
    }

    pub fn queue(&self) -> &RunQueue {
        &self.state.queue
    }

    pub fn context(&self) -> &ContextStore {
        &self.state.context
    }

    /// Write a context value from outside the run loop, between steps
    pub fn context_mut(&mut self) -> &mut ContextStore {
        &mut self.state.context
    }

    pub fn activation(&self) -> &ActivationTracker {
        &self.state.activation
    }

    pub fn mutation_step(&self) -> u64 {
        self.state.mutation_step
    }

    pub fn mutations(&self) -> &[MutationRecord] {
        &self.state.mutations
    }

    /// Vertex ids in the order they were executed this run
    pub fn call_order(&self) -> &[String] {
        &self.state.call_order
    }

    pub fn step_count(&self) -> u64 {
        self.state.step_count
    }

    pub fn vertices_to_run(&self) -> &BTreeSet<String> {
        &self.state.vertices_to_run
    }

    pub fn is_prepared(&self) -> bool {
        self.state.prepared
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished
    }

    /// Reset run state and seed the queue with the first layer of `scope`.
    ///
    /// Structure (vertices, edges, mutation counter and log) is kept; statuses,
    /// results, the context and the activation sets start over.
    pub fn prepare(&mut self, scope: RunScope) -> Result<()> {
        let in_scope: BTreeSet<String> = match &scope {
            RunScope::Full => self.vertices.keys().cloned().collect(),
            RunScope::StopAt(id) => {
                if !self.vertices.contains_key(id) {
                    return Err(GraphError::unknown_vertex(id, "run scope"));
                }
                let mut ids = self.edges.ancestors(id);
                ids.insert(id.clone());
                ids
            }
        };

        let layers = compute_layers(in_scope.iter(), &self.edges)?;
        let first_layer = layers.first().cloned().unwrap_or_default();

        let mut activation = ActivationTracker::new();
        for vertex in self.vertices.values_mut() {
            vertex.reset();
            if !in_scope.contains(vertex.id()) {
                activation.inactivate(vertex.id())?;
                vertex.state.status = VertexStatus::Stopped;
            }
        }

        let mut queue = RunQueue::new();
        for id in &first_layer {
            queue.push(id.clone());
        }

        tracing::debug!(
            run_id = %self.run_id,
            scope = ?scope,
            layers = layers.len(),
            first_layer = ?first_layer,
            "graph prepared"
        );

        let mutation_step = self.state.mutation_step;
        let mutations = std::mem::take(&mut self.state.mutations);
        self.state = RunState {
            queue,
            layers,
            first_layer,
            vertices_to_run: in_scope,
            context: ContextStore::new(),
            activation,
            mutation_step,
            mutations,
            call_order: Vec::new(),
            step_count: 0,
            run_input: None,
            prepared: true,
            finished: false,
            scope,
            outputs: OutputSelection::default(),
        };
        Ok(())
    }

    /// Add a vertex between steps.
    ///
    /// On a prepared graph the vertex joins the current run and is enqueued as
    /// soon as its inputs allow.
    pub fn add_vertex(&mut self, definition: VertexDefinition) -> Result<()> {
        self.apply_mutations(vec![definition], Vec::new())
    }

    /// Add an edge between steps
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        self.apply_mutations(Vec::new(), vec![edge])
    }

    /// Apply vertices then edges as one unit: all of them or none
    pub fn apply_mutations(
        &mut self,
        vertices: Vec<VertexDefinition>,
        edges: Vec<Edge>,
    ) -> Result<()> {
        if vertices.is_empty() && edges.is_empty() {
            return Ok(());
        }
        let mut staged = self.clone();
        staged.apply_structural(vertices, edges)?;
        *self = staged;
        Ok(())
    }

    /// Apply structural changes in place. Callers stage on a clone, since a
    /// failure leaves the graph partially mutated.
    pub(crate) fn apply_structural(
        &mut self,
        vertices: Vec<VertexDefinition>,
        edges: Vec<Edge>,
    ) -> Result<()> {
        if vertices.is_empty() && edges.is_empty() {
            return Ok(());
        }
        let mut touched: Vec<String> = Vec::new();
        let mut added: Vec<String> = Vec::new();

        for definition in vertices {
            if self.vertices.contains_key(&definition.id) {
                return Err(GraphError::DuplicateVertex(definition.id));
            }
            let unit = self.registry.create(&definition)?;
            let document = serde_json::to_value(&definition)?;
            let vertex = Vertex::new(definition, unit)?;
            let id = vertex.id().to_string();

            self.vertices.insert(id.clone(), vertex);
            if self.state.prepared {
                self.state.vertices_to_run.insert(id.clone());
            }
            self.record_mutation(StructuralChange::AddVertex { vertex: document });
            added.push(id.clone());
            touched.push(id);
        }

        for edge in edges {
            check_edge_fields(&self.vertices, &edge)?;
            if self.state.prepared {
                let target_decided = self.state.activation.is_activated(&edge.target)
                    || self.state.activation.is_inactivated(&edge.target)
                    || self
                        .vertices
                        .get(&edge.target)
                        .map_or(false, |v| v.status() != VertexStatus::Pending);
                if target_decided {
                    return Err(GraphError::Validation(format!(
                        "cannot add edge {} into vertex '{}', which already ran or was inactivated",
                        edge, edge.target
                    )));
                }
            }
            self.edges.insert(edge.clone())?;
            touched.push(edge.target.clone());
            self.record_mutation(StructuralChange::AddEdge { edge: edge.into() });
        }

        for id in &added {
            if let Some(vertex) = self.vertices.get(id) {
                check_required_inputs(vertex, &self.edges)?;
            }
        }
        compute_layers(self.vertices.keys(), &self.edges)?;

        if self.state.prepared {
            self.state.layers = compute_layers(self.state.vertices_to_run.iter(), &self.edges)?;
            touched.sort();
            touched.dedup();
            sort_by_priority(&mut touched, &self.edges);
            for id in &touched {
                self.settle(id)?;
            }
        }

        tracing::debug!(
            run_id = %self.run_id,
            mutation_step = self.state.mutation_step,
            "structural mutation applied"
        );
        Ok(())
    }

    fn record_mutation(&mut self, change: StructuralChange) {
        self.state.mutation_step += 1;
        self.state.mutations.push(MutationRecord {
            mutation_step: self.state.mutation_step,
            change,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> FlowDefinition {
        FlowDefinition::new("chain")
            .vertex(VertexDefinition::new("chat_input", "chat_input").as_input())
            .vertex(VertexDefinition::new("text_output", "text_output"))
            .vertex(VertexDefinition::new("chat_output", "chat_output").as_output())
            .edge("chat_input", "message", "text_output", "input_value")
            .edge("text_output", "text", "chat_output", "input_value")
    }

    #[test]
    fn test_build_and_prepare() {
        let mut graph = Graph::builder(chain()).build().unwrap();
        assert!(!graph.is_prepared());
        assert_eq!(graph.layers().unwrap().len(), 3);

        graph.prepare(RunScope::Full).unwrap();
        assert_eq!(graph.first_layer(), &["chat_input".to_string()]);
        assert_eq!(graph.queue().to_vec(), vec!["chat_input".to_string()]);
        assert_eq!(graph.vertices_to_run().len(), 3);
    }

    #[test]
    fn test_build_rejects_unknown_fields() {
        let bad_output = chain().edge("chat_input", "nope", "chat_output", "other");
        let err = Graph::builder(bad_output).build().unwrap_err();
        assert!(matches!(err, GraphError::UnknownField { ref direction, .. } if direction == "output"));

        let bad_input = FlowDefinition::new("f")
            .vertex(VertexDefinition::new("a", "passthrough"))
            .vertex(VertexDefinition::new("b", "passthrough"))
            .edge("a", "output", "b", "missing");
        let err = Graph::builder(bad_input).build().unwrap_err();
        assert!(matches!(err, GraphError::UnknownField { ref direction, .. } if direction == "input"));
    }

    #[test]
    fn test_build_rejects_unresolved_input() {
        let flow = FlowDefinition::new("router")
            .vertex(VertexDefinition::new("router", "conditional_router"));
        let err = Graph::builder(flow).build().unwrap_err();
        assert!(matches!(err, GraphError::UnresolvedInput { ref input, .. } if input == "input_value"));
        assert!(err.is_definition_error());
    }

    #[test]
    fn test_build_rejects_cycle() {
        let flow = FlowDefinition::new("loop")
            .vertex(VertexDefinition::new("a", "passthrough"))
            .vertex(VertexDefinition::new("b", "passthrough"))
            .edge("a", "output", "b", "input_value")
            .edge("b", "output", "a", "input_value");
        assert!(matches!(
            Graph::builder(flow).build(),
            Err(GraphError::Cycle { .. })
        ));
    }

    #[test]
    fn test_stop_at_scope() {
        let flow = chain()
            .vertex(VertexDefinition::new("side", "passthrough"))
            .edge("chat_input", "message", "side", "input_value");
        let mut graph = Graph::builder(flow).build().unwrap();

        graph
            .prepare(RunScope::StopAt("text_output".to_string()))
            .unwrap();
        assert!(graph.activation().is_inactivated("chat_output"));
        assert!(graph.activation().is_inactivated("side"));
        assert_eq!(graph.vertex("side").unwrap().status(), VertexStatus::Stopped);
        assert_eq!(graph.run_layers().len(), 2);

        assert!(graph.prepare(RunScope::StopAt("ghost".to_string())).is_err());
    }

    #[test]
    fn test_mutation_is_all_or_nothing() {
        let mut graph = Graph::builder(chain()).build().unwrap();
        graph.prepare(RunScope::Full).unwrap();

        let err = graph
            .apply_mutations(
                vec![VertexDefinition::new("extra", "passthrough")],
                vec![Edge::new("chat_output", "message", "chat_input", "input_value")],
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        assert!(!graph.contains_vertex("extra"));
        assert_eq!(graph.mutation_step(), 0);

        graph
            .add_vertex(VertexDefinition::new("extra", "passthrough"))
            .unwrap();
        assert_eq!(graph.mutation_step(), 1);
        assert_eq!(graph.mutations().len(), 1);
        // no inputs bound, so it is ready straight away
        assert!(graph.queue().contains("extra"));

        graph
            .add_edge(Edge::new("chat_input", "message", "extra", "input_value"))
            .unwrap();
        assert_eq!(graph.mutation_step(), 2);
        assert!(!graph.queue().contains("extra"));
    }
}
