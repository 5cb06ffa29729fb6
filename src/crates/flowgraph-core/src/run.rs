//! The execution loop
//!
//! One call to [`Graph::astep`] performs one step: pop the head of the run
//! queue, resolve its inputs, execute its unit, and commit the outcome. The
//! commit is synchronous and happens after the only await point, so a step is
//! either fully applied (activation, results, context writes, structural
//! mutations, downstream enqueueing) or not applied at all. Dropping the step
//! future leaves the graph at the previous step boundary.
//!
//! With per-step checkpointing the commit is staged on a copy of the graph and
//! swapped in only once its snapshot is stored. A failed write leaves the graph
//! at the previous boundary, so the step runs again on the next call.
//!
//! # Input states
//!
//! An edge-bound input is *satisfied* once its source activated without
//! stopping that output, *dead* when the source was inactivated or stopped the
//! branch, *blocked* when the source errored, and *pending* otherwise. A vertex
//! is enqueued once nothing is pending or blocked and at least one input is
//! satisfied. With only dead inputs it is inactivated, and that decision
//! propagates downstream. Dead inputs next to pending ones park the vertex in
//! `conditionally_excluded`.

use crate::builtins::INPUT_VALUE;
use crate::error::{GraphError, Result};
use crate::graph::{Graph, RunScope};
use crate::layering::sort_by_priority;
use crate::unit::{StepContext, UnitInputs, UnitOutcome, UnitOutputs};
use crate::vertex::{Vertex, VertexStatus};
use crate::{activation::to_sorted_list, config::RunConfig, SESSION_ID_KEY};
use flowgraph_checkpoint::{OutputsRecord, SnapshotConfig, SnapshotMetadata, SnapshotSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Which vertex results a run reports in its summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "vertices")]
pub enum OutputSelection {
    /// Every activated vertex
    #[default]
    All,
    /// Vertices flagged `is_output`
    OutputVertices,
    /// The listed vertex ids
    Only(Vec<String>),
}

impl OutputSelection {
    fn includes(&self, vertex: &Vertex) -> bool {
        match self {
            Self::All => true,
            Self::OutputVertices => vertex.is_output(),
            Self::Only(ids) => ids.iter().any(|id| id == vertex.id()),
        }
    }

    pub(crate) fn to_record(&self) -> OutputsRecord {
        let (mode, vertices) = match self {
            Self::All => ("all", Vec::new()),
            Self::OutputVertices => ("output_vertices", Vec::new()),
            Self::Only(ids) => ("only", ids.clone()),
        };
        OutputsRecord {
            mode: mode.to_string(),
            vertices,
        }
    }

    pub(crate) fn from_record(record: &OutputsRecord) -> Result<Self> {
        match record.mode.as_str() {
            "all" => Ok(Self::All),
            "output_vertices" => Ok(Self::OutputVertices),
            "only" => Ok(Self::Only(record.vertices.clone())),
            other => Err(GraphError::InvalidSnapshot(format!(
                "unknown output selection '{}'",
                other
            ))),
        }
    }
}

/// Trigger for a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Delivered to `input_value` of every input vertex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    #[serde(default)]
    pub outputs: OutputSelection,

    /// Stored in the context under [`SESSION_ID_KEY`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl RunRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_outputs(mut self, outputs: OutputSelection) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn only_outputs<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_outputs(OutputSelection::Only(ids.into_iter().map(Into::into).collect()))
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    /// The unit returned an error
    Execution,
    /// The unit exceeded the step timeout
    Timeout,
    /// The unit's outcome or mutations were rejected by the engine
    Rejected,
}

/// Failure of one step, delivered as data in the step event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
}

impl StepError {
    fn new(kind: StepErrorKind, error: &GraphError) -> Self {
        Self {
            kind,
            message: error.to_string(),
        }
    }

    fn execution(vertex: &str, error: GraphError) -> Self {
        let error = match error {
            wrapped @ GraphError::VertexExecution { .. } => wrapped,
            other => GraphError::vertex_execution(vertex, other.to_string()),
        };
        Self::new(StepErrorKind::Execution, &error)
    }

    fn timeout(vertex: &str, duration_ms: u64) -> Self {
        let error = GraphError::Timeout {
            operation: format!("execute vertex '{}'", vertex),
            duration_ms,
        };
        Self::new(StepErrorKind::Timeout, &error)
    }

    fn rejected(error: &GraphError) -> Self {
        Self::new(StepErrorKind::Rejected, error)
    }
}

/// Result of one executed vertex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// 1-based step index within the run
    pub step: u64,
    pub vertex_id: String,
    pub status: VertexStatus,
    pub outputs: UnitOutputs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stopped_branches: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub duration_ms: u64,
    pub mutation_step: u64,
}

impl StepResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Final state of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub steps: u64,
    /// Results of the selected output vertices that activated
    pub outputs: BTreeMap<String, UnitOutputs>,
    pub activated: Vec<String>,
    pub inactivated: Vec<String>,
    pub errored: Vec<String>,
    /// In-scope vertices that neither ran nor were inactivated
    pub pending: Vec<String>,
    pub mutation_step: u64,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.errored.is_empty()
    }
}

/// One item of a run's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Step(StepResult),
    Finish(RunSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum InputState {
    Satisfied,
    Dead,
    Blocked,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Ready,
    Waiting { has_dead: bool },
    Blocked,
    Dead,
}

impl Graph {
    /// Begin a run: prepare (keeping the last scope) unless the graph is
    /// freshly prepared, then apply the request.
    pub fn start(&mut self, request: RunRequest) -> Result<()> {
        let fresh = self.state.prepared && !self.state.finished && self.state.step_count == 0;
        if !fresh {
            let scope = self.state.scope.clone();
            self.prepare(scope)?;
        }

        if let OutputSelection::Only(ids) = &request.outputs {
            if let Some(unknown) = ids.iter().find(|id| !self.vertices.contains_key(*id)) {
                return Err(GraphError::unknown_vertex(unknown, "requested outputs"));
            }
        }

        self.state.run_input = request.input;
        self.state.outputs = request.outputs;
        if let Some(session_id) = request.session_id {
            self.state
                .context
                .set(SESSION_ID_KEY, Value::String(session_id));
        }

        tracing::info!(
            run_id = %self.run_id,
            graph = %self.name,
            queue = ?self.state.queue.to_vec(),
            "run started"
        );
        Ok(())
    }

    /// Convenience for `prepare(RunScope::StopAt(..))`
    pub fn stop_at(&mut self, vertex: impl Into<String>) -> Result<()> {
        self.prepare(RunScope::StopAt(vertex.into()))
    }

    /// Perform one step.
    ///
    /// Returns `Finish` once the queue is drained. Vertex failures come back as
    /// a `Step` event carrying a [`StepError`]; `Err` means the run cannot
    /// continue.
    pub async fn astep(&mut self, config: &RunConfig) -> Result<RunEvent> {
        if !self.state.prepared {
            return Err(GraphError::NotPrepared);
        }

        while let Some(head) = self.state.queue.peek() {
            if !self.state.activation.is_inactivated(head) {
                break;
            }
            tracing::debug!(vertex = %head, "skipping inactivated vertex");
            self.state.queue.pop();
        }

        let Some(vertex_id) = self.state.queue.peek().map(str::to_string) else {
            self.state.finished = true;
            let summary = self.summary();
            tracing::info!(
                run_id = %self.run_id,
                steps = summary.steps,
                errored = summary.errored.len(),
                "run finished"
            );
            return Ok(RunEvent::Finish(summary));
        };

        if self.state.step_count >= config.max_steps as u64 {
            tracing::warn!(run_id = %self.run_id, max_steps = config.max_steps, "step limit reached");
            return Err(GraphError::MaxStepsExceeded(config.max_steps));
        }

        let step = self.state.step_count + 1;
        let (inputs, unit) = {
            let vertex = self.vertices.get(&vertex_id).ok_or_else(|| {
                GraphError::Invariant(format!("queued vertex '{}' does not exist", vertex_id))
            })?;
            (self.resolve_inputs(vertex), Arc::clone(vertex.unit()))
        };
        let mut ctx = StepContext::new(
            vertex_id.as_str(),
            step as usize,
            self.run_id.as_str(),
            self.state.context.clone(),
        );

        tracing::debug!(vertex = %vertex_id, step, "executing vertex");
        let started = Instant::now();
        let span = tracing::debug_span!("step", vertex = %vertex_id, step);
        let execution = unit.execute(&inputs, &mut ctx).instrument(span);
        let outcome = match config.step_timeout() {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(result) => result.map_err(|e| StepError::execution(&vertex_id, e)),
                Err(_) => Err(StepError::timeout(&vertex_id, limit.as_millis() as u64)),
            },
            None => execution
                .await
                .map_err(|e| StepError::execution(&vertex_id, e)),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        if config.checkpoint_every_step && self.checkpointer.is_some() {
            let mut staged = self.clone();
            let result = staged.commit(&vertex_id, step, outcome, ctx, duration_ms)?;
            staged.persist_step(config, step).await?;
            *self = staged;
            return Ok(RunEvent::Step(result));
        }

        let result = self.commit(&vertex_id, step, outcome, ctx, duration_ms)?;
        Ok(RunEvent::Step(result))
    }

    /// Current summary, filtered by the run's output selection
    pub fn summary(&self) -> RunSummary {
        let outputs = self
            .vertices
            .values()
            .filter(|v| self.state.activation.is_activated(v.id()))
            .filter(|v| self.state.outputs.includes(v))
            .map(|v| (v.id().to_string(), v.results().clone()))
            .collect();
        let errored = self
            .vertices
            .values()
            .filter(|v| v.status() == VertexStatus::Errored)
            .map(|v| v.id().to_string())
            .collect();
        let pending = self
            .state
            .vertices_to_run
            .iter()
            .filter(|id| {
                !self.state.activation.is_activated(id)
                    && !self.state.activation.is_inactivated(id)
                    && self
                        .vertices
                        .get(*id)
                        .map_or(false, |v| v.status() == VertexStatus::Pending)
            })
            .cloned()
            .collect();

        RunSummary {
            run_id: self.run_id.clone(),
            steps: self.state.step_count,
            outputs,
            activated: to_sorted_list(self.state.activation.activated()),
            inactivated: to_sorted_list(self.state.activation.inactivated()),
            errored,
            pending,
            mutation_step: self.state.mutation_step,
        }
    }

    fn resolve_inputs(&self, vertex: &Vertex) -> UnitInputs {
        let mut inputs = UnitInputs::new();
        for field in vertex.input_fields() {
            let from_edge = self
                .edges
                .source_of(vertex.id(), &field.name)
                .filter(|edge| self.input_state(edge) == InputState::Satisfied)
                .and_then(|edge| {
                    self.vertices
                        .get(&edge.source)
                        .and_then(|source| source.results().get(&edge.source_output))
                        .cloned()
                });
            let from_run_input = (vertex.is_input() && field.name == INPUT_VALUE)
                .then(|| self.state.run_input.clone())
                .flatten();

            if let Some(value) = from_edge
                .or(from_run_input)
                .or_else(|| vertex.literal_for(&field.name))
            {
                inputs.insert(field.name.clone(), value);
            }
        }
        inputs
    }

    /// Check a unit's outcome against the vertex declaration
    fn check_outcome(
        &self,
        vertex_id: &str,
        outcome: UnitOutcome,
    ) -> std::result::Result<(UnitOutputs, Option<String>), StepError> {
        let vertex = self
            .vertices
            .get(vertex_id)
            .ok_or_else(|| StepError::rejected(&GraphError::unknown_vertex(vertex_id, "step")))?;

        let (mut outputs, branch) = match outcome {
            UnitOutcome::Outputs(outputs) => (outputs, None),
            UnitOutcome::StopBranch { branch, outputs } => (outputs, Some(branch)),
        };

        if let Some(undeclared) = outputs.keys().find(|key| !vertex.has_output(key)) {
            return Err(StepError::rejected(&GraphError::unknown_field(
                vertex_id, undeclared, "output",
            )));
        }

        if let Some(branch) = &branch {
            let is_successor = self.edges.successors(vertex_id).any(|s| s == branch);
            if !vertex.has_output(branch) && !is_successor {
                return Err(StepError::rejected(&GraphError::Validation(format!(
                    "vertex '{}' stopped unknown branch '{}'",
                    vertex_id, branch
                ))));
            }
            outputs.remove(branch);
        }

        Ok((outputs, branch))
    }

    fn commit(
        &mut self,
        vertex_id: &str,
        step: u64,
        outcome: std::result::Result<UnitOutcome, StepError>,
        ctx: StepContext,
        duration_ms: u64,
    ) -> Result<StepResult> {
        let checked = outcome.and_then(|o| self.check_outcome(vertex_id, o));
        let (outputs, branch) = match checked {
            Ok(checked) => checked,
            Err(error) => return self.commit_failure(vertex_id, step, error, duration_ms),
        };

        let effects = ctx.into_effects();
        if effects.vertices.is_empty() && effects.edges.is_empty() {
            self.commit_success(
                vertex_id,
                outputs.clone(),
                branch.clone(),
                effects.context,
                Vec::new(),
                Vec::new(),
            )?;
        } else {
            let mut staged = self.clone();
            let applied = staged.commit_success(
                vertex_id,
                outputs.clone(),
                branch.clone(),
                effects.context,
                effects.vertices,
                effects.edges,
            );
            match applied {
                Ok(()) => *self = staged,
                Err(error @ GraphError::Invariant(_)) => return Err(error),
                Err(error) => {
                    tracing::warn!(vertex = %vertex_id, error = %error, "structural mutation rejected");
                    let error = StepError::rejected(&error);
                    return self.commit_failure(vertex_id, step, error, duration_ms);
                }
            }
        }

        tracing::debug!(
            vertex = %vertex_id,
            step,
            duration_ms,
            stopped = ?branch,
            queue = ?self.state.queue.to_vec(),
            "vertex built"
        );

        Ok(StepResult {
            step,
            vertex_id: vertex_id.to_string(),
            status: VertexStatus::Built,
            outputs,
            stopped_branches: branch.into_iter().collect(),
            error: None,
            duration_ms,
            mutation_step: self.state.mutation_step,
        })
    }

    fn pop_head(&mut self, vertex_id: &str) -> Result<()> {
        match self.state.queue.pop() {
            Some(head) if head == vertex_id => {}
            other => {
                return Err(GraphError::Invariant(format!(
                    "expected '{}' at the head of the queue, found {:?}",
                    vertex_id, other
                )))
            }
        }
        self.state.call_order.push(vertex_id.to_string());
        self.state.step_count += 1;
        Ok(())
    }

    fn commit_success(
        &mut self,
        vertex_id: &str,
        outputs: UnitOutputs,
        branch: Option<String>,
        context: Option<crate::context::ContextStore>,
        new_vertices: Vec<crate::definition::VertexDefinition>,
        new_edges: Vec<crate::edge::Edge>,
    ) -> Result<()> {
        self.pop_head(vertex_id)?;

        let vertex = self
            .vertices
            .get_mut(vertex_id)
            .ok_or_else(|| GraphError::Invariant(format!("vertex '{}' vanished", vertex_id)))?;
        vertex.state.status = VertexStatus::Built;
        vertex.state.results = outputs;
        vertex.state.stopped_branches = branch.into_iter().collect();
        vertex.state.error = None;

        if let Some(context) = context {
            self.state.context = context;
        }

        self.apply_structural(new_vertices, new_edges)?;

        self.state.activation.activate(vertex_id)?;
        self.propagate(vertex_id)
    }

    fn commit_failure(
        &mut self,
        vertex_id: &str,
        step: u64,
        error: StepError,
        duration_ms: u64,
    ) -> Result<StepResult> {
        self.pop_head(vertex_id)?;
        if let Some(vertex) = self.vertices.get_mut(vertex_id) {
            vertex.state.status = VertexStatus::Errored;
            vertex.state.results.clear();
            vertex.state.error = Some(error.message.clone());
        }

        tracing::warn!(
            vertex = %vertex_id,
            step,
            kind = ?error.kind,
            error = %error.message,
            "vertex failed"
        );
        self.propagate(vertex_id)?;

        Ok(StepResult {
            step,
            vertex_id: vertex_id.to_string(),
            status: VertexStatus::Errored,
            outputs: UnitOutputs::new(),
            stopped_branches: Vec::new(),
            error: Some(error),
            duration_ms,
            mutation_step: self.state.mutation_step,
        })
    }

    /// Re-evaluate the direct successors of `id`, highest priority first
    fn propagate(&mut self, id: &str) -> Result<()> {
        let mut successors: Vec<String> = self.edges.successors(id).cloned().collect();
        sort_by_priority(&mut successors, &self.edges);
        for successor in &successors {
            self.settle(successor)?;
        }
        Ok(())
    }

    fn input_state(&self, edge: &crate::edge::Edge) -> InputState {
        if self.state.activation.is_inactivated(&edge.source) {
            return InputState::Dead;
        }
        let Some(source) = self.vertices.get(&edge.source) else {
            return InputState::Pending;
        };
        let stopped = source.stopped_branches();
        if stopped.contains(&edge.source_output) || stopped.contains(&edge.target) {
            return InputState::Dead;
        }
        if self.state.activation.is_activated(&edge.source) {
            return InputState::Satisfied;
        }
        if source.status() == VertexStatus::Errored {
            return InputState::Blocked;
        }
        InputState::Pending
    }

    fn readiness(&self, id: &str) -> Readiness {
        let states: BTreeSet<InputState> = self
            .edges
            .incoming(id)
            .map(|edge| self.input_state(edge))
            .collect();

        if states.is_empty() {
            Readiness::Ready
        } else if states.contains(&InputState::Blocked) {
            Readiness::Blocked
        } else if states.contains(&InputState::Pending) {
            Readiness::Waiting {
                has_dead: states.contains(&InputState::Dead),
            }
        } else if states.contains(&InputState::Satisfied) {
            Readiness::Ready
        } else {
            Readiness::Dead
        }
    }

    /// Decide what happens to an undecided vertex given its inputs so far
    pub(crate) fn settle(&mut self, id: &str) -> Result<()> {
        if !self.state.vertices_to_run.contains(id)
            || self.state.activation.is_activated(id)
            || self.state.activation.is_inactivated(id)
            || self
                .vertices
                .get(id)
                .map_or(true, |v| v.status() != VertexStatus::Pending)
        {
            return Ok(());
        }

        match self.readiness(id) {
            Readiness::Ready => {
                self.state.activation.release(id);
                if self.state.queue.push(id.to_string()) {
                    tracing::debug!(vertex = %id, "vertex enqueued");
                }
            }
            Readiness::Waiting { has_dead } => {
                if has_dead {
                    self.state.activation.exclude(id)?;
                }
                self.state.queue.remove(id);
            }
            Readiness::Blocked => {
                self.state.activation.release(id);
                self.state.queue.remove(id);
                tracing::debug!(vertex = %id, "vertex blocked by failed upstream");
            }
            Readiness::Dead => {
                self.state.queue.remove(id);
                self.state.activation.inactivate(id)?;
                if let Some(vertex) = self.vertices.get_mut(id) {
                    vertex.state.status = VertexStatus::Stopped;
                }
                tracing::debug!(vertex = %id, "vertex inactivated, all inputs stopped");
                self.propagate(id)?;
            }
        }
        Ok(())
    }

    async fn persist_step(&self, config: &RunConfig, step: u64) -> Result<()> {
        let (Some(saver), Some(thread_id)) = (&self.checkpointer, &config.thread_id) else {
            return Ok(());
        };
        let snapshot = crate::checkpoint::CheckpointManager::snapshot(self);
        let metadata = SnapshotMetadata::new()
            .with_source(SnapshotSource::Step)
            .with_step(step)
            .with_run_id(self.run_id.as_str());
        let stored = saver
            .put(&SnapshotConfig::new().with_thread_id(thread_id.as_str()), snapshot, metadata)
            .await?;
        tracing::debug!(step, snapshot_id = ?stored.snapshot_id, "step snapshot stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{FlowDefinition, VertexDefinition};
    use crate::unit::{FnUnit, UnitRegistry};
    use crate::builtins::builtin_registry;
    use serde_json::json;

    fn registry() -> UnitRegistry {
        builtin_registry().with_unit(
            "fail",
            Arc::new(FnUnit::new(&[], &["output"], |_| {
                Box::pin(async { Err(GraphError::Validation("boom".to_string())) })
            })),
        )
    }

    #[tokio::test]
    async fn test_astep_requires_prepare() {
        let flow = FlowDefinition::new("one").vertex(VertexDefinition::new("a", "passthrough"));
        let mut graph = Graph::new(flow, registry()).unwrap();
        assert!(matches!(
            graph.astep(&RunConfig::default()).await,
            Err(GraphError::NotPrepared)
        ));
    }

    #[tokio::test]
    async fn test_literal_inputs_and_finish() {
        let flow = FlowDefinition::new("one").vertex(
            VertexDefinition::new("a", "passthrough").with_param("input_value", json!("lit")),
        );
        let mut graph = Graph::new(flow, registry()).unwrap();
        graph.start(RunRequest::new()).unwrap();

        let config = RunConfig::default();
        let RunEvent::Step(step) = graph.astep(&config).await.unwrap() else {
            panic!("expected a step");
        };
        assert_eq!(step.outputs.get("output"), Some(&json!("lit")));
        assert_eq!(step.step, 1);
        assert!(matches!(graph.astep(&config).await.unwrap(), RunEvent::Finish(_)));
        assert!(graph.is_finished());
    }

    #[tokio::test]
    async fn test_failed_vertex_blocks_dependents() {
        let flow = FlowDefinition::new("f")
            .vertex(VertexDefinition::new("a", "fail"))
            .vertex(VertexDefinition::new("b", "passthrough"))
            .vertex(VertexDefinition::new("c", "passthrough"))
            .edge("a", "output", "b", "input_value");
        let mut graph = Graph::new(flow, registry()).unwrap();
        graph.start(RunRequest::new()).unwrap();

        let config = RunConfig::default();
        let mut errors = Vec::new();
        loop {
            match graph.astep(&config).await.unwrap() {
                RunEvent::Step(step) => errors.extend(step.error),
                RunEvent::Finish(summary) => {
                    assert_eq!(summary.errored, vec!["a".to_string()]);
                    assert_eq!(summary.activated, vec!["c".to_string()]);
                    assert_eq!(summary.pending, vec!["b".to_string()]);
                    break;
                }
            }
        }
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, StepErrorKind::Execution);
        assert!(errors[0].message.contains("boom"));
        assert_eq!(graph.vertex("a").unwrap().status(), VertexStatus::Errored);
    }

    #[tokio::test]
    async fn test_unknown_requested_output() {
        let flow = FlowDefinition::new("one").vertex(VertexDefinition::new("a", "passthrough"));
        let mut graph = Graph::new(flow, registry()).unwrap();
        let err = graph
            .start(RunRequest::new().only_outputs(["ghost"]))
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownVertex { .. }));
    }

    #[tokio::test]
    async fn test_session_id_lands_in_context() {
        let flow = FlowDefinition::new("one").vertex(VertexDefinition::new("a", "passthrough"));
        let mut graph = Graph::new(flow, registry()).unwrap();
        graph
            .start(RunRequest::new().with_session_id("s-1"))
            .unwrap();
        assert_eq!(graph.context().get(SESSION_ID_KEY), Some(&json!("s-1")));
    }
}
