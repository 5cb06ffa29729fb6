//! Processing-unit interface
//!
//! The engine knows nothing about what a vertex computes. Each vertex wraps an
//! opaque [`ProcessingUnit`] that declares its input and output fields and
//! exposes one async `execute`. How the unit came to exist (compiled in,
//! loaded from a plugin, sandboxed) is outside the scheduler.
//!
//! Units are created through a [`UnitRegistry`] that the graph receives at
//! construction. The same registry resolves vertices added while a run is in
//! progress.

use crate::context::ContextStore;
use crate::definition::VertexDefinition;
use crate::edge::Edge;
use crate::error::{GraphError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Resolved input values handed to a unit, keyed by input field
pub type UnitInputs = BTreeMap<String, Value>;

/// Output values produced by a unit, keyed by output field
pub type UnitOutputs = BTreeMap<String, Value>;

/// Declared input or output field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    /// Free-form type description, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,

    /// A required input must be bound by an edge, literal or default
    #[serde(default = "FieldSpec::default_required")]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldSpec {
    fn default_required() -> bool {
        true
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_hint: None,
            required: true,
            default: None,
        }
    }

    pub fn with_type(mut self, type_hint: impl Into<String>) -> Self {
        self.type_hint = Some(type_hint.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// What a unit returns from a successful execution
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    /// Deliver all outputs
    Outputs(UnitOutputs),

    /// Deliver `outputs`, but stop `branch`: nothing reachable only through it
    /// runs in this run. `branch` names one of the vertex's own output fields,
    /// or one of its direct successors.
    StopBranch { branch: String, outputs: UnitOutputs },
}

impl UnitOutcome {
    pub fn outputs<K, I>(outputs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Outputs(outputs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn stop_branch<K, I>(branch: impl Into<String>, outputs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::StopBranch {
            branch: branch.into(),
            outputs: outputs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Opaque capability behind a vertex
#[async_trait]
pub trait ProcessingUnit: Send + Sync {
    /// Declared input fields
    fn input_fields(&self) -> Vec<FieldSpec>;

    /// Declared output fields
    fn output_fields(&self) -> Vec<FieldSpec>;

    /// Run once with resolved inputs.
    ///
    /// Anything written through `ctx` is applied only if the step commits.
    async fn execute(&self, inputs: &UnitInputs, ctx: &mut StepContext) -> Result<UnitOutcome>;
}

/// Per-step handle a unit uses to touch run state.
///
/// Reads see the run context as of the start of the step plus this step's own
/// writes. Context writes and structural mutations are staged and applied
/// atomically when the step commits; a failed or cancelled step applies nothing.
#[derive(Debug, Clone)]
pub struct StepContext {
    vertex_id: String,
    step: usize,
    run_id: String,
    context: ContextStore,
    context_dirty: bool,
    new_vertices: Vec<VertexDefinition>,
    new_edges: Vec<Edge>,
}

/// Staged effects of one step
#[derive(Debug, Default)]
pub(crate) struct StagedEffects {
    pub context: Option<ContextStore>,
    pub vertices: Vec<VertexDefinition>,
    pub edges: Vec<Edge>,
}

impl StepContext {
    pub fn new(
        vertex_id: impl Into<String>,
        step: usize,
        run_id: impl Into<String>,
        context: ContextStore,
    ) -> Self {
        Self {
            vertex_id: vertex_id.into(),
            step,
            run_id: run_id.into(),
            context,
            context_dirty: false,
            new_vertices: Vec::new(),
            new_edges: Vec::new(),
        }
    }

    /// Id of the vertex being executed
    pub fn vertex_id(&self) -> &str {
        &self.vertex_id
    }

    /// 1-based index of this step in the run
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn session_id(&self) -> Option<&str> {
        self.context.get(crate::SESSION_ID_KEY).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.context_dirty = true;
        self.context.set(key, value)
    }

    pub fn append(&mut self, key: impl Into<String>, value: Value) {
        self.context_dirty = true;
        self.context.append(key, value)
    }

    pub fn increment(&mut self, key: &str, by: i64) -> Result<i64> {
        let value = self.context.increment(key, by)?;
        self.context_dirty = true;
        Ok(value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.context.remove(key);
        self.context_dirty |= removed.is_some();
        removed
    }

    /// Request a new vertex, created through the graph's registry at commit
    pub fn add_vertex(&mut self, vertex: VertexDefinition) {
        self.new_vertices.push(vertex);
    }

    /// Request a new edge, applied after any vertices requested in this step
    pub fn add_edge(&mut self, edge: Edge) {
        self.new_edges.push(edge);
    }

    pub(crate) fn into_effects(self) -> StagedEffects {
        StagedEffects {
            context: self.context_dirty.then_some(self.context),
            vertices: self.new_vertices,
            edges: self.new_edges,
        }
    }
}

/// Factory that builds a unit for a vertex definition
pub type UnitFactory =
    Arc<dyn Fn(&VertexDefinition) -> Result<Arc<dyn ProcessingUnit>> + Send + Sync>;

/// Maps unit type names to factories
#[derive(Clone, Default)]
pub struct UnitRegistry {
    factories: HashMap<String, UnitFactory>,
}

impl fmt::Debug for UnitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `unit_type`, replacing any previous one
    pub fn register<F>(&mut self, unit_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&VertexDefinition) -> Result<Arc<dyn ProcessingUnit>> + Send + Sync + 'static,
    {
        self.factories.insert(unit_type.into(), Arc::new(factory));
        self
    }

    /// Register one shared unit instance for every vertex of `unit_type`
    pub fn register_unit(
        &mut self,
        unit_type: impl Into<String>,
        unit: Arc<dyn ProcessingUnit>,
    ) -> &mut Self {
        self.register(unit_type, move |_| Ok(Arc::clone(&unit)))
    }

    pub fn with_unit(mut self, unit_type: impl Into<String>, unit: Arc<dyn ProcessingUnit>) -> Self {
        self.register_unit(unit_type, unit);
        self
    }

    pub fn contains(&self, unit_type: &str) -> bool {
        self.factories.contains_key(unit_type)
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate the unit for `vertex`
    pub fn create(&self, vertex: &VertexDefinition) -> Result<Arc<dyn ProcessingUnit>> {
        let factory = self.factories.get(&vertex.unit).ok_or_else(|| GraphError::UnknownUnit {
            vertex: vertex.id.clone(),
            unit: vertex.unit.clone(),
        })?;
        factory(vertex)
    }
}

type UnitFn = dyn Fn(UnitInputs) -> BoxFuture<'static, Result<UnitOutcome>> + Send + Sync;

/// Unit backed by an async closure over its inputs.
///
/// For units that need no context access; implement [`ProcessingUnit`]
/// directly otherwise.
///
/// ```rust
/// use flowgraph_core::{FnUnit, UnitOutcome};
/// use serde_json::json;
///
/// let upper = FnUnit::new(&["input_value"], &["text"], |inputs| {
///     Box::pin(async move {
///         let text = inputs["input_value"].as_str().unwrap_or_default().to_uppercase();
///         Ok(UnitOutcome::outputs([("text", json!(text))]))
///     })
/// });
/// ```
pub struct FnUnit {
    inputs: Vec<FieldSpec>,
    outputs: Vec<FieldSpec>,
    func: Arc<UnitFn>,
}

impl FnUnit {
    pub fn new<F>(inputs: &[&str], outputs: &[&str], func: F) -> Self
    where
        F: Fn(UnitInputs) -> BoxFuture<'static, Result<UnitOutcome>> + Send + Sync + 'static,
    {
        Self {
            inputs: inputs.iter().map(|name| FieldSpec::new(*name)).collect(),
            outputs: outputs.iter().map(|name| FieldSpec::new(*name)).collect(),
            func: Arc::new(func),
        }
    }

    /// Replace the declared input fields
    pub fn with_input_fields(mut self, inputs: Vec<FieldSpec>) -> Self {
        self.inputs = inputs;
        self
    }
}

#[async_trait]
impl ProcessingUnit for FnUnit {
    fn input_fields(&self) -> Vec<FieldSpec> {
        self.inputs.clone()
    }

    fn output_fields(&self) -> Vec<FieldSpec> {
        self.outputs.clone()
    }

    async fn execute(&self, inputs: &UnitInputs, _ctx: &mut StepContext) -> Result<UnitOutcome> {
        (self.func)(inputs.clone()).await
    }
}
