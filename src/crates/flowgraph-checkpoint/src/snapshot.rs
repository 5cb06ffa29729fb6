//! Plain-data snapshot of a graph run
//!
//! A [`Snapshot`] is the complete, serializable run state of one graph at a step
//! boundary: edge table, run queue, layering, context, activation sets and the
//! structural mutation counter. Every field is a number, string, boolean, ordered
//! list or string-keyed map, so a snapshot survives any generic interchange
//! format (JSON, YAML, a database JSON column) without custom encoders.
//!
//! Set-typed run state is encoded as sorted lists. Decoding from an untyped
//! document goes through [`Snapshot::from_value`], which reports the first absent
//! required key as [`CheckpointError::MissingField`] before any typed decoding.
//!
//! # Document shape
//!
//! ```text
//! {
//!   "version": 1,
//!   "run_manager": { "edges": [...], "vertices_to_run": [...] },
//!   "queue": ["b", "c"],
//!   "layers": [["a"], ["b", "c"]],
//!   "first_layer": ["a"],
//!   "context": { "session_id": "s-1" },
//!   "activated": ["a"],
//!   "inactivated": [],
//!   "conditionally_excluded": [],
//!   "mutation_step": 0,
//!   ...
//! }
//! ```

use crate::error::{CheckpointError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Unique identifier for a stored snapshot
pub type SnapshotId = String;

/// Top-level keys that must be present in every snapshot document
pub const REQUIRED_FIELDS: &[&str] = &[
    "run_manager",
    "queue",
    "layers",
    "context",
    "activated",
    "inactivated",
    "conditionally_excluded",
    "mutation_step",
];

/// One directed edge, `(source, source_output) -> (target, target_input)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub source: String,
    pub source_output: String,
    pub target: String,
    pub target_input: String,
}

/// Scheduler bookkeeping carried alongside the queue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunManagerState {
    /// Every edge of the graph at snapshot time
    pub edges: Vec<EdgeRecord>,

    /// Vertices in scope for this run
    #[serde(default)]
    pub vertices_to_run: Vec<String>,
}

/// A structural change applied to the graph while it was running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralChange {
    /// A vertex was added; `vertex` holds its definition document
    AddVertex { vertex: Value },
    /// An edge was added
    AddEdge { edge: EdgeRecord },
}

/// Mutation log entry, tagged with the counter value it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub mutation_step: u64,
    #[serde(flatten)]
    pub change: StructuralChange,
}

/// Which vertices a run reports in its final outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputsRecord {
    /// `all`, `output_vertices` or `only`
    pub mode: String,

    /// Requested vertices when `mode` is `only`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vertices: Vec<String>,
}

/// Point-in-time run state of one graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Format version
    #[serde(default = "Snapshot::default_version")]
    pub version: u32,

    /// Identifier of the run this state belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    pub run_manager: RunManagerState,
    pub queue: Vec<String>,
    pub layers: Vec<Vec<String>>,

    #[serde(default)]
    pub first_layer: Vec<String>,

    pub context: BTreeMap<String, Value>,
    pub activated: Vec<String>,
    pub inactivated: Vec<String>,
    pub conditionally_excluded: Vec<String>,
    pub mutation_step: u64,

    /// Delivered outputs per activated vertex
    #[serde(default)]
    pub vertex_results: BTreeMap<String, BTreeMap<String, Value>>,

    /// Per-vertex status (`pending`, `built`, `errored`, `stopped`)
    #[serde(default)]
    pub vertex_status: BTreeMap<String, String>,

    /// Failure message per errored vertex
    #[serde(default)]
    pub vertex_errors: BTreeMap<String, String>,

    /// Branches each vertex stopped
    #[serde(default)]
    pub stopped_branches: BTreeMap<String, Vec<String>>,

    /// Vertex ids in the order they executed
    #[serde(default)]
    pub call_order: Vec<String>,

    #[serde(default)]
    pub mutations: Vec<MutationRecord>,

    /// Executed steps so far
    #[serde(default)]
    pub step_count: u64,

    /// Initial input value of the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_input: Option<Value>,

    /// Output selection of the run; absent means every activated vertex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<OutputsRecord>,

    /// Whether the run had been prepared when captured
    #[serde(default = "Snapshot::default_prepared")]
    pub prepared: bool,

    /// Whether the run had already drained its queue
    #[serde(default)]
    pub finished: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Current snapshot format version
    pub const CURRENT_VERSION: u32 = 1;

    fn default_version() -> u32 {
        Self::CURRENT_VERSION
    }

    fn default_prepared() -> bool {
        true
    }

    /// Create an empty snapshot
    pub fn empty() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            run_id: None,
            run_manager: RunManagerState::default(),
            queue: Vec::new(),
            layers: Vec::new(),
            first_layer: Vec::new(),
            context: BTreeMap::new(),
            activated: Vec::new(),
            inactivated: Vec::new(),
            conditionally_excluded: Vec::new(),
            mutation_step: 0,
            vertex_results: BTreeMap::new(),
            vertex_status: BTreeMap::new(),
            vertex_errors: BTreeMap::new(),
            stopped_branches: BTreeMap::new(),
            call_order: Vec::new(),
            mutations: Vec::new(),
            step_count: 0,
            run_input: None,
            outputs: None,
            prepared: true,
            finished: false,
            created_at: Utc::now(),
        }
    }

    /// Decode a snapshot from an untyped document.
    ///
    /// Fails with [`CheckpointError::MissingField`] naming the first absent
    /// required key, or [`CheckpointError::Invalid`] if the document is not a map.
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| CheckpointError::Invalid("snapshot document must be a map".to_string()))?;

        if let Some(missing) = REQUIRED_FIELDS.iter().find(|key| !object.contains_key(**key)) {
            return Err(CheckpointError::MissingField((*missing).to_string()));
        }

        let edges_present = object
            .get("run_manager")
            .and_then(Value::as_object)
            .map(|run_manager| run_manager.contains_key("edges"))
            .unwrap_or(false);
        if !edges_present {
            return Err(CheckpointError::MissingField("run_manager.edges".to_string()));
        }

        Ok(serde_json::from_value(value.clone())?)
    }

    /// Encode into an untyped document
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Every vertex id referenced by run-state fields, paired with the field name.
    ///
    /// Edge endpoints are not included; callers validate edges separately.
    pub fn vertex_references(&self) -> Vec<(&'static str, &str)> {
        let mut refs = Vec::new();
        let lists: [(&'static str, &Vec<String>); 7] = [
            ("queue", &self.queue),
            ("first_layer", &self.first_layer),
            ("activated", &self.activated),
            ("inactivated", &self.inactivated),
            ("conditionally_excluded", &self.conditionally_excluded),
            ("run_manager.vertices_to_run", &self.run_manager.vertices_to_run),
            ("call_order", &self.call_order),
        ];
        for (field, ids) in lists {
            refs.extend(ids.iter().map(|id| (field, id.as_str())));
        }
        for layer in &self.layers {
            refs.extend(layer.iter().map(|id| ("layers", id.as_str())));
        }
        refs.extend(self.vertex_results.keys().map(|id| ("vertex_results", id.as_str())));
        refs.extend(self.vertex_status.keys().map(|id| ("vertex_status", id.as_str())));
        refs.extend(self.vertex_errors.keys().map(|id| ("vertex_errors", id.as_str())));
        refs.extend(self.stopped_branches.keys().map(|id| ("stopped_branches", id.as_str())));
        if let Some(outputs) = &self.outputs {
            refs.extend(outputs.vertices.iter().map(|id| ("outputs", id.as_str())));
        }
        refs
    }
}

/// Where a stored snapshot came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// Captured when a run was started with its input
    Input,
    /// Captured by the execution loop after a committed step
    Step,
    /// Captured explicitly by a caller
    Manual,
}

/// Metadata stored next to a snapshot
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SnapshotMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SnapshotSource>,

    /// Step count at capture time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    /// Additional custom metadata
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SnapshotMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: SnapshotSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// True when every `(key, value)` in `filter` matches this metadata.
    ///
    /// Keys are compared against the serialized form, so `source`, `step` and
    /// `run_id` can be filtered on as well as custom keys.
    pub fn matches(&self, filter: &BTreeMap<String, Value>) -> bool {
        let Ok(Value::Object(fields)) = serde_json::to_value(self) else {
            return false;
        };
        filter
            .iter()
            .all(|(key, expected)| fields.get(key) == Some(expected))
    }
}

/// Addresses a snapshot: a thread (one logical run history) and optionally a
/// specific snapshot within it
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SnapshotConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<SnapshotId>,
}

impl SnapshotConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_snapshot_id(mut self, snapshot_id: impl Into<SnapshotId>) -> Self {
        self.snapshot_id = Some(snapshot_id.into());
        self
    }
}

/// A stored snapshot with its address and metadata
#[derive(Debug, Clone)]
pub struct SnapshotTuple {
    pub config: SnapshotConfig,
    pub snapshot: Snapshot,
    pub metadata: SnapshotMetadata,
    pub parent_config: Option<SnapshotConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::empty();
        snapshot.run_manager.edges.push(EdgeRecord {
            source: "a".to_string(),
            source_output: "out".to_string(),
            target: "b".to_string(),
            target_input: "in".to_string(),
        });
        snapshot.queue = vec!["b".to_string()];
        snapshot.layers = vec![vec!["a".to_string()], vec!["b".to_string()]];
        snapshot.activated = vec!["a".to_string()];
        snapshot.context.insert("session_id".to_string(), json!("s-1"));
        snapshot.mutations.push(MutationRecord {
            mutation_step: 1,
            change: StructuralChange::AddEdge {
                edge: snapshot.run_manager.edges[0].clone(),
            },
        });
        snapshot
    }

    #[test]
    fn test_value_round_trip() {
        let snapshot = sample();
        let value = snapshot.to_value().unwrap();
        let restored = Snapshot::from_value(&value).unwrap();
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn test_missing_required_field() {
        let mut value = sample().to_value().unwrap();
        value.as_object_mut().unwrap().remove("queue");

        let err = Snapshot::from_value(&value).unwrap_err();
        assert!(matches!(err, CheckpointError::MissingField(ref f) if f == "queue"));
    }

    #[test]
    fn test_missing_edge_table() {
        let mut value = sample().to_value().unwrap();
        value["run_manager"] = json!({ "vertices_to_run": [] });

        let err = Snapshot::from_value(&value).unwrap_err();
        assert!(matches!(err, CheckpointError::MissingField(ref f) if f == "run_manager.edges"));
    }

    #[test]
    fn test_optional_fields_default() {
        let value = json!({
            "run_manager": { "edges": [] },
            "queue": [],
            "layers": [],
            "context": {},
            "activated": [],
            "inactivated": [],
            "conditionally_excluded": [],
            "mutation_step": 0
        });
        let snapshot = Snapshot::from_value(&value).unwrap();
        assert_eq!(snapshot.version, Snapshot::CURRENT_VERSION);
        assert!(snapshot.prepared);
        assert!(!snapshot.finished);
        assert!(snapshot.outputs.is_none());
        assert!(snapshot.call_order.is_empty());
    }

    #[test]
    fn test_non_map_document_rejected() {
        let err = Snapshot::from_value(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, CheckpointError::Invalid(_)));
    }

    #[test]
    fn test_mutation_record_is_flat() {
        let record = sample().mutations[0].clone();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], json!("add_edge"));
        assert_eq!(value["mutation_step"], json!(1));
    }

    #[test]
    fn test_vertex_references_cover_layers() {
        let snapshot = sample();
        let refs = snapshot.vertex_references();
        assert!(refs.contains(&("layers", "a")));
        assert!(refs.contains(&("queue", "b")));
    }

    #[test]
    fn test_output_selection_is_referenced() {
        let mut snapshot = sample();
        snapshot.outputs = Some(OutputsRecord {
            mode: "only".to_string(),
            vertices: vec!["ghost".to_string()],
        });
        assert!(snapshot.vertex_references().contains(&("outputs", "ghost")));

        let value = snapshot.to_value().unwrap();
        assert_eq!(value["outputs"], json!({ "mode": "only", "vertices": ["ghost"] }));
    }

    #[test]
    fn test_metadata_filter() {
        let metadata = SnapshotMetadata::new()
            .with_source(SnapshotSource::Step)
            .with_step(2)
            .with_extra("flow", json!("demo"));

        let mut filter = BTreeMap::new();
        filter.insert("source".to_string(), json!("step"));
        filter.insert("flow".to_string(), json!("demo"));
        assert!(metadata.matches(&filter));

        filter.insert("step".to_string(), json!(3));
        assert!(!metadata.matches(&filter));
    }
}
