//! Error types for graph construction, execution and restore
//!
//! # Error Hierarchy
//!
//! ```text
//! GraphError
//! ├── Definition (fatal, never retried)
//! │   ├── Cycle / UnresolvedInput / UnknownVertex / UnknownField
//! │   ├── DuplicateVertex / DuplicateSource / UnknownUnit
//! │   └── Validation
//! ├── Restore (fatal to the restore call, graph untouched)
//! │   ├── MissingField / UnknownVertex
//! │   └── InvalidSnapshot / StructuralDrift
//! ├── Step (delivered as data inside step events)
//! │   ├── VertexExecution
//! │   └── Timeout
//! ├── Engine
//! │   ├── Invariant        - broken scheduler invariant, a bug
//! │   ├── NotPrepared
//! │   └── MaxStepsExceeded
//! └── Wrapped: Checkpoint / Serialization / Yaml / Io / Configuration
//! ```
//!
//! Vertex failures never escape the event stream as `Err`: the loop records the
//! vertex as errored and emits a step event carrying a [`StepError`](crate::StepError).
//! An `Err` item on the stream means the run itself cannot continue.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Graph contains a cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Input '{input}' of vertex '{vertex}' has no edge, literal or default")]
    UnresolvedInput { vertex: String, input: String },

    #[error("Unknown vertex '{vertex}' referenced by {context}")]
    UnknownVertex { vertex: String, context: String },

    #[error("Duplicate vertex id '{0}'")]
    DuplicateVertex(String),

    #[error("Vertex '{vertex}' has no {direction} field '{field}'")]
    UnknownField {
        vertex: String,
        field: String,
        direction: String,
    },

    #[error("Input '{input}' of vertex '{vertex}' already has a source edge")]
    DuplicateSource { vertex: String, input: String },

    #[error("Vertex '{vertex}' uses unregistered unit type '{unit}'")]
    UnknownUnit { vertex: String, unit: String },

    #[error("Graph validation failed: {0}")]
    Validation(String),

    #[error("Snapshot is missing required field '{0}'")]
    MissingField(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Snapshot does not match the live graph structure: {0}")]
    StructuralDrift(String),

    #[error("Vertex '{vertex}' execution failed: {error}")]
    VertexExecution { vertex: String, error: String },

    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("Scheduler invariant violated: {0}")]
    Invariant(String),

    #[error("Graph has not been prepared for a run")]
    NotPrepared,

    #[error("Run exceeded the maximum of {0} steps")]
    MaxStepsExceeded(usize),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] flowgraph_checkpoint::CheckpointError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GraphError {
    pub fn vertex_execution(vertex: impl Into<String>, error: impl Into<String>) -> Self {
        Self::VertexExecution {
            vertex: vertex.into(),
            error: error.into(),
        }
    }

    pub fn unknown_vertex(vertex: impl Into<String>, context: impl Into<String>) -> Self {
        Self::UnknownVertex {
            vertex: vertex.into(),
            context: context.into(),
        }
    }

    pub fn unknown_field(
        vertex: impl Into<String>,
        field: impl Into<String>,
        direction: impl Into<String>,
    ) -> Self {
        Self::UnknownField {
            vertex: vertex.into(),
            field: field.into(),
            direction: direction.into(),
        }
    }

    /// True for errors caused by an invalid graph definition
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::Cycle { .. }
                | Self::UnresolvedInput { .. }
                | Self::UnknownVertex { .. }
                | Self::DuplicateVertex(_)
                | Self::UnknownField { .. }
                | Self::DuplicateSource { .. }
                | Self::UnknownUnit { .. }
                | Self::Validation(_)
        )
    }
}

