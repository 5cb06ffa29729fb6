//! # flowgraph-core - Checkpointable execution of computation graphs
//!
//! Runs a directed acyclic graph of processing units one step at a time,
//! streams a result per step, and can freeze the run into a plain-data
//! snapshot at any step boundary and pick it up again later.
//!
//! ## Overview
//!
//! - **Deterministic layering** - dependency-respecting layers, ties broken by
//!   number of downstream consumers, then id
//! - **Step-wise execution** - a FIFO run queue, one vertex per step, with branch
//!   stopping and downstream inactivation
//! - **Event streams** - lazy, finite, cancellable at step boundaries
//! - **Snapshots** - run state as numbers, strings, lists and maps; validated
//!   restore that either fully applies or leaves the graph untouched
//! - **Dynamic structure** - units may add vertices and edges mid-run, tracked by
//!   a mutation counter and replayable log
//!
//! ## Core Concepts
//!
//! ### Units and vertices
//!
//! Every vertex wraps an opaque [`ProcessingUnit`]: declared input and output
//! fields plus one async `execute`. Units come from a [`UnitRegistry`] injected at
//! construction; [`builtin_registry`] provides pass-through units and a
//! conditional router.
//!
//! ### Runs
//!
//! [`Graph::prepare`] lays the graph out and seeds the queue; [`Graph::astep`]
//! performs one step; [`Graph::stream`] and [`Graph::run`] drive the loop. A
//! failing unit marks its vertex `errored` and the step event carries the
//! failure; unrelated branches keep running.
//!
//! ### Checkpoints
//!
//! [`CheckpointManager`] converts run state to and from
//! [`Snapshot`](flowgraph_checkpoint::Snapshot) documents. With a
//! [`SnapshotSaver`](flowgraph_checkpoint::SnapshotSaver) injected and
//! `checkpoint_every_step` set, the loop persists every committed step.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowgraph_core::{FlowDefinition, Graph, RunConfig, RunEvent, RunRequest, VertexDefinition};
//! use futures::StreamExt;
//! use serde_json::json;
//!
//! # async fn example() -> flowgraph_core::Result<()> {
//! let flow = FlowDefinition::new("greeting")
//!     .vertex(VertexDefinition::new("chat_input", "chat_input").as_input())
//!     .vertex(VertexDefinition::new("chat_output", "chat_output").as_output())
//!     .edge("chat_input", "message", "chat_output", "input_value");
//!
//! let mut graph = Graph::builder(flow).build()?;
//! let mut events = graph.stream(RunRequest::new().with_input(json!("hello")), RunConfig::default());
//! while let Some(event) = events.next().await {
//!     match event? {
//!         RunEvent::Step(step) => println!("{} -> {:?}", step.vertex_id, step.outputs),
//!         RunEvent::Finish(summary) => println!("done in {} steps", summary.steps),
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`definition`] - flow definitions loaded from YAML/JSON
//! - [`edge`], [`layering`] - edge table and topological layering
//! - [`queue`], [`activation`], [`context`] - per-run scheduler state
//! - [`unit`], [`builtins`] - processing-unit interface and built-in units
//! - [`graph`], [`run`], [`stream`] - graph lifecycle, execution loop, event streams
//! - [`checkpoint`] - snapshot, restore and rehydrate
//! - [`config`] - run configuration
//! - [`error`] - [`GraphError`]

pub mod activation;
pub mod builtins;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod definition;
pub mod edge;
pub mod error;
pub mod graph;
pub mod layering;
pub mod queue;
pub mod run;
pub mod stream;
pub mod unit;
pub mod vertex;

/// Context key holding the run's session id
pub const SESSION_ID_KEY: &str = "session_id";

pub use activation::ActivationTracker;
pub use builtins::{
    builtin_registry, evaluate_condition, ConditionalRouter, PassthroughUnit, RouteOperator,
    INPUT_VALUE,
};
pub use checkpoint::CheckpointManager;
pub use config::RunConfig;
pub use context::ContextStore;
pub use definition::{FlowDefinition, VertexDefinition};
pub use edge::{Edge, EdgeTable};
pub use error::{GraphError, Result};
pub use graph::{Graph, GraphBuilder, RunScope};
pub use layering::{compute_layers, flatten, sort_by_priority};
pub use queue::RunQueue;
pub use run::{
    OutputSelection, RunEvent, RunRequest, RunSummary, StepError, StepErrorKind, StepResult,
};
pub use stream::{EventStream, SpawnedRun};
pub use unit::{
    FieldSpec, FnUnit, ProcessingUnit, StepContext, UnitFactory, UnitInputs, UnitOutcome,
    UnitOutputs, UnitRegistry,
};
pub use vertex::{Vertex, VertexRunState, VertexStatus};

pub use flowgraph_checkpoint;
