//! # flowgraph-checkpoint - Run snapshots for graph execution
//!
//! Plain-data snapshot types and persistence abstractions used by
//! `flowgraph-core` to pause a graph run at a step boundary and resume it later,
//! possibly in another process.
//!
//! ## Core Concepts
//!
//! - [`Snapshot`] - the serializable run state: edge table, run queue, layering,
//!   context, activation sets and mutation counter. Sets are encoded as sorted
//!   lists, so the document is only numbers, strings, booleans, lists and maps.
//! - [`SnapshotSaver`] - the persistence boundary. The engine hands snapshots to
//!   a saver and reads them back; storage is the saver's concern.
//! - [`InMemorySnapshotSaver`] - reference saver for development and tests.
//! - [`SerializerProtocol`] - JSON and YAML encoders for snapshot documents.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowgraph_checkpoint::{
//!     InMemorySnapshotSaver, Snapshot, SnapshotConfig, SnapshotMetadata, SnapshotSaver,
//!     SnapshotSource,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let saver = InMemorySnapshotSaver::new();
//!     let config = SnapshotConfig::new().with_thread_id("run-42");
//!
//!     let metadata = SnapshotMetadata::new().with_source(SnapshotSource::Manual);
//!     let saved = saver.put(&config, Snapshot::empty(), metadata).await?;
//!     println!("stored snapshot {:?}", saved.snapshot_id);
//!
//!     if let Some(tuple) = saver.get_tuple(&config).await? {
//!         println!("latest queue: {:?}", tuple.snapshot.queue);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`snapshot`] - [`Snapshot`], [`SnapshotConfig`], [`SnapshotMetadata`], [`SnapshotTuple`]
//! - [`traits`] - [`SnapshotSaver`] and [`SnapshotStream`]
//! - [`memory`] - [`InMemorySnapshotSaver`]
//! - [`serializer`] - [`JsonSerializer`], [`YamlSerializer`], [`DocumentFormat`]
//! - [`error`] - [`CheckpointError`]

pub mod error;
pub mod memory;
pub mod serializer;
pub mod snapshot;
pub mod traits;

pub use error::{CheckpointError, Result};
pub use memory::InMemorySnapshotSaver;
pub use serializer::{DocumentFormat, JsonSerializer, SerializerProtocol, YamlSerializer};
pub use snapshot::{
    EdgeRecord, MutationRecord, OutputsRecord, RunManagerState, Snapshot, SnapshotConfig, SnapshotId,
    SnapshotMetadata, SnapshotSource, SnapshotTuple, StructuralChange, REQUIRED_FIELDS,
};
pub use traits::{SnapshotSaver, SnapshotStream};
