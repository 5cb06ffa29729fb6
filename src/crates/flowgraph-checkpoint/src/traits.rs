//! Storage trait for snapshot persistence backends
//!
//! The engine never stores snapshots itself. A [`SnapshotSaver`] is handed to a
//! graph at construction time and receives each snapshot as an opaque document;
//! how and where it lands (a database row, an object store, a file) is the
//! backend's business.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use flowgraph_checkpoint::{
//!     Snapshot, SnapshotConfig, SnapshotMetadata, SnapshotSaver, SnapshotStream,
//!     SnapshotTuple, Result,
//! };
//! use async_trait::async_trait;
//!
//! struct PostgresSnapshotSaver {
//!     pool: sqlx::PgPool,
//! }
//!
//! #[async_trait]
//! impl SnapshotSaver for PostgresSnapshotSaver {
//!     async fn put(
//!         &self,
//!         config: &SnapshotConfig,
//!         snapshot: Snapshot,
//!         metadata: SnapshotMetadata,
//!     ) -> Result<SnapshotConfig> {
//!         let document = snapshot.to_value()?;
//!         // INSERT INTO flow_runs (thread_id, snapshot_id, document, metadata) ...
//!         Ok(config.clone())
//!     }
//!
//!     // get_tuple, list ...
//! }
//! ```
//!
//! Backends that store raw documents should decode with
//! [`Snapshot::from_value`](crate::Snapshot::from_value) so missing required
//! fields surface as [`CheckpointError::MissingField`](crate::CheckpointError::MissingField).

use crate::{
    error::Result,
    snapshot::{Snapshot, SnapshotConfig, SnapshotMetadata, SnapshotTuple},
};
use async_trait::async_trait;
use futures::stream::Stream;
use serde_json::Value;
use std::collections::BTreeMap;
use std::pin::Pin;

/// Async stream of stored snapshots, newest first
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<SnapshotTuple>> + Send + 'static>>;

/// Persistence backend for run snapshots.
///
/// Implementations must be `Send + Sync`; independent graph runs may share one
/// saver concurrently, each under its own thread id.
#[async_trait]
pub trait SnapshotSaver: Send + Sync {
    /// Fetch a snapshot.
    ///
    /// With `snapshot_id` set, returns exactly that snapshot; otherwise the most
    /// recent one stored under `thread_id`. `Ok(None)` when nothing matches.
    async fn get_tuple(&self, config: &SnapshotConfig) -> Result<Option<SnapshotTuple>>;

    /// List snapshots, newest first.
    ///
    /// `config` narrows to one thread, `filter` matches metadata keys and
    /// `limit` caps the number of results.
    async fn list(
        &self,
        config: Option<&SnapshotConfig>,
        filter: Option<BTreeMap<String, Value>>,
        limit: Option<usize>,
    ) -> Result<SnapshotStream>;

    /// Store a snapshot and return the config addressing it.
    async fn put(
        &self,
        config: &SnapshotConfig,
        snapshot: Snapshot,
        metadata: SnapshotMetadata,
    ) -> Result<SnapshotConfig>;

    /// Fetch only the snapshot document
    async fn get(&self, config: &SnapshotConfig) -> Result<Option<Snapshot>> {
        Ok(self.get_tuple(config).await?.map(|tuple| tuple.snapshot))
    }

    /// Delete every snapshot stored under `thread_id`
    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let _ = thread_id;
        Ok(())
    }
}
