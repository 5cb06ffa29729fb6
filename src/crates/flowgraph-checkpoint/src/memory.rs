//! In-memory snapshot storage
//!
//! [`InMemorySnapshotSaver`] keeps every snapshot in a process-local map keyed by
//! thread id. Entries are held as encoded documents rather than typed values, so
//! a `get` exercises the same decoding path a database-backed saver would.
//!
//! ```text
//! Arc<RwLock<HashMap>>
//!   thread_id: "run-1"
//!     ├─ [0] SnapshotEntry (step 1)
//!     ├─ [1] SnapshotEntry (step 2)
//!     └─ [2] SnapshotEntry (step 3)
//! ```
//!
//! Data is lost when the process exits. Use it for development, tests and
//! short-lived runs.

use crate::{
    error::{CheckpointError, Result},
    snapshot::{Snapshot, SnapshotConfig, SnapshotMetadata, SnapshotTuple},
    traits::{SnapshotSaver, SnapshotStream},
};
use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct SnapshotEntry {
    snapshot_id: String,
    document: Value,
    metadata: SnapshotMetadata,
    parent_config: Option<SnapshotConfig>,
}

impl SnapshotEntry {
    fn to_tuple(&self, thread_id: &str) -> Result<SnapshotTuple> {
        Ok(SnapshotTuple {
            config: SnapshotConfig::new()
                .with_thread_id(thread_id)
                .with_snapshot_id(self.snapshot_id.clone()),
            snapshot: Snapshot::from_value(&self.document)?,
            metadata: self.metadata.clone(),
            parent_config: self.parent_config.clone(),
        })
    }
}

type SnapshotStorage = Arc<RwLock<HashMap<String, Vec<SnapshotEntry>>>>;

/// Process-local [`SnapshotSaver`]
///
/// # Example
///
/// ```rust
/// use flowgraph_checkpoint::{InMemorySnapshotSaver, Snapshot, SnapshotConfig, SnapshotMetadata, SnapshotSaver};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let saver = InMemorySnapshotSaver::new();
///     let config = SnapshotConfig::new().with_thread_id("run-1");
///
///     let saved = saver.put(&config, Snapshot::empty(), SnapshotMetadata::new()).await?;
///     assert!(saver.get(&saved).await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotSaver {
    storage: SnapshotStorage,
}

impl InMemorySnapshotSaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with at least one snapshot
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of snapshots across all threads
    pub async fn snapshot_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    /// Drop everything
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

fn required_thread_id(config: &SnapshotConfig) -> Result<&str> {
    config
        .thread_id
        .as_deref()
        .ok_or_else(|| CheckpointError::Invalid("thread_id is required".to_string()))
}

#[async_trait]
impl SnapshotSaver for InMemorySnapshotSaver {
    async fn get_tuple(&self, config: &SnapshotConfig) -> Result<Option<SnapshotTuple>> {
        let thread_id = required_thread_id(config)?;
        let storage = self.storage.read().await;

        let Some(entries) = storage.get(thread_id) else {
            return Ok(None);
        };

        let entry = match &config.snapshot_id {
            Some(snapshot_id) => entries.iter().find(|e| &e.snapshot_id == snapshot_id),
            None => entries.last(),
        };

        entry.map(|e| e.to_tuple(thread_id)).transpose()
    }

    async fn list(
        &self,
        config: Option<&SnapshotConfig>,
        filter: Option<BTreeMap<String, Value>>,
        limit: Option<usize>,
    ) -> Result<SnapshotStream> {
        let storage = self.storage.read().await;

        let mut thread_ids: Vec<String> = match config.and_then(|c| c.thread_id.clone()) {
            Some(thread_id) => vec![thread_id],
            None => storage.keys().cloned().collect(),
        };
        thread_ids.sort();

        let mut results = Vec::new();
        'threads: for thread_id in thread_ids {
            let Some(entries) = storage.get(&thread_id) else {
                continue;
            };
            for entry in entries.iter().rev() {
                if let Some(filter_map) = &filter {
                    if !entry.metadata.matches(filter_map) {
                        continue;
                    }
                }

                results.push(entry.to_tuple(&thread_id));

                if limit.map_or(false, |lim| results.len() >= lim) {
                    break 'threads;
                }
            }
        }

        Ok(Box::pin(stream::iter(results)))
    }

    async fn put(
        &self,
        config: &SnapshotConfig,
        snapshot: Snapshot,
        metadata: SnapshotMetadata,
    ) -> Result<SnapshotConfig> {
        let thread_id = required_thread_id(config)?.to_string();
        let document = snapshot.to_value()?;

        let mut storage = self.storage.write().await;
        let entries = storage.entry(thread_id.clone()).or_default();

        let snapshot_id = Uuid::new_v4().to_string();
        let parent_config = entries.last().map(|parent| {
            SnapshotConfig::new()
                .with_thread_id(thread_id.clone())
                .with_snapshot_id(parent.snapshot_id.clone())
        });

        entries.push(SnapshotEntry {
            snapshot_id: snapshot_id.clone(),
            document,
            metadata,
            parent_config,
        });

        Ok(SnapshotConfig::new()
            .with_thread_id(thread_id)
            .with_snapshot_id(snapshot_id))
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.storage.write().await.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotSource;
    use futures::StreamExt;
    use serde_json::json;

    fn snapshot_at(step: u64) -> Snapshot {
        let mut snapshot = Snapshot::empty();
        snapshot.step_count = step;
        snapshot
    }

    #[tokio::test]
    async fn test_save_and_load_snapshot() {
        let saver = InMemorySnapshotSaver::new();
        let config = SnapshotConfig::new().with_thread_id("thread-1");

        let saved = saver
            .put(&config, snapshot_at(1), SnapshotMetadata::new().with_step(1))
            .await
            .unwrap();
        assert!(saved.snapshot_id.is_some());

        let tuple = saver.get_tuple(&saved).await.unwrap().unwrap();
        assert_eq!(tuple.snapshot.step_count, 1);
        assert_eq!(tuple.metadata.step, Some(1));
        assert!(tuple.parent_config.is_none());
    }

    #[tokio::test]
    async fn test_latest_snapshot_without_id() {
        let saver = InMemorySnapshotSaver::new();
        let config = SnapshotConfig::new().with_thread_id("thread-1");

        for step in 1..=3 {
            saver
                .put(&config, snapshot_at(step), SnapshotMetadata::new())
                .await
                .unwrap();
        }

        let latest = saver.get(&config).await.unwrap().unwrap();
        assert_eq!(latest.step_count, 3);

        let tuple = saver.get_tuple(&config).await.unwrap().unwrap();
        assert!(tuple.parent_config.is_some());
    }

    #[tokio::test]
    async fn test_missing_thread_id() {
        let saver = InMemorySnapshotSaver::new();
        let err = saver.get_tuple(&SnapshotConfig::new()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_filter_and_limit() {
        let saver = InMemorySnapshotSaver::new();
        let config = SnapshotConfig::new().with_thread_id("thread-1");

        for step in 1..=4 {
            let source = if step == 1 {
                SnapshotSource::Input
            } else {
                SnapshotSource::Step
            };
            let metadata = SnapshotMetadata::new().with_source(source).with_step(step);
            saver.put(&config, snapshot_at(step), metadata).await.unwrap();
        }

        let all: Vec<_> = saver.list(Some(&config), None, None).await.unwrap().collect().await;
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].as_ref().unwrap().snapshot.step_count, 4);

        let mut filter = BTreeMap::new();
        filter.insert("source".to_string(), json!("step"));
        let limited: Vec<_> = saver
            .list(Some(&config), Some(filter), Some(2))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(limited.len(), 2);
        assert!(limited
            .iter()
            .all(|t| t.as_ref().unwrap().metadata.source == Some(SnapshotSource::Step)));
    }

    #[tokio::test]
    async fn test_delete_thread() {
        let saver = InMemorySnapshotSaver::new();
        let config = SnapshotConfig::new().with_thread_id("thread-1");
        saver.put(&config, Snapshot::empty(), SnapshotMetadata::new()).await.unwrap();
        assert_eq!(saver.thread_count().await, 1);

        saver.delete_thread("thread-1").await.unwrap();
        assert_eq!(saver.thread_count().await, 0);
        assert!(saver.get(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let saver = InMemorySnapshotSaver::new();
        for thread in ["a", "b"] {
            let config = SnapshotConfig::new().with_thread_id(thread);
            saver.put(&config, Snapshot::empty(), SnapshotMetadata::new()).await.unwrap();
        }
        assert_eq!(saver.snapshot_count().await, 2);

        saver.clear().await;
        assert_eq!(saver.snapshot_count().await, 0);
    }
}
