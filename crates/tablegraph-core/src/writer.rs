//! Batched bulk writer.
//!
//! [`GraphWriter::write`] splits the edge list into consecutive batches and
//! hands each one to [`GraphStore::merge_batch`], strictly one after the
//! other. The first failing batch aborts the write; batches committed before
//! it stay committed and are reported in [`WriteError::BatchFailed`].
//!
//! There is no cross-batch rollback. A caller that sees `BatchFailed` must
//! assume the graph holds the committed prefix.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::driver::GraphDriver;
use crate::error::WriteError;
use crate::projection::ProjectedEdge;
use crate::store::{GraphStats, Record};
use crate::table::Value;

/// Edges per batch when the caller does not choose.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Cooperative cancellation flag, checked before each batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed or cancelled write.
///
/// A failed batch ends the write with [`WriteError::BatchFailed`], which
/// carries the failed index and the committed counts instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    /// Edges in committed batches.
    pub edges_processed: usize,
    /// Committed batches.
    pub batches: usize,
    pub elapsed_ms: u64,
    /// True when the token stopped the write before the last batch.
    pub cancelled: bool,
}

/// Writes projected edges through a shared [`GraphDriver`].
#[derive(Debug, Clone)]
pub struct GraphWriter {
    driver: Arc<GraphDriver>,
}

impl GraphWriter {
    pub fn new(driver: Arc<GraphDriver>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &GraphDriver {
        &self.driver
    }

    /// Write every edge in batches of `batch_size`.
    pub async fn write(
        &self,
        edges: &[ProjectedEdge],
        batch_size: usize,
    ) -> Result<WriteResult, WriteError> {
        self.write_cancellable(edges, batch_size, &CancelToken::new())
            .await
    }

    /// Like [`write`](Self::write), but stops before the next batch once
    /// `cancel` fires. Committed batches are never rolled back.
    pub async fn write_cancellable(
        &self,
        edges: &[ProjectedEdge],
        batch_size: usize,
        cancel: &CancelToken,
    ) -> Result<WriteResult, WriteError> {
        if batch_size == 0 {
            return Err(WriteError::InvalidBatchSize);
        }
        if edges.is_empty() {
            return Err(WriteError::EmptyInput);
        }
        let store = self.driver.store()?;

        let start = Instant::now();
        let total_batches = edges.len().div_ceil(batch_size);
        let mut result = WriteResult::default();

        for (i, batch) in edges.chunks(batch_size).enumerate() {
            let index = i + 1;
            if cancel.is_cancelled() {
                tracing::warn!(
                    batch = index,
                    committed = result.batches,
                    "write cancelled before batch"
                );
                result.cancelled = true;
                break;
            }

            if let Err(source) = store.merge_batch(batch).await {
                tracing::error!(
                    batch = index,
                    size = batch.len(),
                    error = %source,
                    "batch failed, aborting write"
                );
                return Err(WriteError::BatchFailed {
                    index,
                    size: batch.len(),
                    committed_batches: result.batches,
                    committed_edges: result.edges_processed,
                    source,
                });
            }

            result.batches += 1;
            result.edges_processed += batch.len();
            tracing::info!(
                batch = index,
                of = total_batches,
                size = batch.len(),
                "batch committed"
            );
        }

        result.elapsed_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    pub async fn run_query(&self, query: &str, params: &[Value]) -> Result<Vec<Record>, WriteError> {
        Ok(self.driver.store()?.run_query(query, params).await?)
    }

    /// Delete all graph data.
    pub async fn clear(&self) -> Result<(), WriteError> {
        self.driver.store()?.clear().await?;
        tracing::warn!("graph store cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<GraphStats, WriteError> {
        Ok(self.driver.store()?.stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::projection::GraphElementRecord;
    use crate::store::memory::InMemoryGraphStore;
    use crate::store::GraphStore;
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use std::sync::atomic::AtomicUsize;

    /// Delegates to an in-memory store but fails the `fail_on`-th call
    /// (1-based), and can fire a cancel token after a given call.
    struct Scripted {
        inner: InMemoryGraphStore,
        calls: AtomicUsize,
        fail_on: Option<usize>,
        cancel_after: Option<(usize, CancelToken)>,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                inner: InMemoryGraphStore::new(),
                calls: AtomicUsize::new(0),
                fail_on: None,
                cancel_after: None,
            }
        }
    }

    #[async_trait]
    impl GraphStore for Scripted {
        async fn verify_connectivity(&self) -> Result<(), StoreError> {
            Ok(())
        }
        async fn merge_batch(&self, batch: &[ProjectedEdge]) -> Result<(), StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(call) {
                return Err(StoreError::Query("constraint violated".to_string()));
            }
            self.inner.merge_batch(batch).await?;
            if let Some((after, token)) = &self.cancel_after {
                if *after == call {
                    token.cancel();
                }
            }
            Ok(())
        }
        async fn run_query(&self, q: &str, p: &[Value]) -> Result<Vec<Record>, StoreError> {
            self.inner.run_query(q, p).await
        }
        async fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear().await
        }
        async fn stats(&self) -> Result<GraphStats, StoreError> {
            self.inner.stats().await
        }
        async fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn edges(n: usize) -> Vec<ProjectedEdge> {
        (0..n)
            .map(|i| {
                let mut src = IndexMap::new();
                src.insert("n".to_string(), Value::Int(i as i64));
                let mut tgt = IndexMap::new();
                tgt.insert("bucket".to_string(), Value::Int((i % 10) as i64));
                ProjectedEdge {
                    source: GraphElementRecord::new("Item", src),
                    target: GraphElementRecord::new("Bucket", tgt),
                    relationship: GraphElementRecord::new("IN", IndexMap::new()),
                }
            })
            .collect()
    }

    async fn writer_for(store: Arc<Scripted>) -> GraphWriter {
        let driver = Arc::new(GraphDriver::new(store));
        driver.connect().await.unwrap();
        GraphWriter::new(driver)
    }

    #[tokio::test]
    async fn test_writes_in_batches() {
        let store = Arc::new(Scripted::new());
        let writer = writer_for(store.clone()).await;

        let result = writer.write(&edges(2500), DEFAULT_BATCH_SIZE).await.unwrap();
        assert_eq!(result.edges_processed, 2500);
        assert_eq!(result.batches, 3);
        assert!(!result.cancelled);

        let stats = writer.stats().await.unwrap();
        assert_eq!(stats.node_labels["Item"], 2500);
        assert_eq!(stats.node_labels["Bucket"], 10);
    }

    #[tokio::test]
    async fn test_second_batch_failure_aborts() {
        let mut scripted = Scripted::new();
        scripted.fail_on = Some(2);
        let store = Arc::new(scripted);
        let writer = writer_for(store.clone()).await;

        let err = writer.write(&edges(2500), 1000).await.unwrap_err();
        match err {
            WriteError::BatchFailed {
                index,
                size,
                committed_batches,
                committed_edges,
                ..
            } => {
                assert_eq!(index, 2);
                assert_eq!(size, 1000);
                assert_eq!(committed_batches, 1);
                assert_eq!(committed_edges, 1000);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Batch 3 was never attempted.
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(writer.stats().await.unwrap().node_labels["Item"], 1000);
    }

    #[tokio::test]
    async fn test_repeated_write_is_idempotent() {
        let store = Arc::new(Scripted::new());
        let writer = writer_for(store).await;
        let e = edges(5);
        writer.write(&e, 2).await.unwrap();
        writer.write(&e, 2).await.unwrap();

        let stats = writer.stats().await.unwrap();
        assert_eq!(stats.total_nodes, 10);
        assert_eq!(stats.total_relationships, 5);
    }

    #[tokio::test]
    async fn test_cancel_stops_after_committed_batch() {
        let token = CancelToken::new();
        let mut scripted = Scripted::new();
        scripted.cancel_after = Some((1, token.clone()));
        let store = Arc::new(scripted);
        let writer = writer_for(store.clone()).await;

        let result = writer
            .write_cancellable(&edges(30), 10, &token)
            .await
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.batches, 1);
        assert_eq!(result.edges_processed, 10);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejects_bad_input_and_closed_driver() {
        let store = Arc::new(Scripted::new());
        let writer = writer_for(store).await;
        assert_eq!(
            writer.write(&[], 10).await.unwrap_err(),
            WriteError::EmptyInput
        );
        assert_eq!(
            writer.write(&edges(1), 0).await.unwrap_err(),
            WriteError::InvalidBatchSize
        );

        writer.driver().close().await.unwrap();
        assert!(matches!(
            writer.write(&edges(1), 10).await,
            Err(WriteError::NotReady(crate::driver::ConnectionState::Closed))
        ));
    }
}
