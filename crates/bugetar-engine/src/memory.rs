//! Storage over an in-memory dataset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bugetar_core::Dataset;
use bugetar_query::{PlanExecutor, QueryPlan, RawAggregateRow};
use tracing::debug;

use crate::error::StorageError;
use crate::ports::StoragePort;

/// A [`StoragePort`] that evaluates plans against a [`Dataset`] snapshot.
///
/// Used by the command-line tools and tests. Calls are counted, and an
/// optional artificial latency makes concurrent behavior observable.
#[derive(Debug)]
pub struct MemoryStorage {
    dataset: Arc<Dataset>,
    latency: Option<Duration>,
    row_queries: AtomicU64,
    count_queries: AtomicU64,
}

impl MemoryStorage {
    /// Serve a dataset.
    pub fn new(dataset: impl Into<Arc<Dataset>>) -> Self {
        Self {
            dataset: dataset.into(),
            latency: None,
            row_queries: AtomicU64::new(0),
            count_queries: AtomicU64::new(0),
        }
    }

    /// Delay every query by `latency`.
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The served dataset.
    pub fn dataset(&self) -> Arc<Dataset> {
        Arc::clone(&self.dataset)
    }

    /// Number of rows queries run so far.
    pub fn row_queries(&self) -> u64 {
        self.row_queries.load(Ordering::SeqCst)
    }

    /// Number of count queries run so far.
    pub fn count_queries(&self) -> u64 {
        self.count_queries.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl StoragePort for MemoryStorage {
    async fn execute(&self, plan: &QueryPlan) -> Result<Vec<RawAggregateRow>, StorageError> {
        self.row_queries.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let rows = PlanExecutor::new(&self.dataset).execute(plan)?;
        debug!(rows = rows.len(), dimension = %plan.dimension, "memory storage rows");
        Ok(rows)
    }

    async fn execute_count(&self, plan: &QueryPlan) -> Result<u64, StorageError> {
        self.count_queries.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        Ok(PlanExecutor::new(&self.dataset).count(plan)?)
    }
}
