//! The aggregation pipeline.
//!
//! A request is validated, keyed, and served from the cache when possible.
//! On a miss the first caller for a key compiles the filter, runs the rows
//! and count queries concurrently under the storage deadline, normalizes the
//! rows, fills in classification names and caches the result. Concurrent
//! callers for the same key wait for that computation and then read the
//! cache; a failed computation is not shared, each waiter retries on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bugetar_cache::{CacheStats, Clock, ResultCache};
use bugetar_core::ClassificationKind;
use bugetar_query::{
    aggregate_key, apply_thresholds, compile, fold_yearly, paginate, sort_rows, AggregateRequest,
    AggregateRow, ExchangeRates, GroupingDimension, QueryPlan, RateSource, RawAggregateRow,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ports::{LookupPort, NoLookup, StoragePort};

/// One page of aggregated rows and the number of groups across all pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// The requested page.
    pub rows: Vec<AggregateRow>,
    /// Number of groups matching the filter, ignoring pagination.
    pub total_count: u64,
}

type Gate = Arc<AsyncMutex<()>>;

/// Serves aggregate requests over a storage backend.
///
/// The engine is `Sync`; share it behind an [`Arc`] and call
/// [`get_aggregates`](Self::get_aggregates) from any number of tasks.
pub struct AggregationEngine<S, L = NoLookup> {
    storage: S,
    lookup: L,
    rates: Arc<dyn RateSource>,
    cache: ResultCache<AggregateResult>,
    in_flight: Mutex<HashMap<String, Gate>>,
    config: EngineConfig,
}

impl<S: StoragePort> AggregationEngine<S> {
    /// Create an engine with the built-in annual exchange rates and no name
    /// lookup.
    pub fn new(storage: S, config: EngineConfig) -> Self {
        let rates = ExchangeRates::bnr_annual_averages().strict(config.strict_exchange_rates);
        Self {
            storage,
            lookup: NoLookup,
            rates: Arc::new(rates),
            cache: ResultCache::new(config.cache_config()),
            in_flight: Mutex::new(HashMap::new()),
            config,
        }
    }
}

impl<S: StoragePort, L: LookupPort> AggregationEngine<S, L> {
    /// Replace the classification name lookup.
    pub fn with_lookup<L2: LookupPort>(self, lookup: L2) -> AggregationEngine<S, L2> {
        AggregationEngine {
            storage: self.storage,
            lookup,
            rates: self.rates,
            cache: self.cache,
            in_flight: self.in_flight,
            config: self.config,
        }
    }

    /// Replace the exchange rate source.
    pub fn with_rates(mut self, rates: impl RateSource + 'static) -> Self {
        self.rates = Arc::new(rates);
        self
    }

    /// Run cache expiry on a custom clock. Drops anything already cached.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.cache = ResultCache::with_clock(self.config.cache_config(), clock);
        self
    }

    /// The storage backend.
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// The configuration the engine was built with.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Aggregate the request's filter by its grouping.
    ///
    /// # Errors
    ///
    /// Validation errors are returned before storage is touched. Storage
    /// failures and timeouts abort the whole aggregation; no partial result
    /// is returned and nothing is cached.
    pub async fn get_aggregates(
        &self,
        request: &AggregateRequest,
    ) -> Result<Arc<AggregateResult>, EngineError> {
        let filter = request.filter.validate()?;
        let key = aggregate_key(request)?;

        if let Some(hit) = self.cache.get(key.as_str()) {
            return Ok(hit);
        }

        let flight = Flight::join(&self.in_flight, key.as_str());
        let _turn = flight.gate.lock().await;
        if let Some(hit) = self.cache.get(key.as_str()) {
            debug!(key = %key, "served by a concurrent computation");
            return Ok(hit);
        }

        let started = Instant::now();
        let plan = compile(&filter, request.grouping, &request.options())?;
        let result = Arc::new(self.compute(&plan).await?);
        info!(
            key = %key,
            grouping = %request.grouping,
            rows = result.rows.len(),
            total_count = result.total_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            hit_rate = self.cache.stats().hit_rate(),
            "aggregation computed"
        );

        self.cache.insert_serialized(key.as_str(), Arc::clone(&result));
        Ok(result)
    }

    async fn compute(&self, plan: &QueryPlan) -> Result<AggregateResult, EngineError> {
        let (raw, count) = self.query(plan).await?;

        let (mut rows, total_count) = if plan.yearly {
            self.fold(plan, raw, count)?
        } else {
            let rows = raw
                .into_iter()
                .map(|row| AggregateRow::from_raw(row, plan.normalization))
                .collect();
            (rows, count)
        };

        if let Some(kind) = classification_kind(plan.dimension) {
            for row in rows.iter_mut().filter(|row| row.name.is_none()) {
                row.name = self.lookup.classification_name(kind, &row.key);
            }
        }

        Ok(AggregateResult { rows, total_count })
    }

    async fn query(&self, plan: &QueryPlan) -> Result<(Vec<RawAggregateRow>, u64), EngineError> {
        let deadline = self.config.storage_timeout();
        let both = async {
            tokio::try_join!(self.storage.execute(plan), self.storage.execute_count(plan))
        };
        match tokio::time::timeout(deadline, both).await {
            Ok(Ok(pair)) => Ok(pair),
            Ok(Err(err)) => {
                warn!(error = %err, dimension = %plan.dimension, "storage query failed");
                Err(err.into())
            }
            Err(_) => {
                warn!(
                    timeout_ms = deadline.as_millis() as u64,
                    dimension = %plan.dimension,
                    "storage query timed out"
                );
                Err(EngineError::Timeout(deadline))
            }
        }
    }

    /// Convert yearly rows to EUR, then apply the steps storage could not.
    fn fold(
        &self,
        plan: &QueryPlan,
        raw: Vec<RawAggregateRow>,
        count: u64,
    ) -> Result<(Vec<AggregateRow>, u64), EngineError> {
        let mut rows =
            fold_yearly(raw, plan.normalization, self.rates.as_ref()).map_err(EngineError::Rates)?;
        apply_thresholds(&mut rows, &plan.post_aggregate);
        sort_rows(&mut rows, &plan.effective_sort(), plan.dimension);

        // Storage counts groups before conversion; bounds on converted
        // amounts can only be counted here.
        let total_count = if plan.post_aggregate.is_unbounded() {
            count
        } else {
            rows.len() as u64
        };
        Ok((paginate(rows, plan.offset, plan.limit), total_count))
    }
}

const fn classification_kind(dimension: GroupingDimension) -> Option<ClassificationKind> {
    match dimension {
        GroupingDimension::FunctionalCode => Some(ClassificationKind::Functional),
        GroupingDimension::EconomicCode => Some(ClassificationKind::Economic),
        GroupingDimension::Uat | GroupingDimension::County | GroupingDimension::Entity => None,
    }
}

/// Membership in the single-flight table for one key.
///
/// The table entry is removed when its last member leaves, including when
/// the request future is dropped mid-computation.
struct Flight<'a> {
    table: &'a Mutex<HashMap<String, Gate>>,
    key: &'a str,
    gate: Gate,
}

impl<'a> Flight<'a> {
    fn join(table: &'a Mutex<HashMap<String, Gate>>, key: &'a str) -> Self {
        let gate = Arc::clone(table.lock().entry(key.to_string()).or_default());
        Self { table, key, gate }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        let last = table
            .get(self.key)
            .is_some_and(|gate| Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) <= 2);
        if last {
            table.remove(self.key);
        }
    }
}
