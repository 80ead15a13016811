//! Aggregation orchestrator for bugetar.
//!
//! [`AggregationEngine`] ties the query layer to a storage backend: it
//! validates and keys each [`AggregateRequest`](bugetar_query::AggregateRequest),
//! serves repeats from a [`ResultCache`](bugetar_cache::ResultCache), lets only
//! one caller compute a given key at a time, and bounds storage with a
//! deadline.
//!
//! Backends plug in through [`StoragePort`] and [`LookupPort`];
//! [`MemoryStorage`] serves an in-memory [`Dataset`](bugetar_core::Dataset).
//!
//! # Example
//!
//! ```
//! use bugetar_core::{AccountCategory, Dataset, Entity, ExecutionLineItem, TerritorialUnit};
//! use bugetar_engine::{AggregationEngine, EngineConfig, MemoryStorage};
//! use bugetar_query::{AggregateRequest, AnalyticsFilter, GroupingDimension, Normalization};
//! use rust_decimal::Decimal;
//!
//! let mut ds = Dataset::new();
//! ds.uats.push(TerritorialUnit::new(1, "54975", "Floresti", "CJ", "Cluj").with_population(1000));
//! ds.entities.push(Entity::new("100", "Primaria Floresti").administering(1));
//! ds.line_items.push(ExecutionLineItem::yearly(
//!     "100", 2023, AccountCategory::Expense, "65.02", Decimal::from(50_000),
//! ));
//!
//! let engine = AggregationEngine::new(MemoryStorage::new(ds), EngineConfig::default());
//! let request = AggregateRequest::new(
//!     AnalyticsFilter::for_years(AccountCategory::Expense, [2023])
//!         .with_counties(["CJ"])
//!         .with_normalization(Normalization::PerCapita),
//!     GroupingDimension::Uat,
//! );
//!
//! let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! let result = runtime.block_on(engine.get_aggregates(&request)).unwrap();
//! assert_eq!(result.rows[0].per_capita_amount, Decimal::from(50));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod ports;

pub use config::EngineConfig;
pub use error::{EngineError, StorageError};
pub use memory::MemoryStorage;
pub use orchestrator::{AggregateResult, AggregationEngine};
pub use ports::{LookupPort, NoLookup, StoragePort};
