//! Aggregation query layer for budget execution analytics.
//!
//! This crate turns an analytics filter into parameterized SQL and turns the
//! aggregated rows that come back into reported amounts.
//!
//! # Overview
//!
//! - [`filter`] - The filter callers send and its single validation step
//! - [`key`] - Deterministic, order-insensitive cache keys
//! - [`compiler`] and [`plan`] - Filter + grouping to a typed, parameterized plan
//! - [`normalize`] and [`rates`] - Per-capita and EUR amounts
//! - [`executor`] - Evaluates plans against an in-memory [`bugetar_core::Dataset`]
//!
//! # Example
//!
//! ```
//! use bugetar_core::AccountCategory;
//! use bugetar_query::{compile, AnalyticsFilter, GroupingDimension, QueryOptions};
//!
//! let filter = AnalyticsFilter::for_years(AccountCategory::Expense, [2023])
//!     .with_counties(["CJ"]);
//! let plan = compile(&filter.validate().unwrap(), GroupingDimension::Uat, &QueryOptions::default())
//!     .unwrap();
//! let stmt = plan.statement();
//! assert!(stmt.sql.contains("u.county_code = ANY($"));
//! assert!(!stmt.sql.contains("CJ"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod compiler;
pub mod error;
pub mod executor;
pub mod filter;
pub mod key;
pub mod normalize;
pub mod plan;
pub mod rates;

pub use compiler::{compile, MAX_PARAMS};
pub use error::{CompileError, KeyError, QueryError, ValidationError};
pub use executor::PlanExecutor;
pub use filter::{AnalyticsFilter, Bounds, ExcludeFilter, Normalization, ValidatedFilter};
pub use key::{aggregate_key, CacheKey, CacheKeyBuilder};
pub use normalize::{
    apply_thresholds, fold_yearly, normalize, paginate, per_capita, sort_rows, AggregateRow,
    NormalizedAmounts, RawAggregateRow,
};
pub use plan::{
    AggregateRequest, GroupingDimension, Join, QueryOptions, QueryPlan, SortDirection, SortField,
    SortSpec, Statement,
};
pub use rates::{ExchangeRates, RateSource};
