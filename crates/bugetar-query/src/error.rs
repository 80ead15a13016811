//! Query error types.

use bugetar_core::PeriodError;
use thiserror::Error;

use crate::plan::{GroupingDimension, Join, SortField};

/// Error returned when a filter is rejected before compilation.
///
/// Validation errors describe caller mistakes and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is absent.
    #[error("missing required field: {field}")]
    Missing {
        /// Field name.
        field: &'static str,
    },
    /// A required list is present but empty.
    #[error("required field {field} must not be empty")]
    Empty {
        /// Field name.
        field: &'static str,
    },
    /// Two mutually exclusive fields are both present.
    #[error("fields {first} and {second} cannot be combined")]
    Conflict {
        /// First field name.
        first: &'static str,
        /// Second field name.
        second: &'static str,
    },
    /// The report period is malformed.
    #[error("invalid report_period: {0}")]
    InvalidPeriod(#[from] PeriodError),
    /// A lower bound exceeds its upper bound.
    #[error("invalid range for {field}: min {min} is greater than max {max}")]
    InvalidRange {
        /// Field name (without the min/max prefix).
        field: &'static str,
        /// Lower bound as text.
        min: String,
        /// Upper bound as text.
        max: String,
    },
    /// A bound that must be non-negative is negative.
    #[error("{field} must not be negative")]
    Negative {
        /// Field name.
        field: &'static str,
    },
}

/// Error returned when a validated filter cannot be compiled into a plan.
///
/// These indicate a programming error in the caller or the compiler, not a
/// user mistake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The sort field has no meaning for the grouping.
    #[error("cannot sort {dimension} aggregates by {field}")]
    UnsupportedSort {
        /// Requested sort field.
        field: SortField,
        /// Grouping dimension.
        dimension: GroupingDimension,
    },
    /// The rendered statement binds more parameters than storage accepts.
    #[error("plan binds {count} parameters, more than the limit of {limit}")]
    TooManyParameters {
        /// Number of bound parameters.
        count: usize,
        /// Storage limit.
        limit: usize,
    },
    /// A predicate references a table the plan does not join.
    #[error("plan for {dimension} references {join} without joining it")]
    MissingJoin {
        /// The missing join.
        join: Join,
        /// Grouping dimension.
        dimension: GroupingDimension,
    },
}

/// Error returned while evaluating plans or converting amounts.
#[derive(Debug, Error)]
pub enum QueryError {
    /// No exchange rate is known for a year and strict rates are enabled.
    #[error("no exchange rate for year {year}")]
    MissingRate {
        /// The year without a rate.
        year: i32,
    },
    /// Evaluation error.
    #[error("evaluation error: {0}")]
    Evaluation(String),
}

/// Error returned when a cache key cannot be derived.
#[derive(Debug, Error)]
#[error("cannot derive cache key: {0}")]
pub struct KeyError(#[from] serde_json::Error);
