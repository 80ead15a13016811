//! Core types for bugetar
//!
//! This crate provides the data model shared by the analytics crates:
//!
//! - [`ExecutionLineItem`] - A fact row of a budget execution report
//! - [`Entity`] and [`Report`] - Reporting institutions and their filings
//! - [`TerritorialUnit`] and [`CountyIndex`] - UATs and county resolution
//! - [`ClassificationTable`] - Functional / economic code names
//! - [`AccountCategory`] - Income (`vn`) or expense (`ch`)
//! - [`PeriodKey`] and [`ReportPeriod`] - Reporting period selection
//!
//! # Example
//!
//! ```
//! use bugetar_core::{TerritorialUnit, CountyIndex};
//!
//! let units = vec![
//!     TerritorialUnit::new(1, "CJ", "Judetul Cluj", "CJ", "Cluj").with_population(690_000),
//!     TerritorialUnit::new(2, "179132", "Bucuresti", "B", "Bucuresti").with_population(1_716_000),
//! ];
//! let index = CountyIndex::build(&units, &[]);
//! assert_eq!(index.population("B"), Some(1_716_000));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod account;
pub mod classification;
pub mod dataset;
pub mod entity;
pub mod line_item;
pub mod period;
pub mod territory;

pub use account::AccountCategory;
pub use classification::{ClassificationKind, ClassificationTable};
pub use dataset::Dataset;
pub use entity::{Entity, Report};
pub use line_item::{AmountColumn, ExecutionLineItem};
pub use period::{PeriodError, PeriodInterval, PeriodKey, PeriodSelection, PeriodType, ReportPeriod};
pub use territory::{
    is_county_representative, CountyIndex, CountyInfo, TerritorialUnit, BUCHAREST_COUNTY_CODE,
    BUCHAREST_SIRUTA_CODE,
};

// Re-export commonly used external types
pub use rust_decimal::Decimal;

/// Error returned when parsing a textual token fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Unknown account category token.
    #[error("unknown account category: {0} (expected vn or ch)")]
    AccountCategory(String),
    /// Malformed period key.
    #[error("invalid period: {0} (expected YYYY, YYYY-Qn or YYYY-MM)")]
    Period(String),
}
