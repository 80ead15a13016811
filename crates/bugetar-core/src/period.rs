//! Reporting periods.
//!
//! Execution data is reported monthly, quarterly and yearly. A [`PeriodKey`]
//! names one period (`2023`, `2023-Q2`, `2023-03`) and a [`ReportPeriod`]
//! selects a set of periods of one periodicity, either as an explicit list or
//! as an inclusive interval.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ParseError;

/// Periodicity of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    /// Whole years.
    #[serde(alias = "YEAR")]
    Year,
    /// Calendar quarters.
    #[serde(alias = "QUARTER")]
    Quarter,
    /// Calendar months.
    #[serde(alias = "MONTH")]
    Month,
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Year => f.write_str("year"),
            Self::Quarter => f.write_str("quarter"),
            Self::Month => f.write_str("month"),
        }
    }
}

/// A single reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PeriodKey {
    /// A whole year, e.g. `2023`.
    Year(i32),
    /// A quarter, e.g. `2023-Q2`.
    Quarter {
        /// Calendar year.
        year: i32,
        /// Quarter number, 1 to 4.
        quarter: u8,
    },
    /// A month, e.g. `2023-03`.
    Month {
        /// Calendar year.
        year: i32,
        /// Month number, 1 to 12.
        month: u8,
    },
}

impl PeriodKey {
    /// The periodicity of this key.
    #[must_use]
    pub const fn period_type(&self) -> PeriodType {
        match self {
            Self::Year(_) => PeriodType::Year,
            Self::Quarter { .. } => PeriodType::Quarter,
            Self::Month { .. } => PeriodType::Month,
        }
    }

    /// The calendar year this period falls in.
    #[must_use]
    pub const fn year(&self) -> i32 {
        match *self {
            Self::Year(year) | Self::Quarter { year, .. } | Self::Month { year, .. } => year,
        }
    }

    /// A single integer that orders periods of the same type.
    ///
    /// Years map to `year`, quarters to `year * 10 + quarter` and months to
    /// `year * 100 + month`. The same encoding is used by the query compiler,
    /// so interval bounds can be compared directly against fact rows.
    #[must_use]
    pub const fn ordinal(&self) -> i64 {
        match *self {
            Self::Year(year) => year as i64,
            Self::Quarter { year, quarter } => year as i64 * 10 + quarter as i64,
            Self::Month { year, month } => year as i64 * 100 + month as i64,
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Year(year) => write!(f, "{year}"),
            Self::Quarter { year, quarter } => write!(f, "{year}-Q{quarter}"),
            Self::Month { year, month } => write!(f, "{year}-{month:02}"),
        }
    }
}

impl FromStr for PeriodKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::Period(s.to_string());
        let s = s.trim();

        let Some((year, rest)) = s.split_once('-') else {
            let year = s.parse::<i32>().map_err(|_| invalid())?;
            return Ok(Self::Year(year));
        };

        let year = year.parse::<i32>().map_err(|_| invalid())?;
        if let Some(q) = rest.strip_prefix('Q').or_else(|| rest.strip_prefix('q')) {
            let quarter = q.parse::<u8>().map_err(|_| invalid())?;
            if !(1..=4).contains(&quarter) {
                return Err(invalid());
            }
            return Ok(Self::Quarter { year, quarter });
        }

        let month = rest.parse::<u8>().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self::Month { year, month })
    }
}

impl TryFrom<String> for PeriodKey {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeriodKey> for String {
    fn from(key: PeriodKey) -> Self {
        key.to_string()
    }
}

/// Inclusive interval of periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeriodInterval {
    /// First period, inclusive.
    pub start: PeriodKey,
    /// Last period, inclusive.
    pub end: PeriodKey,
}

/// How periods are picked inside a [`ReportPeriod`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodSelection {
    /// An explicit list of periods.
    Dates(Vec<PeriodKey>),
    /// A contiguous range of periods.
    Interval(PeriodInterval),
}

/// A selection of periods of a single periodicity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportPeriod {
    /// Periodicity of every selected key.
    #[serde(rename = "type")]
    pub period_type: PeriodType,
    /// The selected periods.
    pub selection: PeriodSelection,
}

/// Reasons a [`ReportPeriod`] is unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeriodError {
    /// The explicit list is empty.
    #[error("period selection has no dates")]
    NoDates,
    /// A key does not match the declared periodicity.
    #[error("period {key} is not a {expected} period")]
    WrongType {
        /// The offending key.
        key: PeriodKey,
        /// The declared periodicity.
        expected: PeriodType,
    },
    /// The interval ends before it starts.
    #[error("period interval {start}..{end} is inverted")]
    Inverted {
        /// Interval start.
        start: PeriodKey,
        /// Interval end.
        end: PeriodKey,
    },
}

impl ReportPeriod {
    /// Select whole years.
    #[must_use]
    pub fn years(years: impl IntoIterator<Item = i32>) -> Self {
        Self {
            period_type: PeriodType::Year,
            selection: PeriodSelection::Dates(years.into_iter().map(PeriodKey::Year).collect()),
        }
    }

    /// Select an inclusive interval; the periodicity is taken from `start`.
    #[must_use]
    pub fn interval(start: PeriodKey, end: PeriodKey) -> Self {
        Self {
            period_type: start.period_type(),
            selection: PeriodSelection::Interval(PeriodInterval { start, end }),
        }
    }

    /// Check that the selection is non-empty, homogeneous and well ordered.
    pub fn check(&self) -> Result<(), PeriodError> {
        let keys: Vec<PeriodKey> = match &self.selection {
            PeriodSelection::Dates(dates) => {
                if dates.is_empty() {
                    return Err(PeriodError::NoDates);
                }
                dates.clone()
            }
            PeriodSelection::Interval(interval) => vec![interval.start, interval.end],
        };

        if let Some(key) = keys.iter().find(|k| k.period_type() != self.period_type) {
            return Err(PeriodError::WrongType {
                key: *key,
                expected: self.period_type,
            });
        }

        if let PeriodSelection::Interval(PeriodInterval { start, end }) = self.selection {
            if start.ordinal() > end.ordinal() {
                return Err(PeriodError::Inverted { start, end });
            }
        }
        Ok(())
    }
}
