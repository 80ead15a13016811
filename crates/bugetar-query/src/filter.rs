//! Analytics filter model.
//!
//! [`AnalyticsFilter`] is the sparse, serde-friendly shape callers send. It is
//! checked once by [`AnalyticsFilter::validate`], which produces a
//! [`ValidatedFilter`] with resolved defaults, de-duplicated sets and a single
//! period selection. Only validated filters can be compiled.

use bugetar_core::{AccountCategory, PeriodKey, PeriodSelection, ReportPeriod};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// How aggregated amounts are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Raw RON sum.
    #[default]
    Total,
    /// RON sum divided by population.
    PerCapita,
    /// Sum converted to EUR year by year.
    TotalEuro,
    /// EUR sum divided by population.
    PerCapitaEuro,
}

impl Normalization {
    /// Whether the selected amount is divided by population.
    #[must_use]
    pub const fn is_per_capita(self) -> bool {
        matches!(self, Self::PerCapita | Self::PerCapitaEuro)
    }

    /// Whether amounts are converted to EUR.
    #[must_use]
    pub const fn is_euro(self) -> bool {
        matches!(self, Self::TotalEuro | Self::PerCapitaEuro)
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Total => f.write_str("total"),
            Self::PerCapita => f.write_str("per_capita"),
            Self::TotalEuro => f.write_str("total_euro"),
            Self::PerCapitaEuro => f.write_str("per_capita_euro"),
        }
    }
}

/// Negated sub-filter: rows matching any listed value are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExcludeFilter {
    /// Entities to drop.
    pub entity_cuis: Option<Vec<String>>,
    /// Functional codes to drop.
    pub functional_codes: Option<Vec<String>>,
    /// Functional prefixes to drop.
    pub functional_prefixes: Option<Vec<String>>,
    /// Economic codes to drop.
    pub economic_codes: Option<Vec<String>>,
    /// Economic prefixes to drop.
    pub economic_prefixes: Option<Vec<String>>,
    /// Counties to drop.
    pub county_codes: Option<Vec<String>>,
    /// Territorial units to drop.
    pub uat_ids: Option<Vec<i64>>,
}

/// Filter as received from callers.
///
/// Every field is optional at this level so that missing required fields
/// surface as [`ValidationError`]s instead of deserialization failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyticsFilter {
    /// Income or expense side (required).
    pub account_category: Option<AccountCategory>,
    /// Yearly selection; exclusive with `report_period`.
    pub years: Option<Vec<i32>>,
    /// Structured period selection; exclusive with `years`.
    pub report_period: Option<ReportPeriod>,

    /// Report type (joins reports).
    pub report_type: Option<String>,
    /// Main creditor of the report (joins reports).
    pub main_creditor_cui: Option<String>,
    /// Specific reports.
    pub report_ids: Option<Vec<String>>,

    /// Reporting entities.
    pub entity_cuis: Option<Vec<String>>,
    /// Funding sources.
    pub funding_source_ids: Option<Vec<i32>>,
    /// Budget sectors.
    pub budget_sector_ids: Option<Vec<i32>>,
    /// Expense types.
    pub expense_types: Option<Vec<String>>,
    /// Program codes.
    pub program_codes: Option<Vec<String>>,

    /// Exact functional codes.
    pub functional_codes: Option<Vec<String>>,
    /// Functional code prefixes.
    pub functional_prefixes: Option<Vec<String>>,
    /// Exact economic codes.
    pub economic_codes: Option<Vec<String>>,
    /// Economic code prefixes.
    pub economic_prefixes: Option<Vec<String>>,

    /// County codes.
    pub county_codes: Option<Vec<String>>,
    /// Development regions.
    pub regions: Option<Vec<String>>,
    /// Territorial unit ids.
    pub uat_ids: Option<Vec<i64>>,

    /// Entity types.
    pub entity_types: Option<Vec<String>>,
    /// Only UAT administrations (`true`) or only other entities (`false`).
    pub is_uat: Option<bool>,
    /// Case-insensitive substring of the entity name.
    pub search: Option<String>,

    /// Lower bound on the territorial unit's population.
    pub min_population: Option<i64>,
    /// Upper bound on the territorial unit's population.
    pub max_population: Option<i64>,

    /// Lower bound on the aggregated (normalized) amount.
    pub aggregate_min_amount: Option<Decimal>,
    /// Upper bound on the aggregated (normalized) amount.
    pub aggregate_max_amount: Option<Decimal>,

    /// Lower bound on individual line item amounts.
    pub item_min_amount: Option<Decimal>,
    /// Upper bound on individual line item amounts.
    pub item_max_amount: Option<Decimal>,

    /// Amount normalization, `total` when absent.
    pub normalization: Option<Normalization>,

    /// Negated filters.
    pub exclude: Option<ExcludeFilter>,
}

impl AnalyticsFilter {
    /// Start a filter over whole years.
    #[must_use]
    pub fn for_years(account_category: AccountCategory, years: impl IntoIterator<Item = i32>) -> Self {
        Self {
            account_category: Some(account_category),
            years: Some(years.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Start a filter over a structured period selection.
    #[must_use]
    pub fn for_period(account_category: AccountCategory, period: ReportPeriod) -> Self {
        Self {
            account_category: Some(account_category),
            report_period: Some(period),
            ..Self::default()
        }
    }

    /// Set the normalization.
    #[must_use]
    pub const fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = Some(normalization);
        self
    }

    /// Restrict to counties.
    #[must_use]
    pub fn with_counties<S: Into<String>>(mut self, codes: impl IntoIterator<Item = S>) -> Self {
        self.county_codes = Some(codes.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to functional prefixes.
    #[must_use]
    pub fn with_functional_prefixes<S: Into<String>>(
        mut self,
        prefixes: impl IntoIterator<Item = S>,
    ) -> Self {
        self.functional_prefixes = Some(prefixes.into_iter().map(Into::into).collect());
        self
    }

    /// Check the filter and resolve it into its validated form.
    pub fn validate(&self) -> Result<ValidatedFilter, ValidationError> {
        let account_category = self.account_category.ok_or(ValidationError::Missing {
            field: "account_category",
        })?;

        let period = match (&self.years, &self.report_period) {
            (Some(_), Some(_)) => {
                return Err(ValidationError::Conflict {
                    first: "years",
                    second: "report_period",
                });
            }
            (None, None) => {
                return Err(ValidationError::Missing {
                    field: "years or report_period",
                })
            }
            (Some(years), None) => {
                if years.is_empty() {
                    return Err(ValidationError::Empty { field: "years" });
                }
                ReportPeriod::years(set(years))
            }
            (None, Some(period)) => {
                period.check()?;
                let mut period = period.clone();
                if let PeriodSelection::Dates(dates) = &mut period.selection {
                    let sorted: Vec<PeriodKey> = set(dates.as_slice());
                    *dates = sorted;
                }
                period
            }
        };

        let population = Bounds::checked("population", self.min_population, self.max_population)?;
        if population.min.is_some_and(|v| v < 0) {
            return Err(ValidationError::Negative {
                field: "min_population",
            });
        }
        if population.max.is_some_and(|v| v < 0) {
            return Err(ValidationError::Negative {
                field: "max_population",
            });
        }

        let exclude = self.exclude.clone().unwrap_or_default();

        Ok(ValidatedFilter {
            account_category,
            period,
            report_type: non_blank(self.report_type.as_deref()),
            main_creditor_cui: non_blank(self.main_creditor_cui.as_deref()),
            report_ids: opt_set(self.report_ids.as_ref()),
            entity_cuis: opt_set(self.entity_cuis.as_ref()),
            funding_source_ids: opt_set(self.funding_source_ids.as_ref()),
            budget_sector_ids: opt_set(self.budget_sector_ids.as_ref()),
            expense_types: opt_set(self.expense_types.as_ref()),
            program_codes: opt_set(self.program_codes.as_ref()),
            functional_codes: opt_set(self.functional_codes.as_ref()),
            functional_prefixes: opt_set(self.functional_prefixes.as_ref()),
            economic_codes: opt_set(self.economic_codes.as_ref()),
            economic_prefixes: opt_set(self.economic_prefixes.as_ref()),
            county_codes: opt_set(self.county_codes.as_ref()),
            regions: opt_set(self.regions.as_ref()),
            uat_ids: opt_set(self.uat_ids.as_ref()),
            entity_types: opt_set(self.entity_types.as_ref()),
            is_uat: self.is_uat,
            search: non_blank(self.search.as_deref()),
            population,
            item_amount: Bounds::checked("item_amount", self.item_min_amount, self.item_max_amount)?,
            aggregate_amount: Bounds::checked(
                "aggregate_amount",
                self.aggregate_min_amount,
                self.aggregate_max_amount,
            )?,
            normalization: self.normalization.unwrap_or_default(),
            exclude: Exclusions {
                entity_cuis: opt_set(exclude.entity_cuis.as_ref()),
                functional_codes: opt_set(exclude.functional_codes.as_ref()),
                functional_prefixes: opt_set(exclude.functional_prefixes.as_ref()),
                economic_codes: opt_set(exclude.economic_codes.as_ref()),
                economic_prefixes: opt_set(exclude.economic_prefixes.as_ref()),
                county_codes: opt_set(exclude.county_codes.as_ref()),
                uat_ids: opt_set(exclude.uat_ids.as_ref()),
            },
        })
    }
}

/// Optional inclusive bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds<T> {
    /// Lower bound.
    pub min: Option<T>,
    /// Upper bound.
    pub max: Option<T>,
}

impl<T: PartialOrd + Copy + fmt::Display> Bounds<T> {
    fn checked(field: &'static str, min: Option<T>, max: Option<T>) -> Result<Self, ValidationError> {
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(ValidationError::InvalidRange {
                    field,
                    min: lo.to_string(),
                    max: hi.to_string(),
                });
            }
        }
        Ok(Self { min, max })
    }

    /// Whether neither bound is set.
    pub const fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Whether a value lies inside the bounds.
    pub fn contains(&self, value: T) -> bool {
        self.min.map_or(true, |lo| value >= lo) && self.max.map_or(true, |hi| value <= hi)
    }
}

/// Negated filters after validation; empty lists mean "exclude nothing".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Exclusions {
    pub entity_cuis: Vec<String>,
    pub functional_codes: Vec<String>,
    pub functional_prefixes: Vec<String>,
    pub economic_codes: Vec<String>,
    pub economic_prefixes: Vec<String>,
    pub county_codes: Vec<String>,
    pub uat_ids: Vec<i64>,
}

/// A filter that passed validation.
///
/// Set-valued fields are sorted and de-duplicated; an empty list means the
/// dimension is unrestricted. The fields mirror [`AnalyticsFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct ValidatedFilter {
    pub account_category: AccountCategory,
    pub period: ReportPeriod,
    pub report_type: Option<String>,
    pub main_creditor_cui: Option<String>,
    pub report_ids: Vec<String>,
    pub entity_cuis: Vec<String>,
    pub funding_source_ids: Vec<i32>,
    pub budget_sector_ids: Vec<i32>,
    pub expense_types: Vec<String>,
    pub program_codes: Vec<String>,
    pub functional_codes: Vec<String>,
    pub functional_prefixes: Vec<String>,
    pub economic_codes: Vec<String>,
    pub economic_prefixes: Vec<String>,
    pub county_codes: Vec<String>,
    pub regions: Vec<String>,
    pub uat_ids: Vec<i64>,
    pub entity_types: Vec<String>,
    pub is_uat: Option<bool>,
    pub search: Option<String>,
    pub population: Bounds<i64>,
    pub item_amount: Bounds<Decimal>,
    pub aggregate_amount: Bounds<Decimal>,
    pub normalization: Normalization,
    pub exclude: Exclusions,
}

impl ValidatedFilter {
    /// Whether any report-level field is set.
    pub const fn has_report_filters(&self) -> bool {
        self.report_type.is_some() || self.main_creditor_cui.is_some()
    }

    /// Whether any territorial-unit field is set.
    pub fn has_territorial_filters(&self) -> bool {
        !self.county_codes.is_empty()
            || !self.regions.is_empty()
            || !self.uat_ids.is_empty()
            || !self.exclude.county_codes.is_empty()
            || !self.exclude.uat_ids.is_empty()
            || !self.population.is_unbounded()
    }

    /// Whether any entity-table field is set.
    pub fn has_entity_filters(&self) -> bool {
        !self.entity_types.is_empty() || self.is_uat.is_some() || self.search.is_some()
    }
}

fn set<T: Ord + Clone>(values: &[T]) -> Vec<T> {
    let mut out = values.to_vec();
    out.sort();
    out.dedup();
    out
}

fn opt_set<T: Ord + Clone>(values: Option<&Vec<T>>) -> Vec<T> {
    values.map(|v| set(v)).unwrap_or_default()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
