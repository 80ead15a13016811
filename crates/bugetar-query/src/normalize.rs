//! Turning aggregated sums into reported amounts.
//!
//! Storage returns one [`RawAggregateRow`] per group (per group and year for
//! yearly plans). This module derives the total, per-capita and selected
//! amounts, folds yearly rows through exchange rates, and applies the
//! thresholds, ordering and pagination that yearly plans leave to the
//! application.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::QueryError;
use crate::filter::{Bounds, Normalization};
use crate::plan::{GroupingDimension, SortDirection, SortField, SortSpec};
use crate::rates::RateSource;

/// One aggregated group as produced by storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAggregateRow {
    /// Group key: unit id, county code, CUI or classification code.
    pub key: String,
    /// Display name, when storage knows it.
    #[serde(default)]
    pub name: Option<String>,
    /// County code of the group.
    #[serde(default)]
    pub county_code: Option<String>,
    /// County name of the group.
    #[serde(default)]
    pub county_name: Option<String>,
    /// SIRUTA code (unit grouping).
    #[serde(default)]
    pub siruta_code: Option<String>,
    /// Entity CUI (entity grouping, or the county's administering entity).
    #[serde(default)]
    pub entity_cui: Option<String>,
    /// Year of the subtotal (yearly plans only).
    #[serde(default)]
    pub year: Option<i32>,
    /// Population used for per-capita amounts.
    #[serde(default)]
    pub population: Option<i64>,
    /// Signed sum of the amount column.
    pub sum_amount: Decimal,
    /// Number of line items summed.
    pub line_count: u64,
}

impl RawAggregateRow {
    /// Create a row with only a key and a sum.
    #[must_use]
    pub fn new(key: impl Into<String>, sum_amount: Decimal) -> Self {
        Self {
            key: key.into(),
            name: None,
            county_code: None,
            county_name: None,
            siruta_code: None,
            entity_cui: None,
            year: None,
            population: None,
            sum_amount,
            line_count: 0,
        }
    }

    /// Set the population.
    #[must_use]
    pub const fn with_population(mut self, population: Option<i64>) -> Self {
        self.population = population;
        self
    }

    /// Set the year.
    #[must_use]
    pub const fn in_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }
}

/// Amounts derived for one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedAmounts {
    /// Sum, in RON or EUR.
    pub total: Decimal,
    /// Sum divided by population; zero without a positive population.
    pub per_capita: Decimal,
    /// The amount the normalization selects.
    pub selected: Decimal,
}

impl NormalizedAmounts {
    fn new(total: Decimal, population: Option<i64>, normalization: Normalization) -> Self {
        let per_capita = per_capita(total, population);
        let selected = if normalization.is_per_capita() {
            per_capita
        } else {
            total
        };
        Self {
            total,
            per_capita,
            selected,
        }
    }
}

/// `amount / population`, or zero when the population is missing, zero or
/// negative, or the division overflows.
#[must_use]
pub fn per_capita(amount: Decimal, population: Option<i64>) -> Decimal {
    match population {
        Some(p) if p > 0 => amount.checked_div(Decimal::from(p)).unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

/// Derive the amounts of a row whose sum is already in the target currency.
#[must_use]
pub fn normalize(row: &RawAggregateRow, normalization: Normalization) -> NormalizedAmounts {
    NormalizedAmounts::new(row.sum_amount, row.population, normalization)
}

/// One reported group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRow {
    /// Group key.
    pub key: String,
    /// Display name.
    pub name: Option<String>,
    /// County code.
    pub county_code: Option<String>,
    /// County name.
    pub county_name: Option<String>,
    /// SIRUTA code.
    pub siruta_code: Option<String>,
    /// Entity CUI.
    pub entity_cui: Option<String>,
    /// Population the per-capita amount was divided by.
    pub population: Option<i64>,
    /// Sum in the reporting currency.
    pub total_amount: Decimal,
    /// Per-capita amount.
    pub per_capita_amount: Decimal,
    /// Amount selected by the normalization.
    pub amount: Decimal,
    /// Number of line items.
    pub line_count: u64,
}

impl AggregateRow {
    /// Build a reported row from a storage row.
    #[must_use]
    pub fn from_raw(row: RawAggregateRow, normalization: Normalization) -> Self {
        let amounts = normalize(&row, normalization);
        Self::with_amounts(row, amounts)
    }

    fn with_amounts(row: RawAggregateRow, amounts: NormalizedAmounts) -> Self {
        Self {
            key: row.key,
            name: row.name,
            county_code: row.county_code,
            county_name: row.county_name,
            siruta_code: row.siruta_code,
            entity_cui: row.entity_cui,
            population: row.population,
            total_amount: amounts.total,
            per_capita_amount: amounts.per_capita,
            amount: amounts.selected,
            line_count: row.line_count,
        }
    }

    fn view(&self) -> SortView<'_> {
        SortView {
            key: &self.key,
            name: self.name.as_deref(),
            population: self.population,
            amounts: NormalizedAmounts {
                total: self.total_amount,
                per_capita: self.per_capita_amount,
                selected: self.amount,
            },
        }
    }
}

/// Fold yearly rows into one row per group, converting each year with its own rate.
///
/// Rows are converted before summing, so a multi-year total is never
/// converted with a single rate. The population is taken from the group's
/// first row; it does not vary by year.
///
/// # Errors
///
/// Fails when a row has no year or the rate source refuses a year.
pub fn fold_yearly(
    rows: Vec<RawAggregateRow>,
    normalization: Normalization,
    rates: &dyn RateSource,
) -> Result<Vec<AggregateRow>, QueryError> {
    let mut groups: BTreeMap<String, RawAggregateRow> = BTreeMap::new();

    for row in rows {
        let year = row.year.ok_or_else(|| {
            QueryError::Evaluation(format!("yearly row for {} has no year", row.key))
        })?;
        let converted = rates.convert(row.sum_amount, year)?;

        match groups.get_mut(&row.key) {
            Some(group) => {
                group.sum_amount += converted;
                group.line_count += row.line_count;
            }
            None => {
                let mut group = row;
                group.sum_amount = converted;
                group.year = None;
                groups.insert(group.key.clone(), group);
            }
        }
    }

    Ok(groups
        .into_values()
        .map(|row| AggregateRow::from_raw(row, normalization))
        .collect())
}

/// Keep the rows whose selected amount lies inside the bounds.
pub fn apply_thresholds(rows: &mut Vec<AggregateRow>, bounds: &Bounds<Decimal>) {
    if !bounds.is_unbounded() {
        rows.retain(|row| bounds.contains(row.amount));
    }
}

/// Sort rows; an empty spec list sorts by amount descending.
pub fn sort_rows(rows: &mut [AggregateRow], specs: &[SortSpec], dimension: GroupingDimension) {
    let default = [SortSpec::desc(SortField::Amount)];
    let specs = if specs.is_empty() { &default[..] } else { specs };
    rows.sort_by(|a, b| compare_views(&a.view(), &b.view(), specs, dimension));
}

/// Apply offset and limit.
#[must_use]
pub fn paginate<T>(rows: Vec<T>, offset: u64, limit: Option<u64>) -> Vec<T> {
    let offset = usize::try_from(offset).unwrap_or(usize::MAX);
    let rows = rows.into_iter().skip(offset);
    match limit.and_then(|l| usize::try_from(l).ok()) {
        Some(limit) => rows.take(limit).collect(),
        None => rows.collect(),
    }
}

/// The fields a sort can read.
pub(crate) struct SortView<'r> {
    pub key: &'r str,
    pub name: Option<&'r str>,
    pub population: Option<i64>,
    pub amounts: NormalizedAmounts,
}

impl<'r> SortView<'r> {
    pub(crate) fn of_raw(
        row: &'r RawAggregateRow,
        normalization: Normalization,
    ) -> Self {
        Self {
            key: &row.key,
            name: row.name.as_deref(),
            population: row.population,
            amounts: normalize(row, normalization),
        }
    }
}

/// Compare two groups: every spec in turn with NULLs last, then the key ascending.
pub(crate) fn compare_views(
    a: &SortView<'_>,
    b: &SortView<'_>,
    specs: &[SortSpec],
    dimension: GroupingDimension,
) -> Ordering {
    for spec in specs {
        let ord = match spec.by {
            SortField::Amount => directed(a.amounts.selected.cmp(&b.amounts.selected), spec.direction),
            SortField::TotalAmount => directed(a.amounts.total.cmp(&b.amounts.total), spec.direction),
            SortField::PerCapitaAmount => {
                directed(a.amounts.per_capita.cmp(&b.amounts.per_capita), spec.direction)
            }
            SortField::Name => nulls_last(a.name, b.name, spec.direction),
            SortField::Population => nulls_last(a.population, b.population, spec.direction),
            SortField::Code => directed(compare_keys(a.key, b.key, dimension), spec.direction),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    compare_keys(a.key, b.key, dimension)
}

/// Unit keys are numeric ids; every other key compares as text.
fn compare_keys(a: &str, b: &str, dimension: GroupingDimension) -> Ordering {
    if dimension == GroupingDimension::Uat {
        if let (Ok(x), Ok(y)) = (a.parse::<i64>(), b.parse::<i64>()) {
            return x.cmp(&y);
        }
    }
    a.cmp(b)
}

fn directed(ord: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

fn nulls_last<T: Ord>(a: Option<T>, b: Option<T>, direction: SortDirection) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => directed(x.cmp(&y), direction),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::ExchangeRates;
    use rust_decimal_macros::dec;

    #[test]
    fn test_per_capita_zero_guard() {
        assert_eq!(per_capita(dec!(100), None), Decimal::ZERO);
        assert_eq!(per_capita(dec!(100), Some(0)), Decimal::ZERO);
        assert_eq!(per_capita(dec!(100), Some(-5)), Decimal::ZERO);
        assert_eq!(per_capita(dec!(100), Some(4)), dec!(25));
    }

    #[test]
    fn test_normalize_selects_amount() {
        let row = RawAggregateRow::new("CJ", dec!(50000)).with_population(Some(1000));

        let total = normalize(&row, Normalization::Total);
        assert_eq!(total.selected, dec!(50000));
        assert_eq!(total.per_capita, dec!(50));

        let per_capita = normalize(&row, Normalization::PerCapita);
        assert_eq!(per_capita.selected, dec!(50));
        assert_eq!(per_capita.total, dec!(50000));
    }

    #[test]
    fn test_fold_converts_each_year() {
        let rates = ExchangeRates::new()
            .with_rate(2022, dec!(5))
            .with_rate(2023, dec!(4));
        let rows = vec![
            RawAggregateRow::new("65", dec!(100)).in_year(2022),
            RawAggregateRow::new("65", dec!(100)).in_year(2023),
            RawAggregateRow::new("66", dec!(40)).in_year(2023),
        ];

        let folded = fold_yearly(rows, Normalization::TotalEuro, &rates).unwrap();
        assert_eq!(folded.len(), 2);
        assert_eq!(folded[0].key, "65");
        assert_eq!(folded[0].amount, dec!(45));
        assert_eq!(folded[1].amount, dec!(10));
    }

    #[test]
    fn test_fold_per_capita_divides_after_conversion() {
        let rates = ExchangeRates::new().with_rate(2023, dec!(5));
        let rows = vec![RawAggregateRow::new("1", dec!(1000))
            .in_year(2023)
            .with_population(Some(10))];
        let folded = fold_yearly(rows, Normalization::PerCapitaEuro, &rates).unwrap();
        assert_eq!(folded[0].total_amount, dec!(200));
        assert_eq!(folded[0].amount, dec!(20));
    }

    #[test]
    fn test_fold_requires_year() {
        let rows = vec![RawAggregateRow::new("1", dec!(1))];
        assert!(fold_yearly(rows, Normalization::TotalEuro, &ExchangeRates::new()).is_err());
    }

    #[test]
    fn test_sort_thresholds_and_pages() {
        let mut rows: Vec<AggregateRow> = [("2", dec!(10)), ("10", dec!(30)), ("3", dec!(10)), ("4", dec!(1))]
            .into_iter()
            .map(|(key, sum)| AggregateRow::from_raw(RawAggregateRow::new(key, sum), Normalization::Total))
            .collect();

        apply_thresholds(
            &mut rows,
            &Bounds {
                min: Some(dec!(5)),
                max: None,
            },
        );
        sort_rows(&mut rows, &[], GroupingDimension::Uat);
        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["10", "2", "3"]);

        let page = paginate(rows, 1, Some(1));
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].key, "2");
    }

    #[test]
    fn test_null_names_sort_last_both_ways() {
        let mut named = RawAggregateRow::new("1", dec!(1));
        named.name = Some("Cluj".into());
        let anonymous = RawAggregateRow::new("2", dec!(1));

        for spec in [SortSpec::asc(SortField::Name), SortSpec::desc(SortField::Name)] {
            let mut rows = vec![
                AggregateRow::from_raw(anonymous.clone(), Normalization::Total),
                AggregateRow::from_raw(named.clone(), Normalization::Total),
            ];
            sort_rows(&mut rows, &[spec], GroupingDimension::Entity);
            assert_eq!(rows[0].key, "1");
        }
    }
}
