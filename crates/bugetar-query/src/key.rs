//! Deterministic cache keys.
//!
//! A key is the SHA-256 of a canonical JSON rendering of the request:
//!
//! - `null` values, empty arrays and empty objects are dropped, so an absent
//!   optional list and an empty one key the same;
//! - object keys are written in sorted order;
//! - arrays at set-like paths are sorted and de-duplicated;
//! - every other array keeps its order.
//!
//! Paths are dotted field names from the root (`filter.exclude.uat_ids`);
//! array elements share their array's path.

use bugetar_core::ReportPeriod;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt::{self, Write as _};

use crate::error::KeyError;
use crate::filter::{AnalyticsFilter, Normalization};
use crate::plan::AggregateRequest;

/// Namespace of aggregation result keys.
pub const AGGREGATES_NAMESPACE: &str = "aggregates";

/// A namespaced content hash, `namespace:hex`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// The full key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace part.
    pub fn namespace(&self) -> &str {
        self.0.split_once(':').map_or("", |(ns, _)| ns)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Builds keys for one namespace.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: String,
    set_like: BTreeSet<String>,
}

impl CacheKeyBuilder {
    /// Create a builder with no set-like paths.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            set_like: BTreeSet::new(),
        }
    }

    /// Declare arrays at these paths as unordered sets.
    #[must_use]
    pub fn set_like<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_like.extend(paths.into_iter().map(Into::into));
        self
    }

    /// The canonical JSON text a value is hashed from.
    ///
    /// # Errors
    ///
    /// Fails if the value cannot be serialized to JSON.
    pub fn canonical<T: Serialize>(&self, value: &T) -> Result<String, KeyError> {
        let value = serde_json::to_value(value)?;
        let value = self
            .canonicalize(value, "")
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let mut out = String::new();
        write_canonical(&value, &mut out);
        Ok(out)
    }

    /// Hash a value into a key.
    ///
    /// # Errors
    ///
    /// Fails if the value cannot be serialized to JSON.
    pub fn build<T: Serialize>(&self, value: &T) -> Result<CacheKey, KeyError> {
        let canonical = self.canonical(value)?;
        let digest = Sha256::digest(canonical.as_bytes());

        let mut key = String::with_capacity(self.namespace.len() + 65);
        key.push_str(&self.namespace);
        key.push(':');
        for byte in digest.iter() {
            let _ = write!(key, "{byte:02x}");
        }
        Ok(CacheKey(key))
    }

    fn canonicalize(&self, value: Value, path: &str) -> Option<Value> {
        match value {
            Value::Null => None,
            Value::Array(items) => {
                let mut items: Vec<Value> = items
                    .into_iter()
                    .filter_map(|item| self.canonicalize(item, path))
                    .collect();
                if items.is_empty() {
                    return None;
                }
                if self.set_like.contains(path) {
                    let mut keyed: Vec<(String, Value)> = items
                        .into_iter()
                        .map(|item| {
                            let mut text = String::new();
                            write_canonical(&item, &mut text);
                            (text, item)
                        })
                        .collect();
                    keyed.sort_by(|a, b| a.0.cmp(&b.0));
                    keyed.dedup_by(|a, b| a.0 == b.0);
                    items = keyed.into_iter().map(|(_, item)| item).collect();
                }
                Some(Value::Array(items))
            }
            Value::Object(map) => {
                let map: serde_json::Map<String, Value> = map
                    .into_iter()
                    .filter_map(|(field, child)| {
                        let child_path = if path.is_empty() {
                            field.clone()
                        } else {
                            format!("{path}.{field}")
                        };
                        self.canonicalize(child, &child_path).map(|v| (field, v))
                    })
                    .collect();
                if map.is_empty() {
                    None
                } else {
                    Some(Value::Object(map))
                }
            }
            scalar => Some(scalar),
        }
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (field, child)) in fields.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(field.clone()).to_string());
                out.push(':');
                write_canonical(child, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Filter collections that are unordered sets.
pub const FILTER_SET_FIELDS: &[&str] = &[
    "years",
    "report_ids",
    "entity_cuis",
    "funding_source_ids",
    "budget_sector_ids",
    "expense_types",
    "program_codes",
    "functional_codes",
    "functional_prefixes",
    "economic_codes",
    "economic_prefixes",
    "county_codes",
    "regions",
    "uat_ids",
    "entity_types",
    "report_period.selection.dates",
    "exclude.entity_cuis",
    "exclude.functional_codes",
    "exclude.functional_prefixes",
    "exclude.economic_codes",
    "exclude.economic_prefixes",
    "exclude.county_codes",
    "exclude.uat_ids",
];

/// The builder used for aggregation requests.
///
/// Every filter collection is set-like; `sort` is ordered.
pub fn aggregate_key_builder() -> CacheKeyBuilder {
    CacheKeyBuilder::new(AGGREGATES_NAMESPACE)
        .set_like(FILTER_SET_FIELDS.iter().map(|field| format!("filter.{field}")))
}

/// Key an aggregation request.
///
/// Requests that validate and compile to the same plan key the same:
/// decimal bounds are scale-normalized (`10.0` and `10`), defaults are
/// dropped (`total` normalization, offset `0`), text fields are trimmed with
/// blanks dropped, and `years` keys like the equivalent yearly
/// `report_period`.
///
/// # Errors
///
/// Fails if the request cannot be serialized.
pub fn aggregate_key(request: &AggregateRequest) -> Result<CacheKey, KeyError> {
    let mut request = request.clone();
    normalize_defaults(&mut request.filter);
    if request.offset == Some(0) {
        request.offset = None;
    }
    aggregate_key_builder().build(&request)
}

fn normalize_defaults(filter: &mut AnalyticsFilter) {
    // Both forms validate to the same selection; conflicting or empty ones
    // are left alone and fail validation.
    if filter.report_period.is_none() && filter.years.as_ref().is_some_and(|y| !y.is_empty()) {
        filter.report_period = filter.years.take().map(ReportPeriod::years);
    }
    for text in [
        &mut filter.search,
        &mut filter.report_type,
        &mut filter.main_creditor_cui,
    ] {
        *text = text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
    }
    for bound in [
        &mut filter.aggregate_min_amount,
        &mut filter.aggregate_max_amount,
        &mut filter.item_min_amount,
        &mut filter.item_max_amount,
    ] {
        if let Some(value) = bound.as_mut() {
            *value = value.normalize();
        }
    }
    if filter.normalization == Some(Normalization::Total) {
        filter.normalization = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ExcludeFilter;
    use crate::plan::{GroupingDimension, SortField, SortSpec};
    use bugetar_core::{AccountCategory, PeriodSelection, PeriodType};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn request(filter: AnalyticsFilter) -> AggregateRequest {
        AggregateRequest::new(filter, GroupingDimension::County)
    }

    #[test]
    fn test_key_format() {
        let key = CacheKeyBuilder::new("ns").build(&json!({"a": 1})).unwrap();
        assert_eq!(key.namespace(), "ns");
        assert_eq!(key.as_str().len(), "ns:".len() + 64);
    }

    #[test]
    fn test_object_key_order_ignored() {
        let builder = CacheKeyBuilder::new("ns");
        let a = builder.build(&json!({"a": 1, "b": {"c": 2, "d": 3}})).unwrap();
        let b = builder.build(&json!({"b": {"d": 3, "c": 2}, "a": 1})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_nulls_and_empty_arrays_dropped() {
        let builder = CacheKeyBuilder::new("ns");
        let a = builder.build(&json!({"a": 1})).unwrap();
        let b = builder.build(&json!({"a": 1, "b": null, "c": [], "d": {}})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_set_like_only_where_declared() {
        let builder = CacheKeyBuilder::new("ns").set_like(["tags"]);
        assert_eq!(
            builder.build(&json!({"tags": ["b", "a", "b"]})).unwrap(),
            builder.build(&json!({"tags": ["a", "b"]})).unwrap()
        );
        assert_ne!(
            builder.build(&json!({"order": ["b", "a"]})).unwrap(),
            builder.build(&json!({"order": ["a", "b"]})).unwrap()
        );
    }

    #[test]
    fn test_filter_lists_are_sets() {
        let a = AnalyticsFilter::for_years(AccountCategory::Expense, [2023, 2022])
            .with_counties(["TM", "CJ"]);
        let b = AnalyticsFilter::for_years(AccountCategory::Expense, [2022, 2023, 2023])
            .with_counties(["CJ", "TM"]);
        assert_eq!(
            aggregate_key(&request(a)).unwrap(),
            aggregate_key(&request(b)).unwrap()
        );
    }

    #[test]
    fn test_absent_and_empty_lists_equal() {
        let a = AnalyticsFilter::for_years(AccountCategory::Expense, [2023]);
        let mut b = a.clone();
        b.entity_cuis = Some(Vec::new());
        b.exclude = Some(ExcludeFilter::default());
        assert_eq!(
            aggregate_key(&request(a)).unwrap(),
            aggregate_key(&request(b)).unwrap()
        );
    }

    #[test]
    fn test_decimal_scale_ignored() {
        let mut a = AnalyticsFilter::for_years(AccountCategory::Expense, [2023]);
        a.aggregate_min_amount = Some(dec!(10.0));
        let mut b = a.clone();
        b.aggregate_min_amount = Some(dec!(10));
        assert_eq!(
            aggregate_key(&request(a)).unwrap(),
            aggregate_key(&request(b)).unwrap()
        );
    }

    #[test]
    fn test_semantic_changes_change_key() {
        let base = AnalyticsFilter::for_years(AccountCategory::Expense, [2023]);
        let per_capita = base.clone().with_normalization(Normalization::PerCapita);
        assert_ne!(
            aggregate_key(&request(base.clone())).unwrap(),
            aggregate_key(&request(per_capita)).unwrap()
        );

        let other_grouping = AggregateRequest::new(base.clone(), GroupingDimension::Uat);
        assert_ne!(
            aggregate_key(&request(base.clone())).unwrap(),
            aggregate_key(&other_grouping).unwrap()
        );

        assert_ne!(
            aggregate_key(&request(base.clone())).unwrap(),
            aggregate_key(&request(base).page(10, 0)).unwrap()
        );
    }

    #[test]
    fn test_search_is_trimmed_and_blank_dropped() {
        let base = AnalyticsFilter::for_years(AccountCategory::Expense, [2023]);
        let mut padded = base.clone();
        padded.search = Some("  cluj ".into());
        let mut trimmed = base.clone();
        trimmed.search = Some("cluj".into());
        assert_eq!(
            aggregate_key(&request(padded)).unwrap(),
            aggregate_key(&request(trimmed)).unwrap()
        );

        let mut blank = base.clone();
        blank.search = Some("   ".into());
        blank.report_type = Some(String::new());
        assert_eq!(
            aggregate_key(&request(blank)).unwrap(),
            aggregate_key(&request(base)).unwrap()
        );
    }

    #[test]
    fn test_zero_offset_keys_like_none() {
        let base = AnalyticsFilter::for_years(AccountCategory::Expense, [2023]);
        let mut zero = request(base.clone());
        zero.offset = Some(0);
        assert_eq!(
            aggregate_key(&zero).unwrap(),
            aggregate_key(&request(base.clone())).unwrap()
        );
        assert_ne!(
            aggregate_key(&request(base.clone()).page(10, 5)).unwrap(),
            aggregate_key(&request(base).page(10, 0)).unwrap()
        );
    }

    #[test]
    fn test_years_key_like_yearly_report_period() {
        let years = AnalyticsFilter::for_years(AccountCategory::Expense, [2023, 2022]);
        let period =
            AnalyticsFilter::for_period(AccountCategory::Expense, ReportPeriod::years([2022, 2023]));
        assert_eq!(
            aggregate_key(&request(years.clone())).unwrap(),
            aggregate_key(&request(period)).unwrap()
        );

        let other_years =
            AnalyticsFilter::for_period(AccountCategory::Expense, ReportPeriod::years([2023]));
        assert_ne!(
            aggregate_key(&request(years)).unwrap(),
            aggregate_key(&request(other_years)).unwrap()
        );
    }

    #[test]
    fn test_conflicting_period_forms_not_merged() {
        let mut both = AnalyticsFilter::for_years(AccountCategory::Expense, [2023]);
        both.report_period = Some(ReportPeriod::years([2023]));
        let years = AnalyticsFilter::for_years(AccountCategory::Expense, [2023]);
        assert_ne!(
            aggregate_key(&request(both)).unwrap(),
            aggregate_key(&request(years)).unwrap()
        );
    }

    #[test]
    fn test_period_dates_are_sets() {
        let months = |keys: &[&str]| {
            AnalyticsFilter::for_period(
                AccountCategory::Expense,
                ReportPeriod {
                    period_type: PeriodType::Month,
                    selection: PeriodSelection::Dates(
                        keys.iter().map(|k| k.parse().unwrap()).collect(),
                    ),
                },
            )
        };
        assert_eq!(
            aggregate_key(&request(months(&["2023-03", "2023-01", "2023-03"]))).unwrap(),
            aggregate_key(&request(months(&["2023-01", "2023-03"]))).unwrap()
        );
    }

    #[test]
    fn test_sort_order_is_significant() {
        let base = AnalyticsFilter::for_years(AccountCategory::Expense, [2023]);
        let a = request(base.clone())
            .sorted_by(SortSpec::desc(SortField::Amount))
            .sorted_by(SortSpec::asc(SortField::Name));
        let b = request(base)
            .sorted_by(SortSpec::asc(SortField::Name))
            .sorted_by(SortSpec::desc(SortField::Amount));
        assert_ne!(aggregate_key(&a).unwrap(), aggregate_key(&b).unwrap());
    }
}
