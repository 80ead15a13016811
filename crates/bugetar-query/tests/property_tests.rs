//! Property-based tests for bugetar-query.
//!
//! Run with: cargo test -p bugetar-query --test `property_tests`

use bugetar_core::{AccountCategory, PeriodKey, PeriodSelection, PeriodType, ReportPeriod};
use bugetar_query::{
    aggregate_key, fold_yearly, per_capita, AggregateRequest, AnalyticsFilter, ExcludeFilter,
    ExchangeRates, GroupingDimension, Normalization, RawAggregateRow, SortField, SortSpec,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn arb_codes() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[0-9]{2}(\\.[0-9]{2}){0,2}", 1..6)
}

fn arb_ids() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..5000, 1..6)
}

fn arb_small_ids() -> impl Strategy<Value = Vec<i32>> {
    prop::collection::vec(1i32..20, 1..6)
}

fn arb_months() -> impl Strategy<Value = Vec<PeriodKey>> {
    prop::collection::vec(
        (2015i32..2030, 1u8..=12).prop_map(|(year, month)| PeriodKey::Month { year, month }),
        1..8,
    )
}

fn arb_amount() -> impl Strategy<Value = Decimal> {
    (-1_000_000_000i64..1_000_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// A filter with every collection populated.
fn full_filter(
    codes: &[String],
    ids: &[i64],
    small: &[i32],
) -> AnalyticsFilter {
    let text = || Some(codes.to_vec());
    AnalyticsFilter {
        account_category: Some(AccountCategory::Expense),
        years: Some(small.iter().map(|y| 2000 + y).collect()),
        report_ids: text(),
        entity_cuis: text(),
        funding_source_ids: Some(small.to_vec()),
        budget_sector_ids: Some(small.to_vec()),
        expense_types: text(),
        program_codes: text(),
        functional_codes: text(),
        functional_prefixes: text(),
        economic_codes: text(),
        economic_prefixes: text(),
        county_codes: text(),
        regions: text(),
        uat_ids: Some(ids.to_vec()),
        entity_types: text(),
        exclude: Some(ExcludeFilter {
            entity_cuis: text(),
            functional_codes: text(),
            functional_prefixes: text(),
            economic_codes: text(),
            economic_prefixes: text(),
            county_codes: text(),
            uat_ids: Some(ids.to_vec()),
        }),
        ..AnalyticsFilter::default()
    }
}

fn reversed<T: Clone>(values: &[T]) -> Vec<T> {
    values.iter().rev().cloned().collect()
}

fn doubled<T: Clone>(values: &[T]) -> Vec<T> {
    values.iter().chain(values).cloned().collect()
}

proptest! {
    /// Reordering or repeating any set-valued field never changes the key.
    #[test]
    fn key_ignores_collection_order(codes in arb_codes(), ids in arb_ids(), small in arb_small_ids()) {
        let a = full_filter(&codes, &ids, &small);
        let b = full_filter(&reversed(&codes), &reversed(&ids), &reversed(&small));
        let c = full_filter(&doubled(&codes), &doubled(&ids), &doubled(&small));

        let key = |f: AnalyticsFilter| aggregate_key(&AggregateRequest::new(f, GroupingDimension::Entity)).unwrap();
        let ka = key(a);
        prop_assert_eq!(&ka, &key(b));
        prop_assert_eq!(&ka, &key(c));
    }

    /// The explicit period list is a set as well.
    #[test]
    fn key_ignores_period_date_order(months in arb_months()) {
        let filter = |dates: Vec<PeriodKey>| {
            AnalyticsFilter::for_period(
                AccountCategory::Income,
                ReportPeriod {
                    period_type: PeriodType::Month,
                    selection: PeriodSelection::Dates(dates),
                },
            )
        };
        let key = |f: AnalyticsFilter| aggregate_key(&AggregateRequest::new(f, GroupingDimension::County)).unwrap();

        let ka = key(filter(months.clone()));
        prop_assert_eq!(&ka, &key(filter(reversed(&months))));
        prop_assert_eq!(&ka, &key(filter(doubled(&months))));
    }

    /// Multi-key sort order is part of the key.
    #[test]
    fn key_respects_sort_order(codes in arb_codes()) {
        let filter = AnalyticsFilter::for_years(AccountCategory::Expense, [2023])
            .with_functional_prefixes(codes);
        let first = SortSpec::desc(SortField::Amount);
        let second = SortSpec::asc(SortField::Code);

        let a = AggregateRequest::new(filter.clone(), GroupingDimension::FunctionalCode)
            .sorted_by(first)
            .sorted_by(second);
        let b = AggregateRequest::new(filter, GroupingDimension::FunctionalCode)
            .sorted_by(second)
            .sorted_by(first);
        prop_assert_ne!(aggregate_key(&a).unwrap(), aggregate_key(&b).unwrap());
    }

    /// Per-capita amounts are zero without a positive population.
    #[test]
    fn per_capita_zero_guard(amount in arb_amount(), population in prop::option::of(-10i64..=0)) {
        prop_assert_eq!(per_capita(amount, population), Decimal::ZERO);
    }

    /// Folding converts each year separately, so it equals the sum of the
    /// per-year conversions.
    #[test]
    fn fold_equals_sum_of_yearly_conversions(
        amounts in prop::collection::vec(arb_amount(), 1..5),
        rate_milli in prop::collection::vec(3000i64..6000, 5),
    ) {
        let mut rates = ExchangeRates::new();
        for (i, milli) in rate_milli.iter().enumerate() {
            rates = rates.with_rate(2019 + i as i32, Decimal::new(*milli, 3));
        }

        let rows: Vec<RawAggregateRow> = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| RawAggregateRow::new("65", *amount).in_year(2019 + i as i32))
            .collect();

        let expected: Decimal = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| *amount / Decimal::new(rate_milli[i], 3))
            .sum();

        let folded = fold_yearly(rows, Normalization::TotalEuro, &rates).unwrap();
        prop_assert_eq!(folded.len(), 1);
        prop_assert_eq!(folded[0].total_amount, expected);
    }
}

#[test]
fn fold_differs_from_single_rate_conversion() {
    let rates = ExchangeRates::new()
        .with_rate(2022, Decimal::new(5, 0))
        .with_rate(2023, Decimal::new(4, 0));
    let rows = vec![
        RawAggregateRow::new("65", Decimal::new(100, 0)).in_year(2022),
        RawAggregateRow::new("65", Decimal::new(100, 0)).in_year(2023),
    ];

    let folded = fold_yearly(rows, Normalization::TotalEuro, &rates).unwrap();
    let single_rate = Decimal::new(200, 0) / Decimal::new(4, 0);

    assert_eq!(folded[0].total_amount, Decimal::new(45, 0));
    assert_ne!(folded[0].total_amount, single_rate);
}
