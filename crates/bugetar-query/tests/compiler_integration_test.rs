//! Integration tests for the aggregate compiler.
//!
//! Tests cover join selection, parameter binding, HAVING placement and
//! end-to-end evaluation of compiled plans over an in-memory dataset.

use bugetar_core::{
    AccountCategory, Dataset, Entity, ExecutionLineItem, PeriodKey, Report, ReportPeriod,
    TerritorialUnit,
};
use bugetar_query::plan::Param;
use bugetar_query::{
    compile, AggregateRow, AnalyticsFilter, ExcludeFilter, GroupingDimension, Join, Normalization,
    PlanExecutor, QueryOptions, SortField, SortSpec,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ============================================================================
// Helper Functions
// ============================================================================

fn make_dataset() -> Dataset {
    let mut ds = Dataset::new();
    ds.uats = vec![
        TerritorialUnit::new(1, "CJ", "Judetul Cluj", "CJ", "Cluj")
            .with_population(1000)
            .with_region("Nord-Vest"),
        TerritorialUnit::new(2, "179132", "Bucuresti", "B", "Bucuresti").with_population(2000),
        TerritorialUnit::new(3, "179141", "Sector 1", "B", "Bucuresti").with_population(300),
        TerritorialUnit::new(4, "54975", "Cluj-Napoca", "CJ", "Cluj").with_population(0),
    ];
    ds.entities = vec![
        Entity::new("10", "Consiliul Judetean Cluj").administering(1),
        Entity::new("20", "Primaria Municipiului Bucuresti").administering(2),
        Entity::new("30", "Primaria Sector 1").administering(3),
        Entity::new("40", "Primaria Cluj-Napoca").administering(4),
        Entity::new("50", "Spitalul Clinic").located_in(4),
    ];
    ds.reports = vec![
        Report {
            report_id: "r-10".into(),
            entity_cui: "10".into(),
            report_type: "Executie bugetara detaliata".into(),
            main_creditor_cui: None,
            year: 2023,
        },
        Report {
            report_id: "r-20".into(),
            entity_cui: "20".into(),
            report_type: "Executie bugetara agregata".into(),
            main_creditor_cui: None,
            year: 2023,
        },
    ];
    ds.line_items = vec![
        ExecutionLineItem::yearly("10", 2023, AccountCategory::Expense, "65.02", dec!(50000))
            .with_report("r-10"),
        ExecutionLineItem::yearly("20", 2023, AccountCategory::Expense, "65.02", dec!(4000))
            .with_report("r-20"),
        ExecutionLineItem::yearly("30", 2023, AccountCategory::Expense, "66.02", dec!(600)),
        ExecutionLineItem::yearly("40", 2023, AccountCategory::Expense, "70.02", dec!(900)),
        ExecutionLineItem::yearly("50", 2023, AccountCategory::Expense, "66.02.01", dec!(100)),
        ExecutionLineItem::yearly("10", 2022, AccountCategory::Expense, "65.02", dec!(1)),
    ];
    ds
}

fn expense_2023() -> AnalyticsFilter {
    AnalyticsFilter::for_years(AccountCategory::Expense, [2023])
}

fn run(filter: &AnalyticsFilter, dimension: GroupingDimension, options: &QueryOptions) -> Vec<AggregateRow> {
    let ds = make_dataset();
    let validated = filter.validate().unwrap();
    let plan = compile(&validated, dimension, options).unwrap();
    PlanExecutor::new(&ds)
        .execute(&plan)
        .unwrap()
        .into_iter()
        .map(|row| AggregateRow::from_raw(row, validated.normalization))
        .collect()
}

// ============================================================================
// Plan Shape Tests
// ============================================================================

#[test]
fn test_no_report_fields_no_reports_join() {
    for dimension in [
        GroupingDimension::Uat,
        GroupingDimension::County,
        GroupingDimension::Entity,
        GroupingDimension::FunctionalCode,
        GroupingDimension::EconomicCode,
    ] {
        let plan = compile(&expense_2023().validate().unwrap(), dimension, &QueryOptions::default()).unwrap();
        assert!(!plan.joins.contains(&Join::Reports), "{dimension}");
        assert!(!plan.statement().sql.contains("reports r"), "{dimension}");
    }
}

#[test]
fn test_main_creditor_adds_exactly_reports_join() {
    let mut filter = expense_2023();
    filter.main_creditor_cui = Some("10".into());
    let plan = compile(
        &filter.validate().unwrap(),
        GroupingDimension::FunctionalCode,
        &QueryOptions::default(),
    )
    .unwrap();
    assert_eq!(plan.joins.len(), 1);
    assert!(plan.joins.contains(&Join::Reports));
}

#[test]
fn test_no_literal_values_in_sql() {
    let mut filter = expense_2023()
        .with_counties(["CJ"])
        .with_normalization(Normalization::PerCapita);
    filter.search = Some("Primaria".into());
    filter.aggregate_min_amount = Some(dec!(12345.67));

    let plan = compile(
        &filter.validate().unwrap(),
        GroupingDimension::County,
        &QueryOptions::default(),
    )
    .unwrap();
    let stmt = plan.statement();

    for literal in ["CJ", "Primaria", "12345.67", "2023", "179132", "'B'"] {
        assert!(!stmt.sql.contains(literal), "{literal} leaked into SQL");
    }
    assert!(stmt.params.contains(&Param::Text("179132".into())));
    assert!(stmt.params.contains(&Param::Text("%Primaria%".into())));
}

#[test]
fn test_placeholders_match_params() {
    let filter = expense_2023()
        .with_counties(["CJ", "B"])
        .with_functional_prefixes(["65"]);
    let options = QueryOptions {
        sort: vec![SortSpec::desc(SortField::PerCapitaAmount)],
        limit: Some(5),
        offset: 5,
    };
    let plan = compile(&filter.validate().unwrap(), GroupingDimension::County, &options).unwrap();

    for stmt in [plan.statement(), plan.count_statement()] {
        let n = stmt.params.len();
        assert!(stmt.sql.contains(&format!("${n}")));
        assert!(!stmt.sql.contains(&format!("${}", n + 1)));
    }
}

#[test]
fn test_oversized_page_binds_clamp() {
    let options = QueryOptions {
        sort: Vec::new(),
        limit: Some(u64::MAX),
        offset: u64::MAX,
    };
    let plan = compile(
        &expense_2023().validate().unwrap(),
        GroupingDimension::Entity,
        &options,
    )
    .unwrap();
    let stmt = plan.statement();

    let tail: Vec<&Param> = stmt.params.iter().rev().take(2).collect();
    assert_eq!(tail, vec![&Param::Int(i64::MAX), &Param::Int(i64::MAX)]);
    assert!(stmt.sql.contains("\nLIMIT $"));
    assert!(stmt.sql.contains("\nOFFSET $"));
}

#[test]
fn test_scope_population_respects_exclusions() {
    let mut filter = expense_2023().with_normalization(Normalization::PerCapita);
    filter.exclude = Some(ExcludeFilter {
        county_codes: Some(vec!["B".into()]),
        uat_ids: Some(vec![4]),
        ..ExcludeFilter::default()
    });
    let plan = compile(
        &filter.validate().unwrap(),
        GroupingDimension::FunctionalCode,
        &QueryOptions::default(),
    )
    .unwrap();
    let sql = plan.statement().sql;
    assert!(sql.contains("NOT (su.county_code = ANY($"));
    assert!(sql.contains("NOT (su.id = ANY($"));

    let rows = run(&filter, GroupingDimension::FunctionalCode, &QueryOptions::default());
    assert!(rows.iter().all(|r| r.population == Some(1000)));
    let education = rows.iter().find(|r| r.key == "65.02").unwrap();
    assert_eq!(education.per_capita_amount, dec!(50));
}

#[test]
fn test_having_uses_output_expression() {
    let mut filter = expense_2023().with_normalization(Normalization::PerCapita);
    filter.aggregate_max_amount = Some(dec!(10));
    let plan = compile(
        &filter.validate().unwrap(),
        GroupingDimension::Uat,
        &QueryOptions::default(),
    )
    .unwrap();
    let sql = plan.statement().sql;

    let expr = "COALESCE(SUM(eli.ytd_amount) / NULLIF(u.population, 0), 0)";
    assert!(sql.contains(&format!("HAVING {expr} <= $")));
    assert!(sql.contains(&format!("ORDER BY {expr} DESC NULLS LAST")));
}

#[test]
fn test_quarter_dates_bind_ordinals() {
    let filter = AnalyticsFilter::for_period(
        AccountCategory::Expense,
        ReportPeriod {
            period_type: bugetar_core::PeriodType::Quarter,
            selection: bugetar_core::PeriodSelection::Dates(vec![
                PeriodKey::Quarter {
                    year: 2023,
                    quarter: 4,
                },
                PeriodKey::Quarter {
                    year: 2023,
                    quarter: 2,
                },
            ]),
        },
    );
    let plan = compile(
        &filter.validate().unwrap(),
        GroupingDimension::FunctionalCode,
        &QueryOptions::default(),
    )
    .unwrap();
    let stmt = plan.statement();
    assert!(stmt.sql.contains("(eli.year * 10 + eli.quarter) = ANY($"));
    assert!(stmt.sql.contains("SUM(eli.quarterly_amount)"));
    assert!(stmt.params.contains(&Param::IntArray(vec![20_232, 20_234])));
}

// ============================================================================
// Evaluation Tests
// ============================================================================

#[test]
fn test_county_per_capita_scenario() {
    let filter = expense_2023()
        .with_counties(["CJ"])
        .with_normalization(Normalization::PerCapita);
    let rows = run(&filter, GroupingDimension::County, &QueryOptions::default());

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, "CJ");
    assert_eq!(rows[0].total_amount, dec!(51000));
    assert_eq!(rows[0].population, Some(1000));
    assert_eq!(rows[0].amount, dec!(51));
}

#[test]
fn test_bucharest_county_population_from_municipality() {
    let rows = run(&expense_2023(), GroupingDimension::County, &QueryOptions::default());
    let bucharest = rows.iter().find(|r| r.key == "B").unwrap();

    assert_eq!(bucharest.population, Some(2000));
    assert_eq!(bucharest.entity_cui.as_deref(), Some("20"));
    assert_eq!(bucharest.total_amount, dec!(4600));
}

#[test]
fn test_zero_population_per_capita_is_zero() {
    let filter = expense_2023().with_normalization(Normalization::PerCapita);
    let rows = run(&filter, GroupingDimension::Uat, &QueryOptions::default());
    let cluj_napoca = rows.iter().find(|r| r.key == "4").unwrap();

    assert_eq!(cluj_napoca.population, Some(0));
    assert_eq!(cluj_napoca.total_amount, dec!(1000));
    assert_eq!(cluj_napoca.per_capita_amount, dec!(0));
}

#[test]
fn test_report_type_filter() {
    let mut filter = expense_2023();
    filter.report_type = Some("Executie bugetara detaliata".into());
    let rows = run(&filter, GroupingDimension::Entity, &QueryOptions::default());

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, "10");
}

#[test]
fn test_prefix_and_exclusion() {
    let mut filter = expense_2023().with_functional_prefixes(["66"]);
    filter.exclude = Some(ExcludeFilter {
        county_codes: Some(vec!["B".into()]),
        ..ExcludeFilter::default()
    });
    let rows = run(&filter, GroupingDimension::FunctionalCode, &QueryOptions::default());

    let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["66.02.01"]);
}

#[test]
fn test_search_is_case_insensitive() {
    let mut filter = expense_2023();
    filter.search = Some("primaria".into());
    let rows = run(&filter, GroupingDimension::Entity, &QueryOptions::default());
    assert_eq!(rows.len(), 3);
}

#[test]
fn test_is_uat_filter() {
    let mut filter = expense_2023();
    filter.is_uat = Some(false);
    let rows = run(&filter, GroupingDimension::Entity, &QueryOptions::default());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, "50");
    assert_eq!(rows[0].population, None);
}

#[test]
fn test_having_filters_groups_and_count() {
    let mut filter = expense_2023();
    filter.aggregate_min_amount = Some(dec!(700));

    let ds = make_dataset();
    let plan = compile(
        &filter.validate().unwrap(),
        GroupingDimension::Entity,
        &QueryOptions::default(),
    )
    .unwrap();
    let executor = PlanExecutor::new(&ds);
    let rows = executor.execute(&plan).unwrap();

    let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["10", "20", "40"]);
    assert_eq!(executor.count(&plan).unwrap(), 3);
}

#[test]
fn test_sort_by_name_and_paginate() {
    let options = QueryOptions {
        sort: vec![SortSpec::asc(SortField::Name)],
        limit: Some(2),
        offset: 1,
    };
    let rows = run(&expense_2023(), GroupingDimension::Uat, &options);
    let names: Vec<&str> = rows.iter().filter_map(|r| r.name.as_deref()).collect();
    assert_eq!(names, vec!["Cluj-Napoca", "Judetul Cluj"]);
}

#[test]
fn test_yearly_plan_returns_one_row_per_year() {
    let filter = AnalyticsFilter::for_years(AccountCategory::Expense, [2022, 2023])
        .with_normalization(Normalization::TotalEuro);
    let ds = make_dataset();
    let plan = compile(
        &filter.validate().unwrap(),
        GroupingDimension::FunctionalCode,
        &QueryOptions::default(),
    )
    .unwrap();
    let rows = PlanExecutor::new(&ds).execute(&plan).unwrap();

    let years: Vec<(&str, Option<i32>)> = rows
        .iter()
        .filter(|r| r.key == "65.02")
        .map(|r| (r.key.as_str(), r.year))
        .collect();
    assert_eq!(years, vec![("65.02", Some(2022)), ("65.02", Some(2023))]);
}

// ============================================================================
// Row-Level Filters
// ============================================================================

/// Two entities with mixed-sign 2023 expense lines and varied line attributes.
fn make_line_dataset() -> Dataset {
    let mut ds = Dataset::new();
    ds.entities = vec![
        Entity::new("10", "Directia de Asistenta Sociala"),
        Entity::new("20", "Spitalul Judetean"),
    ];

    let line = |cui: &str, amount| {
        ExecutionLineItem::yearly(cui, 2023, AccountCategory::Expense, "68.02", amount)
    };
    let mut development = line("10", dec!(500)).with_funding_source(2);
    development.expense_type = Some("dezvoltare".into());
    let mut correction = line("10", dec!(-200)).with_report("r-corr");
    correction.budget_sector_id = 3;
    let mut program = line("20", dec!(400));
    program.program_code = Some("P-01".into());

    ds.line_items = vec![
        development,
        correction,
        line("10", dec!(50)),
        program,
        line("20", dec!(300)),
    ];
    ds
}

fn totals(filter: &AnalyticsFilter) -> Vec<(String, Decimal)> {
    let ds = make_line_dataset();
    let plan = compile(
        &filter.validate().unwrap(),
        GroupingDimension::Entity,
        &QueryOptions::default(),
    )
    .unwrap();
    PlanExecutor::new(&ds)
        .execute(&plan)
        .unwrap()
        .into_iter()
        .map(|row| (row.key, row.sum_amount))
        .collect()
}

fn expected(pairs: &[(&str, Decimal)]) -> Vec<(String, Decimal)> {
    pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
}

#[test]
fn test_item_bound_filters_rows_before_summing() {
    // Unfiltered, entity 10 nets 350 and would fail the aggregate bound.
    assert_eq!(
        totals(&expense_2023()),
        expected(&[("20", dec!(700)), ("10", dec!(350))])
    );

    let mut filter = expense_2023();
    filter.item_min_amount = Some(dec!(0));
    filter.aggregate_min_amount = Some(dec!(500));
    assert_eq!(
        totals(&filter),
        expected(&[("20", dec!(700)), ("10", dec!(550))])
    );

    let plan = compile(
        &filter.validate().unwrap(),
        GroupingDimension::Entity,
        &QueryOptions::default(),
    )
    .unwrap();
    let stmt = plan.statement();
    let (where_part, having_part) = stmt.sql.split_once("HAVING").unwrap();
    assert!(where_part.contains("eli.ytd_amount >= $"));
    assert!(!where_part.contains("SUM(eli.ytd_amount) >= $"));
    assert!(having_part.contains("COALESCE(SUM(eli.ytd_amount), 0) >= $"));
    assert!(stmt.params.contains(&Param::Decimal(dec!(0))));
    assert!(stmt.params.contains(&Param::Decimal(dec!(500))));
}

#[test]
fn test_item_max_keeps_negative_lines() {
    let mut filter = expense_2023();
    filter.item_max_amount = Some(dec!(350));
    assert_eq!(
        totals(&filter),
        expected(&[("20", dec!(300)), ("10", dec!(-150))])
    );
}

#[test]
fn test_line_attribute_filters() {
    let mut filter = expense_2023();
    filter.funding_source_ids = Some(vec![2]);
    assert_eq!(totals(&filter), expected(&[("10", dec!(500))]));

    let mut filter = expense_2023();
    filter.budget_sector_ids = Some(vec![3]);
    assert_eq!(totals(&filter), expected(&[("10", dec!(-200))]));

    let mut filter = expense_2023();
    filter.report_ids = Some(vec!["r-corr".into()]);
    assert_eq!(totals(&filter), expected(&[("10", dec!(-200))]));

    // Lines without an expense type or program never match a list.
    let mut filter = expense_2023();
    filter.expense_types = Some(vec!["dezvoltare".into()]);
    assert_eq!(totals(&filter), expected(&[("10", dec!(500))]));

    let mut filter = expense_2023();
    filter.program_codes = Some(vec!["P-01".into(), "P-02".into()]);
    assert_eq!(totals(&filter), expected(&[("20", dec!(400))]));
}
