//! Compiles validated filters into query plans.
//!
//! The compiler decides which tables to join, turns every filter field into a
//! typed [`Predicate`], places aggregate bounds in HAVING and picks the
//! population source used for per-capita amounts.

use bugetar_core::{AmountColumn, PeriodSelection, PeriodType};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::CompileError;
use crate::filter::{Bounds, ValidatedFilter};
use crate::plan::{
    like_contains, like_prefix, AmountExpr, Column, GroupingDimension, HavingPredicate, Op, Param,
    PopulationSource, Predicate, QueryOptions, QueryPlan, Scope, SortField,
};

/// Maximum number of bind parameters a statement may carry.
pub const MAX_PARAMS: usize = 65_535;

/// Compile a validated filter for one grouping dimension.
///
/// # Errors
///
/// Returns [`CompileError::UnsupportedSort`] when a sort field has no value
/// for the grouping, [`CompileError::MissingJoin`] when a predicate reaches a
/// table the plan does not join, and [`CompileError::TooManyParameters`] when
/// the rendered statement exceeds [`MAX_PARAMS`].
pub fn compile(
    filter: &ValidatedFilter,
    dimension: GroupingDimension,
    options: &QueryOptions,
) -> Result<QueryPlan, CompileError> {
    for spec in &options.sort {
        if dimension.is_classification()
            && matches!(spec.by, SortField::Name | SortField::Population)
        {
            return Err(CompileError::UnsupportedSort {
                field: spec.by,
                dimension,
            });
        }
    }

    let period_type = filter.period.period_type;
    let amount_column = AmountColumn::for_period(period_type);
    let yearly = filter.normalization.is_euro();

    let mut where_clauses = Vec::new();
    where_clauses.push(Predicate::new(
        Column::AccountCategory,
        Op::Eq,
        Param::Text(filter.account_category.as_str().to_string()),
    ));
    push_period(&mut where_clauses, filter);
    push_dimensions(&mut where_clauses, filter, amount_column);
    push_exclusions(&mut where_clauses, filter);

    match dimension {
        GroupingDimension::Uat => where_clauses.push(Predicate::not_null(Column::UatId)),
        GroupingDimension::County => where_clauses.push(Predicate::not_null(Column::CountyCode)),
        GroupingDimension::EconomicCode => {
            where_clauses.push(Predicate::not_null(Column::EconomicCode));
        }
        GroupingDimension::Entity | GroupingDimension::FunctionalCode => {}
    }

    let group_by = match dimension {
        GroupingDimension::Uat => vec![
            Column::UatId,
            Column::UatName,
            Column::SirutaCode,
            Column::CountyCode,
            Column::CountyName,
            Column::Population,
        ],
        GroupingDimension::County => vec![Column::CountyCode, Column::CountyName],
        GroupingDimension::Entity => vec![
            Column::EntityCui,
            Column::EntityName,
            Column::EntityIsUat,
            Column::Population,
        ],
        GroupingDimension::FunctionalCode => vec![Column::FunctionalCode],
        GroupingDimension::EconomicCode => vec![Column::EconomicCode],
    };

    let population = match dimension {
        GroupingDimension::Uat => PopulationSource::Uat,
        GroupingDimension::County => PopulationSource::County,
        GroupingDimension::Entity => PopulationSource::Entity,
        GroupingDimension::FunctionalCode | GroupingDimension::EconomicCode => {
            PopulationSource::Scope(Scope {
                uat_ids: filter.uat_ids.clone(),
                county_codes: filter.county_codes.clone(),
                regions: filter.regions.clone(),
                exclude_county_codes: filter.exclude.county_codes.clone(),
                exclude_uat_ids: filter.exclude.uat_ids.clone(),
            })
        }
    };

    let (having_clauses, post_aggregate) = if yearly {
        (Vec::new(), filter.aggregate_amount)
    } else {
        (
            having(filter.aggregate_amount, AmountExpr::for_normalization(filter.normalization)),
            Bounds::default(),
        )
    };

    let mut plan = QueryPlan {
        dimension,
        joins: BTreeSet::new(),
        where_clauses,
        group_by,
        having_clauses,
        amount_column,
        normalization: filter.normalization,
        population,
        yearly,
        post_aggregate,
        sort: options.sort.clone(),
        limit: options.limit,
        offset: options.offset,
    };
    plan.joins = plan.required_joins();

    if let Some(join) = plan
        .where_clauses
        .iter()
        .filter_map(|p| p.column.join())
        .find(|join| !plan.joins.contains(join))
    {
        return Err(CompileError::MissingJoin { join, dimension });
    }

    let count = plan.statement().params.len();
    if count > MAX_PARAMS {
        return Err(CompileError::TooManyParameters {
            count,
            limit: MAX_PARAMS,
        });
    }

    debug!(
        %dimension,
        joins = ?plan.joins,
        predicates = plan.where_clauses.len(),
        yearly,
        "compiled aggregate plan"
    );
    Ok(plan)
}

fn push_period(out: &mut Vec<Predicate>, filter: &ValidatedFilter) {
    let period_type = filter.period.period_type;
    let ordinal = Column::PeriodOrdinal(period_type);

    match &filter.period.selection {
        PeriodSelection::Dates(keys) => {
            let ordinals: Vec<i64> = keys.iter().map(bugetar_core::PeriodKey::ordinal).collect();
            out.push(Predicate::new(ordinal, Op::AnyOf, Param::IntArray(ordinals)));
        }
        PeriodSelection::Interval(interval) => {
            out.push(Predicate::new(
                ordinal,
                Op::Gte,
                Param::Int(interval.start.ordinal()),
            ));
            out.push(Predicate::new(ordinal, Op::Lte, Param::Int(interval.end.ordinal())));
        }
    }

    // Only period-closing rows carry the figures of their period.
    match period_type {
        PeriodType::Year => out.push(Predicate::new(Column::IsYearly, Op::Eq, Param::Bool(true))),
        PeriodType::Quarter => {
            out.push(Predicate::new(Column::IsQuarterly, Op::Eq, Param::Bool(true)));
        }
        PeriodType::Month => {}
    }
}

fn push_dimensions(out: &mut Vec<Predicate>, filter: &ValidatedFilter, amount: AmountColumn) {
    if let Some(report_type) = &filter.report_type {
        out.push(Predicate::new(
            Column::ReportType,
            Op::Eq,
            Param::Text(report_type.clone()),
        ));
    }
    if let Some(cui) = &filter.main_creditor_cui {
        out.push(Predicate::new(
            Column::MainCreditorCui,
            Op::Eq,
            Param::Text(cui.clone()),
        ));
    }

    any_text(out, Column::ReportId, &filter.report_ids);
    any_text(out, Column::EntityCui, &filter.entity_cuis);
    any_int(out, Column::FundingSourceId, &widen(&filter.funding_source_ids));
    any_int(out, Column::BudgetSectorId, &widen(&filter.budget_sector_ids));
    any_text(out, Column::ExpenseType, &filter.expense_types);
    any_text(out, Column::ProgramCode, &filter.program_codes);

    any_text(out, Column::FunctionalCode, &filter.functional_codes);
    prefixes(out, Column::FunctionalCode, Op::LikeAny, &filter.functional_prefixes);
    any_text(out, Column::EconomicCode, &filter.economic_codes);
    prefixes(out, Column::EconomicCode, Op::LikeAny, &filter.economic_prefixes);

    any_text(out, Column::CountyCode, &filter.county_codes);
    any_text(out, Column::Region, &filter.regions);
    any_int(out, Column::UatId, &filter.uat_ids);

    any_text(out, Column::EntityType, &filter.entity_types);
    if let Some(is_uat) = filter.is_uat {
        out.push(Predicate::new(Column::EntityIsUat, Op::Eq, Param::Bool(is_uat)));
    }
    if let Some(search) = &filter.search {
        out.push(Predicate::new(
            Column::EntityName,
            Op::ContainsInsensitive,
            Param::Text(like_contains(search)),
        ));
    }

    if let Some(min) = filter.population.min {
        out.push(Predicate::new(Column::Population, Op::Gte, Param::Int(min)));
    }
    if let Some(max) = filter.population.max {
        out.push(Predicate::new(Column::Population, Op::Lte, Param::Int(max)));
    }

    if let Some(min) = filter.item_amount.min {
        out.push(Predicate::new(Column::Amount(amount), Op::Gte, Param::Decimal(min)));
    }
    if let Some(max) = filter.item_amount.max {
        out.push(Predicate::new(Column::Amount(amount), Op::Lte, Param::Decimal(max)));
    }
}

fn push_exclusions(out: &mut Vec<Predicate>, filter: &ValidatedFilter) {
    let exclude = &filter.exclude;
    not_any_text(out, Column::EntityCui, &exclude.entity_cuis);
    not_any_text(out, Column::FunctionalCode, &exclude.functional_codes);
    prefixes(out, Column::FunctionalCode, Op::NotLikeAny, &exclude.functional_prefixes);
    not_any_text(out, Column::EconomicCode, &exclude.economic_codes);
    prefixes(out, Column::EconomicCode, Op::NotLikeAny, &exclude.economic_prefixes);
    not_any_text(out, Column::CountyCode, &exclude.county_codes);
    if !exclude.uat_ids.is_empty() {
        out.push(Predicate::new(
            Column::UatId,
            Op::NotAnyOf,
            Param::IntArray(exclude.uat_ids.clone()),
        ));
    }
}

fn having(bounds: Bounds<Decimal>, expr: AmountExpr) -> Vec<HavingPredicate> {
    let mut out = Vec::new();
    if let Some(value) = bounds.min {
        out.push(HavingPredicate {
            expr,
            op: Op::Gte,
            value,
        });
    }
    if let Some(value) = bounds.max {
        out.push(HavingPredicate {
            expr,
            op: Op::Lte,
            value,
        });
    }
    out
}

fn any_text(out: &mut Vec<Predicate>, column: Column, values: &[String]) {
    if !values.is_empty() {
        out.push(Predicate::new(column, Op::AnyOf, Param::TextArray(values.to_vec())));
    }
}

fn not_any_text(out: &mut Vec<Predicate>, column: Column, values: &[String]) {
    if !values.is_empty() {
        out.push(Predicate::new(column, Op::NotAnyOf, Param::TextArray(values.to_vec())));
    }
}

fn any_int(out: &mut Vec<Predicate>, column: Column, values: &[i64]) {
    if !values.is_empty() {
        out.push(Predicate::new(column, Op::AnyOf, Param::IntArray(values.to_vec())));
    }
}

fn prefixes(out: &mut Vec<Predicate>, column: Column, op: Op, values: &[String]) {
    if !values.is_empty() {
        let patterns = values.iter().map(|p| like_prefix(p)).collect();
        out.push(Predicate::new(column, op, Param::TextArray(patterns)));
    }
}

fn widen(values: &[i32]) -> Vec<i64> {
    values.iter().map(|&v| i64::from(v)).collect()
}
