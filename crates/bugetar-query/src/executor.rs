//! In-memory plan executor.
//!
//! Evaluates a [`QueryPlan`] against a [`Dataset`] with the semantics of the
//! rendered SQL: inner joins drop rows without a match, the unit join is a
//! left join, comparisons against `NULL` fail, and negated set predicates let
//! `NULL` through.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use bugetar_core::{CountyIndex, Dataset, Entity, ExecutionLineItem, Report, TerritorialUnit};
use regex::Regex;
use rust_decimal::Decimal;

use crate::error::QueryError;
use crate::normalize::{compare_views, per_capita, RawAggregateRow, SortView};
use crate::plan::{
    AmountExpr, Column, GroupingDimension, HavingPredicate, Join, Op, Param, PopulationSource,
    Predicate, QueryPlan, Scope,
};

/// A column value of one joined row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Text value.
    Text(String),
    /// Integer value.
    Integer(i64),
    /// Decimal value.
    Number(Decimal),
    /// Boolean value.
    Boolean(bool),
    /// NULL value.
    Null,
}

impl Value {
    fn text(value: Option<&str>) -> Self {
        value.map_or(Self::Null, |s| Self::Text(s.to_string()))
    }

    fn key(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Number(d) => Some(d.to_string()),
            Self::Boolean(b) => Some(b.to_string()),
            Self::Null => None,
        }
    }
}

/// One fact row with its joined dimension rows.
#[derive(Debug)]
struct RowContext<'a> {
    item: &'a ExecutionLineItem,
    entity: Option<&'a Entity>,
    uat: Option<&'a TerritorialUnit>,
    report: Option<&'a Report>,
}

/// A row predicate with its `LIKE` patterns compiled for one execution.
struct Matcher<'p> {
    predicate: &'p Predicate,
    patterns: Vec<Regex>,
}

impl<'p> Matcher<'p> {
    fn new(predicate: &'p Predicate) -> Result<Self, QueryError> {
        let case_insensitive = match predicate.op {
            Op::LikeAny | Op::NotLikeAny => false,
            Op::ContainsInsensitive => true,
            _ => {
                return Ok(Self {
                    predicate,
                    patterns: Vec::new(),
                })
            }
        };
        let patterns = match &predicate.value {
            Some(Param::TextArray(patterns)) => patterns
                .iter()
                .map(|p| like_regex(p, case_insensitive))
                .collect::<Result<_, _>>()?,
            Some(Param::Text(pattern)) => vec![like_regex(pattern, case_insensitive)?],
            other => {
                return Err(QueryError::Evaluation(format!(
                    "LIKE on {} needs text patterns, got {other:?}",
                    predicate.column.sql()
                )))
            }
        };
        Ok(Self {
            predicate,
            patterns,
        })
    }

    fn like_any(&self, value: &Value) -> Result<bool, QueryError> {
        match value {
            Value::Text(text) => Ok(self.patterns.iter().any(|re| re.is_match(text))),
            _ => Err(QueryError::Evaluation(format!("LIKE on non-text value {value:?}"))),
        }
    }
}

/// Executes compiled plans against a dataset snapshot.
pub struct PlanExecutor<'a> {
    dataset: &'a Dataset,
    counties: CountyIndex,
}

impl<'a> PlanExecutor<'a> {
    /// Create an executor over a dataset.
    pub fn new(dataset: &'a Dataset) -> Self {
        Self {
            dataset,
            counties: dataset.county_index(),
        }
    }

    /// Run the rows query of a plan.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Evaluation`] when a predicate reads a table the
    /// plan does not join or compares incompatible values.
    pub fn execute(&self, plan: &QueryPlan) -> Result<Vec<RawAggregateRow>, QueryError> {
        let mut rows = self.aggregate(plan, plan.yearly)?;

        if plan.yearly {
            rows.sort_by(|a, b| a.key.cmp(&b.key).then(a.year.cmp(&b.year)));
            return Ok(rows);
        }

        rows.retain(|row| passes_having(plan, row));
        let specs = plan.effective_sort();
        rows.sort_by(|a, b| {
            compare_views(
                &SortView::of_raw(a, plan.normalization),
                &SortView::of_raw(b, plan.normalization),
                &specs,
                plan.dimension,
            )
        });
        Ok(crate::normalize::paginate(rows, plan.offset, plan.limit))
    }

    /// Run the count query of a plan.
    ///
    /// # Errors
    ///
    /// Same as [`PlanExecutor::execute`].
    pub fn count(&self, plan: &QueryPlan) -> Result<u64, QueryError> {
        let mut rows = self.aggregate(plan, false)?;
        if !plan.yearly {
            rows.retain(|row| passes_having(plan, row));
        }
        Ok(rows.len() as u64)
    }

    fn aggregate(&self, plan: &QueryPlan, by_year: bool) -> Result<Vec<RawAggregateRow>, QueryError> {
        let scope_population = match &plan.population {
            PopulationSource::Scope(scope) => Some(self.scope_population(scope)),
            _ => None,
        };

        let matchers = plan
            .where_clauses
            .iter()
            .map(Matcher::new)
            .collect::<Result<Vec<_>, _>>()?;
        let mut groups: BTreeMap<(String, Option<i32>), RawAggregateRow> = BTreeMap::new();

        for item in &self.dataset.line_items {
            let Some(ctx) = self.join(plan, item) else {
                continue;
            };
            if !self.matches(plan, &matchers, &ctx)? {
                continue;
            }

            let key_column = match plan.dimension {
                GroupingDimension::Uat => Column::UatId,
                GroupingDimension::County => Column::CountyCode,
                GroupingDimension::Entity => Column::EntityCui,
                GroupingDimension::FunctionalCode => Column::FunctionalCode,
                GroupingDimension::EconomicCode => Column::EconomicCode,
            };
            let Some(key) = self.evaluate_column(plan, key_column, &ctx)?.key() else {
                continue;
            };
            let year = by_year.then_some(item.year);
            let amount = item.amount(plan.amount_column);

            let group = groups
                .entry((key.clone(), year))
                .or_insert_with(|| self.group_row(plan, &ctx, key, year, scope_population));
            group.line_count += 1;
            // SUM skips NULL amounts; an all-NULL group sums to zero.
            if let Some(amount) = amount {
                group.sum_amount += amount;
            }
        }

        Ok(groups.into_values().collect())
    }

    fn group_row(
        &self,
        plan: &QueryPlan,
        ctx: &RowContext<'_>,
        key: String,
        year: Option<i32>,
        scope_population: Option<i64>,
    ) -> RawAggregateRow {
        let mut row = RawAggregateRow::new(key, Decimal::ZERO);
        row.year = year;

        match plan.dimension {
            GroupingDimension::Uat => {
                if let Some(uat) = ctx.uat {
                    row.name = Some(uat.name.clone());
                    row.siruta_code = Some(uat.siruta_code.clone());
                    row.county_code = Some(uat.county_code.clone());
                    row.county_name = Some(uat.county_name.clone());
                }
            }
            GroupingDimension::County => {
                if let Some(uat) = ctx.uat {
                    row.name = Some(uat.county_name.clone());
                    row.county_code = Some(uat.county_code.clone());
                    row.county_name = Some(uat.county_name.clone());
                    row.entity_cui = self
                        .counties
                        .get(&uat.county_code)
                        .and_then(|c| c.entity_cui.clone());
                }
            }
            GroupingDimension::Entity => {
                row.name = ctx.entity.map(|e| e.name.clone());
                row.entity_cui = Some(ctx.item.entity_cui.clone());
            }
            GroupingDimension::FunctionalCode | GroupingDimension::EconomicCode => {}
        }

        row.population = match &plan.population {
            PopulationSource::Uat => ctx.uat.and_then(|u| u.population),
            PopulationSource::County => ctx
                .uat
                .and_then(|u| self.counties.population(&u.county_code)),
            PopulationSource::Entity => match (ctx.entity, ctx.uat) {
                (Some(entity), Some(uat)) if entity.is_uat => uat.population,
                _ => None,
            },
            PopulationSource::Scope(_) => scope_population,
        };
        row
    }

    fn scope_population(&self, scope: &Scope) -> i64 {
        let units = self.dataset.uats.iter().filter(|u| {
            !scope.exclude_county_codes.contains(&u.county_code)
                && !scope.exclude_uat_ids.contains(&u.id)
        });
        if scope.uat_ids.is_empty() {
            units
                .filter(|u| u.is_county_representative())
                .filter(|u| scope.county_codes.is_empty() || scope.county_codes.contains(&u.county_code))
                .filter(|u| {
                    scope.regions.is_empty()
                        || u.region.as_ref().is_some_and(|r| scope.regions.contains(r))
                })
                .filter_map(|u| u.population)
                .sum()
        } else {
            units
                .filter(|u| scope.uat_ids.contains(&u.id))
                .filter_map(|u| u.population)
                .sum()
        }
    }

    /// Resolve the joins of a fact row; `None` when an inner join finds no match.
    fn join<'b>(&'b self, plan: &QueryPlan, item: &'b ExecutionLineItem) -> Option<RowContext<'b>> {
        let mut ctx = RowContext {
            item,
            entity: None,
            uat: None,
            report: None,
        };
        if plan.joins.contains(&Join::Entities) {
            ctx.entity = Some(self.dataset.entity(&item.entity_cui)?);
        }
        if plan.joins.contains(&Join::Uats) {
            ctx.uat = ctx
                .entity
                .and_then(|e| e.uat_id)
                .and_then(|id| self.dataset.uat(id));
        }
        if plan.joins.contains(&Join::Reports) {
            ctx.report = Some(self.dataset.report(&item.report_id)?);
        }
        Some(ctx)
    }

    fn matches(
        &self,
        plan: &QueryPlan,
        matchers: &[Matcher<'_>],
        ctx: &RowContext<'_>,
    ) -> Result<bool, QueryError> {
        for matcher in matchers {
            if !self.evaluate_predicate(plan, matcher, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn evaluate_predicate(
        &self,
        plan: &QueryPlan,
        matcher: &Matcher<'_>,
        ctx: &RowContext<'_>,
    ) -> Result<bool, QueryError> {
        let predicate = matcher.predicate;
        let value = self.evaluate_column(plan, predicate.column, ctx)?;
        let Some(param) = &predicate.value else {
            return Ok(value != Value::Null);
        };

        if value == Value::Null {
            return Ok(matches!(predicate.op, Op::NotAnyOf | Op::NotLikeAny));
        }

        let result = match predicate.op {
            Op::Eq => compare(&value, param)? == Ordering::Equal,
            Op::Gte => compare(&value, param)? != Ordering::Less,
            Op::Lte => compare(&value, param)? != Ordering::Greater,
            Op::AnyOf => member(&value, param)?,
            Op::NotAnyOf => !member(&value, param)?,
            Op::LikeAny | Op::ContainsInsensitive => matcher.like_any(&value)?,
            Op::NotLikeAny => !matcher.like_any(&value)?,
            Op::NotNull => true,
        };
        Ok(result)
    }

    fn evaluate_column(
        &self,
        plan: &QueryPlan,
        column: Column,
        ctx: &RowContext<'_>,
    ) -> Result<Value, QueryError> {
        if let Some(join) = column.join() {
            if !plan.joins.contains(&join) {
                return Err(QueryError::Evaluation(format!(
                    "column {} needs the {join} join",
                    column.sql()
                )));
            }
        }

        let item = ctx.item;
        let entity = ctx.entity;
        let uat = ctx.uat;
        let value = match column {
            Column::AccountCategory => Value::Text(item.account_category.as_str().to_string()),
            Column::Year => Value::Integer(i64::from(item.year)),
            Column::PeriodOrdinal(period_type) => Value::Integer(item.period(period_type).ordinal()),
            Column::IsYearly => Value::Boolean(item.is_yearly),
            Column::IsQuarterly => Value::Boolean(item.is_quarterly),
            Column::EntityCui => Value::Text(item.entity_cui.clone()),
            Column::ReportId => Value::Text(item.report_id.clone()),
            Column::FunctionalCode => Value::Text(item.functional_code.clone()),
            Column::EconomicCode => Value::text(item.economic_code.as_deref()),
            Column::FundingSourceId => Value::Integer(i64::from(item.funding_source_id)),
            Column::BudgetSectorId => Value::Integer(i64::from(item.budget_sector_id)),
            Column::ExpenseType => Value::text(item.expense_type.as_deref()),
            Column::ProgramCode => Value::text(item.program_code.as_deref()),
            Column::Amount(col) => item.amount(col).map_or(Value::Null, Value::Number),
            Column::ReportType => Value::text(ctx.report.map(|r| r.report_type.as_str())),
            Column::MainCreditorCui => {
                Value::text(ctx.report.and_then(|r| r.main_creditor_cui.as_deref()))
            }
            Column::EntityType => Value::text(entity.and_then(|e| e.entity_type.as_deref())),
            Column::EntityIsUat => entity.map_or(Value::Null, |e| Value::Boolean(e.is_uat)),
            Column::EntityName => Value::text(entity.map(|e| e.name.as_str())),
            Column::UatId => uat.map_or(Value::Null, |u| Value::Integer(u.id)),
            Column::UatName => Value::text(uat.map(|u| u.name.as_str())),
            Column::SirutaCode => Value::text(uat.map(|u| u.siruta_code.as_str())),
            Column::CountyCode => Value::text(uat.map(|u| u.county_code.as_str())),
            Column::CountyName => Value::text(uat.map(|u| u.county_name.as_str())),
            Column::Region => Value::text(uat.and_then(|u| u.region.as_deref())),
            Column::Population => uat
                .and_then(|u| u.population)
                .map_or(Value::Null, Value::Integer),
        };
        Ok(value)
    }
}

fn passes_having(plan: &QueryPlan, row: &RawAggregateRow) -> bool {
    plan.having_clauses
        .iter()
        .all(|having| having_holds(having, row))
}

fn having_holds(having: &HavingPredicate, row: &RawAggregateRow) -> bool {
    let amount = match having.expr {
        AmountExpr::Total => row.sum_amount,
        AmountExpr::PerCapita => per_capita(row.sum_amount, row.population),
    };
    match having.op {
        Op::Lte => amount <= having.value,
        _ => amount >= having.value,
    }
}

fn compare(value: &Value, param: &Param) -> Result<Ordering, QueryError> {
    match (value, param) {
        (Value::Text(a), Param::Text(b)) => Ok(a.as_str().cmp(b.as_str())),
        (Value::Integer(a), Param::Int(b)) => Ok(a.cmp(b)),
        (Value::Number(a), Param::Decimal(b)) => Ok(a.cmp(b)),
        (Value::Integer(a), Param::Decimal(b)) => Ok(Decimal::from(*a).cmp(b)),
        (Value::Number(a), Param::Int(b)) => Ok(a.cmp(&Decimal::from(*b))),
        (Value::Boolean(a), Param::Bool(b)) => Ok(a.cmp(b)),
        _ => Err(mismatch(value, param)),
    }
}

fn member(value: &Value, param: &Param) -> Result<bool, QueryError> {
    match (value, param) {
        (Value::Text(a), Param::TextArray(items)) => Ok(items.iter().any(|s| s == a)),
        (Value::Integer(a), Param::IntArray(items)) => Ok(items.contains(a)),
        _ => Err(mismatch(value, param)),
    }
}

fn mismatch(value: &Value, param: &Param) -> QueryError {
    QueryError::Evaluation(format!("cannot compare {value:?} with {param}"))
}

/// Translate a SQL `LIKE` pattern into an anchored regex.
///
/// `%` matches any run of characters, `_` exactly one, and a backslash makes
/// the next character literal.
pub fn like_regex(pattern: &str, case_insensitive: bool) -> Result<Regex, QueryError> {
    let mut source = String::from(if case_insensitive { "(?si)^" } else { "(?s)^" });
    let mut literal = String::new();
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        let wildcard = match ch {
            '%' => ".*",
            '_' => ".",
            '\\' => {
                literal.push(chars.next().unwrap_or('\\'));
                continue;
            }
            other => {
                literal.push(other);
                continue;
            }
        };
        source.push_str(&regex::escape(&literal));
        literal.clear();
        source.push_str(wildcard);
    }
    source.push_str(&regex::escape(&literal));
    source.push('$');

    Regex::new(&source)
        .map_err(|e| QueryError::Evaluation(format!("invalid LIKE pattern {pattern:?}: {e}")))
}
