//! Compiled query plans.
//!
//! A [`QueryPlan`] is the typed output of the compiler: which tables are
//! joined, the row-level predicates, the grouping, the post-aggregation
//! predicates and the requested ordering. It renders to parameterized SQL
//! through [`QueryPlan::statement`] and [`QueryPlan::count_statement`]; the
//! in-memory [`PlanExecutor`](crate::executor::PlanExecutor) evaluates the
//! same plan directly.
//!
//! Values never appear in the SQL text. Each statement is rendered with its
//! own positional numbering, so a parameter is bound only if the statement
//! references it.

use bugetar_core::{AmountColumn, PeriodType, BUCHAREST_COUNTY_CODE, BUCHAREST_SIRUTA_CODE};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::filter::{AnalyticsFilter, Bounds, Normalization};

/// What the aggregated rows are grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingDimension {
    /// One row per territorial unit (UAT heatmap).
    Uat,
    /// One row per county (county heatmap).
    County,
    /// One row per reporting entity (entity ranking).
    Entity,
    /// One row per functional code.
    FunctionalCode,
    /// One row per economic code.
    EconomicCode,
}

impl GroupingDimension {
    /// Whether the grouping is a classification code.
    #[must_use]
    pub const fn is_classification(self) -> bool {
        matches!(self, Self::FunctionalCode | Self::EconomicCode)
    }

    const fn key_column(self) -> Column {
        match self {
            Self::Uat => Column::UatId,
            Self::County => Column::CountyCode,
            Self::Entity => Column::EntityCui,
            Self::FunctionalCode => Column::FunctionalCode,
            Self::EconomicCode => Column::EconomicCode,
        }
    }
}

impl fmt::Display for GroupingDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uat => f.write_str("uat"),
            Self::County => f.write_str("county"),
            Self::Entity => f.write_str("entity"),
            Self::FunctionalCode => f.write_str("functional_code"),
            Self::EconomicCode => f.write_str("economic_code"),
        }
    }
}

impl FromStr for GroupingDimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uat" => Ok(Self::Uat),
            "county" => Ok(Self::County),
            "entity" => Ok(Self::Entity),
            "functional" | "functional_code" => Ok(Self::FunctionalCode),
            "economic" | "economic_code" => Ok(Self::EconomicCode),
            other => Err(format!("unknown grouping dimension: {other}")),
        }
    }
}

/// A table joined onto the fact table.
///
/// The variant order is the render order: `uats` is reached through
/// `entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Join {
    /// `entities e`, on the reporting entity.
    Entities,
    /// `uats u`, on the entity's territorial unit (left join).
    Uats,
    /// `reports r`, on the report the line was filed in.
    Reports,
}

impl Join {
    /// The join clause.
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Entities => "JOIN entities e ON e.cui = eli.entity_cui",
            Self::Uats => "LEFT JOIN uats u ON u.id = e.uat_id",
            Self::Reports => "JOIN reports r ON r.report_id = eli.report_id",
        }
    }
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entities => f.write_str("entities"),
            Self::Uats => f.write_str("uats"),
            Self::Reports => f.write_str("reports"),
        }
    }
}

/// A column a predicate or grouping can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Column {
    AccountCategory,
    Year,
    /// Period encoded as in [`bugetar_core::PeriodKey::ordinal`].
    PeriodOrdinal(PeriodType),
    IsYearly,
    IsQuarterly,
    EntityCui,
    ReportId,
    FunctionalCode,
    EconomicCode,
    FundingSourceId,
    BudgetSectorId,
    ExpenseType,
    ProgramCode,
    Amount(AmountColumn),
    ReportType,
    MainCreditorCui,
    EntityType,
    EntityIsUat,
    EntityName,
    UatId,
    UatName,
    SirutaCode,
    CountyCode,
    CountyName,
    Region,
    Population,
}

impl Column {
    /// SQL expression for the column.
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::AccountCategory => "eli.account_category",
            Self::Year | Self::PeriodOrdinal(PeriodType::Year) => "eli.year",
            Self::PeriodOrdinal(PeriodType::Quarter) => "(eli.year * 10 + eli.quarter)",
            Self::PeriodOrdinal(PeriodType::Month) => "(eli.year * 100 + eli.month)",
            Self::IsYearly => "eli.is_yearly",
            Self::IsQuarterly => "eli.is_quarterly",
            Self::EntityCui => "eli.entity_cui",
            Self::ReportId => "eli.report_id",
            Self::FunctionalCode => "eli.functional_code",
            Self::EconomicCode => "eli.economic_code",
            Self::FundingSourceId => "eli.funding_source_id",
            Self::BudgetSectorId => "eli.budget_sector_id",
            Self::ExpenseType => "eli.expense_type",
            Self::ProgramCode => "eli.program_code",
            Self::Amount(AmountColumn::Ytd) => "eli.ytd_amount",
            Self::Amount(AmountColumn::Quarterly) => "eli.quarterly_amount",
            Self::Amount(AmountColumn::Monthly) => "eli.monthly_amount",
            Self::ReportType => "r.report_type",
            Self::MainCreditorCui => "r.main_creditor_cui",
            Self::EntityType => "e.entity_type",
            Self::EntityIsUat => "e.is_uat",
            Self::EntityName => "e.name",
            Self::UatId => "u.id",
            Self::UatName => "u.name",
            Self::SirutaCode => "u.siruta_code",
            Self::CountyCode => "u.county_code",
            Self::CountyName => "u.county_name",
            Self::Region => "u.region",
            Self::Population => "u.population",
        }
    }

    /// The join that makes the column available, if it is not on the fact table.
    #[must_use]
    pub const fn join(self) -> Option<Join> {
        match self {
            Self::ReportType | Self::MainCreditorCui => Some(Join::Reports),
            Self::EntityType | Self::EntityIsUat | Self::EntityName => Some(Join::Entities),
            Self::UatId
            | Self::UatName
            | Self::SirutaCode
            | Self::CountyCode
            | Self::CountyName
            | Self::Region
            | Self::Population => Some(Join::Uats),
            _ => None,
        }
    }

    /// Whether the column can be `NULL`, including through the left join on units.
    #[must_use]
    pub const fn is_nullable(self) -> bool {
        matches!(
            self,
            Self::EconomicCode
                | Self::ExpenseType
                | Self::ProgramCode
                | Self::Amount(AmountColumn::Quarterly)
                | Self::MainCreditorCui
                | Self::EntityType
                | Self::UatId
                | Self::UatName
                | Self::SirutaCode
                | Self::CountyCode
                | Self::CountyName
                | Self::Region
                | Self::Population
        )
    }
}

/// Comparison applied by a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `col = $n`
    Eq,
    /// `col = ANY($n)`
    AnyOf,
    /// `col LIKE ANY($n)`
    LikeAny,
    /// Negated `AnyOf`; `NULL` columns pass.
    NotAnyOf,
    /// Negated `LikeAny`; `NULL` columns pass.
    NotLikeAny,
    /// `col >= $n`
    Gte,
    /// `col <= $n`
    Lte,
    /// `col ILIKE $n`
    ContainsInsensitive,
    /// `col IS NOT NULL`, no parameter.
    NotNull,
}

/// A bound query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Param {
    /// Text value.
    Text(String),
    /// Text array (`text[]`).
    TextArray(Vec<String>),
    /// Integer value.
    Int(i64),
    /// Integer array (`bigint[]`).
    IntArray(Vec<i64>),
    /// Decimal value (`numeric`).
    Decimal(Decimal),
    /// Boolean value.
    Bool(bool),
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "'{s}'"),
            Self::TextArray(items) => {
                let quoted: Vec<String> = items.iter().map(|s| format!("'{s}'")).collect();
                write!(f, "[{}]", quoted.join(", "))
            }
            Self::Int(i) => write!(f, "{i}"),
            Self::IntArray(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A row-level predicate (WHERE).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    /// Column tested.
    pub column: Column,
    /// Comparison.
    pub op: Op,
    /// Bound value; `None` only for [`Op::NotNull`].
    pub value: Option<Param>,
}

impl Predicate {
    /// Create a predicate with a bound value.
    #[must_use]
    pub const fn new(column: Column, op: Op, value: Param) -> Self {
        Self {
            column,
            op,
            value: Some(value),
        }
    }

    /// Create an `IS NOT NULL` predicate.
    #[must_use]
    pub const fn not_null(column: Column) -> Self {
        Self {
            column,
            op: Op::NotNull,
            value: None,
        }
    }

    fn render(&self, w: &mut SqlWriter) -> String {
        let col = self.column.sql();
        let Some(value) = &self.value else {
            return format!("{col} IS NOT NULL");
        };
        let p = w.bind(value.clone());
        match self.op {
            Op::Eq => format!("{col} = {p}"),
            Op::AnyOf => format!("{col} = ANY({p})"),
            Op::LikeAny => format!("{col} LIKE ANY({p})"),
            Op::NotAnyOf | Op::NotLikeAny => {
                let test = if self.op == Op::NotAnyOf {
                    format!("{col} = ANY({p})")
                } else {
                    format!("{col} LIKE ANY({p})")
                };
                if self.column.is_nullable() {
                    format!("({col} IS NULL OR NOT ({test}))")
                } else {
                    format!("NOT ({test})")
                }
            }
            Op::Gte => format!("{col} >= {p}"),
            Op::Lte => format!("{col} <= {p}"),
            Op::ContainsInsensitive => format!("{col} ILIKE {p}"),
            Op::NotNull => format!("{col} IS NOT NULL"),
        }
    }
}

/// The aggregated amount expression a HAVING predicate or sort reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AmountExpr {
    /// `SUM(amount)`.
    Total,
    /// `SUM(amount) / population`, zero when population is missing or zero.
    PerCapita,
}

impl AmountExpr {
    /// The expression surfaced as the selected amount for a normalization.
    #[must_use]
    pub const fn for_normalization(normalization: Normalization) -> Self {
        if normalization.is_per_capita() {
            Self::PerCapita
        } else {
            Self::Total
        }
    }
}

/// A post-aggregation predicate (HAVING).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HavingPredicate {
    /// Aggregated expression tested.
    pub expr: AmountExpr,
    /// [`Op::Gte`] or [`Op::Lte`].
    pub op: Op,
    /// Threshold.
    pub value: Decimal,
}

/// Territorial scope whose population normalizes classification groupings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    /// Explicit units; when set, their populations are summed directly.
    pub uat_ids: Vec<i64>,
    /// Counties, through their representative units.
    pub county_codes: Vec<String>,
    /// Regions, through their counties' representative units.
    pub regions: Vec<String>,
    /// Counties left out of the sum.
    pub exclude_county_codes: Vec<String>,
    /// Units left out of the sum.
    pub exclude_uat_ids: Vec<i64>,
}

/// Where the population of a group comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopulationSource {
    /// The grouped unit's own population.
    Uat,
    /// The county-representative unit of the grouped county.
    County,
    /// The unit administered by the grouped entity; `NULL` for other entities.
    Entity,
    /// The filter's territorial scope.
    Scope(Scope),
}

/// Sortable output fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// The selected amount (depends on normalization).
    Amount,
    /// The raw total.
    TotalAmount,
    /// The per-capita amount.
    PerCapitaAmount,
    /// The group's display name.
    Name,
    /// The group's population.
    Population,
    /// The group key (unit id, county code, CUI or classification code).
    Code,
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Amount => f.write_str("amount"),
            Self::TotalAmount => f.write_str("total_amount"),
            Self::PerCapitaAmount => f.write_str("per_capita_amount"),
            Self::Name => f.write_str("name"),
            Self::Population => f.write_str("population"),
            Self::Code => f.write_str("code"),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending (default: largest amounts first).
    #[default]
    Desc,
}

/// One ORDER BY term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    /// Field to sort by.
    pub by: SortField,
    /// Direction.
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    /// Ascending sort.
    #[must_use]
    pub const fn asc(by: SortField) -> Self {
        Self {
            by,
            direction: SortDirection::Asc,
        }
    }

    /// Descending sort.
    #[must_use]
    pub const fn desc(by: SortField) -> Self {
        Self {
            by,
            direction: SortDirection::Desc,
        }
    }
}

/// Ordering and pagination for a compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Sort terms, most significant first. Empty means amount descending.
    pub sort: Vec<SortSpec>,
    /// Maximum number of rows.
    pub limit: Option<u64>,
    /// Rows to skip.
    pub offset: u64,
}

/// One aggregation call: the filter plus grouping, ordering and pagination.
///
/// This is the unit the result cache is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRequest {
    /// The filter.
    pub filter: AnalyticsFilter,
    /// Grouping dimension.
    pub grouping: GroupingDimension,
    /// Sort terms; order is significant.
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    /// Maximum number of rows.
    #[serde(default)]
    pub limit: Option<u64>,
    /// Rows to skip.
    #[serde(default)]
    pub offset: Option<u64>,
}

impl AggregateRequest {
    /// Create an unsorted, unpaginated request.
    #[must_use]
    pub const fn new(filter: AnalyticsFilter, grouping: GroupingDimension) -> Self {
        Self {
            filter,
            grouping,
            sort: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Append a sort term.
    #[must_use]
    pub fn sorted_by(mut self, spec: SortSpec) -> Self {
        self.sort.push(spec);
        self
    }

    /// Set pagination.
    #[must_use]
    pub const fn page(mut self, limit: u64, offset: u64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// The compile options of this request.
    pub fn options(&self) -> QueryOptions {
        QueryOptions {
            sort: self.sort.clone(),
            limit: self.limit,
            offset: self.offset.unwrap_or(0),
        }
    }
}

/// Rendered SQL with its positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// SQL text with `$1..$n` placeholders.
    pub sql: String,
    /// Parameter values, `params[0]` binds `$1`.
    pub params: Vec<Param>,
}

/// A compiled aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    /// Grouping dimension.
    pub dimension: GroupingDimension,
    /// Tables joined onto the fact table.
    pub joins: BTreeSet<Join>,
    /// Row-level predicates, AND-ed.
    pub where_clauses: Vec<Predicate>,
    /// Grouping columns (the year is appended for yearly plans).
    pub group_by: Vec<Column>,
    /// Post-aggregation predicates, AND-ed.
    pub having_clauses: Vec<HavingPredicate>,
    /// Amount column summed.
    pub amount_column: AmountColumn,
    /// Requested normalization.
    pub normalization: Normalization,
    /// Population source for per-capita amounts.
    pub population: PopulationSource,
    /// Whether rows are additionally grouped by year for currency conversion.
    ///
    /// Yearly plans carry no HAVING, ORDER BY or pagination; those are
    /// applied after conversion using `post_aggregate`, `sort`, `limit` and
    /// `offset`.
    pub yearly: bool,
    /// Aggregate bounds still to apply after conversion (yearly plans only).
    pub post_aggregate: Bounds<Decimal>,
    /// Sort terms.
    pub sort: Vec<SortSpec>,
    /// Maximum number of rows.
    pub limit: Option<u64>,
    /// Rows to skip.
    pub offset: u64,
}

struct SqlWriter {
    params: Vec<Param>,
}

impl SqlWriter {
    const fn new() -> Self {
        Self { params: Vec::new() }
    }

    fn bind(&mut self, param: Param) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }
}

impl QueryPlan {
    /// The grouping columns including the year for yearly plans.
    pub fn grouping_columns(&self) -> Vec<Column> {
        let mut cols = self.group_by.clone();
        if self.yearly {
            cols.push(Column::Year);
        }
        cols
    }

    /// Every join that some referenced column needs.
    pub fn required_joins(&self) -> BTreeSet<Join> {
        let mut joins: BTreeSet<Join> = self
            .where_clauses
            .iter()
            .map(|p| p.column)
            .chain(self.group_by.iter().copied())
            .filter_map(Column::join)
            .collect();
        if joins.contains(&Join::Uats) {
            joins.insert(Join::Entities);
        }
        joins
    }

    /// Render the rows query.
    pub fn statement(&self) -> Statement {
        let mut w = SqlWriter::new();
        let mut sql = String::new();

        sql.push_str("SELECT ");
        sql.push_str(&self.select_list(&mut w).join(", "));
        self.push_from_where(&mut sql, &mut w);
        Self::push_group_by(&mut sql, &self.grouping_columns());

        if !self.yearly {
            self.push_having(&mut sql, &mut w);

            let mut terms: Vec<String> = self
                .effective_sort()
                .iter()
                .map(|spec| {
                    let dir = match spec.direction {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    format!("{} {dir} NULLS LAST", self.sort_expr(spec.by, &mut w))
                })
                .collect();
            terms.push(format!("{} ASC", self.dimension.key_column().sql()));
            sql.push_str("\nORDER BY ");
            sql.push_str(&terms.join(", "));

            if let Some(limit) = self.limit {
                let p = w.bind(Param::Int(i64::try_from(limit).unwrap_or(i64::MAX)));
                sql.push_str(&format!("\nLIMIT {p}"));
            }
            if self.offset > 0 {
                let p = w.bind(Param::Int(i64::try_from(self.offset).unwrap_or(i64::MAX)));
                sql.push_str(&format!("\nOFFSET {p}"));
            }
        } else {
            sql.push_str(&format!(
                "\nORDER BY {} ASC, eli.year ASC",
                self.dimension.key_column().sql()
            ));
        }

        Statement {
            sql,
            params: w.params,
        }
    }

    /// Render the query counting the groups the rows query pages through.
    ///
    /// Yearly plans count groups without the year and without thresholds;
    /// thresholds for those are applied after conversion.
    pub fn count_statement(&self) -> Statement {
        let mut w = SqlWriter::new();
        let mut sql = String::from("SELECT COUNT(*) FROM (SELECT 1");
        self.push_from_where(&mut sql, &mut w);
        Self::push_group_by(&mut sql, &self.group_by);
        if !self.yearly {
            self.push_having(&mut sql, &mut w);
        }
        sql.push_str("\n) AS grouped");
        Statement {
            sql,
            params: w.params,
        }
    }

    /// Parameters of the rows query, in placeholder order.
    pub fn params(&self) -> Vec<Param> {
        self.statement().params
    }

    /// Sort terms with the default applied.
    pub fn effective_sort(&self) -> Vec<SortSpec> {
        if self.sort.is_empty() {
            vec![SortSpec::desc(SortField::Amount)]
        } else {
            self.sort.clone()
        }
    }

    fn select_list(&self, w: &mut SqlWriter) -> Vec<String> {
        let mut cols = Vec::new();
        match self.dimension {
            GroupingDimension::Uat => {
                cols.push("u.id::text AS key".to_string());
                cols.push("u.name AS name".to_string());
                cols.push("u.siruta_code AS siruta_code".to_string());
                cols.push("u.county_code AS county_code".to_string());
                cols.push("u.county_name AS county_name".to_string());
            }
            GroupingDimension::County => {
                cols.push("u.county_code AS key".to_string());
                cols.push("u.county_name AS name".to_string());
                cols.push("u.county_code AS county_code".to_string());
                cols.push("u.county_name AS county_name".to_string());
                cols.push(format!("{} AS entity_cui", county_entity_sql(w)));
            }
            GroupingDimension::Entity => {
                cols.push("eli.entity_cui AS key".to_string());
                cols.push("e.name AS name".to_string());
                cols.push("eli.entity_cui AS entity_cui".to_string());
            }
            GroupingDimension::FunctionalCode => {
                cols.push("eli.functional_code AS key".to_string());
            }
            GroupingDimension::EconomicCode => {
                cols.push("eli.economic_code AS key".to_string());
            }
        }
        if self.yearly {
            cols.push("eli.year AS year".to_string());
        }
        cols.push(format!("{} AS population", self.population_sql(w)));
        cols.push(format!("{} AS sum_amount", self.amount_sql(AmountExpr::Total, w)));
        cols.push("COUNT(*) AS line_count".to_string());
        cols
    }

    fn push_from_where(&self, sql: &mut String, w: &mut SqlWriter) {
        sql.push_str("\nFROM executionlineitems eli");
        for join in &self.joins {
            sql.push('\n');
            sql.push_str(join.sql());
        }
        let preds: Vec<String> = self.where_clauses.iter().map(|p| p.render(w)).collect();
        if !preds.is_empty() {
            sql.push_str("\nWHERE ");
            sql.push_str(&preds.join("\n  AND "));
        }
    }

    fn push_group_by(sql: &mut String, columns: &[Column]) {
        let cols: Vec<&str> = columns.iter().map(|c| c.sql()).collect();
        sql.push_str("\nGROUP BY ");
        sql.push_str(&cols.join(", "));
    }

    fn push_having(&self, sql: &mut String, w: &mut SqlWriter) {
        let preds: Vec<String> = self
            .having_clauses
            .iter()
            .map(|h| {
                let expr = self.amount_sql(h.expr, w);
                let p = w.bind(Param::Decimal(h.value));
                let cmp = if h.op == Op::Lte { "<=" } else { ">=" };
                format!("{expr} {cmp} {p}")
            })
            .collect();
        if !preds.is_empty() {
            sql.push_str("\nHAVING ");
            sql.push_str(&preds.join("\n  AND "));
        }
    }

    fn amount_sql(&self, expr: AmountExpr, w: &mut SqlWriter) -> String {
        let sum = format!("SUM({})", Column::Amount(self.amount_column).sql());
        match expr {
            AmountExpr::Total => format!("COALESCE({sum}, 0)"),
            AmountExpr::PerCapita => {
                let population = self.population_sql(w);
                format!("COALESCE({sum} / NULLIF({population}, 0), 0)")
            }
        }
    }

    fn sort_expr(&self, field: SortField, w: &mut SqlWriter) -> String {
        match field {
            SortField::Amount => {
                self.amount_sql(AmountExpr::for_normalization(self.normalization), w)
            }
            SortField::TotalAmount => self.amount_sql(AmountExpr::Total, w),
            SortField::PerCapitaAmount => self.amount_sql(AmountExpr::PerCapita, w),
            SortField::Population => self.population_sql(w),
            SortField::Name => match self.dimension {
                GroupingDimension::Uat => Column::UatName.sql().to_string(),
                GroupingDimension::County => Column::CountyName.sql().to_string(),
                GroupingDimension::Entity => Column::EntityName.sql().to_string(),
                GroupingDimension::FunctionalCode | GroupingDimension::EconomicCode => {
                    self.dimension.key_column().sql().to_string()
                }
            },
            SortField::Code => self.dimension.key_column().sql().to_string(),
        }
    }

    fn population_sql(&self, w: &mut SqlWriter) -> String {
        match &self.population {
            PopulationSource::Uat => "u.population".to_string(),
            PopulationSource::County => county_population_sql(w),
            PopulationSource::Entity => {
                if self.joins.contains(&Join::Uats) {
                    "CASE WHEN e.is_uat THEN u.population END".to_string()
                } else {
                    "NULL::bigint".to_string()
                }
            }
            PopulationSource::Scope(scope) => scope_population_sql(scope, w),
        }
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stmt = self.statement();
        writeln!(f, "{}", stmt.sql)?;
        for (i, param) in stmt.params.iter().enumerate() {
            writeln!(f, "-- ${} = {param}", i + 1)?;
        }
        Ok(())
    }
}

/// Representative-unit condition on alias `alias`, binding the Bucharest constants.
fn representative_sql(alias: &str, w: &mut SqlWriter) -> String {
    let county = w.bind(Param::Text(BUCHAREST_COUNTY_CODE.to_string()));
    let siruta = w.bind(Param::Text(BUCHAREST_SIRUTA_CODE.to_string()));
    format!(
        "({alias}.siruta_code = {alias}.county_code OR ({alias}.county_code = {county} AND {alias}.siruta_code = {siruta}))"
    )
}

fn county_population_sql(w: &mut SqlWriter) -> String {
    let rep = representative_sql("cu", w);
    format!(
        "(SELECT MAX(cu.population) FROM uats cu WHERE cu.county_code = u.county_code AND {rep})"
    )
}

fn county_entity_sql(w: &mut SqlWriter) -> String {
    let rep = representative_sql("cu", w);
    format!(
        "(SELECT MIN(ce.cui) FROM entities ce JOIN uats cu ON cu.id = ce.uat_id \
         WHERE ce.is_uat AND cu.county_code = u.county_code AND {rep})"
    )
}

fn scope_population_sql(scope: &Scope, w: &mut SqlWriter) -> String {
    let mut conds = Vec::new();
    if scope.uat_ids.is_empty() {
        conds.push(representative_sql("su", w));
        if !scope.county_codes.is_empty() {
            let p = w.bind(Param::TextArray(scope.county_codes.clone()));
            conds.push(format!("su.county_code = ANY({p})"));
        }
        if !scope.regions.is_empty() {
            let p = w.bind(Param::TextArray(scope.regions.clone()));
            conds.push(format!("su.region = ANY({p})"));
        }
    } else {
        let p = w.bind(Param::IntArray(scope.uat_ids.clone()));
        conds.push(format!("su.id = ANY({p})"));
    }
    if !scope.exclude_county_codes.is_empty() {
        let p = w.bind(Param::TextArray(scope.exclude_county_codes.clone()));
        conds.push(format!("NOT (su.county_code = ANY({p}))"));
    }
    if !scope.exclude_uat_ids.is_empty() {
        let p = w.bind(Param::IntArray(scope.exclude_uat_ids.clone()));
        conds.push(format!("NOT (su.id = ANY({p}))"));
    }
    format!(
        "(SELECT COALESCE(SUM(su.population), 0) FROM uats su WHERE {})",
        conds.join(" AND ")
    )
}

/// Escape `LIKE` metacharacters in user text.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// `LIKE` pattern matching every string starting with `prefix`.
pub fn like_prefix(prefix: &str) -> String {
    format!("{}%", escape_like(prefix))
}

/// `ILIKE` pattern matching every string containing `text`.
pub fn like_contains(text: &str) -> String {
    format!("%{}%", escape_like(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(like_prefix("65.02"), "65.02%");
        assert_eq!(like_prefix("10_%"), "10\\_\\%%");
        assert_eq!(like_contains("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn test_not_any_of_is_null_safe_on_nullable_columns() {
        let mut w = SqlWriter::new();
        let pred = Predicate::new(
            Column::EconomicCode,
            Op::NotAnyOf,
            Param::TextArray(vec!["20".into()]),
        );
        assert_eq!(
            pred.render(&mut w),
            "(eli.economic_code IS NULL OR NOT (eli.economic_code = ANY($1)))"
        );

        let pred = Predicate::new(
            Column::EntityCui,
            Op::NotAnyOf,
            Param::TextArray(vec!["1".into()]),
        );
        assert_eq!(pred.render(&mut w), "NOT (eli.entity_cui = ANY($2))");
    }

    #[test]
    fn test_column_joins() {
        assert_eq!(Column::ReportType.join(), Some(Join::Reports));
        assert_eq!(Column::CountyCode.join(), Some(Join::Uats));
        assert_eq!(Column::EntityIsUat.join(), Some(Join::Entities));
        assert_eq!(Column::FunctionalCode.join(), None);
    }

    #[test]
    fn test_grouping_from_str() {
        assert_eq!("county".parse(), Ok(GroupingDimension::County));
        assert_eq!("functional".parse(), Ok(GroupingDimension::FunctionalCode));
        assert!("region".parse::<GroupingDimension>().is_err());
    }
}
