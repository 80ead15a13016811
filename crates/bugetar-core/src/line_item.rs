//! Execution line items: the fact rows of budget execution reports.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountCategory, PeriodKey, PeriodType};

/// Which amount column of a line item a query sums.
///
/// Each row carries a year-to-date amount plus the amount for its own month
/// and, for quarter-closing months, its quarter. The periodicity of the
/// selection decides which one is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountColumn {
    /// `ytd_amount`, used for yearly selections.
    Ytd,
    /// `quarterly_amount`, used for quarterly selections.
    Quarterly,
    /// `monthly_amount`, used for monthly selections.
    Monthly,
}

impl AmountColumn {
    /// The column bound to a periodicity.
    #[must_use]
    pub const fn for_period(period_type: PeriodType) -> Self {
        match period_type {
            PeriodType::Year => Self::Ytd,
            PeriodType::Quarter => Self::Quarterly,
            PeriodType::Month => Self::Monthly,
        }
    }

    /// Column name in the fact table.
    #[must_use]
    pub const fn column_name(self) -> &'static str {
        match self {
            Self::Ytd => "ytd_amount",
            Self::Quarterly => "quarterly_amount",
            Self::Monthly => "monthly_amount",
        }
    }
}

/// One line of a budget execution report.
///
/// Line items are immutable once ingested. Amounts may be negative
/// (corrections), so any sum over them is signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLineItem {
    /// CUI of the reporting entity.
    pub entity_cui: String,
    /// Report this line was ingested from.
    pub report_id: String,
    /// Reporting year.
    pub year: i32,
    /// Reporting month, 1 to 12.
    pub month: u8,
    /// Quarter of the reporting month, 1 to 4.
    pub quarter: u8,
    /// Whether the row closes its year (December data).
    #[serde(default)]
    pub is_yearly: bool,
    /// Whether the row closes its quarter.
    #[serde(default)]
    pub is_quarterly: bool,
    /// Income or expense side.
    pub account_category: AccountCategory,
    /// Functional classification code.
    pub functional_code: String,
    /// Economic classification code, absent for most income lines.
    #[serde(default)]
    pub economic_code: Option<String>,
    /// Funding source identifier.
    pub funding_source_id: i32,
    /// Budget sector identifier.
    pub budget_sector_id: i32,
    /// Program code, when the line belongs to a program.
    #[serde(default)]
    pub program_code: Option<String>,
    /// Expense type (development / operational), when reported.
    #[serde(default)]
    pub expense_type: Option<String>,
    /// Year-to-date amount.
    pub ytd_amount: Decimal,
    /// Amount for the reporting month.
    pub monthly_amount: Decimal,
    /// Amount for the reporting quarter.
    #[serde(default)]
    pub quarterly_amount: Option<Decimal>,
}

impl ExecutionLineItem {
    /// Create a yearly line item with the same amount in every column.
    #[must_use]
    pub fn yearly(
        entity_cui: impl Into<String>,
        year: i32,
        account_category: AccountCategory,
        functional_code: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            entity_cui: entity_cui.into(),
            report_id: format!("{year}-12"),
            year,
            month: 12,
            quarter: 4,
            is_yearly: true,
            is_quarterly: true,
            account_category,
            functional_code: functional_code.into(),
            economic_code: None,
            funding_source_id: 1,
            budget_sector_id: 1,
            program_code: None,
            expense_type: None,
            ytd_amount: amount,
            monthly_amount: amount,
            quarterly_amount: Some(amount),
        }
    }

    /// Set the economic code.
    #[must_use]
    pub fn with_economic_code(mut self, code: impl Into<String>) -> Self {
        self.economic_code = Some(code.into());
        self
    }

    /// Set the funding source.
    #[must_use]
    pub const fn with_funding_source(mut self, id: i32) -> Self {
        self.funding_source_id = id;
        self
    }

    /// Set the report identifier.
    #[must_use]
    pub fn with_report(mut self, report_id: impl Into<String>) -> Self {
        self.report_id = report_id.into();
        self
    }

    /// Read one of the amount columns.
    ///
    /// A missing quarterly amount reads as `None`; callers treat it as SQL
    /// `NULL` and skip it in sums.
    #[must_use]
    pub fn amount(&self, column: AmountColumn) -> Option<Decimal> {
        match column {
            AmountColumn::Ytd => Some(self.ytd_amount),
            AmountColumn::Quarterly => self.quarterly_amount,
            AmountColumn::Monthly => Some(self.monthly_amount),
        }
    }

    /// The period key of this row at the given periodicity.
    #[must_use]
    pub const fn period(&self, period_type: PeriodType) -> PeriodKey {
        match period_type {
            PeriodType::Year => PeriodKey::Year(self.year),
            PeriodType::Quarter => PeriodKey::Quarter {
                year: self.year,
                quarter: self.quarter,
            },
            PeriodType::Month => PeriodKey::Month {
                year: self.year,
                month: self.month,
            },
        }
    }
}
