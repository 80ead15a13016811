//! RON to EUR exchange rates.
//!
//! Rates are annual averages expressed as RON per EUR. Converting a yearly
//! subtotal divides it by the rate of its own year.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::QueryError;

/// Source of annual exchange rates.
pub trait RateSource: Send + Sync {
    /// RON per EUR for a year.
    ///
    /// # Errors
    ///
    /// Implementations may refuse unknown years with [`QueryError::MissingRate`].
    fn rate_for(&self, year: i32) -> Result<Decimal, QueryError>;

    /// Convert a RON amount of `year` into EUR.
    ///
    /// # Errors
    ///
    /// Propagates [`RateSource::rate_for`] and rejects non-positive rates.
    fn convert(&self, amount: Decimal, year: i32) -> Result<Decimal, QueryError> {
        let rate = self.rate_for(year)?;
        if rate <= Decimal::ZERO {
            return Err(QueryError::Evaluation(format!(
                "exchange rate for {year} must be positive, got {rate}"
            )));
        }
        amount
            .checked_div(rate)
            .ok_or_else(|| QueryError::Evaluation(format!("overflow converting {amount} for {year}")))
    }
}

/// Year-indexed rate table.
///
/// Unknown years fall back to a rate of `1` with a warning unless the table
/// is strict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeRates {
    rates: BTreeMap<i32, Decimal>,
    strict: bool,
}

impl ExchangeRates {
    /// Create an empty, lenient table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Annual average rates published by the National Bank of Romania.
    pub fn bnr_annual_averages() -> Self {
        [
            (2016, Decimal::new(44_908, 4)),
            (2017, Decimal::new(45_681, 4)),
            (2018, Decimal::new(46_535, 4)),
            (2019, Decimal::new(47_452, 4)),
            (2020, Decimal::new(48_371, 4)),
            (2021, Decimal::new(49_204, 4)),
            (2022, Decimal::new(49_315, 4)),
            (2023, Decimal::new(49_465, 4)),
            (2024, Decimal::new(49_746, 4)),
        ]
        .into_iter()
        .collect()
    }

    /// Add or replace the rate of a year.
    #[must_use]
    pub fn with_rate(mut self, year: i32, rate: Decimal) -> Self {
        self.rates.insert(year, rate);
        self
    }

    /// Make unknown years an error instead of defaulting to `1`.
    #[must_use]
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Whether unknown years are an error.
    pub const fn is_strict(&self) -> bool {
        self.strict
    }

    /// Number of years with a rate.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Whether no rate is known.
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl FromIterator<(i32, Decimal)> for ExchangeRates {
    fn from_iter<I: IntoIterator<Item = (i32, Decimal)>>(iter: I) -> Self {
        Self {
            rates: iter.into_iter().collect(),
            strict: false,
        }
    }
}

impl RateSource for ExchangeRates {
    fn rate_for(&self, year: i32) -> Result<Decimal, QueryError> {
        if let Some(rate) = self.rates.get(&year) {
            return Ok(*rate);
        }
        if self.strict {
            return Err(QueryError::MissingRate { year });
        }
        warn!(year, "no exchange rate for year, using 1");
        Ok(Decimal::ONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_known_year() {
        let rates = ExchangeRates::bnr_annual_averages();
        assert_eq!(rates.rate_for(2023).unwrap(), dec!(4.9465));
        assert_eq!(rates.convert(dec!(49465), 2023).unwrap(), dec!(10000));
    }

    #[test]
    fn test_unknown_year_defaults_to_one() {
        let rates = ExchangeRates::new();
        assert_eq!(rates.rate_for(1990).unwrap(), Decimal::ONE);
        assert_eq!(rates.convert(dec!(12.5), 1990).unwrap(), dec!(12.5));
    }

    #[test]
    fn test_strict_rejects_unknown_year() {
        let rates = ExchangeRates::new().strict(true);
        assert!(matches!(
            rates.rate_for(1990),
            Err(QueryError::MissingRate { year: 1990 })
        ));
    }

    #[test]
    fn test_non_positive_rate_rejected() {
        let rates = ExchangeRates::new().with_rate(2020, Decimal::ZERO);
        assert!(rates.convert(dec!(1), 2020).is_err());
    }
}
