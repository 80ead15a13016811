//! Account category: the income or expense side of a budget.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ParseError;

/// Which side of the budget a line item belongs to.
///
/// Serialized with the short tokens used in the execution reports:
/// `vn` for income (*venituri*) and `ch` for expense (*cheltuieli*).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccountCategory {
    /// Income side (`vn`).
    #[serde(rename = "vn")]
    Income,
    /// Expense side (`ch`).
    #[serde(rename = "ch")]
    Expense,
}

impl AccountCategory {
    /// The short token stored in the fact table.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Income => "vn",
            Self::Expense => "ch",
        }
    }
}

impl fmt::Display for AccountCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountCategory {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vn" => Ok(Self::Income),
            "ch" => Ok(Self::Expense),
            other => Err(ParseError::AccountCategory(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tokens() {
        assert_eq!("vn".parse::<AccountCategory>().unwrap(), AccountCategory::Income);
        assert_eq!(" CH ".parse::<AccountCategory>().unwrap(), AccountCategory::Expense);
        assert!("venituri".parse::<AccountCategory>().is_err());
    }

    #[test]
    fn test_serde_tokens() {
        let json = serde_json::to_string(&AccountCategory::Expense).unwrap();
        assert_eq!(json, "\"ch\"");
        let back: AccountCategory = serde_json::from_str("\"vn\"").unwrap();
        assert_eq!(back, AccountCategory::Income);
    }
}
