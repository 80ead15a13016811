//! Functional and economic classification tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The two independent coding schemes applied to every line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationKind {
    /// Purpose of the spending (COFOG-like).
    Functional,
    /// Economic nature of the spending.
    Economic,
}

impl fmt::Display for ClassificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Functional => f.write_str("functional"),
            Self::Economic => f.write_str("economic"),
        }
    }
}

/// Static code → name table for one classification scheme.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationTable {
    names: BTreeMap<String, String>,
}

impl ClassificationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a code.
    pub fn insert(&mut self, code: impl Into<String>, name: impl Into<String>) {
        self.names.insert(code.into(), name.into());
    }

    /// Name of a code.
    pub fn name(&self, code: &str) -> Option<&str> {
        self.names.get(code).map(String::as_str)
    }
}
