//! In-memory collection of every table a query can touch.

use serde::{Deserialize, Serialize};

use crate::{ClassificationTable, CountyIndex, Entity, ExecutionLineItem, Report, TerritorialUnit};

/// A snapshot of the fact and dimension tables.
///
/// Production deployments keep these tables in a relational store; the
/// snapshot exists for tests, fixtures and the command-line tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    /// Fact rows.
    #[serde(default)]
    pub line_items: Vec<ExecutionLineItem>,
    /// Reporting entities.
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Territorial units.
    #[serde(default)]
    pub uats: Vec<TerritorialUnit>,
    /// Filed reports.
    #[serde(default)]
    pub reports: Vec<Report>,
    /// Functional classification names.
    #[serde(default)]
    pub functional: ClassificationTable,
    /// Economic classification names.
    #[serde(default)]
    pub economic: ClassificationTable,
}

impl Dataset {
    /// Create an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entity by CUI.
    pub fn entity(&self, cui: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.cui == cui)
    }

    /// Look up a territorial unit by id.
    pub fn uat(&self, id: i64) -> Option<&TerritorialUnit> {
        self.uats.iter().find(|u| u.id == id)
    }

    /// Look up a report by id.
    pub fn report(&self, report_id: &str) -> Option<&Report> {
        self.reports.iter().find(|r| r.report_id == report_id)
    }

    /// Build the county index for this snapshot.
    pub fn county_index(&self) -> CountyIndex {
        CountyIndex::build(&self.uats, &self.entities)
    }
}
