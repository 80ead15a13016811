//! Reporting entities (public institutions) and the reports they file.

use serde::{Deserialize, Serialize};

/// A public institution identified by its fiscal code (CUI).
///
/// Entities may point at up to two parent or creditor entities. The result is
/// a directed graph, not a tree: a school can report to both its town hall and
/// the county school inspectorate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Fiscal identifier.
    pub cui: String,
    /// Display name.
    pub name: String,
    /// Entity type, e.g. `admin_town_hall`.
    #[serde(default)]
    pub entity_type: Option<String>,
    /// Whether the entity is the administration of a territorial unit.
    #[serde(default)]
    pub is_uat: bool,
    /// Territorial unit this entity belongs to.
    #[serde(default)]
    pub uat_id: Option<i64>,
    /// First parent / creditor.
    #[serde(default)]
    pub parent1: Option<String>,
    /// Second parent / creditor.
    #[serde(default)]
    pub parent2: Option<String>,
}

impl Entity {
    /// Create an entity with no type, territorial link or parents.
    #[must_use]
    pub fn new(cui: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cui: cui.into(),
            name: name.into(),
            entity_type: None,
            is_uat: false,
            uat_id: None,
            parent1: None,
            parent2: None,
        }
    }

    /// Link the entity to a territorial unit as its administration.
    #[must_use]
    pub const fn administering(mut self, uat_id: i64) -> Self {
        self.uat_id = Some(uat_id);
        self.is_uat = true;
        self
    }

    /// Link the entity to a territorial unit without administering it.
    #[must_use]
    pub const fn located_in(mut self, uat_id: i64) -> Self {
        self.uat_id = Some(uat_id);
        self
    }

    /// Set the entity type.
    #[must_use]
    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Set the parents, first one first.
    #[must_use]
    pub fn with_parents(mut self, parent1: Option<String>, parent2: Option<String>) -> Self {
        self.parent1 = parent1;
        self.parent2 = parent2;
        self
    }

    /// The CUIs of the present parents, in order.
    pub fn parents(&self) -> impl Iterator<Item = &str> {
        self.parent1
            .as_deref()
            .into_iter()
            .chain(self.parent2.as_deref())
    }
}

/// A filed execution report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Report identifier.
    pub report_id: String,
    /// Reporting entity.
    pub entity_cui: String,
    /// Report type, e.g. `Executie bugetara detaliata`.
    pub report_type: String,
    /// Main creditor the report was aggregated under.
    #[serde(default)]
    pub main_creditor_cui: Option<String>,
    /// Reporting year.
    pub year: i32,
}
