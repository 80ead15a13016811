//! Territorial administrative units (UATs) and county resolution.
//!
//! County-level figures need exactly one unit per county whose population
//! stands for the whole county. That unit is the one whose SIRUTA code equals
//! the county code. Bucharest is the one exception: its county code is `B`
//! and its representative unit is the municipality with SIRUTA `179132`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::Entity;

/// County code of Bucharest.
pub const BUCHAREST_COUNTY_CODE: &str = "B";

/// SIRUTA code of the Bucharest municipality, the representative of county `B`.
pub const BUCHAREST_SIRUTA_CODE: &str = "179132";

/// A territorial administrative unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerritorialUnit {
    /// Surrogate identifier.
    pub id: i64,
    /// SIRUTA registry code.
    pub siruta_code: String,
    /// Unit name.
    pub name: String,
    /// County code, e.g. `CJ`.
    pub county_code: String,
    /// County name.
    pub county_name: String,
    /// Development region.
    #[serde(default)]
    pub region: Option<String>,
    /// Resident population, when known.
    #[serde(default)]
    pub population: Option<i64>,
}

impl TerritorialUnit {
    /// Create a unit.
    #[must_use]
    pub fn new(
        id: i64,
        siruta_code: impl Into<String>,
        name: impl Into<String>,
        county_code: impl Into<String>,
        county_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            siruta_code: siruta_code.into(),
            name: name.into(),
            county_code: county_code.into(),
            county_name: county_name.into(),
            region: None,
            population: None,
        }
    }

    /// Set the population.
    #[must_use]
    pub const fn with_population(mut self, population: i64) -> Self {
        self.population = Some(population);
        self
    }

    /// Set the development region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Whether this unit represents its county.
    #[must_use]
    pub fn is_county_representative(&self) -> bool {
        is_county_representative(&self.county_code, &self.siruta_code)
    }
}

/// The county-representative rule on raw codes.
#[must_use]
pub fn is_county_representative(county_code: &str, siruta_code: &str) -> bool {
    siruta_code == county_code
        || (county_code == BUCHAREST_COUNTY_CODE && siruta_code == BUCHAREST_SIRUTA_CODE)
}

/// Figures resolved for one county from its representative unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountyInfo {
    /// County code.
    pub county_code: String,
    /// County name.
    pub county_name: String,
    /// Population of the representative unit.
    pub population: Option<i64>,
    /// CUI of the entity administering the representative unit.
    pub entity_cui: Option<String>,
}

/// Per-county lookup built from the unit and entity tables.
#[derive(Debug, Clone, Default)]
pub struct CountyIndex {
    counties: BTreeMap<String, CountyInfo>,
}

impl CountyIndex {
    /// Resolve every county that has a representative unit.
    ///
    /// The county CUI is taken from the UAT-flagged entity linked to the
    /// representative unit; with several candidates the smallest CUI wins so
    /// the result does not depend on input order.
    pub fn build(units: &[TerritorialUnit], entities: &[Entity]) -> Self {
        let mut counties = BTreeMap::new();

        for unit in units.iter().filter(|u| u.is_county_representative()) {
            let entity_cui = entities
                .iter()
                .filter(|e| e.is_uat && e.uat_id == Some(unit.id))
                .map(|e| e.cui.clone())
                .min();

            counties.insert(
                unit.county_code.clone(),
                CountyInfo {
                    county_code: unit.county_code.clone(),
                    county_name: unit.county_name.clone(),
                    population: unit.population,
                    entity_cui,
                },
            );
        }

        Self { counties }
    }

    /// Look up a county.
    pub fn get(&self, county_code: &str) -> Option<&CountyInfo> {
        self.counties.get(county_code)
    }

    /// Population of a county, if its representative unit has one.
    pub fn population(&self, county_code: &str) -> Option<i64> {
        self.counties.get(county_code).and_then(|c| c.population)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units() -> Vec<TerritorialUnit> {
        vec![
            TerritorialUnit::new(1, "CJ", "Judetul Cluj", "CJ", "Cluj").with_population(690_000),
            TerritorialUnit::new(2, "54975", "Cluj-Napoca", "CJ", "Cluj").with_population(286_000),
            TerritorialUnit::new(3, "179132", "Bucuresti", "B", "Bucuresti")
                .with_population(1_716_000),
            TerritorialUnit::new(4, "179141", "Sector 1", "B", "Bucuresti").with_population(200_000),
        ]
    }

    #[test]
    fn test_general_rule() {
        let units = units();
        assert!(units[0].is_county_representative());
        assert!(!units[1].is_county_representative());
    }

    #[test]
    fn test_bucharest_special_case() {
        let units = units();
        assert!(units[2].is_county_representative());
        assert!(!units[3].is_county_representative());
        // The special case only applies to county B.
        assert!(!is_county_representative("CJ", BUCHAREST_SIRUTA_CODE));
    }

    #[test]
    fn test_county_index() {
        let entities = vec![
            Entity::new("4288110", "Judetul Cluj").administering(1),
            Entity::new("4267117", "Municipiul Bucuresti").administering(3),
            Entity::new("999", "Spital").located_in(3),
        ];
        let index = CountyIndex::build(&units(), &entities);

        assert_eq!(index.population("CJ"), Some(690_000));
        assert_eq!(index.population("B"), Some(1_716_000));
        assert_eq!(
            index.get("B").and_then(|c| c.entity_cui.as_deref()),
            Some("4267117")
        );
        assert_eq!(index.population("AB"), None);
        // Only representative units resolve a county.
        assert!(index.get("54975").is_none());
    }
}
