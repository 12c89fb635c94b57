//! Reference-data types
//!
//! The reference tables form a closed set; anything else on the wire is an
//! invalid request, not a dynamic table name.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed enumeration of reference tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceTable {
    Genders,
    Religions,
    Races,
    Districts,
    Parliaments,
    Localities,
    PollingStations,
    Duns,
    Zones,
    Cawangan,
    Villages,
}

impl ReferenceTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceTable::Genders => "genders",
            ReferenceTable::Religions => "religions",
            ReferenceTable::Races => "races",
            ReferenceTable::Districts => "districts",
            ReferenceTable::Parliaments => "parliaments",
            ReferenceTable::Localities => "localities",
            ReferenceTable::PollingStations => "polling_stations",
            ReferenceTable::Duns => "duns",
            ReferenceTable::Zones => "zones",
            ReferenceTable::Cawangan => "cawangan",
            ReferenceTable::Villages => "villages",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "genders" => Some(ReferenceTable::Genders),
            "religions" => Some(ReferenceTable::Religions),
            "races" => Some(ReferenceTable::Races),
            "districts" => Some(ReferenceTable::Districts),
            "parliaments" => Some(ReferenceTable::Parliaments),
            "localities" => Some(ReferenceTable::Localities),
            "polling_stations" => Some(ReferenceTable::PollingStations),
            "duns" => Some(ReferenceTable::Duns),
            "zones" => Some(ReferenceTable::Zones),
            "cawangan" => Some(ReferenceTable::Cawangan),
            "villages" => Some(ReferenceTable::Villages),
            _ => None,
        }
    }

    /// Foreign-key name columns expected in CSV imports for this table
    pub fn parent_columns(&self) -> &'static [&'static str] {
        match self {
            ReferenceTable::Localities => &["Parliament", "DUN", "District"],
            ReferenceTable::PollingStations => &["Locality"],
            ReferenceTable::Duns => &["Parliament"],
            ReferenceTable::Cawangan => &["Zone"],
            ReferenceTable::Villages => &["Cawangan"],
            _ => &[],
        }
    }
}

/// A generic reference row used for import/export across all tables
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceRow {
    pub id: Uuid,
    pub name: String,
    pub code: Option<String>,
    pub is_active: bool,
}

/// Result of a reference CSV import
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImportSummary {
    pub added: u32,
    pub skipped: u32,
    pub errors: Vec<String>,
}

/// Request to populate a reference table from a voter-list version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulateRequest {
    pub table: ReferenceTable,
    pub version_id: Uuid,
}

/// Result of SPR-derived population. A re-run over the same voters reports
/// `added = 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulateSummary {
    pub added: u32,
    pub skipped: u32,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_table_roundtrips_all_variants() {
        let all = [
            ReferenceTable::Genders,
            ReferenceTable::Religions,
            ReferenceTable::Races,
            ReferenceTable::Districts,
            ReferenceTable::Parliaments,
            ReferenceTable::Localities,
            ReferenceTable::PollingStations,
            ReferenceTable::Duns,
            ReferenceTable::Zones,
            ReferenceTable::Cawangan,
            ReferenceTable::Villages,
        ];
        for table in all {
            assert_eq!(ReferenceTable::parse(table.as_str()), Some(table));
        }
        assert_eq!(ReferenceTable::parse("voters"), None);
    }

    #[test]
    fn test_reference_table_serde_uses_snake_case() {
        let json = serde_json::to_string(&ReferenceTable::PollingStations).unwrap();
        assert_eq!(json, "\"polling_stations\"");
    }

    #[test]
    fn test_localities_expect_three_parent_columns() {
        assert_eq!(
            ReferenceTable::Localities.parent_columns(),
            &["Parliament", "DUN", "District"]
        );
        assert!(ReferenceTable::Genders.parent_columns().is_empty());
    }
}
