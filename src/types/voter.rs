//! Voter roll types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A voter-list version. Imports and geocode jobs are scoped to one version.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VoterVersion {
    pub id: Uuid,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// Geocoding state of a single voter row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoterGeocodeStatus {
    Pending,
    Success,
    Failed,
    Skipped,
}

impl VoterGeocodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoterGeocodeStatus::Pending => "pending",
            VoterGeocodeStatus::Success => "success",
            VoterGeocodeStatus::Failed => "failed",
            VoterGeocodeStatus::Skipped => "skipped",
        }
    }
}

/// A voter record as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Voter {
    pub id: Uuid,
    pub version_id: Uuid,
    pub identity_no: String,
    pub identity_no_norm: String,
    pub name: String,
    pub address: Option<String>,
    pub locality: Option<String>,
    pub postcode: Option<String>,
    pub parliament: Option<String>,
    pub dun: Option<String>,
    pub district: Option<String>,
    pub polling_station: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub geocode_status: String,
    pub household_member_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One data row parsed from an SPR CSV file, before persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterImportRow {
    pub name: String,
    pub identity_no: String,
    pub address: Option<String>,
    pub locality: Option<String>,
    pub postcode: Option<String>,
    /// Combined SPR strings such as `P171 SEPANGGAR` / `N13 INANAM`
    pub parliament: Option<String>,
    pub dun: Option<String>,
    pub district: Option<String>,
    pub polling_station: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geocode_status_serializes_lowercase() {
        let json = serde_json::to_string(&VoterGeocodeStatus::Skipped).unwrap();
        assert_eq!(json, "\"skipped\"");
    }

    #[test]
    fn test_import_row_roundtrips_camel_case() {
        let row = VoterImportRow {
            name: "AMINAH BINTI HASSAN".to_string(),
            identity_no: "850101-01-1234".to_string(),
            address: Some("LOT 12 JALAN MERPATI".to_string()),
            locality: Some("KG LIKAS".to_string()),
            postcode: Some("88400".to_string()),
            parliament: Some("P171 SEPANGGAR".to_string()),
            dun: Some("N13 INANAM".to_string()),
            district: Some("KOTA KINABALU".to_string()),
            polling_station: Some("SK LIKAS".to_string()),
        };
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains("identityNo"));
        let back: VoterImportRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }
}
