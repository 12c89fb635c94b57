//! Voter import and matching message types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::voter::VoterImportRow;

/// One chunk of CSV data rows submitted to the worker.
///
/// Chunks are issued strictly sequentially by the import client. Only the
/// first chunk carries `verify_version = true`; later chunks skip the
/// version-existence check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterChunkRequest {
    pub version_id: Uuid,
    /// 1-based data-row number of the first row in this chunk
    pub start_row: u32,
    #[serde(default)]
    pub verify_version: bool,
    pub rows: Vec<VoterImportRow>,
}

/// Per-chunk result returned to the import client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterChunkResponse {
    /// Rows newly created
    pub imported: u32,
    /// Rows that updated an existing voter (same version + identity number)
    pub updated: u32,
    /// Voters linked to a household member during this chunk
    pub matched: u32,
    /// Row-level errors, each prefixed with its 1-based data-row number
    pub errors: Vec<String>,
}

/// Aggregated outcome of a full chunked import run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterImportSummary {
    pub total_rows: u32,
    pub imported: u32,
    pub updated: u32,
    pub matched: u32,
    pub chunks_sent: u32,
    /// Capped at the first 100; a final "... and N more errors" entry marks
    /// truncation.
    pub errors: Vec<String>,
}

/// Request to re-match a version's voters against household members
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchVotersRequest {
    pub version_id: Uuid,
}

/// Counts reported by the voter-household matcher. Per-row failures are
/// counted, never raised.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub total: u32,
    pub matched: u32,
    pub unmatched: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_request_verify_version_defaults_false() {
        let json = r#"{"versionId":"00000000-0000-0000-0000-000000000000","startRow":251,"rows":[]}"#;
        let request: VoterChunkRequest = serde_json::from_str(json).unwrap();
        assert!(!request.verify_version);
        assert_eq!(request.start_row, 251);
    }

    #[test]
    fn test_match_summary_serializes_counts() {
        let summary = MatchSummary {
            total: 10,
            matched: 7,
            unmatched: 3,
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"matched\":7"));
        assert!(json.contains("\"unmatched\":3"));
    }
}
