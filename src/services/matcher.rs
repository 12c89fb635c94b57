//! Voter-household matching
//!
//! Voters and household members are joined by normalized identity number.
//! The member side is loaded once into a map; the join runs in memory.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::queries;
use crate::types::MatchSummary;

/// Normalize an identity number for matching: drop separators, uppercase.
///
/// `850101-01-1234`, `850101 01 1234` and `850101011234` all normalize to
/// the same key.
pub fn normalize_identity(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Pure join of voter identity pairs against the member map
pub fn match_pairs(
    voters: &[(Uuid, String)],
    members: &HashMap<String, Uuid>,
) -> Vec<(Uuid, Uuid)> {
    voters
        .iter()
        .filter_map(|(voter_id, norm)| members.get(norm).map(|member_id| (*voter_id, *member_id)))
        .collect()
}

/// Match every voter of a version against household members.
///
/// Per-row link failures are logged and counted as unmatched; the batch
/// always completes with counts.
pub async fn match_version(pool: &PgPool, version_id: Uuid) -> Result<MatchSummary> {
    let voters = queries::voter::identity_pairs_for_version(pool, version_id).await?;
    let members = queries::household::identity_map(pool).await?;

    let total = voters.len() as u32;
    let links = match_pairs(&voters, &members);

    let mut matched = 0u32;
    for (voter_id, member_id) in &links {
        match queries::voter::link_household_member(pool, *voter_id, *member_id).await {
            Ok(()) => matched += 1,
            Err(e) => {
                warn!("Failed to link voter {} to member {}: {}", voter_id, member_id, e);
            }
        }
    }

    let summary = MatchSummary {
        total,
        matched,
        unmatched: total - matched,
    };

    info!(
        "Matched version {}: {}/{} voters linked",
        version_id, summary.matched, summary.total
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_dashes() {
        assert_eq!(normalize_identity("850101-01-1234"), "850101011234");
    }

    #[test]
    fn test_normalize_is_identity_on_clean_input() {
        assert_eq!(normalize_identity("850101011234"), "850101011234");
    }

    #[test]
    fn test_dashed_and_plain_forms_normalize_equal() {
        assert_eq!(
            normalize_identity("850101-01-1234"),
            normalize_identity("850101011234")
        );
    }

    #[test]
    fn test_normalize_uppercases_and_drops_spaces() {
        assert_eq!(normalize_identity("a 1234567 x"), "A1234567X");
    }

    #[test]
    fn test_match_pairs_joins_on_normalized_key() {
        let member_id = Uuid::new_v4();
        let voter_id = Uuid::new_v4();
        let other_voter = Uuid::new_v4();

        let mut members = HashMap::new();
        members.insert(normalize_identity("850101-01-1234"), member_id);

        let voters = vec![
            (voter_id, normalize_identity("850101011234")),
            (other_voter, normalize_identity("900202-02-5678")),
        ];

        let links = match_pairs(&voters, &members);
        assert_eq!(links, vec![(voter_id, member_id)]);
    }

    #[test]
    fn test_match_pairs_empty_member_map_matches_nothing() {
        let voters = vec![(Uuid::new_v4(), "850101011234".to_string())];
        let links = match_pairs(&voters, &HashMap::new());
        assert!(links.is_empty());
    }
}
