//! SPR-derived reference-data extraction
//!
//! Voter rows carry combined strings such as `P171 SEPANGGAR` (parliament)
//! or `N13 INANAM` (DUN). Population splits these into code + name,
//! deduplicates by uppercase name, and plans inserts against what the
//! target table already holds.

use std::collections::{HashMap, HashSet};

/// A candidate reference row derived from voter data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRow {
    pub name: String,
    pub code: Option<String>,
}

/// Split a combined `P171 SEPANGGAR` string into (code, name).
///
/// The code token is letters followed by digits; anything else means the
/// whole string is a bare name with no code.
pub fn split_code_name(raw: &str) -> CandidateRow {
    let trimmed = raw.trim();
    if let Some((first, rest)) = trimmed.split_once(char::is_whitespace) {
        if is_code_token(first) && !rest.trim().is_empty() {
            return CandidateRow {
                name: rest.trim().to_string(),
                code: Some(first.to_uppercase()),
            };
        }
    }
    CandidateRow {
        name: trimmed.to_string(),
        code: None,
    }
}

fn is_code_token(token: &str) -> bool {
    let letters: String = token.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let digits = &token[letters.len()..];
    !letters.is_empty()
        && !digits.is_empty()
        && letters.len() <= 3
        && digits.chars().all(|c| c.is_ascii_digit())
}

/// Deduplicate candidates by uppercase name, keeping first occurrence
pub fn dedupe_by_name(candidates: Vec<CandidateRow>) -> Vec<CandidateRow> {
    let mut seen: HashSet<String> = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.name.to_uppercase()))
        .collect()
}

/// Plan which candidates to insert, given what the table already holds.
///
/// A candidate is skipped when its uppercased name OR its code already
/// exists - re-running population over the same voters adds nothing.
pub fn plan_inserts<V>(
    candidates: Vec<CandidateRow>,
    existing_names: &HashMap<String, V>,
    existing_codes: &HashSet<String>,
) -> (Vec<CandidateRow>, u32) {
    let mut to_insert = Vec::new();
    let mut skipped = 0u32;

    for candidate in dedupe_by_name(candidates) {
        let name_known = existing_names.contains_key(&candidate.name.to_uppercase());
        let code_known = candidate
            .code
            .as_deref()
            .map(|c| existing_codes.contains(&c.to_uppercase()))
            .unwrap_or(false);

        if name_known || code_known {
            skipped += 1;
        } else {
            to_insert.push(candidate);
        }
    }

    (to_insert, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_split_parliament_code_name() {
        let row = split_code_name("P171 SEPANGGAR");
        assert_eq!(row.code.as_deref(), Some("P171"));
        assert_eq!(row.name, "SEPANGGAR");
    }

    #[test]
    fn test_split_dun_code_name() {
        let row = split_code_name("N13 INANAM");
        assert_eq!(row.code.as_deref(), Some("N13"));
        assert_eq!(row.name, "INANAM");
    }

    #[test]
    fn test_split_multiword_name() {
        let row = split_code_name("P185 BATU SAPI");
        assert_eq!(row.code.as_deref(), Some("P185"));
        assert_eq!(row.name, "BATU SAPI");
    }

    #[test]
    fn test_split_bare_name_has_no_code() {
        let row = split_code_name("KOTA KINABALU");
        assert!(row.code.is_none());
        assert_eq!(row.name, "KOTA KINABALU");
    }

    #[test]
    fn test_split_trims_whitespace() {
        let row = split_code_name("  P171   SEPANGGAR  ");
        assert_eq!(row.code.as_deref(), Some("P171"));
        // Inner spacing beyond the first split is preserved by trim only
        assert_eq!(row.name, "SEPANGGAR");
    }

    #[test]
    fn test_dedupe_is_case_insensitive() {
        let deduped = dedupe_by_name(vec![
            CandidateRow { name: "Sepanggar".into(), code: None },
            CandidateRow { name: "SEPANGGAR".into(), code: Some("P171".into()) },
        ]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].name, "Sepanggar");
    }

    #[test]
    fn test_plan_skips_existing_names_and_codes() {
        let mut names: HashMap<String, Uuid> = HashMap::new();
        names.insert("SEPANGGAR".to_string(), Uuid::new_v4());
        let mut codes = HashSet::new();
        codes.insert("P186".to_string());

        let candidates = vec![
            CandidateRow { name: "SEPANGGAR".into(), code: Some("P171".into()) },
            CandidateRow { name: "SANDAKAN".into(), code: Some("P186".into()) },
            CandidateRow { name: "PUTATAN".into(), code: Some("P173".into()) },
        ];

        let (to_insert, skipped) = plan_inserts(candidates, &names, &codes);
        assert_eq!(skipped, 2);
        assert_eq!(to_insert.len(), 1);
        assert_eq!(to_insert[0].name, "PUTATAN");
    }

    #[test]
    fn test_rerun_over_inserted_rows_adds_nothing() {
        let candidates = vec![
            CandidateRow { name: "SEPANGGAR".into(), code: Some("P171".into()) },
            CandidateRow { name: "PUTATAN".into(), code: Some("P173".into()) },
        ];

        let names: HashMap<String, Uuid> = HashMap::new();
        let codes = HashSet::new();
        let (first_run, _) = plan_inserts(candidates.clone(), &names, &codes);
        assert_eq!(first_run.len(), 2);

        // Simulate the first run landing in the table, then re-run.
        let names_after: HashMap<String, Uuid> = first_run
            .iter()
            .map(|c| (c.name.to_uppercase(), Uuid::new_v4()))
            .collect();
        let codes_after: HashSet<String> = first_run
            .iter()
            .filter_map(|c| c.code.as_ref().map(|s| s.to_uppercase()))
            .collect();

        let (second_run, skipped) = plan_inserts(candidates, &names_after, &codes_after);
        assert!(second_run.is_empty());
        assert_eq!(skipped, 2);
    }
}
