//! Household member lookups for voter matching

use std::collections::HashMap;

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

/// Map of normalized identity number -> household member id.
///
/// Loaded once per match run; the join happens in memory.
pub async fn identity_map(pool: &PgPool) -> Result<HashMap<String, Uuid>> {
    let rows: Vec<(String, Uuid)> = sqlx::query_as(
        "SELECT identity_no_norm, id FROM household_members",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}

/// Identity map restricted to the normalized numbers of one import chunk
pub async fn identity_map_for(
    pool: &PgPool,
    norms: &[String],
) -> Result<HashMap<String, Uuid>> {
    if norms.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(String, Uuid)> = sqlx::query_as(
        "SELECT identity_no_norm, id FROM household_members WHERE identity_no_norm = ANY($1)",
    )
    .bind(norms)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}
