//! Voter roll queries

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{Voter, VoterGeocodeStatus, VoterImportRow};

/// Outcome of a single-row upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Check that a voter-list version exists
pub async fn version_exists(pool: &PgPool, version_id: Uuid) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM voter_versions WHERE id = $1)",
    )
    .bind(version_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Create a voter-list version and return its id
pub async fn create_version(pool: &PgPool, label: &str) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO voter_versions (label) VALUES ($1) RETURNING id",
    )
    .bind(label)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Upsert one imported voter by (version, normalized identity number).
///
/// `xmax = 0` distinguishes a fresh insert from a conflict-update on the
/// returned row.
pub async fn upsert_voter(
    pool: &PgPool,
    version_id: Uuid,
    row: &VoterImportRow,
    identity_no_norm: &str,
) -> Result<(Uuid, UpsertOutcome)> {
    let (id, inserted): (Uuid, bool) = sqlx::query_as(
        r#"
        INSERT INTO voters (version_id, identity_no, identity_no_norm, name, address, locality,
                            postcode, parliament, dun, district, polling_station)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (version_id, identity_no_norm) DO UPDATE
        SET identity_no = EXCLUDED.identity_no,
            name = EXCLUDED.name,
            address = EXCLUDED.address,
            locality = EXCLUDED.locality,
            postcode = EXCLUDED.postcode,
            parliament = EXCLUDED.parliament,
            dun = EXCLUDED.dun,
            district = EXCLUDED.district,
            polling_station = EXCLUDED.polling_station,
            updated_at = NOW()
        RETURNING id, (xmax = 0)
        "#,
    )
    .bind(version_id)
    .bind(&row.identity_no)
    .bind(identity_no_norm)
    .bind(&row.name)
    .bind(&row.address)
    .bind(&row.locality)
    .bind(&row.postcode)
    .bind(&row.parliament)
    .bind(&row.dun)
    .bind(&row.district)
    .bind(&row.polling_station)
    .fetch_one(pool)
    .await?;

    let outcome = if inserted {
        UpsertOutcome::Inserted
    } else {
        UpsertOutcome::Updated
    };
    Ok((id, outcome))
}

/// Link a voter to a household member
pub async fn link_household_member(
    pool: &PgPool,
    voter_id: Uuid,
    member_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "UPDATE voters SET household_member_id = $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(member_id)
    .bind(voter_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// All (voter id, normalized identity number) pairs for a version
pub async fn identity_pairs_for_version(
    pool: &PgPool,
    version_id: Uuid,
) -> Result<Vec<(Uuid, String)>> {
    let pairs: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT id, identity_no_norm FROM voters WHERE version_id = $1",
    )
    .bind(version_id)
    .fetch_all(pool)
    .await?;
    Ok(pairs)
}

/// Count voters still awaiting geocoding for a version
pub async fn count_pending_geocode(pool: &PgPool, version_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM voters WHERE version_id = $1 AND geocode_status = 'pending'",
    )
    .bind(version_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Voters pending geocoding for a version, oldest first
pub async fn pending_geocode_batch(
    pool: &PgPool,
    version_id: Uuid,
    limit: i64,
) -> Result<Vec<Voter>> {
    let voters: Vec<Voter> = sqlx::query_as(
        r#"
        SELECT id, version_id, identity_no, identity_no_norm, name, address, locality,
               postcode, parliament, dun, district, polling_station, lat, lng,
               geocode_status, household_member_id, created_at, updated_at
        FROM voters
        WHERE version_id = $1 AND geocode_status = 'pending'
        ORDER BY created_at
        LIMIT $2
        "#,
    )
    .bind(version_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(voters)
}

/// Write geocoded coordinates for a voter
pub async fn set_coordinates(pool: &PgPool, voter_id: Uuid, lat: f64, lng: f64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE voters
        SET lat = $1, lng = $2, geocode_status = 'success', updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(lat)
    .bind(lng)
    .bind(voter_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark a voter's geocode attempt as failed or skipped
pub async fn set_geocode_status(
    pool: &PgPool,
    voter_id: Uuid,
    status: VoterGeocodeStatus,
) -> Result<()> {
    sqlx::query(
        "UPDATE voters SET geocode_status = $1, updated_at = NOW() WHERE id = $2",
    )
    .bind(status.as_str())
    .bind(voter_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// All voters of a version for export, in import order
pub async fn voters_for_export(pool: &PgPool, version_id: Uuid) -> Result<Vec<Voter>> {
    let voters: Vec<Voter> = sqlx::query_as(
        r#"
        SELECT id, version_id, identity_no, identity_no_norm, name, address, locality,
               postcode, parliament, dun, district, polling_station, lat, lng,
               geocode_status, household_member_id, created_at, updated_at
        FROM voters
        WHERE version_id = $1
        ORDER BY created_at
        "#,
    )
    .bind(version_id)
    .fetch_all(pool)
    .await?;
    Ok(voters)
}

// =============================================================================
// SPR-DERIVED POPULATION SOURCES
// =============================================================================

/// Distinct non-empty parliament strings for a version
pub async fn distinct_parliaments(pool: &PgPool, version_id: Uuid) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT parliament FROM voters
        WHERE version_id = $1 AND parliament IS NOT NULL AND parliament <> ''
        "#,
    )
    .bind(version_id)
    .fetch_all(pool)
    .await?;
    Ok(names)
}

/// Distinct (dun, parliament) pairs for a version
pub async fn distinct_dun_pairs(
    pool: &PgPool,
    version_id: Uuid,
) -> Result<Vec<(String, Option<String>)>> {
    let pairs: Vec<(String, Option<String>)> = sqlx::query_as(
        r#"
        SELECT DISTINCT dun, parliament FROM voters
        WHERE version_id = $1 AND dun IS NOT NULL AND dun <> ''
        "#,
    )
    .bind(version_id)
    .fetch_all(pool)
    .await?;
    Ok(pairs)
}

/// Distinct non-empty district names for a version
pub async fn distinct_districts(pool: &PgPool, version_id: Uuid) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT district FROM voters
        WHERE version_id = $1 AND district IS NOT NULL AND district <> ''
        "#,
    )
    .bind(version_id)
    .fetch_all(pool)
    .await?;
    Ok(names)
}

/// Distinct (locality, parliament, dun, district) tuples for a version
pub async fn distinct_locality_tuples(
    pool: &PgPool,
    version_id: Uuid,
) -> Result<Vec<(String, Option<String>, Option<String>, Option<String>)>> {
    let tuples = sqlx::query_as(
        r#"
        SELECT DISTINCT locality, parliament, dun, district FROM voters
        WHERE version_id = $1 AND locality IS NOT NULL AND locality <> ''
        "#,
    )
    .bind(version_id)
    .fetch_all(pool)
    .await?;
    Ok(tuples)
}

/// Distinct (polling_station, locality) pairs for a version
pub async fn distinct_station_pairs(
    pool: &PgPool,
    version_id: Uuid,
) -> Result<Vec<(String, Option<String>)>> {
    let pairs: Vec<(String, Option<String>)> = sqlx::query_as(
        r#"
        SELECT DISTINCT polling_station, locality FROM voters
        WHERE version_id = $1 AND polling_station IS NOT NULL AND polling_station <> ''
        "#,
    )
    .bind(version_id)
    .fetch_all(pool)
    .await?;
    Ok(pairs)
}
