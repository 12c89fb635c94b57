//! Reference-data queries
//!
//! Table names are interpolated from the closed `ReferenceTable` enum, never
//! from the wire, so the format! calls below cannot inject.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{ReferenceRow, ReferenceTable};

/// Map of UPPERCASED name -> id for one reference table
pub async fn name_map(pool: &PgPool, table: ReferenceTable) -> Result<HashMap<String, Uuid>> {
    let rows: Vec<(String, Uuid)> = sqlx::query_as(&format!(
        "SELECT UPPER(name), id FROM {}",
        table.as_str()
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}

/// Set of UPPERCASED codes already present in one reference table
pub async fn code_set(pool: &PgPool, table: ReferenceTable) -> Result<HashSet<String>> {
    let rows: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT UPPER(code) FROM {} WHERE code IS NOT NULL",
        table.as_str()
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}

/// Insert into a table with the plain (name, code) shape
pub async fn insert_simple(
    pool: &PgPool,
    table: ReferenceTable,
    name: &str,
    code: Option<&str>,
) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(&format!(
        "INSERT INTO {} (name, code) VALUES ($1, $2) RETURNING id",
        table.as_str()
    ))
    .bind(name)
    .bind(code)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Insert a locality with its resolved parent ids
pub async fn insert_locality(
    pool: &PgPool,
    name: &str,
    code: Option<&str>,
    description: Option<&str>,
    parliament_id: Option<Uuid>,
    dun_id: Option<Uuid>,
    district_id: Option<Uuid>,
) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO localities (name, code, description, parliament_id, dun_id, district_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(code)
    .bind(description)
    .bind(parliament_id)
    .bind(dun_id)
    .bind(district_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Insert a polling station under a locality
pub async fn insert_polling_station(
    pool: &PgPool,
    name: &str,
    code: Option<&str>,
    locality_id: Option<Uuid>,
) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO polling_stations (name, code, locality_id) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(name)
    .bind(code)
    .bind(locality_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Insert a DUN under a parliament
pub async fn insert_dun(
    pool: &PgPool,
    name: &str,
    code: Option<&str>,
    parliament_id: Option<Uuid>,
) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO duns (name, code, parliament_id) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(name)
    .bind(code)
    .bind(parliament_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Insert a cawangan under a zone
pub async fn insert_cawangan(
    pool: &PgPool,
    name: &str,
    code: Option<&str>,
    zone_id: Option<Uuid>,
) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO cawangan (name, code, zone_id) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(name)
    .bind(code)
    .bind(zone_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Insert a village under a cawangan
pub async fn insert_village(
    pool: &PgPool,
    name: &str,
    code: Option<&str>,
    cawangan_id: Option<Uuid>,
) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO villages (name, code, cawangan_id) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(name)
    .bind(code)
    .bind(cawangan_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// All rows of a table in the generic export shape
pub async fn rows(pool: &PgPool, table: ReferenceTable) -> Result<Vec<ReferenceRow>> {
    let rows: Vec<ReferenceRow> = sqlx::query_as(&format!(
        "SELECT id, name, code, is_active FROM {} ORDER BY name",
        table.as_str()
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Locality export rows joined with parent names
pub async fn locality_export_rows(
    pool: &PgPool,
) -> Result<Vec<(String, Option<String>, Option<String>, bool, Option<String>, Option<String>, Option<String>)>> {
    let rows = sqlx::query_as(
        r#"
        SELECT l.name, l.code, l.description, l.is_active, p.name, d.name, di.name
        FROM localities l
        LEFT JOIN parliaments p ON p.id = l.parliament_id
        LEFT JOIN duns d ON d.id = l.dun_id
        LEFT JOIN districts di ON di.id = l.district_id
        ORDER BY l.name
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
