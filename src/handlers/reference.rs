//! Reference-data handlers
//!
//! Three operations over the closed reference-table set:
//! - CSV import with foreign-key resolution against in-memory name maps
//! - SPR-derived population from a voter-list version
//! - CSV export with a fixed header per table type

use std::collections::HashMap;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::queries;
use crate::services::chunker::cap_errors;
use crate::services::job_history::JOB_HISTORY;
use crate::services::spr::{self, CandidateRow};
use crate::types::{
    ErrorResponse, PopulateRequest, PopulateSummary, ReferenceImportSummary, ReferenceTable,
    Request, SuccessResponse,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImportRequest {
    pub table: ReferenceTable,
    pub csv_content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceExportRequest {
    pub table: ReferenceTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceExportResponse {
    pub filename: String,
    pub csv_content: String,
    pub row_count: u32,
}

// =============================================================================
// CSV IMPORT
// =============================================================================

/// Handle reference.import - bulk-create rows from an uploaded CSV
pub async fn handle_import(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<ReferenceImportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse reference import request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        if request.user_id.is_none() {
            let error = ErrorResponse::new(
                request.id,
                "ACCESS_DENIED",
                "Access denied: authenticated user required",
            );
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        let table = request.payload.table;
        match import_csv(&pool, table, &request.payload.csv_content).await {
            Ok(summary) => {
                info!(
                    "Reference import into {}: {} added, {} skipped, {} errors",
                    table.as_str(),
                    summary.added,
                    summary.skipped,
                    summary.errors.len()
                );
                let success = SuccessResponse::new(request.id, summary);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(ImportCsvError::Validation(message)) => {
                let error = ErrorResponse::new(request.id, "VALIDATION_ERROR", message);
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
            Err(ImportCsvError::Database(e)) => {
                error!("Reference import failed: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

enum ImportCsvError {
    Validation(String),
    Database(anyhow::Error),
}

impl From<anyhow::Error> for ImportCsvError {
    fn from(e: anyhow::Error) -> Self {
        ImportCsvError::Database(e)
    }
}

/// Column-index map built from the CSV header, keyed by uppercase name
fn header_map(headers: &csv::StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim().to_uppercase(), idx))
        .collect()
}

fn field_at(record: &csv::StringRecord, idx: Option<&usize>) -> Option<String> {
    idx.and_then(|i| record.get(*i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

async fn import_csv(
    pool: &PgPool,
    table: ReferenceTable,
    csv_content: &str,
) -> std::result::Result<ReferenceImportSummary, ImportCsvError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ImportCsvError::Validation(format!("CSV parse error: {}", e)))?
        .clone();
    let columns = header_map(&headers);

    let name_idx = *columns
        .get("NAME")
        .ok_or_else(|| ImportCsvError::Validation("required column 'Name' missing".to_string()))?;
    let code_idx = columns.get("CODE").copied();
    let description_idx = columns.get("DESCRIPTION").copied();

    // One bulk read per referenced table resolves every foreign key in memory
    let mut parent_maps: HashMap<&'static str, HashMap<String, Uuid>> = HashMap::new();
    for parent in table.parent_columns() {
        let parent_table = match *parent {
            "Parliament" => ReferenceTable::Parliaments,
            "DUN" => ReferenceTable::Duns,
            "District" => ReferenceTable::Districts,
            "Locality" => ReferenceTable::Localities,
            "Zone" => ReferenceTable::Zones,
            "Cawangan" => ReferenceTable::Cawangan,
            _ => continue,
        };
        let map = queries::reference::name_map(pool, parent_table)
            .await
            .map_err(ImportCsvError::Database)?;
        parent_maps.insert(*parent, map);
    }

    let mut existing_names = queries::reference::name_map(pool, table)
        .await
        .map_err(ImportCsvError::Database)?;

    let mut added = 0u32;
    let mut skipped = 0u32;
    let mut errors: Vec<String> = Vec::new();

    for (idx, result) in reader.records().enumerate() {
        let row_number = idx + 2; // header + 1-based

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                errors.push(format!("row {}: {}", row_number, e));
                continue;
            }
        };

        let name = match field_at(&record, Some(&name_idx)) {
            Some(name) => name,
            None => {
                errors.push(format!("row {}: missing name", row_number));
                continue;
            }
        };

        if existing_names.contains_key(&name.to_uppercase()) {
            skipped += 1;
            errors.push(format!("row {}: '{}' already exists", row_number, name));
            continue;
        }

        let code = field_at(&record, code_idx.as_ref());
        let description = field_at(&record, description_idx.as_ref());

        // Resolve parents; a missing referenced name is a row error
        let mut parents: HashMap<&'static str, Option<Uuid>> = HashMap::new();
        let mut parent_failed = false;
        for parent in table.parent_columns() {
            let raw = field_at(&record, columns.get(&parent.to_uppercase()));
            match raw {
                Some(value) => {
                    let resolved = parent_maps
                        .get(parent)
                        .and_then(|m| m.get(&value.to_uppercase()))
                        .copied();
                    match resolved {
                        Some(id) => {
                            parents.insert(*parent, Some(id));
                        }
                        None => {
                            errors.push(format!(
                                "row {}: {} '{}' not found",
                                row_number, parent, value
                            ));
                            parent_failed = true;
                            break;
                        }
                    }
                }
                None => {
                    parents.insert(*parent, None);
                }
            }
        }
        if parent_failed {
            continue;
        }

        let insert_result = insert_reference_row(
            pool,
            table,
            &name,
            code.as_deref(),
            description.as_deref(),
            &parents,
        )
        .await;

        match insert_result {
            Ok(id) => {
                existing_names.insert(name.to_uppercase(), id);
                added += 1;
            }
            Err(e) => {
                errors.push(format!("row {}: {}", row_number, e));
            }
        }
    }

    Ok(ReferenceImportSummary {
        added,
        skipped,
        errors: cap_errors(errors),
    })
}

async fn insert_reference_row(
    pool: &PgPool,
    table: ReferenceTable,
    name: &str,
    code: Option<&str>,
    description: Option<&str>,
    parents: &HashMap<&'static str, Option<Uuid>>,
) -> Result<Uuid> {
    let parent = |key: &str| parents.get(key).copied().flatten();

    match table {
        ReferenceTable::Localities => {
            queries::reference::insert_locality(
                pool,
                name,
                code,
                description,
                parent("Parliament"),
                parent("DUN"),
                parent("District"),
            )
            .await
        }
        ReferenceTable::PollingStations => {
            queries::reference::insert_polling_station(pool, name, code, parent("Locality")).await
        }
        ReferenceTable::Duns => {
            queries::reference::insert_dun(pool, name, code, parent("Parliament")).await
        }
        ReferenceTable::Cawangan => {
            queries::reference::insert_cawangan(pool, name, code, parent("Zone")).await
        }
        ReferenceTable::Villages => {
            queries::reference::insert_village(pool, name, code, parent("Cawangan")).await
        }
        _ => queries::reference::insert_simple(pool, table, name, code).await,
    }
}

// =============================================================================
// SPR-DERIVED POPULATION
// =============================================================================

/// Handle reference.populate - derive reference rows from a voter version
pub async fn handle_populate(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<PopulateRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse populate request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        if request.user_id.is_none() {
            let error = ErrorResponse::new(
                request.id,
                "ACCESS_DENIED",
                "Access denied: authenticated user required",
            );
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        let table = request.payload.table;
        let version_id = request.payload.version_id;
        let started_at = Utc::now();

        match populate_from_voters(&pool, table, version_id).await {
            Ok(summary) => {
                info!(
                    "Populated {} from version {}: {} added, {} skipped",
                    table.as_str(),
                    version_id,
                    summary.added,
                    summary.skipped
                );
                JOB_HISTORY.record_completed(
                    request.id,
                    "reference.populate",
                    started_at,
                    Some(format!("{}: {} added", table.as_str(), summary.added)),
                );
                let success = SuccessResponse::new(request.id, summary);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(PopulateError::Unsupported) => {
                let error = ErrorResponse::new(
                    request.id,
                    "POPULATE_UNSUPPORTED",
                    format!("Table '{}' cannot be derived from voter data", table.as_str()),
                );
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
            Err(PopulateError::Database(e)) => {
                error!("Populate failed: {}", e);
                JOB_HISTORY.record_failed(request.id, "reference.populate", started_at, e.to_string());
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

enum PopulateError {
    Unsupported,
    Database(anyhow::Error),
}

impl From<anyhow::Error> for PopulateError {
    fn from(e: anyhow::Error) -> Self {
        PopulateError::Database(e)
    }
}

async fn populate_from_voters(
    pool: &PgPool,
    table: ReferenceTable,
    version_id: Uuid,
) -> std::result::Result<PopulateSummary, PopulateError> {
    match table {
        ReferenceTable::Parliaments => populate_parliaments(pool, version_id).await,
        ReferenceTable::Duns => populate_duns(pool, version_id).await,
        ReferenceTable::Districts => populate_districts(pool, version_id).await,
        ReferenceTable::Localities => populate_localities(pool, version_id).await,
        ReferenceTable::PollingStations => populate_stations(pool, version_id).await,
        _ => Err(PopulateError::Unsupported),
    }
}

async fn populate_parliaments(
    pool: &PgPool,
    version_id: Uuid,
) -> std::result::Result<PopulateSummary, PopulateError> {
    let raw = queries::voter::distinct_parliaments(pool, version_id).await?;
    let candidates: Vec<CandidateRow> = raw.iter().map(|s| spr::split_code_name(s)).collect();

    let names = queries::reference::name_map(pool, ReferenceTable::Parliaments).await?;
    let codes = queries::reference::code_set(pool, ReferenceTable::Parliaments).await?;
    let (to_insert, skipped) = spr::plan_inserts(candidates, &names, &codes);

    let mut added = 0u32;
    let mut errors = Vec::new();
    for candidate in to_insert {
        match queries::reference::insert_simple(
            pool,
            ReferenceTable::Parliaments,
            &candidate.name,
            candidate.code.as_deref(),
        )
        .await
        {
            Ok(_) => added += 1,
            Err(e) => errors.push(format!("{}: {}", candidate.name, e)),
        }
    }

    Ok(PopulateSummary { added, skipped, errors: cap_errors(errors) })
}

async fn populate_duns(
    pool: &PgPool,
    version_id: Uuid,
) -> std::result::Result<PopulateSummary, PopulateError> {
    let pairs = queries::voter::distinct_dun_pairs(pool, version_id).await?;
    let parliament_names = queries::reference::name_map(pool, ReferenceTable::Parliaments).await?;

    let names = queries::reference::name_map(pool, ReferenceTable::Duns).await?;
    let codes = queries::reference::code_set(pool, ReferenceTable::Duns).await?;

    // Keep the parliament link alongside each candidate for after planning
    let mut parliament_by_dun: HashMap<String, Option<Uuid>> = HashMap::new();
    let mut candidates = Vec::new();
    let mut errors = Vec::new();

    for (dun_raw, parliament_raw) in &pairs {
        let candidate = spr::split_code_name(dun_raw);
        let parliament_id = match parliament_raw {
            Some(raw) => {
                let parliament = spr::split_code_name(raw);
                match parliament_names.get(&parliament.name.to_uppercase()) {
                    Some(id) => Some(*id),
                    None => {
                        errors.push(format!(
                            "{}: parliament '{}' not found",
                            candidate.name, parliament.name
                        ));
                        None
                    }
                }
            }
            None => None,
        };
        parliament_by_dun.insert(candidate.name.to_uppercase(), parliament_id);
        candidates.push(candidate);
    }

    let (to_insert, skipped) = spr::plan_inserts(candidates, &names, &codes);

    let mut added = 0u32;
    for candidate in to_insert {
        let parliament_id = parliament_by_dun
            .get(&candidate.name.to_uppercase())
            .copied()
            .flatten();
        match queries::reference::insert_dun(
            pool,
            &candidate.name,
            candidate.code.as_deref(),
            parliament_id,
        )
        .await
        {
            Ok(_) => added += 1,
            Err(e) => errors.push(format!("{}: {}", candidate.name, e)),
        }
    }

    Ok(PopulateSummary { added, skipped, errors: cap_errors(errors) })
}

async fn populate_districts(
    pool: &PgPool,
    version_id: Uuid,
) -> std::result::Result<PopulateSummary, PopulateError> {
    let raw = queries::voter::distinct_districts(pool, version_id).await?;
    let candidates: Vec<CandidateRow> = raw
        .iter()
        .map(|s| CandidateRow { name: s.trim().to_string(), code: None })
        .collect();

    let names = queries::reference::name_map(pool, ReferenceTable::Districts).await?;
    let codes = queries::reference::code_set(pool, ReferenceTable::Districts).await?;
    let (to_insert, skipped) = spr::plan_inserts(candidates, &names, &codes);

    let mut added = 0u32;
    let mut errors = Vec::new();
    for candidate in to_insert {
        match queries::reference::insert_simple(
            pool,
            ReferenceTable::Districts,
            &candidate.name,
            None,
        )
        .await
        {
            Ok(_) => added += 1,
            Err(e) => errors.push(format!("{}: {}", candidate.name, e)),
        }
    }

    Ok(PopulateSummary { added, skipped, errors: cap_errors(errors) })
}

async fn populate_localities(
    pool: &PgPool,
    version_id: Uuid,
) -> std::result::Result<PopulateSummary, PopulateError> {
    let tuples = queries::voter::distinct_locality_tuples(pool, version_id).await?;

    let parliament_names = queries::reference::name_map(pool, ReferenceTable::Parliaments).await?;
    let dun_names = queries::reference::name_map(pool, ReferenceTable::Duns).await?;
    let district_names = queries::reference::name_map(pool, ReferenceTable::Districts).await?;

    let names = queries::reference::name_map(pool, ReferenceTable::Localities).await?;
    let codes = queries::reference::code_set(pool, ReferenceTable::Localities).await?;

    let mut parents_by_locality: HashMap<String, (Option<Uuid>, Option<Uuid>, Option<Uuid>)> =
        HashMap::new();
    let mut candidates = Vec::new();
    let mut errors = Vec::new();

    let resolve = |map: &HashMap<String, Uuid>, raw: &Option<String>| -> Option<Uuid> {
        raw.as_deref()
            .map(|s| spr::split_code_name(s).name.to_uppercase())
            .and_then(|name| map.get(&name).copied())
    };

    for (locality_raw, parliament_raw, dun_raw, district_raw) in &tuples {
        let candidate = spr::split_code_name(locality_raw);
        let parliament_id = resolve(&parliament_names, parliament_raw);
        let dun_id = resolve(&dun_names, dun_raw);
        let district_id = resolve(&district_names, district_raw);

        if parliament_raw.is_some() && parliament_id.is_none() {
            errors.push(format!(
                "{}: parliament '{}' not found",
                candidate.name,
                parliament_raw.as_deref().unwrap_or_default()
            ));
        }

        parents_by_locality.insert(
            candidate.name.to_uppercase(),
            (parliament_id, dun_id, district_id),
        );
        candidates.push(candidate);
    }

    let (to_insert, skipped) = spr::plan_inserts(candidates, &names, &codes);

    let mut added = 0u32;
    for candidate in to_insert {
        let (parliament_id, dun_id, district_id) = parents_by_locality
            .get(&candidate.name.to_uppercase())
            .copied()
            .unwrap_or((None, None, None));
        match queries::reference::insert_locality(
            pool,
            &candidate.name,
            candidate.code.as_deref(),
            None,
            parliament_id,
            dun_id,
            district_id,
        )
        .await
        {
            Ok(_) => added += 1,
            Err(e) => errors.push(format!("{}: {}", candidate.name, e)),
        }
    }

    Ok(PopulateSummary { added, skipped, errors: cap_errors(errors) })
}

async fn populate_stations(
    pool: &PgPool,
    version_id: Uuid,
) -> std::result::Result<PopulateSummary, PopulateError> {
    let pairs = queries::voter::distinct_station_pairs(pool, version_id).await?;
    let locality_names = queries::reference::name_map(pool, ReferenceTable::Localities).await?;

    let names = queries::reference::name_map(pool, ReferenceTable::PollingStations).await?;
    let codes = queries::reference::code_set(pool, ReferenceTable::PollingStations).await?;

    let mut locality_by_station: HashMap<String, Option<Uuid>> = HashMap::new();
    let mut candidates = Vec::new();
    let mut errors = Vec::new();

    for (station_raw, locality_raw) in &pairs {
        let candidate = spr::split_code_name(station_raw);
        let locality_id = locality_raw
            .as_deref()
            .map(|s| spr::split_code_name(s).name.to_uppercase())
            .and_then(|name| locality_names.get(&name).copied());

        if locality_raw.is_some() && locality_id.is_none() {
            errors.push(format!(
                "{}: locality '{}' not found",
                candidate.name,
                locality_raw.as_deref().unwrap_or_default()
            ));
        }

        locality_by_station.insert(candidate.name.to_uppercase(), locality_id);
        candidates.push(candidate);
    }

    let (to_insert, skipped) = spr::plan_inserts(candidates, &names, &codes);

    let mut added = 0u32;
    for candidate in to_insert {
        let locality_id = locality_by_station
            .get(&candidate.name.to_uppercase())
            .copied()
            .flatten();
        match queries::reference::insert_polling_station(
            pool,
            &candidate.name,
            candidate.code.as_deref(),
            locality_id,
        )
        .await
        {
            Ok(_) => added += 1,
            Err(e) => errors.push(format!("{}: {}", candidate.name, e)),
        }
    }

    Ok(PopulateSummary { added, skipped, errors: cap_errors(errors) })
}

// =============================================================================
// CSV EXPORT
// =============================================================================

/// Handle reference.export - CSV with a fixed header per table type
pub async fn handle_export(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<ReferenceExportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let table = request.payload.table;
        match export_csv(&pool, table).await {
            Ok((csv_content, row_count)) => {
                let response = ReferenceExportResponse {
                    filename: format!("{}.csv", table.as_str()),
                    csv_content,
                    row_count,
                };
                let success = SuccessResponse::new(request.id, response);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Reference export failed: {}", e);
                let error = ErrorResponse::new(request.id, "EXPORT_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Render a table as CSV. The writer doubles embedded quote characters.
pub async fn export_csv(pool: &PgPool, table: ReferenceTable) -> Result<(String, u32)> {
    let mut writer = csv::Writer::from_writer(vec![]);
    let mut row_count = 0u32;

    if table == ReferenceTable::Localities {
        writer.write_record(["Name", "Code", "Description", "IsActive", "Parliament", "DUN", "District"])?;
        for (name, code, description, is_active, parliament, dun, district) in
            queries::reference::locality_export_rows(pool).await?
        {
            writer.write_record([
                name.as_str(),
                code.as_deref().unwrap_or(""),
                description.as_deref().unwrap_or(""),
                if is_active { "true" } else { "false" },
                parliament.as_deref().unwrap_or(""),
                dun.as_deref().unwrap_or(""),
                district.as_deref().unwrap_or(""),
            ])?;
            row_count += 1;
        }
    } else {
        writer.write_record(["Name", "Code", "IsActive"])?;
        for row in queries::reference::rows(pool, table).await? {
            writer.write_record([
                row.name.as_str(),
                row.code.as_deref().unwrap_or(""),
                if row.is_active { "true" } else { "false" },
            ])?;
            row_count += 1;
        }
    }

    let csv_content = String::from_utf8(writer.into_inner()?)?;
    Ok((csv_content, row_count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map_uppercases_and_indexes() {
        let headers = csv::StringRecord::from(vec!["Name", "Code", "Parliament"]);
        let map = header_map(&headers);
        assert_eq!(map.get("NAME"), Some(&0));
        assert_eq!(map.get("PARLIAMENT"), Some(&2));
        assert!(map.get("DUN").is_none());
    }

    #[test]
    fn test_field_at_trims_and_drops_empty() {
        let record = csv::StringRecord::from(vec!["  SEPANGGAR  ", "", "P171"]);
        assert_eq!(field_at(&record, Some(&0)), Some("SEPANGGAR".to_string()));
        assert_eq!(field_at(&record, Some(&1)), None);
        assert_eq!(field_at(&record, None), None);
    }

    #[test]
    fn test_csv_writer_doubles_internal_quotes() {
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.write_record(["Name", "Code"]).unwrap();
        writer.write_record(["KG \"BARU\" LIKAS", "L01"]).unwrap();
        let out = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(out.contains("\"KG \"\"BARU\"\" LIKAS\""));
    }
}
