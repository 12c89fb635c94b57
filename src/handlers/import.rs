//! Voter chunk import handler
//!
//! Receives one chunk of SPR rows at a time from the chunked import client.
//! Each row is upserted by (version, normalized identity number) and linked
//! to a household member when the identity number matches. Row-level
//! failures are collected, never raised - one bad row does not abort the
//! chunk, one bad chunk does not abort the import.

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use sqlx::PgPool;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::queries;
use crate::db::queries::voter::UpsertOutcome;
use crate::services::matcher::normalize_identity;
use crate::types::{
    ErrorResponse, Request, SuccessResponse, VoterChunkRequest, VoterChunkResponse,
};

/// Handle voter chunk submissions
pub async fn handle_voter_chunk(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received import.voters.chunk message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Chunk message without reply subject");
                continue;
            }
        };

        let request: Request<VoterChunkRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse voter chunk request: {}", e);
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

        let chunk = &request.payload;

        // Only the first chunk of an import pays for this check
        if chunk.verify_version {
            match queries::voter::version_exists(&pool, chunk.version_id).await {
                Ok(true) => {}
                Ok(false) => {
                    let error = ErrorResponse::new(
                        request.id,
                        "VERSION_NOT_FOUND",
                        format!("Voter-list version {} does not exist", chunk.version_id),
                    );
                    let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                    continue;
                }
                Err(e) => {
                    error!("Version check failed: {}", e);
                    let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                    let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                    continue;
                }
            }
        }

        let response = process_chunk(&pool, chunk).await;

        info!(
            "Voter chunk at row {}: {} imported, {} updated, {} matched, {} errors",
            chunk.start_row,
            response.imported,
            response.updated,
            response.matched,
            response.errors.len()
        );

        let success = SuccessResponse::new(request.id, response);
        let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
    }

    Ok(())
}

/// Upsert one chunk's rows and link matching household members
async fn process_chunk(pool: &PgPool, chunk: &VoterChunkRequest) -> VoterChunkResponse {
    let mut imported = 0u32;
    let mut updated = 0u32;
    let mut matched = 0u32;
    let mut errors: Vec<String> = Vec::new();

    // One bulk read resolves household links for the whole chunk
    let norms: Vec<String> = chunk
        .rows
        .iter()
        .map(|r| normalize_identity(&r.identity_no))
        .collect();
    let members = match queries::household::identity_map_for(pool, &norms).await {
        Ok(map) => map,
        Err(e) => {
            warn!("Household lookup failed, importing without matching: {}", e);
            Default::default()
        }
    };

    for (idx, row) in chunk.rows.iter().enumerate() {
        let row_number = chunk.start_row + idx as u32;

        if row.name.trim().is_empty() {
            errors.push(format!("row {}: missing name", row_number));
            continue;
        }
        if row.identity_no.trim().is_empty() {
            errors.push(format!("row {}: missing identity number", row_number));
            continue;
        }

        let norm = normalize_identity(&row.identity_no);

        let (voter_id, outcome) =
            match queries::voter::upsert_voter(pool, chunk.version_id, row, &norm).await {
                Ok(result) => result,
                Err(e) => {
                    errors.push(format!("row {}: {}", row_number, e));
                    continue;
                }
            };

        match outcome {
            UpsertOutcome::Inserted => imported += 1,
            UpsertOutcome::Updated => updated += 1,
        }

        if let Some(member_id) = members.get(&norm) {
            match queries::voter::link_household_member(pool, voter_id, *member_id).await {
                Ok(()) => matched += 1,
                Err(e) => {
                    warn!("Failed to link voter {} to member {}: {}", voter_id, member_id, e);
                }
            }
        }
    }

    VoterChunkResponse {
        imported,
        updated,
        matched,
        errors,
    }
}
