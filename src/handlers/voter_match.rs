//! Voter-household match handler

use anyhow::Result;
use async_nats::{Client, Subscriber};
use chrono::Utc;
use futures::StreamExt;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::services::job_history::JOB_HISTORY;
use crate::services::matcher;
use crate::types::{ErrorResponse, MatchVotersRequest, Request, SuccessResponse};

/// Handle voters.match - link a version's voters to household members
pub async fn handle_match(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<MatchVotersRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse match request: {}", e);
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

        let started_at = Utc::now();
        let version_id = request.payload.version_id;

        match matcher::match_version(&pool, version_id).await {
            Ok(summary) => {
                JOB_HISTORY.record_completed(
                    request.id,
                    "voters.match",
                    started_at,
                    Some(format!("{}/{} matched", summary.matched, summary.total)),
                );
                let success = SuccessResponse::new(request.id, summary);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Match failed for version {}: {}", version_id, e);
                JOB_HISTORY.record_failed(request.id, "voters.match", started_at, e.to_string());
                let error = ErrorResponse::new(request.id, "MATCH_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}
