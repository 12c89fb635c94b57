//! Job management handlers

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::services::job_history::JOB_HISTORY;
use crate::types::{ErrorResponse, Request, SuccessResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobHistoryRequest {
    pub limit: Option<usize>,
    pub job_type: Option<String>,
}

/// Handle jobs.history - recent job completions and failures
pub async fn handle_job_history(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<ListJobHistoryRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse job history request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let limit = request.payload.limit.unwrap_or(50);
        let history = match &request.payload.job_type {
            Some(job_type) => JOB_HISTORY.get_by_type(job_type, limit),
            None => JOB_HISTORY.get_recent(limit),
        };

        let success = SuccessResponse::new(request.id, history);
        let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
    }

    Ok(())
}
