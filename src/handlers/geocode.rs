//! Geocode job handlers
//!
//! Start inserts the job row - the partial unique index on `geocode_jobs`
//! makes a second active job per version a typed failure, not a race - and
//! queues the id for the runner. Pause and resume flip the row with guarded
//! transitions. Latest serves the row clients poll every couple of seconds
//! until they observe completed, failed or paused.

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::queries;
use crate::services::geocode_runner::GeocodeRunner;
use crate::services::pause::PAUSE;
use crate::types::{ErrorResponse, GeocodeJob, Request, SuccessResponse};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGeocodeRequest {
    pub version_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeJobActionRequest {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestGeocodeJobRequest {
    pub version_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestGeocodeJobResponse {
    pub job: Option<GeocodeJob>,
}

/// Handle geocode.start - create and queue a job for a version
pub async fn handle_start(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    runner: Arc<GeocodeRunner>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<StartGeocodeRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse geocode start request: {}", e);
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

        let version_id = request.payload.version_id;

        let total = match queries::voter::count_pending_geocode(&pool, version_id).await {
            Ok(count) => count,
            Err(e) => {
                error!("Failed to count pending voters: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match queries::geocode_job::create(&pool, version_id, total as i32).await {
            Ok(Some(job)) => {
                if let Err(e) = runner.enqueue(job.id, version_id).await {
                    error!("Failed to queue geocode job {}: {}", job.id, e);
                    let error = ErrorResponse::new(request.id, "SUBMIT_ERROR", e.to_string());
                    let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                    continue;
                }
                info!("Geocode job {} created for version {} ({} voters)", job.id, version_id, total);
                let success = SuccessResponse::new(request.id, job);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Ok(None) => {
                let error = ErrorResponse::new(
                    request.id,
                    "JOB_ALREADY_ACTIVE",
                    format!("A geocoding job is already active for version {}", version_id),
                );
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
            Err(e) => {
                error!("Failed to create geocode job: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle geocode.pause - running -> paused
pub async fn handle_pause(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<GeocodeJobActionRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let job_id = request.payload.job_id;

        match queries::geocode_job::request_pause(&pool, job_id).await {
            Ok(true) => {
                // Trip the in-process token so the runner stops between voters
                PAUSE.request_pause(job_id);
                info!("Geocode job {} pause requested", job_id);
                match queries::geocode_job::get(&pool, job_id).await {
                    Ok(Some(job)) => {
                        let success = SuccessResponse::new(request.id, job);
                        let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
                    }
                    _ => {
                        let success = SuccessResponse::new(request.id, serde_json::json!({ "paused": true }));
                        let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
                    }
                }
            }
            Ok(false) => {
                let error = ErrorResponse::new(
                    request.id,
                    "JOB_NOT_RUNNING",
                    "Only a running job can be paused",
                );
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
            Err(e) => {
                error!("Failed to pause geocode job {}: {}", job_id, e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle geocode.resume - paused -> running, counters intact
pub async fn handle_resume(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
    runner: Arc<GeocodeRunner>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<GeocodeJobActionRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let job_id = request.payload.job_id;

        let job = match queries::geocode_job::get(&pool, job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                let error = ErrorResponse::new(request.id, "JOB_NOT_FOUND", "Geocode job not found");
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
            Err(e) => {
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        if job.status != "paused" {
            let error = ErrorResponse::new(
                request.id,
                "JOB_NOT_PAUSED",
                "Only a paused job can be resumed",
            );
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        // Drop any stale pause token, then hand the job back to the runner.
        // The runner's pending-voter query naturally continues where the
        // paused run stopped.
        PAUSE.clear(&job_id);
        match runner.enqueue(job_id, job.version_id).await {
            Ok(()) => {
                info!("Geocode job {} resumed", job_id);
                let success = SuccessResponse::new(request.id, job);
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Failed to re-queue geocode job {}: {}", job_id, e);
                let error = ErrorResponse::new(request.id, "SUBMIT_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle geocode.latest - the row clients poll for progress
pub async fn handle_latest(
    client: Client,
    mut subscriber: Subscriber,
    pool: PgPool,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        let reply = match msg.reply {
            Some(ref r) => r.clone(),
            None => continue,
        };

        let request: Request<LatestGeocodeJobRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match queries::geocode_job::latest_for_version(&pool, request.payload.version_id).await {
            Ok(job) => {
                let success = SuccessResponse::new(request.id, LatestGeocodeJobResponse { job });
                let _ = client.publish(reply, serde_json::to_vec(&success)?.into()).await;
            }
            Err(e) => {
                error!("Failed to fetch latest geocode job: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}
