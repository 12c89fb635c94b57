//! Geocode job runner
//!
//! Consumes queued job ids from JetStream and works through a version's
//! voters. Job state lives in the `geocode_jobs` table; this runner owns
//! the running -> {paused, completed, failed} transitions and persists
//! progress as it goes. A paused job keeps its counters; resume re-queues
//! the job id and the runner continues with whatever is still pending.

use std::sync::Arc;

use anyhow::Result;
use async_nats::jetstream::{self, Context as JsContext};
use async_nats::Client;
use futures::StreamExt;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::queries;
use crate::services::geocoding::Geocoder;
use crate::services::job_history::JOB_HISTORY;
use crate::services::pause::PAUSE;
use crate::types::{
    GeocodeJob, GeocodeJobProgress, GeocodeJobState, GeocodeJobStatusUpdate, QueuedGeocodeJob,
    VoterGeocodeStatus,
};

// Stream and consumer names
const STREAM_NAME: &str = "ADUN_GEOCODE_JOBS";
const CONSUMER_NAME: &str = "geocode_workers";
const SUBJECT_JOBS: &str = "adun.jobs.geocode";
const SUBJECT_STATUS_PREFIX: &str = "adun.job.geocode.status";

/// Voters fetched per database round trip
const BATCH_SIZE: i64 = 100;

/// The runner re-reads the job row every this many voters, so a pause
/// issued on another worker instance is still honoured.
const DB_STATUS_CHECK_INTERVAL: u32 = 25;

/// Geocode job runner with JetStream integration
pub struct GeocodeRunner {
    client: Client,
    js: JsContext,
    pool: PgPool,
    geocoder: Arc<dyn Geocoder>,
}

impl GeocodeRunner {
    /// Create a new runner, initializing the JetStream stream
    pub async fn new(client: Client, pool: PgPool, geocoder: Arc<dyn Geocoder>) -> Result<Self> {
        let js = jetstream::new(client.clone());

        let stream_config = jetstream::stream::Config {
            name: STREAM_NAME.to_string(),
            subjects: vec![SUBJECT_JOBS.to_string()],
            max_messages: 1_000,
            max_bytes: 10 * 1024 * 1024, // 10 MB
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };

        js.get_or_create_stream(stream_config).await?;
        info!("JetStream geocode stream '{}' ready", STREAM_NAME);

        Ok(Self {
            client,
            js,
            pool,
            geocoder,
        })
    }

    /// Queue a job id for processing (used by both start and resume)
    pub async fn enqueue(&self, job_id: Uuid, version_id: Uuid) -> Result<()> {
        let queued = QueuedGeocodeJob::new(job_id, version_id);
        let payload = serde_json::to_vec(&queued)?;
        self.js.publish(SUBJECT_JOBS, payload.into()).await?.await?;
        info!("Geocode job {} queued for version {}", job_id, version_id);
        Ok(())
    }

    /// Publish a push status update for a job
    pub async fn publish_status(&self, update: GeocodeJobStatusUpdate) -> Result<()> {
        let subject = format!("{}.{}", SUBJECT_STATUS_PREFIX, update.job_id);
        let payload = serde_json::to_vec(&update)?;
        self.client.publish(subject, payload.into()).await?;
        Ok(())
    }

    /// Start consuming geocode jobs from the queue
    pub async fn start_processing(self: Arc<Self>) -> Result<()> {
        let stream = self.js.get_stream(STREAM_NAME).await?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(CONSUMER_NAME.to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            max_deliver: 3,
            ..Default::default()
        };

        let consumer = stream.get_or_create_consumer(CONSUMER_NAME, consumer_config).await?;
        info!("JetStream geocode consumer '{}' ready", CONSUMER_NAME);

        let mut messages = consumer.messages().await?;

        while let Some(msg) = messages.next().await {
            match msg {
                Ok(msg) => {
                    // Jobs run sequentially to respect the geocoder rate limit
                    if let Err(e) = self.process_job(msg).await {
                        error!("Failed to process geocode job: {}", e);
                    }
                }
                Err(e) => {
                    error!("Error receiving geocode message: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Process one queued job id
    async fn process_job(&self, msg: jetstream::Message) -> Result<()> {
        let queued: QueuedGeocodeJob = serde_json::from_slice(&msg.payload)?;
        let job_id = queued.job_id;

        // ACK immediately - a long job must not be redelivered mid-run
        if let Err(e) = msg.ack().await {
            error!("Failed to ack geocode job {}: {:?}", job_id, e);
        }

        let job = match queries::geocode_job::get(&self.pool, job_id).await? {
            Some(job) => job,
            None => {
                warn!("Geocode job {} not found, skipping", job_id);
                return Ok(());
            }
        };

        let _guard = PAUSE.register(job_id);

        if !queries::geocode_job::mark_running(&self.pool, job_id).await? {
            // Already terminal or picked up elsewhere
            info!("Geocode job {} not startable (status '{}'), skipping", job_id, job.status);
            return Ok(());
        }

        let started_at = queued.submitted_at;
        info!(
            "Geocode job {} running for version {} ({} voters total, {} already processed)",
            job_id, job.version_id, job.total_voters, job.processed_voters
        );

        match self.run_job(&job).await {
            Ok(JobOutcome::Completed(progress)) => {
                queries::geocode_job::complete(&self.pool, job_id).await?;
                self.publish_status(GeocodeJobStatusUpdate::new(
                    job_id,
                    GeocodeJobState::Completed,
                    progress,
                ))
                .await?;
                JOB_HISTORY.record_completed(
                    job_id,
                    "geocode",
                    started_at,
                    Some(format!("{}/{} geocoded", progress.geocoded, progress.total)),
                );
                info!(
                    "Geocode job {} completed: {}/{} geocoded, {} failed, {} skipped",
                    job_id, progress.geocoded, progress.total, progress.failed, progress.skipped
                );
            }
            Ok(JobOutcome::Paused(progress)) => {
                // The pause handler already flipped the row; just report.
                self.publish_status(GeocodeJobStatusUpdate::new(
                    job_id,
                    GeocodeJobState::Paused,
                    progress,
                ))
                .await?;
                info!(
                    "Geocode job {} paused at {}/{} voters",
                    job_id, progress.processed, progress.total
                );
            }
            Err(e) => {
                let message = e.to_string();
                queries::geocode_job::fail(&self.pool, job_id, &message).await?;
                let progress = self.current_progress(job_id).await;
                self.publish_status(GeocodeJobStatusUpdate::failed(job_id, progress, message.clone()))
                    .await?;
                JOB_HISTORY.record_failed(job_id, "geocode", started_at, message);
            }
        }

        Ok(())
    }

    /// Work through pending voters until done or paused
    async fn run_job(&self, job: &GeocodeJob) -> Result<JobOutcome> {
        let job_id = job.id;
        let total = job.total_voters as u32;

        // Resume keeps whatever the paused run already counted
        let mut progress = GeocodeJobProgress {
            processed: job.processed_voters as u32,
            total,
            geocoded: job.geocoded_count as u32,
            failed: job.failed_count as u32,
            skipped: job.skipped_count as u32,
        };

        let mut since_db_check = 0u32;

        loop {
            let batch =
                queries::voter::pending_geocode_batch(&self.pool, job.version_id, BATCH_SIZE).await?;
            if batch.is_empty() {
                break;
            }

            for voter in &batch {
                if PAUSE.is_paused(&job_id) {
                    queries::geocode_job::record_progress(&self.pool, job_id, progress).await?;
                    return Ok(JobOutcome::Paused(progress));
                }

                since_db_check += 1;
                if since_db_check >= DB_STATUS_CHECK_INTERVAL {
                    since_db_check = 0;
                    if let Some(status) = queries::geocode_job::current_status(&self.pool, job_id).await? {
                        if status == "paused" {
                            queries::geocode_job::record_progress(&self.pool, job_id, progress).await?;
                            return Ok(JobOutcome::Paused(progress));
                        }
                    }
                }

                self.geocode_voter(voter, &mut progress).await?;
                progress.processed += 1;

                if progress.processed % 10 == 0 || progress.processed == total {
                    queries::geocode_job::record_progress(&self.pool, job_id, progress).await?;
                    self.publish_status(GeocodeJobStatusUpdate::new(
                        job_id,
                        GeocodeJobState::Running,
                        progress,
                    ))
                    .await?;
                }
            }
        }

        queries::geocode_job::record_progress(&self.pool, job_id, progress).await?;
        Ok(JobOutcome::Completed(progress))
    }

    /// Geocode one voter row, updating its status and the counters
    async fn geocode_voter(
        &self,
        voter: &crate::types::Voter,
        progress: &mut GeocodeJobProgress,
    ) -> Result<()> {
        let address = voter.address.as_deref().unwrap_or("").trim().to_string();
        if address.is_empty() {
            // No address data to resolve
            queries::voter::set_geocode_status(&self.pool, voter.id, VoterGeocodeStatus::Skipped)
                .await?;
            progress.skipped += 1;
            return Ok(());
        }

        let locality = voter.locality.as_deref().unwrap_or("");
        let postcode = voter.postcode.as_deref().unwrap_or("");

        match self.geocoder.geocode(&address, locality, postcode).await {
            Ok(Some(result)) => {
                queries::voter::set_coordinates(
                    &self.pool,
                    voter.id,
                    result.coordinates.lat,
                    result.coordinates.lng,
                )
                .await?;
                progress.geocoded += 1;
            }
            Ok(None) => {
                queries::voter::set_geocode_status(&self.pool, voter.id, VoterGeocodeStatus::Failed)
                    .await?;
                progress.failed += 1;
            }
            Err(e) => {
                warn!("Geocoding voter {} failed: {}", voter.id, e);
                queries::voter::set_geocode_status(&self.pool, voter.id, VoterGeocodeStatus::Failed)
                    .await?;
                progress.failed += 1;
            }
        }

        Ok(())
    }

    async fn current_progress(&self, job_id: Uuid) -> GeocodeJobProgress {
        match queries::geocode_job::get(&self.pool, job_id).await {
            Ok(Some(job)) => GeocodeJobProgress {
                processed: job.processed_voters as u32,
                total: job.total_voters as u32,
                geocoded: job.geocoded_count as u32,
                failed: job.failed_count as u32,
                skipped: job.skipped_count as u32,
            },
            _ => GeocodeJobProgress::default(),
        }
    }
}

enum JobOutcome {
    Completed(GeocodeJobProgress),
    Paused(GeocodeJobProgress),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_values() {
        assert_eq!(STREAM_NAME, "ADUN_GEOCODE_JOBS");
        assert_eq!(SUBJECT_JOBS, "adun.jobs.geocode");
        assert!(SUBJECT_STATUS_PREFIX.starts_with("adun.job.geocode.status"));
    }
}
