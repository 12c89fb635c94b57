//! Geocode job queries
//!
//! State transitions are guarded in SQL: every UPDATE carries the expected
//! current status, so a stale worker cannot resurrect a terminal job.
//! Progress writes use GREATEST so counters stay monotonic even if an
//! update is replayed.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{GeocodeJob, GeocodeJobProgress};

const JOB_COLUMNS: &str = "id, version_id, status, total_voters, processed_voters, \
     geocoded_count, failed_count, skipped_count, error_message, created_at, updated_at";

/// Create a pending job for a version.
///
/// Returns `None` when another job for this version is still pending,
/// running, or paused - the partial unique index rejects the insert.
pub async fn create(pool: &PgPool, version_id: Uuid, total_voters: i32) -> Result<Option<GeocodeJob>> {
    let job: Option<GeocodeJob> = sqlx::query_as(&format!(
        r#"
        INSERT INTO geocode_jobs (version_id, status, total_voters)
        VALUES ($1, 'pending', $2)
        ON CONFLICT (version_id) WHERE status IN ('pending', 'running', 'paused')
        DO NOTHING
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(version_id)
    .bind(total_voters)
    .fetch_optional(pool)
    .await?;
    Ok(job)
}

/// Fetch a job by id
pub async fn get(pool: &PgPool, job_id: Uuid) -> Result<Option<GeocodeJob>> {
    let job: Option<GeocodeJob> = sqlx::query_as(&format!(
        "SELECT {JOB_COLUMNS} FROM geocode_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    Ok(job)
}

/// Latest job for a version - the row clients poll
pub async fn latest_for_version(pool: &PgPool, version_id: Uuid) -> Result<Option<GeocodeJob>> {
    let job: Option<GeocodeJob> = sqlx::query_as(&format!(
        r#"
        SELECT {JOB_COLUMNS} FROM geocode_jobs
        WHERE version_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#
    ))
    .bind(version_id)
    .fetch_optional(pool)
    .await?;
    Ok(job)
}

/// pending|paused -> running. Returns false if the job was in any other
/// state (e.g. completed while queued).
pub async fn mark_running(pool: &PgPool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE geocode_jobs
        SET status = 'running', updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'paused')
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// running -> paused. Only meaningful while running.
pub async fn request_pause(pool: &PgPool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE geocode_jobs
        SET status = 'paused', updated_at = NOW()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Persist progress counters. GREATEST keeps each counter non-decreasing;
/// processed is clamped to total so rows imported mid-run cannot violate
/// the processed <= total check.
pub async fn record_progress(pool: &PgPool, job_id: Uuid, progress: GeocodeJobProgress) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE geocode_jobs
        SET processed_voters = LEAST(GREATEST(processed_voters, $2), total_voters),
            geocoded_count = GREATEST(geocoded_count, $3),
            failed_count = GREATEST(failed_count, $4),
            skipped_count = GREATEST(skipped_count, $5),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(progress.processed as i32)
    .bind(progress.geocoded as i32)
    .bind(progress.failed as i32)
    .bind(progress.skipped as i32)
    .execute(pool)
    .await?;
    Ok(())
}

/// running -> completed (terminal)
pub async fn complete(pool: &PgPool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE geocode_jobs
        SET status = 'completed', updated_at = NOW()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// running -> failed (terminal), with a human-readable message
pub async fn fail(pool: &PgPool, job_id: Uuid, error_message: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE geocode_jobs
        SET status = 'failed', error_message = $2, updated_at = NOW()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(job_id)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Current status string of a job, for the runner's periodic re-check
pub async fn current_status(pool: &PgPool, job_id: Uuid) -> Result<Option<String>> {
    let status: Option<String> = sqlx::query_scalar(
        "SELECT status FROM geocode_jobs WHERE id = $1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    Ok(status)
}
