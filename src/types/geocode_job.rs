//! Geocode job types
//!
//! A geocode job resolves addresses to coordinates for one voter-list
//! version. Its state lives in the `geocode_jobs` table; the worker queues
//! job ids on JetStream and publishes progress updates while clients poll
//! the latest job row for a version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================================================
// Tests First (TDD)
// ==========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parses_and_prints_roundtrip() {
        for state in [
            GeocodeJobState::Pending,
            GeocodeJobState::Running,
            GeocodeJobState::Paused,
            GeocodeJobState::Completed,
            GeocodeJobState::Failed,
        ] {
            assert_eq!(GeocodeJobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(GeocodeJobState::parse("cancelled"), None);
    }

    #[test]
    fn test_pending_can_only_start_running() {
        assert!(GeocodeJobState::Pending.can_transition(GeocodeJobState::Running));
        assert!(!GeocodeJobState::Pending.can_transition(GeocodeJobState::Paused));
        assert!(!GeocodeJobState::Pending.can_transition(GeocodeJobState::Completed));
    }

    #[test]
    fn test_running_can_pause_complete_or_fail() {
        assert!(GeocodeJobState::Running.can_transition(GeocodeJobState::Paused));
        assert!(GeocodeJobState::Running.can_transition(GeocodeJobState::Completed));
        assert!(GeocodeJobState::Running.can_transition(GeocodeJobState::Failed));
        assert!(!GeocodeJobState::Running.can_transition(GeocodeJobState::Pending));
    }

    #[test]
    fn test_paused_resumes_to_running_only() {
        assert!(GeocodeJobState::Paused.can_transition(GeocodeJobState::Running));
        assert!(!GeocodeJobState::Paused.can_transition(GeocodeJobState::Completed));
        assert!(!GeocodeJobState::Paused.can_transition(GeocodeJobState::Failed));
    }

    #[test]
    fn test_terminal_states_have_no_transitions() {
        for terminal in [GeocodeJobState::Completed, GeocodeJobState::Failed] {
            assert!(terminal.is_terminal());
            for next in [
                GeocodeJobState::Pending,
                GeocodeJobState::Running,
                GeocodeJobState::Paused,
                GeocodeJobState::Completed,
                GeocodeJobState::Failed,
            ] {
                assert!(!terminal.can_transition(next));
            }
        }
    }

    #[test]
    fn test_active_covers_pending_running_paused() {
        assert!(GeocodeJobState::Pending.is_active());
        assert!(GeocodeJobState::Running.is_active());
        assert!(GeocodeJobState::Paused.is_active());
        assert!(!GeocodeJobState::Completed.is_active());
        assert!(!GeocodeJobState::Failed.is_active());
    }

    #[test]
    fn test_polling_stops_on_terminal_or_paused() {
        // Clients poll every 2 seconds; a poll cycle ends exactly when the
        // job completes, fails, or is paused.
        assert!(GeocodeJobState::Completed.stops_polling());
        assert!(GeocodeJobState::Failed.stops_polling());
        assert!(GeocodeJobState::Paused.stops_polling());
        assert!(!GeocodeJobState::Running.stops_polling());
        assert!(!GeocodeJobState::Pending.stops_polling());
    }

    #[test]
    fn test_job_serializes_to_camel_case() {
        let job = GeocodeJob {
            id: Uuid::nil(),
            version_id: Uuid::nil(),
            status: "running".to_string(),
            total_voters: 100,
            processed_voters: 40,
            geocoded_count: 30,
            failed_count: 5,
            skipped_count: 5,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("versionId"));
        assert!(json.contains("processedVoters"));
        assert!(json.contains("skippedCount"));
        assert!(!json.contains("processed_voters"));
    }

    #[test]
    fn test_status_update_carries_job_id_and_counts() {
        let update = GeocodeJobStatusUpdate::new(
            Uuid::nil(),
            GeocodeJobState::Running,
            GeocodeJobProgress {
                processed: 10,
                total: 20,
                geocoded: 8,
                failed: 1,
                skipped: 1,
            },
        );
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("jobId"));
        assert!(json.contains("\"processed\":10"));
        assert!(json.contains("\"status\":\"running\""));
    }
}

// ==========================================================================
// Implementation
// ==========================================================================

/// Lifecycle state of a geocode job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeocodeJobState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl GeocodeJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeocodeJobState::Pending => "pending",
            GeocodeJobState::Running => "running",
            GeocodeJobState::Paused => "paused",
            GeocodeJobState::Completed => "completed",
            GeocodeJobState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(GeocodeJobState::Pending),
            "running" => Some(GeocodeJobState::Running),
            "paused" => Some(GeocodeJobState::Paused),
            "completed" => Some(GeocodeJobState::Completed),
            "failed" => Some(GeocodeJobState::Failed),
            _ => None,
        }
    }

    /// Completed and failed are terminal; paused is a suspend point.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GeocodeJobState::Completed | GeocodeJobState::Failed)
    }

    /// Active states block creation of another job for the same version.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            GeocodeJobState::Pending | GeocodeJobState::Running | GeocodeJobState::Paused
        )
    }

    /// Whether a polling client should stop after observing this state.
    pub fn stops_polling(&self) -> bool {
        self.is_terminal() || *self == GeocodeJobState::Paused
    }

    /// Legal state-machine transitions:
    /// pending -> running -> {paused, completed, failed}, paused -> running.
    pub fn can_transition(&self, next: GeocodeJobState) -> bool {
        matches!(
            (self, next),
            (GeocodeJobState::Pending, GeocodeJobState::Running)
                | (GeocodeJobState::Running, GeocodeJobState::Paused)
                | (GeocodeJobState::Running, GeocodeJobState::Completed)
                | (GeocodeJobState::Running, GeocodeJobState::Failed)
                | (GeocodeJobState::Paused, GeocodeJobState::Running)
        )
    }
}

/// A geocode job row. `status` is stored as text; use
/// [`GeocodeJob::state`] for the typed view.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeJob {
    pub id: Uuid,
    pub version_id: Uuid,
    pub status: String,
    pub total_voters: i32,
    pub processed_voters: i32,
    pub geocoded_count: i32,
    pub failed_count: i32,
    pub skipped_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GeocodeJob {
    pub fn state(&self) -> Option<GeocodeJobState> {
        GeocodeJobState::parse(&self.status)
    }
}

/// Progress counters carried by a status update
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeJobProgress {
    pub processed: u32,
    pub total: u32,
    pub geocoded: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// Push status update published to the per-job status subject
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeJobStatusUpdate {
    pub job_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: GeocodeJobState,
    pub progress: GeocodeJobProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GeocodeJobStatusUpdate {
    pub fn new(job_id: Uuid, status: GeocodeJobState, progress: GeocodeJobProgress) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            status,
            progress,
            error: None,
        }
    }

    pub fn failed(job_id: Uuid, progress: GeocodeJobProgress, error: String) -> Self {
        Self {
            job_id,
            timestamp: Utc::now(),
            status: GeocodeJobState::Failed,
            progress,
            error: Some(error),
        }
    }
}

/// A job id queued on the JetStream work-queue stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedGeocodeJob {
    pub job_id: Uuid,
    pub version_id: Uuid,
    pub submitted_at: DateTime<Utc>,
}

impl QueuedGeocodeJob {
    pub fn new(job_id: Uuid, version_id: Uuid) -> Self {
        Self {
            job_id,
            version_id,
            submitted_at: Utc::now(),
        }
    }
}
