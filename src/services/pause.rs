//! Pause registry for geocode jobs
//!
//! A pause request flips the job row to `paused` in the database and trips
//! an in-process token so the runner notices between individual voters
//! rather than at the next periodic DB re-read. The registry holds tokens
//! only for jobs this process is actively running; `JobGuard` removes the
//! entry when processing ends.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Global pause registry singleton
pub static PAUSE: Lazy<PauseRegistry> = Lazy::new(PauseRegistry::default);

/// RAII guard that removes the job from the registry when dropped.
/// Held by the runner for the duration of job processing.
pub struct JobGuard {
    job_id: Uuid,
    registry: PauseRegistry,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.job_id);
    }
}

/// Thread-safe map of running jobs to their pause tokens
#[derive(Clone, Default)]
pub struct PauseRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl PauseRegistry {
    /// Register a job as running. The returned guard must be held in scope
    /// while the job processes.
    pub fn register(&self, job_id: Uuid) -> JobGuard {
        self.jobs.lock().insert(job_id, CancellationToken::new());
        JobGuard {
            job_id,
            registry: self.clone(),
        }
    }

    /// Request a pause.
    ///
    /// Returns true if the job was registered in this process. A job queued
    /// but not yet picked up gets a pre-tripped token so the runner sees the
    /// pause on its first check.
    pub fn request_pause(&self, job_id: Uuid) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => {
                let token = CancellationToken::new();
                token.cancel();
                jobs.insert(job_id, token);
                false
            }
        }
    }

    /// Hot-path check inside the runner's voter loop
    pub fn is_paused(&self, job_id: &Uuid) -> bool {
        self.jobs
            .lock()
            .get(job_id)
            .map_or(false, |t| t.is_cancelled())
    }

    /// Clear any pause token for a job (used on resume)
    pub fn clear(&self, job_id: &Uuid) {
        self.jobs.lock().remove(job_id);
    }

    fn remove(&self, job_id: &Uuid) {
        self.jobs.lock().remove(job_id);
    }

    #[cfg(test)]
    fn contains(&self, job_id: &Uuid) -> bool {
        self.jobs.lock().contains_key(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_registry() -> PauseRegistry {
        PauseRegistry::default()
    }

    #[test]
    fn test_registered_job_is_not_paused() {
        let reg = new_registry();
        let job_id = Uuid::new_v4();

        let _guard = reg.register(job_id);
        assert!(!reg.is_paused(&job_id));
    }

    #[test]
    fn test_request_pause_trips_running_job() {
        let reg = new_registry();
        let job_id = Uuid::new_v4();

        let _guard = reg.register(job_id);
        assert!(reg.request_pause(job_id));
        assert!(reg.is_paused(&job_id));
    }

    #[test]
    fn test_pause_before_pickup_is_seen_on_first_check() {
        let reg = new_registry();
        let job_id = Uuid::new_v4();

        assert!(!reg.request_pause(job_id));
        assert!(reg.is_paused(&job_id));
    }

    #[test]
    fn test_clear_resets_pause_for_resume() {
        let reg = new_registry();
        let job_id = Uuid::new_v4();

        reg.request_pause(job_id);
        reg.clear(&job_id);
        assert!(!reg.is_paused(&job_id));
    }

    #[test]
    fn test_guard_drop_removes_entry() {
        let reg = new_registry();
        let job_id = Uuid::new_v4();

        {
            let _guard = reg.register(job_id);
            assert!(reg.contains(&job_id));
        }

        assert!(!reg.contains(&job_id));
    }

    #[test]
    fn test_unknown_job_is_not_paused() {
        let reg = new_registry();
        assert!(!reg.is_paused(&Uuid::new_v4()));
    }
}
