//! Shared `#[cfg(test)]` fakes for the `JobStore`/`LogSink` traits, used by
//! unit tests across several modules (recovery.rs, integration_tests.rs)
//! that need a cheap stand-in for sqlite rather than spinning up a real
//! pool per test.

use crate::error::StoreError;
use crate::logger::LogSink;
use crate::model::{Job, JobStatus, LogEvent, MediaArtifact};
use crate::store::{JobStore, StatusUpdate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

pub struct InMemoryStore {
    jobs: Mutex<HashMap<String, Job>>,
    artifacts: Mutex<HashMap<String, MediaArtifact>>,
}

impl InMemoryStore {
    pub fn new() -> InMemoryStore {
        InMemoryStore {
            jobs: Mutex::new(HashMap::new()),
            artifacts: Mutex::new(HashMap::new()),
        }
    }

    /// Seeds an artifact as if a prior job had already produced it, for
    /// tests exercising the dedup cache-hit path.
    pub fn seed_artifact(&self, hash: &str, artifact: MediaArtifact) {
        self.artifacts.lock().unwrap().insert(hash.to_string(), artifact);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        InMemoryStore::new()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create(&self, job: Job) -> Result<Job, StoreError> {
        self.jobs.lock().unwrap().insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Job, StoreError> {
        self.jobs.lock().unwrap().get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.lock().unwrap().insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_status(&self, id: &str, new_status: JobStatus, update: StatusUpdate) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(id).ok_or(StoreError::NotFound)?;
        job.status = new_status;
        if let Some(e) = update.error {
            job.error_message = Some(e);
        }
        if let Some(u) = update.mp3_url {
            job.mp3_url = Some(u);
        }
        if let Some(u) = update.new_video_url {
            job.new_video_url = Some(u);
        }
        if new_status.is_terminal() {
            job.completed_at = Some(chrono::Utc::now());
        }
        job.last_attempt_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn mark_recovered(&self, id: &str) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(id).ok_or(StoreError::NotFound)?;
        job.status = JobStatus::Pending;
        job.processing_attempts += 1;
        job.last_attempt_at = Some(chrono::Utc::now());
        Ok(job.clone())
    }

    async fn get_stale(&self, _older_than: chrono::Duration) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| !j.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn find_artifact_by_hash(&self, hash: &str) -> Result<Option<MediaArtifact>, StoreError> {
        Ok(self.artifacts.lock().unwrap().get(hash).cloned())
    }

    async fn save_artifact(&self, artifact: MediaArtifact) -> Result<(), StoreError> {
        self.artifacts.lock().unwrap().insert(artifact.video_hash.clone(), artifact);
        Ok(())
    }

    async fn list_artifacts_older_than(&self, _older_than: chrono::DateTime<chrono::Utc>) -> Result<Vec<MediaArtifact>, StoreError> {
        Ok(vec![])
    }

    async fn delete_artifact(&self, hash: &str) -> Result<(), StoreError> {
        self.artifacts.lock().unwrap().remove(hash);
        Ok(())
    }

    async fn purge_expired(&self, _older_than: chrono::DateTime<chrono::Utc>) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn create_batch(&self, _batch_id: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn jobs_in_batch(&self, _batch_id: &str) -> Result<Vec<Job>, StoreError> {
        Ok(vec![])
    }
}

pub struct NullSink;

#[async_trait]
impl LogSink for NullSink {
    async fn write_batch(&self, _events: &[LogEvent]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn purge_older_than(&self, _older_than: chrono::DateTime<chrono::Utc>) -> anyhow::Result<u64> {
        Ok(0)
    }
}
