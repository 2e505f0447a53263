//! Accepts a job-id, validates/dedupes, enqueues into the correct first
//! stage queue. Owns just enough (store, logger, the two first-stage queue
//! senders) to do that without needing the rest of the Orchestrator — a
//! narrow interface that breaks the Dispatcher/RecoveryLoop cycle:
//! `RecoveryLoop` holds a `Dispatcher` clone and calls `dispatch` directly,
//! nothing cyclic.

use crate::model::{DownloadPayload, JobStatus, LogEvent, LogEventType};
use crate::queues::{QueueError, StageSender};
use crate::store::{JobStore, StatusUpdate};
use crate::{logger::JobLogger, ytresolve};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const DANGEROUS_EXTENSIONS: &[&str] = &[".exe", ".bat", ".sh", ".cmd", ".msi", ".scr", ".com"];

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    logger: JobLogger,
    download_tx: StageSender<DownloadPayload>,
    youtube_tx: StageSender<DownloadPayload>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        logger: JobLogger,
        download_tx: StageSender<DownloadPayload>,
        youtube_tx: StageSender<DownloadPayload>,
    ) -> Dispatcher {
        Dispatcher {
            store,
            logger,
            download_tx,
            youtube_tx,
        }
    }

    /// Rejects anything but http/https, loopback/link-local hosts, and a
    /// fixed list of dangerous file extensions.
    pub fn validate_url(url: &str) -> Result<(), String> {
        let parsed = url::Url::parse(url).map_err(|_| "invalid url".to_string())?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err("invalid url scheme".to_string());
        }

        if let Some(host) = parsed.host_str() {
            if host == "localhost" || host.starts_with("127.") || host == "::1" {
                return Err("invalid url: loopback host".to_string());
            }
            if host.starts_with("169.254.") {
                return Err("invalid url: link-local host".to_string());
            }
        }

        let path_lower = parsed.path().to_lowercase();
        if DANGEROUS_EXTENSIONS.iter().any(|ext| path_lower.ends_with(ext)) {
            return Err("invalid url: dangerous file extension".to_string());
        }

        Ok(())
    }

    fn url_hash(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Runs the full dispatch procedure for `job_id`: idempotency check,
    /// cache-hit fast path, URL validation, then enqueue to the right
    /// first-stage queue.
    pub async fn dispatch(&self, job_id: &str) {
        let job = match self.store.get(job_id).await {
            Ok(j) => j,
            Err(_) => {
                self.logger
                    .log_error(LogEvent::new(job_id, LogEventType::Error, "dispatch: job not found"))
                    .await;
                return;
            }
        };

        // Idempotent re-entry: terminal or already-progressing jobs are a no-op.
        if job.status.is_terminal() || job.status != JobStatus::Pending {
            return;
        }

        // Best-effort URL-hash cache-hit fast path: this is a hint only,
        // never the source of truth for dedup.
        let url_hash = Self::url_hash(&job.video_url);
        if let Ok(Some(artifact)) = self.store.find_artifact_by_hash(&url_hash).await {
            self.logger.log(LogEvent::new(
                job_id,
                LogEventType::CacheHit,
                "dispatch: url-hash pre-download cache hit",
            ));
            let _ = self
                .store
                .update_status(
                    job_id,
                    JobStatus::Completed,
                    StatusUpdate {
                        mp3_url: Some(artifact.audio_url.clone()),
                        new_video_url: Some(artifact.video_url.clone()),
                        ..Default::default()
                    },
                )
                .await;
            self.logger
                .log_completed(
                    LogEvent::new(job_id, LogEventType::JobCompleted, "completed via url-hash cache")
                        .with_status(JobStatus::Completed),
                )
                .await;
            return;
        }

        if let Err(reason) = Self::validate_url(&job.video_url) {
            self.terminate_failed(job_id, &format!("invalid: {reason}")).await;
            return;
        }

        let payload = DownloadPayload {
            job_id: job_id.to_string(),
            video_url: job.video_url.clone(),
        };

        let target = if ytresolve::is_youtube_url(&job.video_url) {
            &self.youtube_tx
        } else {
            &self.download_tx
        };

        match target.try_enqueue(payload) {
            Ok(()) => {
                self.logger.log(LogEvent::new(
                    job_id,
                    LogEventType::JobQueued,
                    "dispatched to stage queue",
                ));
            }
            Err(QueueError::QueueFull) => {
                self.terminate_failed(job_id, "system overloaded").await;
            }
            Err(QueueError::Closed) => {
                self.terminate_failed(job_id, "system overloaded: queues closed").await;
            }
        }
    }

    async fn terminate_failed(&self, job_id: &str, message: &str) {
        let _ = self
            .store
            .update_status(
                job_id,
                JobStatus::Failed,
                StatusUpdate {
                    error: Some(message.to_string()),
                    ..Default::default()
                },
            )
            .await;
        self.logger
            .log_error(
                LogEvent::new(job_id, LogEventType::Error, message).with_status(JobStatus::Failed),
            )
            .await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn validates_scheme_and_host() {
        assert!(Dispatcher::validate_url("https://example.com/a.mp4").is_ok());
        assert!(Dispatcher::validate_url("ftp://bad/x").is_err());
        assert!(Dispatcher::validate_url("http://127.0.0.1/a.mp4").is_err());
        assert!(Dispatcher::validate_url("http://localhost/a.mp4").is_err());
        assert!(Dispatcher::validate_url("https://example.com/a.exe").is_err());
    }
}
