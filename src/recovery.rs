//! Periodically scans the JobStore for jobs stuck in a non-terminal status
//! past a threshold and re-enqueues them up to a retry limit, on a
//! `tokio::time::interval` loop selected against a shutdown broadcast.

use crate::dispatcher::Dispatcher;
use crate::logger::JobLogger;
use crate::model::{JobStatus, LogEvent, LogEventType};
use crate::store::{JobStore, StatusUpdate};
use std::sync::Arc;
use tracing::{Level, event};

pub struct RecoveryLoop {
    store: Arc<dyn JobStore>,
    logger: JobLogger,
    dispatcher: Dispatcher,
    tick_interval: std::time::Duration,
    stale_threshold: chrono::Duration,
    max_attempts: i64,
}

impl RecoveryLoop {
    pub fn new(
        store: Arc<dyn JobStore>,
        logger: JobLogger,
        dispatcher: Dispatcher,
        tick_interval: std::time::Duration,
        stale_threshold: chrono::Duration,
        max_attempts: i64,
    ) -> RecoveryLoop {
        RecoveryLoop {
            store,
            logger,
            dispatcher,
            tick_interval,
            stale_threshold,
            max_attempts,
        }
    }

    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    event!(Level::DEBUG, "recovery loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One pass over `GetStale`: terminates jobs past the attempt limit,
    /// otherwise re-enqueues exactly once per tick by marking the job
    /// Pending and invoking the Dispatcher.
    async fn tick(&self) {
        let stale = match self.store.get_stale(self.stale_threshold).await {
            Ok(jobs) => jobs,
            Err(e) => {
                event!(Level::WARN, "recovery loop: failed to query stale jobs: {e}");
                return;
            }
        };

        for job in stale {
            if job.processing_attempts >= self.max_attempts {
                let _ = self
                    .store
                    .update_status(
                        &job.id,
                        JobStatus::Failed,
                        StatusUpdate {
                            error: Some("max attempts exceeded".to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                self.logger
                    .log_error(
                        LogEvent::new(&job.id, LogEventType::JobCancelled, "max attempts exceeded")
                            .with_status(JobStatus::Failed),
                    )
                    .await;
                continue;
            }

            let recovered = match self.store.mark_recovered(&job.id).await {
                Ok(j) => j,
                Err(e) => {
                    event!(Level::WARN, "recovery loop: failed to mark {} recovered: {e}", job.id);
                    continue;
                }
            };

            self.logger.log(
                LogEvent::new(
                    &job.id,
                    LogEventType::JobRecovered,
                    format!(
                        "recovered from stale {} (attempt {})",
                        job.status, recovered.processing_attempts
                    ),
                )
                .with_status(JobStatus::Pending),
            );

            // Idempotent re-entry: the Dispatcher's own status check means
            // any concurrent dispatch of this job cannot double-inject.
            self.dispatcher.dispatch(&job.id).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::logger::JobLogger as Logger;
    use crate::model::{DownloadPayload, Job};
    use crate::queues::StageSender;
    use crate::test_support::{InMemoryStore, NullSink};

    #[tokio::test]
    async fn exceeds_max_attempts_terminates_failed() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new());
        let mut job = Job::new("https://example.com/a.mp4".to_string(), None);
        job.status = JobStatus::Downloading;
        job.processing_attempts = 3;
        store.create(job.clone()).await.unwrap();
        let _ = store
            .update_status(&job.id, JobStatus::Downloading, StatusUpdate::default())
            .await;

        let (logger, handle) = Logger::spawn(Arc::new(NullSink));
        let (download_tx, _download_rx) = tokio::sync::mpsc::channel::<DownloadPayload>(8);
        let (youtube_tx, _youtube_rx) = tokio::sync::mpsc::channel::<DownloadPayload>(8);
        let dispatcher = Dispatcher::new(
            store.clone(),
            logger.clone(),
            StageSender::new(download_tx),
            StageSender::new(youtube_tx),
        );

        let recovery = RecoveryLoop::new(
            store.clone(),
            logger.clone(),
            dispatcher,
            std::time::Duration::from_secs(1),
            chrono::Duration::seconds(0),
            3,
        );
        recovery.tick().await;

        let reloaded = store.get(&job.id).await.unwrap();
        assert_eq!(reloaded.status, JobStatus::Failed);
        assert_eq!(reloaded.error_message.as_deref(), Some("max attempts exceeded"));

        logger.shutdown().await;
        let _ = handle.await;
    }

    #[tokio::test]
    async fn under_limit_recovers_to_pending_and_increments_attempts() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new());
        let mut job = Job::new("ftp://bad/x".to_string(), None);
        job.status = JobStatus::Downloading;
        job.processing_attempts = 0;
        store.create(job.clone()).await.unwrap();
        let _ = store
            .update_status(&job.id, JobStatus::Downloading, StatusUpdate::default())
            .await;

        let (logger, handle) = Logger::spawn(Arc::new(NullSink));
        let (download_tx, _download_rx) = tokio::sync::mpsc::channel::<DownloadPayload>(8);
        let (youtube_tx, _youtube_rx) = tokio::sync::mpsc::channel::<DownloadPayload>(8);
        let dispatcher = Dispatcher::new(
            store.clone(),
            logger.clone(),
            StageSender::new(download_tx),
            StageSender::new(youtube_tx),
        );

        let recovery = RecoveryLoop::new(
            store.clone(),
            logger.clone(),
            dispatcher,
            std::time::Duration::from_secs(1),
            chrono::Duration::seconds(0),
            3,
        );
        recovery.tick().await;

        // Dispatcher validates the bad URL and terminates it Failed; either
        // way processing_attempts must have incremented exactly once.
        let reloaded = store.get(&job.id).await.unwrap();
        assert_eq!(reloaded.processing_attempts, 1);

        logger.shutdown().await;
        let _ = handle.await;
    }
}
