//! Periodic housekeeping independent of the pipeline proper. Every hour,
//! purges temp files older than 24h (escalating to 12h/6h if the arena is
//! still over its size cap) and expires hash-indexed artifacts past their
//! TTL; every midnight, runs a deep temp cleanup; every day at 03:00,
//! purges old log rows.

use crate::logger::{JobLogger, LogSink};
use crate::objectstore::ObjectStore;
use crate::store::JobStore;
use crate::tempfile_arena::TempArena;
use chrono::{Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, event};

const HOUR: Duration = Duration::from_secs(3600);

pub struct JanitorLoop {
    store: Arc<dyn JobStore>,
    logger: JobLogger,
    log_sink: Arc<dyn LogSink>,
    arena: Arc<TempArena>,
    object_store: Arc<dyn ObjectStore>,
    artifact_ttl: chrono::Duration,
    log_retention: chrono::Duration,
    tick_interval: Duration,
}

impl JanitorLoop {
    pub fn new(
        store: Arc<dyn JobStore>,
        logger: JobLogger,
        log_sink: Arc<dyn LogSink>,
        arena: Arc<TempArena>,
        object_store: Arc<dyn ObjectStore>,
        artifact_ttl: chrono::Duration,
        log_retention: chrono::Duration,
    ) -> JanitorLoop {
        JanitorLoop {
            store,
            logger,
            log_sink,
            arena,
            object_store,
            artifact_ttl,
            log_retention,
            tick_interval: HOUR,
        }
    }

    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        let mut last_midnight_run: Option<chrono::NaiveDate> = None;
        let mut last_daily_log_purge: Option<chrono::NaiveDate> = None;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    event!(Level::DEBUG, "janitor loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.hourly_pass().await;

                    let now = Utc::now();
                    if now.hour() == 0 && last_midnight_run != Some(now.date_naive()) {
                        self.deep_temp_cleanup().await;
                        last_midnight_run = Some(now.date_naive());
                    }
                    if now.hour() == 3 && last_daily_log_purge != Some(now.date_naive()) {
                        self.purge_old_logs().await;
                        last_daily_log_purge = Some(now.date_naive());
                    }
                }
            }
        }
    }

    /// Runs the TempArena cleanup at 24h (escalating to 12h/6h if the arena
    /// is still over 0.8*MaxTempSizeBytes) and expires stale artifacts.
    async fn hourly_pass(&self) {
        for age_hours in [24, 12, 6] {
            match self.arena.cleanup_older_than(Duration::from_secs(age_hours * 3600)) {
                Ok(removed) => {
                    if removed > 0 {
                        event!(Level::INFO, "janitor: removed {removed} temp files older than {age_hours}h");
                    }
                }
                Err(e) => {
                    event!(Level::WARN, "janitor: temp cleanup at {age_hours}h failed: {e}");
                    break;
                }
            }

            match self.arena.total_bytes_over_cap() {
                Ok(false) => break,
                Ok(true) => continue,
                Err(e) => {
                    event!(Level::WARN, "janitor: failed to read arena stats: {e}");
                    break;
                }
            }
        }

        self.expire_artifacts().await;
    }

    async fn expire_artifacts(&self) {
        let cutoff = Utc::now() - self.artifact_ttl;
        let expired = match self.store.list_artifacts_older_than(cutoff).await {
            Ok(v) => v,
            Err(e) => {
                event!(Level::WARN, "janitor: failed to list expired artifacts: {e}");
                return;
            }
        };

        for artifact in expired {
            if let Err(e) = self.object_store.delete(&artifact.audio_url).await {
                event!(Level::WARN, "janitor: failed to delete expired artifact object {}: {e}", artifact.audio_url);
                continue;
            }
            if let Err(e) = self.store.delete_artifact(&artifact.video_hash).await {
                event!(Level::WARN, "janitor: failed to delete expired artifact row {}: {e}", artifact.video_hash);
            }
        }
    }

    async fn deep_temp_cleanup(&self) {
        event!(Level::INFO, "janitor: running midnight deep temp cleanup");
        if let Err(e) = self.arena.cleanup_older_than(Duration::from_secs(0)) {
            event!(Level::WARN, "janitor: deep temp cleanup failed: {e}");
        }
    }

    async fn purge_old_logs(&self) {
        let cutoff = Utc::now() - self.log_retention;
        let jobs_removed = self.store.purge_expired(cutoff).await.unwrap_or(0);
        let rows_removed = match self.log_sink.purge_older_than(cutoff).await {
            Ok(n) => n,
            Err(e) => {
                event!(Level::WARN, "janitor: failed to purge old log rows: {e}");
                0
            }
        };
        let retention_days = self.log_retention.num_days();
        self.logger.log(crate::model::LogEvent::new(
            crate::model::LogEvent::SYSTEM_JOB_ID,
            crate::model::LogEventType::SystemInfo,
            format!(
                "janitor: purged {jobs_removed} expired jobs and {rows_removed} log rows older than {retention_days} days"
            ),
        ));
    }
}
