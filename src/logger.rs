//! Batched, append-only structured job log. Non-blocking append with a
//! single background flusher; `log_error` forces a synchronous flush
//! before returning so that a successful call is durable by the time it
//! returns.

use crate::model::LogEvent;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, event};

const BATCH_SIZE: usize = 50;
const FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3);

#[async_trait]
pub trait LogSink: Send + Sync {
    async fn write_batch(&self, events: &[LogEvent]) -> anyhow::Result<()>;
    async fn purge_older_than(&self, older_than: chrono::DateTime<chrono::Utc>) -> anyhow::Result<u64>;
}

enum LoggerMsg {
    Append(LogEvent),
    FlushSync(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct JobLogger {
    tx: mpsc::UnboundedSender<LoggerMsg>,
}

impl JobLogger {
    pub fn spawn(sink: std::sync::Arc<dyn LogSink>) -> (JobLogger, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Self::run(sink, rx));
        (JobLogger { tx }, handle)
    }

    async fn run(sink: std::sync::Arc<dyn LogSink>, mut rx: mpsc::UnboundedReceiver<LoggerMsg>) {
        let mut buffer: Vec<LogEvent> = Vec::with_capacity(BATCH_SIZE * 2);
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(LoggerMsg::Append(evt)) => {
                            if !evt.event_type.is_progress() {
                                buffer.push(evt);
                            }
                            if buffer.len() >= BATCH_SIZE * 2 {
                                Self::flush(&sink, &mut buffer).await;
                            }
                        }
                        Some(LoggerMsg::FlushSync(ack)) => {
                            Self::flush(&sink, &mut buffer).await;
                            let _ = ack.send(());
                        }
                        None => {
                            // Sender dropped: final synchronous drain on shutdown.
                            Self::flush(&sink, &mut buffer).await;
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    Self::flush(&sink, &mut buffer).await;
                }
            }
        }
    }

    async fn flush(sink: &std::sync::Arc<dyn LogSink>, buffer: &mut Vec<LogEvent>) {
        while !buffer.is_empty() {
            let take = buffer.len().min(BATCH_SIZE);
            let batch: Vec<LogEvent> = buffer.drain(..take).collect();
            if let Err(e) = sink.write_batch(&batch).await {
                event!(Level::ERROR, "JobLogger failed to persist batch: {e}");
            }
        }
    }

    /// Non-blocking append.
    pub fn log(&self, event: LogEvent) {
        let _ = self.tx.send(LoggerMsg::Append(event));
    }

    /// Triggers a synchronous flush before returning, guaranteeing the event
    /// is durable by the time the call completes.
    pub async fn log_error(&self, event: LogEvent) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let _ = self.tx.send(LoggerMsg::Append(event));
        let _ = self.tx.send(LoggerMsg::FlushSync(ack_tx));
        let _ = ack_rx.await;
    }

    /// Triggers a synchronous flush before returning, same durability
    /// guarantee as `log_error` applies to `JobCompleted`.
    pub async fn log_completed(&self, event: LogEvent) {
        self.log_error(event).await;
    }

    /// Final synchronous drain on process stop.
    pub async fn shutdown(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let _ = self.tx.send(LoggerMsg::FlushSync(ack_tx));
        let _ = ack_rx.await;
        drop(self.tx);
    }
}

/// `LogSink` backed by the same SQLite pool as the JobStore, writing into
/// the `log_events` table.
pub struct SqliteLogSink {
    pool: sqlx::sqlite::SqlitePool,
}

impl SqliteLogSink {
    pub fn new(pool: sqlx::sqlite::SqlitePool) -> SqliteLogSink {
        SqliteLogSink { pool }
    }
}

#[async_trait]
impl LogSink for SqliteLogSink {
    async fn write_batch(&self, events: &[LogEvent]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for evt in events {
            let timestamp = evt.timestamp.to_rfc3339();
            let event_type = evt.event_type.as_str();
            let job_status = evt.job_status.map(|s| s.as_str());
            let details = evt.details.as_ref().map(std::string::ToString::to_string);

            sqlx::query(
                "INSERT INTO log_events
                    (job_id, batch_id, timestamp, event_type, job_status, message,
                     details, file_size_bytes, duration_seconds, queue_time_ms, step)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11);",
            )
            .bind(&evt.job_id)
            .bind(&evt.batch_id)
            .bind(timestamp)
            .bind(event_type)
            .bind(job_status)
            .bind(&evt.message)
            .bind(details)
            .bind(evt.file_size_bytes)
            .bind(evt.duration_seconds)
            .bind(evt.queue_time_ms)
            .bind(&evt.step)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn purge_older_than(&self, older_than: chrono::DateTime<chrono::Utc>) -> anyhow::Result<u64> {
        let cutoff = older_than.to_rfc3339();
        let result = sqlx::query("DELETE FROM log_events WHERE timestamp < $1;")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::LogEventType;

    struct VecSink {
        events: std::sync::Mutex<Vec<LogEvent>>,
    }

    #[async_trait]
    impl LogSink for VecSink {
        async fn write_batch(&self, events: &[LogEvent]) -> anyhow::Result<()> {
            self.events.lock().unwrap().extend_from_slice(events);
            Ok(())
        }
        async fn purge_older_than(&self, _older_than: chrono::DateTime<chrono::Utc>) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn log_error_is_durable_before_return() {
        let sink = std::sync::Arc::new(VecSink {
            events: std::sync::Mutex::new(Vec::new()),
        });
        let (logger, handle) = JobLogger::spawn(sink.clone());

        logger
            .log_error(LogEvent::new("job-1", LogEventType::Error, "boom"))
            .await;

        assert_eq!(sink.events.lock().unwrap().len(), 1);

        logger.shutdown().await;
        let _ = handle.await;
    }

    #[tokio::test]
    async fn progress_events_are_dropped() {
        let sink = std::sync::Arc::new(VecSink {
            events: std::sync::Mutex::new(Vec::new()),
        });
        let (logger, handle) = JobLogger::spawn(sink.clone());

        logger.log(LogEvent::new(
            "job-1",
            LogEventType::DownloadProgress,
            "50%",
        ));
        logger
            .log_error(LogEvent::new("job-1", LogEventType::Error, "sentinel"))
            .await;

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "sentinel");
        drop(events);

        logger.shutdown().await;
        let _ = handle.await;
    }

    #[tokio::test]
    async fn shutdown_drains_remaining_events() {
        let sink = std::sync::Arc::new(VecSink {
            events: std::sync::Mutex::new(Vec::new()),
        });
        let (logger, handle) = JobLogger::spawn(sink.clone());

        for i in 0..5 {
            logger.log(LogEvent::new(
                format!("job-{i}"),
                LogEventType::JobCreated,
                "created",
            ));
        }
        logger.shutdown().await;
        let _ = handle.await;

        assert_eq!(sink.events.lock().unwrap().len(), 5);
    }
}
