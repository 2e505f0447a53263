//! Youtube worker: same shape as Download but resolves the best
//! audio-only stream and downloads it directly to a `.mp3` temp file,
//! then enqueues straight to Upload (no Convert step).

use crate::logger::JobLogger;
use crate::model::{DownloadPayload, JobStatus, LogEvent, LogEventType, UploadPayload};
use crate::queues::{QueueError, StageReceiver, StageSender};
use crate::store::{JobStore, StatusUpdate};
use crate::tempfile_arena::TempArena;
use crate::ytresolve::YoutubeResolver;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{Level, event};

pub struct YoutubeWorkerContext {
    pub store: Arc<dyn JobStore>,
    pub logger: JobLogger,
    pub arena: Arc<TempArena>,
    pub resolver: Arc<dyn YoutubeResolver>,
    pub upload_tx: StageSender<UploadPayload>,
    pub max_retry_attempts: u8,
    pub retry_delay: std::time::Duration,
}

/// Permanent failures never worth retrying within this worker's own
/// attempt loop (a 4xx other than 408/429, or "video unavailable"),
/// distinguished from retryable ones (timeout, transient HTTP).
fn is_permanent_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    if lower.contains("408") || lower.contains("429") {
        return false;
    }
    lower.contains("unavailable")
        || lower.contains("private")
        || lower.contains("removed")
        || lower.contains("403")
        || lower.contains("404")
}

fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

async fn process_one(ctx: &YoutubeWorkerContext, payload: DownloadPayload) {
    let job_id = payload.job_id.clone();

    let job = match ctx.store.get(&job_id).await {
        Ok(j) => j,
        Err(_) => {
            event!(Level::WARN, "youtube worker: job {job_id} missing, dropping");
            return;
        }
    };
    if job.status.is_terminal() {
        return;
    }

    let queue_time_ms = (Utc::now() - job.created_at).num_milliseconds();
    let _ = ctx
        .store
        .update_status(&job_id, JobStatus::Downloading, StatusUpdate::default())
        .await;
    ctx.logger.log(
        LogEvent::new(&job_id, LogEventType::DownloadStarted, "youtube download started")
            .with_status(JobStatus::Downloading)
            .with_queue_time_ms(queue_time_ms),
    );

    let mp3_path = match ctx.arena.create_temp_file("mp3") {
        Ok(p) => p,
        Err(e) => {
            fail_job(ctx, &job_id, &format!("temp arena failure: {e}")).await;
            return;
        }
    };

    let mut attempt = 1u8;
    let outcome = loop {
        match ctx.resolver.download_audio_only(&payload.video_url, &mp3_path).await {
            Ok(()) => break Ok(()),
            Err(e) => {
                let message = e.to_string();
                ctx.logger.log(LogEvent::new(
                    &job_id,
                    LogEventType::JobRetry,
                    format!("youtube download attempt {attempt} failed: {message}"),
                ));

                if is_permanent_failure(&message) || attempt >= ctx.max_retry_attempts {
                    break Err(message);
                }
                tokio::time::sleep(ctx.retry_delay * u32::from(attempt)).await;
                attempt += 1;
            }
        }
    };

    if let Err(message) = outcome {
        let _ = ctx.arena.delete_temp_file(&mp3_path);
        fail_job(ctx, &job_id, &format!("youtube download failed: {message}")).await;
        return;
    }

    let video_hash = url_hash(&payload.video_url);
    let _ = ctx
        .store
        .update_status(
            &job_id,
            JobStatus::Downloading,
            StatusUpdate {
                video_hash: Some(video_hash.clone()),
                ..Default::default()
            },
        )
        .await;
    ctx.logger
        .log(LogEvent::new(&job_id, LogEventType::DownloadCompleted, "youtube download completed"));

    let upload_payload = UploadPayload {
        job_id: job_id.clone(),
        mp3_path: mp3_path.clone(),
        video_path: None,
        video_hash,
    };
    if let Err(QueueError::Closed) = ctx.upload_tx.enqueue(upload_payload).await {
        event!(Level::DEBUG, "youtube worker: upload queue closed at shutdown, releasing temp file");
        let _ = ctx.arena.delete_temp_file(&mp3_path);
    }
}

async fn fail_job(ctx: &YoutubeWorkerContext, job_id: &str, message: &str) {
    let _ = ctx
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
    ctx.logger
        .log_error(LogEvent::new(job_id, LogEventType::Error, message).with_status(JobStatus::Failed))
        .await;
}

pub fn spawn(
    count: usize,
    ctx: Arc<YoutubeWorkerContext>,
    rx: StageReceiver<DownloadPayload>,
    shutdown: &tokio::sync::broadcast::Sender<()>,
) -> super::WorkerPool {
    super::spawn_pool(count, shutdown, move |id, mut shutdown_rx| {
        let ctx = ctx.clone();
        let rx = rx.clone();
        async move {
            event!(Level::DEBUG, "youtube worker {id} started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        event!(Level::DEBUG, "youtube worker {id} shutting down");
                        break;
                    }
                    item = rx.dequeue() => {
                        match item {
                            Ok(payload) => process_one(&ctx, payload).await,
                            Err(QueueError::Closed) => break,
                            Err(QueueError::QueueFull) => unreachable!("dequeue never fails with QueueFull"),
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_permanent_vs_retryable_failures() {
        assert!(is_permanent_failure("HTTP 404 not found"));
        assert!(is_permanent_failure("video is unavailable"));
        assert!(!is_permanent_failure("connection timeout"));
        assert!(!is_permanent_failure("HTTP 429 too many requests"));
    }
}
