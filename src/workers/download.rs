//! Download worker: fetches the source bytes from either the object store
//! (already-converted re-download) or the origin URL, rejects anything
//! outside the configured size/content-type limits, and hands the result
//! to Convert — or straight to Completed when the content hash already
//! matches a cached artifact.

use crate::error::StageError;
use crate::logger::JobLogger;
use crate::model::{ConvertPayload, DownloadPayload, JobStatus, LogEvent, LogEventType, MediaArtifact};
use crate::objectstore::ObjectStore;
use crate::queues::{QueueError, StageReceiver, StageSender};
use crate::store::{JobStore, StatusUpdate};
use crate::tempfile_arena::TempArena;
use chrono::Utc;
use std::sync::Arc;
use tracing::{Level, event};

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub struct DownloadWorkerContext {
    pub store: Arc<dyn JobStore>,
    pub logger: JobLogger,
    pub arena: Arc<TempArena>,
    pub object_store: Arc<dyn ObjectStore>,
    pub http: reqwest::Client,
    pub convert_tx: StageSender<ConvertPayload>,
    pub max_file_size_bytes: u64,
    pub allowed_content_types: Vec<String>,
}

fn infer_extension(url: &str, content_type: Option<&str>) -> &'static str {
    let lower = url.to_lowercase();
    for ext in [".mp4", ".webm", ".mp3", ".m4a", ".mkv"] {
        if lower.ends_with(ext) {
            return match ext {
                ".mp4" => "mp4",
                ".webm" => "webm",
                ".mp3" => "mp3",
                ".m4a" => "m4a",
                ".mkv" => "mkv",
                _ => "mp4",
            };
        }
    }
    match content_type {
        Some("video/webm") => "webm",
        Some("audio/mpeg") => "mp3",
        Some("video/mp4") => "mp4",
        _ => "mp4",
    }
}

fn map_http_status(status: reqwest::StatusCode) -> StageError {
    match status.as_u16() {
        403 => StageError::PermanentFetch("access denied (403)".to_string()),
        404 => StageError::PermanentFetch("not found (404)".to_string()),
        _ => StageError::TransientNetwork(format!("http failure: {status}")),
    }
}

async fn fetch_bytes(
    ctx: &DownloadWorkerContext,
    url: &str,
) -> Result<(Vec<u8>, Option<String>), StageError> {
    if ctx
        .object_store
        .exists(url)
        .await
        .unwrap_or(false)
    {
        let bytes = ctx
            .object_store
            .download(url)
            .await
            .map_err(|e| StageError::StorageFailure(e.to_string()))?;
        return Ok((bytes, None));
    }

    let referer = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| format!("https://{h}/")))
        .unwrap_or_default();

    let resp = ctx
        .http
        .get(url)
        .header("User-Agent", BROWSER_USER_AGENT)
        .header("Referer", referer)
        .send()
        .await
        .map_err(|e| StageError::TransientNetwork(e.to_string()))?;

    if !resp.status().is_success() {
        return Err(map_http_status(resp.status()));
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(std::string::ToString::to_string);

    let bytes = resp
        .bytes()
        .await
        .map_err(|e| StageError::TransientNetwork(e.to_string()))?;

    Ok((bytes.to_vec(), content_type))
}

async fn process_one(ctx: &DownloadWorkerContext, payload: DownloadPayload) {
    let job_id = payload.job_id.clone();

    let job = match ctx.store.get(&job_id).await {
        Ok(j) => j,
        Err(_) => {
            event!(Level::WARN, "download worker: job {job_id} missing, dropping");
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
        LogEvent::new(&job_id, LogEventType::DownloadStarted, "download started")
            .with_status(JobStatus::Downloading)
            .with_queue_time_ms(queue_time_ms),
    );

    let (bytes, content_type) = match fetch_bytes(ctx, &payload.video_url).await {
        Ok(v) => v,
        Err(e) => {
            fail_job(ctx, &job_id, &e.to_string()).await;
            return;
        }
    };

    if bytes.len() as u64 > ctx.max_file_size_bytes {
        fail_job(ctx, &job_id, "downloaded file exceeds maximum allowed size").await;
        return;
    }

    if let Some(ct) = content_type.as_deref() {
        if !ctx.allowed_content_types.is_empty() && !ctx.allowed_content_types.iter().any(|allowed| allowed == ct) {
            fail_job(ctx, &job_id, &format!("content-type '{ct}' is not in the allowed list")).await;
            return;
        }
    }

    let ext = infer_extension(&payload.video_url, content_type.as_deref());
    let video_path = match ctx.arena.create_temp_file(ext) {
        Ok(p) => p,
        Err(e) => {
            fail_job(ctx, &job_id, &format!("temp arena failure: {e}")).await;
            return;
        }
    };
    if let Err(e) = tokio::fs::write(&video_path, &bytes).await {
        fail_job(ctx, &job_id, &format!("failed to persist download: {e}")).await;
        return;
    }

    let video_hash = crate::hash::hash_bytes(&bytes);
    let _ = ctx
        .store
        .update_status(
            &job_id,
            JobStatus::Downloading,
            StatusUpdate {
                content_type: content_type.clone(),
                file_size_bytes: Some(bytes.len() as i64),
                video_hash: Some(video_hash.clone()),
                ..Default::default()
            },
        )
        .await;
    ctx.logger.log(
        LogEvent::new(&job_id, LogEventType::DownloadCompleted, "download completed")
            .with_file_size_bytes(bytes.len() as i64),
    );

    if let Ok(Some(artifact)) = ctx.store.find_artifact_by_hash(&video_hash).await {
        complete_via_cache(ctx, &job_id, &artifact).await;
        let _ = ctx.arena.delete_temp_file(&video_path);
        return;
    }

    let convert_payload = ConvertPayload {
        job_id: job_id.clone(),
        video_path: video_path.clone(),
        video_hash,
    };
    if let Err(QueueError::Closed) = ctx.convert_tx.enqueue(convert_payload).await {
        event!(Level::DEBUG, "download worker: convert queue closed at shutdown, releasing temp file");
        let _ = ctx.arena.delete_temp_file(&video_path);
    }
}

async fn complete_via_cache(ctx: &DownloadWorkerContext, job_id: &str, artifact: &MediaArtifact) {
    let _ = ctx
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
    ctx.logger.log(LogEvent::new(job_id, LogEventType::CacheHit, "content-hash cache hit"));
    ctx.logger
        .log_completed(
            LogEvent::new(job_id, LogEventType::JobCompleted, "completed via content-hash cache")
                .with_status(JobStatus::Completed),
        )
        .await;
}

async fn fail_job(ctx: &DownloadWorkerContext, job_id: &str, message: &str) {
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
    ctx: Arc<DownloadWorkerContext>,
    rx: StageReceiver<DownloadPayload>,
    shutdown: &tokio::sync::broadcast::Sender<()>,
) -> super::WorkerPool {
    super::spawn_pool(count, shutdown, move |id, mut shutdown_rx| {
        let ctx = ctx.clone();
        let rx = rx.clone();
        async move {
            event!(Level::DEBUG, "download worker {id} started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        event!(Level::DEBUG, "download worker {id} shutting down");
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
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn infers_extension_from_suffix() {
        assert_eq!(infer_extension("https://x.com/a.webm", None), "webm");
        assert_eq!(infer_extension("https://x.com/a", Some("video/mp4")), "mp4");
        assert_eq!(infer_extension("https://x.com/a", Some("audio/mpeg")), "mp3");
        assert_eq!(infer_extension("https://x.com/a", None), "mp4");
    }

    #[test]
    fn maps_http_status_codes() {
        assert!(matches!(
            map_http_status(reqwest::StatusCode::FORBIDDEN),
            StageError::PermanentFetch(_)
        ));
        assert!(matches!(
            map_http_status(reqwest::StatusCode::NOT_FOUND),
            StageError::PermanentFetch(_)
        ));
        assert!(matches!(
            map_http_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
            StageError::TransientNetwork(_)
        ));
    }
}
