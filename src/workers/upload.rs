//! Upload worker: the terminal stage. Uploads the mp3 (and, if present,
//! the source video) in parallel, records the dedup artifact, marks the
//! job Completed, and always releases both temp files.

use crate::logger::JobLogger;
use crate::model::{JobStatus, LogEvent, LogEventType, MediaArtifact, UploadPayload};
use crate::objectstore::ObjectStore;
use crate::queues::{QueueError, StageReceiver};
use crate::store::{JobStore, StatusUpdate};
use crate::tempfile_arena::TempArena;
use chrono::Utc;
use std::sync::Arc;
use tracing::{Level, event};

pub struct UploadWorkerContext {
    pub store: Arc<dyn JobStore>,
    pub logger: JobLogger,
    pub arena: Arc<TempArena>,
    pub object_store: Arc<dyn ObjectStore>,
}

async fn process_one(ctx: &UploadWorkerContext, payload: UploadPayload) {
    let job_id = payload.job_id.clone();

    // Scoped cleanup: whatever happens below, both temp files are released
    // on the way out.
    let result = try_upload(ctx, &job_id, &payload).await;

    let _ = ctx.arena.delete_temp_file(&payload.mp3_path);
    if let Some(video_path) = &payload.video_path {
        let _ = ctx.arena.delete_temp_file(video_path);
    }

    if let Err(message) = result {
        fail_job(ctx, &job_id, &message).await;
    }
}

async fn try_upload(ctx: &UploadWorkerContext, job_id: &str, payload: &UploadPayload) -> Result<(), String> {
    let job = ctx.store.get(job_id).await.map_err(|_| {
        event!(Level::WARN, "upload worker: job {job_id} missing, dropping");
        String::new()
    })?;
    if job.status.is_terminal() {
        return Err(String::new());
    }

    let _ = ctx
        .store
        .update_status(job_id, JobStatus::Uploading, StatusUpdate::default())
        .await;
    ctx.logger.log(
        LogEvent::new(job_id, LogEventType::UploadStarted, "upload started")
            .with_status(JobStatus::Uploading),
    );

    let mp3_path = payload.mp3_path.clone();
    let video_path = payload.video_path.clone();
    let object_store_for_mp3 = ctx.object_store.clone();
    let object_store_for_video = ctx.object_store.clone();

    let mp3_upload = tokio::spawn(async move {
        object_store_for_mp3.upload(&mp3_path, "audio/mpeg").await
    });
    let video_upload = tokio::spawn(async move {
        match video_path {
            Some(path) => object_store_for_video
                .upload(&path, "video/mp4")
                .await
                .map(Some),
            None => Ok(None),
        }
    });

    let audio_url = mp3_upload
        .await
        .map_err(|e| format!("upload task panicked: {e}"))?
        .map_err(|e| format!("mp3 upload failed: {e}"))?;
    let video_url = video_upload
        .await
        .map_err(|e| format!("upload task panicked: {e}"))?
        .map_err(|e| format!("video upload failed: {e}"))?;

    let file_size_bytes = tokio::fs::metadata(&payload.mp3_path)
        .await
        .map(|m| m.len() as i64)
        .unwrap_or(0);

    ctx.store
        .save_artifact(MediaArtifact {
            video_hash: payload.video_hash.clone(),
            video_url: video_url.clone().unwrap_or_default(),
            audio_url: audio_url.clone(),
            file_size_bytes,
            created_at: Utc::now(),
        })
        .await
        .map_err(|e| format!("failed to persist artifact: {e}"))?;

    let _ = ctx
        .store
        .update_status(
            job_id,
            JobStatus::Completed,
            StatusUpdate {
                mp3_url: Some(audio_url),
                new_video_url: video_url,
                ..Default::default()
            },
        )
        .await;

    let total_time_ms = (Utc::now() - job.created_at).num_milliseconds();
    ctx.logger
        .log_completed(
            LogEvent::new(job_id, LogEventType::JobCompleted, "job completed")
                .with_status(JobStatus::Completed)
                .with_duration_seconds(total_time_ms as f64 / 1000.0),
        )
        .await;

    Ok(())
}

async fn fail_job(ctx: &UploadWorkerContext, job_id: &str, message: &str) {
    if message.is_empty() {
        return;
    }
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
    ctx: Arc<UploadWorkerContext>,
    rx: StageReceiver<UploadPayload>,
    shutdown: &tokio::sync::broadcast::Sender<()>,
) -> super::WorkerPool {
    super::spawn_pool(count, shutdown, move |id, mut shutdown_rx| {
        let ctx = ctx.clone();
        let rx = rx.clone();
        async move {
            event!(Level::DEBUG, "upload worker {id} started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        event!(Level::DEBUG, "upload worker {id} shutting down");
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
