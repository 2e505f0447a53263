//! Convert worker: probes for an audio stream, transcodes to mp3 under a
//! shared CPU throttle, and forwards to Upload.

use crate::cpu_throttle::CpuThrottle;
use crate::logger::JobLogger;
use crate::model::{ConvertPayload, JobStatus, LogEvent, LogEventType, UploadPayload};
use crate::queues::{QueueError, StageReceiver, StageSender};
use crate::store::{JobStore, StatusUpdate};
use crate::tempfile_arena::TempArena;
use crate::transcoder::{Transcode, TranscodeOpts};
use std::sync::Arc;
use tracing::{Level, event};

pub struct ConvertWorkerContext {
    pub store: Arc<dyn JobStore>,
    pub logger: JobLogger,
    pub arena: Arc<TempArena>,
    pub transcoder: Arc<dyn Transcode>,
    pub upload_tx: StageSender<UploadPayload>,
    pub bitrate_kbps: u32,
    /// Advisory; consulted before the CPU-heavy transcode step.
    pub cpu_throttle: CpuThrottle,
}

async fn process_one(ctx: &ConvertWorkerContext, payload: ConvertPayload) {
    let job_id = payload.job_id.clone();

    let job = match ctx.store.get(&job_id).await {
        Ok(j) => j,
        Err(_) => {
            event!(Level::WARN, "convert worker: job {job_id} missing, dropping");
            let _ = ctx.arena.delete_temp_file(&payload.video_path);
            return;
        }
    };
    if job.status.is_terminal() {
        let _ = ctx.arena.delete_temp_file(&payload.video_path);
        return;
    }

    let _ = ctx
        .store
        .update_status(&job_id, JobStatus::Converting, StatusUpdate::default())
        .await;
    ctx.logger.log(
        LogEvent::new(&job_id, LogEventType::ConversionStarted, "conversion started")
            .with_status(JobStatus::Converting),
    );

    let has_audio = ctx.transcoder.has_audio_stream(&payload.video_path).await.unwrap_or(false);
    if !has_audio {
        let _ = ctx.arena.delete_temp_file(&payload.video_path);
        fail_job(ctx, &job_id, "no audio stream present in source video").await;
        return;
    }

    let mp3_path = match ctx.arena.create_temp_file("mp3") {
        Ok(p) => p,
        Err(e) => {
            let _ = ctx.arena.delete_temp_file(&payload.video_path);
            fail_job(ctx, &job_id, &format!("temp arena failure: {e}")).await;
            return;
        }
    };

    ctx.cpu_throttle.wait_if_needed().await;

    let opts = TranscodeOpts {
        bitrate_kbps: ctx.bitrate_kbps,
    };
    if let Err(e) = ctx.transcoder.transcode(&payload.video_path, &mp3_path, opts).await {
        let _ = ctx.arena.delete_temp_file(&payload.video_path);
        let _ = ctx.arena.delete_temp_file(&mp3_path);
        fail_job(ctx, &job_id, &format!("transcode failed: {e}")).await;
        return;
    }

    match tokio::fs::metadata(&mp3_path).await {
        Ok(m) if m.len() > 0 => {}
        _ => {
            let _ = ctx.arena.delete_temp_file(&payload.video_path);
            let _ = ctx.arena.delete_temp_file(&mp3_path);
            fail_job(ctx, &job_id, "transcode produced no usable output").await;
            return;
        }
    }

    ctx.logger
        .log(LogEvent::new(&job_id, LogEventType::ConversionCompleted, "conversion completed"));

    let upload_payload = UploadPayload {
        job_id: job_id.clone(),
        mp3_path: mp3_path.clone(),
        video_path: Some(payload.video_path.clone()),
        video_hash: payload.video_hash,
    };
    if let Err(QueueError::Closed) = ctx.upload_tx.enqueue(upload_payload).await {
        event!(Level::DEBUG, "convert worker: upload queue closed at shutdown, releasing temp files");
        let _ = ctx.arena.delete_temp_file(&payload.video_path);
        let _ = ctx.arena.delete_temp_file(&mp3_path);
    }
}

async fn fail_job(ctx: &ConvertWorkerContext, job_id: &str, message: &str) {
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
    ctx: Arc<ConvertWorkerContext>,
    rx: StageReceiver<ConvertPayload>,
    shutdown: &tokio::sync::broadcast::Sender<()>,
) -> super::WorkerPool {
    super::spawn_pool(count, shutdown, move |id, mut shutdown_rx| {
        let ctx = ctx.clone();
        let rx = rx.clone();
        async move {
            event!(Level::DEBUG, "convert worker {id} started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        event!(Level::DEBUG, "convert worker {id} shutting down");
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
