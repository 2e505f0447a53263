//! The process-lifetime owner of the four worker pools, RecoveryLoop,
//! JanitorLoop, and JobLogger, held as a single value — HTTP handlers hold
//! a clone of this value (or a narrower sub-interface) rather than
//! reaching into process-wide globals.

use crate::config::Args;
use crate::cpu_throttle::CpuThrottle;
use crate::dispatcher::Dispatcher;
use crate::error::StoreError;
use crate::janitor::JanitorLoop;
use crate::logger::{JobLogger, LogSink, SqliteLogSink};
use crate::model::Job;
use crate::objectstore::{LocalObjectStore, ObjectStore};
use crate::queues::{PipelineQueues, QueueCapacities};
use crate::recovery::RecoveryLoop;
use crate::store::{JobStore, SqliteJobStore};
use crate::tempfile_arena::TempArena;
use crate::transcoder::{FfmpegTranscoder, Transcode};
use crate::workers::{WorkerPool, convert, download, upload, youtube};
use crate::ytresolve::{YoutubeResolver, YtDlpResolver};
use std::sync::Arc;
use tracing::{Level, event};

/// Everything the Orchestrator started that must be joined/drained at
/// shutdown, kept separate from the narrow `Dispatcher`/store handles that
/// HTTP handlers need so those handlers don't have to know about worker
/// pool internals.
pub struct Orchestrator {
    pub store: Arc<dyn JobStore>,
    pub dispatcher: Dispatcher,
    logger: JobLogger,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    download_pool: WorkerPool,
    youtube_pool: WorkerPool,
    convert_pool: WorkerPool,
    upload_pool: WorkerPool,
    recovery_handle: tokio::task::JoinHandle<()>,
    janitor_handle: tokio::task::JoinHandle<()>,
    logger_handle: tokio::task::JoinHandle<()>,
}

impl Orchestrator {
    pub async fn start(args: &Args) -> anyhow::Result<Orchestrator> {
        let sqlite_store = SqliteJobStore::connect(&args.database_url).await?;
        let log_sink: Arc<dyn LogSink> = Arc::new(SqliteLogSink::new(sqlite_store.pool().clone()));
        let store: Arc<dyn JobStore> = Arc::new(sqlite_store);
        let (logger, logger_handle) = JobLogger::spawn(log_sink.clone());

        let arena = Arc::new(TempArena::new(&args.tmp_dir, args.max_temp_size_bytes)?);
        let object_store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(&args.artifact_dir)?);
        let transcoder: Arc<dyn Transcode> = Arc::new(FfmpegTranscoder::new(&args.ffmpeg_path));
        let resolver: Arc<dyn YoutubeResolver> = Arc::new(YtDlpResolver::new(&args.ytdlp_path));
        let http = reqwest::Client::builder().build()?;

        let caps = QueueCapacities {
            download: args.download_queue_capacity,
            youtube: args.youtube_queue_capacity,
            convert: args.resolved_convert_queue_capacity(),
            upload: args.upload_queue_capacity,
        };
        let queues = PipelineQueues::new(&caps);

        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        let dispatcher = Dispatcher::new(
            store.clone(),
            logger.clone(),
            queues.download_tx.clone(),
            queues.youtube_tx.clone(),
        );

        let download_ctx = Arc::new(download::DownloadWorkerContext {
            store: store.clone(),
            logger: logger.clone(),
            arena: arena.clone(),
            object_store: object_store.clone(),
            http,
            convert_tx: queues.convert_tx.clone(),
            max_file_size_bytes: args.max_file_size_bytes,
            allowed_content_types: args.allowed_file_types.clone(),
        });
        let download_pool = download::spawn(
            args.max_concurrent_downloads,
            download_ctx,
            queues.download_rx,
            &shutdown_tx,
        );

        let youtube_ctx = Arc::new(youtube::YoutubeWorkerContext {
            store: store.clone(),
            logger: logger.clone(),
            arena: arena.clone(),
            resolver,
            upload_tx: queues.upload_tx.clone(),
            max_retry_attempts: args.youtube_max_retry_attempts,
            retry_delay: std::time::Duration::from_secs(args.youtube_retry_delay_seconds),
        });
        let youtube_pool = youtube::spawn(
            args.max_concurrent_youtube_downloads,
            youtube_ctx,
            queues.youtube_rx,
            &shutdown_tx,
        );

        let convert_ctx = Arc::new(convert::ConvertWorkerContext {
            store: store.clone(),
            logger: logger.clone(),
            arena: arena.clone(),
            transcoder,
            upload_tx: queues.upload_tx.clone(),
            bitrate_kbps: 128,
            cpu_throttle: CpuThrottle::new(90),
        });
        let convert_pool = convert::spawn(
            args.resolved_convert_workers(),
            convert_ctx,
            queues.convert_rx,
            &shutdown_tx,
        );

        let upload_ctx = Arc::new(upload::UploadWorkerContext {
            store: store.clone(),
            logger: logger.clone(),
            arena: arena.clone(),
            object_store: object_store.clone(),
        });
        let upload_pool = upload::spawn(
            args.max_concurrent_uploads,
            upload_ctx,
            queues.upload_rx,
            &shutdown_tx,
        );

        let recovery = RecoveryLoop::new(
            store.clone(),
            logger.clone(),
            dispatcher.clone(),
            std::time::Duration::from_secs(600),
            chrono::Duration::minutes(args.stale_job_threshold_minutes),
            args.job_retry_limit,
        );
        let recovery_handle = tokio::spawn(recovery.run(shutdown_tx.subscribe()));

        // Artifact dedup cache lifetime: base expiration plus the sliding
        // extension window before the janitor considers it stale.
        let artifact_ttl = chrono::Duration::days(args.caching_default_expiration_days)
            + chrono::Duration::hours(args.caching_sliding_expiration_hours);
        let janitor = JanitorLoop::new(
            store.clone(),
            logger.clone(),
            log_sink,
            arena,
            object_store,
            artifact_ttl,
            chrono::Duration::days(30),
        );
        let janitor_handle = tokio::spawn(janitor.run(shutdown_tx.subscribe()));

        event!(Level::INFO, "orchestrator started all worker pools and background loops");

        Ok(Orchestrator {
            store,
            dispatcher,
            logger,
            shutdown_tx,
            download_pool,
            youtube_pool,
            convert_pool,
            upload_pool,
            recovery_handle,
            janitor_handle,
            logger_handle,
        })
    }

    /// Creates a job (assigning an id, status=Pending) and hands it to the
    /// Dispatcher.
    pub async fn submit(&self, video_url: String, batch_id: Option<String>) -> Result<Job, StoreError> {
        let job = self.store.create(Job::new(video_url, batch_id)).await?;
        self.dispatcher.dispatch(&job.id).await;
        self.store.get(&job.id).await
    }

    pub async fn status(&self, job_id: &str) -> Result<Job, StoreError> {
        self.store.get(job_id).await
    }

    /// At shutdown: close queues for new producers, let workers drain their
    /// current payload, then flush the logger and release pool handles.
    pub async fn shutdown(self) {
        event!(Level::INFO, "orchestrator shutting down gracefully");
        drop(self.shutdown_tx);

        self.download_pool.join().await;
        self.youtube_pool.join().await;
        self.convert_pool.join().await;
        self.upload_pool.join().await;

        let _ = self.recovery_handle.await;
        let _ = self.janitor_handle.await;

        self.logger.shutdown().await;
        let _ = self.logger_handle.await;
    }
}
