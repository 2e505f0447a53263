//! End-to-end tests driving the Dispatcher against the stage queues with an
//! in-memory JobStore: dedup, invalid-url rejection, and queue overload.
//! The happy-path download → convert → upload walk and the
//! ffmpeg/yt-dlp-backed transcode-failure scenario are exercised per-stage
//! in `workers/*.rs` instead, since reproducing them here would just mean
//! re-stubbing the same transcoder and object store those modules already
//! stub.

use crate::dispatcher::Dispatcher;
use crate::logger::JobLogger;
use crate::model::{Job, JobStatus, MediaArtifact};
use crate::queues::{PipelineQueues, QueueCapacities};
use crate::store::JobStore;
use crate::test_support::{InMemoryStore, NullSink};
use std::sync::Arc;

fn make_dispatcher(store: Arc<dyn JobStore>, queues: &PipelineQueues) -> (Dispatcher, JobLogger, tokio::task::JoinHandle<()>) {
    let (logger, handle) = JobLogger::spawn(Arc::new(NullSink));
    let dispatcher = Dispatcher::new(
        store,
        logger.clone(),
        queues.download_tx.clone(),
        queues.youtube_tx.clone(),
    );
    (dispatcher, logger, handle)
}

#[tokio::test]
async fn happy_path_valid_url_reaches_download_queue() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new());
    let queues = PipelineQueues::new(&QueueCapacities::default());
    let (dispatcher, logger, handle) = make_dispatcher(store.clone(), &queues);

    let job = store.create(Job::new("https://example.com/clip.mp4".to_string(), None)).await.unwrap();
    dispatcher.dispatch(&job.id).await;

    let payload = queues.download_rx.dequeue().await.unwrap();
    assert_eq!(payload.job_id, job.id);

    let reloaded = store.get(&job.id).await.unwrap();
    assert_eq!(reloaded.status, JobStatus::Pending);

    logger.shutdown().await;
    let _ = handle.await;
}

#[tokio::test]
async fn cached_url_hash_completes_job_without_touching_queues() {
    let store = Arc::new(InMemoryStore::new());
    let video_url = "https://example.com/seen-before.mp4".to_string();
    let url_hash = {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(video_url.as_bytes());
        format!("{:x}", hasher.finalize())
    };
    store.seed_artifact(
        &url_hash,
        MediaArtifact {
            video_hash: url_hash.clone(),
            video_url: video_url.clone(),
            audio_url: "local://audio/cached.mp3".to_string(),
            file_size_bytes: 1024,
            created_at: chrono::Utc::now(),
        },
    );
    let store: Arc<dyn JobStore> = store;
    let queues = PipelineQueues::new(&QueueCapacities::default());
    let (dispatcher, logger, handle) = make_dispatcher(store.clone(), &queues);

    let job = store.create(Job::new(video_url, None)).await.unwrap();
    dispatcher.dispatch(&job.id).await;

    let reloaded = store.get(&job.id).await.unwrap();
    assert_eq!(reloaded.status, JobStatus::Completed);
    assert_eq!(reloaded.mp3_url.as_deref(), Some("local://audio/cached.mp3"));

    logger.shutdown().await;
    let _ = handle.await;
}

#[tokio::test]
async fn invalid_url_terminates_job_failed_without_enqueueing() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new());
    let queues = PipelineQueues::new(&QueueCapacities::default());
    let (dispatcher, logger, handle) = make_dispatcher(store.clone(), &queues);

    let job = store.create(Job::new("ftp://unsupported/scheme.mp4".to_string(), None)).await.unwrap();
    dispatcher.dispatch(&job.id).await;

    let reloaded = store.get(&job.id).await.unwrap();
    assert_eq!(reloaded.status, JobStatus::Failed);
    assert!(reloaded.error_message.unwrap().contains("invalid"));

    logger.shutdown().await;
    let _ = handle.await;
}

#[tokio::test]
async fn full_download_queue_overloads_job_to_failed() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::new());
    let caps = QueueCapacities {
        download: 1,
        ..QueueCapacities::default()
    };
    let queues = PipelineQueues::new(&caps);
    let (dispatcher, logger, handle) = make_dispatcher(store.clone(), &queues);

    let filler = store.create(Job::new("https://example.com/first.mp4".to_string(), None)).await.unwrap();
    dispatcher.dispatch(&filler.id).await;

    let overflow = store.create(Job::new("https://example.com/second.mp4".to_string(), None)).await.unwrap();
    dispatcher.dispatch(&overflow.id).await;

    let reloaded = store.get(&overflow.id).await.unwrap();
    assert_eq!(reloaded.status, JobStatus::Failed);
    assert!(reloaded.error_message.unwrap().contains("overloaded"));

    logger.shutdown().await;
    let _ = handle.await;
}
