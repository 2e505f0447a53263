//! The four bounded stage queues. Each is a multi-producer multi-consumer
//! FIFO channel with backpressure-by-waiting when full; readers block
//! until an item arrives or the queue is closed at shutdown.

use crate::model::{ConvertPayload, DownloadPayload, UploadPayload};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue is full")]
    QueueFull,
    #[error("queue is closed")]
    Closed,
}

/// Thin wrapper carrying both a sender and a generator for fail-fast
/// (`try_send`) admission, used by the Dispatcher's initial enqueue, and
/// blocking (`send`) admission, used by stage workers forwarding to the next
/// stage.
#[derive(Clone)]
pub struct StageSender<T> {
    inner: mpsc::Sender<T>,
}

impl<T> StageSender<T> {
    pub fn new(inner: mpsc::Sender<T>) -> StageSender<T> {
        StageSender { inner }
    }

    /// Fail-fast admission: used by the Dispatcher on first enqueue, so a
    /// full stage queue fails the submission immediately instead of
    /// blocking the caller.
    pub fn try_enqueue(&self, item: T) -> Result<(), QueueError> {
        self.inner.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Waiting admission: used by stage workers forwarding to the next
    /// stage, where blocking until a slot frees is the correct backpressure.
    pub async fn enqueue(&self, item: T) -> Result<(), QueueError> {
        self.inner.send(item).await.map_err(|_| QueueError::Closed)
    }
}

/// Multiple worker tasks in a stage's pool share one queue: the receiving
/// half is wrapped so it can be cloned and handed to each worker, with a
/// mutex serializing the actual `recv` call (tokio's mpsc receiver is
/// single-consumer by construction).
#[derive(Clone)]
pub struct StageReceiver<T> {
    inner: std::sync::Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
}

impl<T> StageReceiver<T> {
    pub fn new(inner: mpsc::Receiver<T>) -> StageReceiver<T> {
        StageReceiver {
            inner: std::sync::Arc::new(tokio::sync::Mutex::new(inner)),
        }
    }

    /// Blocks until an item arrives or the queue is closed, at which point
    /// `Closed` is returned.
    pub async fn dequeue(&self) -> Result<T, QueueError> {
        self.inner.lock().await.recv().await.ok_or(QueueError::Closed)
    }
}

pub struct PipelineQueues {
    pub download_tx: StageSender<DownloadPayload>,
    pub download_rx: StageReceiver<DownloadPayload>,
    pub youtube_tx: StageSender<DownloadPayload>,
    pub youtube_rx: StageReceiver<DownloadPayload>,
    pub convert_tx: StageSender<ConvertPayload>,
    pub convert_rx: StageReceiver<ConvertPayload>,
    pub upload_tx: StageSender<UploadPayload>,
    pub upload_rx: StageReceiver<UploadPayload>,
}

pub struct QueueCapacities {
    pub download: usize,
    pub youtube: usize,
    pub convert: usize,
    pub upload: usize,
}

impl Default for QueueCapacities {
    fn default() -> Self {
        QueueCapacities {
            download: 100,
            youtube: 100,
            convert: 1,
            upload: 10,
        }
    }
}

impl PipelineQueues {
    pub fn new(caps: &QueueCapacities) -> PipelineQueues {
        let (download_tx, download_rx) = mpsc::channel(caps.download.max(1));
        let (youtube_tx, youtube_rx) = mpsc::channel(caps.youtube.max(1));
        let (convert_tx, convert_rx) = mpsc::channel(caps.convert.max(1));
        let (upload_tx, upload_rx) = mpsc::channel(caps.upload.max(1));

        PipelineQueues {
            download_tx: StageSender::new(download_tx),
            download_rx: StageReceiver::new(download_rx),
            youtube_tx: StageSender::new(youtube_tx),
            youtube_rx: StageReceiver::new(youtube_rx),
            convert_tx: StageSender::new(convert_tx),
            convert_rx: StageReceiver::new(convert_rx),
            upload_tx: StageSender::new(upload_tx),
            upload_rx: StageReceiver::new(upload_rx),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_preserved() {
        let (tx, rx) = mpsc::channel(8);
        let tx = StageSender::new(tx);
        let rx = StageReceiver::new(rx);

        for i in 0..5 {
            tx.enqueue(i).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(rx.dequeue().await.unwrap(), i);
        }
    }

    #[tokio::test]
    async fn try_enqueue_fails_fast_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let tx = StageSender::new(tx);
        tx.try_enqueue(1).unwrap();
        assert!(matches!(tx.try_enqueue(2), Err(QueueError::QueueFull)));
    }

    #[tokio::test]
    async fn dequeue_reports_closed_after_drop() {
        let (tx, rx) = mpsc::channel::<i32>(1);
        let rx = StageReceiver::new(rx);
        drop(tx);
        assert!(matches!(rx.dequeue().await, Err(QueueError::Closed)));
    }
}
