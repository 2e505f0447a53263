//! Four stage worker pools (Download, Youtube, Convert, Upload). Each pool
//! drains its queue with bounded parallelism, executes its stage, and
//! forwards the payload to the next stage or marks the job terminal, each
//! task running a `tokio::select!` against a broadcast shutdown receiver
//! so it only stops picking up new work, never interrupts work in flight.

pub mod convert;
pub mod download;
pub mod upload;
pub mod youtube;

/// A running pool of worker tasks for one stage. Dropping or awaiting
/// `join` after the queue closes and the shutdown signal fires drains
/// cleanly: each task keeps pulling until its queue returns `Closed`.
pub struct WorkerPool {
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(handles: Vec<tokio::task::JoinHandle<()>>) -> WorkerPool {
        WorkerPool { handles }
    }

    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Spawns `count` identical worker tasks, each running `body` until its
/// shutdown receiver fires. `body` owns its own select loop against the
/// stage queue so that a worker mid-flight on a payload is not interrupted;
/// shutdown only stops it from picking up a *new* one.
pub fn spawn_pool<F, Fut>(
    count: usize,
    shutdown: &tokio::sync::broadcast::Sender<()>,
    make_body: F,
) -> WorkerPool
where
    F: Fn(usize, tokio::sync::broadcast::Receiver<()>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let mut handles = Vec::with_capacity(count);
    for id in 0..count {
        let rx = shutdown.subscribe();
        handles.push(tokio::spawn(make_body(id, rx)));
    }
    WorkerPool::new(handles)
}
