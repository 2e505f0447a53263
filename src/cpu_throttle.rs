//! Advisory shared gauge of recent CPU usage; not a correctness mechanism.
//! Workers may call `wait_if_needed` between heavy steps; it never gates
//! forward progress beyond a short, bounded sleep.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Clone)]
pub struct CpuThrottle {
    recent_percent: Arc<AtomicU8>,
    high_watermark: u8,
}

impl CpuThrottle {
    pub fn new(high_watermark: u8) -> CpuThrottle {
        CpuThrottle {
            recent_percent: Arc::new(AtomicU8::new(0)),
            high_watermark,
        }
    }

    pub fn record(&self, percent: u8) {
        self.recent_percent.store(percent, Ordering::Relaxed);
    }

    /// Sleeps briefly if the recorded usage is above the watermark. Never
    /// blocks indefinitely and never returns an error: a misbehaving sensor
    /// can only cost a worker a few idle milliseconds, not correctness.
    pub async fn wait_if_needed(&self) {
        if self.recent_percent.load(Ordering::Relaxed) > self.high_watermark {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn does_not_sleep_below_watermark() {
        let throttle = CpuThrottle::new(90);
        throttle.record(10);
        let start = tokio::time::Instant::now();
        throttle.wait_if_needed().await;
        assert!(start.elapsed() < std::time::Duration::from_millis(10));
    }
}
