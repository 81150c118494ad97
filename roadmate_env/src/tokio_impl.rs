//! Production implementation of RoadmateContext using Tokio.

use crate::task::TaskHandle;
use crate::RoadmateContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Production context backed by the Tokio clock.
///
/// The monotonic clock is `tokio::time::Instant`, so tests running with a
/// paused runtime (`start_paused = true`) see virtual time here as well.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoadmateContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> TaskHandle
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        TaskHandle::from_join(name, tokio::spawn(future))
    }

    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_context_spawn_runs_task() {
        let ctx = TokioContext::new();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let handle = ctx.spawn("flag", async move {
            flag.store(true, Ordering::SeqCst);
        });

        ctx.sleep(Duration::from_millis(1)).await;
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(handle.name(), "flag");
    }

    #[test]
    fn test_tokio_context_seed() {
        let ctx = TokioContext::new();
        assert_eq!(ctx.seed(), 0);
    }
}
