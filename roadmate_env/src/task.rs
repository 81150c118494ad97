//! Cancellable handles for spawned background tasks.

use tokio::task::{AbortHandle, JoinHandle};

/// Handle to a task spawned through a [`RoadmateContext`](crate::RoadmateContext).
///
/// Cancellation is synchronous and total: after [`cancel`](Self::cancel)
/// returns, the task will not be polled again. Dropping the handle cancels
/// the task as well, so a handle that goes out of scope never leaves a
/// timer running.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    abort: Option<AbortHandle>,
    cancelled: bool,
}

impl TaskHandle {
    /// Wraps a tokio join handle. The join handle itself is detached.
    pub fn from_join(name: &str, handle: JoinHandle<()>) -> Self {
        Self {
            name: name.to_string(),
            abort: Some(handle.abort_handle()),
            cancelled: false,
        }
    }

    /// A handle with no task behind it. Cancelling it is a no-op.
    pub fn detached(name: &str) -> Self {
        Self {
            name: name.to_string(),
            abort: None,
            cancelled: false,
        }
    }

    /// Cancels the task. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
        self.cancelled = true;
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Returns true if the task ran to completion or was cancelled.
    pub fn is_finished(&self) -> bool {
        match &self.abort {
            Some(abort) => abort.is_finished(),
            None => true,
        }
    }

    /// Name given at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticking() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let join = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let mut handle = TaskHandle::from_join("ticker", join);

        tokio::time::sleep(Duration::from_millis(350)).await;
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 3);

        handle.cancel();
        assert!(handle.is_cancelled());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let join = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(100)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        drop(TaskHandle::from_join("ticker", join));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_detached_handle() {
        let mut handle = TaskHandle::detached("noop");
        assert!(handle.is_finished());
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(handle.name(), "noop");
    }
}
