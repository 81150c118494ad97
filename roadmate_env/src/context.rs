//! Core environment context trait for RoadMate sessions.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

use crate::task::TaskHandle;

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the alerting and
/// navigation engines can run on a device (tokio) and inside the
/// deterministic drive simulator alike.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `tokio::spawn`
/// - **Simulation**: `SimContext` - virtual clock advanced by the scenario driver
///
/// # Determinism
///
/// Cooldowns and debounce windows are measured against [`now`](Self::now),
/// never against the wall clock, so a simulation controls them completely.
#[async_trait]
pub trait RoadmateContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for cooldown expiry and alert timestamps.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time (for logs and exported records).
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: resolves once the virtual clock passes the deadline
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task and returns a handle that cancels it.
    ///
    /// Dropping the handle also cancels the task.
    fn spawn<F>(&self, name: &str, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    /// In simulation, returns the master seed.
    fn seed(&self) -> u64;
}
