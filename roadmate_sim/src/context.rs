//! Simulation context implementing RoadmateContext for deterministic testing.

use async_trait::async_trait;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use roadmate_env::{RoadmateContext, TaskHandle};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// Simulation context backed by a virtual clock and a seeded RNG.
///
/// This implements `RoadmateContext` using:
/// - A virtual clock that only moves when the scenario driver advances it
/// - Sleeps that resolve once the virtual clock passes their deadline
/// - `tokio::spawn` on the driver's current-thread runtime
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time; sleepers watch it
    clock: watch::Sender<Duration>,

    /// Deterministic RNG for derived seeds
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Epoch offset (virtual time 0 maps to this wall-clock time)
    epoch: SystemTime,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        let (clock, _) = watch::channel(Duration::ZERO);
        Self {
            seed,
            clock,
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: UNIX_EPOCH + Duration::from_secs(1704067200), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration, waking due sleepers.
    pub fn advance_time(&self, duration: Duration) {
        self.clock.send_modify(|now| *now += duration);
    }

    /// Sets the virtual time to a specific value (never backwards).
    pub fn set_time(&self, time: Duration) {
        self.clock.send_modify(|now| *now = (*now).max(time));
    }

    /// Current virtual time in milliseconds (used as fix timestamps).
    pub fn time_ms(&self) -> u64 {
        self.now().as_millis() as u64
    }

    /// Derives a sub-seed so independent generators do not share a stream.
    pub fn derive_seed(&self, extension: u64) -> u64 {
        use rand::RngCore;
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.next_u64() ^ self.seed.wrapping_mul(0x517cc1b727220a95) ^ extension
    }
}

#[async_trait]
impl RoadmateContext for SimContext {
    fn now(&self) -> Duration {
        *self.clock.borrow()
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        let mut rx = self.clock.subscribe();
        while *rx.borrow_and_update() < deadline {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn spawn<F>(&self, name: &str, future: F) -> TaskHandle
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        TaskHandle::from_join(name, tokio::spawn(future))
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

/// Lets every task woken by a clock advance run until it blocks again.
///
/// Only meaningful on a current-thread runtime, where a yield puts the
/// caller behind every task that is already ready.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_sim_context_time() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), Duration::ZERO);

        ctx.advance_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_secs(1));

        ctx.advance_time(Duration::from_millis(500));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
        assert_eq!(ctx.time_ms(), 1500);

        ctx.set_time(Duration::from_secs(1));
        assert_eq!(ctx.now(), Duration::from_millis(1500));
    }

    #[test]
    fn test_sim_context_seed() {
        let ctx = SimContext::new(12345);
        assert_eq!(ctx.seed(), 12345);

        let a = SimContext::new(7).derive_seed(1);
        let b = SimContext::new(7).derive_seed(1);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_sleep_waits_for_virtual_clock() {
        let ctx = SimContext::shared(1);
        let ticks = Arc::new(AtomicU32::new(0));

        let clock = ctx.clone();
        let counter = ticks.clone();
        let _handle = ctx.spawn("ticker", async move {
            loop {
                clock.sleep(Duration::from_millis(500)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        settle().await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        for _ in 0..4 {
            ctx.advance_time(Duration::from_millis(250));
            settle().await;
        }
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_task_stops() {
        let ctx = SimContext::shared(1);
        let ticks = Arc::new(AtomicU32::new(0));

        let clock = ctx.clone();
        let counter = ticks.clone();
        let mut handle = ctx.spawn("ticker", async move {
            loop {
                clock.sleep(Duration::from_millis(100)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        settle().await;
        ctx.advance_time(Duration::from_millis(100));
        settle().await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        handle.cancel();
        ctx.advance_time(Duration::from_millis(1000));
        settle().await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
