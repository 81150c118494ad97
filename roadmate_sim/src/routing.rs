//! Simulated routing provider with fault injection.

use async_trait::async_trait;
use roadmate_core::geo;
use roadmate_env::{
    EnvError, GeoPoint, RawInstruction, RawLeg, RawRoute, RawStep, RoadmateContext,
    RoutingController, RoutingProvider,
};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::SimContext;

/// Canned routing provider: straight-line routes, split into fixed-length steps.
///
/// Latency is spent on the simulation clock, so a scenario sees the
/// reroute arrive only after the driver has advanced time far enough.
pub struct SimRoutingProvider {
    ctx: Arc<SimContext>,

    /// Distance between polyline vertices (meters)
    vertex_spacing_m: f64,

    /// Length of one manoeuvre (meters)
    step_length_m: f64,

    /// Requests still to fail
    failures: AtomicU32,

    latency_ms: AtomicU64,

    /// Total requests received
    requests: AtomicU32,
}

impl SimRoutingProvider {
    pub fn new(ctx: Arc<SimContext>) -> Self {
        Self {
            ctx,
            vertex_spacing_m: 25.0,
            step_length_m: 500.0,
            failures: AtomicU32::new(0),
            latency_ms: AtomicU64::new(200),
            requests: AtomicU32::new(0),
        }
    }

    /// Sets the step length of generated routes.
    pub fn with_step_length(mut self, meters: f64) -> Self {
        self.step_length_m = meters.max(self.vertex_spacing_m);
        self
    }

    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Builds the straight route the provider would return.
    pub fn straight_route(&self, origin: GeoPoint, destination: GeoPoint) -> RawRoute {
        let total_m = geo::distance_m(origin, destination);
        let segments = ((total_m / self.vertex_spacing_m).ceil() as usize).max(1);

        // Geometry in provider order: [lon, lat]
        let geometry: Vec<[f64; 2]> = (0..=segments)
            .map(|i| {
                let t = i as f64 / segments as f64;
                [
                    origin.lon + (destination.lon - origin.lon) * t,
                    origin.lat + (destination.lat - origin.lat) * t,
                ]
            })
            .collect();

        let per_step = ((self.step_length_m / self.vertex_spacing_m).round() as usize).max(1);
        let mut steps = Vec::new();
        let mut from = 0;
        while from < segments {
            let to = (from + per_step).min(segments);
            let length_m = total_m * (to - from) as f64 / segments as f64;
            let instruction = if to == segments {
                "Arrive at destination".to_string()
            } else {
                format!("Continue for {:.0} m", length_m)
            };
            steps.push(RawStep {
                instruction: Some(RawInstruction::Text(instruction)),
                distance: Some(length_m),
                from_index: Some(from),
                to_index: Some(to),
            });
            from = to;
        }

        RawRoute {
            legs: vec![RawLeg { steps }],
            geometry: vec![geometry],
            distance_m: Some(total_m),
            duration_s: Some(total_m / 13.9),
        }
    }
}

#[async_trait]
impl RoutingProvider for SimRoutingProvider {
    async fn route(&self, origin: GeoPoint, destination: GeoPoint) -> Result<RawRoute, EnvError> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            self.ctx.sleep(Duration::from_millis(latency)).await;
        }

        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(EnvError::unreachable("sim-router"));
        }
        if !origin.is_valid() || !destination.is_valid() {
            return Err(EnvError::routing("invalid waypoint"));
        }
        Ok(self.straight_route(origin, destination))
    }
}

impl RoutingController for SimRoutingProvider {
    fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    fn set_latency_ms(&self, latency_ms: u64) {
        self.latency_ms.store(latency_ms, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::settle;
    use roadmate_core::Route;

    fn lisbon() -> GeoPoint {
        GeoPoint::new(38.72, -9.14)
    }

    #[test]
    fn test_straight_route_shape() {
        let router = SimRoutingProvider::new(SimContext::shared(1));
        let destination = geo::offset_m(lisbon(), 0.0, 1200.0);
        let raw = router.straight_route(lisbon(), destination);

        let route = Route::from_raw(&raw).unwrap();
        assert_eq!(route.steps().len(), 3);
        assert_eq!(route.steps()[2].instruction, "Arrive at destination");
        assert!(geo::distance_m(route.polyline()[0], lisbon()) < 0.01);
        assert!(geo::distance_m(route.destination().unwrap(), destination) < 0.01);

        let total: f64 = route.steps().iter().map(|s| s.distance_m).sum();
        assert!((total - 1200.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_failure_injection_and_latency() {
        let ctx = SimContext::shared(1);
        let router = Arc::new(SimRoutingProvider::new(ctx.clone()));
        router.fail_next(1);
        router.set_latency_ms(0);

        let destination = geo::offset_m(lisbon(), 500.0, 0.0);
        assert!(router.route(lisbon(), destination).await.is_err());
        assert!(router.route(lisbon(), destination).await.is_ok());
        assert_eq!(router.requests(), 2);

        // With latency the answer waits for the virtual clock
        router.set_latency_ms(300);
        let pending = {
            let router = router.clone();
            tokio::spawn(async move { router.route(lisbon(), destination).await })
        };
        settle().await;
        assert!(!pending.is_finished());
        ctx.advance_time(Duration::from_millis(300));
        settle().await;
        assert!(pending.await.unwrap().is_ok());
    }
}
