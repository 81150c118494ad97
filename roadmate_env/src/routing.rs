//! Routing provider abstraction.

use async_trait::async_trait;

use crate::error::EnvError;
use crate::types::{GeoPoint, RawRoute};

/// Abstraction for the external route computation service.
///
/// # Implementations
///
/// - **Production**: an HTTP client for the routing API
/// - **Simulation**: canned routes with configurable latency and failures
///
/// # Contract
///
/// Only the structural shape of the answer is relied upon
/// (legs → steps → coordinate ranges, plus per-leg geometry). The payload
/// is validated by the core before it is used.
#[async_trait]
pub trait RoutingProvider: Send + Sync + 'static {
    /// Computes a route from `origin` to `destination`.
    ///
    /// # Returns
    /// * `Ok(RawRoute)` - The provider's answer, not yet validated
    /// * `Err(EnvError::Routing)` - Provider rejected the request
    /// * `Err(EnvError::Unreachable)` - Provider could not be contacted
    async fn route(&self, origin: GeoPoint, destination: GeoPoint) -> Result<RawRoute, EnvError>;
}

/// Fault injection for routing providers in simulation.
pub trait RoutingController: Send + Sync {
    /// Makes the next `count` requests fail.
    fn fail_next(&self, count: u32);

    /// Sets the simulated response latency.
    fn set_latency_ms(&self, latency_ms: u64);
}
