//! RoadMate Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" boundary that lets the RoadMate core
//! run against a real device (tokio clock, HTTP routing, speaker) or inside
//! the deterministic drive simulator.
//!
//! Everything non-deterministic or external is intercepted here:
//! - Time (`now()`, `sleep()`)
//! - Background work (`spawn()` returning a cancellable [`TaskHandle`])
//! - Route computation ([`RoutingProvider`])
//! - Audible / haptic / voice cues ([`DeviceOutput`])
//!
//! # Example
//!
//! ```ignore
//! use roadmate_env::{RoadmateContext, TokioContext};
//!
//! let ctx = TokioContext::shared();
//! let mut beep = ctx.spawn("beep", async move {
//!     loop {
//!         tokio::time::sleep(Duration::from_millis(500)).await;
//!         // play tone
//!     }
//! });
//! beep.cancel();
//! ```

mod context;
mod error;
mod output;
mod routing;
mod task;
mod tokio_impl;
mod types;

pub use context::RoadmateContext;
pub use error::EnvError;
pub use output::{DeviceOutput, NullOutput};
pub use routing::{RoutingController, RoutingProvider};
pub use task::TaskHandle;
pub use tokio_impl::TokioContext;
pub use types::{
    Announcement, EntityId, GeoPoint, RawInstruction, RawLeg, RawRoute, RawStep, Tone, UserId,
};
