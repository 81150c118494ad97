//! RoadMate Deterministic Drive Simulation
//!
//! Runs a complete `DriveSession` against a scripted vehicle, a virtual
//! clock and in-process stand-ins for the routing service and the device.
//!
//! # Core Principle: Nothing Real Underneath
//!
//! Every source of non-determinism is replaced:
//! - **Time**: a virtual clock that only moves when the runner advances it
//! - **Position**: an oracle that replays a drive plan with seeded GPS jitter
//! - **Routing**: straight-line routes with injectable latency and failures
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (Virtual Clock + Seeded RNG)              │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                         │                           │
//! │  ┌────▼─────────┐   fixes   ┌───▼───────────────┐           │
//! │  │ DriveOracle  │──────────►│   DriveSession    │           │
//! │  │ (true path)  │           │ alerts + route    │           │
//! │  └──────────────┘           └───┬──────────┬────┘           │
//! │                                 │          │                │
//! │                    ┌────────────▼──┐   ┌───▼─────────────┐  │
//! │                    │ SimRouting    │   │ RecordingOutput │  │
//! │                    │ Provider      │   │ (tones, voice)  │  │
//! │                    └───────────────┘   └─────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use roadmate_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::LoopBack);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod oracle;
mod output;
mod routing;
mod runner;
pub mod scenarios;

pub use context::{settle, SimContext};
pub use exporter::{SimEvent, SimExport, SimFrame};
pub use oracle::{DriveOracle, Jitter};
pub use output::{OutputEvent, RecordingOutput};
pub use routing::SimRoutingProvider;
pub use runner::{RunError, ScenarioMetrics, ScenarioResult, ScenarioRunner};
