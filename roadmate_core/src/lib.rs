//! RoadMate Core - Proximity Detection and Alerting for Driver Assistance
//!
//! This library solves four problems a driver-assistance app runs into:
//! 1. **Nearest-hazard lookups**: fixed-cell geographic bucketing instead of a full scan
//! 2. **Alert flicker**: tiered beeps with re-arm rules plus enter/exit hysteresis and cooldowns
//! 3. **Route drift**: step progression and off-route detection against the route polyline
//! 4. **Unreliable reports**: majority consensus over community votes, persisted deactivations

pub mod config;
pub mod geo;
pub mod roadmate_alert;
pub mod roadmate_consensus;
pub mod roadmate_import;
pub mod roadmate_query;
pub mod roadmate_route;
pub mod roadmate_session;
pub mod roadmate_space;
pub mod roadmate_store;

// Re-export key types for convenience
pub use config::{ConfigError, RoadmateConfig};
pub use roadmate_alert::{ActiveAlert, AlertConfig, AlertPhase, AlertScheduler, BeepTier};
pub use roadmate_consensus::{
    ConsensusConfig, ConsensusVerifier, RejectReason, Verdict, VerificationOutcome,
};
pub use roadmate_import::{load_dataset, parse_dataset, ImportOptions, ImportReport};
pub use roadmate_query::{EntityFilter, NearbyEntity, ProximityQueryService, QueryError};
pub use roadmate_route::{Route, RouteConfig, RouteEvent, RouteStep, RouteTracker};
pub use roadmate_session::{
    DriveSession, FixOutcome, PositionFix, PositionReport, SessionConfig, SessionError,
    SessionMetrics,
};
pub use roadmate_space::{Entity, EntityKind, IndexConfig, IndexError, SpatialIndex};
pub use roadmate_store::{
    DeactivationStore, MemoryDeactivationStore, SledDeactivationStore, StoreError,
};
