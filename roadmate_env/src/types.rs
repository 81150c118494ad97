//! Common types for the RoadMate environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn uuid_from_seed(seed: u64) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[0..8].copy_from_slice(&seed.to_le_bytes());
    bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
    Uuid::from_bytes(bytes)
}

/// Unique identifier for a hazard/camera entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Creates a new random EntityId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an EntityId from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates a deterministic EntityId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        Self(uuid_from_seed(seed))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Unique identifier for a user submitting community votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Creates a new random UserId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic UserId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        Self(uuid_from_seed(seed ^ 0x5553_4552))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A WGS84 point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Builds a point from a provider `[lon, lat]` pair.
    pub fn from_lon_lat(pair: [f64; 2]) -> Self {
        Self {
            lat: pair[1],
            lon: pair[0],
        }
    }

    /// True if both components are finite and within WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// A single audible cue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tone {
    pub frequency_hz: f64,
    pub duration_ms: u64,
    /// Linear volume in [0.0, 1.0]
    pub volume: f64,
}

/// Spoken announcements emitted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Announcement {
    /// Urgent: a hazard is right ahead
    HazardAhead { distance_m: f64 },
    /// Next manoeuvre after a step was completed (or after a reroute)
    NextInstruction { instruction: String, distance_m: f64 },
    /// Driver left the route; a new one is being computed
    Rerouting,
    /// A new route replaced the old one
    RouteRecalculated,
}

// ============================================================================
// RAW ROUTING PAYLOAD (validated by the core)
// ============================================================================

/// Route as returned by the routing provider, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRoute {
    #[serde(default)]
    pub legs: Vec<RawLeg>,

    /// Per-leg geometry, each a sequence of `[lon, lat]` pairs
    #[serde(default)]
    pub geometry: Vec<Vec<[f64; 2]>>,

    /// Total distance in meters, if reported
    #[serde(default)]
    pub distance_m: Option<f64>,

    /// Total duration in seconds, if reported
    #[serde(default)]
    pub duration_s: Option<f64>,
}

/// One leg of a raw route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLeg {
    #[serde(default)]
    pub steps: Vec<RawStep>,
}

/// One manoeuvre of a raw leg. Indices point into the leg's geometry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStep {
    #[serde(default)]
    pub instruction: Option<RawInstruction>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub from_index: Option<usize>,
    #[serde(default)]
    pub to_index: Option<usize>,
}

/// Providers send the instruction either as a bare string or as an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawInstruction {
    Text(String),
    Detailed {
        #[serde(default)]
        text: Option<String>,
    },
}

impl RawInstruction {
    /// Returns the instruction text, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            RawInstruction::Text(text) => Some(text.as_str()),
            RawInstruction::Detailed { text } => text.as_deref(),
        }
    }
}
