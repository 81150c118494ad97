//! The "ROUTE" Engine - step progression and off-route detection
//!
//! A [`Route`] is built once from the routing provider's loosely typed
//! payload and is immutable afterwards; rerouting swaps the whole route.

use roadmate_env::{GeoPoint, RawRoute};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::geo;

/// Instruction used when the provider sends none.
pub const DEFAULT_INSTRUCTION: &str = "Continue";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Advance once this close to the end of the current step
    pub step_arrival_m: f64,

    /// Off-route beyond this distance from the polyline
    pub off_route_m: f64,

    /// Polylines longer than this are sampled
    pub sampling_threshold_points: usize,

    /// Vertex stride when sampling
    pub sampling_stride: usize,

    /// Stop scanning once a segment is this close
    pub early_exit_m: f64,

    /// Wait before asking for a new route
    pub reroute_debounce_secs: u64,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            step_arrival_m: 50.0,
            off_route_m: 100.0,
            sampling_threshold_points: 1000,
            sampling_stride: 5,
            early_exit_m: 20.0,
            reroute_debounce_secs: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteError {
    #[error("Route has no geometry")]
    EmptyGeometry,

    #[error("Invalid route coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },
}

// ============================================================================
// ROUTE MODEL
// ============================================================================

/// One manoeuvre with the coordinates it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    pub instruction: String,
    pub distance_m: f64,
    pub coordinates: Vec<GeoPoint>,
}

impl RouteStep {
    /// Last coordinate of the step. Steps are never empty.
    pub fn end(&self) -> Option<GeoPoint> {
        self.coordinates.last().copied()
    }
}

/// A validated route: ordered steps plus the flattened polyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    steps: Vec<RouteStep>,
    polyline: Vec<GeoPoint>,
    distance_m: Option<f64>,
    duration_s: Option<f64>,
}

fn to_point(pair: [f64; 2]) -> Result<GeoPoint, RouteError> {
    let point = GeoPoint::from_lon_lat(pair);
    if point.is_valid() {
        Ok(point)
    } else {
        Err(RouteError::InvalidCoordinate {
            lat: point.lat,
            lon: point.lon,
        })
    }
}

impl Route {
    /// Builds a route from explicit steps and polyline.
    pub fn new(steps: Vec<RouteStep>, polyline: Vec<GeoPoint>) -> Result<Self, RouteError> {
        if polyline.is_empty() {
            return Err(RouteError::EmptyGeometry);
        }
        if let Some(bad) = polyline
            .iter()
            .chain(steps.iter().flat_map(|s| s.coordinates.iter()))
            .find(|p| !p.is_valid())
        {
            return Err(RouteError::InvalidCoordinate {
                lat: bad.lat,
                lon: bad.lon,
            });
        }
        let steps = steps.into_iter().filter(|s| !s.coordinates.is_empty()).collect();
        Ok(Self {
            steps,
            polyline,
            distance_m: None,
            duration_s: None,
        })
    }

    /// Validates a provider payload.
    ///
    /// Each step's coordinates are sliced out of its own leg's geometry
    /// using `from_index..=to_index`, clamped to the leg bounds. Steps whose
    /// slice is empty are skipped. All leg geometries, in order, form the
    /// polyline.
    pub fn from_raw(raw: &RawRoute) -> Result<Self, RouteError> {
        let mut steps = Vec::new();

        for (leg_index, leg) in raw.legs.iter().enumerate() {
            let Some(leg_geometry) = raw.geometry.get(leg_index) else {
                debug!("Missing geometry for leg {}", leg_index);
                continue;
            };
            if leg_geometry.is_empty() {
                continue;
            }
            let last = leg_geometry.len() - 1;

            for step in &leg.steps {
                let from = step.from_index.unwrap_or(0);
                let to = step.to_index.unwrap_or(last).min(last);
                if from > to {
                    debug!("Skipping step with empty coordinates");
                    continue;
                }

                let coordinates = leg_geometry[from..=to]
                    .iter()
                    .map(|pair| to_point(*pair))
                    .collect::<Result<Vec<_>, _>>()?;

                let instruction = step
                    .instruction
                    .as_ref()
                    .and_then(|i| i.text())
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or(DEFAULT_INSTRUCTION)
                    .to_string();

                steps.push(RouteStep {
                    instruction,
                    distance_m: step.distance.filter(|d| d.is_finite()).unwrap_or(0.0),
                    coordinates,
                });
            }
        }

        let polyline = raw
            .geometry
            .iter()
            .flatten()
            .map(|pair| to_point(*pair))
            .collect::<Result<Vec<_>, _>>()?;

        let mut route = Self::new(steps, polyline)?;
        route.distance_m = raw.distance_m;
        route.duration_s = raw.duration_s;
        Ok(route)
    }

    pub fn steps(&self) -> &[RouteStep] {
        &self.steps
    }

    pub fn polyline(&self) -> &[GeoPoint] {
        &self.polyline
    }

    pub fn distance_m(&self) -> Option<f64> {
        self.distance_m
    }

    pub fn duration_s(&self) -> Option<f64> {
        self.duration_s
    }

    /// Destination is the last polyline point.
    pub fn destination(&self) -> Option<GeoPoint> {
        self.polyline.last().copied()
    }
}

// ============================================================================
// TRACKER
// ============================================================================

/// Something the tracker noticed while processing a position.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteEvent {
    /// Moved to step `index`; its instruction is now current
    StepAdvanced {
        index: usize,
        instruction: String,
        distance_m: f64,
    },
    /// Distance to the route exceeded the tolerance
    OffRouteEntered { distance_m: f64 },
    /// Back within tolerance
    BackOnRoute { distance_m: f64 },
}

/// Follows the driver along one route at a time.
pub struct RouteTracker {
    route: Route,
    current_step: usize,
    off_route: bool,
    last_route_distance: Option<f64>,
    config: RouteConfig,
}

impl RouteTracker {
    pub fn new(route: Route, config: RouteConfig) -> Self {
        Self {
            route,
            current_step: 0,
            off_route: false,
            last_route_distance: None,
            config,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    pub fn current_step_index(&self) -> usize {
        self.current_step
    }

    pub fn current_step(&self) -> Option<&RouteStep> {
        self.route.steps.get(self.current_step)
    }

    pub fn is_off_route(&self) -> bool {
        self.off_route
    }

    /// Minimum distance to the polyline measured on the last update.
    pub fn last_route_distance(&self) -> Option<f64> {
        self.last_route_distance
    }

    /// Distance from `position` to the end of the current step.
    pub fn distance_to_next_step(&self, position: GeoPoint) -> Option<f64> {
        let end = self.current_step()?.end()?;
        Some(geo::distance_m(position, end))
    }

    /// Swaps in a new route atomically and restarts at step 0.
    pub fn replace_route(&mut self, route: Route) {
        info!(
            "Route replaced: {} steps, {} points",
            route.steps.len(),
            route.polyline.len()
        );
        self.route = route;
        self.current_step = 0;
        self.off_route = false;
        self.last_route_distance = None;
    }

    /// Forgets the off-route state so the next update can detect it again.
    pub fn clear_off_route(&mut self) {
        self.off_route = false;
    }

    /// Processes one position.
    pub fn update(&mut self, position: GeoPoint) -> Vec<RouteEvent> {
        let mut events = Vec::new();

        // Step 1: Step progression
        let last_index = self.route.steps.len().saturating_sub(1);
        if self.current_step < last_index {
            if let Some(d) = self.distance_to_next_step(position) {
                if d < self.config.step_arrival_m {
                    self.current_step += 1;
                    let next = &self.route.steps[self.current_step];
                    info!("Advanced to step {}: {}", self.current_step, next.instruction);
                    events.push(RouteEvent::StepAdvanced {
                        index: self.current_step,
                        instruction: next.instruction.clone(),
                        distance_m: next.distance_m,
                    });
                }
            }
        }

        // Step 2: Deviation
        let distance_m = self.distance_to_route(position);
        self.last_route_distance = Some(distance_m);

        if distance_m > self.config.off_route_m && !self.off_route {
            self.off_route = true;
            info!("Off route ({:.0}m from polyline)", distance_m);
            events.push(RouteEvent::OffRouteEntered { distance_m });
        } else if distance_m <= self.config.off_route_m && self.off_route {
            self.off_route = false;
            info!("Back on route ({:.0}m)", distance_m);
            events.push(RouteEvent::BackOnRoute { distance_m });
        }

        events
    }

    /// Minimum distance to the polyline segments, in meters.
    ///
    /// Long polylines are sampled every `sampling_stride` vertices (the
    /// final vertex is always kept); the scan stops early once a segment is
    /// closer than `early_exit_m`.
    pub fn distance_to_route(&self, position: GeoPoint) -> f64 {
        let polyline = &self.route.polyline;
        let stride = if polyline.len() > self.config.sampling_threshold_points {
            self.config.sampling_stride.max(1)
        } else {
            1
        };

        let mut sampled: Vec<GeoPoint> = polyline.iter().step_by(stride).copied().collect();
        if let Some(&last) = polyline.last() {
            if (polyline.len() - 1) % stride != 0 {
                sampled.push(last);
            }
        }

        if sampled.len() == 1 {
            return geo::distance_m(position, sampled[0]);
        }

        let mut best = f64::INFINITY;
        for pair in sampled.windows(2) {
            let d = geo::distance_to_segment_m(position, pair[0], pair[1]);
            if d < best {
                best = d;
                if best < self.config.early_exit_m {
                    break;
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use roadmate_env::{RawInstruction, RawLeg, RawStep};

    fn step(instruction: &str, coords: &[(f64, f64)]) -> RouteStep {
        RouteStep {
            instruction: instruction.to_string(),
            distance_m: 100.0,
            coordinates: coords.iter().map(|(lat, lon)| GeoPoint::new(*lat, *lon)).collect(),
        }
    }

    fn straight_route() -> Route {
        let polyline = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0)];
        Route::new(vec![step("Head east", &[(0.0, 0.0), (0.0, 1.0)])], polyline).unwrap()
    }

    fn raw_step(text: Option<&str>, from: Option<usize>, to: Option<usize>) -> RawStep {
        RawStep {
            instruction: text.map(|t| RawInstruction::Text(t.to_string())),
            distance: Some(250.0),
            from_index: from,
            to_index: to,
        }
    }

    #[test]
    fn test_off_route_straight_line() {
        let mut tracker = RouteTracker::new(straight_route(), RouteConfig::default());

        let off = geo::offset_m(GeoPoint::new(0.0, 0.5), 150.0, 0.0);
        let events = tracker.update(off);
        assert!(tracker.is_off_route());
        assert!(matches!(events.as_slice(), [RouteEvent::OffRouteEntered { .. }]));

        let back = geo::offset_m(GeoPoint::new(0.0, 0.5), 80.0, 0.0);
        let events = tracker.update(back);
        assert!(!tracker.is_off_route());
        assert!(matches!(events.as_slice(), [RouteEvent::BackOnRoute { .. }]));
        assert_relative_eq!(tracker.last_route_distance().unwrap(), 80.0, max_relative = 1e-3);
    }

    #[test]
    fn test_off_route_fires_once() {
        let mut tracker = RouteTracker::new(straight_route(), RouteConfig::default());
        let off = geo::offset_m(GeoPoint::new(0.0, 0.5), 300.0, 0.0);
        assert_eq!(tracker.update(off).len(), 1);
        assert!(tracker.update(off).is_empty());
        assert!(tracker.is_off_route());

        // A failed reroute clears the flag, so the next tick re-detects
        tracker.clear_off_route();
        assert_eq!(tracker.update(off).len(), 1);
    }

    #[test]
    fn test_step_advance() {
        let origin = GeoPoint::new(38.70, -9.14);
        let turn = geo::offset_m(origin, 0.0, 500.0);
        let end = geo::offset_m(turn, 500.0, 0.0);
        let as_pair = |p: GeoPoint| (p.lat, p.lon);

        let route = Route::new(
            vec![
                step("Head east", &[as_pair(origin), as_pair(turn)]),
                step("Turn left", &[as_pair(turn), as_pair(end)]),
            ],
            vec![origin, turn, end],
        )
        .unwrap();
        let mut tracker = RouteTracker::new(route, RouteConfig::default());

        assert!(tracker.update(geo::offset_m(origin, 0.0, 300.0)).is_empty());
        assert_relative_eq!(
            tracker.distance_to_next_step(geo::offset_m(origin, 0.0, 300.0)).unwrap(),
            200.0,
            max_relative = 1e-2
        );

        let events = tracker.update(geo::offset_m(turn, 0.0, -30.0));
        assert_eq!(
            events,
            vec![RouteEvent::StepAdvanced {
                index: 1,
                instruction: "Turn left".to_string(),
                distance_m: 100.0,
            }]
        );
        assert_eq!(tracker.current_step().unwrap().instruction, "Turn left");

        // Final step never advances
        assert!(tracker.update(end).is_empty());
        assert_eq!(tracker.current_step_index(), 1);
    }

    #[test]
    fn test_replace_route_resets_progress() {
        let mut tracker = RouteTracker::new(straight_route(), RouteConfig::default());
        tracker.update(geo::offset_m(GeoPoint::new(0.0, 0.5), 500.0, 0.0));
        assert!(tracker.is_off_route());

        let detour = Route::new(
            vec![step("Detour", &[(1.0, 0.0), (1.0, 1.0)])],
            vec![GeoPoint::new(1.0, 0.0), GeoPoint::new(1.0, 1.0)],
        )
        .unwrap();
        tracker.replace_route(detour);
        assert!(!tracker.is_off_route());
        assert_eq!(tracker.current_step_index(), 0);
        assert_eq!(tracker.route().steps()[0].instruction, "Detour");
    }

    #[test]
    fn test_sampling_keeps_long_routes_accurate() {
        // 2001 points along the equator, ~55 m apart
        let polyline: Vec<GeoPoint> = (0..=2000)
            .map(|i| GeoPoint::new(0.0, i as f64 * 0.0005))
            .collect();
        let route = Route::new(vec![], polyline).unwrap();
        let tracker = RouteTracker::new(route, RouteConfig::default());

        let probe = geo::offset_m(GeoPoint::new(0.0, 0.33333), 60.0, 0.0);
        let d = tracker.distance_to_route(probe);
        assert_relative_eq!(d, 60.0, max_relative = 1e-2);

        // Past the last vertex the end point is still considered
        let beyond = GeoPoint::new(0.0, 1.0001);
        assert!(tracker.distance_to_route(beyond) < 20.0);
    }

    #[test]
    fn test_from_raw_slices_leg_geometry() {
        let raw = RawRoute {
            legs: vec![
                RawLeg {
                    steps: vec![
                        raw_step(Some("Head north"), Some(0), Some(1)),
                        raw_step(None, Some(1), Some(99)),
                        raw_step(Some("Ignored"), Some(5), Some(7)),
                    ],
                },
                RawLeg {
                    steps: vec![raw_step(Some("Arrive"), None, None)],
                },
            ],
            geometry: vec![
                vec![[-9.14, 38.70], [-9.14, 38.71], [-9.13, 38.71]],
                vec![[-9.13, 38.71], [-9.12, 38.72]],
            ],
            distance_m: Some(3200.0),
            duration_s: Some(300.0),
        };

        let route = Route::from_raw(&raw).unwrap();
        let steps = route.steps();
        assert_eq!(steps.len(), 3);

        assert_eq!(steps[0].instruction, "Head north");
        assert_eq!(steps[0].coordinates.len(), 2);

        assert_eq!(steps[1].instruction, DEFAULT_INSTRUCTION);
        assert_eq!(steps[1].coordinates.len(), 2);
        assert_eq!(steps[1].end(), Some(GeoPoint::new(38.71, -9.13)));

        assert_eq!(steps[2].instruction, "Arrive");
        assert_eq!(steps[2].coordinates, vec![GeoPoint::new(38.71, -9.13), GeoPoint::new(38.72, -9.12)]);

        assert_eq!(route.polyline().len(), 5);
        assert_eq!(route.distance_m(), Some(3200.0));
        assert_eq!(route.destination(), Some(GeoPoint::new(38.72, -9.12)));
    }

    #[test]
    fn test_from_raw_rejects_bad_payloads() {
        assert_eq!(Route::from_raw(&RawRoute::default()), Err(RouteError::EmptyGeometry));

        let raw = RawRoute {
            legs: vec![],
            geometry: vec![vec![[-9.14, 38.70], [200.0, 38.71]]],
            distance_m: None,
            duration_s: None,
        };
        assert!(matches!(Route::from_raw(&raw), Err(RouteError::InvalidCoordinate { .. })));
    }
}
