//! Drive Session - orchestrates the engines for one stream of positions.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         DriveSession                           │
//! │   position fix ──▶ stale check ──▶ apply finished reroute      │
//! │                                        │                       │
//! │        ┌───────────────────────────────┴──────────────┐        │
//! │        ▼                                              ▼        │
//! │  ProximityQueryService ──▶ AlertScheduler       RouteTracker   │
//! │   (shared SpatialIndex)    (beep timers,         (steps,       │
//! │                             critical alert)       off-route)   │
//! │                                                       │        │
//! │                          reroute task ◀── debounce ───┘        │
//! │                  (RoutingProvider, outcome via channel)        │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Fixes are processed one at a time by the single owner of the session;
//! nothing in here is reentrant. The reroute task is the only concurrent
//! piece of work, and it hands its result back through a channel that is
//! drained at the start of the next fix (or by [`DriveSession::run`]).

use roadmate_env::{
    Announcement, DeviceOutput, EnvError, GeoPoint, RoadmateContext, RoutingProvider, TaskHandle,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::RoadmateConfig;
use crate::geo;
use crate::roadmate_alert::{ActiveAlert, AlertPass, AlertScheduler};
use crate::roadmate_query::{EntityFilter, ProximityQueryService, QueryError};
use crate::roadmate_route::{Route, RouteConfig, RouteError, RouteEvent, RouteStep, RouteTracker};
use crate::roadmate_space::SpatialIndex;

// ============================================================================
// CONFIGURATION, ERRORS, DATA
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Radius of the per-fix proximity query
    pub query_radius_km: f64,

    /// Which entities the session alerts on
    pub filter: EntityFilter,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            query_radius_km: 2.0,
            filter: EntityFilter::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not started")]
    NotStarted,

    #[error("Invalid fix: lat={lat}, lon={lon}")]
    InvalidFix { lat: f64, lon: f64 },

    #[error("No position yet")]
    NoPosition,

    #[error("Query failed: {0}")]
    Query(#[from] QueryError),

    #[error("Route rejected: {0}")]
    Route(#[from] RouteError),

    #[error("Routing failed: {0}")]
    Routing(#[from] EnvError),
}

/// One sample of the position stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub speed_kmh: Option<f64>,
    #[serde(default)]
    pub heading_deg: Option<f64>,
    /// Device timestamp (ms); used only for ordering
    pub timestamp_ms: u64,
}

impl PositionFix {
    pub fn new(lat: f64, lon: f64, timestamp_ms: u64) -> Self {
        Self {
            lat,
            lon,
            speed_kmh: None,
            heading_deg: None,
            timestamp_ms,
        }
    }

    pub fn at(position: GeoPoint, timestamp_ms: u64) -> Self {
        Self::new(position.lat, position.lon, timestamp_ms)
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// What processing one fix produced.
#[derive(Debug, Clone, PartialEq)]
pub enum FixOutcome {
    Processed(PositionReport),
    /// Older than the last accepted fix; ignored
    Stale,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionReport {
    /// Entities returned by the proximity query
    pub nearby: usize,
    pub alerts: AlertPass,
    pub route_events: Vec<RouteEvent>,
}

/// Session counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub fixes_processed: u64,
    pub stale_fixes: u64,
    pub alerts_triggered: u64,
    pub steps_advanced: u64,
    pub reroutes_requested: u64,
    pub reroutes_succeeded: u64,
    pub reroutes_failed: u64,
}

/// Reroute result tagged with the request generation.
type RerouteOutcome = (u64, Result<Route, String>);

// ============================================================================
// SESSION
// ============================================================================

/// A driving session: the single logical consumer of one position stream.
///
/// Generic over the context, the device output and the routing provider,
/// so the same session runs on a device and in the drive simulator.
pub struct DriveSession<Ctx, Out, Router>
where
    Ctx: RoadmateContext,
    Out: DeviceOutput,
    Router: RoutingProvider,
{
    ctx: Arc<Ctx>,
    output: Arc<Out>,
    router: Arc<Router>,

    config: SessionConfig,
    route_config: RouteConfig,
    voice: bool,

    query: ProximityQueryService,
    alerts: AlertScheduler<Ctx, Out>,
    tracker: Option<RouteTracker>,
    destination: Option<GeoPoint>,

    last_fix_ms: Option<u64>,
    position_tx: watch::Sender<Option<GeoPoint>>,

    /// In-flight reroute (generation, task)
    pending_reroute: Option<(u64, TaskHandle)>,
    reroute_generation: u64,
    reroute_tx: mpsc::UnboundedSender<RerouteOutcome>,
    reroute_rx: mpsc::UnboundedReceiver<RerouteOutcome>,

    metrics: SessionMetrics,
    running: bool,
}

impl<Ctx, Out, Router> DriveSession<Ctx, Out, Router>
where
    Ctx: RoadmateContext,
    Out: DeviceOutput,
    Router: RoutingProvider,
{
    /// Creates a stopped session over a shared index.
    pub fn new(
        ctx: Arc<Ctx>,
        output: Arc<Out>,
        router: Arc<Router>,
        index: Arc<RwLock<SpatialIndex>>,
        config: RoadmateConfig,
    ) -> Self {
        let (position_tx, _) = watch::channel(None);
        let (reroute_tx, reroute_rx) = mpsc::unbounded_channel();
        let voice = config.alerts.enable_voice;
        let query = ProximityQueryService::new(index)
            .with_default_radius(config.session.query_radius_km);
        let alerts = AlertScheduler::new(ctx.clone(), output.clone(), config.alerts);

        Self {
            ctx,
            output,
            router,
            config: config.session,
            route_config: config.route,
            voice,
            query,
            alerts,
            tracker: None,
            destination: None,
            last_fix_ms: None,
            position_tx,
            pending_reroute: None,
            reroute_generation: 0,
            reroute_tx,
            reroute_rx,
            metrics: SessionMetrics::default(),
            running: false,
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    pub fn start(&mut self) {
        self.running = true;
        self.alerts.start();
        info!("Drive session started");
    }

    /// Cancels every timer and the pending reroute synchronously.
    pub fn stop(&mut self) {
        self.alerts.stop();
        self.cancel_reroute();
        while self.reroute_rx.try_recv().is_ok() {}
        self.running = false;
        info!("Drive session stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Drains `fixes` one at a time until the channel closes.
    ///
    /// Finished reroutes are applied as soon as they arrive, between fixes.
    pub async fn run(&mut self, mut fixes: mpsc::Receiver<PositionFix>) -> SessionMetrics {
        loop {
            tokio::select! {
                biased;
                Some(outcome) = self.reroute_rx.recv() => self.apply_reroute(outcome),
                fix = fixes.recv() => match fix {
                    Some(fix) => {
                        if let Err(e) = self.on_position(fix) {
                            warn!("Dropping fix: {}", e);
                        }
                    }
                    None => break,
                },
            }
        }
        self.metrics.clone()
    }

    // ========================================================================
    // POSITION PROCESSING
    // ========================================================================

    /// Processes one fix.
    pub fn on_position(&mut self, fix: PositionFix) -> Result<FixOutcome, SessionError> {
        if !self.running {
            return Err(SessionError::NotStarted);
        }
        if !geo::valid_coordinates(fix.lat, fix.lon) {
            return Err(SessionError::InvalidFix {
                lat: fix.lat,
                lon: fix.lon,
            });
        }

        // Step 1: Out-of-order fixes are dropped
        if self.last_fix_ms.is_some_and(|last| fix.timestamp_ms < last) {
            self.metrics.stale_fixes += 1;
            debug!("Ignoring stale fix at {}ms", fix.timestamp_ms);
            return Ok(FixOutcome::Stale);
        }
        self.last_fix_ms = Some(fix.timestamp_ms);
        let position = fix.position();
        self.position_tx.send_replace(Some(position));

        // Step 2: A reroute that finished since the last fix
        self.drain_reroutes();

        // Step 3: Nearby entities
        let nearby = self.query.query_nearby(
            fix.lat,
            fix.lon,
            Some(self.config.query_radius_km),
            &self.config.filter,
        )?;

        // Step 4: Alerts
        let alerts = self.alerts.evaluate(&nearby);
        self.metrics.alerts_triggered += alerts.triggered.len() as u64;

        // Step 5: Route progress
        let route_events = match self.tracker.as_mut() {
            Some(tracker) => tracker.update(position),
            None => Vec::new(),
        };
        for event in &route_events {
            self.handle_route_event(event);
        }

        self.metrics.fixes_processed += 1;
        Ok(FixOutcome::Processed(PositionReport {
            nearby: nearby.len(),
            alerts,
            route_events,
        }))
    }

    fn handle_route_event(&mut self, event: &RouteEvent) {
        match event {
            RouteEvent::StepAdvanced {
                instruction,
                distance_m,
                ..
            } => {
                self.metrics.steps_advanced += 1;
                self.speak(Announcement::NextInstruction {
                    instruction: instruction.clone(),
                    distance_m: *distance_m,
                });
            }
            RouteEvent::OffRouteEntered { .. } => {
                self.speak(Announcement::Rerouting);
                self.request_reroute();
            }
            RouteEvent::BackOnRoute { .. } => {
                if self.pending_reroute.is_some() {
                    debug!("Back on route, reroute cancelled");
                }
                self.cancel_reroute();
            }
        }
    }

    fn speak(&self, announcement: Announcement) {
        if self.voice {
            self.output.announce(announcement);
        }
    }

    // ========================================================================
    // NAVIGATION & REROUTING
    // ========================================================================

    /// Fetches a route from the last position to `destination`.
    pub async fn navigate_to(&mut self, destination: GeoPoint) -> Result<(), SessionError> {
        let origin = (*self.position_tx.borrow()).ok_or(SessionError::NoPosition)?;
        let raw = self.router.route(origin, destination).await?;
        let route = Route::from_raw(&raw)?;
        self.set_route(route, destination);
        Ok(())
    }

    /// Installs a route directly (already fetched elsewhere).
    pub fn set_route(&mut self, route: Route, destination: GeoPoint) {
        self.cancel_reroute();
        self.destination = Some(destination);
        self.install_route(route);
    }

    /// Drops the current route and any pending reroute.
    pub fn cancel_navigation(&mut self) {
        self.cancel_reroute();
        self.tracker = None;
        self.destination = None;
    }

    fn install_route(&mut self, route: Route) {
        let first = route.steps().first().cloned();
        match self.tracker.as_mut() {
            Some(tracker) => tracker.replace_route(route),
            None => self.tracker = Some(RouteTracker::new(route, self.route_config.clone())),
        }
        match first {
            Some(step) => self.speak(Announcement::NextInstruction {
                instruction: step.instruction,
                distance_m: step.distance_m,
            }),
            None => self.speak(Announcement::RouteRecalculated),
        }
    }

    /// Starts the debounced reroute task, replacing any pending one.
    fn request_reroute(&mut self) {
        let destination = self
            .destination
            .or_else(|| self.tracker.as_ref().and_then(|t| t.route().destination()));
        let Some(destination) = destination else {
            warn!("Off route without a destination; nothing to reroute to");
            if let Some(tracker) = self.tracker.as_mut() {
                tracker.clear_off_route();
            }
            return;
        };

        self.cancel_reroute();
        self.reroute_generation += 1;
        let generation = self.reroute_generation;

        let ctx = self.ctx.clone();
        let router = self.router.clone();
        let tx = self.reroute_tx.clone();
        let position_rx = self.position_tx.subscribe();
        let debounce = Duration::from_secs(self.route_config.reroute_debounce_secs);

        let handle = self.ctx.spawn("reroute", async move {
            ctx.sleep(debounce).await;

            // Route from wherever the driver is now
            let origin = *position_rx.borrow();
            let Some(origin) = origin else {
                return;
            };
            let outcome = match router.route(origin, destination).await {
                Ok(raw) => Route::from_raw(&raw).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            let _ = tx.send((generation, outcome));
        });

        self.pending_reroute = Some((generation, handle));
        self.metrics.reroutes_requested += 1;
        info!("Reroute #{} scheduled in {:?}", generation, debounce);
    }

    fn cancel_reroute(&mut self) {
        if let Some((_, mut handle)) = self.pending_reroute.take() {
            handle.cancel();
        }
    }

    fn drain_reroutes(&mut self) {
        while let Ok(outcome) = self.reroute_rx.try_recv() {
            self.apply_reroute(outcome);
        }
    }

    fn apply_reroute(&mut self, (generation, outcome): RerouteOutcome) {
        match &self.pending_reroute {
            Some((pending, _)) if *pending == generation => {}
            _ => {
                debug!("Discarding superseded reroute #{}", generation);
                return;
            }
        }
        self.pending_reroute = None;

        match outcome {
            Ok(route) => {
                self.metrics.reroutes_succeeded += 1;
                info!("Reroute #{} applied", generation);
                self.install_route(route);
            }
            Err(reason) => {
                self.metrics.reroutes_failed += 1;
                warn!("Reroute #{} failed: {}", generation, reason);
                // Let the next fix detect and retry
                if let Some(tracker) = self.tracker.as_mut() {
                    tracker.clear_off_route();
                }
            }
        }
    }

    /// Applies any finished reroute without waiting for the next fix.
    pub fn poll_reroute(&mut self) {
        self.drain_reroutes();
    }

    // ========================================================================
    // READ-ONLY SURFACE
    // ========================================================================

    pub fn active_alerts(&self) -> Vec<ActiveAlert> {
        self.alerts.active_alerts()
    }

    pub fn closest_alert(&self) -> Option<ActiveAlert> {
        self.alerts.closest_alert()
    }

    pub fn more_alerts(&self) -> usize {
        self.alerts.more_count()
    }

    pub fn off_route(&self) -> bool {
        self.tracker.as_ref().is_some_and(|t| t.is_off_route())
    }

    pub fn current_step(&self) -> Option<RouteStep> {
        self.tracker.as_ref()?.current_step().cloned()
    }

    pub fn distance_to_next_step(&self) -> Option<f64> {
        let position = (*self.position_tx.borrow())?;
        self.tracker.as_ref()?.distance_to_next_step(position)
    }

    pub fn reroute_pending(&self) -> bool {
        self.pending_reroute.is_some()
    }

    pub fn route(&self) -> Option<&Route> {
        self.tracker.as_ref().map(|t| t.route())
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.metrics
    }

    pub fn alerts(&self) -> &AlertScheduler<Ctx, Out> {
        &self.alerts
    }

    /// Toggles audio on the alert scheduler.
    pub fn set_sound_enabled(&mut self, enabled: bool) {
        self.alerts.set_sound_enabled(enabled);
    }

    pub fn seed(&self) -> u64 {
        self.ctx.seed()
    }
}
