//! Scenario runner - drives a DriveSession through scripted trips.

use crate::context::{settle, SimContext};
use crate::exporter::{SimEvent, SimExport, SimFrame};
use crate::oracle::{DriveOracle, Jitter};
use crate::output::RecordingOutput;
use crate::routing::SimRoutingProvider;
use crate::scenarios::ScenarioId;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use roadmate_core::{
    geo, AlertPhase, ConsensusVerifier, DeactivationStore, DriveSession, Entity, EntityFilter,
    EntityKind, FixOutcome, IndexError, PositionFix, PositionReport, ProximityQueryService,
    QueryError, RejectReason, RoadmateConfig, RouteEvent, SessionError, SessionMetrics,
    SledDeactivationStore, SpatialIndex, StoreError, Verdict,
};
use roadmate_env::{Announcement, EntityId, GeoPoint, RoadmateContext, RoutingController, UserId};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Scenario anchor (Lisbon).
const ORIGIN: GeoPoint = GeoPoint {
    lat: 38.72,
    lon: -9.14,
};

/// Hard stop for runaway plans.
const MAX_TICKS: u64 = 20_000;

type SimSession = DriveSession<SimContext, RecordingOutput, SimRoutingProvider>;

/// Errors that abort a scenario.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Assertion(String),
}

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Frame log, when export was requested
    #[serde(skip)]
    pub export: Option<SimExport>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub fixes_processed: u64,
    pub stale_fixes: u64,
    pub alerts_triggered: u64,
    pub alerts_cleared: u64,

    /// Passes that raised at least one alert
    pub alert_passes: u64,

    pub max_simultaneous_alerts: usize,
    pub hazard_announcements: usize,
    pub vibrations: usize,
    pub tones: usize,
    pub steps_advanced: u64,
    pub reroutes_requested: u64,
    pub reroutes_succeeded: u64,
    pub reroutes_failed: u64,
    pub deactivations: u64,

    /// Grid queries cross-checked against a linear scan
    pub queries_checked: u64,
}

impl ScenarioMetrics {
    fn absorb(&mut self, session: &SessionMetrics) {
        self.fixes_processed = session.fixes_processed;
        self.stale_fixes = session.stale_fixes;
        self.alerts_triggered = session.alerts_triggered;
        self.steps_advanced = session.steps_advanced;
        self.reroutes_requested = session.reroutes_requested;
        self.reroutes_succeeded = session.reroutes_succeeded;
        self.reroutes_failed = session.reroutes_failed;
    }
}

/// Mutable record of one run, kept outside the scenario so a failed
/// assertion still reports what happened.
struct RunLog {
    metrics: ScenarioMetrics,
    ticks: u64,
    time_secs: f64,
    export: Option<SimExport>,
}

impl RunLog {
    fn new(scenario: ScenarioId, seed: u64, export: bool) -> Self {
        Self {
            metrics: ScenarioMetrics::default(),
            ticks: 0,
            time_secs: 0.0,
            export: export.then(|| SimExport::new(scenario.name(), seed)),
        }
    }
}

fn at(north_m: f64, east_m: f64) -> GeoPoint {
    geo::offset_m(ORIGIN, north_m, east_m)
}

fn camera(seed: u64, kind: EntityKind, point: GeoPoint) -> Entity {
    Entity::new(EntityId::from_seed(seed), kind, point.lat, point.lon)
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), RunError> {
    if condition {
        Ok(())
    } else {
        Err(RunError::Assertion(message()))
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// One session wired to simulated clock, router and output.
struct Harness {
    ctx: Arc<SimContext>,
    output: Arc<RecordingOutput>,
    router: Arc<SimRoutingProvider>,
    index: Arc<RwLock<SpatialIndex>>,
    session: SimSession,
    tick: Duration,
}

impl Harness {
    fn new(
        seed: u64,
        config: &RoadmateConfig,
        cameras: Vec<Entity>,
        tick: Duration,
        log: &mut RunLog,
    ) -> Result<Self, RunError> {
        if let Some(export) = log.export.as_mut() {
            export.cameras = cameras.iter().map(Entity::position).collect();
        }

        let ctx = SimContext::shared(seed);
        let output = Arc::new(RecordingOutput::new(ctx.clone()));
        let router = Arc::new(SimRoutingProvider::new(ctx.clone()));

        let mut index = SpatialIndex::new(config.index.clone());
        index.bulk_load(cameras)?;
        let index = Arc::new(RwLock::new(index));

        let mut session = DriveSession::new(
            ctx.clone(),
            output.clone(),
            router.clone(),
            index.clone(),
            config.clone(),
        );
        session.start();

        Ok(Self {
            ctx,
            output,
            router,
            index,
            session,
            tick,
        })
    }

    /// Moves the vehicle, advances the clock and lets timers run.
    async fn advance(&self, oracle: &mut DriveOracle) {
        oracle.step(self.tick.as_secs_f64());
        self.ctx.advance_time(self.tick);
        settle().await;
    }

    /// One tick: advance, then feed the resulting fix to the session.
    async fn tick(
        &mut self,
        oracle: &mut DriveOracle,
        log: &mut RunLog,
    ) -> Result<Option<PositionReport>, RunError> {
        self.advance(oracle).await;
        let fix = oracle.fix(self.ctx.time_ms());
        let outcome = self.session.on_position(fix)?;
        log.ticks += 1;
        log.time_secs = oracle.time();

        match outcome {
            FixOutcome::Processed(report) => {
                self.observe(oracle, fix, &report, log);
                Ok(Some(report))
            }
            FixOutcome::Stale => Ok(None),
        }
    }

    /// Ticks until the plan is done.
    async fn drive(&mut self, oracle: &mut DriveOracle, log: &mut RunLog) -> Result<(), RunError> {
        while !oracle.finished() && log.ticks < MAX_TICKS {
            self.tick(oracle, log).await?;
        }
        Ok(())
    }

    /// Fetches the initial route while the clock keeps moving underneath.
    async fn navigate(&mut self, destination: GeoPoint) -> Result<(), RunError> {
        let ctx = self.ctx.clone();
        let pump = async move {
            loop {
                settle().await;
                ctx.advance_time(Duration::from_millis(50));
            }
        };
        tokio::select! {
            result = self.session.navigate_to(destination) => result?,
            _ = pump => {}
        }
        Ok(())
    }

    fn observe(&self, oracle: &DriveOracle, fix: PositionFix, report: &PositionReport, log: &mut RunLog) {
        let active = self.session.active_alerts().len();
        log.metrics.alerts_cleared += report.alerts.cleared.len() as u64;
        log.metrics.max_simultaneous_alerts = log.metrics.max_simultaneous_alerts.max(active);
        if !report.alerts.triggered.is_empty() {
            log.metrics.alert_passes += 1;
        }

        let Some(export) = log.export.as_mut() else {
            return;
        };
        let mut events = Vec::new();
        for id in &report.alerts.triggered {
            events.push(SimEvent::info(format!("Alert {}", id)));
        }
        for id in &report.alerts.cleared {
            events.push(SimEvent::info(format!("Cleared {}", id)));
        }
        for event in &report.route_events {
            events.push(match event {
                RouteEvent::OffRouteEntered { distance_m } => {
                    SimEvent::warn(format!("Off route ({:.0}m)", distance_m))
                }
                other => SimEvent::info(format!("{:?}", other)),
            });
        }
        // Quiet ticks are sampled
        if events.is_empty() && log.ticks % 10 != 0 {
            return;
        }
        export.add_frame(SimFrame {
            time_sec: oracle.time(),
            vehicle: oracle.position(),
            fix: fix.position(),
            closest_alert: self.session.closest_alert(),
            more_alerts: self.session.more_alerts(),
            off_route: self.session.off_route(),
            instruction: self.session.current_step().map(|s| s.instruction),
            events,
        });
    }

    /// Collects counters and stops the session.
    fn finish(&mut self, log: &mut RunLog) {
        log.metrics.absorb(self.session.metrics());
        log.metrics.hazard_announcements = self.output.hazard_count();
        log.metrics.vibrations = self.output.vibration_count();
        log.metrics.tones = self.output.tone_count();
        self.session.stop();
        debug!(
            "Session finished: {} fixes, {} tones, {} router requests",
            log.metrics.fixes_processed,
            log.metrics.tones,
            self.router.requests()
        );
    }
}

// ============================================================================
// RUNNER
// ============================================================================

/// Runs drive scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Fix period
    tick: Duration,

    /// Engine configuration under test
    config: RoadmateConfig,

    /// Keep a frame log for export
    export: bool,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            tick: Duration::from_millis(500),
            config: RoadmateConfig::default(),
            export: false,
        }
    }

    /// Sets the fix period.
    pub fn with_tick_ms(mut self, ms: u64) -> Self {
        self.tick = Duration::from_millis(ms.max(1));
        self
    }

    pub fn with_config(mut self, config: RoadmateConfig) -> Self {
        self.config = config;
        self
    }

    /// Records frames for [`ScenarioResult::export`].
    pub fn with_export(mut self, export: bool) -> Self {
        self.export = export;
        self
    }

    /// Jitter stream seed, kept apart from the context seed.
    fn physics_seed(&self) -> u64 {
        self.seed.wrapping_mul(0x9e3779b97f4a7c15)
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let mut log = RunLog::new(scenario, self.seed, self.export);
        let outcome = match tokio::runtime::Builder::new_current_thread().build() {
            Ok(runtime) => runtime.block_on(self.dispatch(scenario, &mut log)),
            Err(e) => Err(RunError::from(e)),
        };

        let failure_reason = outcome.err().map(|e| e.to_string());
        let passed = failure_reason.is_none();
        if let Some(reason) = &failure_reason {
            warn!("{} (seed={}) failed: {}", scenario.name(), self.seed, reason);
        }

        let export = log.export.take().map(|mut export| {
            export.finalize(passed, failure_reason.clone());
            export
        });

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: log.ticks,
            final_time_secs: log.time_secs,
            failure_reason,
            metrics: log.metrics,
            export,
        }
    }

    async fn dispatch(&self, scenario: ScenarioId, log: &mut RunLog) -> Result<(), RunError> {
        match scenario {
            ScenarioId::ApproachRetreat => self.run_approach_retreat(log).await,
            ScenarioId::LoopBack => self.run_loop_back(log).await,
            ScenarioId::DenseCluster => self.run_dense_cluster(log).await,
            ScenarioId::OffRoute => self.run_off_route(log, false).await,
            ScenarioId::RerouteFailure => self.run_off_route(log, true).await,
            ScenarioId::Consensus => self.run_consensus(log).await,
            ScenarioId::StaleFixes => self.run_stale_fixes(log).await,
            ScenarioId::DenseGrid => self.run_dense_grid(log).await,
        }
    }

    /// SIM-001: ApproachRetreat - hysteresis under GPS jitter.
    ///
    /// Drives from beyond the exit threshold to inside the enter threshold
    /// and back, with ±20 m jitter on both axes.
    ///
    /// **Assertion**: exactly one alert, one clear, one urgent cue.
    async fn run_approach_retreat(&self, log: &mut RunLog) -> Result<(), RunError> {
        info!("SIM-001: ApproachRetreat - hysteresis under jitter");

        let alerts = &self.config.alerts;
        let far = alerts.critical_exit_m + 50.0;
        let near = alerts.critical_enter_m - 50.0;

        let mut harness = Harness::new(
            self.seed,
            &self.config,
            vec![camera(1, EntityKind::Fixed, ORIGIN)],
            self.tick,
            log,
        )?;
        let mut oracle = DriveOracle::new(self.physics_seed(), at(0.0, -far))
            .with_jitter(Jitter::Uniform { max_m: 20.0 })
            .drive_to(at(0.0, -near), 10.0)
            .hold(2.0)
            .drive_to(at(0.0, -far), 10.0);

        harness.drive(&mut oracle, log).await?;
        harness.finish(log);

        let m = &log.metrics;
        info!(
            "✓ ApproachRetreat: {} alert(s), {} clear(s), {} tones",
            m.alerts_triggered, m.alerts_cleared, m.tones
        );
        check(m.alerts_triggered == 1, || {
            format!("expected 1 alert, got {}", m.alerts_triggered)
        })?;
        check(m.alerts_cleared == 1, || {
            format!("expected 1 clear, got {}", m.alerts_cleared)
        })?;
        if alerts.enable_vibration {
            check(m.vibrations == 1, || format!("expected 1 vibration, got {}", m.vibrations))?;
        }
        if alerts.enable_sound {
            check(m.tones > 0, || "no beeps while in range".to_string())?;
        }
        Ok(())
    }

    /// SIM-002: LoopBack - cooldown suppression and re-arming.
    ///
    /// Passes the camera, exits, comes back inside the enter threshold
    /// while the cooldown runs, then waits it out and returns again.
    ///
    /// **Assertion**: two alerts; the early return sits in `Cooldown`.
    async fn run_loop_back(&self, log: &mut RunLog) -> Result<(), RunError> {
        info!("SIM-002: LoopBack - cooldown and re-alert");

        let alerts = &self.config.alerts;
        let far = alerts.critical_exit_m + 50.0;
        let near = (alerts.critical_enter_m - 100.0).max(10.0);
        let shallow = (alerts.critical_enter_m - 50.0).max(near);
        let cooldown = alerts.cooldown_secs as f64;

        let target = camera(1, EntityKind::Fixed, ORIGIN);
        let target_id = target.id;
        let mut harness = Harness::new(self.seed, &self.config, vec![target], self.tick, log)?;
        let mut oracle = DriveOracle::new(self.physics_seed(), at(0.0, -far))
            .drive_to(at(0.0, -near), 10.0)
            .drive_to(at(0.0, -far), 25.0)
            // Quick return, still inside the cooldown
            .drive_to(at(0.0, -shallow), 25.0)
            .drive_to(at(0.0, -far), 25.0)
            .hold(cooldown + 5.0)
            .drive_to(at(0.0, -near), 10.0)
            .drive_to(at(0.0, -far), 25.0);

        let mut suppressed = false;
        while !oracle.finished() && log.ticks < MAX_TICKS {
            harness.tick(&mut oracle, log).await?;
            let distance_m = geo::distance_m(oracle.position(), ORIGIN);
            if distance_m < alerts.critical_enter_m
                && harness.session.alerts().phase(&target_id) == AlertPhase::Cooldown
            {
                suppressed = true;
            }
        }
        harness.finish(log);

        let m = &log.metrics;
        info!(
            "✓ LoopBack: {} alert(s), {} clear(s), suppressed={}",
            m.alerts_triggered, m.alerts_cleared, suppressed
        );
        check(m.alerts_triggered == 2, || {
            format!("expected 2 alerts, got {}", m.alerts_triggered)
        })?;
        check(m.alerts_cleared == 2, || {
            format!("expected 2 clears, got {}", m.alerts_cleared)
        })?;
        check(suppressed, || "return inside the cooldown was not suppressed".to_string())?;
        Ok(())
    }

    /// SIM-003: DenseCluster - simultaneous triggers.
    ///
    /// Three co-located cameras, one further on, one inactive duplicate and
    /// one mobile camera with mobile alerts disabled.
    ///
    /// **Assertion**: one urgent announcement per pass that raised alerts.
    async fn run_dense_cluster(&self, log: &mut RunLog) -> Result<(), RunError> {
        info!("SIM-003: DenseCluster - one announcement per pass");

        let mut config = self.config.clone();
        config.alerts.include_mobile = false;

        let mut inactive = camera(5, EntityKind::Fixed, ORIGIN);
        inactive.active = false;
        let mobile = camera(6, EntityKind::Mobile, at(0.0, 200.0));
        let silent: HashSet<EntityId> = HashSet::from([inactive.id, mobile.id]);

        let cameras = vec![
            camera(1, EntityKind::Fixed, ORIGIN),
            camera(2, EntityKind::RedLight, ORIGIN),
            camera(3, EntityKind::Section, ORIGIN),
            camera(4, EntityKind::Fixed, at(0.0, 400.0)),
            inactive,
            mobile,
        ];
        let mut harness = Harness::new(self.seed, &config, cameras, self.tick, log)?;
        let mut oracle = DriveOracle::new(self.physics_seed(), at(0.0, -500.0))
            .drive_to(at(0.0, 900.0), 15.0);

        let mut alerted = HashSet::new();
        while !oracle.finished() && log.ticks < MAX_TICKS {
            if let Some(report) = harness.tick(&mut oracle, log).await? {
                alerted.extend(report.alerts.triggered);
            }
        }
        harness.finish(log);

        let m = &log.metrics;
        info!(
            "✓ DenseCluster: {} alerts over {} passes, {} announcements, max {} at once",
            m.alerts_triggered, m.alert_passes, m.hazard_announcements, m.max_simultaneous_alerts
        );
        check(m.max_simultaneous_alerts >= 3, || {
            format!("cluster never alerted together (max {})", m.max_simultaneous_alerts)
        })?;
        check(alerted.is_disjoint(&silent), || {
            "inactive or excluded mobile camera alerted".to_string()
        })?;
        if config.alerts.enable_voice {
            check(m.hazard_announcements as u64 == m.alert_passes, || {
                format!(
                    "{} announcements for {} passes",
                    m.hazard_announcements, m.alert_passes
                )
            })?;
        }
        Ok(())
    }

    /// SIM-004 / SIM-005: OffRoute - debounced rerouting.
    ///
    /// Follows a straight route, detours north, stops, then heads for the
    /// destination. With `fail_first` the provider rejects the first
    /// reroute and the session has to retry on its own.
    ///
    /// **Assertion**: a new route to the same destination, back on route at the end.
    async fn run_off_route(&self, log: &mut RunLog, fail_first: bool) -> Result<(), RunError> {
        if fail_first {
            info!("SIM-005: RerouteFailure - retry after a provider error");
        } else {
            info!("SIM-004: OffRoute - detour and reroute");
        }

        let mut harness = Harness::new(self.seed, &self.config, Vec::new(), self.tick, log)?;
        harness.router.set_latency_ms(400);

        let destination = at(0.0, 3000.0);
        let mut oracle = DriveOracle::new(self.physics_seed(), ORIGIN)
            .with_jitter(Jitter::Gaussian { std_m: 3.0 })
            .hold(1.0)
            .drive_to(at(0.0, 1000.0), 12.5)
            .drive_to(at(400.0, 1000.0), 8.0)
            .hold(10.0)
            .drive_to(destination, 12.5)
            .hold(5.0);

        // First fix, then the initial route
        harness.tick(&mut oracle, log).await?;
        harness.navigate(destination).await?;
        if fail_first {
            harness.router.fail_next(1);
        }
        harness.drive(&mut oracle, log).await?;

        let off_route = harness.session.off_route();
        let final_destination = harness.session.route().and_then(|r| r.destination());
        let rerouting_announced = harness
            .output
            .announcements()
            .contains(&Announcement::Rerouting);
        harness.finish(log);

        let m = &log.metrics;
        info!(
            "✓ OffRoute: {} reroutes requested, {} applied, {} failed, {} steps",
            m.reroutes_requested, m.reroutes_succeeded, m.reroutes_failed, m.steps_advanced
        );
        check(m.steps_advanced >= 1, || "no step progression before the detour".to_string())?;
        check(m.reroutes_succeeded >= 1, || "no reroute was applied".to_string())?;
        let expected_failures = u64::from(fail_first);
        check(m.reroutes_failed == expected_failures, || {
            format!("expected {} failed reroutes, got {}", expected_failures, m.reroutes_failed)
        })?;
        check(!off_route, || "still off route at the destination".to_string())?;
        check(
            final_destination.is_some_and(|d| geo::distance_m(d, destination) < 1.0),
            || "reroute changed the destination".to_string(),
        )?;
        if self.config.alerts.enable_voice {
            check(rerouting_announced, || "rerouting was not announced".to_string())?;
        }
        Ok(())
    }

    /// SIM-006: Consensus - community deactivation survives a reload.
    ///
    /// **Assertion**: the mobile camera is retired by the third distinct
    /// not-found vote, stays retired after a dataset refresh, and never alerts.
    async fn run_consensus(&self, log: &mut RunLog) -> Result<(), RunError> {
        info!("SIM-006: Consensus - votes, persistence, reload");

        let mobile = camera(1, EntityKind::Mobile, at(0.0, 1000.0));
        let fixed = camera(2, EntityKind::Fixed, at(0.0, 1500.0));
        let cameras = vec![mobile.clone(), fixed.clone()];

        let mut harness = Harness::new(self.seed, &self.config, cameras.clone(), self.tick, log)?;
        let store: Arc<dyn DeactivationStore> = Arc::new(SledDeactivationStore::open_temporary()?);
        let verifier = ConsensusVerifier::with_store(
            harness.index.clone(),
            self.config.consensus.clone(),
            store,
        )?;

        let now = harness.ctx.system_time();
        let near = at(20.0, 1000.0);
        let vote = |user: u64, verdict: Verdict, point: GeoPoint| {
            verifier.submit_at(
                mobile.id,
                UserId::from_seed(user),
                verdict,
                point.lat,
                point.lon,
                now,
            )
        };

        // Step 1: Voting
        let mut votes_needed = 0;
        let mut outcome = vote(1, Verdict::NotFound, near);
        check(outcome.accepted && !outcome.deactivated, || {
            format!("first vote: {:?}", outcome)
        })?;

        let far = vote(2, Verdict::NotFound, ORIGIN);
        check(matches!(far.reason, Some(RejectReason::TooFar { .. })), || {
            format!("distant vote accepted: {:?}", far)
        })?;

        // A voter changing their mind replaces the earlier verdict
        vote(2, Verdict::Confirmed, near);
        let changed = vote(2, Verdict::NotFound, near);
        check(changed.confirmed_count == 0 && changed.not_found_count == 2, || {
            format!("changed vote tallied as {:?}", changed)
        })?;

        let fixed_vote = verifier.submit_at(
            fixed.id,
            UserId::from_seed(3),
            Verdict::NotFound,
            fixed.lat,
            fixed.lon,
            now,
        );
        check(fixed_vote.reason == Some(RejectReason::NotMobile), || {
            format!("fixed camera vote: {:?}", fixed_vote)
        })?;

        for user in 3..10 {
            outcome = vote(user, Verdict::NotFound, near);
            votes_needed = user;
            if outcome.deactivated || !outcome.accepted {
                break;
            }
        }
        check(outcome.deactivated, || format!("never deactivated: {:?}", outcome))?;
        log.metrics.deactivations += 1;
        debug!("Deactivated after user #{}", votes_needed);

        let late = vote(20, Verdict::NotFound, near);
        check(late.reason == Some(RejectReason::Inactive), || {
            format!("vote after deactivation: {:?}", late)
        })?;

        // Step 2: Dataset refresh brings everything back, the store retires it again
        harness
            .index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .bulk_load(cameras)?;
        let reapplied = verifier.reapply_deactivations()?;
        check(reapplied == 1, || format!("re-applied {} deactivations", reapplied))?;

        // Step 3: Drive past both
        let mut oracle = DriveOracle::new(self.physics_seed(), ORIGIN)
            .with_jitter(Jitter::Gaussian { std_m: 3.0 })
            .drive_to(at(0.0, 2000.0), 15.0);
        let mut alerted = HashSet::new();
        while !oracle.finished() && log.ticks < MAX_TICKS {
            if let Some(report) = harness.tick(&mut oracle, log).await? {
                alerted.extend(report.alerts.triggered);
            }
        }
        harness.finish(log);

        info!("✓ Consensus: retired camera stayed silent, {} alert(s)", alerted.len());
        check(alerted == HashSet::from([fixed.id]), || {
            format!("expected only the fixed camera to alert, got {:?}", alerted)
        })?;
        Ok(())
    }

    /// SIM-007: StaleFixes - out-of-order delivery on the fix channel.
    ///
    /// Every fifth fix is followed by a copy stamped one second earlier.
    ///
    /// **Assertion**: every injected copy is counted stale, nothing else.
    async fn run_stale_fixes(&self, log: &mut RunLog) -> Result<(), RunError> {
        info!("SIM-007: StaleFixes - out-of-order channel");

        let mut harness = Harness::new(
            self.seed,
            &self.config,
            vec![camera(1, EntityKind::Fixed, ORIGIN)],
            self.tick,
            log,
        )?;
        let mut oracle =
            DriveOracle::new(self.physics_seed(), at(0.0, -600.0)).drive_to(at(0.0, 200.0), 15.0);

        let (tx, rx) = mpsc::channel(1);
        let ctx = harness.ctx.clone();
        let tick = harness.tick;

        let producer = async {
            let (mut sent, mut stale) = (0u64, 0u64);
            while !oracle.finished() && sent < MAX_TICKS {
                oracle.step(tick.as_secs_f64());
                ctx.advance_time(tick);
                settle().await;

                let fix = oracle.fix(ctx.time_ms());
                if tx.send(fix).await.is_err() {
                    break;
                }
                sent += 1;

                if sent % 5 == 0 {
                    let late = PositionFix {
                        timestamp_ms: fix.timestamp_ms.saturating_sub(1000),
                        ..fix
                    };
                    if tx.send(late).await.is_err() {
                        break;
                    }
                    stale += 1;
                }
            }
            drop(tx);
            (sent, stale)
        };

        let ((sent, stale), metrics) = tokio::join!(producer, harness.session.run(rx));
        log.ticks = sent;
        log.time_secs = oracle.time();
        harness.finish(log);

        info!(
            "✓ StaleFixes: {} sent, {} stale injected, {} dropped",
            sent, stale, metrics.stale_fixes
        );
        check(metrics.stale_fixes == stale, || {
            format!("{} stale fixes counted, {} injected", metrics.stale_fixes, stale)
        })?;
        check(metrics.fixes_processed == sent, || {
            format!("{} fixes processed, {} sent", metrics.fixes_processed, sent)
        })?;
        check(metrics.alerts_triggered == 1, || {
            format!("expected 1 alert, got {}", metrics.alerts_triggered)
        })?;
        Ok(())
    }

    /// SIM-008: DenseGrid - index correctness at scale.
    ///
    /// 10k cameras scattered over ±0.3°, a vehicle crossing the whole box
    /// diagonally. Every grid query is compared with a linear scan.
    ///
    /// **Assertion**: identical result sets on every tick.
    async fn run_dense_grid(&self, log: &mut RunLog) -> Result<(), RunError> {
        info!("SIM-008: DenseGrid - grid vs linear scan");
        const CAMERAS: u64 = 10_000;
        const SPREAD_DEG: f64 = 0.3;

        let mut rng = ChaCha8Rng::seed_from_u64(self.physics_seed() ^ 0x00c0_ffee);
        let cameras: Vec<Entity> = (1..=CAMERAS)
            .map(|seed| {
                let lat = ORIGIN.lat + rng.gen_range(-SPREAD_DEG..SPREAD_DEG);
                let lon = ORIGIN.lon + rng.gen_range(-SPREAD_DEG..SPREAD_DEG);
                Entity::new(EntityId::from_seed(seed), EntityKind::Fixed, lat, lon)
            })
            .collect();

        let mut harness = Harness::new(self.seed, &self.config, cameras, self.tick, log)?;
        let query = ProximityQueryService::new(harness.index.clone());
        let radius_km = self.config.session.query_radius_km;
        let radius_m = radius_km.min(self.config.index.max_radius_km) * 1000.0;

        let start = GeoPoint::new(ORIGIN.lat - SPREAD_DEG, ORIGIN.lon - SPREAD_DEG);
        let end = GeoPoint::new(ORIGIN.lat + SPREAD_DEG, ORIGIN.lon + SPREAD_DEG);
        let mut oracle = DriveOracle::new(self.physics_seed(), start).drive_to(end, 250.0);

        while !oracle.finished() && log.ticks < MAX_TICKS {
            harness.tick(&mut oracle, log).await?;
            let p = oracle.position();

            let grid: HashSet<EntityId> = query
                .query_nearby(p.lat, p.lon, Some(radius_km), &EntityFilter::any())?
                .into_iter()
                .map(|n| n.entity.id)
                .collect();
            let scan: HashSet<EntityId> = harness
                .index
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .entities()
                .filter(|e| e.active && geo::distance_m(p, e.position()) <= radius_m)
                .map(|e| e.id)
                .collect();

            check(grid == scan, || {
                format!(
                    "grid returned {} cameras, scan {} at ({:.5}, {:.5})",
                    grid.len(),
                    scan.len(),
                    p.lat,
                    p.lon
                )
            })?;
            log.metrics.queries_checked += 1;
        }
        harness.finish(log);

        let stats = harness
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .stats();
        info!(
            "✓ DenseGrid: {} queries matched, {} cells, {:.1} cameras/cell",
            log.metrics.queries_checked, stats.occupied_cells, stats.avg_entities_per_cell
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(scenario: ScenarioId) -> ScenarioResult {
        let result = ScenarioRunner::new(42).run(scenario);
        assert!(
            result.passed,
            "{} failed: {:?}",
            scenario.name(),
            result.failure_reason
        );
        result
    }

    #[test]
    fn test_approach_retreat() {
        let result = run(ScenarioId::ApproachRetreat);
        assert_eq!(result.metrics.hazard_announcements, 1);
        assert!(result.total_ticks > 0);
    }

    #[test]
    fn test_loop_back() {
        run(ScenarioId::LoopBack);
    }

    #[test]
    fn test_dense_cluster() {
        let result = run(ScenarioId::DenseCluster);
        assert_eq!(result.metrics.alert_passes, 2);
    }

    #[test]
    fn test_off_route() {
        let result = run(ScenarioId::OffRoute);
        assert_eq!(result.metrics.reroutes_failed, 0);
    }

    #[test]
    fn test_reroute_failure() {
        let result = run(ScenarioId::RerouteFailure);
        assert_eq!(result.metrics.reroutes_failed, 1);
    }

    #[test]
    fn test_consensus() {
        let result = run(ScenarioId::Consensus);
        assert_eq!(result.metrics.deactivations, 1);
    }

    #[test]
    fn test_stale_fixes() {
        let result = run(ScenarioId::StaleFixes);
        assert!(result.metrics.stale_fixes > 0);
    }

    #[test]
    fn test_same_seed_same_result() {
        let a = ScenarioRunner::new(7).run(ScenarioId::ApproachRetreat);
        let b = ScenarioRunner::new(7).run(ScenarioId::ApproachRetreat);
        assert_eq!(a.total_ticks, b.total_ticks);
        assert_eq!(a.metrics.alerts_triggered, b.metrics.alerts_triggered);
        assert_eq!(a.metrics.alerts_cleared, b.metrics.alerts_cleared);
    }

    #[test]
    fn test_export_collects_frames() {
        let result = ScenarioRunner::new(42)
            .with_export(true)
            .run(ScenarioId::ApproachRetreat);
        let export = result.export.expect("export requested");
        assert!(export.passed);
        assert_eq!(export.cameras.len(), 1);
        assert!(export.frames.iter().any(|f| !f.events.is_empty()));
    }
}
