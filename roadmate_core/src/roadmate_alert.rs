//! The "ALERT" Engine - tiered beeping and hysteresis-guarded critical alerts
//!
//! Every entity moves through its own state machine:
//!
//! ```text
//!   IDLE ──(< beep range)──▶ TRACKED ──(< 150 m)──▶ ALERTED
//!    ▲                                                 │
//!    └────────(30 s elapsed)──── COOLDOWN ◀──(> 250 m or gone)
//! ```
//!
//! While an entity is within beep range it owns one repeating tone timer,
//! spawned through the context as a cancellable [`TaskHandle`]. A timer is
//! only replaced when the tier changes, when the distance drifted more than
//! the rearm delta since it was armed, or when the driver starts moving away.
//! Replacement always cancels the old handle before the new one exists.
//!
//! Critical alerts use two thresholds (enter below 150 m, exit above 250 m)
//! so GPS jitter around a single boundary cannot make them flicker.

use roadmate_env::{Announcement, DeviceOutput, EntityId, RoadmateContext, TaskHandle, Tone};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::roadmate_query::NearbyEntity;
use crate::roadmate_space::EntityKind;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Alert thresholds and driver preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Inner edge of the tier table (very close below this)
    pub close_alert_m: f64,

    /// Outer edge of the tier table (no tier at or beyond this)
    pub first_alert_m: f64,

    /// Entities at or beyond this distance never beep
    pub beep_range_m: f64,

    /// Distance drift that forces a timer rearm
    pub rearm_delta_m: f64,

    /// Increase over the previous sample that counts as moving away
    pub receding_tolerance_m: f64,

    /// Critical alert enters strictly below this distance
    pub critical_enter_m: f64,

    /// Critical alert exits strictly above this distance
    pub critical_exit_m: f64,

    /// Time after exit before the same entity may alert again
    pub cooldown_secs: u64,

    /// Length of one beep
    pub tone_duration_ms: u64,

    /// Urgent vibration (alternating on/off ms)
    pub vibration_pattern: Vec<u64>,

    pub enable_sound: bool,
    pub enable_vibration: bool,
    pub enable_voice: bool,

    /// Consider community-reported (mobile) entities
    pub include_mobile: bool,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            close_alert_m: 150.0,
            first_alert_m: 1000.0,
            beep_range_m: 1000.0,
            rearm_delta_m: 50.0,
            receding_tolerance_m: 5.0,
            critical_enter_m: 150.0,
            critical_exit_m: 250.0,
            cooldown_secs: 30,
            tone_duration_ms: 150,
            vibration_pattern: vec![200, 100, 200, 100, 200],
            enable_sound: true,
            enable_vibration: true,
            enable_voice: true,
            include_mobile: true,
        }
    }
}

// ============================================================================
// TIERS
// ============================================================================

/// Beep urgency level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BeepTier {
    VeryClose,
    Close,
    Medium,
    Far,
}

impl BeepTier {
    /// Time between two beeps.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(match self {
            BeepTier::VeryClose => 200,
            BeepTier::Close => 500,
            BeepTier::Medium => 1500,
            BeepTier::Far => 3000,
        })
    }

    pub fn frequency_hz(&self) -> f64 {
        match self {
            BeepTier::VeryClose => 1200.0,
            BeepTier::Close => 1000.0,
            BeepTier::Medium => 900.0,
            BeepTier::Far => 800.0,
        }
    }

    pub fn volume(&self) -> f64 {
        match self {
            BeepTier::VeryClose => 0.7,
            BeepTier::Close => 0.5,
            BeepTier::Medium => 0.4,
            BeepTier::Far => 0.3,
        }
    }

    pub fn tone(&self, duration_ms: u64) -> Tone {
        Tone {
            frequency_hz: self.frequency_hz(),
            duration_ms,
            volume: self.volume(),
        }
    }
}

/// Tier boundaries, ascending: close < mid1 < mid2 < far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub close_m: f64,
    pub mid1_m: f64,
    pub mid2_m: f64,
    pub far_m: f64,
}

impl TierThresholds {
    /// Mid thresholds sit one and two thirds of the way from close to far.
    pub fn new(close_m: f64, far_m: f64) -> Self {
        let span = far_m - close_m;
        Self {
            close_m,
            mid1_m: close_m + span / 3.0,
            mid2_m: close_m + span * 2.0 / 3.0,
            far_m,
        }
    }

    pub fn from_config(config: &AlertConfig) -> Self {
        Self::new(config.close_alert_m, config.first_alert_m)
    }
}

/// Pure tier lookup. `None` means no beeping at this distance.
pub fn select_tier(distance_m: f64, thresholds: &TierThresholds) -> Option<BeepTier> {
    if distance_m < thresholds.close_m {
        Some(BeepTier::VeryClose)
    } else if distance_m < thresholds.mid1_m {
        Some(BeepTier::Close)
    } else if distance_m < thresholds.mid2_m {
        Some(BeepTier::Medium)
    } else if distance_m < thresholds.far_m {
        Some(BeepTier::Far)
    } else {
        None
    }
}

// ============================================================================
// STATE
// ============================================================================

/// Where an entity stands in the alert state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertPhase {
    Idle,
    Tracked,
    Alerted,
    Cooldown,
}

/// An entry of the active-alert set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAlert {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub distance_m: f64,
    /// Context time at which the alert was raised
    pub triggered_at: Duration,
}

/// What one evaluation pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertPass {
    /// Entities that entered the critical alert, closest first
    pub triggered: Vec<EntityId>,
    /// Entities that left the critical alert
    pub cleared: Vec<EntityId>,
    /// The entity the urgent voice cue was spoken for
    pub announced: Option<EntityId>,
}

/// Per-entity beep state. Exists only while the entity is in beep range.
struct BeepState {
    tier: BeepTier,
    /// Distance at the last (re)arm
    armed_distance: f64,
    /// Distance at the previous sample
    last_distance: f64,
    receding: bool,
    /// `None` while sound is disabled
    timer: Option<TaskHandle>,
}

impl BeepState {
    fn new(tier: BeepTier, distance_m: f64) -> Self {
        Self {
            tier,
            armed_distance: distance_m,
            last_distance: distance_m,
            receding: false,
            timer: None,
        }
    }

    /// Cancels the running timer, then installs the one built by `spawn`.
    fn replace_timer(&mut self, spawn: impl FnOnce() -> Option<TaskHandle>) {
        if let Some(mut old) = self.timer.take() {
            old.cancel();
        }
        self.timer = spawn();
    }

    fn cancel(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Owns every alert timer and the critical-alert sets of one session.
///
/// Generic over the context (clock + task spawning) and the device output,
/// so the same scheduler runs on tokio and in the drive simulator.
pub struct AlertScheduler<Ctx, Out>
where
    Ctx: RoadmateContext,
    Out: DeviceOutput,
{
    ctx: Arc<Ctx>,
    output: Arc<Out>,
    config: AlertConfig,
    thresholds: TierThresholds,

    /// Beeping entities
    beeps: HashMap<EntityId, BeepState>,

    /// Critical alerts currently shown
    active: HashMap<EntityId, ActiveAlert>,

    /// Alerted during this approach; cleared when the cooldown expires
    alerted: HashSet<EntityId>,

    /// Cooldown expiry (context time) per entity
    cooldowns: HashMap<EntityId, Duration>,

    running: bool,
}

impl<Ctx, Out> AlertScheduler<Ctx, Out>
where
    Ctx: RoadmateContext,
    Out: DeviceOutput,
{
    /// Creates a stopped scheduler. Call [`start`](Self::start) before evaluating.
    pub fn new(ctx: Arc<Ctx>, output: Arc<Out>, config: AlertConfig) -> Self {
        let thresholds = TierThresholds::from_config(&config);
        Self {
            ctx,
            output,
            config,
            thresholds,
            beeps: HashMap::new(),
            active: HashMap::new(),
            alerted: HashSet::new(),
            cooldowns: HashMap::new(),
            running: false,
        }
    }

    pub fn start(&mut self) {
        self.running = true;
        debug!("Alert scheduler started");
    }

    /// Cancels every timer and forgets all per-entity state.
    pub fn stop(&mut self) {
        self.cancel_all_beeps();
        self.active.clear();
        self.alerted.clear();
        self.cooldowns.clear();
        self.running = false;
        debug!("Alert scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn thresholds(&self) -> TierThresholds {
        self.thresholds
    }

    /// Swaps the configuration. Beep timers restart on the next pass.
    pub fn apply_config(&mut self, config: AlertConfig) {
        self.cancel_all_beeps();
        self.thresholds = TierThresholds::from_config(&config);
        self.config = config;
    }

    /// Toggles audio. Disabling cancels every live timer synchronously;
    /// the state machine keeps running either way.
    pub fn set_sound_enabled(&mut self, enabled: bool) {
        if self.config.enable_sound == enabled {
            return;
        }
        self.config.enable_sound = enabled;
        self.cancel_all_beeps();
        info!("Sound {}", if enabled { "enabled" } else { "disabled" });
    }

    fn cancel_all_beeps(&mut self) {
        for (_, mut state) in self.beeps.drain() {
            state.cancel();
        }
    }

    /// Processes one set of nearby entities (sorted by ascending distance).
    pub fn evaluate(&mut self, candidates: &[NearbyEntity]) -> AlertPass {
        let mut pass = AlertPass::default();
        if !self.running {
            return pass;
        }
        let now = self.ctx.now();

        // Step 1: Expired cooldowns make their entity eligible again
        self.expire_cooldowns(now);

        let include_mobile = self.config.include_mobile;
        let relevant: Vec<&NearbyEntity> = candidates
            .iter()
            .filter(|c| c.entity.active && (include_mobile || !c.entity.is_mobile))
            .collect();

        // Step 2: Beep cadence
        self.update_beeps(&relevant);

        // Step 3: Critical alert hysteresis
        let mut seen = HashSet::with_capacity(relevant.len());
        for candidate in &relevant {
            let id = candidate.entity.id;
            let distance_m = candidate.distance_m;
            seen.insert(id);

            if self.active.contains_key(&id) {
                if distance_m > self.config.critical_exit_m {
                    self.exit_alert(id, now);
                    pass.cleared.push(id);
                } else if let Some(alert) = self.active.get_mut(&id) {
                    alert.distance_m = distance_m;
                }
            } else if distance_m < self.config.critical_enter_m && !self.alerted.contains(&id) {
                info!("Critical alert for {} at {:.0}m", id, distance_m);
                self.active.insert(
                    id,
                    ActiveAlert {
                        entity_id: id,
                        kind: candidate.entity.kind,
                        distance_m,
                        triggered_at: now,
                    },
                );
                self.alerted.insert(id);
                pass.triggered.push(id);
            }
        }

        // An alerted entity that fell out of the candidate set has left range
        let gone: Vec<EntityId> = self
            .active
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        for id in gone {
            self.exit_alert(id, now);
            pass.cleared.push(id);
        }

        // Step 4: Urgent cues, once per pass, for the closest new alert
        if let Some(&first) = pass.triggered.first() {
            if self.config.enable_vibration {
                self.output.vibrate(&self.config.vibration_pattern);
            }
            if self.config.enable_voice {
                let distance_m = self.active.get(&first).map(|a| a.distance_m).unwrap_or_default();
                self.output.announce(Announcement::HazardAhead { distance_m });
                pass.announced = Some(first);
            }
        }

        pass
    }

    fn expire_cooldowns(&mut self, now: Duration) {
        let expired: Vec<EntityId> = self
            .cooldowns
            .iter()
            .filter(|(_, expiry)| **expiry <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.cooldowns.remove(&id);
            self.alerted.remove(&id);
            debug!("Cooldown cleared for {}", id);
        }
    }

    fn exit_alert(&mut self, id: EntityId, now: Duration) {
        self.active.remove(&id);
        // A fresh exit restarts the cooldown
        self.cooldowns
            .insert(id, now + Duration::from_secs(self.config.cooldown_secs));
        info!("Alert cleared for {}, cooldown {}s", id, self.config.cooldown_secs);
    }

    fn update_beeps(&mut self, relevant: &[&NearbyEntity]) {
        let mut in_range = HashSet::with_capacity(relevant.len());

        for candidate in relevant {
            if candidate.distance_m >= self.config.beep_range_m {
                continue;
            }
            let Some(tier) = select_tier(candidate.distance_m, &self.thresholds) else {
                continue;
            };
            in_range.insert(candidate.entity.id);
            self.track_beep(candidate.entity.id, tier, candidate.distance_m);
        }

        // Out of range: cancel and forget
        let stale: Vec<EntityId> = self
            .beeps
            .keys()
            .filter(|id| !in_range.contains(id))
            .copied()
            .collect();
        for id in stale {
            if let Some(mut state) = self.beeps.remove(&id) {
                state.cancel();
                debug!("Stopped beeping for {}", id);
            }
        }
    }

    fn track_beep(&mut self, id: EntityId, tier: BeepTier, distance_m: f64) {
        let spawn = self.beep_timer(id, tier);
        let rearm_delta = self.config.rearm_delta_m;
        let tolerance = self.config.receding_tolerance_m;

        match self.beeps.entry(id) {
            Entry::Vacant(slot) => {
                let mut state = BeepState::new(tier, distance_m);
                state.replace_timer(spawn);
                slot.insert(state);
                debug!("Beeping for {} at {:?} ({:.0}m)", id, tier, distance_m);
            }
            Entry::Occupied(mut slot) => {
                let state = slot.get_mut();
                let receding = distance_m > state.last_distance + tolerance;
                let tier_changed = state.tier != tier;
                let drifted = (distance_m - state.armed_distance).abs() > rearm_delta;
                let started_receding = receding && !state.receding;

                state.last_distance = distance_m;
                state.receding = receding;

                if tier_changed || drifted || started_receding {
                    if tier_changed {
                        debug!("Tier for {} changed to {:?} ({:.0}m)", id, tier, distance_m);
                    }
                    state.tier = tier;
                    state.armed_distance = distance_m;
                    state.replace_timer(spawn);
                }
            }
        }
    }

    /// Builds the spawner for one repeating tone timer.
    fn beep_timer(&self, id: EntityId, tier: BeepTier) -> impl FnOnce() -> Option<TaskHandle> {
        let ctx = self.ctx.clone();
        let output = self.output.clone();
        let sound = self.config.enable_sound;
        let tone = tier.tone(self.config.tone_duration_ms);
        let interval = tier.interval();

        move || {
            if !sound {
                return None;
            }
            let clock = ctx.clone();
            Some(ctx.spawn(&format!("beep-{}", id), async move {
                loop {
                    clock.sleep(interval).await;
                    output.play_tone(tone);
                }
            }))
        }
    }

    // ========================================================================
    // READ-ONLY SURFACE
    // ========================================================================

    /// Where `id` stands in the state machine right now.
    pub fn phase(&self, id: &EntityId) -> AlertPhase {
        if self.active.contains_key(id) {
            AlertPhase::Alerted
        } else if self
            .cooldowns
            .get(id)
            .is_some_and(|expiry| *expiry > self.ctx.now())
        {
            AlertPhase::Cooldown
        } else if self.beeps.contains_key(id) {
            AlertPhase::Tracked
        } else {
            AlertPhase::Idle
        }
    }

    /// Active critical alerts, closest first.
    pub fn active_alerts(&self) -> Vec<ActiveAlert> {
        let mut alerts: Vec<ActiveAlert> = self.active.values().cloned().collect();
        alerts.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        alerts
    }

    /// The single alert surfaced to the driver.
    pub fn closest_alert(&self) -> Option<ActiveAlert> {
        self.active
            .values()
            .min_by(|a, b| {
                a.distance_m
                    .total_cmp(&b.distance_m)
                    .then_with(|| a.entity_id.cmp(&b.entity_id))
            })
            .cloned()
    }

    /// The "+N more" count next to the closest alert.
    pub fn more_count(&self) -> usize {
        self.active.len().saturating_sub(1)
    }

    /// Current tier of a beeping entity.
    pub fn beep_tier(&self, id: &EntityId) -> Option<BeepTier> {
        self.beeps.get(id).map(|s| s.tier)
    }

    /// Number of entities currently beeping (or tracked silently).
    pub fn tracked_count(&self) -> usize {
        self.beeps.len()
    }

    /// Number of live tone timers.
    pub fn live_timers(&self) -> usize {
        self.beeps.values().filter(|s| s.timer.is_some()).count()
    }
}
