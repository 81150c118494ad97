//! The "CONSENSUS" Engine - community verification of mobile reports
//!
//! Drivers near a community-reported entity vote on whether it is still
//! there. Votes are unique per (entity, user); a repeat vote overwrites the
//! earlier verdict. Once enough distinct users report `NotFound`, the entity
//! is deactivated and taken out of the shared spatial index.

use roadmate_env::{EntityId, GeoPoint, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;
use tracing::{info, warn};

use crate::geo;
use crate::roadmate_space::SpatialIndex;
use crate::roadmate_store::{DeactivationStore, StoreError};

// ============================================================================
// CONFIGURATION & TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Voters must be this close to the entity
    pub max_vote_distance_m: f64,

    /// Distinct `NotFound` voters needed to deactivate
    pub deactivation_threshold: usize,

    /// Points granted per accepted vote
    pub reward_points: u32,

    /// Lifetime votes (distinct entities) that unlock the achievement
    pub achievement_threshold: usize,

    pub achievement_name: String,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            max_vote_distance_m: 150.0,
            deactivation_threshold: 3,
            reward_points: 50,
            achievement_threshold: 10,
            achievement_name: "Community Verifier".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Confirmed,
    NotFound,
}

/// One user's current verdict on one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationVote {
    pub entity_id: EntityId,
    pub user_id: UserId,
    pub verdict: Verdict,
    pub submitted_at: SystemTime,
    pub location: GeoPoint,
}

/// Why a vote was not recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum RejectReason {
    #[error("Entity not found")]
    EntityNotFound,

    #[error("Entity is not mobile")]
    NotMobile,

    #[error("Entity is not active")]
    Inactive,

    #[error("Too far from entity ({distance_m:.0}m). Must be within {max_m:.0}m to verify.")]
    TooFar { distance_m: f64, max_m: f64 },

    #[error("Invalid voter coordinates")]
    InvalidCoordinates,
}

/// Result of a submission. Rejections are values, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub accepted: bool,
    pub deactivated: bool,
    pub confirmed_count: usize,
    pub not_found_count: usize,
    pub reason: Option<RejectReason>,
    /// Reward for this vote (0 when rejected)
    pub reward_points: u32,
    /// Achievement unlocked by this vote, if any
    pub achievement: Option<String>,
}

impl VerificationOutcome {
    fn rejected(reason: RejectReason, (confirmed, not_found): (usize, usize)) -> Self {
        Self {
            accepted: false,
            deactivated: false,
            confirmed_count: confirmed,
            not_found_count: not_found,
            reason: Some(reason),
            reward_points: 0,
            achievement: None,
        }
    }
}

#[derive(Debug, Default)]
struct VoterRecord {
    points: u64,
    entities_voted: HashSet<EntityId>,
    achievements: HashSet<String>,
}

// ============================================================================
// VERIFIER
// ============================================================================

/// Vote book, voter ledger and deactivation path.
///
/// The vote book and ledger sit behind their own lock; the spatial index
/// is shared with the query side and only write-locked to deactivate.
pub struct ConsensusVerifier {
    index: Arc<RwLock<SpatialIndex>>,
    votes: Mutex<HashMap<EntityId, HashMap<UserId, VerificationVote>>>,
    voters: Mutex<HashMap<UserId, VoterRecord>>,
    store: Option<Arc<dyn DeactivationStore>>,
    config: ConsensusConfig,
}

impl ConsensusVerifier {
    pub fn new(index: Arc<RwLock<SpatialIndex>>, config: ConsensusConfig) -> Self {
        Self {
            index,
            votes: Mutex::new(HashMap::new()),
            voters: Mutex::new(HashMap::new()),
            store: None,
            config,
        }
    }

    /// Create a verifier with persistent deactivation storage.
    ///
    /// Stored deactivations are applied to the index immediately.
    pub fn with_store(
        index: Arc<RwLock<SpatialIndex>>,
        config: ConsensusConfig,
        store: Arc<dyn DeactivationStore>,
    ) -> Result<Self, StoreError> {
        let verifier = Self {
            store: Some(store),
            ..Self::new(index, config)
        };
        verifier.reapply_deactivations()?;
        Ok(verifier)
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Re-applies every stored deactivation to the index.
    ///
    /// Call after a bulk reload so retired entities stay retired.
    ///
    /// # Returns
    /// Number of entities that were active and got deactivated.
    pub fn reapply_deactivations(&self) -> Result<usize, StoreError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let retired = store.load_all()?;
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);

        let applied = retired
            .iter()
            .filter(|id| matches!(index.deactivate(id), Ok(true)))
            .count();
        if applied > 0 {
            info!("Re-applied {} stored deactivations", applied);
        }
        Ok(applied)
    }

    /// Submits a vote at the current wall-clock time.
    pub fn submit(
        &self,
        entity_id: EntityId,
        user_id: UserId,
        verdict: Verdict,
        lat: f64,
        lon: f64,
    ) -> VerificationOutcome {
        self.submit_at(entity_id, user_id, verdict, lat, lon, SystemTime::now())
    }

    /// Submits a vote with an explicit timestamp.
    pub fn submit_at(
        &self,
        entity_id: EntityId,
        user_id: UserId,
        verdict: Verdict,
        lat: f64,
        lon: f64,
        submitted_at: SystemTime,
    ) -> VerificationOutcome {
        let tallies = self.tally(&entity_id);

        // Step 1: Validate voter and target
        if !geo::valid_coordinates(lat, lon) {
            return VerificationOutcome::rejected(RejectReason::InvalidCoordinates, tallies);
        }
        let location = GeoPoint::new(lat, lon);

        let target = {
            let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
            index
                .get(&entity_id)
                .map(|e| (e.is_mobile, e.active, e.position()))
        };
        let Some((is_mobile, active, position)) = target else {
            return VerificationOutcome::rejected(RejectReason::EntityNotFound, tallies);
        };
        if !is_mobile {
            return VerificationOutcome::rejected(RejectReason::NotMobile, tallies);
        }
        if !active {
            return VerificationOutcome::rejected(RejectReason::Inactive, tallies);
        }

        let distance_m = geo::distance_m(location, position);
        if distance_m > self.config.max_vote_distance_m {
            return VerificationOutcome::rejected(
                RejectReason::TooFar {
                    distance_m,
                    max_m: self.config.max_vote_distance_m,
                },
                tallies,
            );
        }

        // Step 2: Upsert and count distinct voters
        let (confirmed_count, not_found_count) = {
            let mut votes = self.votes.lock().unwrap_or_else(PoisonError::into_inner);
            let book = votes.entry(entity_id).or_default();
            book.insert(
                user_id,
                VerificationVote {
                    entity_id,
                    user_id,
                    verdict,
                    submitted_at,
                    location,
                },
            );
            Self::count(book)
        };

        // Step 3: Rewards
        let achievement = self.reward(user_id, entity_id);

        // Step 4: Deactivate on consensus
        let mut deactivated = false;
        if not_found_count >= self.config.deactivation_threshold {
            deactivated = self.deactivate(entity_id, not_found_count);
        }

        VerificationOutcome {
            accepted: true,
            deactivated,
            confirmed_count,
            not_found_count,
            reason: None,
            reward_points: self.config.reward_points,
            achievement,
        }
    }

    fn count(book: &HashMap<UserId, VerificationVote>) -> (usize, usize) {
        book.values().fold((0, 0), |(c, n), vote| match vote.verdict {
            Verdict::Confirmed => (c + 1, n),
            Verdict::NotFound => (c, n + 1),
        })
    }

    /// Grants points and, once, the achievement.
    fn reward(&self, user_id: UserId, entity_id: EntityId) -> Option<String> {
        let mut voters = self.voters.lock().unwrap_or_else(PoisonError::into_inner);
        let record = voters.entry(user_id).or_default();
        record.points += u64::from(self.config.reward_points);
        record.entities_voted.insert(entity_id);

        let name = &self.config.achievement_name;
        if record.entities_voted.len() >= self.config.achievement_threshold
            && !record.achievements.contains(name)
        {
            record.achievements.insert(name.clone());
            info!("{} unlocked \"{}\"", user_id, name);
            return Some(name.clone());
        }
        None
    }

    /// Marks the entity inactive in the index and persists it.
    ///
    /// # Returns
    /// `true` only for the call that actually retired the entity.
    fn deactivate(&self, entity_id: EntityId, not_found_count: usize) -> bool {
        let was_active = {
            let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
            matches!(index.deactivate(&entity_id), Ok(true))
        };
        if !was_active {
            return false;
        }

        info!(
            "Entity {} deactivated after {} not-found reports",
            entity_id, not_found_count
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.insert(entity_id) {
                // In-memory deactivation still holds
                warn!("Failed to persist deactivation of {}: {}", entity_id, e);
            }
        }
        true
    }

    // ========================================================================
    // READ-ONLY SURFACE
    // ========================================================================

    /// `(confirmed, not_found)` distinct voter counts.
    pub fn tally(&self, entity_id: &EntityId) -> (usize, usize) {
        let votes = self.votes.lock().unwrap_or_else(PoisonError::into_inner);
        votes.get(entity_id).map(Self::count).unwrap_or((0, 0))
    }

    /// A user's current vote on an entity.
    pub fn vote(&self, entity_id: &EntityId, user_id: &UserId) -> Option<VerificationVote> {
        let votes = self.votes.lock().unwrap_or_else(PoisonError::into_inner);
        votes.get(entity_id)?.get(user_id).cloned()
    }

    /// Lifetime points of a user.
    pub fn points(&self, user_id: &UserId) -> u64 {
        let voters = self.voters.lock().unwrap_or_else(PoisonError::into_inner);
        voters.get(user_id).map(|r| r.points).unwrap_or(0)
    }

    pub fn has_achievement(&self, user_id: &UserId) -> bool {
        let voters = self.voters.lock().unwrap_or_else(PoisonError::into_inner);
        voters
            .get(user_id)
            .is_some_and(|r| r.achievements.contains(&self.config.achievement_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roadmate_space::{Entity, EntityKind};
    use crate::roadmate_store::{MemoryDeactivationStore, SledDeactivationStore};

    const SPOT: GeoPoint = GeoPoint {
        lat: 38.7223,
        lon: -9.1393,
    };

    fn shared_index() -> Arc<RwLock<SpatialIndex>> {
        let mut index = SpatialIndex::with_defaults();
        index
            .bulk_load(vec![
                Entity::new(EntityId::from_seed(1), EntityKind::Mobile, SPOT.lat, SPOT.lon),
                Entity::new(EntityId::from_seed(2), EntityKind::Fixed, SPOT.lat, SPOT.lon),
            ])
            .unwrap();
        Arc::new(RwLock::new(index))
    }

    fn vote(verifier: &ConsensusVerifier, user: u64, verdict: Verdict) -> VerificationOutcome {
        let at = geo::offset_m(SPOT, 40.0, 0.0);
        verifier.submit(EntityId::from_seed(1), UserId::from_seed(user), verdict, at.lat, at.lon)
    }

    #[test]
    fn test_three_distinct_not_found_deactivates() {
        let index = shared_index();
        let verifier = ConsensusVerifier::new(index.clone(), ConsensusConfig::default());

        assert!(!vote(&verifier, 1, Verdict::NotFound).deactivated);
        assert!(!vote(&verifier, 2, Verdict::NotFound).deactivated);
        let third = vote(&verifier, 3, Verdict::NotFound);
        assert!(third.accepted);
        assert!(third.deactivated);
        assert_eq!(third.not_found_count, 3);

        let index = index.read().unwrap();
        assert!(!index.get(&EntityId::from_seed(1)).unwrap().active);
        assert!(index.query_radius(SPOT.lat, SPOT.lon, 1.0).unwrap().iter().all(|(id, _)| *id != EntityId::from_seed(1)));
    }

    #[test]
    fn test_repeat_vote_does_not_change_tally() {
        let verifier = ConsensusVerifier::new(shared_index(), ConsensusConfig::default());
        for user in 1..=3 {
            vote(&verifier, user, Verdict::NotFound);
        }

        // Already-counted user after deactivation
        let fourth = vote(&verifier, 2, Verdict::NotFound);
        assert!(!fourth.accepted);
        assert!(!fourth.deactivated);
        assert_eq!(fourth.reason, Some(RejectReason::Inactive));
        assert_eq!(verifier.tally(&EntityId::from_seed(1)), (0, 3));
    }

    #[test]
    fn test_vote_upsert() {
        let verifier = ConsensusVerifier::new(shared_index(), ConsensusConfig::default());

        let first = vote(&verifier, 1, Verdict::NotFound);
        assert_eq!((first.confirmed_count, first.not_found_count), (0, 1));

        let changed = vote(&verifier, 1, Verdict::Confirmed);
        assert_eq!((changed.confirmed_count, changed.not_found_count), (1, 0));

        let stored = verifier
            .vote(&EntityId::from_seed(1), &UserId::from_seed(1))
            .unwrap();
        assert_eq!(stored.verdict, Verdict::Confirmed);
    }

    #[test]
    fn test_rejections() {
        let verifier = ConsensusVerifier::new(shared_index(), ConsensusConfig::default());
        let user = UserId::from_seed(1);

        let far = geo::offset_m(SPOT, 400.0, 0.0);
        let outcome = verifier.submit(EntityId::from_seed(1), user, Verdict::NotFound, far.lat, far.lon);
        assert!(!outcome.accepted);
        match outcome.reason {
            Some(RejectReason::TooFar { distance_m, max_m }) => {
                assert!((distance_m - 400.0).abs() < 1.0);
                assert_eq!(max_m, 150.0);
            }
            other => panic!("unexpected reason: {:?}", other),
        }
        assert_eq!(verifier.tally(&EntityId::from_seed(1)), (0, 0));

        let fixed = verifier.submit(EntityId::from_seed(2), user, Verdict::NotFound, SPOT.lat, SPOT.lon);
        assert_eq!(fixed.reason, Some(RejectReason::NotMobile));

        let missing = verifier.submit(EntityId::from_seed(9), user, Verdict::NotFound, SPOT.lat, SPOT.lon);
        assert_eq!(missing.reason, Some(RejectReason::EntityNotFound));

        let bad = verifier.submit(EntityId::from_seed(1), user, Verdict::NotFound, 91.0, 0.0);
        assert_eq!(bad.reason, Some(RejectReason::InvalidCoordinates));
        assert_eq!(verifier.points(&user), 0);
    }

    #[test]
    fn test_too_far_message() {
        let reason = RejectReason::TooFar {
            distance_m: 412.4,
            max_m: 150.0,
        };
        assert_eq!(
            reason.to_string(),
            "Too far from entity (412m). Must be within 150m to verify."
        );
    }

    #[test]
    fn test_rewards_and_achievement_once() {
        let mut index = SpatialIndex::with_defaults();
        let entities: Vec<Entity> = (0..12)
            .map(|i| {
                let p = geo::offset_m(SPOT, i as f64 * 10.0, 0.0);
                Entity::new(EntityId::from_seed(100 + i), EntityKind::Mobile, p.lat, p.lon)
            })
            .collect();
        index.bulk_load(entities).unwrap();
        let verifier = ConsensusVerifier::new(Arc::new(RwLock::new(index)), ConsensusConfig::default());
        let user = UserId::from_seed(7);

        let mut unlocked = Vec::new();
        for i in 0..12 {
            let outcome = verifier.submit(EntityId::from_seed(100 + i), user, Verdict::Confirmed, SPOT.lat, SPOT.lon);
            assert_eq!(outcome.reward_points, 50);
            if let Some(name) = outcome.achievement {
                unlocked.push((i, name));
            }
        }
        // Re-voting the same entity earns points but no second unlock
        verifier.submit(EntityId::from_seed(100), user, Verdict::NotFound, SPOT.lat, SPOT.lon);

        assert_eq!(unlocked, vec![(9, "Community Verifier".to_string())]);
        assert_eq!(verifier.points(&user), 13 * 50);
        assert!(verifier.has_achievement(&user));
    }

    #[test]
    fn test_deactivation_survives_reload() {
        let index = shared_index();
        let store: Arc<dyn DeactivationStore> = Arc::new(SledDeactivationStore::open_temporary().unwrap());
        let verifier =
            ConsensusVerifier::with_store(index.clone(), ConsensusConfig::default(), store.clone()).unwrap();

        for user in 1..=3 {
            vote(&verifier, user, Verdict::NotFound);
        }
        assert!(store.contains(&EntityId::from_seed(1)));

        // A dataset refresh brings the entity back as active...
        index
            .write()
            .unwrap()
            .bulk_load(vec![Entity::new(EntityId::from_seed(1), EntityKind::Mobile, SPOT.lat, SPOT.lon)])
            .unwrap();
        // ...until stored deactivations are re-applied
        assert_eq!(verifier.reapply_deactivations().unwrap(), 1);
        assert!(!index.read().unwrap().get(&EntityId::from_seed(1)).unwrap().active);
    }

    #[test]
    fn test_with_store_hydrates_index() {
        let store = Arc::new(MemoryDeactivationStore::new());
        store.insert(EntityId::from_seed(1)).unwrap();

        let index = shared_index();
        ConsensusVerifier::with_store(index.clone(), ConsensusConfig::default(), store).unwrap();
        assert_eq!(index.read().unwrap().active_count(), 1);
    }
}
