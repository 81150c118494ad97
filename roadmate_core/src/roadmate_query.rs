//! Proximity queries: validation and filtering around the [`SpatialIndex`].

use roadmate_env::GeoPoint;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::geo;
use crate::roadmate_space::{Entity, EntityKind, IndexError, SpatialIndex};

/// Radius used when the caller does not pass one.
pub const DEFAULT_RADIUS_KM: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("Invalid radius: {0} km (must be positive)")]
    InvalidRadius(f64),

    #[error("Spatial index lock poisoned")]
    Poisoned,
}

/// Optional restrictions applied after the distance filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityFilter {
    /// Only these kinds, if set
    #[serde(default)]
    pub kinds: Option<HashSet<EntityKind>>,

    /// ISO country code, compared case-insensitively
    #[serde(default)]
    pub country: Option<String>,
}

impl EntityFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn kinds(kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            country: None,
        }
    }

    pub fn with_country(mut self, country: &str) -> Self {
        self.country = Some(country.trim().to_ascii_uppercase());
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&entity.kind) {
                return false;
            }
        }
        if let Some(country) = &self.country {
            match &entity.country {
                Some(c) if c.eq_ignore_ascii_case(country) => {}
                _ => return false,
            }
        }
        true
    }
}

/// An entity with its distance from the query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyEntity {
    pub entity: Entity,
    pub distance_m: f64,
}

/// Read-side facade over the shared index.
///
/// The index is shared with the consensus verifier, which removes
/// deactivated entities; queries take the read lock only for the
/// duration of one lookup.
#[derive(Clone)]
pub struct ProximityQueryService {
    index: Arc<RwLock<SpatialIndex>>,
    default_radius_km: f64,
}

impl ProximityQueryService {
    pub fn new(index: Arc<RwLock<SpatialIndex>>) -> Self {
        Self {
            index,
            default_radius_km: DEFAULT_RADIUS_KM,
        }
    }

    pub fn with_default_radius(mut self, radius_km: f64) -> Self {
        self.default_radius_km = radius_km;
        self
    }

    /// Handle to the shared index.
    pub fn index(&self) -> Arc<RwLock<SpatialIndex>> {
        self.index.clone()
    }

    pub fn default_radius_km(&self) -> f64 {
        self.default_radius_km
    }

    /// Active entities near `(lat, lon)`, closest first.
    ///
    /// # Arguments
    /// * `radius_km` - `None` uses the default radius; larger values are
    ///   silently clamped to the index ceiling
    /// * `filter` - kind/country restriction
    pub fn query_nearby(
        &self,
        lat: f64,
        lon: f64,
        radius_km: Option<f64>,
        filter: &EntityFilter,
    ) -> Result<Vec<NearbyEntity>, QueryError> {
        // Step 1: Validate before touching the index
        if !geo::valid_coordinates(lat, lon) {
            return Err(QueryError::InvalidCoordinates { lat, lon });
        }
        let radius_km = radius_km.unwrap_or(self.default_radius_km);
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(QueryError::InvalidRadius(radius_km));
        }

        // Step 2: Grid lookup + exact distance
        let index = self.index.read().map_err(|_| QueryError::Poisoned)?;
        let hits = index
            .query_radius(lat, lon, radius_km)
            .map_err(|err| match err {
                IndexError::InvalidRadius(r) => QueryError::InvalidRadius(r),
                _ => QueryError::InvalidCoordinates { lat, lon },
            })?;

        // Step 3: Filter, keeping distance order
        Ok(hits
            .into_iter()
            .filter_map(|(id, distance_m)| {
                let entity = index.get(&id)?;
                filter.matches(entity).then(|| NearbyEntity {
                    entity: entity.clone(),
                    distance_m,
                })
            })
            .collect())
    }

    /// Convenience wrapper with the default radius and no filter.
    pub fn nearby(&self, position: GeoPoint) -> Result<Vec<NearbyEntity>, QueryError> {
        self.query_nearby(position.lat, position.lon, None, &EntityFilter::any())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadmate_env::EntityId;

    const LISBON: GeoPoint = GeoPoint {
        lat: 38.7223,
        lon: -9.1393,
    };

    fn shared(entities: Vec<Entity>) -> Arc<RwLock<SpatialIndex>> {
        let mut index = SpatialIndex::with_defaults();
        index.bulk_load(entities).unwrap();
        Arc::new(RwLock::new(index))
    }

    #[test]
    fn test_two_km_east_scenario() {
        let camera = Entity::new(EntityId::from_seed(1), EntityKind::Fixed, LISBON.lat, LISBON.lon);
        let service = ProximityQueryService::new(shared(vec![camera]));
        let probe = geo::offset_m(LISBON, 0.0, 2000.0);

        let wide = service
            .query_nearby(probe.lat, probe.lon, Some(2.5), &EntityFilter::any())
            .unwrap();
        assert_eq!(wide.len(), 1);
        assert!((wide[0].distance_m - 2000.0).abs() < 5.0);

        let narrow = service
            .query_nearby(probe.lat, probe.lon, Some(1.0), &EntityFilter::any())
            .unwrap();
        assert!(narrow.is_empty());
    }

    #[test]
    fn test_default_radius() {
        let near = geo::offset_m(LISBON, 1900.0, 0.0);
        let far = geo::offset_m(LISBON, 2100.0, 0.0);
        let service = ProximityQueryService::new(shared(vec![
            Entity::new(EntityId::from_seed(1), EntityKind::Fixed, near.lat, near.lon),
            Entity::new(EntityId::from_seed(2), EntityKind::Fixed, far.lat, far.lon),
        ]));

        let hits = service.nearby(LISBON).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity.id, EntityId::from_seed(1));
    }

    #[test]
    fn test_fifty_km_request_is_clamped() {
        let inside = geo::offset_m(LISBON, 4500.0, 0.0);
        let outside = geo::offset_m(LISBON, 0.0, 20_000.0);
        let service = ProximityQueryService::new(shared(vec![
            Entity::new(EntityId::from_seed(1), EntityKind::Fixed, inside.lat, inside.lon),
            Entity::new(EntityId::from_seed(2), EntityKind::Fixed, outside.lat, outside.lon),
        ]));

        let hits = service
            .query_nearby(LISBON.lat, LISBON.lon, Some(50.0), &EntityFilter::any())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits.iter().all(|h| h.distance_m <= 5000.0));
    }

    #[test]
    fn test_validation_errors() {
        let service = ProximityQueryService::new(shared(vec![]));
        assert_eq!(
            service.query_nearby(LISBON.lat, LISBON.lon, Some(0.0), &EntityFilter::any()),
            Err(QueryError::InvalidRadius(0.0))
        );
        assert!(matches!(
            service.query_nearby(-91.0, 0.0, None, &EntityFilter::any()),
            Err(QueryError::InvalidCoordinates { .. })
        ));
    }

    #[test]
    fn test_kind_and_country_filter() {
        let a = geo::offset_m(LISBON, 100.0, 0.0);
        let b = geo::offset_m(LISBON, 200.0, 0.0);
        let c = geo::offset_m(LISBON, 300.0, 0.0);
        let service = ProximityQueryService::new(shared(vec![
            Entity::new(EntityId::from_seed(1), EntityKind::Fixed, a.lat, a.lon).with_country("pt"),
            Entity::new(EntityId::from_seed(2), EntityKind::RedLight, b.lat, b.lon).with_country("PT"),
            Entity::new(EntityId::from_seed(3), EntityKind::Fixed, c.lat, c.lon).with_country("ES"),
        ]));

        let fixed = service
            .query_nearby(LISBON.lat, LISBON.lon, None, &EntityFilter::kinds([EntityKind::Fixed]))
            .unwrap();
        assert_eq!(fixed.len(), 2);

        let pt_fixed = service
            .query_nearby(
                LISBON.lat,
                LISBON.lon,
                None,
                &EntityFilter::kinds([EntityKind::Fixed]).with_country("pt"),
            )
            .unwrap();
        assert_eq!(pt_fixed.len(), 1);
        assert_eq!(pt_fixed[0].entity.id, EntityId::from_seed(1));
    }

    #[test]
    fn test_bulk_load_twice_is_idempotent() {
        let entities: Vec<Entity> = (0..20)
            .map(|i| {
                let p = geo::offset_m(LISBON, i as f64 * 150.0, (i % 4) as f64 * 200.0);
                Entity::new(EntityId::from_seed(i), EntityKind::Fixed, p.lat, p.lon)
            })
            .collect();

        let index = shared(entities.clone());
        let service = ProximityQueryService::new(index.clone());
        let once = service.nearby(LISBON).unwrap();

        index.write().unwrap().bulk_load(entities).unwrap();
        let twice = service.nearby(LISBON).unwrap();
        assert_eq!(once, twice);
    }
}
