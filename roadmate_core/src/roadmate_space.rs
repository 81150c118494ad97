//! The "SPACE" Engine - fixed-cell geographic grid over hazard entities
//!
//! Entities live in one authoritative map keyed by id. Active entities are
//! additionally bucketed into 0.25° lat/lon cells so a radius query only
//! inspects a small rectangle of cells before the exact haversine filter.
//!
//! Longitude buckets wrap at the antimeridian. Near the poles the cosine
//! used to size the longitude span is clamped, and a query circle that
//! contains a pole scans the full ring of longitude buckets.

use roadmate_env::{EntityId, GeoPoint};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::geo;

// ============================================================================
// ENTITY MODEL
// ============================================================================

/// Category of a hazard entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Fixed,
    Mobile,
    RedLight,
    Section,
    Tunnel,
    Variable,
    Other,
}

impl EntityKind {
    /// Lenient parse of a source label. Unknown labels map to `Other`.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "fixed" | "speed" | "speed_camera" => EntityKind::Fixed,
            "mobile" | "mobile_radar" => EntityKind::Mobile,
            "red_light" | "redlight" | "traffic_light" => EntityKind::RedLight,
            "section" | "average_speed" | "average" => EntityKind::Section,
            "tunnel" => EntityKind::Tunnel,
            "variable" | "variable_speed" => EntityKind::Variable,
            _ => EntityKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Fixed => "fixed",
            EntityKind::Mobile => "mobile",
            EntityKind::RedLight => "red_light",
            EntityKind::Section => "section",
            EntityKind::Tunnel => "tunnel",
            EntityKind::Variable => "variable",
            EntityKind::Other => "other",
        }
    }
}

/// A hazard entity (speed camera, red-light camera, mobile radar report...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier
    pub id: EntityId,

    pub kind: EntityKind,

    /// WGS84 position
    pub lat: f64,
    pub lon: f64,

    /// Posted limit, if known
    #[serde(default)]
    pub speed_limit_kmh: Option<u32>,

    /// Community-reported, may be deactivated by consensus
    #[serde(default)]
    pub is_mobile: bool,

    /// Inactive entities are never returned by queries
    #[serde(default = "default_active")]
    pub active: bool,

    /// ISO country code, uppercase
    #[serde(default)]
    pub country: Option<String>,

    #[serde(default)]
    pub label: Option<String>,
}

fn default_active() -> bool {
    true
}

impl Entity {
    /// Creates an active entity. `is_mobile` follows the kind.
    pub fn new(id: EntityId, kind: EntityKind, lat: f64, lon: f64) -> Self {
        Self {
            id,
            kind,
            lat,
            lon,
            speed_limit_kmh: None,
            is_mobile: kind == EntityKind::Mobile,
            active: true,
            country: None,
            label: None,
        }
    }

    pub fn with_speed_limit(mut self, kmh: u32) -> Self {
        self.speed_limit_kmh = Some(kmh);
        self
    }

    pub fn with_country(mut self, country: &str) -> Self {
        self.country = Some(country.trim().to_ascii_uppercase());
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

// ============================================================================
// CONFIGURATION & ERRORS
// ============================================================================

/// Grid and query limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Cell edge in degrees (both axes)
    pub cell_size_deg: f64,

    /// Queries are clamped to this radius
    pub max_radius_km: f64,

    /// Kilometers per degree used to size the cell rectangle
    pub km_per_degree: f64,

    /// Lower bound for cos(lat) when sizing the longitude span
    pub min_cos_lat: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            cell_size_deg: 0.25,
            max_radius_km: 5.0,
            km_per_degree: 111.0,
            min_cos_lat: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexError {
    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("Invalid radius: {0} km")]
    InvalidRadius(f64),

    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),
}

// ============================================================================
// GRID
// ============================================================================

/// A 0.25° x 0.25° bucket. Buckets count from the south pole and the
/// antimeridian respectively, so both are non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
    pub lat_bucket: i32,
    pub lon_bucket: i32,
}

/// The spatial index over all known entities.
pub struct SpatialIndex {
    /// Authoritative store, active or not
    entities: HashMap<EntityId, Entity>,

    /// Cell -> active entity ids
    cells: HashMap<GridCell, HashSet<EntityId>>,

    /// Active entity -> its cell
    membership: HashMap<EntityId, GridCell>,

    config: IndexConfig,
}

impl SpatialIndex {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            entities: HashMap::new(),
            cells: HashMap::new(),
            membership: HashMap::new(),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(IndexConfig::default())
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn lat_buckets(&self) -> i32 {
        (180.0 / self.config.cell_size_deg).ceil() as i32
    }

    fn lon_buckets(&self) -> i32 {
        (360.0 / self.config.cell_size_deg).ceil() as i32
    }

    /// The cell containing `(lat, lon)`. Longitude 180 wraps onto -180.
    pub fn cell_for(&self, lat: f64, lon: f64) -> GridCell {
        let size = self.config.cell_size_deg;
        let lat_bucket = (((lat + 90.0) / size).floor() as i32).clamp(0, self.lat_buckets() - 1);
        let lon_bucket = (((lon + 180.0) / size).floor() as i32).rem_euclid(self.lon_buckets());
        GridCell {
            lat_bucket,
            lon_bucket,
        }
    }

    fn bucket(&mut self, id: EntityId, cell: GridCell) {
        self.cells.entry(cell).or_default().insert(id);
        self.membership.insert(id, cell);
    }

    fn unbucket(&mut self, id: &EntityId) -> Option<GridCell> {
        let cell = self.membership.remove(id)?;
        if let Some(members) = self.cells.get_mut(&cell) {
            members.remove(id);
            if members.is_empty() {
                self.cells.remove(&cell);
            }
        }
        Some(cell)
    }

    /// Insert or replace an entity.
    ///
    /// # Returns
    /// The cell the entity was bucketed into, or `None` if it is inactive.
    pub fn insert(&mut self, entity: Entity) -> Result<Option<GridCell>, IndexError> {
        if !geo::valid_coordinates(entity.lat, entity.lon) {
            return Err(IndexError::InvalidCoordinates {
                lat: entity.lat,
                lon: entity.lon,
            });
        }

        // Step 1: Drop any stale cell membership
        self.unbucket(&entity.id);

        // Step 2: Bucket if active
        let cell = if entity.active {
            let cell = self.cell_for(entity.lat, entity.lon);
            self.bucket(entity.id, cell);
            Some(cell)
        } else {
            None
        };

        // Step 3: Record
        self.entities.insert(entity.id, entity);
        Ok(cell)
    }

    /// Replace the whole contents of the index.
    ///
    /// Every entity is validated before anything is cleared, so a rejected
    /// batch leaves the index untouched.
    pub fn bulk_load(&mut self, entities: Vec<Entity>) -> Result<usize, IndexError> {
        if let Some(bad) = entities
            .iter()
            .find(|e| !geo::valid_coordinates(e.lat, e.lon))
        {
            return Err(IndexError::InvalidCoordinates {
                lat: bad.lat,
                lon: bad.lon,
            });
        }

        self.entities.clear();
        self.cells.clear();
        self.membership.clear();

        // Repeated ids: the last record wins, in exactly one cell
        for entity in entities {
            self.unbucket(&entity.id);
            if entity.active {
                let cell = self.cell_for(entity.lat, entity.lon);
                self.bucket(entity.id, cell);
            }
            self.entities.insert(entity.id, entity);
        }

        tracing::debug!(
            "Bulk loaded {} entities into {} cells",
            self.entities.len(),
            self.cells.len()
        );
        Ok(self.entities.len())
    }

    /// Take an entity out of the grid. Its record stays readable via [`get`](Self::get).
    pub fn remove(&mut self, id: &EntityId) -> Option<GridCell> {
        self.unbucket(id)
    }

    /// Mark an entity inactive and take it out of the grid.
    ///
    /// # Returns
    /// `true` if the entity was active before the call.
    pub fn deactivate(&mut self, id: &EntityId) -> Result<bool, IndexError> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or(IndexError::UnknownEntity(*id))?;
        let was_active = entity.active;
        entity.active = false;
        self.unbucket(id);
        Ok(was_active)
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.membership.len()
    }

    /// The radius actually used for a request.
    pub fn clamp_radius(&self, radius_km: f64) -> f64 {
        radius_km.min(self.config.max_radius_km)
    }

    /// Cells covering the query circle (rectangle, inclusive).
    pub fn cells_in_range(&self, lat: f64, lon: f64, radius_km: f64) -> Vec<GridCell> {
        let size = self.config.cell_size_deg;
        let lat_range = radius_km / self.config.km_per_degree;

        // Size the longitude span at the poleward edge of the circle
        let edge_lat = (lat.abs() + lat_range).min(90.0);
        let edge_cos = edge_lat.to_radians().cos();
        let cos_lat = edge_cos.max(self.config.min_cos_lat);
        let lon_range = radius_km / (self.config.km_per_degree * cos_lat);

        // Past the clamp the span would be too narrow: take the full ring
        let full_ring = edge_cos < self.config.min_cos_lat;

        let lat_steps = (lat_range / size).ceil() as i32;
        let lon_steps = (lon_range / size).ceil() as i32;

        let center = self.cell_for(lat, lon);
        let n_lat = self.lat_buckets();
        let n_lon = self.lon_buckets();

        let lat_lo = (center.lat_bucket - lat_steps).max(0);
        let lat_hi = (center.lat_bucket + lat_steps).min(n_lat - 1);

        let lon_buckets: Vec<i32> = if full_ring || lat.abs() + lat_range >= 90.0 || 2 * lon_steps + 1 >= n_lon {
            (0..n_lon).collect()
        } else {
            (-lon_steps..=lon_steps)
                .map(|offset| (center.lon_bucket + offset).rem_euclid(n_lon))
                .collect()
        };

        let mut cells = Vec::with_capacity(((lat_hi - lat_lo + 1) as usize) * lon_buckets.len());
        for lat_bucket in lat_lo..=lat_hi {
            for &lon_bucket in &lon_buckets {
                cells.push(GridCell {
                    lat_bucket,
                    lon_bucket,
                });
            }
        }
        cells
    }

    /// Active entities within `radius_km` of `(lat, lon)`, closest first.
    ///
    /// # Arguments
    /// * `radius_km` - must be positive; values above the configured
    ///   maximum are clamped
    ///
    /// # Returns
    /// `(id, distance_m)` pairs sorted by distance, ties by id.
    pub fn query_radius(
        &self,
        lat: f64,
        lon: f64,
        radius_km: f64,
    ) -> Result<Vec<(EntityId, f64)>, IndexError> {
        if !geo::valid_coordinates(lat, lon) {
            return Err(IndexError::InvalidCoordinates { lat, lon });
        }
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(IndexError::InvalidRadius(radius_km));
        }

        let radius_km = self.clamp_radius(radius_km);
        let radius_m = radius_km * 1000.0;
        let origin = GeoPoint::new(lat, lon);

        // Step 1: Union of candidates from the covering cells
        let mut candidates: HashSet<EntityId> = HashSet::new();
        for cell in self.cells_in_range(lat, lon, radius_km) {
            if let Some(members) = self.cells.get(&cell) {
                candidates.extend(members.iter().copied());
            }
        }

        // Step 2: Exact filter
        let mut results: Vec<(EntityId, f64)> = candidates
            .into_iter()
            .filter_map(|id| {
                let entity = self.entities.get(&id)?;
                if !entity.active {
                    return None;
                }
                let d = geo::distance_m(origin, entity.position());
                (d <= radius_m).then_some((id, d))
            })
            .collect();

        // Step 3: Closest first
        results.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(results)
    }

    /// Get statistics about the spatial index
    pub fn stats(&self) -> SpatialStats {
        let active_entities = self.membership.len();
        let occupied_cells = self.cells.len();
        let avg_entities_per_cell = if occupied_cells > 0 {
            active_entities as f64 / occupied_cells as f64
        } else {
            0.0
        };

        SpatialStats {
            total_entities: self.entities.len(),
            active_entities,
            occupied_cells,
            avg_entities_per_cell,
        }
    }

    /// Iterate over every known entity (active or not).
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Statistics about the spatial index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialStats {
    pub total_entities: usize,
    pub active_entities: usize,
    pub occupied_cells: usize,
    pub avg_entities_per_cell: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn camera(seed: u64, lat: f64, lon: f64) -> Entity {
        Entity::new(EntityId::from_seed(seed), EntityKind::Fixed, lat, lon)
    }

    #[test]
    fn test_index_creation() {
        let index = SpatialIndex::with_defaults();
        assert!(index.is_empty());
        assert_eq!(index.stats().occupied_cells, 0);
    }

    #[test]
    fn test_cell_bucketing() {
        let index = SpatialIndex::with_defaults();
        let a = index.cell_for(38.70, -9.14);
        let b = index.cell_for(38.74, -9.10);
        assert_eq!(a, b);
        assert_ne!(a, index.cell_for(38.76, -9.14));
        // 180 and -180 are the same meridian
        assert_eq!(index.cell_for(0.0, 180.0), index.cell_for(0.0, -180.0));
    }

    #[test]
    fn test_insert_and_query() {
        let mut index = SpatialIndex::with_defaults();
        let origin = GeoPoint::new(38.7223, -9.1393);

        let near = geo::offset_m(origin, 500.0, 0.0);
        let far = geo::offset_m(origin, 0.0, 3000.0);
        index.insert(camera(1, near.lat, near.lon)).unwrap();
        index.insert(camera(2, far.lat, far.lon)).unwrap();

        let hits = index.query_radius(origin.lat, origin.lon, 2.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, EntityId::from_seed(1));
        assert!((hits[0].1 - 500.0).abs() < 1.0);
    }

    #[test]
    fn test_results_sorted_by_distance() {
        let mut index = SpatialIndex::with_defaults();
        let origin = GeoPoint::new(45.0, 7.0);
        for (seed, meters) in [(1u64, 1500.0), (2, 200.0), (3, 900.0)] {
            let p = geo::offset_m(origin, meters, 0.0);
            index.insert(camera(seed, p.lat, p.lon)).unwrap();
        }

        let hits = index.query_radius(origin.lat, origin.lon, 2.0).unwrap();
        let ids: Vec<_> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(
            ids,
            vec![EntityId::from_seed(2), EntityId::from_seed(3), EntityId::from_seed(1)]
        );
    }

    #[test]
    fn test_query_across_cell_boundary() {
        let mut index = SpatialIndex::with_defaults();
        // 38.75 is a cell edge; the camera sits just north of it
        index.insert(camera(1, 38.7510, -9.14)).unwrap();
        let hits = index.query_radius(38.7490, -9.14, 1.0).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_query_across_antimeridian() {
        let mut index = SpatialIndex::with_defaults();
        index.insert(camera(1, -17.0, 179.995)).unwrap();
        let hits = index.query_radius(-17.0, -179.995, 2.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].1 < 1100.0);
    }

    #[test]
    fn test_radius_is_clamped() {
        let mut index = SpatialIndex::with_defaults();
        let origin = GeoPoint::new(50.0, 4.0);
        let p = geo::offset_m(origin, 8000.0, 0.0);
        index.insert(camera(1, p.lat, p.lon)).unwrap();

        let hits = index.query_radius(origin.lat, origin.lon, 100.0).unwrap();
        assert!(hits.is_empty());
        assert_eq!(index.clamp_radius(100.0), 5.0);
    }

    #[test]
    fn test_invalid_radius_rejected() {
        let index = SpatialIndex::with_defaults();
        assert_eq!(
            index.query_radius(0.0, 0.0, 0.0),
            Err(IndexError::InvalidRadius(0.0))
        );
        assert!(index.query_radius(0.0, 0.0, -1.0).is_err());
        assert!(index.query_radius(0.0, 0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_invalid_coordinates_rejected() {
        let mut index = SpatialIndex::with_defaults();
        assert!(index.insert(camera(1, 95.0, 0.0)).is_err());
        assert!(index.query_radius(0.0, 200.0, 1.0).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_reinsert_moves_cell() {
        let mut index = SpatialIndex::with_defaults();
        index.insert(camera(1, 10.0, 10.0)).unwrap();
        index.insert(camera(1, 20.0, 20.0)).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.stats().occupied_cells, 1);
        assert!(index.query_radius(10.0, 10.0, 1.0).unwrap().is_empty());
        assert_eq!(index.query_radius(20.0, 20.0, 1.0).unwrap().len(), 1);
    }

    #[test]
    fn test_deactivate_removes_from_grid() {
        let mut index = SpatialIndex::with_defaults();
        index.insert(camera(1, 10.0, 10.0)).unwrap();

        assert_eq!(index.deactivate(&EntityId::from_seed(1)), Ok(true));
        assert_eq!(index.deactivate(&EntityId::from_seed(1)), Ok(false));
        assert!(index.query_radius(10.0, 10.0, 1.0).unwrap().is_empty());
        assert_eq!(index.stats().occupied_cells, 0);

        let record = index.get(&EntityId::from_seed(1)).unwrap();
        assert!(!record.active);
        assert!(index.deactivate(&EntityId::from_seed(99)).is_err());
    }

    #[test]
    fn test_inactive_insert_is_not_bucketed() {
        let mut index = SpatialIndex::with_defaults();
        let mut entity = camera(1, 10.0, 10.0);
        entity.active = false;
        assert_eq!(index.insert(entity).unwrap(), None);
        assert_eq!(index.len(), 1);
        assert_eq!(index.active_count(), 0);
    }

    #[test]
    fn test_bulk_load_replaces_contents() {
        let mut index = SpatialIndex::with_defaults();
        index.insert(camera(1, 10.0, 10.0)).unwrap();

        let loaded = index
            .bulk_load(vec![camera(2, 20.0, 20.0), camera(3, 20.001, 20.0)])
            .unwrap();
        assert_eq!(loaded, 2);
        assert!(index.get(&EntityId::from_seed(1)).is_none());
        assert_eq!(index.query_radius(20.0, 20.0, 1.0).unwrap().len(), 2);
    }

    #[test]
    fn test_bulk_load_rejects_whole_batch() {
        let mut index = SpatialIndex::with_defaults();
        index.insert(camera(1, 10.0, 10.0)).unwrap();

        let result = index.bulk_load(vec![camera(2, 20.0, 20.0), camera(3, 120.0, 0.0)]);
        assert!(result.is_err());
        assert!(index.get(&EntityId::from_seed(1)).is_some());
        assert!(index.get(&EntityId::from_seed(2)).is_none());
    }

    #[test]
    fn test_query_near_pole() {
        let mut index = SpatialIndex::with_defaults();
        index.insert(camera(1, 89.99, 0.0)).unwrap();
        index.insert(camera(2, 89.99, 180.0)).unwrap();
        let hits = index.query_radius(89.995, 90.0, 5.0).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_query_in_polar_band() {
        let mut index = SpatialIndex::with_defaults();
        // Above ~84.3° the clamped cosine alone would size the span too small
        index.insert(camera(1, 89.0, 2.5)).unwrap();
        let hits = index.query_radius(89.0, 0.0, 5.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].1 < 5000.0);

        let ring = index.cells_in_range(85.0, 0.0, 1.0);
        assert!(ring.len() >= 1440);
        assert_eq!(ring.len() % 1440, 0);
    }

    #[test]
    fn test_bulk_load_duplicate_ids_last_wins() {
        let mut index = SpatialIndex::with_defaults();
        let id = EntityId::from_seed(1);

        // Same id on both sides of the 38.75 cell edge
        let loaded = index
            .bulk_load(vec![camera(1, 38.749, -9.14), camera(1, 38.751, -9.14)])
            .unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(index.active_count(), 1);
        assert_eq!(index.stats().occupied_cells, 1);
        assert_eq!(index.get(&id).unwrap().lat, 38.751);

        let north_cell = index.cell_for(38.751, -9.14);
        assert_eq!(index.remove(&id), Some(north_cell));
        assert!(index.query_radius(38.75, -9.14, 1.0).unwrap().is_empty());
        assert_eq!(index.stats().occupied_cells, 0);
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!(EntityKind::parse("Red-Light"), EntityKind::RedLight);
        assert_eq!(EntityKind::parse("mobile"), EntityKind::Mobile);
        assert_eq!(EntityKind::parse("average speed"), EntityKind::Section);
        assert_eq!(EntityKind::parse("something"), EntityKind::Other);
        assert!(Entity::new(EntityId::from_seed(1), EntityKind::Mobile, 0.0, 0.0).is_mobile);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// The grid never drops a hit that a linear scan would find.
        #[test]
        fn prop_grid_matches_linear_scan(
            lat in -89.9f64..89.9,
            lon in -180.0f64..180.0,
            radius_km in 0.1f64..5.0,
            offsets in prop::collection::vec((-6000.0f64..6000.0, -6000.0f64..6000.0), 1..40),
        ) {
            let mut index = SpatialIndex::with_defaults();
            let origin = GeoPoint::new(lat, lon);
            let mut expected = Vec::new();

            for (i, (north, east)) in offsets.iter().enumerate() {
                let p = geo::offset_m(origin, *north, *east);
                let id = EntityId::from_seed(i as u64);
                index.insert(Entity::new(id, EntityKind::Fixed, p.lat, p.lon)).unwrap();
                if geo::distance_m(origin, p) <= radius_km * 1000.0 {
                    expected.push(id);
                }
            }

            let mut found: Vec<EntityId> = index
                .query_radius(lat, lon, radius_km)
                .unwrap()
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            found.sort();
            expected.sort();
            prop_assert_eq!(found, expected);
        }
    }
}
