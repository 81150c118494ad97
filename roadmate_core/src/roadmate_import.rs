//! Camera dataset import.
//!
//! Accepts either a bare array of camera records or the unified
//! `{ "cameras": [...], "metadata": {...} }` layout. Each record is
//! validated on its own; a bad record is skipped, never the whole file.

use roadmate_env::EntityId;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::geo;
use crate::roadmate_space::{Entity, EntityKind};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to read dataset: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported dataset layout: {0}")]
    Layout(String),
}

/// One record as found in the dataset.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CameraRecord {
    #[serde(default)]
    id: Option<Value>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    speed_limit: Option<f64>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    is_mobile: Option<bool>,
    #[serde(default)]
    is_active: Option<bool>,
}

/// Import settings.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Keep only these countries (uppercase ISO codes), if set
    pub country_allowlist: Option<HashSet<String>>,
}

impl ImportOptions {
    pub fn countries<'a>(codes: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            country_allowlist: Some(
                codes
                    .into_iter()
                    .map(|c| c.trim().to_ascii_uppercase())
                    .filter(|c| !c.is_empty())
                    .collect(),
            ),
        }
    }
}

/// What an import produced.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Valid entities, ready for `SpatialIndex::bulk_load`
    pub entities: Vec<Entity>,
    /// Malformed or out-of-range records
    pub skipped: usize,
    /// Valid records outside the country allowlist
    pub filtered: usize,
    /// The dataset's metadata block, if present
    pub metadata: Option<Value>,
}

/// Stable id: UUID strings are kept, anything else is hashed (v5).
fn entity_id(raw: Option<&Value>, ordinal: usize) -> EntityId {
    let text = match raw {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("record-{}", ordinal),
    };
    match Uuid::parse_str(&text) {
        Ok(uuid) => EntityId::from_uuid(uuid),
        Err(_) => EntityId::from_uuid(Uuid::new_v5(&Uuid::NAMESPACE_OID, text.as_bytes())),
    }
}

fn convert(record: CameraRecord, ordinal: usize) -> Option<Entity> {
    let (lat, lon) = (record.latitude, record.longitude);
    // Zero coordinates are placeholders in the source datasets
    if !geo::valid_coordinates(lat, lon) || lat == 0.0 || lon == 0.0 {
        return None;
    }

    let kind = record
        .kind
        .as_deref()
        .map(EntityKind::parse)
        .unwrap_or(EntityKind::Fixed);

    let mut entity = Entity::new(entity_id(record.id.as_ref(), ordinal), kind, lat, lon);
    if let Some(limit) = record.speed_limit.filter(|l| l.is_finite() && *l > 0.0) {
        entity = entity.with_speed_limit(limit.round() as u32);
    }
    if let Some(country) = record.country.as_deref().filter(|c| !c.trim().is_empty()) {
        entity = entity.with_country(country);
    }
    if let Some(location) = record.location.as_deref() {
        entity = entity.with_label(location);
    }
    if let Some(is_mobile) = record.is_mobile {
        entity.is_mobile = is_mobile;
    }
    if let Some(is_active) = record.is_active {
        entity.active = is_active;
    }
    Some(entity)
}

/// Parses a dataset from JSON text.
pub fn parse_dataset(json: &str, options: &ImportOptions) -> Result<ImportReport, ImportError> {
    let root: Value = serde_json::from_str(json)?;

    // Step 1: Find the record array
    let (records, metadata) = match root {
        Value::Array(records) => (records, None),
        Value::Object(mut map) => {
            let metadata = map.remove("metadata");
            match map.remove("cameras") {
                Some(Value::Array(records)) => (records, metadata),
                _ => {
                    return Err(ImportError::Layout(
                        "object without a \"cameras\" array".to_string(),
                    ))
                }
            }
        }
        _ => return Err(ImportError::Layout("expected array or object".to_string())),
    };

    // Step 2: Validate each record
    let mut report = ImportReport {
        metadata,
        ..ImportReport::default()
    };
    for (ordinal, value) in records.into_iter().enumerate() {
        let entity = serde_json::from_value::<CameraRecord>(value)
            .ok()
            .and_then(|record| convert(record, ordinal));
        let Some(entity) = entity else {
            warn!("Skipping invalid camera record #{}", ordinal);
            report.skipped += 1;
            continue;
        };

        // Step 3: Country allowlist
        if let Some(allowed) = &options.country_allowlist {
            let keep = entity
                .country
                .as_ref()
                .is_some_and(|c| allowed.contains(c));
            if !keep {
                report.filtered += 1;
                continue;
            }
        }
        report.entities.push(entity);
    }

    info!(
        "Imported {} cameras ({} skipped, {} filtered)",
        report.entities.len(),
        report.skipped,
        report.filtered
    );
    Ok(report)
}

/// Reads and parses a dataset file.
pub fn load_dataset<P: AsRef<Path>>(path: P, options: &ImportOptions) -> Result<ImportReport, ImportError> {
    let json = std::fs::read_to_string(path)?;
    parse_dataset(&json, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIFIED: &str = r#"{
        "cameras": [
            { "id": "a1", "type": "fixed", "latitude": 38.72, "longitude": -9.14, "speedLimit": 50, "country": "pt", "location": "Av. da Liberdade" },
            { "id": "a2", "type": "mobile", "latitude": 40.41, "longitude": -3.70, "country": "ES", "isMobile": true },
            { "id": "a3", "type": "red_light", "latitude": 95.0, "longitude": 0.5 },
            { "id": "a4", "latitude": "not a number", "longitude": 1.0 },
            { "id": "a5", "type": "section", "latitude": 0.0, "longitude": 12.0 }
        ],
        "metadata": { "version": "2024.1", "duplicatesRemoved": 12 }
    }"#;

    #[test]
    fn test_unified_layout() {
        let report = parse_dataset(UNIFIED, &ImportOptions::default()).unwrap();
        assert_eq!(report.entities.len(), 2);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.metadata.as_ref().unwrap()["version"], "2024.1");

        let first = &report.entities[0];
        assert_eq!(first.kind, EntityKind::Fixed);
        assert_eq!(first.speed_limit_kmh, Some(50));
        assert_eq!(first.country.as_deref(), Some("PT"));
        assert_eq!(first.label.as_deref(), Some("Av. da Liberdade"));
        assert!(report.entities[1].is_mobile);
    }

    #[test]
    fn test_bare_array_layout() {
        let json = r#"[{ "type": "tunnel", "latitude": 45.0, "longitude": 7.0, "isActive": false }]"#;
        let report = parse_dataset(json, &ImportOptions::default()).unwrap();
        assert_eq!(report.entities.len(), 1);
        assert_eq!(report.entities[0].kind, EntityKind::Tunnel);
        assert!(!report.entities[0].active);
        assert!(report.metadata.is_none());
    }

    #[test]
    fn test_country_allowlist() {
        let report = parse_dataset(UNIFIED, &ImportOptions::countries(["es"])).unwrap();
        assert_eq!(report.entities.len(), 1);
        assert_eq!(report.filtered, 1);
        assert_eq!(report.entities[0].country.as_deref(), Some("ES"));
    }

    #[test]
    fn test_ids_are_stable() {
        let a = parse_dataset(UNIFIED, &ImportOptions::default()).unwrap();
        let b = parse_dataset(UNIFIED, &ImportOptions::default()).unwrap();
        assert_eq!(a.entities[0].id, b.entities[0].id);
        assert_ne!(a.entities[0].id, a.entities[1].id);

        let uuid = "67e55044-10b1-426f-9247-bb680e5fe0c8";
        let json = format!(r#"[{{ "id": "{}", "latitude": 1.0, "longitude": 1.0 }}]"#, uuid);
        let report = parse_dataset(&json, &ImportOptions::default()).unwrap();
        assert_eq!(report.entities[0].id.as_uuid().to_string(), uuid);
    }

    #[test]
    fn test_bad_layouts() {
        assert!(matches!(
            parse_dataset(r#"{ "records": [] }"#, &ImportOptions::default()),
            Err(ImportError::Layout(_))
        ));
        assert!(matches!(
            parse_dataset("not json", &ImportOptions::default()),
            Err(ImportError::Json(_))
        ));
    }
}
