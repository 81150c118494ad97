//! Aggregated configuration, loadable from a JSON file.
//!
//! Every field is optional in the file; missing values fall back to the
//! defaults of the individual engine configs.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::roadmate_alert::AlertConfig;
use crate::roadmate_consensus::ConsensusConfig;
use crate::roadmate_route::RouteConfig;
use crate::roadmate_session::SessionConfig;
use crate::roadmate_space::IndexConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Inconsistent config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadmateConfig {
    pub index: IndexConfig,
    pub alerts: AlertConfig,
    pub route: RouteConfig,
    pub consensus: ConsensusConfig,
    pub session: SessionConfig,
}

impl RoadmateConfig {
    /// Parses a JSON document and checks threshold ordering.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Rejects threshold combinations the engines cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let alerts = &self.alerts;
        if !(alerts.close_alert_m > 0.0 && alerts.close_alert_m < alerts.first_alert_m) {
            return Err(ConfigError::Invalid(format!(
                "close_alert_m ({}) must be positive and below first_alert_m ({})",
                alerts.close_alert_m, alerts.first_alert_m
            )));
        }
        if alerts.critical_enter_m >= alerts.critical_exit_m {
            return Err(ConfigError::Invalid(format!(
                "critical_enter_m ({}) must be below critical_exit_m ({})",
                alerts.critical_enter_m, alerts.critical_exit_m
            )));
        }
        if !(self.index.cell_size_deg > 0.0 && self.index.max_radius_km > 0.0) {
            return Err(ConfigError::Invalid(
                "cell_size_deg and max_radius_km must be positive".to_string(),
            ));
        }
        if self.route.sampling_stride == 0 {
            return Err(ConfigError::Invalid("sampling_stride must be at least 1".to_string()));
        }
        if self.consensus.deactivation_threshold == 0 {
            return Err(ConfigError::Invalid(
                "deactivation_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
