//! Drive scenarios for deterministic simulation.

use serde::Serialize;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScenarioId {
    /// SIM-001: Approach and retreat through the alert band with GPS jitter
    ApproachRetreat,

    /// SIM-002: Backtracking past a camera before and after the cooldown
    LoopBack,

    /// SIM-003: Several cameras crossing the threshold in the same pass
    DenseCluster,

    /// SIM-004: Leaving the route and receiving a new one
    OffRoute,

    /// SIM-005: Reroute request that fails once before succeeding
    RerouteFailure,

    /// SIM-006: Community votes retire a mobile camera, persisted across reloads
    Consensus,

    /// SIM-007: Out-of-order fixes on the position channel
    StaleFixes,

    /// SIM-008: Thousands of cameras, every query checked against a linear scan
    DenseGrid,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::ApproachRetreat,
            ScenarioId::LoopBack,
            ScenarioId::DenseCluster,
            ScenarioId::OffRoute,
            ScenarioId::RerouteFailure,
            ScenarioId::Consensus,
            ScenarioId::StaleFixes,
            ScenarioId::DenseGrid,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::ApproachRetreat => "approach_retreat",
            ScenarioId::LoopBack => "loop_back",
            ScenarioId::DenseCluster => "dense_cluster",
            ScenarioId::OffRoute => "off_route",
            ScenarioId::RerouteFailure => "reroute_failure",
            ScenarioId::Consensus => "consensus",
            ScenarioId::StaleFixes => "stale_fixes",
            ScenarioId::DenseGrid => "dense_grid",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::ApproachRetreat => {
                "300→100→300 m with ±20 m jitter: exactly one alert and one clear"
            }
            ScenarioId::LoopBack => "Return inside the cooldown is silent, after it re-alerts",
            ScenarioId::DenseCluster => "Co-located cameras: one urgent announcement per pass",
            ScenarioId::OffRoute => "Detour off the polyline, debounced reroute from the detour",
            ScenarioId::RerouteFailure => "Provider fails once, the next fix retries",
            ScenarioId::Consensus => "Three not-found votes retire a mobile camera for good",
            ScenarioId::StaleFixes => "Older fixes on the channel are dropped and counted",
            ScenarioId::DenseGrid => "10k cameras, grid queries match a linear scan",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approach_retreat" | "hysteresis" | "sim-001" => Ok(ScenarioId::ApproachRetreat),
            "loop_back" | "loopback" | "sim-002" => Ok(ScenarioId::LoopBack),
            "dense_cluster" | "cluster" | "sim-003" => Ok(ScenarioId::DenseCluster),
            "off_route" | "offroute" | "sim-004" => Ok(ScenarioId::OffRoute),
            "reroute_failure" | "sim-005" => Ok(ScenarioId::RerouteFailure),
            "consensus" | "sim-006" => Ok(ScenarioId::Consensus),
            "stale_fixes" | "stale" | "sim-007" => Ok(ScenarioId::StaleFixes),
            "dense_grid" | "grid" | "sim-008" => Ok(ScenarioId::DenseGrid),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
            assert!(!scenario.description().is_empty());
        }
        assert_eq!("SIM-004".parse::<ScenarioId>(), Ok(ScenarioId::OffRoute));
        assert!("time_warp".parse::<ScenarioId>().is_err());
    }
}
