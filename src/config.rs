//! Typed scheduler configuration.
//!
//! Everything the scheduler needs at start-up lives in one TOML document:
//! negotiation parameters, the three resource pools, agent timing, the
//! priority graph, product variants and the simulated shop floor layout.
//! [`SchedulerConfig::validate`] runs on every load so malformed graphs or
//! parameters are reported before any agent starts.

use crate::collaborators::Position;
use crate::resource::{Operator, Skill, Workstation, WorkstationSettings};
use crate::task::graph::{GraphError, GraphNode, PriorityGraphDefinition};
use crate::task::types::Robot;
use crate::valuation::ValuationConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid priority graph: {0}")]
    Graph(#[from] GraphError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub negotiation: NegotiationConfig,
    pub valuation: ValuationConfig,
    pub workstations: WorkstationPoolConfig,
    pub employees: EmployeePoolConfig,
    pub picking: PickingPoolConfig,
    pub agent: AgentConfig,
    pub services: ServiceConfig,
    pub priority_graph: PriorityGraphDefinition,
    pub product_variants: BTreeMap<String, ProductVariant>,
    pub carriers: Vec<CarrierConfig>,
    pub robots: Vec<Robot>,
    pub positions: Vec<PositionConfig>,
}

/// Adaptive weighting and reference statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Floor of the time weight.
    pub gamma: f64,
    /// Sensitivity of the time weight to a projected overrun.
    pub beta: f64,
    pub window_size: usize,
    pub initial_durations: BTreeMap<String, f64>,
    pub initial_reviews: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkstationPoolConfig {
    pub delta: f64,
    pub rotation_gap: f64,
    pub near_distance: f64,
    pub near_lead_time: f64,
    pub travel_factor: f64,
    pub resources: Vec<Workstation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmployeePoolConfig {
    pub epsilon: f64,
    pub rotation_gap: f64,
    pub resources: Vec<Operator>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PickingPoolConfig {
    pub delta: f64,
    pub rotation_gap: f64,
    pub resources: Vec<Operator>,
}

/// Timing and retry budgets of a task agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Sleep until negotiated start times and wait for physical confirmations.
    pub realtime: bool,
    pub poll_attempts: u32,
    pub poll_delay_ms: u64,
    pub item_descriptor: String,
    /// Added to the fleet's first completion estimate.
    pub initial_start_offset: f64,
    /// Minimum seconds between commit and negotiated start.
    pub min_remaining_secs: f64,
    /// Seconds before the start at which the robot is dispatched.
    pub safety_margin_secs: f64,
    /// Distance below which a carrier counts as home.
    pub arrival_threshold: f64,
    pub return_attempts: u32,
    pub return_delay_ms: u64,
    pub manager_poll_interval_ms: u64,
}

/// Endpoints of external services; unset means simulated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub node_gateway_url: Option<String>,
    pub fleet_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProductVariant {
    /// Components picked per labor process.
    #[serde(default)]
    pub components: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CarrierConfig {
    pub phyaddr: u16,
    pub marker_id: String,
    /// Battery level reported by the simulated gateway.
    #[serde(default = "default_energy")]
    pub energy: f64,
}

fn default_energy() -> f64 {
    3.3
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionConfig {
    pub entity_id: String,
    pub x: f64,
    pub y: f64,
}

impl PositionConfig {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        let durations = [("P1", 60.0), ("P2", 90.0), ("P3", 45.0), ("P4", 60.0)];
        Self {
            gamma: 0.5,
            beta: 0.01,
            window_size: 10,
            initial_durations: durations
                .iter()
                .map(|(process, duration)| (process.to_string(), *duration))
                .collect(),
            initial_reviews: durations.iter().map(|(process, _)| (process.to_string(), 0.5)).collect(),
        }
    }
}

impl Default for WorkstationPoolConfig {
    fn default() -> Self {
        let settings = WorkstationSettings::default();
        let workstation = |id: &str, location: &str, skills: &[(&str, f64)], cost_rate: f64| Workstation {
            id: id.to_string(),
            location_id: location.to_string(),
            skills: skills
                .iter()
                .map(|(process, duration)| Skill {
                    labor_process_id: process.to_string(),
                    duration: *duration,
                })
                .collect(),
            cost_rate,
            active: true,
            calendar: Default::default(),
        };
        Self {
            delta: settings.delta,
            rotation_gap: 0.0,
            near_distance: settings.near_distance,
            near_lead_time: settings.near_lead_time,
            travel_factor: settings.travel_factor,
            resources: vec![
                workstation("WS1", "ws1", &[("P1", 40.0), ("P2", 60.0), ("P4", 30.0)], 0.02),
                workstation("WS2", "ws2", &[("P1", 50.0), ("P3", 30.0), ("P4", 35.0)], 0.015),
            ],
        }
    }
}

fn operator(id: &str, skills: &[&str], cost_rate: f64, lead_time: f64) -> Operator {
    Operator {
        id: id.to_string(),
        skills: skills.iter().map(|s| s.to_string()).collect(),
        cost_rate,
        lead_time,
        active: true,
        calendar: Default::default(),
    }
}

impl Default for EmployeePoolConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.5,
            rotation_gap: 0.0,
            resources: vec![
                operator("EMP1", &["P1", "P2", "P3", "P4"], 0.03, 10.0),
                operator("EMP2", &["P1", "P3", "P4"], 0.025, 15.0),
            ],
        }
    }
}

impl Default for PickingPoolConfig {
    fn default() -> Self {
        Self {
            delta: 0.5,
            rotation_gap: 5.0,
            resources: vec![
                operator("PCK1", &["P1", "P2", "P3", "P4"], 0.01, 5.0),
                operator("PCK2", &["P1", "P2", "P3", "P4"], 0.012, 5.0),
            ],
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            realtime: false,
            poll_attempts: 5,
            poll_delay_ms: 500,
            item_descriptor: "KLT".to_string(),
            initial_start_offset: 10.0,
            min_remaining_secs: 20.0,
            safety_margin_secs: 10.0,
            arrival_threshold: 0.3,
            return_attempts: 10,
            return_delay_ms: 2000,
            manager_poll_interval_ms: 1000,
        }
    }
}

impl AgentConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    pub fn return_delay(&self) -> Duration {
        Duration::from_millis(self.return_delay_ms)
    }

    pub fn manager_poll_interval(&self) -> Duration {
        Duration::from_millis(self.manager_poll_interval_ms)
    }
}

fn graph_node(id: &str, operation: &str, preconditions: &[&str], successors: &[&str]) -> GraphNode {
    GraphNode {
        node_id: id.to_string(),
        operation: operation.to_string(),
        preconditions: preconditions.iter().map(|s| s.to_string()).collect(),
        successors: successors.iter().map(|s| s.to_string()).collect(),
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            negotiation: NegotiationConfig::default(),
            valuation: ValuationConfig::default(),
            workstations: WorkstationPoolConfig::default(),
            employees: EmployeePoolConfig::default(),
            picking: PickingPoolConfig::default(),
            agent: AgentConfig::default(),
            services: ServiceConfig::default(),
            priority_graph: PriorityGraphDefinition {
                start_node: "n1".to_string(),
                end_node: "n4".to_string(),
                nodes: vec![
                    graph_node("n1", "P1", &[], &["n2", "n3"]),
                    graph_node("n2", "P2", &["n1"], &["n4"]),
                    graph_node("n3", "P3", &["n1"], &["n4"]),
                    graph_node("n4", "P4", &["n2", "n3"], &[]),
                ],
            },
            product_variants: BTreeMap::from([(
                "standard".to_string(),
                ProductVariant {
                    components: BTreeMap::from([
                        ("P1".to_string(), vec!["base-plate".to_string()]),
                        ("P2".to_string(), vec!["housing".to_string(), "screws".to_string()]),
                        ("P3".to_string(), vec!["cable".to_string()]),
                        ("P4".to_string(), vec!["label".to_string()]),
                    ]),
                },
            )]),
            carriers: vec![
                CarrierConfig {
                    phyaddr: 170,
                    marker_id: "klt1".to_string(),
                    energy: 3.1,
                },
                CarrierConfig {
                    phyaddr: 171,
                    marker_id: "klt2".to_string(),
                    energy: 3.3,
                },
            ],
            robots: vec![
                Robot {
                    robot_id: "robot1".to_string(),
                    average_velocity: 0.4,
                    operating_cost: 0.05,
                },
                Robot {
                    robot_id: "robot2".to_string(),
                    average_velocity: 0.5,
                    operating_cost: 0.04,
                },
            ],
            positions: [
                ("ws1", 0.0, 4.0),
                ("ws2", 5.0, 4.0),
                ("klt1", 0.0, 0.0),
                ("klt2", 1.0, 0.0),
            ]
            .iter()
            .map(|(entity_id, x, y)| PositionConfig {
                entity_id: entity_id.to_string(),
                x: *x,
                y: *y,
            })
            .collect(),
        }
    }
}

impl SchedulerConfig {
    /// Load and validate a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn workstation_settings(&self) -> WorkstationSettings {
        WorkstationSettings {
            delta: self.workstations.delta,
            near_distance: self.workstations.near_distance,
            near_lead_time: self.workstations.near_lead_time,
            travel_factor: self.workstations.travel_factor,
        }
    }

    pub fn marker_for(&self, phyaddr: u16) -> Option<&str> {
        self.carriers
            .iter()
            .find(|carrier| carrier.phyaddr == phyaddr)
            .map(|carrier| carrier.marker_id.as_str())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let negotiation = &self.negotiation;
        if !(0.0..=1.0).contains(&negotiation.gamma) {
            return invalid(format!("gamma must lie in [0, 1], got {}", negotiation.gamma));
        }
        if negotiation.beta <= 0.0 {
            return invalid(format!("beta must be positive, got {}", negotiation.beta));
        }
        if negotiation.window_size == 0 {
            return invalid("window_size must be at least 1");
        }

        for (name, value) in [
            ("workstations.delta", self.workstations.delta),
            ("employees.epsilon", self.employees.epsilon),
            ("picking.delta", self.picking.delta),
            ("picking.rotation_gap", self.picking.rotation_gap),
            ("workstations.rotation_gap", self.workstations.rotation_gap),
            ("employees.rotation_gap", self.employees.rotation_gap),
        ] {
            if value < 0.0 {
                return invalid(format!("{name} must not be negative, got {value}"));
            }
        }
        if self.valuation.throughput_scale <= 0.0 || self.valuation.cost_scale <= 0.0 {
            return invalid("valuation scales must be positive");
        }
        if let Some(robot) = self.robots.iter().find(|robot| robot.average_velocity <= 0.0) {
            return invalid(format!("robot {} needs a positive average_velocity", robot.robot_id));
        }

        ensure_unique_ids("workstation", self.workstations.resources.iter().map(|ws| ws.id.as_str()))?;
        ensure_unique_ids("employee", self.employees.resources.iter().map(|op| op.id.as_str()))?;
        ensure_unique_ids("picking robot", self.picking.resources.iter().map(|op| op.id.as_str()))?;
        ensure_unique_ids("carrier", self.carriers.iter().map(|c| c.marker_id.as_str()))?;

        self.priority_graph.validate()?;

        for operation in self.priority_graph.operations() {
            let workstation = self
                .workstations
                .resources
                .iter()
                .any(|ws| ws.skill_time(operation).is_some());
            let employee = self.employees.resources.iter().any(|op| op.skills.contains(operation));
            let picking = self.picking.resources.iter().any(|op| op.skills.contains(operation));
            if !(workstation && employee && picking) {
                return invalid(format!(
                    "labor process {operation} is missing a workstation, employee or picking robot"
                ));
            }
        }
        Ok(())
    }
}

fn invalid<T>(message: impl Into<String>) -> Result<T, ConfigError> {
    Err(ConfigError::Invalid(message.into()))
}

fn ensure_unique_ids<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return invalid(format!("duplicate {kind} id '{id}'"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        SchedulerConfig::default()
            .validate()
            .expect("Default configuration should be valid");
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SchedulerConfig::default();
        let file = NamedTempFile::new().expect("Should create temp file");

        config.to_toml_file(file.path()).expect("Should write config");
        let loaded = SchedulerConfig::from_toml_file(file.path()).expect("Should load config");

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = SchedulerConfig::from_toml_str(
            r#"
            [negotiation]
            gamma = 0.7

            [agent]
            realtime = true
            poll_attempts = 3
            "#,
        )
        .expect("Should parse partial config");

        assert_eq!(config.negotiation.gamma, 0.7);
        assert_eq!(config.negotiation.window_size, 10);
        assert!(config.agent.realtime);
        assert_eq!(config.agent.poll_attempts, 3);
        assert_eq!(config.agent.arrival_threshold, 0.3);
        assert_eq!(config.workstations.resources.len(), 2);
    }

    #[test]
    fn test_out_of_range_parameters_are_rejected() {
        let mut config = SchedulerConfig::default();
        config.negotiation.gamma = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = SchedulerConfig::default();
        config.negotiation.beta = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = SchedulerConfig::default();
        config.picking.rotation_gap = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_cyclic_graph_is_rejected() {
        let mut config = SchedulerConfig::default();
        config.priority_graph.nodes[3].successors.push("n1".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Graph(GraphError::Cycle(_)))));
    }

    #[test]
    fn test_repeated_labor_process_is_rejected() {
        let mut config = SchedulerConfig::default();
        config.priority_graph.nodes[2].operation = "P2".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Graph(GraphError::DuplicateOperation { .. }))
        ));
    }

    #[test]
    fn test_operation_without_workstation_is_rejected() {
        let mut config = SchedulerConfig::default();
        config.priority_graph.nodes[2].operation = "P9".to_string();
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("P9"));
    }

    #[test]
    fn test_duplicate_resource_ids_are_rejected() {
        let mut config = SchedulerConfig::default();
        let duplicate = config.employees.resources[0].clone();
        config.employees.resources.push(duplicate);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        assert!(matches!(
            SchedulerConfig::from_toml_str("negotiation = ["),
            Err(ConfigError::Parse(_))
        ));
    }
}
