use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for production tasks, assigned by the task store.
pub type TaskId = u64;

/// Production task as persisted in the task store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Task {
    pub task_id: TaskId,
    pub state: TaskState,
    pub product_variant: String,
    #[serde(default)]
    pub robot: Option<Robot>,
    /// Planned completion of the whole task.
    #[serde(default)]
    pub task_end_time: Option<f64>,
    #[serde(default)]
    pub carrier: Option<Carrier>,
    #[serde(default)]
    pub finished_nodes: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(task_id: TaskId, product_variant: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            state: TaskState::Open,
            product_variant: product_variant.into(),
            robot: None,
            task_end_time: None,
            carrier: None,
            finished_nodes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Tasks a manager may claim.
    pub fn is_claimable(&self) -> bool {
        matches!(self.state, TaskState::Open | TaskState::Restart)
    }
}

/// Lifecycle state of a task. `Finished` and `Failed` are terminal.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Open,
    Active,
    Finished,
    Failed,
    Restart,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Open => "open",
            TaskState::Active => "active",
            TaskState::Finished => "finished",
            TaskState::Failed => "failed",
            TaskState::Restart => "restart",
        };
        f.write_str(name)
    }
}

/// Mobile robot transporting the task's carrier.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Robot {
    pub robot_id: String,
    /// Mean travel speed in distance units per second.
    pub average_velocity: f64,
    /// Transport cost per distance unit.
    pub operating_cost: f64,
}

/// Physical carrier claimed through the node gateway.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Carrier {
    pub phyaddr: u16,
    pub energy: f64,
    /// Telemetry entity tracking the carrier.
    pub marker_id: String,
}

/// Field names accepted by `TaskStore::update_task_field`.
pub mod fields {
    pub const STATE: &str = "state";
    pub const ROBOT: &str = "robot";
    pub const TASK_END_TIME: &str = "task_end_time";
    pub const CARRIER: &str = "carrier";
    pub const FINISHED_NODES: &str = "finished_nodes";
}
