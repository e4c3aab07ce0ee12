use crate::calendar::{CycleId, ResourceCalendar, Timestamp};
use crate::task::types::{Robot, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Which pool a resource belongs to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Workstation,
    Employee,
    Picking,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Workstation => f.write_str("workstation"),
            ResourceKind::Employee => f.write_str("employee"),
            ResourceKind::Picking => f.write_str("picking"),
        }
    }
}

/// Labor process a workstation can perform and how long it takes there.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Skill {
    pub labor_process_id: String,
    pub duration: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Workstation {
    pub id: String,
    /// Telemetry entity used for distance checks.
    pub location_id: String,
    pub skills: Vec<Skill>,
    pub cost_rate: f64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub calendar: ResourceCalendar,
}

impl Workstation {
    pub fn skill_time(&self, labor_process_id: &str) -> Option<f64> {
        self.skills
            .iter()
            .find(|skill| skill.labor_process_id == labor_process_id)
            .map(|skill| skill.duration)
    }
}

/// Shared shape of employees and picking robots: a skill set, a cost rate
/// and the lead time between their desired and internal start.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Operator {
    pub id: String,
    pub skills: BTreeSet<String>,
    pub cost_rate: f64,
    #[serde(default)]
    pub lead_time: f64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub calendar: ResourceCalendar,
}

fn default_active() -> bool {
    true
}

/// Common accessors the generic pool needs from its members.
pub trait PoolMember: Clone + Send + Sync {
    fn id(&self) -> &str;
    fn is_active(&self) -> bool;
    fn set_active(&mut self, active: bool);
    fn can_perform(&self, labor_process_id: &str) -> bool;
    fn calendar(&self) -> &ResourceCalendar;
    fn calendar_mut(&mut self) -> &mut ResourceCalendar;
}

impl PoolMember for Workstation {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn can_perform(&self, labor_process_id: &str) -> bool {
        self.skill_time(labor_process_id).is_some()
    }

    fn calendar(&self) -> &ResourceCalendar {
        &self.calendar
    }

    fn calendar_mut(&mut self) -> &mut ResourceCalendar {
        &mut self.calendar
    }
}

impl PoolMember for Operator {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    fn can_perform(&self, labor_process_id: &str) -> bool {
        self.skills.contains(labor_process_id)
    }

    fn calendar(&self) -> &ResourceCalendar {
        &self.calendar
    }

    fn calendar_mut(&mut self) -> &mut ResourceCalendar {
        &mut self.calendar
    }
}

/// Request sent to the workstation gateway for one eligible node.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct WorkstationOfferRequest {
    pub task_id: TaskId,
    pub cycle_id: CycleId,
    pub labor_process_id: String,
    pub alpha_time: f64,
    pub alpha_costs: f64,
    /// Completion time of the task's previous step.
    pub completion_time: Timestamp,
    pub robot: Robot,
    /// Telemetry entity the robot currently travels from.
    pub origin_id: String,
    #[serde(default)]
    pub components: Vec<String>,
}

/// Request forwarded by the workstation gateway to the employee and picking pools.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SubOfferRequest {
    pub task_id: TaskId,
    pub cycle_id: CycleId,
    pub labor_process_id: String,
    /// Workstation the resource has to reach.
    pub target: String,
    pub desired_availability_date: Timestamp,
    pub skill_time: f64,
    /// Buffer of the workstation slot; availability may not deviate further.
    pub buffer_time_workstation: f64,
    pub alpha_time: f64,
    pub alpha_costs: f64,
    #[serde(default)]
    pub components: Vec<String>,
}

/// Tentative workstation reservation plus its costs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WorkstationOffer {
    pub workstation_id: String,
    pub location_id: String,
    pub cycle_id: CycleId,
    pub task_id: TaskId,
    pub labor_process_id: String,
    pub desired_start: Timestamp,
    pub desired_availability_date: Timestamp,
    pub buffer_time: f64,
    pub time_slot_length: f64,
    pub skill_time: f64,
    pub costs_workstation: f64,
    pub transport_costs: f64,
    pub distance: f64,
    pub completion_time: Timestamp,
}

/// Best employee or picking robot reservation for one workstation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SubOffer {
    pub resource_id: String,
    pub kind: ResourceKind,
    pub target: String,
    pub availability_time: Timestamp,
    pub buffer_time: f64,
    pub time_slot_length: f64,
    pub costs: f64,
    pub local_valuation: f64,
}

/// Losing candidate of an auction round.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Reject {
    pub labor_process_id: String,
    pub workstation_id: String,
}

/// Winner of an auction round as sent to `book`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BookingDecision {
    pub task_id: TaskId,
    pub labor_process_id: String,
    pub workstation_id: String,
    pub employee_id: String,
    pub robot_id: String,
    pub start_time: Timestamp,
    /// Working time at the workstation, without buffer.
    pub time_slot_length: f64,
    pub rejects: Vec<Reject>,
}

/// Confirmed start per resource; `0.0` marks a resource that could not book.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct BookingResult {
    pub workstation_result: f64,
    pub employee_result: f64,
    pub picking_result: f64,
}

impl BookingResult {
    pub fn is_complete(&self) -> bool {
        self.workstation_result > 0.0 && self.employee_result > 0.0 && self.picking_result > 0.0
    }
}
