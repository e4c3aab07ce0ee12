//! Contracts of the external services the scheduler talks to.
//!
//! The agent only ever sees these traits. [`simulated`] provides in-process
//! implementations used by the demo binary and the tests, [`http`] provides
//! `reqwest` clients for the physical-node gateway and the fleet service.

pub mod http;
pub mod simulated;

use crate::calendar::Timestamp;
use crate::error::CollaboratorError;
use crate::task::types::{Robot, Task, TaskId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

pub use http::{HttpFleetService, HttpNodeGateway};
pub use simulated::{InMemoryTaskStore, SimulatedFleet, SimulatedNodeGateway};

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Free carrier reported by the node gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCandidate {
    pub phyaddr: u16,
    pub energy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Answer of the fleet service when a robot is released.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UnblockReceipt {
    /// Seconds until the carrier is back at its home position.
    pub klt_arriving_home: f64,
    /// Seconds until the robot is back at its parking position.
    pub taskrobot_arriving_home: f64,
}

/// Radio gateway managing the physical carriers.
#[async_trait::async_trait]
pub trait PhysicalNodeGateway: Send + Sync {
    /// Free carriers able to take the order; empty when none answered.
    async fn poll_free_node(
        &self,
        order_number: TaskId,
        item_descriptor: &str,
    ) -> CollaboratorResult<Vec<NodeCandidate>>;

    async fn reserve_node(&self, phyaddr: u16, order_number: TaskId) -> CollaboratorResult<()>;

    async fn restore_node(&self, phyaddr: u16) -> CollaboratorResult<()>;

    async fn is_returned(&self, phyaddr: u16) -> CollaboratorResult<bool>;
}

/// Fleet management of the transport robots.
#[async_trait::async_trait]
pub trait FleetService: Send + Sync {
    /// Block a free robot for the task, `None` when the fleet is busy.
    async fn claim_robot(&self, task_id: TaskId) -> CollaboratorResult<Option<Robot>>;

    /// Time at which the robot can have the carrier at the first workstation.
    async fn request_initial_start_time(
        &self,
        robot_id: &str,
        carrier_id: &str,
        targets: &[String],
    ) -> CollaboratorResult<Timestamp>;

    async fn dispatch_robot(&self, robot_id: &str, target: &str) -> CollaboratorResult<()>;

    async fn unblock_robot(
        &self,
        robot_id: &str,
        task_end_time: Timestamp,
        last_target: Option<&str>,
    ) -> CollaboratorResult<UnblockReceipt>;
}

/// Latest known positions of tracked entities.
pub trait PositionTelemetry: Send + Sync {
    fn current_position(&self, entity_id: &str) -> Option<Position>;
}

/// Persistent store of production tasks.
#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    /// Claimable tasks ordered by task id.
    async fn find_open_or_restart_tasks(&self) -> CollaboratorResult<Vec<Task>>;

    async fn update_task_field(
        &self,
        task_id: TaskId,
        field: &str,
        value: serde_json::Value,
    ) -> CollaboratorResult<()>;
}

/// Position table fed by the telemetry subscriber.
#[derive(Debug, Default)]
pub struct PositionCache {
    positions: DashMap<String, Position>,
}

impl PositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, entity_id: impl Into<String>, position: Position) {
        self.positions.insert(entity_id.into(), position);
    }

    pub fn remove(&self, entity_id: &str) -> Option<Position> {
        self.positions.remove(entity_id).map(|(_, position)| position)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl PositionTelemetry for PositionCache {
    fn current_position(&self, entity_id: &str) -> Option<Position> {
        self.positions.get(entity_id).map(|entry| *entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_is_euclidean() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(b.distance(&a), 5.0);
    }

    #[test]
    fn test_position_cache_tracks_latest_value() {
        let cache = PositionCache::new();
        cache.update("klt1", Position::new(1.0, 1.0));
        cache.update("klt1", Position::new(2.0, 1.0));

        assert_eq!(cache.current_position("klt1"), Some(Position::new(2.0, 1.0)));
        assert_eq!(cache.current_position("klt2"), None);
        assert_eq!(cache.remove("klt1"), Some(Position::new(2.0, 1.0)));
        assert!(cache.is_empty());
    }
}
