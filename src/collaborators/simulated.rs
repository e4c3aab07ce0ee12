//! In-process collaborators for demo runs and tests.

use super::{
    CollaboratorResult, FleetService, NodeCandidate, PhysicalNodeGateway, TaskStore, UnblockReceipt,
};
use crate::calendar::{Timestamp, now};
use crate::error::CollaboratorError;
use crate::task::types::{Robot, Task, TaskId};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// Task store kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let store = Self::new();
        for task in tasks {
            store.insert(task);
        }
        store
    }

    pub fn insert(&self, task: Task) {
        self.tasks.insert(task.task_id, task);
    }

    pub fn get(&self, task_id: TaskId) -> Option<Task> {
        self.tasks.get(&task_id).map(|task| task.clone())
    }

    /// All tasks ordered by id.
    pub fn all(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|entry| entry.value().clone()).collect();
        tasks.sort_by_key(|task| task.task_id);
        tasks
    }
}

#[async_trait::async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn find_open_or_restart_tasks(&self) -> CollaboratorResult<Vec<Task>> {
        Ok(self.all().into_iter().filter(Task::is_claimable).collect())
    }

    async fn update_task_field(
        &self,
        task_id: TaskId,
        field: &str,
        value: serde_json::Value,
    ) -> CollaboratorResult<()> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| CollaboratorError::rejected("task store", format!("unknown task {task_id}")))?;

        let mut document =
            serde_json::to_value(&*task).map_err(|e| CollaboratorError::parse("task store", e))?;
        let object = document
            .as_object_mut()
            .ok_or_else(|| CollaboratorError::parse("task store", "task is not an object"))?;
        if !object.contains_key(field) {
            return Err(CollaboratorError::rejected(
                "task store",
                format!("unknown field '{field}'"),
            ));
        }
        object.insert(field.to_string(), value);

        let mut updated: Task =
            serde_json::from_value(document).map_err(|e| CollaboratorError::parse("task store", e))?;
        updated.updated_at = Utc::now();
        *task = updated;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct SimulatedCarrier {
    energy: f64,
    reserved_by: Option<TaskId>,
}

/// Node gateway backed by a fixed carrier table.
#[derive(Debug, Default)]
pub struct SimulatedNodeGateway {
    carriers: Mutex<BTreeMap<u16, SimulatedCarrier>>,
    failing_polls: AtomicU32,
    polls: AtomicU32,
    restores: AtomicU32,
}

impl SimulatedNodeGateway {
    pub fn new(carriers: impl IntoIterator<Item = (u16, f64)>) -> Self {
        let carriers = carriers
            .into_iter()
            .map(|(phyaddr, energy)| {
                (
                    phyaddr,
                    SimulatedCarrier {
                        energy,
                        reserved_by: None,
                    },
                )
            })
            .collect();
        Self {
            carriers: Mutex::new(carriers),
            ..Default::default()
        }
    }

    /// Let the next `count` polls come back empty.
    pub fn fail_next_polls(&self, count: u32) {
        self.failing_polls.store(count, Ordering::SeqCst);
    }

    pub fn poll_count(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn restore_count(&self) -> u32 {
        self.restores.load(Ordering::SeqCst)
    }

    pub async fn reserved_by(&self, phyaddr: u16) -> Option<TaskId> {
        self.carriers
            .lock()
            .await
            .get(&phyaddr)
            .and_then(|carrier| carrier.reserved_by)
    }
}

#[async_trait::async_trait]
impl PhysicalNodeGateway for SimulatedNodeGateway {
    async fn poll_free_node(
        &self,
        order_number: TaskId,
        item_descriptor: &str,
    ) -> CollaboratorResult<Vec<NodeCandidate>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            debug!("Simulated poll for order {} ({}) unanswered", order_number, item_descriptor);
            return Ok(Vec::new());
        }

        let carriers = self.carriers.lock().await;
        Ok(carriers
            .iter()
            .filter(|(_, carrier)| carrier.reserved_by.is_none())
            .map(|(phyaddr, carrier)| NodeCandidate {
                phyaddr: *phyaddr,
                energy: carrier.energy,
            })
            .collect())
    }

    async fn reserve_node(&self, phyaddr: u16, order_number: TaskId) -> CollaboratorResult<()> {
        let mut carriers = self.carriers.lock().await;
        let carrier = carriers
            .get_mut(&phyaddr)
            .ok_or_else(|| CollaboratorError::rejected("node gateway", format!("unknown phyaddr {phyaddr}")))?;
        match carrier.reserved_by {
            Some(owner) if owner != order_number => Err(CollaboratorError::rejected(
                "node gateway",
                format!("phyaddr {phyaddr} already reserved by order {owner}"),
            )),
            _ => {
                carrier.reserved_by = Some(order_number);
                Ok(())
            }
        }
    }

    async fn restore_node(&self, phyaddr: u16) -> CollaboratorResult<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        if let Some(carrier) = self.carriers.lock().await.get_mut(&phyaddr) {
            carrier.reserved_by = None;
        }
        Ok(())
    }

    async fn is_returned(&self, phyaddr: u16) -> CollaboratorResult<bool> {
        Ok(self.reserved_by(phyaddr).await.is_none())
    }
}

/// Fleet with a queue of idle robots and a fixed travel estimate.
#[derive(Debug)]
pub struct SimulatedFleet {
    idle: Mutex<VecDeque<Robot>>,
    busy: DashMap<String, Robot>,
    /// Seconds from now until a robot reaches its first workstation.
    travel_time: f64,
    dispatches: Mutex<Vec<(String, String)>>,
    unblocks: AtomicU32,
}

impl SimulatedFleet {
    pub fn new(robots: impl IntoIterator<Item = Robot>, travel_time: f64) -> Self {
        Self {
            idle: Mutex::new(robots.into_iter().collect()),
            busy: DashMap::new(),
            travel_time,
            dispatches: Mutex::new(Vec::new()),
            unblocks: AtomicU32::new(0),
        }
    }

    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    pub fn unblock_count(&self) -> u32 {
        self.unblocks.load(Ordering::SeqCst)
    }

    pub async fn dispatches(&self) -> Vec<(String, String)> {
        self.dispatches.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl FleetService for SimulatedFleet {
    async fn claim_robot(&self, task_id: TaskId) -> CollaboratorResult<Option<Robot>> {
        let robot = self.idle.lock().await.pop_front();
        if let Some(robot) = &robot {
            debug!("Simulated fleet blocked robot {} for task {}", robot.robot_id, task_id);
            self.busy.insert(robot.robot_id.clone(), robot.clone());
        }
        Ok(robot)
    }

    async fn request_initial_start_time(
        &self,
        robot_id: &str,
        _carrier_id: &str,
        targets: &[String],
    ) -> CollaboratorResult<Timestamp> {
        if !self.busy.contains_key(robot_id) {
            return Err(CollaboratorError::rejected(
                "fleet",
                format!("robot {robot_id} is not blocked"),
            ));
        }
        if targets.is_empty() {
            return Err(CollaboratorError::rejected("fleet", "no targets given"));
        }
        Ok(now() + self.travel_time)
    }

    async fn dispatch_robot(&self, robot_id: &str, target: &str) -> CollaboratorResult<()> {
        self.dispatches
            .lock()
            .await
            .push((robot_id.to_string(), target.to_string()));
        Ok(())
    }

    async fn unblock_robot(
        &self,
        robot_id: &str,
        _task_end_time: Timestamp,
        _last_target: Option<&str>,
    ) -> CollaboratorResult<UnblockReceipt> {
        self.unblocks.fetch_add(1, Ordering::SeqCst);
        let (_, robot) = self
            .busy
            .remove(robot_id)
            .ok_or_else(|| CollaboratorError::rejected("fleet", format!("robot {robot_id} is not blocked")))?;
        self.idle.lock().await.push_back(robot);
        Ok(UnblockReceipt::default())
    }
}
