//! Production tasks and their orchestration.
//!
//! - [`types`]: the task record shared with the task store
//! - [`graph`]: priority graph of labor steps
//! - [`agent`]: per-task auction state machine
//! - [`manager`]: claims tasks and runs one agent per task

pub mod agent;
pub mod graph;
pub mod manager;
pub mod types;

#[cfg(test)]
mod tests;

pub use agent::{AgentContext, AgentReport, AgentState, Commitment, NegotiationLock, TaskAgent};
pub use graph::{GraphError, GraphNode, PriorityGraph, PriorityGraphDefinition};
pub use manager::TaskManager;
pub use types::{Carrier, Robot, Task, TaskId, TaskState};
