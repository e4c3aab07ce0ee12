//! # CPPS Auction
//!
//! Auction-based scheduler for cyber-physical production systems. Production
//! tasks negotiate, one labor step at a time, with three independent resource
//! pools (workstations, employees, picking robots). Every pool keeps a
//! time-slot calendar per resource; the best synchronized combination wins by
//! a weighted time/cost score.
//!
//! ## Architecture Overview
//!
//! - **[`calendar`]**: ordered, conflict-free reservation store per resource
//! - **[`resource`]**: pool gateways answering offer/book/cancel requests
//! - **[`valuation`]**: harmonization and scoring of three-way offers
//! - **[`stats`]**: sliding-window reference statistics per labor process
//! - **[`task`]**: priority graphs, the per-task agent and the task manager
//! - **[`collaborators`]**: contracts of the external services, with simulated
//!   and HTTP implementations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cpps_auction::{EventBus, SchedulerConfig, Simulation, Task};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let tasks = vec![Task::new(1, "standard"), Task::new(2, "standard")];
//!     let simulation = Simulation::new(SchedulerConfig::default(), tasks, EventBus::new())?;
//!
//!     for report in simulation.manager.run_until_idle().await? {
//!         println!("task {}: {}", report.task_id, report.state);
//!     }
//!     Ok(())
//! }
//! ```

/// Per-resource reservation calendars.
pub mod calendar;

/// External service contracts and their implementations.
pub mod collaborators;

/// Typed TOML configuration.
pub mod config;

/// Error taxonomy.
pub mod error;

/// Auction events and handlers.
pub mod events;

/// Resource pools and their gateways.
pub mod resource;

/// In-process shop floor wiring.
pub mod simulation;

/// Reference statistics.
pub mod stats;

/// Tasks, priority graphs and orchestration.
pub mod task;

/// Offer valuation.
pub mod valuation;

/// Environment constants and path utilities.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use calendar::{CycleId, ReservationEntry, ResourceCalendar, Timestamp};
pub use config::{ConfigError, SchedulerConfig};
pub use error::{CollaboratorError, SchedulingError, SchedulingResult};
pub use events::{AuctionEvent, AuctionEventHandler, EventBus, EventLog, LoggingEventHandler};
pub use resource::{PoolSnapshot, ResourceGateway, ShopFloor};
pub use simulation::Simulation;
pub use stats::ReferenceStatistics;
pub use task::{AgentReport, AgentState, Task, TaskAgent, TaskManager, TaskState};
pub use valuation::{INFEASIBLE_SENTINEL, Offer, ValuationConfig};
