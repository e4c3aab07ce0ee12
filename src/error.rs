//! Error taxonomy for the auction scheduler.
//!
//! Collaborator failures (transport and parse) are kept apart from scheduling
//! failures so the agent can decide which ones are retried inside hardware
//! polling and which ones end an auction round.

use crate::task::graph::GraphError;
use crate::task::types::TaskId;
use thiserror::Error;

/// Failure reported by an external collaborator (node gateway, fleet service, task store).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollaboratorError {
    /// Peer unreachable or answered with a non-success status.
    #[error("{service} transport failure: {message}")]
    Transport { service: String, message: String },

    /// Response arrived but could not be understood.
    #[error("{service} returned a malformed response: {message}")]
    Parse { service: String, message: String },

    /// Peer understood the request and refused it.
    #[error("{service} rejected the request: {message}")]
    Rejected { service: String, message: String },
}

impl CollaboratorError {
    pub fn transport(service: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(service: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn rejected(service: impl Into<String>, message: impl ToString) -> Self {
        Self::Rejected {
            service: service.into(),
            message: message.to_string(),
        }
    }
}

/// Failures that end an auction round or a whole task.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SchedulingError {
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("no resource offered a slot for {labor_processes:?}")]
    ResourceExhausted { labor_processes: Vec<String> },

    #[error("all {candidates} offers for task {task_id} failed harmonization")]
    NoFeasibleOffer { task_id: TaskId, candidates: usize },

    #[error(
        "booking inconsistency for task {task_id} ({labor_process_id}): workstation={workstation_result}, employee={employee_result}, picking={picking_result}"
    )]
    BookingInconsistency {
        task_id: TaskId,
        labor_process_id: String,
        workstation_result: f64,
        employee_result: f64,
        picking_result: f64,
    },

    #[error("too late for task {task_id}: {remaining:.1}s left, {required:.1}s required")]
    DeadlineMiss {
        task_id: TaskId,
        remaining: f64,
        required: f64,
    },

    #[error("no free carrier after {attempts} polling attempts")]
    CarrierUnavailable { attempts: u32 },

    #[error("carrier {phyaddr} did not return home after {attempts} checks")]
    CarrierNotReturned { phyaddr: u16, attempts: u32 },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("priority graph stalled: {finished} nodes finished but none eligible")]
    GraphStalled { finished: usize },

    #[error("unknown product variant '{0}'")]
    UnknownProductVariant(String),

    #[error("no position known for '{0}'")]
    PositionUnknown(String),
}

pub type SchedulingResult<T> = std::result::Result<T, SchedulingError>;
