//! Resource pool gateways.
//!
//! Three pools take part in every auction round:
//!
//! - **Workstations**: where the labor process happens. The workstation
//!   gateway drives the round: it reserves a slot on every capable
//!   workstation, asks the other two pools for matching slots and scores the
//!   combinations.
//! - **Employees**: operators walking to the workstation.
//! - **Picking robots**: units bringing the components.
//!
//! All pools share the [`ResourceGateway`] contract: `offer` creates tentative
//! reservations tagged with the round's cycle id, `book` confirms the winner
//! and discards the losers, `cancel` drops a failed round.

pub mod operator;
pub mod pool;
pub mod shop_floor;
pub mod types;
pub mod workstation;

#[cfg(test)]
mod tests;

use crate::error::SchedulingResult;
use crate::task::types::TaskId;
use crate::valuation::Offer;

pub use operator::{OperatorGateway, OperatorPolicy};
pub use pool::{PoolError, ResourcePool};
pub use shop_floor::{PoolSnapshot, ShopFloor};
pub use types::*;
pub use workstation::{WorkstationGateway, WorkstationSettings};

/// Request/response contract of a resource pool.
#[async_trait::async_trait]
pub trait ResourceGateway: Send + Sync {
    type Request: Send + Sync;
    type Offer: Send;
    type Booking: Send;

    fn kind(&self) -> ResourceKind;

    /// Tentatively reserve slots for the request.
    async fn offer(&self, request: &Self::Request) -> SchedulingResult<Self::Offer>;

    /// Confirm the winner and discard the losing candidates of the round.
    async fn book(&self, decision: &BookingDecision) -> SchedulingResult<Self::Booking>;

    /// Drop every tentative entry of the task's labor process.
    async fn cancel(&self, task_id: TaskId, labor_process_id: &str) -> SchedulingResult<usize>;

    /// Telemetry ids of the active resources.
    async fn targets(&self) -> Vec<String>;
}

/// Employee or picking pool as seen by the workstation gateway.
pub type SubGateway = dyn ResourceGateway<Request = SubOfferRequest, Offer = Option<SubOffer>, Booking = f64>;

/// Workstation pool as seen by the task agents.
pub type AuctionGateway =
    dyn ResourceGateway<Request = WorkstationOfferRequest, Offer = Vec<Offer>, Booking = BookingResult>;
