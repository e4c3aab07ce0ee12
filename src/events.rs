//! Auction events and their handlers.
//!
//! Gateways and agents report progress as [`AuctionEvent`]s. Handlers drive
//! logging and visual feedback on the shop floor; a failing handler is logged
//! and never affects scheduling.

use crate::calendar::Timestamp;
use crate::resource::types::{BookingResult, ResourceKind};
use crate::task::types::TaskId;
use anyhow::Result;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum AuctionEvent {
    TaskClaimed {
        task_id: TaskId,
        robot_id: String,
    },
    CarrierClaimed {
        task_id: TaskId,
        phyaddr: u16,
    },
    /// A resource holds a tentative slot for the task.
    ResourceOffered {
        task_id: TaskId,
        kind: ResourceKind,
        resource_id: String,
        labor_process_id: String,
        valuation_result: f64,
    },
    DecisionMade {
        task_id: TaskId,
        node_id: String,
        labor_process_id: String,
        workstation_id: String,
        review_result: f64,
        start_time: Timestamp,
    },
    Booked {
        task_id: TaskId,
        labor_process_id: String,
        result: BookingResult,
    },
    TaskFinished {
        task_id: TaskId,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
    },
}

pub trait AuctionEventHandler: Send + Sync {
    fn handle_event(&self, event: &AuctionEvent) -> Result<()>;
}

/// Fan-out of events to the registered handlers.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Vec<Arc<dyn AuctionEventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: Arc<dyn AuctionEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn add_handler(&mut self, handler: Arc<dyn AuctionEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn emit(&self, event: AuctionEvent) {
        for handler in &self.handlers {
            if let Err(e) = handler.handle_event(&event) {
                error!("Event handler error: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

pub struct LoggingEventHandler;

impl AuctionEventHandler for LoggingEventHandler {
    fn handle_event(&self, event: &AuctionEvent) -> Result<()> {
        match event {
            AuctionEvent::TaskClaimed { task_id, robot_id } => {
                info!("Task {} claimed with robot {}", task_id, robot_id);
            }
            AuctionEvent::CarrierClaimed { task_id, phyaddr } => {
                info!("Task {} reserved carrier {}", task_id, phyaddr);
            }
            AuctionEvent::ResourceOffered {
                task_id,
                kind,
                resource_id,
                labor_process_id,
                valuation_result,
            } => {
                debug!(
                    "Task {}: {} {} offers {} (valuation {:.4})",
                    task_id, kind, resource_id, labor_process_id, valuation_result
                );
            }
            AuctionEvent::DecisionMade {
                task_id,
                node_id,
                labor_process_id,
                workstation_id,
                review_result,
                start_time,
            } => {
                info!(
                    "Task {}: {} ({}) goes to {} at {:.1} (review {:.4})",
                    task_id, node_id, labor_process_id, workstation_id, start_time, review_result
                );
            }
            AuctionEvent::Booked {
                task_id,
                labor_process_id,
                result,
            } => {
                debug!("Task {} booked {}: {:?}", task_id, labor_process_id, result);
            }
            AuctionEvent::TaskFinished { task_id } => {
                info!("Task finished: {}", task_id);
            }
            AuctionEvent::TaskFailed { task_id, error } => {
                warn!("Task failed: {} - {}", task_id, error);
            }
        }
        Ok(())
    }
}

/// Keeps every event in memory, for summaries and assertions.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<AuctionEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuctionEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl AuctionEventHandler for EventLog {
    fn handle_event(&self, event: &AuctionEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("event log poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingHandler;

    impl AuctionEventHandler for FailingHandler {
        fn handle_event(&self, _event: &AuctionEvent) -> Result<()> {
            anyhow::bail!("display offline")
        }
    }

    #[test]
    fn test_failing_handler_does_not_block_others() {
        let log = Arc::new(EventLog::new());
        let bus = EventBus::new()
            .with_handler(Arc::new(FailingHandler))
            .with_handler(Arc::new(LoggingEventHandler))
            .with_handler(log.clone());

        bus.emit(AuctionEvent::TaskFinished { task_id: 4 });

        assert_eq!(log.events(), vec![AuctionEvent::TaskFinished { task_id: 4 }]);
    }
}
