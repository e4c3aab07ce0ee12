//! Per-task auction orchestrator.
//!
//! A [`TaskAgent`] owns one claimed task and walks its priority graph:
//!
//! ```text
//! Initializing -> ClaimingResource -> Negotiating -> Waiting -> Advancing
//!                                          ^                       |
//!                                          +-----------------------+
//!                                   (graph complete) -> Resetting -> Finished
//! ```
//!
//! Any stage may fail, which rolls back the open round, releases the carrier
//! and robot, and ends in `Failed`. Terminal states are never left.
//!
//! Negotiating and the commit that follows run under the negotiation lock
//! shared by all agents of a manager. The lock also guards the reference
//! statistics, so holding the guard is the only way to read or update them.

use crate::calendar::{CycleId, Timestamp, now};
use crate::collaborators::{FleetService, PhysicalNodeGateway, Position, PositionTelemetry, TaskStore};
use crate::config::SchedulerConfig;
use crate::error::{SchedulingError, SchedulingResult};
use crate::events::{AuctionEvent, EventBus};
use crate::resource::{AuctionGateway, BookingDecision, BookingResult, Reject, WorkstationOfferRequest};
use crate::stats::ReferenceStatistics;
use crate::task::graph::{GraphNode, NodeId, PriorityGraph, PriorityGraphDefinition};
use crate::task::types::{Carrier, Robot, Task, TaskId, TaskState, fields};
use crate::valuation::{Offer, Weights};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Negotiation lock shared by all agents; the guarded value is the
/// process-wide reference statistics.
pub type NegotiationLock = Arc<Mutex<ReferenceStatistics>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Initializing,
    ClaimingResource,
    Negotiating,
    Waiting,
    Advancing,
    Resetting,
    Finished,
    Failed,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Finished | AgentState::Failed)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Initializing => "initializing",
            AgentState::ClaimingResource => "claiming_resource",
            AgentState::Negotiating => "negotiating",
            AgentState::Waiting => "waiting",
            AgentState::Advancing => "advancing",
            AgentState::Resetting => "resetting",
            AgentState::Finished => "finished",
            AgentState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Collaborators and shared state handed to every agent.
#[derive(Clone)]
pub struct AgentContext {
    pub config: Arc<SchedulerConfig>,
    pub graph: Arc<PriorityGraphDefinition>,
    pub gateway: Arc<AuctionGateway>,
    pub nodes: Arc<dyn PhysicalNodeGateway>,
    pub fleet: Arc<dyn FleetService>,
    pub telemetry: Arc<dyn PositionTelemetry>,
    pub store: Arc<dyn TaskStore>,
    pub negotiation: NegotiationLock,
    pub events: EventBus,
}

/// One committed auction round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Commitment {
    pub node_id: NodeId,
    pub labor_process_id: String,
    pub workstation_id: String,
    pub location_id: String,
    pub employee_id: String,
    pub picking_id: String,
    pub start_time: Timestamp,
    pub completion_time: Timestamp,
    pub review_result: f64,
    pub result: BookingResult,
}

/// Outcome of a finished agent run.
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub task_id: TaskId,
    pub state: AgentState,
    pub finished_nodes: Vec<NodeId>,
    pub commitments: Vec<Commitment>,
    pub error: Option<SchedulingError>,
}

impl AgentReport {
    pub fn is_finished(&self) -> bool {
        self.state == AgentState::Finished
    }
}

/// Labor processes with tentative entries that must be dropped on failure.
#[derive(Debug, Default)]
struct OpenRound {
    labor_processes: Vec<String>,
}

pub struct TaskAgent {
    task: Task,
    robot: Robot,
    context: AgentContext,
    state: AgentState,
    graph: PriorityGraph,
    carrier: Option<Carrier>,
    home: Option<Position>,
    completion_time: Timestamp,
    task_end_time: Timestamp,
    origin_id: String,
    last_target: Option<String>,
    open_round: Option<OpenRound>,
    commitments: Vec<Commitment>,
    robot_released: bool,
}

impl TaskAgent {
    pub fn new(task: Task, robot: Robot, context: AgentContext) -> Self {
        let graph = PriorityGraph::new(context.graph.clone());
        Self {
            task,
            robot,
            context,
            state: AgentState::Initializing,
            graph,
            carrier: None,
            home: None,
            completion_time: 0.0,
            task_end_time: 0.0,
            origin_id: String::new(),
            last_target: None,
            open_round: None,
            commitments: Vec::new(),
            robot_released: false,
        }
    }

    /// Drive the state machine to a terminal state.
    pub async fn run(mut self) -> AgentReport {
        let task_id = self.task.task_id;
        info!("Task {}: agent started with robot {}", task_id, self.robot.robot_id);

        let error = match self.execute().await {
            Ok(()) => {
                self.transition(AgentState::Finished);
                self.write_state(TaskState::Finished).await;
                self.context.events.emit(AuctionEvent::TaskFinished { task_id });
                info!("Task {}: finished after {} rounds", task_id, self.commitments.len());
                None
            }
            Err(e) => {
                error!("Task {}: failed in state {}: {}", task_id, self.state, e);
                self.rollback().await;
                self.transition(AgentState::Failed);
                self.write_state(TaskState::Failed).await;
                self.context.events.emit(AuctionEvent::TaskFailed {
                    task_id,
                    error: e.to_string(),
                });
                Some(e)
            }
        };

        AgentReport {
            task_id,
            state: self.state,
            finished_nodes: self.graph.finished_nodes().to_vec(),
            commitments: self.commitments,
            error,
        }
    }

    async fn execute(&mut self) -> SchedulingResult<()> {
        self.initialize()?;

        self.transition(AgentState::ClaimingResource);
        self.claim_carrier().await?;
        self.plan_task().await?;

        while !self.graph.is_complete() {
            self.transition(AgentState::Negotiating);
            let commitment = self.negotiate().await?;

            self.transition(AgentState::Waiting);
            self.wait_for_start(&commitment).await?;

            self.transition(AgentState::Advancing);
            self.open_round = None;
            self.completion_time = commitment.completion_time;
            self.origin_id = commitment.location_id.clone();
            self.last_target = Some(commitment.location_id.clone());
            self.commitments.push(commitment);
            self.write_field(fields::FINISHED_NODES, serde_json::to_value(self.graph.finished_nodes()))
                .await;
        }

        self.transition(AgentState::Resetting);
        self.reset().await
    }

    fn transition(&mut self, next: AgentState) {
        if self.state.is_terminal() {
            warn!("Task {}: ignoring transition {} -> {}", self.task.task_id, self.state, next);
            return;
        }
        debug!("Task {}: {} -> {}", self.task.task_id, self.state, next);
        self.state = next;
    }

    fn initialize(&mut self) -> SchedulingResult<()> {
        if !self.context.config.product_variants.contains_key(&self.task.product_variant) {
            return Err(SchedulingError::UnknownProductVariant(self.task.product_variant.clone()));
        }
        self.graph = PriorityGraph::resume(self.context.graph.clone(), &self.task.finished_nodes)?;
        if !self.task.finished_nodes.is_empty() {
            info!(
                "Task {}: resuming with {} finished nodes",
                self.task.task_id,
                self.task.finished_nodes.len()
            );
        }
        Ok(())
    }

    /// Poll the node gateway for a free carrier and reserve the one with the
    /// lowest energy. Collaborator failures are retried within the budget.
    async fn claim_carrier(&mut self) -> SchedulingResult<()> {
        let agent = &self.context.config.agent;
        let task_id = self.task.task_id;

        for attempt in 1..=agent.poll_attempts {
            if attempt > 1 {
                tokio::time::sleep(agent.poll_delay()).await;
            }
            let candidates = match self.context.nodes.poll_free_node(task_id, &agent.item_descriptor).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!("Task {}: carrier poll {} failed: {}", task_id, attempt, e);
                    continue;
                }
            };
            let Some(best) = candidates.iter().min_by(|a, b| a.energy.total_cmp(&b.energy)) else {
                debug!("Task {}: carrier poll {} found no free carrier", task_id, attempt);
                continue;
            };
            if let Err(e) = self.context.nodes.reserve_node(best.phyaddr, task_id).await {
                warn!("Task {}: reserving carrier {} failed: {}", task_id, best.phyaddr, e);
                continue;
            }

            let marker_id = self
                .context
                .config
                .marker_for(best.phyaddr)
                .map(str::to_string)
                .unwrap_or_else(|| format!("carrier-{}", best.phyaddr));
            let carrier = Carrier {
                phyaddr: best.phyaddr,
                energy: best.energy,
                marker_id,
            };
            self.home = self.context.telemetry.current_position(&carrier.marker_id);
            self.origin_id = carrier.marker_id.clone();
            info!(
                "Task {}: claimed carrier {} ({:.2} energy) after {} polls",
                task_id, carrier.phyaddr, carrier.energy, attempt
            );
            self.context.events.emit(AuctionEvent::CarrierClaimed {
                task_id,
                phyaddr: carrier.phyaddr,
            });
            self.write_field(fields::CARRIER, serde_json::to_value(&carrier)).await;
            self.carrier = Some(carrier);
            return Ok(());
        }

        Err(SchedulingError::CarrierUnavailable {
            attempts: agent.poll_attempts,
        })
    }

    /// Ask the fleet for the first completion time and derive the planned
    /// task end time from the average durations of the remaining steps.
    async fn plan_task(&mut self) -> SchedulingResult<()> {
        let targets = self.context.gateway.targets().await;
        let marker_id = self
            .carrier
            .as_ref()
            .map(|carrier| carrier.marker_id.clone())
            .unwrap_or_default();
        let initial = self
            .context
            .fleet
            .request_initial_start_time(&self.robot.robot_id, &marker_id, &targets)
            .await?;
        self.completion_time = initial + self.context.config.agent.initial_start_offset;

        let expected = {
            let stats = self.context.negotiation.lock().await;
            stats.expected_duration(self.graph.remaining_operations())
        };
        self.task_end_time = self.completion_time + expected;
        info!(
            "Task {}: first completion {:.1}, planned end {:.1}",
            self.task.task_id, self.completion_time, self.task_end_time
        );
        self.write_field(fields::TASK_END_TIME, serde_json::to_value(self.task_end_time))
            .await;
        Ok(())
    }

    /// Time weight that grows when the projected end overruns the plan.
    pub fn adaptive_alpha(gamma: f64, beta: f64, expected_end: Timestamp, planned_end: Timestamp) -> f64 {
        let overrun = expected_end - planned_end;
        if overrun > 0.0 {
            gamma + (1.0 - gamma) * (-1.0 / (beta * overrun)).exp()
        } else {
            gamma
        }
    }

    /// One auction round under the negotiation lock: offers for every
    /// eligible node, pick the best review, commit.
    async fn negotiate(&mut self) -> SchedulingResult<Commitment> {
        let lock = self.context.negotiation.clone();
        let mut stats = lock.lock().await;

        match self.auction(&mut stats).await {
            Ok(commitment) => Ok(commitment),
            Err(e) => {
                self.cancel_open_round().await;
                Err(e)
            }
        }
    }

    async fn auction(&mut self, stats: &mut ReferenceStatistics) -> SchedulingResult<Commitment> {
        let task_id = self.task.task_id;
        let eligible: Vec<GraphNode> = self.graph.eligible().into_iter().cloned().collect();
        if eligible.is_empty() {
            return Err(SchedulingError::GraphStalled {
                finished: self.graph.finished_nodes().len(),
            });
        }

        let negotiation = &self.context.config.negotiation;
        let expected_end = self.completion_time + stats.expected_duration(self.graph.remaining_operations());
        let weights = Weights::from_alpha_time(Self::adaptive_alpha(
            negotiation.gamma,
            negotiation.beta,
            expected_end,
            self.task_end_time,
        ));
        let cycle_id = CycleId::generate();
        debug!(
            "Task {}: round {} for {} nodes, alpha_time {:.3}",
            task_id,
            cycle_id,
            eligible.len(),
            weights.alpha_time
        );

        self.open_round = Some(OpenRound {
            labor_processes: eligible.iter().map(|node| node.operation.clone()).collect(),
        });

        let variant = self.context.config.product_variants.get(&self.task.product_variant);
        let mut candidates: Vec<(&GraphNode, Offer)> = Vec::new();
        for node in &eligible {
            let request = WorkstationOfferRequest {
                task_id,
                cycle_id: cycle_id.clone(),
                labor_process_id: node.operation.clone(),
                alpha_time: weights.alpha_time,
                alpha_costs: weights.alpha_costs,
                completion_time: self.completion_time,
                robot: self.robot.clone(),
                origin_id: self.origin_id.clone(),
                components: variant
                    .and_then(|variant| variant.components.get(&node.operation))
                    .cloned()
                    .unwrap_or_default(),
            };
            let offers = self.context.gateway.offer(&request).await?;
            candidates.extend(offers.into_iter().map(|offer| (node, offer)));
        }

        if candidates.is_empty() {
            return Err(SchedulingError::ResourceExhausted {
                labor_processes: eligible.iter().map(|node| node.operation.clone()).collect(),
            });
        }

        let mut best: Option<(usize, f64)> = None;
        for (index, (_, offer)) in candidates.iter().enumerate() {
            if !offer.is_feasible() {
                continue;
            }
            let review = stats.review_result(offer.labor_process_id(), offer.valuation_result);
            if best.is_none_or(|(_, current)| review < current) {
                best = Some((index, review));
            }
        }
        let Some((winner_index, review_result)) = best else {
            return Err(SchedulingError::NoFeasibleOffer {
                task_id,
                candidates: candidates.len(),
            });
        };

        let (node, winner) = &candidates[winner_index];
        let (Some(employee), Some(picking)) = (&winner.employee, &winner.picking) else {
            return Err(SchedulingError::NoFeasibleOffer {
                task_id,
                candidates: candidates.len(),
            });
        };
        let rejects = candidates
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != winner_index)
            .map(|(_, (_, offer))| Reject {
                labor_process_id: offer.labor_process_id().to_string(),
                workstation_id: offer.workstation_id().to_string(),
            })
            .collect();

        self.context.events.emit(AuctionEvent::DecisionMade {
            task_id,
            node_id: node.node_id.clone(),
            labor_process_id: winner.labor_process_id().to_string(),
            workstation_id: winner.workstation_id().to_string(),
            review_result,
            start_time: winner.start_time,
        });

        let decision = BookingDecision {
            task_id,
            labor_process_id: winner.labor_process_id().to_string(),
            workstation_id: winner.workstation_id().to_string(),
            employee_id: employee.resource_id.clone(),
            robot_id: picking.resource_id.clone(),
            start_time: winner.start_time,
            time_slot_length: winner.workstation.skill_time,
            rejects,
        };
        let result = self.context.gateway.book(&decision).await?;
        if !result.is_complete() {
            return Err(SchedulingError::BookingInconsistency {
                task_id,
                labor_process_id: decision.labor_process_id,
                workstation_result: result.workstation_result,
                employee_result: result.employee_result,
                picking_result: result.picking_result,
            });
        }
        self.context.events.emit(AuctionEvent::Booked {
            task_id,
            labor_process_id: decision.labor_process_id.clone(),
            result,
        });

        stats.record_duration(winner.labor_process_id(), winner.throughput_time);
        stats.record_review(winner.labor_process_id(), winner.valuation_result);

        let commitment = Commitment {
            node_id: node.node_id.clone(),
            labor_process_id: decision.labor_process_id,
            workstation_id: decision.workstation_id,
            location_id: winner.workstation.location_id.clone(),
            employee_id: decision.employee_id,
            picking_id: decision.robot_id,
            start_time: winner.start_time,
            completion_time: winner.completion_time,
            review_result,
            result,
        };
        self.graph.complete(&commitment.node_id)?;
        // Only the booked step stays open until the robot is on its way.
        self.open_round = Some(OpenRound {
            labor_processes: vec![commitment.labor_process_id.clone()],
        });

        info!(
            "Task {}: {} ({}) booked on {} at {:.1} with {} and {}",
            task_id,
            commitment.node_id,
            commitment.labor_process_id,
            commitment.workstation_id,
            commitment.start_time,
            commitment.employee_id,
            commitment.picking_id
        );
        Ok(commitment)
    }

    async fn wait_for_start(&mut self, commitment: &Commitment) -> SchedulingResult<()> {
        let agent = &self.context.config.agent;
        if agent.realtime {
            let remaining = commitment.start_time - now();
            if remaining < agent.min_remaining_secs {
                return Err(SchedulingError::DeadlineMiss {
                    task_id: self.task.task_id,
                    remaining,
                    required: agent.min_remaining_secs,
                });
            }
            let sleep_secs = remaining - agent.safety_margin_secs;
            if sleep_secs > 0.0 {
                debug!("Task {}: waiting {:.1}s for {}", self.task.task_id, sleep_secs, commitment.node_id);
                tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
            }
        }
        self.context
            .fleet
            .dispatch_robot(&self.robot.robot_id, &commitment.location_id)
            .await?;
        Ok(())
    }

    /// Release robot and carrier, then wait until the carrier is home.
    async fn reset(&mut self) -> SchedulingResult<()> {
        self.release_robot().await?;
        let Some(carrier) = self.carrier.take() else {
            return Ok(());
        };
        self.context.nodes.restore_node(carrier.phyaddr).await?;

        let agent = &self.context.config.agent;
        for attempt in 1..=agent.return_attempts {
            if attempt > 1 {
                tokio::time::sleep(agent.return_delay()).await;
            }
            if self.carrier_returned(&carrier).await {
                info!("Task {}: carrier {} is home", self.task.task_id, carrier.phyaddr);
                return Ok(());
            }
        }
        Err(SchedulingError::CarrierNotReturned {
            phyaddr: carrier.phyaddr,
            attempts: agent.return_attempts,
        })
    }

    /// Telemetry distance to the recorded home position when both are known,
    /// otherwise the node gateway's own answer.
    async fn carrier_returned(&self, carrier: &Carrier) -> bool {
        let current = self.context.telemetry.current_position(&carrier.marker_id);
        if let (Some(home), Some(current)) = (self.home, current) {
            return home.distance(&current) <= self.context.config.agent.arrival_threshold;
        }
        match self.context.nodes.is_returned(carrier.phyaddr).await {
            Ok(returned) => returned,
            Err(e) => {
                warn!("Task {}: return check for {} failed: {}", self.task.task_id, carrier.phyaddr, e);
                false
            }
        }
    }

    async fn release_robot(&mut self) -> SchedulingResult<()> {
        if self.robot_released {
            return Ok(());
        }
        let receipt = self
            .context
            .fleet
            .unblock_robot(&self.robot.robot_id, self.task_end_time, self.last_target.as_deref())
            .await?;
        self.robot_released = true;
        debug!(
            "Task {}: robot {} released, carrier home in {:.1}s",
            self.task.task_id, self.robot.robot_id, receipt.klt_arriving_home
        );
        Ok(())
    }

    async fn cancel_open_round(&mut self) {
        let Some(round) = self.open_round.take() else {
            return;
        };
        for labor_process in &round.labor_processes {
            match self.context.gateway.cancel(self.task.task_id, labor_process).await {
                Ok(removed) => debug!(
                    "Task {}: dropped {} entries of {}",
                    self.task.task_id, removed, labor_process
                ),
                Err(e) => warn!("Task {}: cancelling {} failed: {}", self.task.task_id, labor_process, e),
            }
        }
    }

    /// Undo whatever the failed stage left behind. Every step is attempted.
    async fn rollback(&mut self) {
        if self.open_round.is_some() {
            let lock = self.context.negotiation.clone();
            let _guard = lock.lock().await;
            self.cancel_open_round().await;
        }
        if let Some(carrier) = self.carrier.take()
            && let Err(e) = self.context.nodes.restore_node(carrier.phyaddr).await
        {
            warn!("Task {}: releasing carrier {} failed: {}", self.task.task_id, carrier.phyaddr, e);
        }
        if let Err(e) = self.release_robot().await {
            warn!("Task {}: releasing robot failed: {}", self.task.task_id, e);
        }
    }

    async fn write_state(&self, state: TaskState) {
        self.write_field(fields::STATE, serde_json::to_value(state)).await;
    }

    async fn write_field(&self, field: &str, value: serde_json::Result<serde_json::Value>) {
        let result = match value {
            Ok(value) => self.context.store.update_task_field(self.task.task_id, field, value).await,
            Err(e) => {
                warn!("Task {}: cannot encode {}: {}", self.task.task_id, field, e);
                return;
            }
        };
        if let Err(e) = result {
            warn!("Task {}: writing {} failed: {}", self.task.task_id, field, e);
        }
    }
}
