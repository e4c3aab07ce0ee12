use super::pool::ResourcePool;
use super::types::{BookingDecision, Operator, PoolMember, ResourceKind, SubOffer, SubOfferRequest};
use super::ResourceGateway;
use crate::calendar::ReservationEntry;
use crate::error::SchedulingResult;
use crate::events::{AuctionEvent, EventBus};
use crate::task::types::TaskId;
use crate::valuation::{Weights, local_score};
use std::sync::Arc;
use tracing::{debug, warn};

/// How an operator pool sizes slots and prices work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorPolicy {
    /// Buffer proportional to the full work duration including walking.
    Employee { epsilon: f64 },
    /// Buffer proportional to the workstation's skill time.
    Picking { delta: f64 },
}

/// Slot dimensions of one operator reservation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotPlan {
    pub work_duration: f64,
    pub buffer_time: f64,
    pub time_slot_length: f64,
    pub costs: f64,
}

impl OperatorPolicy {
    pub fn kind(&self) -> ResourceKind {
        match self {
            OperatorPolicy::Employee { .. } => ResourceKind::Employee,
            OperatorPolicy::Picking { .. } => ResourceKind::Picking,
        }
    }

    pub fn plan(&self, operator: &Operator, skill_time: f64) -> SlotPlan {
        let work_duration = skill_time + operator.lead_time;
        let buffer_time = match self {
            OperatorPolicy::Employee { epsilon } => work_duration * epsilon,
            OperatorPolicy::Picking { delta } => skill_time * delta,
        };
        SlotPlan {
            work_duration,
            buffer_time,
            time_slot_length: work_duration + buffer_time,
            costs: operator.cost_rate * work_duration,
        }
    }

    fn winner<'a>(&self, decision: &'a BookingDecision) -> &'a str {
        match self {
            OperatorPolicy::Employee { .. } => &decision.employee_id,
            OperatorPolicy::Picking { .. } => &decision.robot_id,
        }
    }
}

/// Employee or picking pool. Offers only its best member per workstation and
/// releases the other members' tentative slots right away.
pub struct OperatorGateway {
    pool: Arc<ResourcePool<Operator>>,
    policy: OperatorPolicy,
    events: EventBus,
}

impl OperatorGateway {
    pub fn new(pool: Arc<ResourcePool<Operator>>, policy: OperatorPolicy, events: EventBus) -> Self {
        Self { pool, policy, events }
    }
}

#[async_trait::async_trait]
impl ResourceGateway for OperatorGateway {
    type Request = SubOfferRequest;
    type Offer = Option<SubOffer>;
    type Booking = f64;

    fn kind(&self) -> ResourceKind {
        self.policy.kind()
    }

    async fn offer(&self, request: &SubOfferRequest) -> SchedulingResult<Option<SubOffer>> {
        let weights = Weights {
            alpha_time: request.alpha_time,
            alpha_costs: request.alpha_costs,
        };
        let mut members = self.pool.write().await;

        let mut candidates: Vec<SubOffer> = Vec::new();
        for member in members
            .iter_mut()
            .filter(|m| m.active && m.can_perform(&request.labor_process_id))
        {
            let plan = self.policy.plan(member, request.skill_time);
            let entry = ReservationEntry::new(
                request.cycle_id.clone(),
                request.task_id,
                request.labor_process_id.clone(),
                request.target.clone(),
                request.desired_availability_date,
                plan.time_slot_length,
            )
            .with_lead_time(member.lead_time);
            let finalized = member.calendar.reserve(entry);

            let deviation = finalized.desired_start - request.desired_availability_date;
            candidates.push(SubOffer {
                resource_id: member.id.clone(),
                kind: self.policy.kind(),
                target: request.target.clone(),
                availability_time: finalized.desired_start,
                buffer_time: plan.buffer_time,
                time_slot_length: plan.time_slot_length,
                costs: plan.costs,
                local_valuation: local_score(deviation, plan.costs, request.buffer_time_workstation, weights),
            });
        }

        let best = candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.local_valuation.total_cmp(&b.local_valuation))
            .map(|(index, _)| index);
        let Some(best) = best else {
            debug!(
                "No {} can perform {} for task {}",
                self.policy.kind(),
                request.labor_process_id,
                request.task_id
            );
            return Ok(None);
        };
        let best = candidates.swap_remove(best);

        for loser in &candidates {
            if let Some(member) = members.iter_mut().find(|m| m.id == loser.resource_id) {
                member
                    .calendar
                    .reject(request.task_id, &request.labor_process_id, &request.target);
            }
        }
        drop(members);

        self.events.emit(AuctionEvent::ResourceOffered {
            task_id: request.task_id,
            kind: self.policy.kind(),
            resource_id: best.resource_id.clone(),
            labor_process_id: request.labor_process_id.clone(),
            valuation_result: best.local_valuation,
        });
        Ok(Some(best))
    }

    async fn book(&self, decision: &BookingDecision) -> SchedulingResult<f64> {
        let mut members = self.pool.write().await;

        for reject in &decision.rejects {
            for member in members
                .iter_mut()
                .filter(|m| m.can_perform(&reject.labor_process_id))
            {
                member
                    .calendar
                    .reject(decision.task_id, &reject.labor_process_id, &reject.workstation_id);
            }
        }

        let winner = self.policy.winner(decision);
        let Some(member) = members.iter_mut().find(|m| m.id == winner) else {
            warn!("{} {} is unknown, cannot book task {}", self.policy.kind(), winner, decision.task_id);
            return Ok(0.0);
        };
        let length = decision.time_slot_length + member.lead_time;
        let confirmed = member.calendar.book(
            decision.task_id,
            &decision.labor_process_id,
            &decision.workstation_id,
            decision.start_time,
            length,
        );
        if confirmed.is_none() {
            warn!(
                "{} {} has no tentative slot for task {} ({})",
                self.policy.kind(),
                winner,
                decision.task_id,
                decision.labor_process_id
            );
        }
        Ok(confirmed.unwrap_or(0.0))
    }

    async fn cancel(&self, task_id: TaskId, labor_process_id: &str) -> SchedulingResult<usize> {
        Ok(self.pool.cancel(task_id, labor_process_id).await)
    }

    async fn targets(&self) -> Vec<String> {
        self.pool
            .members()
            .await
            .into_iter()
            .filter(|m| m.active)
            .map(|m| m.id)
            .collect()
    }
}
