use super::pool::ResourcePool;
use super::types::{
    BookingDecision, BookingResult, PoolMember, ResourceKind, SubOfferRequest, Workstation, WorkstationOffer,
    WorkstationOfferRequest,
};
use super::{ResourceGateway, SubGateway};
use crate::calendar::ReservationEntry;
use crate::collaborators::PositionTelemetry;
use crate::error::{SchedulingError, SchedulingResult};
use crate::events::{AuctionEvent, EventBus};
use crate::task::types::TaskId;
use crate::valuation::{Offer, ValuationConfig, Weights, score};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Slot sizing and travel estimation of the workstation pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkstationSettings {
    /// Buffer as a fraction of the skill time.
    pub delta: f64,
    /// Below this distance the robot counts as already at the workstation.
    pub near_distance: f64,
    /// Lead time used for robots that are already close.
    pub near_lead_time: f64,
    /// Multiplier on the pure driving time.
    pub travel_factor: f64,
}

impl Default for WorkstationSettings {
    fn default() -> Self {
        Self {
            delta: 0.5,
            near_distance: 0.5,
            near_lead_time: 5.0,
            travel_factor: 2.0,
        }
    }
}

impl WorkstationSettings {
    /// Seconds the robot needs to cover `distance`.
    pub fn travel_time(&self, distance: f64, velocity: f64) -> f64 {
        if distance < self.near_distance {
            self.near_lead_time
        } else {
            distance / velocity.max(f64::EPSILON) * self.travel_factor
        }
    }
}

/// Entry point of every auction round.
pub struct WorkstationGateway {
    pool: Arc<ResourcePool<Workstation>>,
    employees: Arc<SubGateway>,
    picking: Arc<SubGateway>,
    telemetry: Arc<dyn PositionTelemetry>,
    settings: WorkstationSettings,
    valuation: ValuationConfig,
    events: EventBus,
}

impl WorkstationGateway {
    pub fn new(
        pool: Arc<ResourcePool<Workstation>>,
        employees: Arc<SubGateway>,
        picking: Arc<SubGateway>,
        telemetry: Arc<dyn PositionTelemetry>,
        settings: WorkstationSettings,
        valuation: ValuationConfig,
        events: EventBus,
    ) -> Self {
        Self {
            pool,
            employees,
            picking,
            telemetry,
            settings,
            valuation,
            events,
        }
    }

    async fn reserve_workstations(&self, request: &WorkstationOfferRequest) -> SchedulingResult<Vec<WorkstationOffer>> {
        let origin = self
            .telemetry
            .current_position(&request.origin_id)
            .ok_or_else(|| SchedulingError::PositionUnknown(request.origin_id.clone()))?;

        let mut members = self.pool.write().await;
        let mut offers = Vec::new();
        for workstation in members.iter_mut().filter(|ws| ws.active) {
            let Some(skill_time) = workstation.skill_time(&request.labor_process_id) else {
                continue;
            };
            let Some(position) = self.telemetry.current_position(&workstation.location_id) else {
                warn!("No position for workstation {}, skipping", workstation.id);
                continue;
            };

            let distance = origin.distance(&position);
            let desired_start = request.completion_time
                + self.settings.travel_time(distance, request.robot.average_velocity);
            let buffer_time = skill_time * self.settings.delta;
            let time_slot_length = skill_time + buffer_time;

            let finalized = workstation.calendar.reserve(ReservationEntry::new(
                request.cycle_id.clone(),
                request.task_id,
                request.labor_process_id.clone(),
                workstation.id.clone(),
                desired_start,
                time_slot_length,
            ));

            offers.push(WorkstationOffer {
                workstation_id: workstation.id.clone(),
                location_id: workstation.location_id.clone(),
                cycle_id: request.cycle_id.clone(),
                task_id: request.task_id,
                labor_process_id: request.labor_process_id.clone(),
                desired_start,
                desired_availability_date: finalized.desired_start,
                buffer_time,
                time_slot_length,
                skill_time,
                costs_workstation: workstation.cost_rate * skill_time,
                transport_costs: distance * request.robot.operating_cost,
                distance,
                completion_time: request.completion_time,
            });
        }
        Ok(offers)
    }
}

#[async_trait::async_trait]
impl ResourceGateway for WorkstationGateway {
    type Request = WorkstationOfferRequest;
    type Offer = Vec<Offer>;
    type Booking = BookingResult;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Workstation
    }

    async fn offer(&self, request: &WorkstationOfferRequest) -> SchedulingResult<Vec<Offer>> {
        let weights = Weights {
            alpha_time: request.alpha_time,
            alpha_costs: request.alpha_costs,
        };
        let workstation_offers = self.reserve_workstations(request).await?;

        let mut offers = Vec::with_capacity(workstation_offers.len());
        for workstation_offer in workstation_offers {
            let sub_request = SubOfferRequest {
                task_id: request.task_id,
                cycle_id: request.cycle_id.clone(),
                labor_process_id: request.labor_process_id.clone(),
                target: workstation_offer.workstation_id.clone(),
                desired_availability_date: workstation_offer.desired_availability_date,
                skill_time: workstation_offer.skill_time,
                buffer_time_workstation: workstation_offer.buffer_time,
                alpha_time: request.alpha_time,
                alpha_costs: request.alpha_costs,
                components: request.components.clone(),
            };
            let employee = self.employees.offer(&sub_request).await?;
            let picking = self.picking.offer(&sub_request).await?;

            let offer = score(&workstation_offer, employee.as_ref(), picking.as_ref(), weights, &self.valuation);
            debug!(
                "Task {}: {} on {} valued {:.4}",
                request.task_id, request.labor_process_id, offer.workstation.workstation_id, offer.valuation_result
            );
            self.events.emit(AuctionEvent::ResourceOffered {
                task_id: request.task_id,
                kind: ResourceKind::Workstation,
                resource_id: offer.workstation.workstation_id.clone(),
                labor_process_id: request.labor_process_id.clone(),
                valuation_result: offer.valuation_result,
            });
            offers.push(offer);
        }
        Ok(offers)
    }

    async fn book(&self, decision: &BookingDecision) -> SchedulingResult<BookingResult> {
        let workstation_result = {
            let mut members = self.pool.write().await;
            for reject in &decision.rejects {
                if let Some(workstation) = members.iter_mut().find(|ws| ws.id == reject.workstation_id) {
                    workstation
                        .calendar
                        .reject(decision.task_id, &reject.labor_process_id, &reject.workstation_id);
                }
            }
            members
                .iter_mut()
                .find(|ws| ws.id == decision.workstation_id)
                .and_then(|ws| {
                    ws.calendar.book(
                        decision.task_id,
                        &decision.labor_process_id,
                        &decision.workstation_id,
                        decision.start_time,
                        decision.time_slot_length,
                    )
                })
                .unwrap_or(0.0)
        };

        let employee_result = self.employees.book(decision).await.unwrap_or_else(|e| {
            warn!("Employee booking for task {} failed: {}", decision.task_id, e);
            0.0
        });
        let picking_result = self.picking.book(decision).await.unwrap_or_else(|e| {
            warn!("Picking booking for task {} failed: {}", decision.task_id, e);
            0.0
        });

        Ok(BookingResult {
            workstation_result,
            employee_result,
            picking_result,
        })
    }

    async fn cancel(&self, task_id: TaskId, labor_process_id: &str) -> SchedulingResult<usize> {
        let mut removed = self.pool.cancel(task_id, labor_process_id).await;
        removed += self.employees.cancel(task_id, labor_process_id).await?;
        removed += self.picking.cancel(task_id, labor_process_id).await?;
        Ok(removed)
    }

    async fn targets(&self) -> Vec<String> {
        self.pool
            .members()
            .await
            .into_iter()
            .filter(|ws| ws.is_active())
            .map(|ws| ws.location_id)
            .collect()
    }
}
