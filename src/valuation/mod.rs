//! Valuation and harmonization of auction offers.
//!
//! An auction round for one labor process yields, per workstation, three
//! independently reserved sub-offers. [`score`] synchronizes them to one start
//! time, checks that every resource can shift to that start within its own
//! buffer, and computes a weighted time/cost score.
//!
//! Scores are minimized: lower is better, and [`INFEASIBLE_SENTINEL`] is worse
//! than any feasible score.

use crate::calendar::Timestamp;
use crate::resource::types::{SubOffer, WorkstationOffer};
use serde::{Deserialize, Serialize};

/// Valuation of an offer that cannot be harmonized.
pub const INFEASIBLE_SENTINEL: f64 = 999.0;

/// Floor for start deviations so a perfect match still normalizes.
const MIN_DEVIATION: f64 = 0.01;

/// Scale constants of the saturating normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValuationConfig {
    pub throughput_scale: f64,
    pub cost_scale: f64,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            throughput_scale: 10.0,
            cost_scale: 1.0,
        }
    }
}

/// Trade-off between throughput time and cost. The two weights sum to one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Weights {
    pub alpha_time: f64,
    pub alpha_costs: f64,
}

impl Weights {
    pub fn from_alpha_time(alpha_time: f64) -> Self {
        let alpha_time = alpha_time.clamp(0.0, 1.0);
        Self {
            alpha_time,
            alpha_costs: 1.0 - alpha_time,
        }
    }
}

/// Scored combination of workstation, employee and picking sub-offers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub workstation: WorkstationOffer,
    pub employee: Option<SubOffer>,
    pub picking: Option<SubOffer>,
    pub start_time: Timestamp,
    pub completion_time: Timestamp,
    pub throughput_time: f64,
    pub throughput_time_normalized: f64,
    pub total_costs: f64,
    pub total_costs_normalized: f64,
    pub valuation_result: f64,
}

impl Offer {
    pub fn is_feasible(&self) -> bool {
        self.valuation_result < INFEASIBLE_SENTINEL
    }

    pub fn workstation_id(&self) -> &str {
        &self.workstation.workstation_id
    }

    pub fn labor_process_id(&self) -> &str {
        &self.workstation.labor_process_id
    }
}

/// `exp(-k / x)`: 0 as `x` approaches 0 from above, 1 as `x` grows.
pub fn normalize(value: f64, scale: f64) -> f64 {
    (-scale / value.max(f64::MIN_POSITIVE)).exp()
}

/// Synchronized start of the three sub-offers, or `None` when some resource
/// would have to move further than its buffer allows.
pub fn harmonize(workstation: &WorkstationOffer, employee: &SubOffer, picking: &SubOffer) -> Option<Timestamp> {
    let (earlier, later) = if employee.availability_time <= picking.availability_time {
        (employee, picking)
    } else {
        (picking, employee)
    };
    let start_time = later.availability_time;

    let workstation_fits =
        (workstation.desired_availability_date - start_time).abs() <= workstation.buffer_time;
    let earlier_fits = (start_time - earlier.availability_time).abs() <= earlier.buffer_time;

    (workstation_fits && earlier_fits).then_some(start_time)
}

/// Score one workstation offer together with its employee and picking sub-offers.
pub fn score(
    workstation: &WorkstationOffer,
    employee: Option<&SubOffer>,
    picking: Option<&SubOffer>,
    weights: Weights,
    config: &ValuationConfig,
) -> Offer {
    let mut offer = Offer {
        workstation: workstation.clone(),
        employee: employee.cloned(),
        picking: picking.cloned(),
        start_time: workstation.desired_availability_date,
        completion_time: 0.0,
        throughput_time: 0.0,
        throughput_time_normalized: 0.0,
        total_costs: 0.0,
        total_costs_normalized: 0.0,
        valuation_result: INFEASIBLE_SENTINEL,
    };

    let (Some(employee), Some(picking)) = (employee, picking) else {
        return offer;
    };
    let Some(start_time) = harmonize(workstation, employee, picking) else {
        offer.start_time = employee.availability_time.max(picking.availability_time);
        return offer;
    };

    let completion_time = start_time + workstation.skill_time;
    let throughput_time = completion_time - workstation.completion_time;
    let total_costs =
        workstation.costs_workstation + workstation.transport_costs + employee.costs + picking.costs;
    let throughput_time_normalized = normalize(throughput_time, config.throughput_scale);
    let total_costs_normalized = normalize(total_costs, config.cost_scale);

    offer.start_time = start_time;
    offer.completion_time = completion_time;
    offer.throughput_time = throughput_time;
    offer.throughput_time_normalized = throughput_time_normalized;
    offer.total_costs = total_costs;
    offer.total_costs_normalized = total_costs_normalized;
    offer.valuation_result =
        weights.alpha_time * throughput_time_normalized + weights.alpha_costs * total_costs_normalized;
    offer
}

/// Score of a single employee or picking reservation, used to pick the best
/// member of a pool before the three-way valuation.
pub fn local_score(deviation: f64, costs: f64, buffer_limit: f64, weights: Weights) -> f64 {
    if deviation > buffer_limit {
        return INFEASIBLE_SENTINEL;
    }
    let deviation = if deviation <= 0.0 { MIN_DEVIATION } else { deviation };
    weights.alpha_time * normalize(deviation, 1.0) + weights.alpha_costs * normalize(costs, 1.0)
}
