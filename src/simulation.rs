//! In-process shop floor for demos and tests.
//!
//! Wires the configured resource pools to the simulated collaborators and a
//! [`TaskManager`]. Positions come from the configuration and never move, so
//! carriers always count as home once released. When `[services]` names a
//! node gateway or fleet URL, the agents talk to that service over HTTP
//! instead of the simulated one.

use crate::collaborators::{
    FleetService, HttpFleetService, HttpNodeGateway, InMemoryTaskStore, PhysicalNodeGateway, PositionCache,
    SimulatedFleet, SimulatedNodeGateway,
};
use crate::config::{SchedulerConfig, ServiceConfig};
use crate::events::EventBus;
use crate::resource::{AuctionGateway, ShopFloor};
use crate::stats::ReferenceStatistics;
use crate::task::agent::AgentContext;
use crate::task::types::Task;
use crate::task::TaskManager;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Seconds the simulated fleet needs to reach the first workstation.
pub const SIMULATED_TRAVEL_TIME: f64 = 30.0;

pub struct Simulation {
    pub config: Arc<SchedulerConfig>,
    pub shop_floor: ShopFloor,
    pub store: Arc<InMemoryTaskStore>,
    pub nodes: Arc<SimulatedNodeGateway>,
    pub fleet: Arc<SimulatedFleet>,
    pub positions: Arc<PositionCache>,
    pub manager: TaskManager,
}

impl Simulation {
    pub fn new(config: SchedulerConfig, tasks: Vec<Task>, events: EventBus) -> Result<Self> {
        let statistics = ReferenceStatistics::with_initial_values(
            config.negotiation.window_size,
            &config.negotiation.initial_durations,
            &config.negotiation.initial_reviews,
        );
        Self::with_statistics(config, tasks, statistics, events)
    }

    pub fn with_statistics(
        config: SchedulerConfig,
        tasks: Vec<Task>,
        statistics: ReferenceStatistics,
        events: EventBus,
    ) -> Result<Self> {
        let positions = Arc::new(PositionCache::new());
        for position in &config.positions {
            positions.update(position.entity_id.clone(), position.position());
        }
        let shop_floor = ShopFloor::from_config(&config, positions.clone(), events.clone())?;
        let gateway = shop_floor.gateway();
        Self::assemble(config, tasks, statistics, events, positions, gateway, shop_floor)
    }

    /// Same wiring with a custom auction gateway in front of the pools.
    pub fn with_gateway(
        config: SchedulerConfig,
        tasks: Vec<Task>,
        gateway: Arc<AuctionGateway>,
    ) -> Result<Self> {
        let events = EventBus::new();
        let positions = Arc::new(PositionCache::new());
        for position in &config.positions {
            positions.update(position.entity_id.clone(), position.position());
        }
        let shop_floor = ShopFloor::from_config(&config, positions.clone(), events.clone())?;
        let statistics = ReferenceStatistics::with_initial_values(
            config.negotiation.window_size,
            &config.negotiation.initial_durations,
            &config.negotiation.initial_reviews,
        );
        Self::assemble(config, tasks, statistics, events, positions, gateway, shop_floor)
    }

    fn assemble(
        config: SchedulerConfig,
        tasks: Vec<Task>,
        statistics: ReferenceStatistics,
        events: EventBus,
        positions: Arc<PositionCache>,
        gateway: Arc<AuctionGateway>,
        shop_floor: ShopFloor,
    ) -> Result<Self> {
        config.validate().context("Invalid scheduler configuration")?;
        let config = Arc::new(config);
        let store = Arc::new(InMemoryTaskStore::with_tasks(tasks));
        let nodes = Arc::new(SimulatedNodeGateway::new(
            config.carriers.iter().map(|carrier| (carrier.phyaddr, carrier.energy)),
        ));
        let fleet = Arc::new(SimulatedFleet::new(config.robots.clone(), SIMULATED_TRAVEL_TIME));

        let node_gateway = node_gateway(&config.services, nodes.clone())?;
        let fleet_service = fleet_service(&config.services, fleet.clone())?;

        let context = AgentContext {
            config: config.clone(),
            graph: Arc::new(config.priority_graph.clone()),
            gateway,
            nodes: node_gateway,
            fleet: fleet_service,
            telemetry: positions.clone(),
            store: store.clone(),
            negotiation: Arc::new(Mutex::new(statistics)),
            events,
        };

        Ok(Self {
            config,
            shop_floor,
            store,
            nodes,
            fleet,
            positions,
            manager: TaskManager::new(context),
        })
    }
}

fn request_timeout(services: &ServiceConfig) -> Option<Duration> {
    services.request_timeout_secs.map(Duration::from_secs)
}

fn node_gateway(
    services: &ServiceConfig,
    simulated: Arc<SimulatedNodeGateway>,
) -> Result<Arc<dyn PhysicalNodeGateway>> {
    let Some(url) = &services.node_gateway_url else {
        return Ok(simulated);
    };
    info!("Using node gateway at {}", url);
    let gateway = match request_timeout(services) {
        Some(timeout) => HttpNodeGateway::with_timeout(url, timeout),
        None => HttpNodeGateway::new(url),
    }
    .with_context(|| format!("Invalid node gateway url {url}"))?;
    Ok(Arc::new(gateway))
}

fn fleet_service(services: &ServiceConfig, simulated: Arc<SimulatedFleet>) -> Result<Arc<dyn FleetService>> {
    let Some(url) = &services.fleet_url else {
        return Ok(simulated);
    };
    info!("Using fleet service at {}", url);
    let fleet = match request_timeout(services) {
        Some(timeout) => HttpFleetService::with_timeout(url, timeout),
        None => HttpFleetService::new(url),
    }
    .with_context(|| format!("Invalid fleet url {url}"))?;
    Ok(Arc::new(fleet))
}
