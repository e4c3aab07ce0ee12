use super::operator::{OperatorGateway, OperatorPolicy};
use super::pool::{PoolError, ResourcePool};
use super::types::{Operator, PoolMember, ResourceKind, Workstation};
use super::workstation::WorkstationGateway;
use super::{AuctionGateway, SubGateway};
use crate::calendar::{ResourceCalendar, Timestamp, now};
use crate::collaborators::PositionTelemetry;
use crate::config::SchedulerConfig;
use crate::events::EventBus;
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// The three resource pools wired into one auction gateway.
pub struct ShopFloor {
    workstations: Arc<ResourcePool<Workstation>>,
    employees: Arc<ResourcePool<Operator>>,
    picking: Arc<ResourcePool<Operator>>,
    gateway: Arc<WorkstationGateway>,
}

/// Point-in-time copy of every pool including calendars.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolSnapshot {
    pub snapshot_id: Uuid,
    pub taken_at: Timestamp,
    pub workstations: Vec<Workstation>,
    pub employees: Vec<Operator>,
    pub picking: Vec<Operator>,
}

fn with_gap<M: PoolMember>(mut members: Vec<M>, gap: f64) -> Vec<M> {
    for member in members.iter_mut() {
        if member.calendar().is_empty() {
            *member.calendar_mut() = ResourceCalendar::with_gap(gap);
        }
    }
    members
}

impl ShopFloor {
    pub fn from_config(
        config: &SchedulerConfig,
        telemetry: Arc<dyn PositionTelemetry>,
        events: EventBus,
    ) -> Result<Self, PoolError> {
        let workstations = Arc::new(ResourcePool::new(
            ResourceKind::Workstation,
            with_gap(config.workstations.resources.clone(), config.workstations.rotation_gap),
        )?);
        let employees = Arc::new(ResourcePool::new(
            ResourceKind::Employee,
            with_gap(config.employees.resources.clone(), config.employees.rotation_gap),
        )?);
        let picking = Arc::new(ResourcePool::new(
            ResourceKind::Picking,
            with_gap(config.picking.resources.clone(), config.picking.rotation_gap),
        )?);

        let employee_gateway: Arc<SubGateway> = Arc::new(OperatorGateway::new(
            employees.clone(),
            OperatorPolicy::Employee {
                epsilon: config.employees.epsilon,
            },
            events.clone(),
        ));
        let picking_gateway: Arc<SubGateway> = Arc::new(OperatorGateway::new(
            picking.clone(),
            OperatorPolicy::Picking {
                delta: config.picking.delta,
            },
            events.clone(),
        ));
        let gateway = Arc::new(WorkstationGateway::new(
            workstations.clone(),
            employee_gateway,
            picking_gateway,
            telemetry,
            config.workstation_settings(),
            config.valuation.clone(),
            events,
        ));

        Ok(Self {
            workstations,
            employees,
            picking,
            gateway,
        })
    }

    pub fn gateway(&self) -> Arc<AuctionGateway> {
        self.gateway.clone()
    }

    pub fn workstations(&self) -> &Arc<ResourcePool<Workstation>> {
        &self.workstations
    }

    pub fn employees(&self) -> &Arc<ResourcePool<Operator>> {
        &self.employees
    }

    pub fn picking(&self) -> &Arc<ResourcePool<Operator>> {
        &self.picking
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            snapshot_id: Uuid::new_v4(),
            taken_at: now(),
            workstations: self.workstations.members().await,
            employees: self.employees.members().await,
            picking: self.picking.members().await,
        }
    }

    pub async fn restore(&self, snapshot: PoolSnapshot) -> Result<(), PoolError> {
        self.workstations.replace(snapshot.workstations).await?;
        self.employees.replace(snapshot.employees).await?;
        self.picking.replace(snapshot.picking).await?;
        info!(
            "Restored resource pools from snapshot {} taken at {:.3}",
            snapshot.snapshot_id, snapshot.taken_at
        );
        Ok(())
    }

    /// Drop slots that ended before `before` in every pool.
    pub async fn prune(&self, before: Timestamp) -> usize {
        self.workstations.prune(before).await + self.employees.prune(before).await + self.picking.prune(before).await
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

impl PoolSnapshot {
    /// Write as JSON, gzip-compressed when the path ends in `.gz`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        let json = serde_json::to_vec_pretty(self)?;
        if is_gzip(path) {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            encoder.write_all(&json)?;
            encoder.finish()?.flush()?;
        } else {
            let mut writer = BufWriter::new(file);
            writer.write_all(&json)?;
            writer.flush()?;
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut content = Vec::new();
        if is_gzip(path) {
            GzDecoder::new(BufReader::new(file)).read_to_end(&mut content)?;
        } else {
            BufReader::new(file).read_to_end(&mut content)?;
        }
        serde_json::from_slice(&content).with_context(|| format!("Invalid snapshot {}", path.display()))
    }

    pub fn entry_count(&self) -> usize {
        self.workstations.iter().map(|ws| ws.calendar.len()).sum::<usize>()
            + self.employees.iter().map(|op| op.calendar.len()).sum::<usize>()
            + self.picking.iter().map(|op| op.calendar.len()).sum::<usize>()
    }
}
