use super::types::{PoolMember, ResourceKind};
use crate::calendar::{ResourceCalendar, Timestamp};
use crate::task::types::TaskId;
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::info;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PoolError {
    #[error("{kind} '{id}' already exists")]
    DuplicateResource { kind: ResourceKind, id: String },

    #[error("{kind} '{id}' does not exist")]
    UnknownResource { kind: ResourceKind, id: String },

    #[error("{kind} '{id}' still holds {entries} reservations")]
    ResourceInUse {
        kind: ResourceKind,
        id: String,
        entries: usize,
    },
}

/// Resources of one kind together with their calendars.
#[derive(Debug)]
pub struct ResourcePool<M> {
    kind: ResourceKind,
    members: RwLock<Vec<M>>,
}

impl<M: PoolMember> ResourcePool<M> {
    pub fn new(kind: ResourceKind, members: Vec<M>) -> Result<Self, PoolError> {
        ensure_unique(kind, &members)?;
        Ok(Self {
            kind,
            members: RwLock::new(members),
        })
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub async fn add(&self, member: M) -> Result<(), PoolError> {
        let mut members = self.members.write().await;
        if members.iter().any(|m| m.id() == member.id()) {
            return Err(PoolError::DuplicateResource {
                kind: self.kind,
                id: member.id().to_string(),
            });
        }
        info!("Added {} {}", self.kind, member.id());
        members.push(member);
        Ok(())
    }

    /// Remove a resource that holds no reservations.
    pub async fn remove(&self, id: &str) -> Result<M, PoolError> {
        let mut members = self.members.write().await;
        let index = self.position(&members, id)?;
        let entries = members[index].calendar().len();
        if entries > 0 {
            return Err(PoolError::ResourceInUse {
                kind: self.kind,
                id: id.to_string(),
                entries,
            });
        }
        Ok(members.remove(index))
    }

    pub async fn set_active(&self, id: &str, active: bool) -> Result<(), PoolError> {
        let mut members = self.members.write().await;
        let index = self.position(&members, id)?;
        members[index].set_active(active);
        Ok(())
    }

    pub async fn members(&self) -> Vec<M> {
        self.members.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<M> {
        self.members.read().await.iter().find(|m| m.id() == id).cloned()
    }

    pub async fn calendar(&self, id: &str) -> Option<ResourceCalendar> {
        self.get(id).await.map(|m| m.calendar().clone())
    }

    /// Swap in members restored from a snapshot.
    pub async fn replace(&self, members: Vec<M>) -> Result<(), PoolError> {
        ensure_unique(self.kind, &members)?;
        *self.members.write().await = members;
        Ok(())
    }

    /// Drop every entry of the task's labor process from all calendars.
    pub async fn cancel(&self, task_id: TaskId, labor_process_id: &str) -> usize {
        self.members
            .write()
            .await
            .iter_mut()
            .map(|m| m.calendar_mut().reject_all(task_id, labor_process_id))
            .sum()
    }

    /// Drop slots that ended before `before` from all calendars.
    pub async fn prune(&self, before: Timestamp) -> usize {
        self.members
            .write()
            .await
            .iter_mut()
            .map(|m| m.calendar_mut().prune(before))
            .sum()
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Vec<M>> {
        self.members.write().await
    }

    fn position(&self, members: &[M], id: &str) -> Result<usize, PoolError> {
        members
            .iter()
            .position(|m| m.id() == id)
            .ok_or_else(|| PoolError::UnknownResource {
                kind: self.kind,
                id: id.to_string(),
            })
    }
}

fn ensure_unique<M: PoolMember>(kind: ResourceKind, members: &[M]) -> Result<(), PoolError> {
    let mut seen = HashSet::new();
    for member in members {
        if !seen.insert(member.id()) {
            return Err(PoolError::DuplicateResource {
                kind,
                id: member.id().to_string(),
            });
        }
    }
    Ok(())
}
