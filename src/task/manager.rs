use crate::error::{CollaboratorError, SchedulingResult};
use crate::events::AuctionEvent;
use crate::stats::ReferenceStatistics;
use crate::task::agent::{AgentContext, AgentReport, TaskAgent};
use crate::task::types::{Robot, Task, TaskId, TaskState, fields};
use futures::future::join_all;
use std::collections::HashSet;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Claims tasks from the store and runs one agent per claimed task.
pub struct TaskManager {
    context: AgentContext,
    claimed: Mutex<HashSet<TaskId>>,
}

impl TaskManager {
    pub fn new(context: AgentContext) -> Self {
        Self {
            context,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    /// Copy of the reference statistics, taken under the negotiation lock.
    pub async fn statistics(&self) -> ReferenceStatistics {
        self.context.negotiation.lock().await.clone()
    }

    /// Claim the lowest claimable task a robot is available for.
    ///
    /// Returns `None` when no task is claimable or the fleet has no free robot.
    pub async fn claim_next(&self) -> SchedulingResult<Option<(Task, Robot)>> {
        let mut claimed = self.claimed.lock().await;
        let mut tasks = self.context.store.find_open_or_restart_tasks().await?;
        tasks.sort_by_key(|task| task.task_id);

        let Some(mut task) = tasks
            .into_iter()
            .find(|task| task.is_claimable() && !claimed.contains(&task.task_id))
        else {
            return Ok(None);
        };
        let Some(robot) = self.context.fleet.claim_robot(task.task_id).await? else {
            debug!("No free robot for task {}", task.task_id);
            return Ok(None);
        };

        let marked = async {
            self.context
                .store
                .update_task_field(task.task_id, fields::STATE, serde_json::json!(TaskState::Active))
                .await?;
            let robot_value = serde_json::to_value(&robot)
                .map_err(|e| CollaboratorError::parse("task store", e))?;
            self.context
                .store
                .update_task_field(task.task_id, fields::ROBOT, robot_value)
                .await
        }
        .await;
        if let Err(e) = marked {
            warn!("Task {}: could not mark active, releasing robot {}", task.task_id, robot.robot_id);
            if let Err(release) = self.context.fleet.unblock_robot(&robot.robot_id, 0.0, None).await {
                warn!("Releasing robot {} failed: {}", robot.robot_id, release);
            }
            return Err(e.into());
        }

        claimed.insert(task.task_id);
        task.state = TaskState::Active;
        task.robot = Some(robot.clone());
        info!("Task {}: claimed with robot {}", task.task_id, robot.robot_id);
        self.context.events.emit(AuctionEvent::TaskClaimed {
            task_id: task.task_id,
            robot_id: robot.robot_id.clone(),
        });
        Ok(Some((task, robot)))
    }

    /// Claim the next task and run its agent on a new tokio task.
    pub async fn spawn_next(&self) -> SchedulingResult<Option<JoinHandle<AgentReport>>> {
        let Some((task, robot)) = self.claim_next().await? else {
            return Ok(None);
        };
        let agent = TaskAgent::new(task, robot, self.context.clone());
        Ok(Some(tokio::spawn(agent.run())))
    }

    /// Claim and run tasks until nothing is claimable any more.
    pub async fn run_until_idle(&self) -> SchedulingResult<Vec<AgentReport>> {
        let mut reports = Vec::new();
        loop {
            let mut handles = Vec::new();
            while let Some(handle) = self.spawn_next().await? {
                handles.push(handle);
            }
            if handles.is_empty() {
                break;
            }
            info!("Running {} task agents", handles.len());
            reports.extend(self.collect_reports(join_all(handles).await).await);
        }
        reports.sort_by_key(|report| report.task_id);
        Ok(reports)
    }

    /// Poll the store until `shutdown` flips to true, then wait for running agents.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SchedulingResult<Vec<AgentReport>> {
        let interval = self.context.config.agent.manager_poll_interval();
        let mut running: Vec<JoinHandle<AgentReport>> = Vec::new();
        let mut reports = Vec::new();

        while !*shutdown.borrow() {
            loop {
                match self.spawn_next().await {
                    Ok(Some(handle)) => running.push(handle),
                    Ok(None) => break,
                    Err(e) => {
                        error!("Claiming the next task failed: {}", e);
                        break;
                    }
                }
            }

            let (finished, pending): (Vec<_>, Vec<_>) = running.into_iter().partition(|handle| handle.is_finished());
            running = pending;
            reports.extend(self.collect_reports(join_all(finished).await).await);

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("Shutting down, waiting for {} running agents", running.len());
        reports.extend(self.collect_reports(join_all(running).await).await);
        Ok(reports)
    }

    /// Unwrap finished agents and drop their tasks from the claimed set, so a
    /// task moved back to `restart` can be claimed again.
    async fn collect_reports(&self, results: Vec<Result<AgentReport, tokio::task::JoinError>>) -> Vec<AgentReport> {
        let reports: Vec<AgentReport> = results
            .into_iter()
            .filter_map(|result| match result {
                Ok(report) => Some(report),
                Err(e) => {
                    error!("Agent task aborted: {}", e);
                    None
                }
            })
            .collect();

        let mut claimed = self.claimed.lock().await;
        for report in &reports {
            claimed.remove(&report.task_id);
        }
        reports
    }
}
