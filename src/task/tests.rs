use super::*;
use crate::calendar::ResourceCalendar;
use crate::collaborators::{PositionCache, TaskStore};
use crate::config::SchedulerConfig;
use crate::error::{SchedulingError, SchedulingResult};
use crate::events::{AuctionEvent, EventBus, EventLog};
use crate::resource::{
    BookingDecision, BookingResult, ResourceGateway, ResourceKind, ShopFloor, WorkstationOfferRequest,
};
use crate::simulation::Simulation;
use crate::task::types::fields;
use crate::valuation::Offer;
use std::sync::Arc;

fn test_config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.agent.poll_delay_ms = 0;
    config.agent.return_delay_ms = 0;
    config
}

fn tasks(count: u64) -> Vec<Task> {
    (1..=count).map(|id| Task::new(id, "standard")).collect()
}

fn simulation(config: SchedulerConfig, tasks: Vec<Task>) -> Simulation {
    Simulation::new(config, tasks, EventBus::new()).expect("Simulation should build")
}

fn assert_disjoint(calendar: &ResourceCalendar) {
    for pair in calendar.entries().windows(2) {
        assert!(
            pair[0].internal_end() + calendar.gap() <= pair[1].internal_start + 1e-9,
            "overlapping entries {:?} and {:?}",
            pair[0],
            pair[1]
        );
    }
}

#[tokio::test]
async fn test_single_task_walks_whole_graph() {
    let sim = simulation(test_config(), tasks(1));

    let reports = sim.manager.run_until_idle().await.expect("Run should succeed");

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report.is_finished(), "unexpected failure: {:?}", report.error);
    assert_eq!(report.commitments.len(), 4);
    assert_eq!(report.finished_nodes.first().map(String::as_str), Some("n1"));
    assert_eq!(report.finished_nodes.last().map(String::as_str), Some("n4"));
    for pair in report.commitments.windows(2) {
        assert!(pair[1].start_time >= pair[0].completion_time);
    }
    assert!(report.commitments.iter().all(|c| c.result.is_complete()));

    let task = sim.store.get(1).unwrap();
    assert_eq!(task.state, TaskState::Finished);
    assert_eq!(task.finished_nodes, report.finished_nodes);
    assert!(task.task_end_time.is_some());
    assert_eq!(task.robot.as_ref().map(|r| r.robot_id.as_str()), Some("robot1"));
    // Lowest energy carrier wins.
    assert_eq!(task.carrier.as_ref().map(|c| c.phyaddr), Some(170));

    assert_eq!(sim.fleet.unblock_count(), 1);
    assert_eq!(sim.fleet.dispatches().await.len(), 4);
    assert_eq!(sim.nodes.restore_count(), 1);
    assert_eq!(sim.nodes.reserved_by(170).await, None);

    let snapshot = sim.shop_floor.snapshot().await;
    assert_eq!(snapshot.workstations.iter().map(|ws| ws.calendar.len()).sum::<usize>(), 4);
    assert_eq!(snapshot.employees.iter().map(|op| op.calendar.len()).sum::<usize>(), 4);
    assert_eq!(snapshot.picking.iter().map(|op| op.calendar.len()).sum::<usize>(), 4);
}

#[tokio::test]
async fn test_exhausted_carrier_polling_fails_task() {
    let mut config = test_config();
    config.agent.poll_attempts = 3;
    let sim = simulation(config, tasks(1));
    sim.nodes.fail_next_polls(3);

    let reports = sim.manager.run_until_idle().await.unwrap();

    let report = &reports[0];
    assert_eq!(report.state, AgentState::Failed);
    assert_eq!(report.error, Some(SchedulingError::CarrierUnavailable { attempts: 3 }));
    assert_eq!(sim.nodes.poll_count(), 3);
    assert_eq!(sim.store.get(1).unwrap().state, TaskState::Failed);
    assert_eq!(sim.fleet.unblock_count(), 1);
    assert_eq!(sim.fleet.idle_count().await, 2);
    assert_eq!(sim.shop_floor.snapshot().await.entry_count(), 0);
}

#[tokio::test]
async fn test_restarted_task_is_claimed_again() {
    let mut config = test_config();
    config.agent.poll_attempts = 3;
    let sim = simulation(config, tasks(1));
    sim.nodes.fail_next_polls(3);

    let reports = sim.manager.run_until_idle().await.unwrap();
    assert_eq!(reports[0].state, AgentState::Failed);
    assert_eq!(sim.store.get(1).unwrap().state, TaskState::Failed);

    sim.store
        .update_task_field(1, fields::STATE, serde_json::json!(TaskState::Restart))
        .await
        .unwrap();
    let reports = sim.manager.run_until_idle().await.unwrap();

    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_finished(), "unexpected failure: {:?}", reports[0].error);
    assert_eq!(sim.store.get(1).unwrap().state, TaskState::Finished);
    assert_eq!(sim.fleet.unblock_count(), 2);
}

#[tokio::test]
async fn test_all_infeasible_offers_fail_and_clean_calendars() {
    let sim = simulation(test_config(), tasks(1));
    sim.shop_floor.employees().set_active("EMP1", false).await.unwrap();
    sim.shop_floor.employees().set_active("EMP2", false).await.unwrap();

    let reports = sim.manager.run_until_idle().await.unwrap();

    let report = &reports[0];
    assert_eq!(report.state, AgentState::Failed);
    assert!(matches!(report.error, Some(SchedulingError::NoFeasibleOffer { task_id: 1, candidates: 2 })));
    assert_eq!(sim.shop_floor.snapshot().await.entry_count(), 0);
    assert_eq!(sim.nodes.reserved_by(170).await, None);
    assert_eq!(sim.store.get(1).unwrap().state, TaskState::Failed);
}

#[tokio::test]
async fn test_no_offers_is_resource_exhaustion() {
    let sim = simulation(test_config(), tasks(1));
    sim.positions.remove("ws1");
    sim.positions.remove("ws2");

    let reports = sim.manager.run_until_idle().await.unwrap();

    assert!(matches!(
        &reports[0].error,
        Some(SchedulingError::ResourceExhausted { labor_processes }) if labor_processes == &vec!["P1".to_string()]
    ));
}

/// Forwards to the real pools but loses the employee confirmation.
struct LosingEmployeeBookings {
    inner: Arc<crate::resource::AuctionGateway>,
}

#[async_trait::async_trait]
impl ResourceGateway for LosingEmployeeBookings {
    type Request = WorkstationOfferRequest;
    type Offer = Vec<Offer>;
    type Booking = BookingResult;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Workstation
    }

    async fn offer(&self, request: &WorkstationOfferRequest) -> SchedulingResult<Vec<Offer>> {
        self.inner.offer(request).await
    }

    async fn book(&self, decision: &BookingDecision) -> SchedulingResult<BookingResult> {
        let mut result = self.inner.book(decision).await?;
        result.employee_result = 0.0;
        Ok(result)
    }

    async fn cancel(&self, task_id: TaskId, labor_process_id: &str) -> SchedulingResult<usize> {
        self.inner.cancel(task_id, labor_process_id).await
    }

    async fn targets(&self) -> Vec<String> {
        self.inner.targets().await
    }
}

#[tokio::test]
async fn test_partial_booking_is_inconsistency() {
    let config = test_config();
    let positions = PositionCache::new();
    for position in &config.positions {
        positions.update(position.entity_id.clone(), position.position());
    }
    let floor = ShopFloor::from_config(&config, Arc::new(positions), EventBus::new()).unwrap();
    let gateway = Arc::new(LosingEmployeeBookings { inner: floor.gateway() });
    let sim = Simulation::with_gateway(config, tasks(1), gateway).unwrap();

    let reports = sim.manager.run_until_idle().await.unwrap();

    let report = &reports[0];
    assert_eq!(report.state, AgentState::Failed);
    assert!(matches!(
        &report.error,
        Some(SchedulingError::BookingInconsistency { task_id: 1, employee_result, .. }) if *employee_result == 0.0
    ));
    assert!(report.commitments.is_empty());
    assert_eq!(floor.snapshot().await.entry_count(), 0);
}

#[tokio::test]
async fn test_deadline_miss_in_realtime_mode() {
    let mut config = test_config();
    config.agent.realtime = true;
    config.agent.min_remaining_secs = 10_000.0;
    let sim = simulation(config, tasks(1));

    let reports = sim.manager.run_until_idle().await.unwrap();

    let report = &reports[0];
    assert_eq!(report.state, AgentState::Failed);
    assert!(matches!(
        report.error,
        Some(SchedulingError::DeadlineMiss { task_id: 1, required, .. }) if required == 10_000.0
    ));
    assert!(sim.fleet.dispatches().await.is_empty());
    assert_eq!(sim.shop_floor.snapshot().await.entry_count(), 0);
    assert_eq!(sim.nodes.restore_count(), 1);
    assert_eq!(sim.store.get(1).unwrap().state, TaskState::Failed);
}

#[tokio::test]
async fn test_concurrent_tasks_never_overlap() {
    let sim = simulation(test_config(), tasks(2));

    let reports = sim.manager.run_until_idle().await.unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|report| report.state.is_terminal()));
    assert!(reports.iter().any(|report| report.is_finished()));

    let snapshot = sim.shop_floor.snapshot().await;
    for workstation in &snapshot.workstations {
        assert_disjoint(&workstation.calendar);
    }
    for operator in snapshot.employees.iter().chain(&snapshot.picking) {
        assert_disjoint(&operator.calendar);
    }
}

#[tokio::test]
async fn test_third_task_waits_for_free_robot() {
    let sim = simulation(test_config(), tasks(3));

    let reports = sim.manager.run_until_idle().await.unwrap();

    // Two robots: the third task is claimed in the second batch.
    assert_eq!(reports.len(), 3);
    assert_eq!(reports.iter().map(|r| r.task_id).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(sim.fleet.unblock_count(), 3);
    assert!(sim.store.all().iter().all(|task| task.state.is_terminal()));
}

#[tokio::test]
async fn test_restarted_task_resumes_from_finished_nodes() {
    let mut task = Task::new(1, "standard");
    task.state = TaskState::Restart;
    task.finished_nodes = vec!["n1".to_string()];
    let sim = simulation(test_config(), vec![task]);

    let reports = sim.manager.run_until_idle().await.unwrap();

    let report = &reports[0];
    assert!(report.is_finished(), "unexpected failure: {:?}", report.error);
    assert_eq!(report.commitments.len(), 3);
    assert!(report.commitments.iter().all(|c| c.node_id != "n1"));
    assert_eq!(report.finished_nodes.len(), 4);
}

#[tokio::test]
async fn test_unknown_product_variant_fails_before_claiming_carrier() {
    let sim = simulation(test_config(), vec![Task::new(1, "prototype")]);

    let reports = sim.manager.run_until_idle().await.unwrap();

    assert_eq!(
        reports[0].error,
        Some(SchedulingError::UnknownProductVariant("prototype".to_string()))
    );
    assert_eq!(sim.nodes.poll_count(), 0);
    assert_eq!(sim.fleet.unblock_count(), 1);
}

#[tokio::test]
async fn test_events_follow_task_lifecycle() {
    let log = Arc::new(EventLog::new());
    let events = EventBus::new().with_handler(log.clone());
    let sim = Simulation::new(test_config(), tasks(1), events).unwrap();

    sim.manager.run_until_idle().await.unwrap();

    let events = log.events();
    assert!(matches!(events.first(), Some(AuctionEvent::TaskClaimed { task_id: 1, .. })));
    assert!(matches!(events.last(), Some(AuctionEvent::TaskFinished { task_id: 1 })));
    let decisions = events
        .iter()
        .filter(|e| matches!(e, AuctionEvent::DecisionMade { .. }))
        .count();
    let bookings = events.iter().filter(|e| matches!(e, AuctionEvent::Booked { .. })).count();
    assert_eq!(decisions, 4);
    assert_eq!(bookings, 4);
}

#[tokio::test]
async fn test_commits_update_reference_statistics() {
    let sim = simulation(test_config(), tasks(1));
    let before = sim.manager.statistics().await;

    let reports = sim.manager.run_until_idle().await.unwrap();
    let after = sim.manager.statistics().await;

    let first = &reports[0].commitments[0];
    assert_eq!(first.labor_process_id, "P1");
    assert_eq!(before.average_review("P1"), Some(0.5));
    assert_ne!(after.average_review("P1"), before.average_review("P1"));
    assert_eq!(after.window_size(), before.window_size());
    assert_ne!(after, before);
}

#[test]
fn test_adaptive_alpha() {
    assert_eq!(TaskAgent::adaptive_alpha(0.5, 0.01, 100.0, 120.0), 0.5);
    assert_eq!(TaskAgent::adaptive_alpha(0.5, 0.01, 120.0, 120.0), 0.5);

    let small = TaskAgent::adaptive_alpha(0.5, 0.01, 130.0, 120.0);
    let large = TaskAgent::adaptive_alpha(0.5, 0.01, 1120.0, 120.0);
    assert!(small > 0.5 && small < large && large < 1.0);
    let expected = 0.5 + 0.5 * (-1.0f64 / (0.01 * 10.0)).exp();
    assert!((small - expected).abs() < 1e-12);
}
