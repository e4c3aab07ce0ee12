use super::*;
use crate::calendar::CycleId;
use crate::collaborators::PositionCache;
use crate::config::SchedulerConfig;
use crate::error::SchedulingError;
use crate::events::EventBus;
use std::sync::Arc;
use tempfile::TempDir;

const COMPLETION: f64 = 1000.0;

fn shop_floor() -> (SchedulerConfig, ShopFloor) {
    let config = SchedulerConfig::default();
    let positions = PositionCache::new();
    for position in &config.positions {
        positions.update(position.entity_id.clone(), position.position());
    }
    let floor = ShopFloor::from_config(&config, Arc::new(positions), EventBus::new())
        .expect("Default shop floor should build");
    (config, floor)
}

fn request(config: &SchedulerConfig, task_id: u64, cycle: &str, labor_process: &str) -> WorkstationOfferRequest {
    WorkstationOfferRequest {
        task_id,
        cycle_id: CycleId::new(cycle),
        labor_process_id: labor_process.to_string(),
        alpha_time: 0.5,
        alpha_costs: 0.5,
        completion_time: COMPLETION,
        robot: config.robots[1].clone(),
        origin_id: "klt1".to_string(),
        components: Vec::new(),
    }
}

async fn entries<M: PoolMember>(pool: &ResourcePool<M>, id: &str) -> usize {
    pool.calendar(id).await.map(|calendar| calendar.len()).unwrap_or_default()
}

#[tokio::test]
async fn test_offer_reserves_in_every_pool() {
    let (config, floor) = shop_floor();
    let gateway = floor.gateway();

    let offers = gateway
        .offer(&request(&config, 1, "C1", "P1"))
        .await
        .expect("Offer should succeed");

    assert_eq!(offers.len(), 2);
    assert!(offers.iter().all(|offer| offer.is_feasible()));
    assert_eq!(offers[0].workstation_id(), "WS1");
    // 4 distance units at 0.5/s, doubled.
    assert!((offers[0].workstation.desired_availability_date - 1016.0).abs() < 1e-9);
    assert_eq!(offers[0].start_time, offers[0].workstation.desired_availability_date);

    assert_eq!(entries(floor.workstations(), "WS1").await, 1);
    assert_eq!(entries(floor.workstations(), "WS2").await, 1);
    // Only the best employee and picking robot keep their slots, one per workstation.
    assert_eq!(entries(floor.employees(), "EMP2").await, 2);
    assert_eq!(entries(floor.employees(), "EMP1").await, 0);
    assert_eq!(entries(floor.picking(), "PCK1").await, 2);
    assert_eq!(entries(floor.picking(), "PCK2").await, 0);

    let calendar = floor.employees().calendar("EMP2").await.unwrap();
    assert!(calendar.entries().iter().all(|entry| entry.cycle_id.as_str() == "C1"));
}

#[tokio::test]
async fn test_book_confirms_winner_and_drops_losers() {
    let (config, floor) = shop_floor();
    let gateway = floor.gateway();
    let offers = gateway.offer(&request(&config, 1, "C1", "P1")).await.unwrap();
    let winner = &offers[0];

    let decision = BookingDecision {
        task_id: 1,
        labor_process_id: "P1".to_string(),
        workstation_id: winner.workstation_id().to_string(),
        employee_id: winner.employee.as_ref().unwrap().resource_id.clone(),
        robot_id: winner.picking.as_ref().unwrap().resource_id.clone(),
        start_time: winner.start_time,
        time_slot_length: winner.workstation.skill_time,
        rejects: vec![Reject {
            labor_process_id: "P1".to_string(),
            workstation_id: "WS2".to_string(),
        }],
    };
    let result = gateway.book(&decision).await.expect("Booking should succeed");

    assert!(result.is_complete());
    assert_eq!(result.workstation_result, winner.start_time);
    assert_eq!(result.employee_result, winner.start_time);
    assert_eq!(result.picking_result, winner.start_time);

    assert_eq!(entries(floor.workstations(), "WS2").await, 0);
    let workstation = floor.workstations().calendar("WS1").await.unwrap();
    assert_eq!(workstation.len(), 1);
    assert_eq!(workstation.entries()[0].slot_length, 40.0);

    let employee = floor.employees().calendar("EMP2").await.unwrap();
    assert_eq!(employee.len(), 1);
    let entry = &employee.entries()[0];
    assert_eq!(entry.target_resource_id, "WS1");
    assert_eq!(entry.desired_start, winner.start_time);
    assert_eq!(entry.internal_start, winner.start_time - 15.0);
    assert_eq!(entry.slot_length, 55.0);

    assert_eq!(entries(floor.picking(), "PCK1").await, 1);
}

#[tokio::test]
async fn test_book_without_tentative_slot_reports_zero() {
    let (_, floor) = shop_floor();
    let decision = BookingDecision {
        task_id: 7,
        labor_process_id: "P1".to_string(),
        workstation_id: "WS1".to_string(),
        employee_id: "EMP1".to_string(),
        robot_id: "PCK1".to_string(),
        start_time: 500.0,
        time_slot_length: 40.0,
        rejects: Vec::new(),
    };

    let result = floor.gateway().book(&decision).await.unwrap();

    assert!(!result.is_complete());
    assert_eq!(result, BookingResult::default());
    assert_eq!(floor.snapshot().await.entry_count(), 0);
}

#[tokio::test]
async fn test_cancel_clears_round_in_all_pools() {
    let (config, floor) = shop_floor();
    let gateway = floor.gateway();
    gateway.offer(&request(&config, 1, "C1", "P1")).await.unwrap();

    let removed = gateway.cancel(1, "P1").await.expect("Cancel should succeed");

    assert_eq!(removed, 6);
    assert_eq!(floor.snapshot().await.entry_count(), 0);
}

#[tokio::test]
async fn test_later_round_is_shifted_past_booked_slot() {
    let (config, floor) = shop_floor();
    let gateway = floor.gateway();
    let offers = gateway.offer(&request(&config, 1, "C1", "P1")).await.unwrap();
    let winner = &offers[0];
    gateway
        .book(&BookingDecision {
            task_id: 1,
            labor_process_id: "P1".to_string(),
            workstation_id: "WS1".to_string(),
            employee_id: winner.employee.as_ref().unwrap().resource_id.clone(),
            robot_id: winner.picking.as_ref().unwrap().resource_id.clone(),
            start_time: winner.start_time,
            time_slot_length: 40.0,
            rejects: vec![Reject {
                labor_process_id: "P1".to_string(),
                workstation_id: "WS2".to_string(),
            }],
        })
        .await
        .unwrap();

    let second = gateway.offer(&request(&config, 2, "C2", "P1")).await.unwrap();
    let ws1 = second.iter().find(|offer| offer.workstation_id() == "WS1").unwrap();

    assert!(ws1.workstation.desired_availability_date >= winner.start_time + 40.0 - 1e-9);
    let calendar = floor.workstations().calendar("WS1").await.unwrap();
    assert_eq!(calendar.len(), 2);
    for pair in calendar.entries().windows(2) {
        assert!(pair[0].internal_end() <= pair[1].internal_start + 1e-9);
    }
}

#[tokio::test]
async fn test_unknown_origin_fails_round() {
    let (config, floor) = shop_floor();
    let mut req = request(&config, 1, "C1", "P1");
    req.origin_id = "nowhere".to_string();

    let result = floor.gateway().offer(&req).await;

    assert!(matches!(result, Err(SchedulingError::PositionUnknown(id)) if id == "nowhere"));
    assert_eq!(floor.snapshot().await.entry_count(), 0);
}

#[tokio::test]
async fn test_inactive_workstation_is_skipped() {
    let (config, floor) = shop_floor();
    floor.workstations().set_active("WS2", false).await.unwrap();

    let offers = floor.gateway().offer(&request(&config, 1, "C1", "P1")).await.unwrap();

    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].workstation_id(), "WS1");
    assert_eq!(floor.gateway().targets().await, vec!["ws1".to_string()]);
}

#[tokio::test]
async fn test_missing_employee_makes_offers_infeasible() {
    let (config, floor) = shop_floor();
    // EMP1 is the only employee trained for P2.
    floor.employees().set_active("EMP1", false).await.unwrap();

    let offers = floor.gateway().offer(&request(&config, 1, "C1", "P2")).await.unwrap();

    assert_eq!(offers.len(), 1);
    assert!(offers[0].employee.is_none());
    assert!(!offers[0].is_feasible());
}

#[tokio::test]
async fn test_resource_in_use_cannot_be_removed() {
    let (config, floor) = shop_floor();
    floor.gateway().offer(&request(&config, 1, "C1", "P1")).await.unwrap();

    let result = floor.workstations().remove("WS1").await;
    assert!(matches!(result, Err(PoolError::ResourceInUse { entries: 1, .. })));

    floor.gateway().cancel(1, "P1").await.unwrap();
    let removed = floor.workstations().remove("WS1").await.expect("Idle workstation should be removable");
    assert_eq!(removed.id, "WS1");
    assert_eq!(floor.gateway().targets().await, vec!["ws2".to_string()]);

    floor.workstations().add(removed.clone()).await.expect("Should add workstation back");
    let duplicate = floor.workstations().add(removed).await;
    assert!(matches!(duplicate, Err(PoolError::DuplicateResource { .. })));
}

#[tokio::test]
async fn test_picking_calendars_use_rotation_gap() {
    let (_, floor) = shop_floor();
    let calendar = floor.picking().calendar("PCK1").await.unwrap();
    assert_eq!(calendar.gap(), 5.0);
    let calendar = floor.employees().calendar("EMP1").await.unwrap();
    assert_eq!(calendar.gap(), 0.0);
}

#[tokio::test]
async fn test_snapshot_round_trip_through_gzip() {
    let (config, floor) = shop_floor();
    floor.gateway().offer(&request(&config, 1, "C1", "P1")).await.unwrap();
    let snapshot = floor.snapshot().await;

    let dir = TempDir::new().expect("Should create temp dir");
    let path = dir.path().join("pools.json.gz");
    snapshot.save(&path).expect("Should save snapshot");
    let loaded = PoolSnapshot::load(&path).expect("Should load snapshot");
    assert_eq!(loaded, snapshot);
    assert_eq!(loaded.entry_count(), 6);

    let (_, fresh) = shop_floor();
    fresh.restore(loaded).await.expect("Should restore snapshot");
    assert_eq!(fresh.snapshot().await.entry_count(), 6);
    assert_eq!(fresh.prune(f64::MAX).await, 6);
}
