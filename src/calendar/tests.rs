use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn entry(cycle: &str, task: u64, proc: &str, start: f64, len: f64) -> ReservationEntry {
    ReservationEntry::new(CycleId::from(cycle), task, proc, "WS1", start, len)
}

fn assert_sorted_without_cross_cycle_overlap(calendar: &ResourceCalendar) {
    let entries = calendar.entries();
    for pair in entries.windows(2) {
        assert!(pair[0].internal_start <= pair[1].internal_start);
    }
    for (i, a) in entries.iter().enumerate() {
        for b in entries.iter().skip(i + 1) {
            if a.cycle_id != b.cycle_id {
                assert!(
                    !a.overlaps(b.internal_start, b.slot_length, calendar.gap()),
                    "{a:?} overlaps {b:?}"
                );
            }
        }
    }
}

#[test]
fn test_clean_reservation_is_returned_unchanged() {
    let mut calendar = ResourceCalendar::new();
    let requested = entry("c1", 1, "P1", 1000.0, 50.0);

    let finalized = calendar.reserve(requested.clone());

    assert_eq!(finalized, requested);
    assert_eq!(calendar.len(), 1);
}

#[test]
fn test_conflicting_reservation_is_shifted_behind_existing_slot() {
    let mut calendar = ResourceCalendar::new();
    calendar.reserve(entry("c1", 1, "P1", 1000.0, 50.0));

    let finalized = calendar.reserve(entry("c2", 2, "P1", 1010.0, 20.0));

    assert!(finalized.internal_start >= 1050.0);
    assert_eq!(finalized.desired_start, finalized.internal_start);
    assert_eq!(calendar.entries()[0].cycle_id.as_str(), "c1");
    assert_eq!(calendar.entries()[1].cycle_id.as_str(), "c2");
}

#[test]
fn test_rotation_gap_is_kept_between_slots() {
    let mut calendar = ResourceCalendar::with_gap(5.0);
    calendar.reserve(entry("c1", 1, "P1", 1000.0, 50.0));

    let finalized = calendar.reserve(entry("c2", 2, "P1", 1052.0, 20.0));

    assert_eq!(finalized.internal_start, 1055.0);
}

#[test]
fn test_shift_cascades_through_consecutive_slots() {
    let mut calendar = ResourceCalendar::new();
    calendar.reserve(entry("c1", 1, "P1", 100.0, 50.0));
    calendar.reserve(entry("c2", 2, "P1", 150.0, 30.0));
    calendar.reserve(entry("c3", 3, "P1", 200.0, 10.0));

    let finalized = calendar.reserve(entry("c4", 4, "P1", 120.0, 25.0));

    assert_eq!(finalized.internal_start, 210.0);
    assert_sorted_without_cross_cycle_overlap(&calendar);
}

#[test]
fn test_gap_between_slots_is_used_when_large_enough() {
    let mut calendar = ResourceCalendar::new();
    calendar.reserve(entry("c1", 1, "P1", 100.0, 50.0));
    calendar.reserve(entry("c2", 2, "P1", 300.0, 50.0));

    let finalized = calendar.reserve(entry("c3", 3, "P1", 140.0, 40.0));

    assert_eq!(finalized.internal_start, 150.0);
    assert_eq!(calendar.entries()[1].cycle_id.as_str(), "c3");
}

#[test]
fn test_lead_time_is_preserved_when_shifting() {
    let mut calendar = ResourceCalendar::new();
    calendar.reserve(entry("c1", 1, "P1", 100.0, 50.0));

    let finalized = calendar.reserve(entry("c2", 2, "P1", 130.0, 20.0).with_lead_time(10.0));

    assert_eq!(finalized.internal_start, 150.0);
    assert_eq!(finalized.desired_start, 160.0);
}

#[test]
fn test_random_reservations_stay_ordered_and_disjoint() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut calendar = ResourceCalendar::with_gap(2.0);

    for i in 0..200u64 {
        let start = rng.random_range(0.0..2000.0);
        let len = rng.random_range(1.0..60.0);
        calendar.reserve(entry(&format!("c{i}"), i, "P1", start, len));
    }

    assert_eq!(calendar.len(), 200);
    assert_sorted_without_cross_cycle_overlap(&calendar);
}

#[test]
fn test_same_cycle_entries_do_not_shift_each_other() {
    let mut calendar = ResourceCalendar::new();
    let first = calendar.reserve(entry("c1", 1, "P1", 100.0, 50.0));
    let second = calendar.reserve(entry("c1", 1, "P2", 110.0, 50.0));

    assert_eq!(first.internal_start, 100.0);
    assert_eq!(second.internal_start, 110.0);
}

#[test]
fn test_reserve_then_reject_restores_previous_state() {
    let mut calendar = ResourceCalendar::new();
    calendar.reserve(entry("c1", 1, "P1", 100.0, 50.0));
    calendar.reserve(entry("c2", 2, "P1", 300.0, 20.0));
    let before = calendar.clone();

    calendar.reserve(entry("c3", 3, "P4", 120.0, 10.0));
    let removed = calendar.reject(3, "P4", "WS1");

    assert_eq!(removed, 1);
    assert_eq!(calendar, before);
}

#[test]
fn test_reject_only_removes_matching_target() {
    let mut calendar = ResourceCalendar::new();
    calendar.reserve(ReservationEntry::new("c1".into(), 1, "P1", "WS1", 100.0, 10.0));
    calendar.reserve(ReservationEntry::new("c1".into(), 1, "P1", "WS2", 100.0, 10.0));

    assert_eq!(calendar.reject(1, "P1", "WS2"), 1);
    assert_eq!(calendar.entries()[0].target_resource_id, "WS1");
    assert_eq!(calendar.reject(1, "P1", "WS2"), 0);
}

#[test]
fn test_reject_all_ignores_target() {
    let mut calendar = ResourceCalendar::new();
    calendar.reserve(ReservationEntry::new("c1".into(), 1, "P1", "WS1", 100.0, 10.0));
    calendar.reserve(ReservationEntry::new("c1".into(), 1, "P1", "WS2", 100.0, 10.0));
    calendar.reserve(ReservationEntry::new("c1".into(), 1, "P2", "WS2", 100.0, 10.0));

    assert_eq!(calendar.reject_all(1, "P1"), 2);
    assert_eq!(calendar.len(), 1);
}

#[test]
fn test_book_without_matching_entry_is_a_no_op() {
    let mut calendar = ResourceCalendar::new();
    calendar.reserve(entry("c1", 1, "P1", 100.0, 50.0));
    let before = calendar.clone();

    assert_eq!(calendar.book(2, "P1", "WS1", 500.0, 10.0), None);
    assert_eq!(calendar.book(1, "P1", "WS9", 500.0, 10.0), None);
    assert_eq!(calendar, before);
}

#[test]
fn test_book_on_empty_calendar_returns_none() {
    let mut calendar = ResourceCalendar::new();
    assert_eq!(calendar.book(1, "P1", "WS1", 10.0, 1.0), None);
    assert!(calendar.lookup(1, "P1").is_none());
}

#[test]
fn test_book_overwrites_times_and_keeps_order() {
    let mut calendar = ResourceCalendar::new();
    calendar.reserve(entry("c1", 1, "P1", 100.0, 50.0).with_lead_time(10.0));
    calendar.reserve(entry("c2", 2, "P1", 300.0, 20.0));

    let confirmed = calendar.book(1, "P1", "WS1", 400.0, 30.0);

    assert_eq!(confirmed, Some(400.0));
    let booked = calendar.lookup(1, "P1").unwrap();
    assert_eq!(booked.desired_start, 400.0);
    assert_eq!(booked.internal_start, 390.0);
    assert_eq!(booked.slot_length, 30.0);
    assert_eq!(calendar.entries()[1].task_id, 1);
}

#[test]
fn test_prune_drops_finished_slots() {
    let mut calendar = ResourceCalendar::new();
    calendar.reserve(entry("c1", 1, "P1", 100.0, 50.0));
    calendar.reserve(entry("c2", 2, "P1", 300.0, 20.0));

    assert_eq!(calendar.prune(200.0), 1);
    assert!(calendar.is_busy(305.0, 1.0));
    assert!(!calendar.is_busy(120.0, 1.0));
}
