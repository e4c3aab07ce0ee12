use crate::task::types::TaskId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds since the Unix epoch.
pub type Timestamp = f64;

const CYCLE_ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CYCLE_ID_LEN: usize = 6;

/// Correlates every tentative reservation created during one auction round.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(String);

impl CycleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random six character identifier made of uppercase letters and digits.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let id = (0..CYCLE_ID_LEN)
            .map(|_| CYCLE_ID_CHARSET[rng.random_range(0..CYCLE_ID_CHARSET.len())] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CycleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One slot in a resource calendar.
///
/// `desired_start` is the availability other resources synchronize against,
/// `internal_start` is when the resource actually starts working. The two
/// differ by the resource's lead time (walking or pickup time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationEntry {
    pub cycle_id: CycleId,
    pub task_id: TaskId,
    pub labor_process_id: String,
    pub target_resource_id: String,
    pub desired_start: Timestamp,
    pub internal_start: Timestamp,
    pub slot_length: f64,
}

impl ReservationEntry {
    pub fn new(
        cycle_id: CycleId,
        task_id: TaskId,
        labor_process_id: impl Into<String>,
        target_resource_id: impl Into<String>,
        desired_start: Timestamp,
        slot_length: f64,
    ) -> Self {
        Self {
            cycle_id,
            task_id,
            labor_process_id: labor_process_id.into(),
            target_resource_id: target_resource_id.into(),
            desired_start,
            internal_start: desired_start,
            slot_length,
        }
    }

    /// Start the internal work `lead_time` seconds before the desired start.
    pub fn with_lead_time(mut self, lead_time: f64) -> Self {
        self.internal_start = self.desired_start - lead_time;
        self
    }

    pub fn lead_time(&self) -> f64 {
        self.desired_start - self.internal_start
    }

    pub fn internal_end(&self) -> Timestamp {
        self.internal_start + self.slot_length
    }

    pub fn matches(&self, task_id: TaskId, labor_process_id: &str, target_resource_id: &str) -> bool {
        self.task_id == task_id
            && self.labor_process_id == labor_process_id
            && self.target_resource_id == target_resource_id
    }

    /// Half-open overlap test, each side padded by `gap` at its end.
    pub fn overlaps(&self, start: Timestamp, length: f64, gap: f64) -> bool {
        start < self.internal_end() + gap && self.internal_start < start + length + gap
    }

    pub(crate) fn shift(&mut self, delta: f64) {
        self.internal_start += delta;
        self.desired_start += delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_cycle_ids_are_six_uppercase_alphanumerics() {
        for _ in 0..50 {
            let id = CycleId::generate();
            assert_eq!(id.as_str().len(), 6);
            assert!(
                id.as_str()
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            );
        }
    }

    #[test]
    fn test_lead_time_moves_internal_start() {
        let entry = ReservationEntry::new("c1".into(), 1, "P1", "WS1", 100.0, 30.0).with_lead_time(12.0);
        assert_eq!(entry.internal_start, 88.0);
        assert_eq!(entry.lead_time(), 12.0);
        assert_eq!(entry.internal_end(), 118.0);
    }

    #[test]
    fn test_overlap_is_half_open() {
        let entry = ReservationEntry::new("c1".into(), 1, "P1", "WS1", 100.0, 50.0);
        assert!(!entry.overlaps(150.0, 10.0, 0.0));
        assert!(entry.overlaps(149.0, 10.0, 0.0));
        assert!(!entry.overlaps(80.0, 20.0, 0.0));
        assert!(entry.overlaps(150.0, 10.0, 5.0));
    }
}
