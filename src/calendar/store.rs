use super::entry::{ReservationEntry, Timestamp};
use crate::task::types::TaskId;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ordered time-slot store for a single resource.
///
/// Entries are kept sorted by `internal_start`. Entries from different
/// auction cycles never overlap (including the rotation gap); entries that
/// share a cycle are placeholders of the same round and ignore each other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceCalendar {
    /// Idle time that must follow every slot (carrier rotation on transport units).
    #[serde(default)]
    gap: f64,
    entries: Vec<ReservationEntry>,
}

impl ResourceCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gap(gap: f64) -> Self {
        Self {
            gap: gap.max(0.0),
            entries: Vec::new(),
        }
    }

    pub fn gap(&self) -> f64 {
        self.gap
    }

    pub fn entries(&self) -> &[ReservationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a tentative slot, pushing it past every conflicting slot of
    /// another cycle. Always succeeds and returns the finalized entry.
    pub fn reserve(&mut self, mut entry: ReservationEntry) -> ReservationEntry {
        let requested = entry.internal_start;

        loop {
            let conflict_end = self
                .entries
                .iter()
                .filter(|existing| existing.cycle_id != entry.cycle_id)
                .find(|existing| existing.overlaps(entry.internal_start, entry.slot_length, self.gap))
                .map(|existing| existing.internal_end() + self.gap);

            match conflict_end {
                Some(end) if end > entry.internal_start => entry.shift(end - entry.internal_start),
                _ => break,
            }
        }

        if entry.internal_start != requested {
            debug!(
                "Shifted reservation of task {} ({}) by {:.2}s",
                entry.task_id,
                entry.labor_process_id,
                entry.internal_start - requested
            );
        }

        self.insert_sorted(entry.clone());
        entry
    }

    /// Remove every entry matching the key. Survivors keep their times.
    pub fn reject(&mut self, task_id: TaskId, labor_process_id: &str, target_resource_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !entry.matches(task_id, labor_process_id, target_resource_id));
        before - self.entries.len()
    }

    /// Remove every entry of a task's labor process regardless of target.
    pub fn reject_all(&mut self, task_id: TaskId, labor_process_id: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !(entry.task_id == task_id && entry.labor_process_id == labor_process_id));
        before - self.entries.len()
    }

    /// Overwrite a tentative entry with the negotiated start and length.
    ///
    /// The entry keeps its lead time. Returns the confirmed start, or `None`
    /// without touching the calendar when nothing matches.
    pub fn book(
        &mut self,
        task_id: TaskId,
        labor_process_id: &str,
        target_resource_id: &str,
        new_start: Timestamp,
        new_length: f64,
    ) -> Option<Timestamp> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.matches(task_id, labor_process_id, target_resource_id))?;

        let mut entry = self.entries.remove(index);
        let lead_time = entry.lead_time();
        entry.desired_start = new_start;
        entry.internal_start = new_start - lead_time;
        entry.slot_length = new_length;
        self.insert_sorted(entry);
        Some(new_start)
    }

    pub fn lookup(&self, task_id: TaskId, labor_process_id: &str) -> Option<&ReservationEntry> {
        self.entries
            .iter()
            .find(|entry| entry.task_id == task_id && entry.labor_process_id == labor_process_id)
    }

    /// True when some slot overlaps the given window.
    pub fn is_busy(&self, start: Timestamp, length: f64) -> bool {
        self.entries.iter().any(|entry| entry.overlaps(start, length, 0.0))
    }

    /// Drop entries whose slot ended before `before`.
    pub fn prune(&mut self, before: Timestamp) -> usize {
        let count = self.entries.len();
        self.entries.retain(|entry| entry.internal_end() >= before);
        count - self.entries.len()
    }

    fn insert_sorted(&mut self, entry: ReservationEntry) {
        let index = self
            .entries
            .partition_point(|existing| existing.internal_start <= entry.internal_start);
        self.entries.insert(index, entry);
    }
}
