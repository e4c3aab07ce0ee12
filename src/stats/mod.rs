//! Sliding-window reference statistics per labor process.
//!
//! Two windows are kept for every labor process: committed throughput
//! durations and committed valuation results. The duration averages drive the
//! adaptive time weight and the planned task end time. The review averages
//! turn raw valuations into review results that compare across labor
//! processes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

/// Fixed-length FIFO windows of durations and valuation reviews.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceStatistics {
    window_size: usize,
    durations: BTreeMap<String, VecDeque<f64>>,
    reviews: BTreeMap<String, VecDeque<f64>>,
}

impl ReferenceStatistics {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            durations: BTreeMap::new(),
            reviews: BTreeMap::new(),
        }
    }

    /// Windows pre-filled with the configured initial values.
    pub fn with_initial_values(
        window_size: usize,
        durations: &BTreeMap<String, f64>,
        reviews: &BTreeMap<String, f64>,
    ) -> Self {
        let mut stats = Self::new(window_size);
        for (labor_process, value) in durations {
            stats
                .durations
                .insert(labor_process.clone(), VecDeque::from(vec![*value; stats.window_size]));
        }
        for (labor_process, value) in reviews {
            stats
                .reviews
                .insert(labor_process.clone(), VecDeque::from(vec![*value; stats.window_size]));
        }
        stats
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn record_duration(&mut self, labor_process: &str, value: f64) {
        push(&mut self.durations, self.window_size, labor_process, value);
    }

    pub fn record_review(&mut self, labor_process: &str, value: f64) {
        push(&mut self.reviews, self.window_size, labor_process, value);
    }

    /// Mean committed duration of the labor process.
    pub fn average(&self, labor_process: &str) -> Option<f64> {
        mean(self.durations.get(labor_process)?)
    }

    pub fn average_review(&self, labor_process: &str) -> Option<f64> {
        mean(self.reviews.get(labor_process)?)
    }

    /// Valuation relative to the historical average of its labor process.
    /// Labor processes without history keep their raw valuation.
    pub fn review_result(&self, labor_process: &str, valuation: f64) -> f64 {
        match self.average_review(labor_process) {
            Some(average) if average > 0.0 => valuation / average,
            _ => valuation,
        }
    }

    /// Sum of the average durations of the given labor processes.
    pub fn expected_duration<'a>(&self, labor_processes: impl IntoIterator<Item = &'a str>) -> f64 {
        labor_processes
            .into_iter()
            .filter_map(|labor_process| self.average(labor_process))
            .sum()
    }

    /// Sum of all average durations.
    pub fn total_expected_duration(&self) -> f64 {
        self.durations.values().filter_map(mean).sum()
    }

    pub fn labor_processes(&self) -> impl Iterator<Item = &str> {
        self.durations.keys().map(String::as_str)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load saved windows. A stored window size below one is raised to one.
    pub fn load_json(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let stats: Self = serde_json::from_str(&content)?;
        let window_size = stats.window_size;
        Ok(stats.with_window_size(window_size))
    }

    /// Change the window length, keeping the newest values of every window.
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size.max(1);
        for window in self.durations.values_mut().chain(self.reviews.values_mut()) {
            while window.len() > self.window_size {
                window.pop_front();
            }
        }
        self
    }
}

fn push(windows: &mut BTreeMap<String, VecDeque<f64>>, size: usize, labor_process: &str, value: f64) {
    let window = windows.entry(labor_process.to_string()).or_default();
    window.push_back((value * 1000.0).round() / 1000.0);
    while window.len() > size {
        window.pop_front();
    }
}

fn mean(window: &VecDeque<f64>) -> Option<f64> {
    if window.is_empty() {
        return None;
    }
    Some(window.iter().sum::<f64>() / window.len() as f64)
}
