//! Task file loading
//!
//! A task file is a JSON array of tasks. Only `task_id` and
//! `product_variant` are required; everything else defaults to an open task:
//!
//! ```json
//! [{ "task_id": 1, "product_variant": "standard" }]
//! ```

use crate::config::SchedulerConfig;
use crate::task::types::{Task, TaskId};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("File '{path}' not found")]
    NotFound { path: PathBuf },

    #[error("IO error reading '{path}': {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Task parsing error in '{path}': {reason}")]
    ParseError { path: PathBuf, reason: String },
}

/// Loads the tasks handed to the in-memory task store.
pub struct TaskLoader;

impl TaskLoader {
    pub fn load<P: AsRef<Path>>(path: P, config: &SchedulerConfig) -> Result<Vec<Task>, FileError> {
        let path = path.as_ref().to_path_buf();
        debug!("Loading tasks from: {:?}", path);

        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FileError::NotFound { path: path.clone() },
            _ => FileError::IoError {
                path: path.clone(),
                source: e,
            },
        })?;
        let tasks = Self::parse(&content, &path, config)?;
        debug!("Parsed {} tasks from {:?}", tasks.len(), path);
        Ok(tasks)
    }

    fn parse(content: &str, path: &Path, config: &SchedulerConfig) -> Result<Vec<Task>, FileError> {
        let parse_error = |reason: String| FileError::ParseError {
            path: path.to_path_buf(),
            reason,
        };
        let tasks: Vec<Task> = serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))?;

        let mut ids = HashSet::new();
        for task in &tasks {
            if !ids.insert(task.task_id) {
                return Err(parse_error(format!("duplicate task id {}", task.task_id)));
            }
            if !config.product_variants.contains_key(&task.product_variant) {
                return Err(parse_error(format!(
                    "task {} uses unknown product variant '{}'",
                    task.task_id, task.product_variant
                )));
            }
        }
        Ok(tasks)
    }

    /// Open tasks `1..=count` of the first configured product variant.
    pub fn demo_tasks(count: u64, config: &SchedulerConfig) -> Vec<Task> {
        let variant = config
            .product_variants
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| "standard".to_string());
        (1..=count as TaskId).map(|id| Task::new(id, variant.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::types::TaskState;
    use tempfile::TempDir;

    #[test]
    fn test_minimal_task_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tasks.json");
        fs::write(
            &path,
            r#"[
                {"task_id": 2, "product_variant": "standard"},
                {"task_id": 5, "product_variant": "standard", "state": "restart"}
            ]"#,
        )
        .unwrap();

        let tasks = TaskLoader::load(&path, &SchedulerConfig::default()).expect("Should load tasks");

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].state, TaskState::Open);
        assert_eq!(tasks[1].state, TaskState::Restart);
        assert!(tasks.iter().all(|task| task.finished_nodes.is_empty()));
    }

    #[test]
    fn test_unknown_variant_and_duplicates_are_rejected() {
        let config = SchedulerConfig::default();
        let path = Path::new("tasks.json");

        let unknown = TaskLoader::parse(r#"[{"task_id": 1, "product_variant": "deluxe"}]"#, path, &config);
        assert!(matches!(unknown, Err(FileError::ParseError { reason, .. }) if reason.contains("deluxe")));

        let duplicate = TaskLoader::parse(
            r#"[{"task_id": 1, "product_variant": "standard"}, {"task_id": 1, "product_variant": "standard"}]"#,
            path,
            &config,
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = TaskLoader::load("/nonexistent/tasks.json", &SchedulerConfig::default());
        assert!(matches!(result, Err(FileError::NotFound { .. })));
    }

    #[test]
    fn test_demo_tasks() {
        let tasks = TaskLoader::demo_tasks(3, &SchedulerConfig::default());
        assert_eq!(tasks.iter().map(|t| t.task_id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(tasks.iter().all(|t| t.product_variant == "standard"));
    }
}
