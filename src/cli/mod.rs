//! CLI-specific functionality for the scheduler
//!
//! Argument parsing, task file loading and configuration discovery.

pub mod args;
pub mod config;
pub mod tasks;

pub use args::{Args, Commands};
pub use config::ConfigDiscovery;
pub use tasks::TaskLoader;
