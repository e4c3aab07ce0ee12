//! Command line argument parsing
//!
//! Subcommands:
//! - `run`: Schedule the open tasks of a task file on the simulated shop floor
//! - `show-config`: Show configuration discovery information
//! - `init-config`: Write the default configuration to the user config path
//! - `validate`: Load and validate a configuration file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "cpps")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Auction-based scheduler for cyber-physical production systems")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run task agents until every claimable task is finished or failed
    Run {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// JSON file with the tasks to schedule
        #[arg(short = 't', long = "tasks")]
        tasks: Option<PathBuf>,
        /// Number of demo tasks when no task file is given
        #[arg(short = 'n', long = "count", default_value_t = 2)]
        count: u64,
        /// Wait for negotiated start times in wall-clock time
        #[arg(long = "realtime")]
        realtime: bool,
        /// Keep polling the task store until Ctrl-C instead of stopping when idle
        #[arg(long = "watch")]
        watch: bool,
        /// Write the final resource calendars to this file (.json or .json.gz)
        #[arg(long = "snapshot", value_name = "FILE")]
        snapshot: Option<PathBuf>,
        /// Load and persist reference statistics at this path
        #[arg(long = "statistics", value_name = "FILE")]
        statistics: Option<PathBuf>,
        /// Enable verbose output
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
    /// Show configuration discovery information
    ShowConfig,
    /// Write the default configuration file
    InitConfig {
        /// Target path, defaults to the user config path
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long = "force")]
        force: bool,
    },
    /// Validate a configuration file
    Validate {
        /// Configuration file path, defaults to the discovered one
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
}
