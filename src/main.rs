use anyhow::{Context, Result};
use clap::Parser;
use cpps_auction::cli::{Args, Commands, ConfigDiscovery, TaskLoader};
use cpps_auction::env::LOG_ENV_VAR;
use cpps_auction::{AgentReport, EventBus, LoggingEventHandler, ReferenceStatistics, SchedulerConfig, Simulation};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let verbose = matches!(args.command, Commands::Run { verbose: true, .. });
    init_logging(verbose);

    match args.command {
        Commands::Run {
            config,
            tasks,
            count,
            realtime,
            watch,
            snapshot,
            statistics,
            verbose,
        } => {
            let mut scheduler_config = ConfigDiscovery::load(config.as_deref())?;
            if realtime {
                scheduler_config.agent.realtime = true;
            }
            run(RunOptions {
                config: scheduler_config,
                tasks,
                count,
                watch,
                snapshot,
                statistics,
                verbose,
            })
            .await
        }
        Commands::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            Ok(())
        }
        Commands::InitConfig { output, force } => {
            let path = output
                .or_else(ConfigDiscovery::user_config_path)
                .context("Could not determine a config path, pass --output")?;
            if ConfigDiscovery::write_default_config(&path, force)? {
                println!("Wrote default configuration to {}", path.display());
            } else {
                println!("{} already exists, use --force to overwrite", path.display());
            }
            Ok(())
        }
        Commands::Validate { config } => {
            let scheduler_config = ConfigDiscovery::load(config.as_deref())?;
            println!(
                "Configuration is valid: {} workstations, {} employees, {} picking robots, {} graph nodes",
                scheduler_config.workstations.resources.len(),
                scheduler_config.employees.resources.len(),
                scheduler_config.picking.resources.len(),
                scheduler_config.priority_graph.nodes.len(),
            );
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "cpps_auction=debug,cpps=debug" } else { "cpps_auction=info,cpps=info" };
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

struct RunOptions {
    config: SchedulerConfig,
    tasks: Option<PathBuf>,
    count: u64,
    watch: bool,
    snapshot: Option<PathBuf>,
    statistics: Option<PathBuf>,
    verbose: bool,
}

async fn run(options: RunOptions) -> Result<()> {
    let tasks = match &options.tasks {
        Some(path) => TaskLoader::load(path, &options.config)?,
        None => TaskLoader::demo_tasks(options.count, &options.config),
    };
    info!("Scheduling {} tasks", tasks.len());

    let events = EventBus::new().with_handler(Arc::new(LoggingEventHandler));
    let simulation = match load_statistics(options.statistics.as_deref(), &options.config)? {
        Some(statistics) => Simulation::with_statistics(options.config, tasks, statistics, events)?,
        None => Simulation::new(options.config, tasks, events)?,
    };

    let reports = if options.watch {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C, stopping after running agents finish");
                let _ = shutdown_tx.send(true);
            }
        });
        simulation.manager.run(shutdown_rx).await?
    } else {
        simulation.manager.run_until_idle().await?
    };

    print_reports(&reports, options.verbose);

    if let Some(path) = &options.snapshot {
        let snapshot = simulation.shop_floor.snapshot().await;
        snapshot.save(path)?;
        println!("Saved {} reservations to {}", snapshot.entry_count(), path.display());
    }

    let statistics = simulation.manager.statistics().await;
    if options.verbose {
        print_statistics(&statistics);
    }
    if let Some(path) = &options.statistics {
        statistics.save_json(path)?;
        info!("Saved reference statistics to {}", path.display());
    }

    Ok(())
}

fn load_statistics(path: Option<&Path>, config: &SchedulerConfig) -> Result<Option<ReferenceStatistics>> {
    let Some(path) = path else {
        return Ok(None);
    };
    if !path.exists() {
        info!("No statistics at {}, starting from configured values", path.display());
        return Ok(None);
    }
    let statistics = ReferenceStatistics::load_json(path)?;
    if statistics.window_size() != config.negotiation.window_size {
        warn!(
            "Statistics window {} differs from configured {}, resizing",
            statistics.window_size(),
            config.negotiation.window_size
        );
        return Ok(Some(statistics.with_window_size(config.negotiation.window_size)));
    }
    Ok(Some(statistics))
}

fn print_reports(reports: &[AgentReport], verbose: bool) {
    let finished = reports.iter().filter(|report| report.is_finished()).count();
    println!("{} of {} tasks finished", finished, reports.len());

    for report in reports {
        match &report.error {
            Some(error) => println!("  task {}: {} ({})", report.task_id, report.state, error),
            None => println!("  task {}: {}", report.task_id, report.state),
        }
        if verbose {
            for commitment in &report.commitments {
                println!(
                    "    {} {} at {} with {} / {}: {:.1} -> {:.1} (review {:.4})",
                    commitment.node_id,
                    commitment.labor_process_id,
                    commitment.workstation_id,
                    commitment.employee_id,
                    commitment.picking_id,
                    commitment.start_time,
                    commitment.completion_time,
                    commitment.review_result,
                );
            }
        }
    }
}

fn print_statistics(statistics: &ReferenceStatistics) {
    println!("Reference statistics (window {}):", statistics.window_size());
    for labor_process in statistics.labor_processes() {
        println!(
            "  {}: duration {:.1}s, review {:.4}",
            labor_process,
            statistics.average(labor_process).unwrap_or_default(),
            statistics.average_review(labor_process).unwrap_or_default(),
        );
    }
}
