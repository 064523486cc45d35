//! Drone Dispatch CLI
//!
//! Entry point for the `drone-dispatch` command-line tool.

use clap::{Parser, Subcommand};
use drone_dispatch::config::{default_host_config_path, ConfigError};
use drone_dispatch::sim::{DeliveryFaults, FlatEarth, SimAircraft, SimBroker};
use drone_dispatch::{
    ClaimState, Collaborators, Coordinates, DispatchConfig, DroneNode, EffectiveConfig,
    Geospatial, MissionControl, PayloadPlanner, StepPlanner, Task, TaskFeed, TaskTable,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drone-dispatch")]
#[command(about = "First-come-first-served task dispatch for a drone fleet", version)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Path to a config file (TOML, or JSON with a .json extension)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fly a simulated fleet against a simulated task feed
    Simulate {
        /// Number of drones
        #[arg(long, default_value_t = 2)]
        drones: usize,

        /// Number of tasks to advertise
        #[arg(long, default_value_t = 3)]
        tasks: usize,

        /// Hover time of the sample mission, in seconds
        #[arg(long)]
        hover_secs: Option<f64>,

        /// Deliver every table snapshot twice, followed by a stale one
        #[arg(long)]
        faulty_feed: bool,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,

        /// Print the final claim table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the steps a task payload plans to
    Plan {
        /// Task object as JSON, e.g. '{"id": "t1", "steps": [{"kind": "land"}]}'
        payload: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration with provenance
    Config,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Simulate {
            drones,
            tasks,
            hover_secs,
            faulty_feed,
            timeout_secs,
            json,
        } => {
            let overrides = hover_secs.map(|s| serde_json::json!({"mission": {"hover_seconds": s}}));
            let settings = settings_or_exit(cli.config, overrides);
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("Error starting runtime: {}", e);
                    process::exit(1);
                }
            };
            let faults = DeliveryFaults {
                duplicate_tables: faulty_feed,
                replay_stale_tables: faulty_feed,
            };
            let table = runtime.block_on(run_simulation(
                settings,
                drones,
                tasks,
                faults,
                Duration::from_secs(timeout_secs),
            ));
            report(&table, json);
            if !all_finished(&table) {
                process::exit(2);
            }
        }
        Commands::Plan { payload, json } => {
            let settings = settings_or_exit(cli.config, None);
            run_plan(&settings, &payload, json);
        }
        Commands::Config => {
            let effective = effective_or_exit(cli.config, None);
            match effective.to_json() {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error serializing config: {}", e);
                    process::exit(1);
                }
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn build_effective(
    config: Option<PathBuf>,
    overrides: Option<serde_json::Value>,
) -> Result<EffectiveConfig, ConfigError> {
    let host = default_host_config_path();
    EffectiveConfig::build(host.as_deref(), config.as_deref(), overrides)
}

fn effective_or_exit(config: Option<PathBuf>, overrides: Option<serde_json::Value>) -> EffectiveConfig {
    match build_effective(config, overrides) {
        Ok(effective) => effective,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    }
}

fn settings_or_exit(config: Option<PathBuf>, overrides: Option<serde_json::Value>) -> DispatchConfig {
    match effective_or_exit(config, overrides).settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    }
}

fn run_plan(settings: &DispatchConfig, payload: &str, json: bool) {
    let tasks = match Task::parse_list(&format!("[{}]", payload)) {
        Ok(tasks) => tasks,
        Err(e) => {
            eprintln!("Error parsing task: {}", e);
            process::exit(1);
        }
    };
    let planner = PayloadPlanner::new(settings.mission.clone());

    for task in &tasks {
        let steps = planner.plan(task);
        if json {
            match serde_json::to_string_pretty(&steps) {
                Ok(text) => println!("{}", text),
                Err(e) => {
                    eprintln!("Error serializing steps: {}", e);
                    process::exit(1);
                }
            }
        } else {
            println!("Task {}:", task.id);
            for (i, step) in steps.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
        }
    }
}

/// Start `drones` nodes, advertise `tasks` tasks and wait until every task
/// is finished or `timeout` passes. Returns the arbiter's final table.
async fn run_simulation(
    settings: DispatchConfig,
    drones: usize,
    tasks: usize,
    faults: DeliveryFaults,
    timeout: Duration,
) -> TaskTable {
    let broker = Arc::new(SimBroker::new(faults));
    let home = Coordinates::new(46.4983, 11.3548);

    let mut handles = Vec::new();
    for i in 0..drones {
        let config = DispatchConfig {
            drone_id: Some(format!("drone{}", i + 1)),
            ..settings.clone()
        };
        // Spread the fleet out along a line, 20 m apart.
        let start = FlatEarth.offset(home, 0.0, 20.0 * i as f64);
        let aircraft = Arc::new(SimAircraft::new(start));
        let node = DroneNode::assemble(
            &config,
            Collaborators {
                aircraft: aircraft.clone(),
                mission_control: Some(aircraft as Arc<dyn MissionControl>),
                geo: Arc::new(FlatEarth),
                feed: broker.clone(),
                planner: None,
                log: None,
            },
        );
        handles.push(node.start());
    }

    let mut tables = broker.subscribe_tables();
    let task_list: Vec<Task> = (1..=tasks).map(|i| Task::new(format!("task-{}", i))).collect();
    if let Err(e) = broker.advertise(&task_list) {
        eprintln!("Error advertising tasks: {}", e);
        return broker.table();
    }

    let wait = async {
        loop {
            if all_finished(&broker.table()) {
                break;
            }
            if tables.recv().await.is_err() {
                break;
            }
        }
    };
    if tokio::time::timeout(timeout, wait).await.is_err() {
        tracing::warn!(timeout_secs = timeout.as_secs(), "simulation timed out");
    }

    for handle in handles {
        handle.shutdown().await;
    }
    broker.table()
}

fn all_finished(table: &TaskTable) -> bool {
    !table.is_empty() && table.iter().all(|(_, claim)| claim.state == ClaimState::Finished)
}

fn report(table: &TaskTable, json: bool) {
    if json {
        match serde_json::to_string_pretty(table) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error serializing table: {}", e),
        }
        return;
    }

    println!("Final table (version {}):", table.version);
    for (task_id, claim) in table.iter() {
        println!(
            "  {:<10} {:<10} {}",
            task_id,
            format!("{:?}", claim.state).to_lowercase(),
            claim.drone_id.as_deref().unwrap_or("-")
        );
    }
}
