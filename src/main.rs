use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use cosched_lite::config::{CoschedulingConfig, SimulatorConfig};
use cosched_lite::group::GroupSummary;
use cosched_lite::scheduler::Unit;
use cosched_lite::shutdown::install_shutdown_handler;
use cosched_lite::simulator::{ScheduleReport, Simulator};

#[derive(Parser, Debug)]
#[command(name = "cosched-lite")]
#[command(version)]
#[command(about = "A gang-scheduling coordinator: admit a group of units together or not at all")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Schedule a batch of grouped units against an in-memory cluster
    Simulate(SimulateArgs),
}

// =============================================================================
// Simulate Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct SimulateArgs {
    /// Group to submit, format "name:min[:members[:priority]]".
    /// Members defaults to min, priority to 0. Repeatable.
    /// Example: --group train:3 --group eval:2:1:50
    #[arg(long = "group", required = true)]
    groups: Vec<String>,

    /// Number of ungrouped units to submit alongside the groups
    #[arg(long, default_value = "0")]
    singles: usize,

    /// Node names (comma-separated)
    #[arg(long, default_value = "node-1,node-2,node-3")]
    nodes: String,

    /// Namespace for all submitted units
    #[arg(long, default_value = "default")]
    namespace: String,

    /// Base permit wait in milliseconds (units wait 10x this)
    #[arg(long, default_value = "1000")]
    permit_wait_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct SimulationOutput {
    reports: Vec<ScheduleReport>,
    groups: Vec<GroupSummary>,
}

// =============================================================================
// Helper Functions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupSpec {
    name: String,
    min_members: usize,
    members: usize,
    priority: i32,
}

fn parse_group(spec: &str) -> Result<GroupSpec, String> {
    let parts: Vec<&str> = spec.trim().split(':').collect();
    if parts.len() < 2 || parts.len() > 4 || parts[0].is_empty() {
        return Err(format!(
            "invalid group {:?}, expected name:min[:members[:priority]]",
            spec
        ));
    }
    let min_members: usize = parts[1]
        .parse()
        .map_err(|e| format!("invalid min in {:?}: {}", spec, e))?;
    let members = match parts.get(2) {
        Some(m) => m
            .parse()
            .map_err(|e| format!("invalid members in {:?}: {}", spec, e))?,
        None => min_members,
    };
    let priority = match parts.get(3) {
        Some(p) => p
            .parse()
            .map_err(|e| format!("invalid priority in {:?}: {}", spec, e))?,
        None => 0,
    };
    Ok(GroupSpec {
        name: parts[0].to_string(),
        min_members,
        members,
        priority,
    })
}

fn parse_nodes(nodes: &str) -> Vec<String> {
    nodes
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect()
}

fn print_table(reports: &[ScheduleReport], groups: &[GroupSummary]) {
    println!("{:<28} {:<12} OUTCOME", "UNIT", "GROUP");
    for report in reports {
        let group = if report.group.is_empty() {
            "-"
        } else {
            report.group.as_str()
        };
        println!("{:<28} {:<12} {}", report.unit, group, report.outcome);
    }

    println!();
    println!("{:<28} {:>8} {:>6} {:>8} MARKED", "GROUP", "PRIORITY", "MIN", "AGE_MS");
    for group in groups {
        println!(
            "{:<28} {:>8} {:>6} {:>8} {}",
            group.key.as_str(),
            group.priority,
            group.min_members,
            group.age_ms,
            group.marked_for_deletion
        );
    }
}

async fn run_simulation(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let specs = args
        .groups
        .iter()
        .map(|g| parse_group(g))
        .collect::<Result<Vec<_>, _>>()?;

    let coscheduling =
        CoschedulingConfig::default().with_permit_wait(Duration::from_millis(args.permit_wait_ms));
    let config = SimulatorConfig::new(args.namespace)
        .with_nodes(parse_nodes(&args.nodes))
        .with_coscheduling(coscheduling);

    let simulator = std::sync::Arc::new(Simulator::new(config)?);
    let shutdown = install_shutdown_handler();
    let background = simulator.start(shutdown.clone());

    let namespace = simulator.config().namespace.clone();
    let mut queue = Vec::new();
    for spec in &specs {
        for i in 0..spec.members {
            let unit = Unit::new(&namespace, format!("{}-{}", spec.name, i))
                .with_group(&spec.name, spec.min_members)
                .with_priority(spec.priority);
            queue.push(simulator.submit(unit)?);
        }
    }
    for i in 0..args.singles {
        queue.push(simulator.submit(Unit::new(&namespace, format!("single-{}", i)))?);
    }

    tracing::info!(
        units = queue.len(),
        groups = specs.len(),
        "Starting simulation"
    );

    let reports = tokio::select! {
        reports = simulator.run_batch(queue) => reports,
        _ = shutdown.cancelled() => {
            tracing::warn!("Simulation interrupted");
            Vec::new()
        }
    };
    let groups = simulator
        .coscheduler()
        .registry()
        .snapshot(simulator.coscheduler().now());

    match args.output {
        OutputFormat::Json => {
            let output = SimulationOutput { reports, groups };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => print_table(&reports, &groups),
    }

    shutdown.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Simulate(simulate_args) => run_simulation(simulate_args).await?,
    }

    Ok(())
}
