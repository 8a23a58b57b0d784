//! Simulacrum CLI
//!
//! Boots an orchestrator, creates one simulation, applies scenarios and
//! keeps the services up until Ctrl-C.

use anyhow::{bail, Context};
use clap::Parser;
use simulacrum_core::{
    Orchestrator, OrchestratorConfig, ScenarioStatus, ServiceOptions, SimulationOptions,
    SimulationStatus, Store,
};
use simulacrum_sim::{builtin, ScenarioId};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "simulacrum")]
#[command(about = "Run short-lived mock services with deterministic fake data")]
struct Args {
    /// Seed for simulation and record ids (random if omitted)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Content seed for scenario data
    #[arg(long, default_value = "2")]
    scenario_seed: u64,

    /// Simulator to run (echo, person)
    #[arg(short = 'S', long, default_value = "echo")]
    simulator: String,

    /// Fixed port for the simulator's own service
    #[arg(short, long)]
    port: Option<u16>,

    /// Simulator options as JSON
    #[arg(short, long, default_value = "{}")]
    options: String,

    /// Scenario to apply once the simulation runs
    #[arg(long)]
    scenario: Option<String>,

    /// Number of times to apply the scenario
    #[arg(short, long, default_value = "1")]
    count: usize,

    /// JSON output instead of log lines
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let simulators = builtin();
    if simulators.get(&args.simulator).is_none() {
        bail!(
            "unknown simulator `{}` (available: {})",
            args.simulator,
            simulators.names().join(", ")
        );
    }

    let scenario = args
        .scenario
        .as_deref()
        .map(|name| name.parse::<ScenarioId>())
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let mut config = OrchestratorConfig::default().with_scenario_seed(args.scenario_seed);
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    let options = simulation_options(&args)?;
    let orchestrator = Orchestrator::new(Store::new(), simulators, config);

    let state = orchestrator
        .create_simulation(&args.simulator, options)
        .await
        .context("failed to create simulation")?;
    if state.status != SimulationStatus::Running {
        let reason = state
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| state.status.to_string());
        bail!("simulation {} did not start: {}", state.id, reason);
    }

    let mut results = Vec::new();
    if let Some(scenario) = scenario {
        for _ in 0..args.count {
            let result = orchestrator
                .apply_scenario(&state.id, scenario.name(), serde_json::Value::Null)
                .await?;
            if result.status == ScenarioStatus::Failed {
                error!(scenario = scenario.name(), error = ?result.error, "scenario failed");
            }
            results.push(result);
        }
    }

    if args.json {
        let summary = serde_json::json!({
            "id": state.id,
            "simulator": state.simulator,
            "services": state.services,
            "scenarios": results,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!(id = %state.id, simulator = %state.simulator, "simulation running");
        for service in &state.services {
            info!("  {} -> {}", service.name, service.url);
        }
        for result in &results {
            if let Some(data) = &result.data {
                info!("  {}", data);
            }
        }
        info!("Press Ctrl-C to stop");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("shutting down");
    orchestrator.shutdown().await;
    Ok(())
}

fn simulation_options(args: &Args) -> anyhow::Result<SimulationOptions> {
    let options: serde_json::Value =
        serde_json::from_str(&args.options).context("--options must be valid JSON")?;
    let mut simulation = SimulationOptions::new(options);

    // The built-in simulators declare a service named after themselves.
    if let Some(port) = args.port {
        simulation = simulation.with_service(args.simulator.clone(), ServiceOptions::with_port(port));
    }
    Ok(simulation)
}
