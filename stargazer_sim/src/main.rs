//! Stargazer DST Simulator CLI
//!
//! Runs the fault-injection scenarios against a full in-process cluster.

use clap::Parser;
use stargazer_sim::scenarios::ScenarioId;
use stargazer_sim::{FrameRecorder, ScenarioResult, ScenarioRunner, SimConfig, SimExport};
use stargazer_core::StepObserver;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Run a scenario with frame-by-frame export for visualization.
fn run_with_export(runner: &ScenarioRunner, scenario: ScenarioId, seed: u64, every: u64, export_path: &str) -> ScenarioResult {
    let recorder = Arc::new(FrameRecorder::new(SimConfig::default().constants.timestep, every));
    let observer: Arc<dyn StepObserver> = recorder.clone();
    let result = runner.run_observed(scenario, Some(observer));

    let mut export = SimExport::new(scenario.name(), seed);
    for frame in recorder.take_frames() {
        export.add_frame(frame);
    }
    export.finalize(result.passed, result.degraded_events);

    if let Err(e) = export.write_to_file(export_path) {
        error!("Failed to write export: {:?}", e);
    } else {
        info!("Exported {} frames to {}", export.frames.len(), export_path);
    }
    result
}

/// Stargazer Deterministic Simulation Testing CLI
#[derive(Parser, Debug)]
#[command(name = "stargazer-sim")]
#[command(about = "Run deterministic simulation tests for Stargazer", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of compute nodes
    #[arg(short, long, default_value = "3")]
    nodes: usize,

    /// Number of bodies
    #[arg(short, long, default_value = "24")]
    bodies: usize,

    /// Scenario to run (baseline, node_timeout, protocol_violation, churn, rejoin, total_outage, cancel, token_expiry, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulated seconds per run
    #[arg(short, long, default_value = "0.1")]
    duration: f64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export body frames to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Keep one exported frame per this many steps
    #[arg(long, default_value = "1")]
    export_every: u64,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if !args.json {
        info!("Stargazer DST Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!(
                "Available scenarios: {}, all",
                ScenarioId::all().iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
            );
            std::process::exit(1);
        })]
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let runner_for = |seed: u64| {
        ScenarioRunner::new(seed, args.nodes)
            .with_bodies(args.bodies)
            .with_duration(args.duration)
    };

    // Handle --export mode for visualization
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }

        info!("Running with export to: {}", export_path);
        let result = run_with_export(&runner_for(base_seed), scenarios[0], base_seed, args.export_every, export_path);

        if result.passed {
            info!("✓ {} (seed={}) PASSED - exported to {}", scenarios[0].name(), base_seed, export_path);
        } else {
            error!(
                "✗ {} FAILED: {}",
                scenarios[0].name(),
                result.failure_reason.as_deref().unwrap_or("unknown")
            );
            std::process::exit(1);
        }
        return;
    }

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    // Run simulations
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = runner_for(seed);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!(
                        "✓ {} (seed={}) PASSED  steps={}/{} degraded={} t={:.2}s",
                        scenario.name(),
                        seed,
                        result.steps_completed,
                        result.steps_scheduled,
                        result.degraded_events,
                        result.final_time_secs
                    );
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }

            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "steps_scheduled": r.steps_scheduled,
                    "steps_completed": r.steps_completed,
                    "degraded_events": r.degraded_events,
                    "time_secs": r.final_time_secs,
                    "network_calls": r.metrics.calls,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            // List failed seeds
            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
