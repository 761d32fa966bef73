//! vtime DST Simulator CLI
//!
//! Run deterministic simulation tests of the virtual-time scheduler.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vtime_sim::scenarios::ScenarioId;
use vtime_sim::{ScenarioResult, ScenarioRunner, SimConfig, SimError, TraceExport};

/// vtime Deterministic Simulation Testing CLI
#[derive(Parser, Debug)]
#[command(name = "vtime-sim")]
#[command(about = "Run deterministic simulation tests for the vtime scheduler", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of applications sharing the clock
    #[arg(short, long)]
    apps: Option<usize>,

    /// Scenario to run (dispatch_order, shared_idle, rearm_storm, cancel_race, fleet, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Crank budget per run
    #[arg(long)]
    max_steps: Option<u64>,

    /// JSON file with a base SimConfig; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the full trace of a single run to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

fn base_config(args: &Args) -> Result<SimConfig, SimError> {
    let mut config = match &args.config {
        Some(path) => SimConfig::from_json_file(path)?,
        None => SimConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(apps) = args.apps {
        config.num_apps = apps;
    }
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }
    if config.seed == 0 {
        let elapsed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok();
        config.seed = seed_from_elapsed(elapsed);
    }
    Ok(config)
}

/// Seed for `--seed 0`: wall-clock nanoseconds, or 42 if they do not fit.
fn seed_from_elapsed(elapsed: Option<Duration>) -> u64 {
    elapsed
        .and_then(|d| u64::try_from(d.as_nanos()).ok())
        .unwrap_or(42)
}

fn exit_with(err: SimError) -> ! {
    eprintln!("Error: {}", err);
    std::process::exit(2);
}

fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides the default level
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }

    let base = base_config(&args).unwrap_or_else(|e| exit_with(e));

    if !args.json {
        info!("vtime DST Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                std::process::exit(1);
            }
        }
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 || args.seeds > 1 {
            eprintln!("Error: --export only supports a single scenario and seed");
            std::process::exit(1);
        }

        let scenario = scenarios[0];
        let runner = ScenarioRunner::from_config(base);
        let run = runner.run_recorded(scenario);
        let export = TraceExport::from_run(&run, scenario.configure(runner.config()));
        if let Err(e) = export.write_to_file(export_path) {
            exit_with(e);
        }
        info!(
            "Exported {} observations, {} steps to {}",
            export.observations.len(),
            export.steps.len(),
            export_path.display()
        );

        if !run.result.passed {
            error!(
                "✗ {} FAILED: {}",
                scenario.name(),
                run.result.failure_reason.as_deref().unwrap_or("unknown")
            );
            std::process::exit(1);
        }
        return;
    }

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let config = SimConfig {
            seed: base.seed.wrapping_add(seed_offset as u64),
            ..base.clone()
        };
        let runner = ScenarioRunner::from_config(config);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), result.seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        result.seed,
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
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "steps": r.total_steps,
                    "final_time_ns": r.final_time.as_nanos(),
                    "tasks_run": r.metrics.tasks_run,
                    "timers_fired": r.metrics.timers_fired,
                    "waits_cancelled": r.metrics.waits_cancelled,
                    "trace_digest": format!("{:016x}", r.trace_digest),
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => exit_with(e.into()),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_from_elapsed() {
        assert_eq!(seed_from_elapsed(Some(Duration::from_nanos(7))), 7);
        assert_eq!(seed_from_elapsed(None), 42);
        // Out of u64 nanoseconds range falls back instead of wrapping
        assert_eq!(seed_from_elapsed(Some(Duration::MAX)), 42);
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from(["vtime-sim", "--seed", "9", "--apps", "2", "--max-steps", "50"]);
        let config = base_config(&args).unwrap();
        assert_eq!((config.seed, config.num_apps, config.max_steps), (9, 2, 50));
    }
}
