mod anneal;
mod config;
mod driver;
mod error;
mod eval;
mod pareto;
mod stats;
mod store;
mod surrogate;


use anneal::AnnealingSelector;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use driver::{CandidateSelector, Driver, RunReport};
use eval::{Evaluator, FakeEvaluator, SolverGateway};
use serde::Serialize;
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use store::RecordStore;
use surrogate::SurrogateSelector;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "slipstream")]
#[command(version)]
#[command(about = "Resumable design-loop driver for aerodynamic shape optimization")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Path to TOML configuration file (built-in defaults when absent)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Experiment log path (variant-specific default when absent)
    #[arg(short, long, global = true)]
    out: Option<String>,

    /// Random seed for reproducible runs
    #[arg(long, global = true, default_value_t = 42)]
    seed: u64,

    /// Use the deterministic fake evaluation instead of the solver pipeline
    #[arg(long, global = true)]
    fake: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the annealing experiment toward target drag/lift
    Anneal {
        /// Evaluations to run this invocation [default: 1]
        iters: Option<String>,
        /// Target drag [default: from config]
        #[arg(allow_hyphen_values = true)]
        target_drag: Option<String>,
        /// Target lift [default: from config]
        #[arg(allow_hyphen_values = true)]
        target_lift: Option<String>,
        /// Proposal step size [default: from config]
        step_size: Option<String>,
        /// Initial temperature [default: from config]
        temperature: Option<String>,
        /// Write a JSON run summary next to the log
        #[arg(long)]
        json: bool,
    },
    /// Drive the surrogate experiment toward the drag/lift trade-off front
    Surrogate {
        /// Optimization batches to run this invocation [default: 1]
        batches: Option<String>,
        /// Warm-start sample size [default: from config]
        initial_samples: Option<String>,
        /// Write a JSON run summary next to the log
        #[arg(long)]
        json: bool,
    },
    /// Export the Pareto front of a recorded experiment log
    Pareto {
        /// Input log [default: ./data/surrogate_log.csv]
        input: Option<String>,
        /// Output CSV [default: ./data/pareto.csv]
        output: Option<String>,
    },
    /// Windowed average of a solver force history file
    Average {
        /// First time step [default: 0]
        start: Option<String>,
        /// Last time step, inclusive [default: 1000]
        end: Option<String>,
        /// Force history file [default: ./runtime/postProcessing/forces/0/forces.dat]
        file: Option<String>,
    },
    /// Validate a configuration file
    Validate,
}

/// Parse a positional argument, falling back to the documented default on a
/// missing or unparseable value. Fallbacks are reported, never fatal.
fn parse_or<T: FromStr + Display + Copy>(value: &Option<String>, name: &str, default: T) -> T {
    match value {
        None => default,
        Some(s) => match s.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                eprintln!(
                    "[slipstream] invalid {} {:?}, using default {}",
                    name, s, default
                );
                default
            }
        },
    }
}

fn load_config(path: &Option<String>) -> Result<config::Root> {
    match path {
        Some(p) => {
            let text = fs::read_to_string(p)
                .with_context(|| format!("failed to read config: {}", p))?;
            let cfg: config::Root = toml::from_str(&text)
                .with_context(|| format!("failed to parse config: {}", p))?;
            cfg.validate()?;
            Ok(cfg)
        }
        None => Ok(config::Root::default()),
    }
}

fn make_evaluator(cfg: &config::Root, fake: bool) -> Box<dyn Evaluator> {
    if fake {
        eprintln!("[slipstream] fake evaluation mode");
        Box::new(FakeEvaluator::new(cfg.fake.clone()))
    } else {
        Box::new(SolverGateway::new(cfg.evaluation.clone(), cfg.window.clone()))
    }
}

// ============================================================================
// JSON run summary
// ============================================================================

#[derive(Serialize)]
struct RunSummary {
    program: String,
    version: String,
    variant: String,
    seed: u64,
    log_path: String,
    start_iter: usize,
    end_iter: usize,
    evaluations: usize,
    resumed: bool,
    wall_time_s: f64,
    elapsed_s: f64,
    config_snapshot: config::Root,
}

fn write_summary(
    cfg: &config::Root,
    variant: &str,
    seed: u64,
    log_path: &str,
    report: &RunReport,
) -> Result<()> {
    let json_path = log_path.replace(".csv", ".json");
    let summary = RunSummary {
        program: cfg.project.program.clone(),
        version: VERSION.to_string(),
        variant: variant.to_string(),
        seed,
        log_path: log_path.to_string(),
        start_iter: report.start_iter,
        end_iter: report.end_iter,
        evaluations: report.evaluations,
        resumed: report.resumed,
        wall_time_s: report.wall_time_s,
        elapsed_s: report.elapsed_s,
        config_snapshot: cfg.clone(),
    };
    let json = serde_json::to_string_pretty(&summary)?;
    fs::write(&json_path, json)?;
    eprintln!("[slipstream] JSON summary: {}", json_path);
    Ok(())
}

// ============================================================================
// Subcommands
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn run_anneal(
    mut cfg: config::Root,
    out: Option<String>,
    seed: u64,
    fake: bool,
    iters: &Option<String>,
    target_drag: &Option<String>,
    target_lift: &Option<String>,
    step_size: &Option<String>,
    temperature: &Option<String>,
    json: bool,
) -> Result<()> {
    let mut iters = parse_or(iters, "iteration count", 1usize);
    if iters == 0 {
        eprintln!("[slipstream] iteration count must be >= 1, using default 1");
        iters = 1;
    }
    cfg.annealing.target_drag = parse_or(target_drag, "target drag", cfg.annealing.target_drag);
    cfg.annealing.target_lift = parse_or(target_lift, "target lift", cfg.annealing.target_lift);
    cfg.annealing.step_size = parse_or(step_size, "step size", cfg.annealing.step_size);
    cfg.annealing.temperature = parse_or(temperature, "temperature", cfg.annealing.temperature);
    if cfg.annealing.step_size <= 0.0 || cfg.annealing.temperature <= 0.0 {
        let defaults = config::Annealing::default();
        eprintln!(
            "[slipstream] step size and temperature must be positive, using defaults {} / {}",
            defaults.step_size, defaults.temperature
        );
        cfg.annealing.step_size = defaults.step_size;
        cfg.annealing.temperature = defaults.temperature;
    }

    eprintln!("[slipstream] iters: {}", iters);
    eprintln!("[slipstream] target drag: {:.6}", cfg.annealing.target_drag);
    eprintln!("[slipstream] target lift: {:.6}", cfg.annealing.target_lift);
    eprintln!(
        "[slipstream] step size: {:.6}, temperature: {:.6}, seed: {}",
        cfg.annealing.step_size, cfg.annealing.temperature, seed
    );

    let log_path = out.unwrap_or_else(|| "./data/anneal_log.csv".to_string());
    let selector = AnnealingSelector::new(&cfg.domain, &cfg.annealing, seed);
    let store = RecordStore::new(&log_path, selector.trailing());
    let evaluator = make_evaluator(&cfg, fake);

    let report = Driver::new(selector, evaluator, store).run(iters)?;

    eprintln!("[slipstream] ----------------------------------");
    eprintln!(
        "[slipstream] finished {} iterations in {:.1}s (log: {})",
        report.evaluations, report.wall_time_s, log_path
    );
    if json {
        write_summary(&cfg, "anneal", seed, &log_path, &report)?;
    }
    Ok(())
}

fn run_surrogate(
    mut cfg: config::Root,
    out: Option<String>,
    seed: u64,
    fake: bool,
    batches: &Option<String>,
    initial_samples: &Option<String>,
    json: bool,
) -> Result<()> {
    let mut batches = parse_or(batches, "batch count", 1usize);
    if batches == 0 {
        eprintln!("[slipstream] batch count must be >= 1, using default 1");
        batches = 1;
    }
    let initial = parse_or(
        initial_samples,
        "initial sample size",
        cfg.surrogate.initial_samples,
    );
    if initial == 0 {
        eprintln!("[slipstream] initial sample size must be >= 1, keeping config value");
    } else {
        cfg.surrogate.initial_samples = initial;
        cfg.surrogate.min_observations = cfg.surrogate.min_observations.clamp(2, initial.max(2));
    }

    let turns = batches * cfg.surrogate.batch_size;
    eprintln!(
        "[slipstream] batches: {} x {} candidates, initial sample: {}, seed: {}",
        batches, cfg.surrogate.batch_size, cfg.surrogate.initial_samples, seed
    );

    let log_path = out.unwrap_or_else(|| "./data/surrogate_log.csv".to_string());
    let selector = SurrogateSelector::new(&cfg.domain, &cfg.surrogate, seed);
    let store = RecordStore::new(&log_path, selector.trailing());
    let evaluator = make_evaluator(&cfg, fake);

    let report = Driver::new(selector, evaluator, store).run(turns)?;

    eprintln!("[slipstream] ----------------------------------");
    eprintln!(
        "[slipstream] finished {} evaluations in {:.1}s (log: {})",
        report.evaluations, report.wall_time_s, log_path
    );
    if json {
        write_summary(&cfg, "surrogate", seed, &log_path, &report)?;
    }
    Ok(())
}

fn run_pareto(input: &Option<String>, output: &Option<String>) -> Result<()> {
    let input = input
        .clone()
        .unwrap_or_else(|| "./data/surrogate_log.csv".to_string());
    let output = output
        .clone()
        .unwrap_or_else(|| "./data/pareto.csv".to_string());
    let count = pareto::export_front(Path::new(&input), Path::new(&output))?;
    eprintln!(
        "[slipstream] exported {}-point Pareto front of {} to {}",
        count, input, output
    );
    Ok(())
}

fn run_average(start: &Option<String>, end: &Option<String>, file: &Option<String>) -> Result<()> {
    let mut start = parse_or(start, "window start", 0u64);
    let mut end = parse_or(end, "window end", 1000u64);
    if start > end {
        eprintln!("[slipstream] invalid time step range, using defaults 0 to 1000");
        start = 0;
        end = 1000;
    }
    let file = file
        .clone()
        .unwrap_or_else(|| "./runtime/postProcessing/forces/0/forces.dat".to_string());

    let s = stats::window_average(Path::new(&file), start, end)?;
    eprintln!("[slipstream] {} samples in [{}, {}]", s.samples, start, end);
    println!(
        "Average: {:.6},{:.6},{:.6}",
        s.mean[0], s.mean[1], s.mean[2]
    );
    println!(
        "Stdev: {:.6},{:.6},{:.6}",
        s.stdev[0], s.stdev[1], s.stdev[2]
    );
    Ok(())
}

fn validate_config(path: &Option<String>) -> Result<()> {
    let path = path.as_ref().context("--config required for validate")?;
    let cfg = load_config(&Some(path.clone()))?;

    eprintln!("[slipstream] config valid: {}", path);
    eprintln!(
        "  project: {} v{} - {}",
        cfg.project.program, cfg.project.version, cfg.project.module
    );
    eprintln!(
        "  domain: [{}, {}] x [{}, {}]",
        cfg.domain.min_bound[0],
        cfg.domain.max_bound[0],
        cfg.domain.min_bound[1],
        cfg.domain.max_bound[1]
    );
    eprintln!("  window: [{}, {}]", cfg.window.start, cfg.window.end);
    eprintln!(
        "  annealing: step={}, temp={}, target=({}, {})",
        cfg.annealing.step_size,
        cfg.annealing.temperature,
        cfg.annealing.target_drag,
        cfg.annealing.target_lift
    );
    eprintln!(
        "  surrogate: init={}, batch={}, mc={}, ref=({}, {})",
        cfg.surrogate.initial_samples,
        cfg.surrogate.batch_size,
        cfg.surrogate.mc_samples,
        cfg.surrogate.ref_point[0],
        cfg.surrogate.ref_point[1]
    );
    eprintln!(
        "  evaluation: template={}, runtime={}, script={}",
        cfg.evaluation.template_dir, cfg.evaluation.runtime_dir, cfg.evaluation.run_script
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    match &args.command {
        Commands::Anneal {
            iters,
            target_drag,
            target_lift,
            step_size,
            temperature,
            json,
        } => {
            let cfg = load_config(&args.config)?;
            eprintln!(
                "[slipstream] {} v{} - {}",
                cfg.project.program, cfg.project.version, cfg.project.module
            );
            run_anneal(
                cfg,
                args.out.clone(),
                args.seed,
                args.fake,
                iters,
                target_drag,
                target_lift,
                step_size,
                temperature,
                *json,
            )
        }
        Commands::Surrogate {
            batches,
            initial_samples,
            json,
        } => {
            let cfg = load_config(&args.config)?;
            eprintln!(
                "[slipstream] {} v{} - {}",
                cfg.project.program, cfg.project.version, cfg.project.module
            );
            run_surrogate(
                cfg,
                args.out.clone(),
                args.seed,
                args.fake,
                batches,
                initial_samples,
                *json,
            )
        }
        Commands::Pareto { input, output } => run_pareto(input, output),
        Commands::Average { start, end, file } => run_average(start, end, file),
        Commands::Validate => validate_config(&args.config),
    }
}
