//! SLAMSPOOF: Monte-Carlo LiDAR spoofing trials against external SLAM pipelines.
//!
//! The tool rewrites a recorded ROS bag so that the LiDAR scans look as if an attacker had
//! been standing next to the robot's path, replays the rewritten bag through one or more
//! SLAM pipelines and scores the resulting trajectories against a ground truth.
//!
//! Everything is driven from a configuration file (TOML/JSON/YAML); use the `config`
//! subcommand to write a template.

mod common;

use clap::{Args, Parser, Subcommand};
use common::{init_logger, validate_input_file, validate_output_dir};
use log::{error, info};
use std::error::Error;
use std::path::{Path, PathBuf};

use slamspoof::attack::AttackModel;
use slamspoof::config::SpoofConfig;
use slamspoof::harness::{run_sweep, trial_rng};
use slamspoof::rewriter::LogRewriter;
use slamspoof::slam::SlamAlgorithm;
use slamspoof::spoofer::{SpooferPlacement, random_placement};
use slamspoof::trajectory::ReferenceTrajectory;

const LONG_ABOUT: &str = "SLAMSPOOF: Monte-Carlo LiDAR spoofing trials against external SLAM pipelines.

Each trial places a virtual attacker at a fixed distance from a random point of the
reference trajectory and rewrites the LiDAR scans of the input bag whenever the robot is
within reach of the attacker:

- removal: points inside the attacked sector are deleted
- static injection: a fake wall is added at a fixed distance
- dynamic injection: the fake wall sweeps between two distances over time

The rewritten bag is replayed through every configured SLAM algorithm via roslaunch and the
estimated trajectory is compared with the ground truth (APE/RPE). A trial counts as a
successful attack when its RPE reaches the configured threshold.

All parameters are read from a configuration file (TOML/JSON/YAML).";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Monte-Carlo LiDAR spoofing trials against external SLAM pipelines.", long_about = LONG_ABOUT)]
struct Cli {
    /// Configuration file (TOML/JSON/YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log file path (if not specified, logs to stderr); overrides the config file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Rewrite all trial bags in parallel before replaying them
    #[arg(long, global = true)]
    parallel: bool,
}

/// Top-level commands
#[derive(Subcommand, Clone, Debug)]
enum Command {
    #[command(
        name = "run",
        about = "Run the full spoofing sweep",
        long_about = "Run the benign baseline, then n_trials spoofed trials for every configured SLAM algorithm. Per-trial APE/RPE values are written to one CSV per algorithm and a success-rate summary is printed at the end. This is the default when only --config is given."
    )]
    Run(RunArgs),
    #[command(
        name = "rewrite",
        about = "Rewrite a single bag without running SLAM",
        long_about = "Rewrite the configured input bag once, either for an explicit attacker position or for a placement drawn from the reference trajectory with the configured seed. Useful for inspecting the spoofed point clouds in rviz."
    )]
    Rewrite(RewriteArgs),
    #[command(
        name = "config",
        about = "Write a template configuration file",
        long_about = "Write a configuration template. The file extension selects the format: .json, .yaml/.yml or .toml."
    )]
    CreateConfig(CreateConfigArgs),
}

/// Overrides applied on top of the configuration file for `run`
#[derive(Args, Clone, Debug, Default)]
struct RunArgs {
    /// Number of trials
    #[arg(short = 'n', long)]
    trials: Option<usize>,

    /// Base random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Comma separated SLAM algorithms (kiss_icp, fast_lio)
    #[arg(long, value_delimiter = ',')]
    algorithms: Vec<String>,
}

/// Arguments for a single rewrite
#[derive(Args, Clone, Debug)]
struct RewriteArgs {
    /// Attacker x position (map frame, meters)
    #[arg(short = 'x', long, requires = "y", allow_negative_numbers = true)]
    x: Option<f64>,

    /// Attacker y position (map frame, meters)
    #[arg(short = 'y', long, requires = "x", allow_negative_numbers = true)]
    y: Option<f64>,

    /// Attacker z position (map frame, meters)
    #[arg(short = 'z', long, default_value_t = 0.0, allow_negative_numbers = true)]
    z: f64,

    /// Output bag; defaults to rosbag.output_bag from the configuration
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seed for the placement draw and injected-point noise
    #[arg(long)]
    seed: Option<u64>,

    /// Copy the bag without attacking it
    #[arg(long)]
    baseline: bool,
}

/// Arguments for the template writer
#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file path for the config file
    /// File extension determines format: .json, .yaml/.yml, or .toml
    #[arg(short, long, default_value = "slamspoof.yaml")]
    output: PathBuf,
}

/// Load a configuration and apply the command line overrides.
fn load_config(
    path: &Path,
    parallel: bool,
    args: &RunArgs,
) -> Result<SpoofConfig, Box<dyn Error>> {
    validate_input_file(path)?;
    let mut config = SpoofConfig::from_file(path)?;
    if parallel {
        config.main.parallel = true;
    }
    if let Some(n) = args.trials {
        config.main.n_trials = n;
    }
    if let Some(seed) = args.seed {
        config.main.seed = seed;
    }
    if !args.algorithms.is_empty() {
        config.slam.algorithms = args
            .algorithms
            .iter()
            .map(|name| name.parse::<SlamAlgorithm>())
            .collect::<Result<Vec<_>, _>>()?;
    }
    config.validate()?;
    Ok(config)
}

fn run_sweep_cli(config: &SpoofConfig) -> Result<(), Box<dyn Error>> {
    validate_input_file(&config.main.reference_file)?;
    validate_input_file(&config.rosbag.input_bag)?;
    validate_output_dir(&config.slam.save_dir)?;
    validate_output_dir(&config.evaluation.results_dir)?;
    info!(
        "Running {} trials against {} algorithm(s) on {}",
        config.main.n_trials,
        config.slam.algorithms.len(),
        config.rosbag.input_bag.display()
    );
    let summary = run_sweep(config)?;
    println!("{summary}");
    Ok(())
}

fn run_rewrite(config: &SpoofConfig, args: &RewriteArgs) -> Result<(), Box<dyn Error>> {
    validate_input_file(&config.main.reference_file)?;
    validate_input_file(&config.rosbag.input_bag)?;
    let trajectory = ReferenceTrajectory::from_csv(&config.main.reference_file)?;
    let mut rng = trial_rng(args.seed.unwrap_or(config.main.seed), 0);
    let placement = match (args.x, args.y) {
        (Some(x), Some(y)) => SpooferPlacement::new(x, y, args.z),
        _ => random_placement(&trajectory, config.spoofer.radius_m, &mut rng),
    };
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| config.rosbag.output_bag.clone());
    if output == config.rosbag.input_bag {
        return Err("Output bag must differ from the input bag.".into());
    }

    let mut rewriter = LogRewriter::new(config, &trajectory, placement);
    if args.baseline {
        rewriter = rewriter.with_model(AttackModel::None);
    }
    let stats = rewriter.rewrite_to_path(&config.rosbag.input_bag, &output, &mut rng)?;
    println!("Attacker at {placement}");
    println!("{stats}");
    Ok(())
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = args.output.parent()
        && !parent.as_os_str().is_empty()
    {
        validate_output_dir(parent)?;
    }
    SpoofConfig::default().to_file(&args.output)?;
    println!("Configuration template written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    if let Some(Command::CreateConfig(args)) = &cli.command {
        init_logger(cli.log_level.as_deref().unwrap_or("info"), cli.log_file.as_ref())?;
        return create_config_file(args);
    }

    let Some(config_path) = cli.config.as_ref() else {
        eprintln!("Error: --config is required. Use `slamspoof config` to write a template.");
        std::process::exit(1);
    };

    let run_args = match &cli.command {
        Some(Command::Run(args)) => args.clone(),
        _ => RunArgs::default(),
    };
    let config = load_config(config_path, cli.parallel, &run_args)?;

    // CLI flags take precedence over the config file
    let log_level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let log_file = cli.log_file.as_ref().or(config.logging.file.as_ref());
    init_logger(log_level, log_file)?;

    let result = match &cli.command {
        Some(Command::Rewrite(args)) => run_rewrite(&config, args),
        Some(Command::Run(_)) | None => run_sweep_cli(&config),
        Some(Command::CreateConfig(_)) => unreachable!("handled above"),
    };
    if let Err(e) = &result {
        error!("{e}");
    }
    result
}
