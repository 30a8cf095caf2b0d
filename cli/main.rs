#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;

use fairscan::io::{DatasetLayout, MissingPolicy, ScanDataset, load_dataset, write_result};
use fairscan::progress::{ScanProgressObserver, ScanProgressStage};
use fairscan::{BiasScanner, ScanConfig, ScanDirection, ScanInputs, ScoringFunction, Subgroup};

#[derive(Clone, Copy, ValueEnum)]
pub enum ScoringCli {
    Bernoulli,
    Poisson,
    Gaussian,
}

#[derive(Args)]
pub struct DataArgs {
    /// Path to a tab-separated (or .csv) file with outcome, prediction and feature columns
    #[arg(value_name = "DATA")]
    pub data: PathBuf,

    /// Column holding the observed outcome
    #[arg(long, value_name = "COLUMN")]
    pub outcome: String,

    /// Column holding the model's predicted probability or expected value
    #[arg(long, value_name = "COLUMN")]
    pub expectation: String,

    /// Comma-separated feature columns to scan (default: every other column)
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    pub features: Option<Vec<String>>,

    /// Cut numeric features with more distinct values than this into equal-frequency bins
    #[arg(long, value_name = "K")]
    pub bins: Option<usize>,

    /// Comma-separated outcome labels counted as favourable (outcome read as 0/1 otherwise)
    #[arg(long, value_delimiter = ',', value_name = "LABELS")]
    pub favorable_label: Option<Vec<String>>,

    /// Cell text that marks a missing value, e.g. "?"
    #[arg(long, value_name = "TOKEN")]
    pub missing_token: Option<String>,

    /// Drop rows with a missing feature, or fill it with the column's most frequent value
    #[arg(long, value_enum, default_value_t = MissingPolicy::Drop)]
    pub missing: MissingPolicy,
}

#[derive(Args)]
pub struct TuningArgs {
    /// Scan configuration file (.toml); flags below override its values
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Likelihood model of the outcome
    #[arg(long, value_enum)]
    pub scoring: Option<ScoringCli>,

    /// Noise variance for gaussian scoring
    #[arg(long, value_name = "V")]
    pub variance: Option<f64>,

    /// Penalty charged per value named in a subgroup
    #[arg(long, value_name = "P")]
    pub penalty: Option<f64>,

    /// Number of coordinate-ascent restarts
    #[arg(long, value_name = "N")]
    pub restarts: Option<usize>,

    /// Seed for the restart initialisations
    #[arg(long)]
    pub seed: Option<u64>,

    /// Worker threads (default: all available cores)
    #[arg(long, value_name = "T")]
    pub threads: Option<usize>,

    /// Treat low outcomes as the favourable ones
    #[arg(long)]
    pub favorable_low: bool,
}

#[derive(Parser)]
#[command(
    name = "fairscan",
    about = "Find the subgroup whose outcomes a model mispredicts the most",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for the most anomalous subgroup
    #[command(about = "Scan all subgroups for systematic misprediction")]
    Scan {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        tuning: TuningArgs,

        /// Whether to look for under- or over-served subgroups
        #[arg(long, value_enum, default_value_t = ScanDirection::Unprivileged)]
        direction: ScanDirection,

        /// Write the result as a TOML report
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Score one subgroup definition
    #[command(about = "Compute the bias score of a given subgroup")]
    Score {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        tuning: TuningArgs,

        /// Subgroup definition such as "race=a|b;sex=f"
        #[arg(long, value_name = "DEFINITION")]
        subgroup: String,

        #[arg(long, value_enum, default_value_t = ScanDirection::Unprivileged)]
        direction: ScanDirection,
    },

    /// Display version and build information
    #[command(about = "Display version and build information")]
    Version,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Scan {
            data,
            tuning,
            direction,
            output,
        }) => run_scan(data, tuning, direction, output),
        Some(Commands::Score {
            data,
            tuning,
            subgroup,
            direction,
        }) => run_score(data, tuning, &subgroup, direction),
        Some(Commands::Version) => {
            print_version_info();
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error>),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn build_config(tuning: &TuningArgs) -> Result<ScanConfig, Box<dyn std::error::Error>> {
    let mut config = match &tuning.config {
        Some(path) => ScanConfig::load(path)?,
        None => ScanConfig::default(),
    };

    let configured_variance = match config.scoring {
        ScoringFunction::Gaussian { variance } => variance,
        _ => 1.0,
    };
    if let Some(scoring) = tuning.scoring {
        config.scoring = match scoring {
            ScoringCli::Bernoulli => ScoringFunction::Bernoulli,
            ScoringCli::Poisson => ScoringFunction::Poisson,
            ScoringCli::Gaussian => ScoringFunction::Gaussian {
                variance: configured_variance,
            },
        };
    }
    if let Some(variance) = tuning.variance {
        match &mut config.scoring {
            ScoringFunction::Gaussian { variance: slot } => *slot = variance,
            other => {
                return Err(format!("--variance only applies to gaussian scoring, not {other}").into());
            }
        }
    }
    if let Some(penalty) = tuning.penalty {
        config.penalty = penalty;
    }
    if let Some(restarts) = tuning.restarts {
        config.restarts = restarts;
    }
    if let Some(seed) = tuning.seed {
        config.seed = seed;
    }
    if tuning.threads.is_some() {
        config.threads = tuning.threads;
    }
    if tuning.favorable_low {
        config.favorable_high = false;
    }
    config.validate()?;
    Ok(config)
}

fn load(data: &DataArgs) -> Result<ScanDataset, Box<dyn std::error::Error>> {
    println!("Loading data from: {}", data.data.display());
    let dataset = load_dataset(
        &data.data,
        &DatasetLayout {
            outcome_column: data.outcome.clone(),
            expectation_column: data.expectation.clone(),
            feature_columns: data.features.clone(),
            numeric_bins: data.bins,
            favorable_labels: data.favorable_label.clone(),
            missing_token: data.missing_token.clone(),
            missing_policy: data.missing,
        },
    )?;
    println!(
        "Loaded {} rows with {} features: {}",
        dataset.table.num_rows(),
        dataset.table.num_features(),
        dataset.table.feature_names().collect::<Vec<_>>().join(", ")
    );
    Ok(dataset)
}

fn run_scan(
    data: DataArgs,
    tuning: TuningArgs,
    direction: ScanDirection,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&tuning)?;
    let dataset = load(&data)?;
    let inputs = ScanInputs::new(
        &dataset.table,
        dataset.outcomes.view(),
        dataset.expectations.view(),
    );

    let workers = config.threads.unwrap_or_else(num_cpus::get);
    println!(
        "Scanning for {} subgroups with {} scoring, {} restarts on {} threads",
        direction, config.scoring, config.restarts, workers
    );

    let mut rng = StdRng::seed_from_u64(config.seed);
    let scanner = BiasScanner::new(config)?;
    let progress = ConsoleProgress::new();
    let result = scanner.scan_with_rng(&inputs, direction, &mut rng, &progress)?;

    println!("Most anomalous subgroup: {}", result.subgroup);
    println!("Bias score: {:.6}", result.score);
    if !result.converged {
        println!("Warning: the best restart hit the pass limit before converging.");
    }
    let summary = scanner.summarize(&inputs, &result.subgroup)?;
    println!("Subgroup summary: {summary}");

    if let Some(path) = output {
        write_result(&path, &result)?;
        println!("Scan report written to: {}", path.display());
    }
    Ok(())
}

fn run_score(
    data: DataArgs,
    tuning: TuningArgs,
    definition: &str,
    direction: ScanDirection,
) -> Result<(), Box<dyn std::error::Error>> {
    let subgroup: Subgroup = definition.parse()?;
    let scanner = BiasScanner::new(build_config(&tuning)?)?;
    let dataset = load(&data)?;
    let inputs = ScanInputs::new(
        &dataset.table,
        dataset.outcomes.view(),
        dataset.expectations.view(),
    );

    let score = scanner.score_subgroup(&inputs, &subgroup, direction)?;
    let summary = scanner.summarize(&inputs, &subgroup)?;
    println!("Subgroup: {subgroup}");
    println!("Bias score ({direction}): {score:.6}");
    println!("Subgroup summary: {summary}");
    Ok(())
}

/// Restart progress on stderr, hidden when stderr is not a terminal.
struct ConsoleProgress {
    bar: ProgressBar,
    best: Mutex<f64>,
}

impl ConsoleProgress {
    fn new() -> Self {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(0), draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            bar.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        Self {
            bar,
            best: Mutex::new(0.0),
        }
    }
}

impl ScanProgressObserver for ConsoleProgress {
    fn on_stage_start(&self, stage: ScanProgressStage, total: usize) {
        if stage == ScanProgressStage::Restarts {
            self.bar.set_length(total as u64);
            self.bar.set_position(0);
        }
        self.bar.set_message(stage.to_string());
    }

    fn on_restart_finish(&self, restart: usize, score: f64) {
        let best = match self.best.lock() {
            Ok(mut best) => {
                *best = best.max(score);
                *best
            }
            Err(poisoned) => *poisoned.into_inner(),
        };
        self.bar
            .set_message(format!("restart {restart} done, best score {best:.4}"));
        self.bar.inc(1);
    }

    fn on_stage_finish(&self, stage: ScanProgressStage) {
        if stage == ScanProgressStage::Restarts {
            self.bar.finish_and_clear();
        }
    }
}

/// Format seconds into a human-readable duration like "2.4 hours ago"
fn format_duration_ago(seconds: u64) -> String {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    if seconds < MINUTE {
        format!("{seconds} seconds ago")
    } else if seconds < HOUR {
        format!("{:.1} minutes ago", seconds as f64 / MINUTE as f64)
    } else if seconds < DAY {
        format!("{:.1} hours ago", seconds as f64 / HOUR as f64)
    } else {
        format!("{:.1} days ago", seconds as f64 / DAY as f64)
    }
}

fn print_version_info() {
    let version = env!("CARGO_PKG_VERSION");
    let build_timestamp: u64 = env!("FAIRSCAN_BUILD_TIMESTAMP").parse().unwrap_or(0);

    println!("fairscan {version}");
    println!("Worker threads available: {}", num_cpus::get());

    if build_timestamp > 0 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if now > build_timestamp {
            println!("Built: {}", format_duration_ago(now - build_timestamp));
        } else {
            println!("Built: just now");
        }
    }
}
