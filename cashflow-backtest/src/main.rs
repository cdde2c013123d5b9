//! Covered-call backtest CLI.
//!
//! # Usage
//!
//! ```bash
//! # Run a single backtest
//! cashflow-backtest run --config config/default.toml \
//!     --underlying data/spy_30m.csv --options data/spy_options_30m.csv
//!
//! # Run several configurations in parallel
//! cashflow-backtest sweep --configs a.toml b.toml c.toml \
//!     --underlying data/spy_30m.csv --options data/spy_options_30m.csv
//!
//! # Inspect alignment of the data files
//! cashflow-backtest check-data --config config/default.toml \
//!     --underlying data/spy_30m.csv --options data/spy_options_30m.csv
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cashflow_backtest::backtest::{run_batch_with_progress, run_simulation, BatchJob, SimulationConfig};
use cashflow_backtest::data::{BarLoader, InMemoryProvider, MarketDataset, StrikeLadder};

const SEPARATOR: &str = "============================================================";

#[derive(Parser)]
#[command(name = "cashflow-backtest")]
#[command(about = "Covered-call cash-flow strategy backtester")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Data files shared by every subcommand.
#[derive(Args)]
struct DataArgs {
    /// Underlying bars with implied volatility (CSV or Parquet)
    #[arg(long)]
    underlying: PathBuf,

    /// Option bars aggregated per interval (CSV or Parquet)
    #[arg(long)]
    options: PathBuf,

    /// Listed option chains (CSV or Parquet); synthetic strikes when absent
    #[arg(long)]
    chains: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest with given configuration
    Run {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,

        #[command(flatten)]
        data: DataArgs,

        /// Write the full report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit only the date -> daily record mapping
        #[arg(long)]
        daily_only: bool,
    },

    /// Run several configurations in parallel
    Sweep {
        /// Configuration files, one run each
        #[arg(long, num_args = 1.., required = true)]
        configs: Vec<PathBuf>,

        #[command(flatten)]
        data: DataArgs,

        /// Directory for per-run reports
        #[arg(short, long, default_value = "results")]
        output: PathBuf,
    },

    /// Load and align data files and print filter statistics
    CheckData {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,

        #[command(flatten)]
        data: DataArgs,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("cashflow_backtest=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            data,
            output,
            daily_only,
        } => cmd_run(&config, &data, output.as_deref(), daily_only),
        Commands::Sweep {
            configs,
            data,
            output,
        } => cmd_sweep(&configs, &data, &output),
        Commands::CheckData { config, data } => cmd_check_data(&config, &data),
    }
}

fn load_config(path: &Path) -> Result<SimulationConfig> {
    let config = SimulationConfig::from_file(path)
        .with_context(|| format!("loading config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

fn load_provider(data: &DataArgs, config: &SimulationConfig) -> Result<InMemoryProvider> {
    let mut loader = BarLoader::new(&data.underlying, &data.options);
    if let Some(chains) = &data.chains {
        loader = loader.with_chains(chains);
    }
    loader
        .load(&config.symbol, StrikeLadder::from_config(config))
        .context("loading market data")
}

fn cmd_run(
    config_path: &Path,
    data: &DataArgs,
    output: Option<&Path>,
    daily_only: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let provider = load_provider(data, &config)?;
    let dataset = MarketDataset::assemble(&provider, &config).context("assembling dataset")?;

    let started = Instant::now();
    let report = run_simulation(&config, &dataset).context("simulation failed")?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "run finished");

    let json = if daily_only {
        report.daily_json()?
    } else {
        report.to_json_pretty()?
    };

    match output {
        Some(path) => {
            write_report(path, &json)?;
            eprintln!("{}", report.metrics.summary());
            eprintln!("\nReport written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn cmd_sweep(config_paths: &[PathBuf], data: &DataArgs, output: &Path) -> Result<()> {
    let mut jobs = Vec::with_capacity(config_paths.len());
    for path in config_paths {
        let config = load_config(path)?;
        let provider = load_provider(data, &config)?;
        let dataset = MarketDataset::assemble(&provider, &config)
            .with_context(|| format!("assembling dataset for {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("run-{}", jobs.len()));
        jobs.push(BatchJob {
            name,
            config,
            dataset: Arc::new(dataset),
        });
    }

    let bar = ProgressBar::new(jobs.len() as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} runs")
            .context("progress template")?
            .progress_chars("=>-"),
    );

    let outcomes = run_batch_with_progress(&jobs, |done, _| bar.set_position(done as u64));
    bar.finish_and_clear();

    fs::create_dir_all(output).with_context(|| format!("creating {}", output.display()))?;

    println!("{SEPARATOR}");
    println!("{:<24} {:>10} {:>10} {:>8} {:>8}", "run", "return %", "max dd %", "calls", "assigned");
    println!("{SEPARATOR}");
    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(report) => {
                let m = &report.metrics;
                println!(
                    "{:<24} {:>10.2} {:>10.2} {:>8} {:>8}",
                    outcome.name, m.total_return_pct, m.max_drawdown_pct, m.calls_written, m.assignments
                );
                let path = output.join(format!("{}.json", outcome.name));
                write_report(&path, &report.to_json_pretty()?)?;
            }
            Err(e) => {
                failed += 1;
                println!("{:<24} FAILED: {e}", outcome.name);
            }
        }
    }
    println!("{SEPARATOR}");

    if failed > 0 {
        anyhow::bail!("{failed} of {} runs failed", outcomes.len());
    }
    Ok(())
}

fn cmd_check_data(config_path: &Path, data: &DataArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let provider = load_provider(data, &config)?;
    let dataset = MarketDataset::assemble(&provider, &config).context("assembling dataset")?;
    let stats = &dataset.stats;

    println!("{SEPARATOR}");
    println!("Data check: {} {} to {}", dataset.symbol, config.start_date, config.end_date);
    println!("{SEPARATOR}");
    println!("  Underlying bars:      {}", stats.underlying_bars);
    println!("  Option bars:          {}", stats.option_bars);
    println!("  Dropped (settlement): {}", stats.dropped_settlement);
    println!("  Dropped (other):      {}", stats.dropped_other);
    println!("  Bar interval:         {}", config.bar_interval);
    println!("  Trading sessions:     {}", dataset.days.len());
    if let (Some(first), Some(last)) = (dataset.days.first(), dataset.days.last()) {
        println!("  First session:        {} close {}", first.date, first.close);
        println!("  Last session:         {} close {}", last.date, last.close);
    }
    println!(
        "  Option chains:        {}",
        if dataset.listed.is_some() { "listed" } else { "synthetic strikes" }
    );
    Ok(())
}

fn write_report(path: &Path, json: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}
