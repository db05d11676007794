use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pug_harvest::config::{ConfigLoader, ConfigOverrides, PipelineConfig};
use pug_harvest::domain::{RecordFormat, WorkItem};
use pug_harvest::error::HarvestError;
use pug_harvest::input::{clean_names, read_input, work_items};
use pug_harvest::ledger::{ERROR_LEDGER_FILE, SUCCESS_LEDGER_FILE};
use pug_harvest::output::{ConsoleProgress, JsonOutput, OutputMode};
use pug_harvest::pipeline::{BatchReport, Pipeline};
use pug_harvest::rate_gate::{Pacing, probe_latency};
use pug_harvest::retry_session::{RetrySelector, build_retry_batch, skip_completed};
use pug_harvest::transport::ReqwestTransport;

#[derive(Parser)]
#[command(name = "pug-harvest")]
#[command(about = "Resolve compound names through PubChem and download their records in bulk")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve names (or take CIDs) and download their records")]
    Fetch(FetchArgs),
    #[command(about = "Re-run failures recorded in an error ledger")]
    Retry(RetryArgs),
}

#[derive(Args, Clone)]
struct FetchArgs {
    /// Compound names typed on the command line.
    names: Vec<String>,

    /// Newline-separated list of names; `-` reads stdin.
    #[arg(long)]
    input: Option<String>,

    /// Treat the input as PubChem CIDs and skip name resolution.
    #[arg(long)]
    cids: bool,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Args, Clone)]
struct RetryArgs {
    /// Error ledger to replay (defaults to download_errors.log in --dest).
    #[arg(long)]
    ledger: Option<Utf8PathBuf>,

    /// HTTP statuses worth retrying (default: 503).
    #[arg(long = "status")]
    statuses: Vec<u16>,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Args, Clone)]
struct TuningArgs {
    #[arg(long)]
    dest: Option<Utf8PathBuf>,

    #[arg(long)]
    format: Option<RecordFormat>,

    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    interval_ms: Option<u64>,

    #[arg(long)]
    max_attempts: Option<u32>,

    #[arg(long)]
    base_delay_ms: Option<u64>,

    #[arg(long)]
    max_delay_ms: Option<u64>,

    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    config: Option<String>,

    /// Pick concurrency and pacing from a measured round trip.
    #[arg(long)]
    auto_tune: bool,
}

impl TuningArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            destination: self.dest.clone(),
            format: self.format,
            concurrency: self.concurrency,
            rate_interval: self.interval_ms.map(Duration::from_millis),
            max_attempts: self.max_attempts,
            base_delay: self.base_delay_ms.map(Duration::from_millis),
            max_delay: self.max_delay_ms.map(Duration::from_millis),
            base_url: self.base_url.clone(),
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(report) if report.failed > 0 => ExitCode::from(4),
        Ok(_) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(harvest) = report.downcast_ref::<HarvestError>() {
                return ExitCode::from(map_exit_code(harvest));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::InvalidFormat(_)
        | HarvestError::InvalidIdentifier(_)
        | HarvestError::InvalidDestination(_)
        | HarvestError::InputRead(_)
        | HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::InvalidConfig(_) => 2,
        HarvestError::Transport { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<BatchReport> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Fetch(args) => {
            let config = resolve_config(&args.tuning)?;
            let mut lines = clean_names(args.names);
            if let Some(path) = args.input.as_deref() {
                lines.extend(read_input(path)?);
            }
            if lines.is_empty() {
                return Err(miette::Report::msg(
                    "no compound names given (pass names or --input FILE)",
                ));
            }
            run_batch(config, work_items(lines, args.cids), output_mode)
        }
        Commands::Retry(args) => {
            let config = resolve_config(&args.tuning)?;
            let ledger = args
                .ledger
                .unwrap_or_else(|| config.destination.join(ERROR_LEDGER_FILE));
            let selector = if args.statuses.is_empty() {
                RetrySelector::default()
            } else {
                RetrySelector::with_statuses(args.statuses)
            };
            let items = build_retry_batch(&ledger, &selector)?;
            let items = skip_completed(items, &config.destination.join(SUCCESS_LEDGER_FILE))?;
            info!(ledger = %ledger, items = items.len(), "retrying recorded failures");
            run_batch(config, items, output_mode)
        }
    }
}

fn resolve_config(tuning: &TuningArgs) -> miette::Result<PipelineConfig> {
    let file = ConfigLoader::resolve(tuning.config.as_deref())?;
    let mut config = ConfigLoader::resolve_config(file, tuning.overrides())?;

    if tuning.auto_tune {
        let transport = ReqwestTransport::new(config.timeout)?;
        let round_trip = probe_latency(&transport, &config.base_url)?;
        let pacing = Pacing::for_latency(round_trip);
        if tuning.concurrency.is_none() {
            config.concurrency = pacing.concurrency;
        }
        if tuning.interval_ms.is_none() {
            config.rate_interval = pacing.interval;
        }
        info!(
            concurrency = config.concurrency,
            interval_ms = config.rate_interval.as_millis() as u64,
            "auto-tuned pacing"
        );
    }
    Ok(config)
}

fn run_batch(
    config: PipelineConfig,
    items: Vec<WorkItem>,
    output_mode: OutputMode,
) -> miette::Result<BatchReport> {
    let pipeline = Pipeline::from_config(config)?;
    match output_mode {
        OutputMode::NonInteractive => {
            let report = pipeline.run_batch(items, &JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
            Ok(report)
        }
        OutputMode::Interactive => {
            let progress = ConsoleProgress::new();
            let report = pipeline.run_batch(items, &progress)?;
            progress.finish(&report).into_diagnostic()?;
            Ok(report)
        }
    }
}
