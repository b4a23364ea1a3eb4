use std::fs::File;
use std::path::{Path, PathBuf};

use probe_orchestrator::config::{split_args, OrchestratorConfig, ReprobeArgs};
use probe_orchestrator::executor::ProcessRunner;
use probe_orchestrator::record::{ProbeResult, RecordReader};
use probe_orchestrator::Error;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// probe-orchestrator: drive an external probing engine round after round and read its results.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "probe-orchestrator",
    version,
    about = "Drive an external probing engine round after round and decode its binary result records.",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Repeated scans, optionally stepping the probing rate or granularity.
    Run(RunArgs),
    /// Main scan followed by reprobe rounds fed by the target generator.
    Reprobe(ReprobeCliArgs),
    /// Print the records of a result file.
    Decode(DecodeArgs),
}

#[derive(Debug, Clone, Args)]
struct SessionArgs {
    /// Existing directory that receives every round's output.
    #[arg(short = 'o', long = "output-dir")]
    output_dir: PathBuf,

    /// Path to the probing engine.
    #[arg(short = 'e', long)]
    engine: PathBuf,

    /// Number of rounds; 0 relies on the time budget alone.
    #[arg(short = 'n', long, default_value_t = 0)]
    rounds: u64,

    /// Time budget in minutes.
    #[arg(short = 't', long = "time-budget")]
    time_budget: Option<u64>,

    /// Seconds to wait after each round.
    #[arg(short = 'd', long, default_value_t = 0)]
    delay: u64,

    /// Label used to name output files.
    #[arg(short = 'l', long)]
    label: String,

    /// Log commands without running them.
    #[arg(long = "dry-run", default_value_t = false)]
    dry_run: bool,

    /// Stop the session when the engine or generator fails.
    #[arg(long = "abort-on-failure", default_value_t = false)]
    abort_on_failure: bool,

    /// Kill a subprocess that runs longer than this many seconds.
    #[arg(long = "round-timeout")]
    round_timeout: Option<u64>,

    /// Write a JSON session report to this path.
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    #[command(flatten)]
    session: SessionArgs,

    /// Extra engine arguments, whitespace separated.
    #[arg(short = 'a', long = "engine-args", default_value = "", allow_hyphen_values = true)]
    engine_args: String,

    /// Do not feed the previous round's output back to the engine.
    #[arg(long = "no-history", default_value_t = false)]
    no_history: bool,

    /// Output of an earlier run to use as history for the first round.
    #[arg(long = "history-file")]
    history_file: Option<PathBuf>,

    /// Probing rate of the first round.
    #[arg(long = "initial-rate")]
    initial_rate: Option<u64>,

    /// Probing rate increase per round.
    #[arg(long = "rate-step")]
    rate_step: Option<u64>,

    /// Upper bound for the probing rate.
    #[arg(long = "rate-ceiling")]
    rate_ceiling: Option<u64>,

    /// Granularity (prefix length) of the first round; grows by one per round.
    #[arg(long = "initial-granularity")]
    initial_granularity: Option<u64>,

    /// Upper bound for the granularity.
    #[arg(long = "granularity-ceiling")]
    granularity_ceiling: Option<u64>,
}

#[derive(Debug, Clone, Args)]
struct ReprobeCliArgs {
    #[command(flatten)]
    session: SessionArgs,

    /// Path to the reprobe target generator.
    #[arg(short = 'r', long)]
    generator: PathBuf,

    /// Engine arguments for the main (first) scan.
    #[arg(long = "main-args", default_value = "", allow_hyphen_values = true)]
    main_args: String,

    /// Engine arguments for every reprobe scan.
    #[arg(long = "extra-args", default_value = "", allow_hyphen_values = true)]
    extra_args: String,
}

#[derive(Debug, Clone, Args)]
struct DecodeArgs {
    /// Result file written by the engine.
    #[arg(short = 'f', long)]
    file: PathBuf,

    /// Stop after this many records.
    #[arg(long)]
    limit: Option<usize>,

    /// Write decoded records as pretty JSON to this path.
    #[arg(long)]
    json: Option<PathBuf>,
}

impl SessionArgs {
    fn base_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            output_dir: self.output_dir.clone(),
            engine_path: self.engine.clone(),
            round_count: self.rounds,
            time_budget_minutes: self.time_budget,
            inter_round_delay_secs: self.delay,
            label: self.label.clone(),
            dry_run: self.dry_run,
            abort_on_failure: self.abort_on_failure,
            round_timeout_secs: self.round_timeout,
            ..Default::default()
        }
    }
}

impl RunArgs {
    fn to_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            extra_engine_args: split_args(&self.engine_args),
            reuse_history: !self.no_history,
            history_file: self.history_file.clone(),
            initial_rate: self.initial_rate,
            rate_step: self.rate_step,
            rate_ceiling: self.rate_ceiling,
            initial_granularity: self.initial_granularity,
            granularity_ceiling: self.granularity_ceiling,
            ..self.session.base_config()
        }
    }
}

impl ReprobeCliArgs {
    fn to_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            generator_path: Some(self.generator.clone()),
            reprobe: Some(ReprobeArgs {
                main_args: split_args(&self.main_args),
                extra_args: split_args(&self.extra_args),
            }),
            ..self.session.base_config()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_session(args.to_config(), args.session.summary.as_deref()).await,
        Commands::Reprobe(args) => run_session(args.to_config(), args.session.summary.as_deref()).await,
        Commands::Decode(args) => decode_file(&args),
    }
}

async fn run_session(config: OrchestratorConfig, summary: Option<&Path>) -> Result<()> {
    info!("probe-orchestrator configuration:");
    info!("  output dir   : {}", config.output_dir.display());
    info!("  engine       : {}", config.engine_path.display());
    if let Some(generator) = &config.generator_path {
        info!("  generator    : {}", generator.display());
    }
    info!("  label        : {}", config.label);
    info!("  rounds       : {}", config.round_count);
    info!(
        "  time budget  : {}",
        config
            .time_budget_minutes
            .map(|m| format!("{m} min"))
            .unwrap_or_else(|| "<none>".to_string())
    );
    info!("  delay        : {}s", config.inter_round_delay_secs);
    info!("  dry run      : {}", config.dry_run);

    let validated = config.validate().context("invalid configuration")?;

    // Ctrl-C stops the session once the current round returns.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after the current round");
            cancel_ctrlc.cancel();
        }
    });

    let mut orchestrator = validated
        .into_orchestrator(ProcessRunner)
        .with_cancellation(cancel);
    let report = orchestrator.run().await?;

    if let Some(path) = summary {
        write_json(path, &report)?;
        info!("wrote session report to {}", path.display());
    }
    Ok(())
}

fn decode_file(args: &DecodeArgs) -> Result<()> {
    let reader = RecordReader::open(&args.file)
        .with_context(|| format!("failed to open result file: {}", args.file.display()))?;
    let limit = args.limit.unwrap_or(usize::MAX);

    let mut records = Vec::new();
    for item in reader.take(limit) {
        match item {
            Ok(record) => records.push(record),
            Err(Error::TruncatedRecord { offset, bytes_read }) => {
                warn!(
                    "{}: truncated record at byte {offset} ({bytes_read} of 39 bytes), ignoring tail",
                    args.file.display()
                );
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", args.file.display()))
            }
        }
    }

    print_records_table(&records);
    if let Some(path) = args.json.as_deref() {
        write_json(path, &records)?;
        info!("wrote {} records to {}", records.len(), path.display());
    }
    Ok(())
}

fn print_records_table(records: &[ProbeResult]) {
    let ip_w = 15usize.max("destination".len());
    let dist_w = "distance".len();
    let rtt_w = 10usize.max("rtt_us".len());

    println!("\nRecords: {}", records.len());
    println!(
        "{:<ip_w$}  {:<ip_w$}  {:>dist_w$}  {:>rtt_w$}  {:<9}  {:<4}",
        "destination", "responder", "distance", "rtt_us", "from_dest", "ipv4",
    );
    println!(
        "{:-<ip_w$}  {:-<ip_w$}  {:-<dist_w$}  {:-<rtt_w$}  {:-<9}  {:-<4}",
        "", "", "", "", "", "",
    );
    for r in records {
        println!(
            "{:<ip_w$}  {:<ip_w$}  {:>dist_w$}  {:>rtt_w$}  {:<9}  {:<4}",
            r.destination().to_string(),
            r.responder().to_string(),
            r.distance,
            r.rtt_micros,
            r.from_destination,
            r.ipv4,
        );
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}
