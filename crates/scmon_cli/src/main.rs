use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use scmon_core::{
    build_sinks, run, CloudCredentials, InfluxSettings, KeystoneSession, RunReport, ServiceConfig,
    SinkKind,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "scmon",
    version,
    about = "Validate an OpenStack service catalog against expected services"
)]
struct Cli {
    /// Log debug events to stderr (overridden by RUST_LOG).
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the catalog, run all checks and emit results to the chosen sinks.
    Validate(ValidateArgs),
    /// Summarize a report written with `validate --out`.
    Report(ReportArgs),
    /// Write a starter service config.
    Init(InitArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum SinkArg {
    Console,
    Metrics,
    None,
}

impl From<SinkArg> for SinkKind {
    fn from(arg: SinkArg) -> Self {
        match arg {
            SinkArg::Console => SinkKind::Console,
            SinkArg::Metrics => SinkKind::Metrics,
            SinkArg::None => SinkKind::None,
        }
    }
}

#[derive(Args)]
struct ValidateArgs {
    #[arg(long, default_value = "service_config.yaml")]
    config: PathBuf,
    /// Named cloud from clouds.yaml; falls back to OS_CLOUD, then OS_* variables.
    #[arg(long)]
    cloud: Option<String>,
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = [SinkArg::Console, SinkArg::Metrics])]
    sink: Vec<SinkArg>,
    #[arg(long)]
    id: Option<String>,
    /// Also write the full report (including per-check records) to this file.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct ReportArgs {
    #[arg(long)]
    input: PathBuf,
}

#[derive(Args)]
struct InitArgs {
    #[arg(long, default_value = "service_config.yaml")]
    out: PathBuf,
    #[arg(long)]
    force: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    match cli.command {
        Commands::Validate(args) => handle_validate(args),
        Commands::Report(args) => handle_report(args),
        Commands::Init(args) => handle_init(args),
    }
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

fn handle_validate(args: ValidateArgs) -> Result<()> {
    let config = ServiceConfig::from_path(&args.config)?;
    let creds = CloudCredentials::resolve(args.cloud.as_deref())
        .context("failed to resolve cloud credentials")?;
    let session = KeystoneSession::authenticate(&creds).context("authentication failed")?;

    let kinds: Vec<SinkKind> = args.sink.into_iter().map(SinkKind::from).collect();
    let mut sinks = build_sinks(&kinds, InfluxSettings::from_env());

    let run_id = args
        .id
        .unwrap_or_else(|| format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S")));
    let report = run(&session, &config, &mut sinks, &run_id)?;

    if let Some(path) = args.out.as_ref() {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "report written");
    }
    Ok(())
}

fn handle_report(args: ReportArgs) -> Result<()> {
    let data = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let report: RunReport = serde_json::from_str(&data)?;
    let totals = report.totals();
    println!(
        "Report {} -> {:?} ({} errors, {} warnings, {} successes)",
        report.id, report.status, totals.error, totals.warn, totals.success
    );
    for service in report.results.keys() {
        let counts = report.counts(service);
        println!(
            "  {service}: {} error, {} warn, {} success",
            counts.error, counts.warn, counts.success
        );
    }
    Ok(())
}

fn handle_init(args: InitArgs) -> Result<()> {
    if args.out.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", args.out.display());
    }
    fs::write(&args.out, ServiceConfig::default_known().to_yaml()?)?;
    println!("Service config written to {}", args.out.display());
    Ok(())
}
