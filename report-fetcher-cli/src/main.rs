//! report-fetcher CLI
//!
//! Downloads the monthly reports from the remote system, now or on a daily schedule.
//!
//! Usage:
//!   report-fetcher run                     # Fetch the current month and the two before it
//!   report-fetcher periods --date 2024-03-15
//!   report-fetcher finalize --label MAR2024
//!   report-fetcher daemon --at 08:30       # Interactive shell with a daily trigger

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use report_fetcher::config::{self, DEFAULT_ENV_FILE};
use report_fetcher::{
    compute_periods, derive_range, format_label, is_notification, ChromiumFactory, Credentials,
    DownloadFinalizer, FailurePolicy, FetcherConfig, LogSink, RunOrchestrator, ScheduleEntry,
};
use tracing::{debug, info};

mod daemon;

const ENV_DOWNLOAD_DIR: &str = "REPORT_DOWNLOAD_DIR";

#[derive(Parser, Debug)]
#[command(name = "report-fetcher")]
#[command(about = "Fetches monthly reports through a browser session")]
struct Cli {
    /// Env file holding the REPORT_* credentials
    #[clap(long, global = true, default_value = DEFAULT_ENV_FILE)]
    env_file: PathBuf,

    /// JSON file with fetcher settings (selectors, timings, policy)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Where the browser saves downloads
    #[clap(long, global = true, env = ENV_DOWNLOAD_DIR)]
    download_dir: Option<PathBuf>,

    /// Chrome or Chromium executable to launch
    #[clap(long, global = true)]
    browser: Option<PathBuf>,

    /// Show the browser window
    #[clap(long, global = true)]
    headed: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the current month and the two before it, once
    Run {
        /// Keep going with the next month when one fails
        #[clap(long)]
        continue_on_failure: bool,
    },
    /// Show the months a run on DATE would fetch
    Periods {
        /// Reference day (defaults to today)
        #[clap(long)]
        date: Option<NaiveDate>,
        /// Print as JSON
        #[clap(long)]
        json: bool,
    },
    /// Rename the newest file in the download directory to LABEL
    Finalize {
        #[clap(long)]
        label: String,
    },
    /// Interactive shell: run, schedule HH:MM, cancel, status, quit
    Daemon {
        /// Arm the daily trigger at startup
        #[clap(long)]
        at: Option<ScheduleEntry>,
    },
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chromiumoxide=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Prints `[HH:MM:SS] line`; failures and completions are also raised on stderr.
fn shell_sink() -> LogSink {
    LogSink::new(|line| {
        println!("[{}] {line}", Local::now().format("%H:%M:%S"));
        if is_notification(line) {
            eprintln!("🔔 {line}");
        }
    })
}

fn load_config(cli: &Cli) -> Result<FetcherConfig> {
    let mut config = match &cli.config {
        Some(path) => FetcherConfig::from_json_file(path)?,
        None => FetcherConfig::default(),
    };
    // The env file may define the download directory too.
    let download_dir = cli
        .download_dir
        .clone()
        .or_else(|| std::env::var_os(ENV_DOWNLOAD_DIR).map(PathBuf::from));
    if let Some(dir) = download_dir {
        config.download_dir = dir;
    }
    if let Some(browser) = &cli.browser {
        config.browser_executable = Some(browser.clone());
    }
    if cli.headed {
        config.headless = false;
    }
    Ok(config)
}

fn build_orchestrator(config: &FetcherConfig, sink: LogSink) -> Result<RunOrchestrator> {
    config
        .prepare()
        .with_context(|| format!("download directory {}", config.download_dir.display()))?;
    let credentials = Credentials::from_env()
        .context("set the REPORT_* variables in the env file or the environment")?;
    Ok(RunOrchestrator::new(config, credentials, Arc::new(ChromiumFactory), sink))
}

fn print_periods(date: NaiveDate, json: bool) -> Result<()> {
    let periods = compute_periods(date);
    if json {
        let rows: Vec<_> = periods
            .iter()
            .map(|period| {
                serde_json::json!({
                    "label": format_label(period),
                    "month": period.display_name(),
                    "is_current_month": period.is_current_month,
                    "range": derive_range(period, date),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for period in &periods {
        let range = derive_range(period, date);
        println!(
            "{:<8} {:<15} {} .. {}",
            format_label(period),
            period.display_name(),
            range.start.format("%d/%m/%Y"),
            range.end.format("%d/%m/%Y"),
        );
    }
    Ok(())
}

async fn run_once(config: FetcherConfig, continue_on_failure: bool) -> Result<()> {
    let sink = shell_sink();
    let mut orchestrator = build_orchestrator(&config, sink)?;
    if continue_on_failure {
        orchestrator = orchestrator.with_policy(FailurePolicy::ContinueOnFailure);
    }
    let report = orchestrator.run_current().await?;
    for path in report.artifacts() {
        info!(path = %path.display(), "Report saved");
    }
    if !report.is_success() {
        let failed: Vec<_> = report.failures().map(|o| o.label.as_str()).collect();
        bail!(
            "{} of {} months failed: {}",
            failed.len(),
            report.outcomes.len(),
            failed.join(", ")
        );
    }
    Ok(())
}

async fn dispatch(cli: Cli) -> Result<()> {
    if config::load_env_file(&cli.env_file)? {
        debug!(path = %cli.env_file.display(), "Loaded env file");
    }
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run { continue_on_failure } => run_once(config, continue_on_failure).await,
        Commands::Periods { date, json } => {
            print_periods(date.unwrap_or_else(|| Local::now().date_naive()), json)
        }
        Commands::Finalize { label } => {
            config.prepare()?;
            let path = DownloadFinalizer::new(shell_sink())
                .finalize(&config.download_dir, &label)?;
            println!("{}", path.display());
            Ok(())
        }
        Commands::Daemon { at } => {
            let orchestrator = build_orchestrator(&config, shell_sink())?;
            daemon::run(Arc::new(orchestrator), shell_sink(), at).await
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        eprintln!("❌ {e:#}");
        std::process::exit(1);
    }
}
