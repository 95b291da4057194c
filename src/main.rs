use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::{LogConfig, LogFormat, TollgateConfig};
use tollgate::dispatch::{DispatchSummary, Dispatcher};
use tollgate::{AsyncThrottler, Throttler, TimeWindow};

/// Waits shorter than this are reported as immediate admissions.
const DELAY_THRESHOLD: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// One OS thread per worker, blocking throttler
    Threads,
    /// One tokio task per worker, async throttler
    Tasks,
}

/// Push simulated submissions through a fixed-window throttler.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum admissions per window
    #[arg(long)]
    limit: Option<u32>,

    /// Window unit (millisecond, second, minute, hour, day)
    #[arg(long)]
    unit: Option<TimeWindow>,

    /// Number of concurrent workers
    #[arg(long)]
    workers: Option<usize>,

    /// Number of submissions to send
    #[arg(long)]
    submissions: Option<usize>,

    /// Upper bound of simulated call latency in milliseconds
    #[arg(long)]
    max_latency_ms: Option<u64>,

    /// Worker model
    #[arg(long, value_enum, default_value_t = Mode::Threads)]
    mode: Mode,

    /// Log format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Print every submission report as JSON on stdout
    #[arg(long)]
    report: bool,
}

impl Cli {
    fn apply(&self, config: &mut TollgateConfig) {
        if let Some(limit) = self.limit {
            config.throttle.limit = limit;
        }
        if let Some(unit) = self.unit {
            config.throttle.window = unit;
        }
        if let Some(workers) = self.workers {
            config.dispatch.workers = workers;
        }
        if let Some(submissions) = self.submissions {
            config.dispatch.submissions = submissions;
        }
        if let Some(max_latency_ms) = self.max_latency_ms {
            config.dispatch.max_latency_ms = max_latency_ms;
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
    }
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match log.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TollgateConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    init_tracing(&config.log);

    info!("Starting tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        limit = config.throttle.limit,
        window = ?config.throttle.window,
        mode = ?cli.mode,
        "Configuration loaded"
    );

    let dispatcher = Dispatcher::new(config.dispatch.clone())?;
    let reports = match cli.mode {
        Mode::Threads => {
            let throttler = Throttler::from_config(&config.throttle)?;
            tokio::task::spawn_blocking(move || dispatcher.run_threads(&throttler)).await??
        }
        Mode::Tasks => {
            let throttler = AsyncThrottler::from_config(&config.throttle)?;
            dispatcher.run_tasks(&throttler).await?
        }
    };

    let summary = DispatchSummary::from_reports(&reports, DELAY_THRESHOLD);
    info!(
        total = summary.total,
        delayed = summary.delayed,
        max_wait_ms = summary.max_wait_ms,
        "Dispatch finished"
    );

    if cli.report {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    Ok(())
}
