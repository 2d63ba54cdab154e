//! `civic-crawl`: run a crawl against the configured council domains.
//!
//! Exit codes: 0 normal completion, 1 configuration error, 2 cancelled,
//! 3 fatal internal error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use civic_crawler::fetch::HttpFetcher;
use civic_crawler::storage::{JsonlSink, NullSink, StorageSink};
use civic_crawler::{ConfigError, CrawlConfig, Orchestrator, RobotsCache, SeedRegistry};

/// How long cancelled workers get to drain before a hard stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(
    name = "civic-crawl",
    version,
    about = "Polite crawler and ingestion pipeline for council web properties"
)]
struct Cli {
    /// Restrict the run to hosts matching this glob (repeatable)
    #[arg(long = "domain")]
    domain: Vec<String>,

    /// Global cap on dequeued URLs
    #[arg(long = "max-urls")]
    max_urls: Option<usize>,

    /// Maximum link depth from a seed
    #[arg(long = "max-depth", default_value_t = 3)]
    max_depth: u32,

    /// Fetch worker count
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Minimum delay between fetches to one host, in milliseconds
    #[arg(long = "rate-delay", default_value_t = 2000)]
    rate_delay: u64,

    /// JSON seed file overriding the builtin registry
    #[arg(long = "seed-file")]
    seed_file: Option<PathBuf>,

    /// Exercise the pipeline without writing to storage
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Load the previous run's seen-set snapshot before starting
    #[arg(long)]
    resume: bool,
}

fn build_config(cli: &Cli) -> CrawlConfig {
    let mut config = CrawlConfig::new()
        .with_workers(cli.workers)
        .with_max_depth(cli.max_depth)
        .with_request_delay(Duration::from_millis(cli.rate_delay));
    if let Some(cap) = cli.max_urls {
        config = config.with_max_urls(cap);
    }
    for glob in &cli.domain {
        config = config.with_domain_filter(glob.clone());
    }
    config.dry_run = cli.dry_run;
    config.resume = cli.resume;
    config.with_env()
}

fn load_registry(cli: &Cli) -> Result<SeedRegistry, ConfigError> {
    match &cli.seed_file {
        Some(path) => SeedRegistry::load(path),
        None => Ok(SeedRegistry::builtin()),
    }
}

async fn run(cli: Cli) -> Result<ExitCode, anyhow::Error> {
    let config = build_config(&cli);

    let registry = match load_registry(&cli) {
        Ok(registry) => registry,
        Err(error) => {
            error!(error = %error, "configuration error");
            return Ok(ExitCode::from(1));
        }
    };

    let sink: Arc<dyn StorageSink> = if config.dry_run {
        info!("dry run: records will be discarded");
        Arc::new(NullSink::new())
    } else {
        Arc::new(
            JsonlSink::new(&config.data_dir)
                .with_context(|| format!("cannot open data dir {}", config.data_dir.display()))?,
        )
    };

    let fetcher = HttpFetcher::new(&config.user_agent, config.timeout, config.max_file_size)
        .context("cannot build HTTP client")?;
    let robots = Arc::new(RobotsCache::new(
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(config.user_agent.clone())
            .build()
            .context("cannot build robots client")?,
        config.user_agent.clone(),
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("cancellation requested, draining workers");
                cancel.cancel();
                tokio::time::sleep(SHUTDOWN_GRACE).await;
                error!("grace period elapsed, hard stop");
                std::process::exit(2);
            }
        });
    }

    info!(
        workers = config.workers,
        max_depth = config.max_depth,
        rate_delay_ms = config.request_delay.as_millis() as u64,
        dry_run = config.dry_run,
        "starting crawl"
    );

    let outcome = match Orchestrator::new(config, registry)
        .with_robots(robots)
        .run(fetcher, sink, cancel)
        .await
    {
        Ok(outcome) => outcome,
        Err(error) => {
            error!(error = %error, "configuration error");
            return Ok(ExitCode::from(1));
        }
    };

    info!(
        pages = outcome.pages_crawled,
        files = outcome.files_processed,
        records = outcome.records_written,
        unresolved_errors = outcome.report.errors.iter().filter(|e| !e.resolved).count(),
        "run complete"
    );
    for recommendation in &outcome.report.recommendations {
        info!(recommendation = %recommendation, "coverage recommendation");
    }

    Ok(if outcome.cancelled {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            error!(error = %error, "fatal internal error");
            ExitCode::from(3)
        }
    }
}
