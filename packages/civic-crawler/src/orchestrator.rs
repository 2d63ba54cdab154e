//! Crawl orchestration: the worker pool, the run lifecycle, and the
//! wiring between frontier, fetcher, pipeline, monitor and sink.
//!
//! N fetch workers run the fetch→classify→extract chain; heavy file
//! work is handed to a bounded pool of M file workers over a channel.
//! Only the orchestrator mutates the frontier; workers reach it
//! through one mutex. Cancellation is cooperative: workers finish the
//! item in hand, file workers drain their channel, and a partial
//! coverage report is still written.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::{classify, ResourceKind};
use crate::config::CrawlConfig;
use crate::error::{ConfigError, ErrorKind, ExtractError};
use crate::fetch::{Fetch, FetchResult, HostGate, PoliteFetcher, RetryPolicy, RobotsCache};
use crate::frontier::{Frontier, FrontierItem, MemoryFrontier};
use crate::links::{extract_links, meta_description, page_title};
use crate::monitor::{self, MonitorHandle};
use crate::pipeline::FilePipeline;
use crate::quality;
use crate::records::{Category, CoverageReport, PageRecord, StorageRecord};
use crate::registry::SeedRegistry;
use crate::storage::{SinkClient, SinkQueue, StorageSink};
use crate::validate::validate;

/// Idle poll interval while waiting for peers to finish.
const IDLE_WAIT: Duration = Duration::from_millis(25);

/// What a finished run looked like. The monitor handle stays live for
/// post-run citation queries.
#[derive(Debug)]
pub struct CrawlOutcome {
    pub pages_crawled: usize,
    pub files_processed: usize,
    pub records_written: usize,
    pub cancelled: bool,
    pub report: CoverageReport,
    pub monitor: MonitorHandle,
}

struct FileJob {
    fetched: FetchResult,
    parent_page_url: String,
    kind: ResourceKind,
    category: Category,
}

struct WorkerContext<F: Fetch> {
    config: CrawlConfig,
    frontier: Arc<StdMutex<MemoryFrontier>>,
    fetcher: Arc<PoliteFetcher<F>>,
    monitor: MonitorHandle,
    sink: SinkClient,
    file_tx: mpsc::Sender<FileJob>,
    cancel: CancellationToken,
    active: Arc<AtomicUsize>,
    allowed_hosts: Arc<HashSet<String>>,
    pages_crawled: Arc<AtomicUsize>,
}

pub struct Orchestrator {
    config: CrawlConfig,
    registry: SeedRegistry,
    robots: Option<Arc<RobotsCache>>,
}

impl Orchestrator {
    pub fn new(config: CrawlConfig, registry: SeedRegistry) -> Self {
        Self {
            config,
            registry,
            robots: None,
        }
    }

    /// Enforce robots.txt (production runs). Seeds disallowed by robots
    /// fail the run at startup.
    pub fn with_robots(mut self, robots: Arc<RobotsCache>) -> Self {
        self.robots = Some(robots);
        self
    }

    /// Run a crawl to completion or cancellation.
    pub async fn run<F>(
        self,
        fetcher: F,
        sink: Arc<dyn StorageSink>,
        cancel: CancellationToken,
    ) -> Result<CrawlOutcome, ConfigError>
    where
        F: Fetch + 'static,
    {
        let Orchestrator {
            mut config,
            mut registry,
            robots,
        } = self;
        config = config.with_env();
        registry.validate()?;
        if !config.domain_filters.is_empty() {
            let filters = config.clone();
            registry.retain_hosts(|host| filters.host_selected(host))?;
        }

        // robots.txt wins over explicit seeds.
        if let Some(robots) = &robots {
            for seed in registry.seeds() {
                if !robots.allowed(&seed.url).await {
                    return Err(ConfigError::SeedDisallowed { url: seed.url });
                }
            }
        }

        let allowed_hosts: Arc<HashSet<String>> = Arc::new(
            registry
                .allowed_hosts()
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
        );
        let quotas: HashMap<String, usize> = registry
            .entries
            .iter()
            .map(|e| (e.domain.to_ascii_lowercase(), e.max_urls))
            .collect();

        let mut frontier = MemoryFrontier::new(
            allowed_hosts.iter().cloned(),
            quotas,
            config.max_depth,
            config.max_urls,
        );
        if config.resume {
            match frontier.restore_seen(config.seen_snapshot_path()) {
                Ok(count) => info!(urls = count, "resumed seen-set snapshot"),
                Err(error) => warn!(error = %error, "no usable seen-set snapshot, starting fresh"),
            }
        }
        for seed in registry.seeds() {
            frontier.enqueue(seed);
        }
        let frontier = Arc::new(StdMutex::new(frontier));

        let monitor = monitor::spawn(registry.expected_table());

        let gate = HostGate::new(config.request_delay);
        let retry = RetryPolicy::new(config.max_attempts, config.retry_base_delay);
        let mut polite = PoliteFetcher::new(fetcher, gate, retry, monitor.clone());
        if let Some(robots) = robots {
            polite = polite.with_robots(robots);
        }
        let polite = Arc::new(polite);

        let queue = SinkQueue::spawn(sink, config.sink_queue_cap);

        let (file_tx, file_rx) = mpsc::channel::<FileJob>(config.file_workers.max(1) * 4);
        let file_rx = Arc::new(AsyncMutex::new(file_rx));

        let active = Arc::new(AtomicUsize::new(0));
        let pages_crawled = Arc::new(AtomicUsize::new(0));
        let files_processed = Arc::new(AtomicUsize::new(0));

        // File workers: bounded heavy-parse pool.
        let pipeline = Arc::new(FilePipeline::new(
            config.max_file_size,
            config.data_dir.clone(),
        ));
        let mut file_handles = Vec::new();
        for worker_id in 0..config.file_workers.max(1) {
            let file_rx = file_rx.clone();
            let pipeline = pipeline.clone();
            let monitor = monitor.clone();
            let sink = queue.client();
            let files_processed = files_processed.clone();
            file_handles.push(tokio::spawn(async move {
                loop {
                    let job = { file_rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    process_file_job(&pipeline, &monitor, &sink, job, &files_processed).await;
                }
                debug!(worker_id, "file worker stopped");
            }));
        }

        // Fetch workers.
        let mut worker_handles = Vec::new();
        for worker_id in 0..config.workers.max(1) {
            let ctx = WorkerContext {
                config: config.clone(),
                frontier: frontier.clone(),
                fetcher: polite.clone(),
                monitor: monitor.clone(),
                sink: queue.client(),
                file_tx: file_tx.clone(),
                cancel: cancel.clone(),
                active: active.clone(),
                allowed_hosts: allowed_hosts.clone(),
                pages_crawled: pages_crawled.clone(),
            };
            worker_handles.push(tokio::spawn(async move {
                fetch_worker(ctx).await;
                debug!(worker_id, "fetch worker stopped");
            }));
        }
        drop(file_tx);

        futures::future::join_all(worker_handles).await;
        futures::future::join_all(file_handles).await;

        // Snapshot the seen set so a later run can resume.
        {
            let frontier = frontier.lock().expect("frontier poisoned");
            if let Err(error) = frontier.snapshot_seen(config.seen_snapshot_path()) {
                warn!(error = %error, "could not persist seen-set snapshot");
            }
        }

        let report = monitor.report().await.unwrap_or_else(|| CoverageReport {
            run_id: uuid::Uuid::new_v4(),
            generated_at: Utc::now(),
            domain_stats: Vec::new(),
            coverage_metrics: Vec::new(),
            errors: Vec::new(),
            recommendations: Vec::new(),
            redirect_map: Vec::new(),
        });
        let final_client = queue.client();
        let _ = final_client
            .send(StorageRecord::CoverageReport(report.clone()))
            .await;
        drop(final_client);

        let records_written = queue.finish().await;
        let cancelled = cancel.is_cancelled();
        info!(
            pages = pages_crawled.load(Ordering::Relaxed),
            files = files_processed.load(Ordering::Relaxed),
            records = records_written,
            cancelled,
            "crawl finished"
        );

        Ok(CrawlOutcome {
            pages_crawled: pages_crawled.load(Ordering::Relaxed),
            files_processed: files_processed.load(Ordering::Relaxed),
            records_written,
            cancelled,
            report,
            monitor,
        })
    }
}

/// One fetch worker's loop. Exits when cancelled, or when the frontier
/// is empty and no peer is mid-item.
async fn fetch_worker<F: Fetch>(ctx: WorkerContext<F>) {
    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }
        // Backpressure: pause dequeues while the sink queue is saturated.
        ctx.sink.throttle().await;

        // Count ourselves busy before looking at the frontier: a peer
        // seeing an empty queue must not exit while we might still
        // enqueue discoveries.
        ctx.active.fetch_add(1, Ordering::SeqCst);
        let item = {
            let mut frontier = ctx.frontier.lock().expect("frontier poisoned");
            frontier.dequeue()
        };
        match item {
            Some(item) => {
                process_item(&ctx, item).await;
                ctx.active.fetch_sub(1, Ordering::SeqCst);
            }
            None => {
                let remaining = ctx.active.fetch_sub(1, Ordering::SeqCst) - 1;
                if remaining == 0 {
                    break;
                }
                tokio::time::sleep(IDLE_WAIT).await;
            }
        }
    }
}

async fn process_item<F: Fetch>(ctx: &WorkerContext<F>, item: FrontierItem) {
    let fetched = match ctx.fetcher.fetch_item(&item.url, item.category).await {
        Ok(fetched) => fetched,
        // Telemetry already emitted by the polite fetcher.
        Err(_) => return,
    };

    // A redirect may have moved us; never re-crawl the final URL, and
    // drop content that left the allowlist.
    if fetched.final_url != item.url {
        let mut frontier = ctx.frontier.lock().expect("frontier poisoned");
        frontier.mark_seen(&fetched.final_url);
    }
    let final_host = fetched.host().unwrap_or_default();
    if !ctx.allowed_hosts.contains(&final_host) {
        debug!(url = %fetched.final_url, "redirected off the allowlist, dropping");
        return;
    }

    match classify(&fetched) {
        ResourceKind::HtmlPage => process_html(ctx, &item, fetched).await,
        ResourceKind::Other => {
            debug!(url = %fetched.final_url, "unsupported resource kind, dropping");
        }
        kind => {
            let job = FileJob {
                parent_page_url: item
                    .discovered_from
                    .clone()
                    .unwrap_or_else(|| fetched.final_url.clone()),
                fetched,
                kind,
                category: item.category,
            };
            if ctx.file_tx.send(job).await.is_err() {
                warn!("file worker channel closed, dropping job");
            }
        }
    }
}

async fn process_html<F: Fetch>(ctx: &WorkerContext<F>, item: &FrontierItem, fetched: FetchResult) {
    let html = fetched.body_text();
    let page_url = fetched.final_url.clone();
    let host = fetched.host().unwrap_or_default();

    // All DOM work happens here, before any await: the parsed tree is
    // not Send.
    let title = page_title(&html);
    let description = meta_description(&html);
    let score = quality::score(&html, &page_url, item.category, Utc::now().date_naive());
    let base = match url::Url::parse(&page_url) {
        Ok(base) => base,
        Err(_) => return,
    };
    let links = extract_links(&html, &base, &ctx.allowed_hosts);
    let planning = if host.contains("paplanning")
        || matches!(
            item.category,
            Category::Planning | Category::PlanningApplications
        ) {
        crate::extract::planning::extract_planning_page(&html, &page_url)
    } else {
        None
    };

    let page = PageRecord {
        url: page_url.clone(),
        parent_url: item.discovered_from.clone(),
        title,
        description,
        category: item.category,
        content_length: fetched.bytes.len(),
        quality_score: score.overall_score,
        crawled_at: fetched.fetched_at,
    };
    match validate(StorageRecord::Page(page)) {
        Ok(validated) => {
            if ctx.sink.send(validated.record).await.is_ok() {
                ctx.monitor.record_stored(&host, item.category);
                ctx.pages_crawled.fetch_add(1, Ordering::Relaxed);
            }
        }
        Err(error) => {
            ctx.monitor.log_error(
                ErrorKind::ParsingError,
                &page_url,
                &error.to_string(),
                item.category,
            );
        }
    }

    if let Some(application) = planning {
        match validate(StorageRecord::PlanningApplication(application)) {
            Ok(validated) => {
                if ctx.sink.send(validated.record).await.is_ok() {
                    ctx.monitor.record_stored(&host, Category::PlanningApplications);
                }
            }
            Err(error) => {
                ctx.monitor.log_error(
                    ErrorKind::ParsingError,
                    &page_url,
                    &error.to_string(),
                    Category::PlanningApplications,
                );
            }
        }
    }

    if item.depth >= ctx.config.max_depth {
        return;
    }
    let mut frontier = ctx.frontier.lock().expect("frontier poisoned");
    for link in links {
        frontier.enqueue(FrontierItem::discovered(
            link.url,
            page_url.clone(),
            item.depth + 1,
            link.category,
            link.priority,
        ));
    }
}

async fn process_file_job(
    pipeline: &FilePipeline,
    monitor: &MonitorHandle,
    sink: &SinkClient,
    job: FileJob,
    files_processed: &AtomicUsize,
) {
    let file_url = job.fetched.final_url.clone();
    let host = job.fetched.host().unwrap_or_default();

    match pipeline.process(&job.fetched, &job.parent_page_url, job.kind, job.category) {
        Ok(processed) => {
            // Citation edge first, then the artifact, then its records:
            // downstream joins never dangle.
            monitor.record_citation(&processed.artifact.file_url, &job.parent_page_url);

            let artifact = StorageRecord::FileArtifact(processed.artifact);
            match validate(artifact) {
                Ok(validated) => {
                    if sink.send(validated.record).await.is_err() {
                        return;
                    }
                    monitor.record_stored(&host, job.category);
                }
                Err(error) => {
                    monitor.log_error(
                        ErrorKind::ParsingError,
                        &file_url,
                        &error.to_string(),
                        job.category,
                    );
                    return;
                }
            }

            for record in processed.records {
                if sink.send(record).await.is_err() {
                    return;
                }
                monitor.record_stored(&host, job.category);
            }
            for error in &processed.invalid {
                monitor.log_error(
                    ErrorKind::ParsingError,
                    &error.source_url,
                    &error.to_string(),
                    job.category,
                );
            }
            if processed.parse_error_count > 0 {
                monitor.log_error(
                    ErrorKind::ParsingError,
                    &file_url,
                    &format!(
                        "{} rows missing required fields",
                        processed.parse_error_count
                    ),
                    job.category,
                );
            }
            files_processed.fetch_add(1, Ordering::Relaxed);
        }
        Err(error) => {
            let kind = match &error {
                ExtractError::Io(_) => ErrorKind::ServerError,
                _ => ErrorKind::ParsingError,
            };
            monitor.log_error(kind, &file_url, &error.to_string(), job.category);
        }
    }
}
