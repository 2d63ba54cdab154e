//! Run configuration for a single crawl.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default User-Agent when `CRAWL_USER_AGENT` is unset.
pub const DEFAULT_USER_AGENT: &str =
    "CivicTransparencyBot/1.0 (+https://github.com/civic-transparency/civic-crawler)";

/// Configuration for a crawl run.
///
/// Values come from CLI flags with environment overrides
/// (`CRAWL_USER_AGENT`, `CRAWL_DATA_DIR`, `CRAWL_MAX_FILE_SIZE_MB`);
/// the builder methods exist for tests and embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Fetch worker count
    pub workers: usize,

    /// Heavy-file worker count (PDF, large CSV)
    pub file_workers: usize,

    /// Maximum link depth from a seed
    pub max_depth: u32,

    /// Global cap on dequeued URLs (None = per-host quotas only)
    pub max_urls: Option<usize>,

    /// Minimum delay between consecutive fetches to one host
    pub request_delay: Duration,

    /// Per-fetch timeout
    pub timeout: Duration,

    /// Retry attempts for transient failures
    pub max_attempts: u32,

    /// Base delay for exponential backoff
    pub retry_base_delay: Duration,

    /// Largest accepted Content-Length, in bytes
    pub max_file_size: u64,

    /// User-Agent header sent on every request
    pub user_agent: String,

    /// Scratch directory for downloaded files and run artifacts
    pub data_dir: PathBuf,

    /// Soft cap on the sink write queue before the frontier pauses
    pub sink_queue_cap: usize,

    /// Restrict the run to hosts matching these globs (empty = all seeds)
    pub domain_filters: Vec<String>,

    /// Exercise the pipeline without writing to storage
    pub dry_run: bool,

    /// Load the previous run's seen-set snapshot before starting
    pub resume: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            file_workers: 2,
            max_depth: 3,
            max_urls: None,
            request_delay: Duration::from_millis(2000),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(2),
            max_file_size: 50 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            data_dir: PathBuf::from("./crawl-data"),
            sink_queue_cap: 1024,
            domain_filters: Vec::new(),
            dry_run: false,
            resume: false,
        }
    }
}

impl CrawlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `CRAWL_USER_AGENT`, `CRAWL_DATA_DIR` and
    /// `CRAWL_MAX_FILE_SIZE_MB` from the process environment.
    pub fn with_env(mut self) -> Self {
        if let Ok(ua) = std::env::var("CRAWL_USER_AGENT") {
            if !ua.is_empty() {
                self.user_agent = ua;
            }
        }
        if let Ok(dir) = std::env::var("CRAWL_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(mb) = std::env::var("CRAWL_MAX_FILE_SIZE_MB") {
            if let Ok(mb) = mb.parse::<u64>() {
                self.max_file_size = mb * 1024 * 1024;
            }
        }
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_urls(mut self, cap: usize) -> Self {
        self.max_urls = Some(cap);
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn with_domain_filter(mut self, glob: impl Into<String>) -> Self {
        self.domain_filters.push(glob.into());
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Whether a host passes the `--domain` filters.
    ///
    /// Globs support a single `*` wildcard; no filters means everything
    /// passes.
    pub fn host_selected(&self, host: &str) -> bool {
        if self.domain_filters.is_empty() {
            return true;
        }
        self.domain_filters.iter().any(|glob| glob_match(glob, host))
    }

    /// Path of the seen-set snapshot used by `--resume`.
    pub fn seen_snapshot_path(&self) -> PathBuf {
        self.data_dir.join("seen-urls.json")
    }
}

fn glob_match(glob: &str, host: &str) -> bool {
    match glob.split_once('*') {
        None => glob.eq_ignore_ascii_case(host),
        Some((prefix, suffix)) => {
            let host = host.to_ascii_lowercase();
            host.starts_with(&prefix.to_ascii_lowercase())
                && host.ends_with(&suffix.to_ascii_lowercase())
                && host.len() >= prefix.len() + suffix.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = CrawlConfig::default();
        assert_eq!(config.workers, 8);
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.request_delay, Duration::from_millis(2000));
        assert_eq!(config.max_file_size, 50 * 1024 * 1024);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.sink_queue_cap, 1024);
    }

    #[test]
    fn domain_filters_glob() {
        let config = CrawlConfig::new().with_domain_filter("*.bolton.gov.uk");
        assert!(config.host_selected("www.bolton.gov.uk"));
        assert!(config.host_selected("paplanning.bolton.gov.uk"));
        assert!(!config.host_selected("bolton.moderngov.co.uk"));

        let exact = CrawlConfig::new().with_domain_filter("bolton.moderngov.co.uk");
        assert!(exact.host_selected("bolton.moderngov.co.uk"));
        assert!(!exact.host_selected("www.bolton.gov.uk"));
    }

    #[test]
    fn no_filters_selects_everything() {
        let config = CrawlConfig::default();
        assert!(config.host_selected("anything.example.org"));
    }
}
