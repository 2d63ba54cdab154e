//! Politeness decorator over any [`Fetch`] implementation.
//!
//! Composes, in order: robots.txt check, per-host gate, retry with
//! exponential backoff, and telemetry emission. Exactly one monitor
//! event (success or error) is produced per `fetch` call.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResultT};
use crate::fetch::gate::HostGate;
use crate::fetch::retry::RetryPolicy;
use crate::fetch::robots::RobotsCache;
use crate::fetch::{Fetch, FetchResult};
use crate::monitor::MonitorHandle;
use crate::records::Category;

pub struct PoliteFetcher<F: Fetch> {
    inner: F,
    gate: HostGate,
    robots: Option<Arc<RobotsCache>>,
    retry: RetryPolicy,
    monitor: MonitorHandle,
}

impl<F: Fetch> PoliteFetcher<F> {
    pub fn new(inner: F, gate: HostGate, retry: RetryPolicy, monitor: MonitorHandle) -> Self {
        Self {
            inner,
            gate,
            robots: None,
            retry,
            monitor,
        }
    }

    /// Enable robots.txt enforcement.
    pub fn with_robots(mut self, robots: Arc<RobotsCache>) -> Self {
        self.robots = Some(robots);
        self
    }

    fn host_of(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
            .unwrap_or_default()
    }

    /// Fetch with politeness applied, reporting against `category`.
    pub async fn fetch_item(&self, url: &str, category: Category) -> FetchResultT<FetchResult> {
        if let Some(robots) = &self.robots {
            if !robots.allowed(url).await {
                let error = FetchError::RobotsDisallowed {
                    url: url.to_string(),
                };
                self.monitor
                    .log_error(error.kind(), url, &error.to_string(), category);
                return Err(error);
            }
        }

        let host = Self::host_of(url);
        let mut attempt: u32 = 1;
        loop {
            // The permit spans the request so in-flight fetches to one
            // host never overlap; dropping it stamps the completion time.
            let started = Instant::now();
            let outcome = {
                let _permit = self.gate.acquire(&host).await;
                self.inner.fetch(url).await
            };

            match outcome {
                Ok(mut result) => {
                    result.attempt = attempt;
                    result.response_time = started.elapsed();
                    for (from, to) in &result.redirects {
                        self.monitor.log_redirect(from, to);
                    }
                    self.monitor
                        .log_success(&result.final_url, result.response_time, category);
                    return Ok(result);
                }
                Err(error) if self.retry.should_retry(&error, attempt) => {
                    let backoff = self.retry.backoff(attempt);
                    debug!(
                        url = %url,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(backoff + jitter(self.retry.jitter_cap(), attempt)).await;
                    attempt += 1;
                }
                Err(error) => {
                    warn!(url = %url, attempt, error = %error, "fetch failed");
                    self.monitor
                        .log_error(error.kind(), url, &error.to_string(), category);
                    return Err(error);
                }
            }
        }
    }
}

#[async_trait]
impl<F: Fetch> Fetch for PoliteFetcher<F> {
    async fn fetch(&self, url: &str) -> FetchResultT<FetchResult> {
        self.fetch_item(url, Category::Other).await
    }
}

/// Deterministic sub-second jitter derived from the attempt number.
fn jitter(cap: std::time::Duration, attempt: u32) -> std::time::Duration {
    if cap.is_zero() {
        return std::time::Duration::ZERO;
    }
    let millis = (attempt as u64).wrapping_mul(389) % (cap.as_millis() as u64 + 1);
    std::time::Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::robots::RobotsTxt;
    use crate::monitor;
    use crate::records::Category;
    use crate::testing::MockFetcher;
    use std::time::Duration;

    fn polite(mock: MockFetcher, monitor: MonitorHandle) -> PoliteFetcher<MockFetcher> {
        PoliteFetcher::new(
            mock,
            HostGate::without_jitter(Duration::from_millis(1)),
            RetryPolicy::immediate(3),
            monitor,
        )
    }

    #[tokio::test]
    async fn success_emits_one_telemetry_event() {
        let handle = monitor::spawn(vec![]);
        let mock = MockFetcher::new().with_html("https://www.bolton.gov.uk/", "<html></html>");
        let fetcher = polite(mock, handle.clone());

        fetcher
            .fetch_item("https://www.bolton.gov.uk/", Category::Services)
            .await
            .unwrap();

        let report = handle.report().await.unwrap();
        let stats = &report.domain_stats[0];
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.successful_requests, 1);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let handle = monitor::spawn(vec![]);
        let mock = MockFetcher::new().with_status("https://www.bolton.gov.uk/gone", 404);
        let fetcher = polite(mock, handle.clone());

        let error = fetcher
            .fetch_item("https://www.bolton.gov.uk/gone", Category::Services)
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::NotFound { .. }));
        assert_eq!(fetcher.inner.calls("https://www.bolton.gov.uk/gone"), 1);

        let report = handle.report().await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].retry_count, 1);
    }

    #[tokio::test]
    async fn server_error_retried_three_times() {
        let handle = monitor::spawn(vec![]);
        let mock = MockFetcher::new().with_status("https://www.bolton.gov.uk/flaky", 503);
        let fetcher = polite(mock, handle.clone());

        let error = fetcher
            .fetch_item("https://www.bolton.gov.uk/flaky", Category::Services)
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::ServerError { .. }));
        assert_eq!(fetcher.inner.calls("https://www.bolton.gov.uk/flaky"), 3);

        // Final failure logs a single error event.
        let report = handle.report().await.unwrap();
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn recovery_after_transient_failure() {
        let handle = monitor::spawn(vec![]);
        let mock = MockFetcher::new().with_flaky_html(
            "https://www.bolton.gov.uk/eventually",
            "<html>ok</html>",
            2,
        );
        let fetcher = polite(mock, handle.clone());

        let result = fetcher
            .fetch_item("https://www.bolton.gov.uk/eventually", Category::Services)
            .await
            .unwrap();
        assert_eq!(result.attempt, 3);
    }

    #[tokio::test]
    async fn robots_disallow_blocks_and_logs() {
        let handle = monitor::spawn(vec![]);
        let mock = MockFetcher::new().with_html("https://www.bolton.gov.uk/private/x", "<html>");
        let robots = RobotsCache::new(reqwest::Client::new(), "CivicTransparencyBot");
        robots.preload(
            "www.bolton.gov.uk",
            RobotsTxt::parse("User-agent: *\nDisallow: /private/\n"),
        );
        let fetcher = polite(mock, handle.clone()).with_robots(Arc::new(robots));

        let error = fetcher
            .fetch_item("https://www.bolton.gov.uk/private/x", Category::Services)
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::RobotsDisallowed { .. }));
        assert_eq!(fetcher.inner.calls("https://www.bolton.gov.uk/private/x"), 0);

        let report = handle.report().await.unwrap();
        assert_eq!(report.errors[0].kind, crate::error::ErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn redirects_reach_the_redirect_map() {
        let handle = monitor::spawn(vec![]);
        let mock = MockFetcher::new().with_redirect(
            "https://www.bolton.gov.uk/old",
            "https://www.bolton.gov.uk/new",
            "<html>moved</html>",
        );
        let fetcher = polite(mock, handle.clone());

        let result = fetcher
            .fetch_item("https://www.bolton.gov.uk/old", Category::Services)
            .await
            .unwrap();
        assert_eq!(result.final_url, "https://www.bolton.gov.uk/new");

        let report = handle.report().await.unwrap();
        assert_eq!(
            report.redirect_map,
            vec![(
                "https://www.bolton.gov.uk/old".to_string(),
                "https://www.bolton.gov.uk/new".to_string()
            )]
        );
    }
}
