//! Coverage monitor: per-domain statistics, the error log, the redirect
//! map, the citation ledger, and the end-of-run coverage report.
//!
//! All state is owned by a single monitor task; workers hold a cloneable
//! [`MonitorHandle`] and send telemetry messages over a channel. The
//! report is a request/response over a oneshot.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::citations::CitationLedger;
use crate::error::ErrorKind;
use crate::records::{
    Category, CitationEdge, CoverageMetric, CoverageReport, CrawlError, DomainStats,
};

/// Success rate below which a domain draws an investigation note.
const LOW_SUCCESS_RATE: f64 = 0.6;
/// Mean response time above which timeout tuning is suggested.
const SLOW_RESPONSE_MS: f64 = 10_000.0;
/// 404 count per domain above which seeds look stale.
const STALE_SEED_404S: usize = 20;
/// Redirect count above which seeds should be re-pointed.
const RELOCATED_REDIRECTS: usize = 20;
/// Coverage below this draws a low-coverage note.
const LOW_COVERAGE_PCT: f64 = 80.0;
/// Coverage below this additionally suggests expanding scope.
const EXPAND_SCOPE_PCT: f64 = 50.0;

/// Telemetry messages accepted by the monitor task.
#[derive(Debug)]
pub enum MonitorMsg {
    Success {
        url: String,
        response_time: Duration,
        category: Category,
    },
    Error {
        kind: ErrorKind,
        url: String,
        message: String,
        category: Category,
    },
    Redirect {
        from: String,
        to: String,
    },
    /// A validated record reached the sink; feeds actual-count coverage
    RecordStored {
        domain: String,
        category: Category,
    },
    CitationEdge {
        file_url: String,
        parent_page_url: String,
    },
    MarkResolved {
        id: String,
    },
    EdgesForFile {
        file_url: String,
        reply: oneshot::Sender<Vec<CitationEdge>>,
    },
    FilesForPage {
        page_url: String,
        reply: oneshot::Sender<Vec<CitationEdge>>,
    },
    Report {
        reply: oneshot::Sender<CoverageReport>,
    },
}

/// Cloneable sender side of the monitor.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<MonitorMsg>,
}

impl MonitorHandle {
    pub fn log_success(&self, url: &str, response_time: Duration, category: Category) {
        let _ = self.tx.send(MonitorMsg::Success {
            url: url.to_string(),
            response_time,
            category,
        });
    }

    pub fn log_error(&self, kind: ErrorKind, url: &str, message: &str, category: Category) {
        let _ = self.tx.send(MonitorMsg::Error {
            kind,
            url: url.to_string(),
            message: message.to_string(),
            category,
        });
    }

    pub fn log_redirect(&self, from: &str, to: &str) {
        let _ = self.tx.send(MonitorMsg::Redirect {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    pub fn record_stored(&self, domain: &str, category: Category) {
        let _ = self.tx.send(MonitorMsg::RecordStored {
            domain: domain.to_string(),
            category,
        });
    }

    pub fn record_citation(&self, file_url: &str, parent_page_url: &str) {
        let _ = self.tx.send(MonitorMsg::CitationEdge {
            file_url: file_url.to_string(),
            parent_page_url: parent_page_url.to_string(),
        });
    }

    pub fn mark_resolved(&self, id: &str) {
        let _ = self.tx.send(MonitorMsg::MarkResolved { id: id.to_string() });
    }

    /// Citation edges whose file URL matches.
    pub async fn edges_for_file(&self, file_url: &str) -> Vec<CitationEdge> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(MonitorMsg::EdgesForFile {
                file_url: file_url.to_string(),
                reply,
            })
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Files cited by a page.
    pub async fn files_for_page(&self, page_url: &str) -> Vec<CitationEdge> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(MonitorMsg::FilesForPage {
                page_url: page_url.to_string(),
                reply,
            })
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Snapshot report of everything observed so far.
    pub async fn report(&self) -> Option<CoverageReport> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(MonitorMsg::Report { reply }).ok()?;
        rx.await.ok()
    }
}

/// The monitor's owned state. Separable from the task for direct use in
/// tests.
pub struct CoverageState {
    run_id: uuid::Uuid,
    domains: HashMap<String, DomainStats>,
    errors: HashMap<String, CrawlError>,
    redirects: Vec<(String, String)>,
    citations: CitationLedger,
    stored: HashMap<(String, Category), u64>,
    expected: Vec<(String, Category, u64)>,
}

impl CoverageState {
    pub fn new(expected: Vec<(String, Category, u64)>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            domains: HashMap::new(),
            errors: HashMap::new(),
            redirects: Vec::new(),
            citations: CitationLedger::new(),
            stored: HashMap::new(),
            expected,
        }
    }

    fn domain_of(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn log_success(&mut self, url: &str, response_time: Duration, _category: Category) {
        let domain = Self::domain_of(url);
        let stats = self
            .domains
            .entry(domain.clone())
            .or_insert_with(|| DomainStats::new(domain));
        stats.total_requests += 1;
        stats.successful_requests += 1;
        stats.success_rate = stats.successful_requests as f64 / stats.total_requests as f64;
        let sample = response_time.as_millis() as f64;
        let n = stats.successful_requests as f64;
        stats.avg_response_time_ms += (sample - stats.avg_response_time_ms) / n;
        stats.last_crawled = Some(Utc::now());
    }

    pub fn log_error(&mut self, kind: ErrorKind, url: &str, message: &str, category: Category) {
        let domain = Self::domain_of(url);
        let stats = self
            .domains
            .entry(domain.clone())
            .or_insert_with(|| DomainStats::new(domain.clone()));
        stats.total_requests += 1;
        stats.failed_requests += 1;
        stats.success_rate = stats.successful_requests as f64 / stats.total_requests as f64;
        stats.last_crawled = Some(Utc::now());
        stats.common_errors.insert(kind.as_str().to_string());

        let id = CrawlError::make_id(&domain, kind, url);
        self.errors
            .entry(id.clone())
            .and_modify(|e| {
                e.retry_count += 1;
                e.message = message.to_string();
                e.timestamp = Utc::now();
                e.resolved = false;
            })
            .or_insert_with(|| CrawlError {
                id,
                kind,
                url: url.to_string(),
                message: message.to_string(),
                domain,
                category,
                timestamp: Utc::now(),
                retry_count: 1,
                resolved: false,
            });
    }

    pub fn log_redirect(&mut self, from: &str, to: &str) {
        self.redirects.push((from.to_string(), to.to_string()));
    }

    pub fn record_stored(&mut self, domain: &str, category: Category) {
        *self
            .stored
            .entry((domain.to_ascii_lowercase(), category))
            .or_insert(0) += 1;
    }

    pub fn record_citation(&mut self, file_url: &str, parent_page_url: &str) {
        self.citations.record_edge(file_url, parent_page_url);
    }

    pub fn mark_resolved(&mut self, id: &str) {
        if let Some(error) = self.errors.get_mut(id) {
            error.resolved = true;
        }
    }

    pub fn citations(&self) -> &CitationLedger {
        &self.citations
    }

    pub fn domain_stats(&self, domain: &str) -> Option<&DomainStats> {
        self.domains.get(domain)
    }

    pub fn error(&self, id: &str) -> Option<&CrawlError> {
        self.errors.get(id)
    }

    /// Build the report from current state.
    pub fn report(&self) -> CoverageReport {
        let mut domain_stats: Vec<DomainStats> = self.domains.values().cloned().collect();
        domain_stats.sort_by(|a, b| a.domain.cmp(&b.domain));

        // Unresolved first, worst offenders on top.
        let mut errors: Vec<CrawlError> = self.errors.values().cloned().collect();
        errors.sort_by(|a, b| {
            a.resolved
                .cmp(&b.resolved)
                .then(b.retry_count.cmp(&a.retry_count))
                .then(a.url.cmp(&b.url))
        });

        let mut recommendations = Vec::new();

        for stats in &domain_stats {
            if stats.total_requests > 0 && stats.success_rate < LOW_SUCCESS_RATE {
                recommendations.push(format!(
                    "Investigate politeness or authentication for {} (success rate {:.0}%)",
                    stats.domain,
                    stats.success_rate * 100.0
                ));
            }
            if stats.avg_response_time_ms > SLOW_RESPONSE_MS {
                recommendations.push(format!(
                    "Consider timeout tuning for {} (mean response {:.1}s)",
                    stats.domain,
                    stats.avg_response_time_ms / 1000.0
                ));
            }
            let not_found = self
                .errors
                .values()
                .filter(|e| e.domain == stats.domain && e.kind == ErrorKind::NotFound)
                .count();
            if not_found > STALE_SEED_404S {
                recommendations.push(format!(
                    "Refresh seed URLs for {} ({} pages returned 404)",
                    stats.domain, not_found
                ));
            }
        }

        if self.redirects.len() > RELOCATED_REDIRECTS {
            recommendations.push(format!(
                "Update seeds to new locations ({} redirects mapped)",
                self.redirects.len()
            ));
        }

        let mut coverage_metrics = Vec::new();
        for (domain, category, expected_count) in &self.expected {
            let actual_count = self
                .stored
                .get(&(domain.to_ascii_lowercase(), *category))
                .copied()
                .unwrap_or(0);
            let coverage_percentage = if *expected_count == 0 {
                100.0
            } else {
                (actual_count as f64 / *expected_count as f64 * 100.0).min(100.0)
            };

            let mut metric_recommendations = Vec::new();
            if coverage_percentage < LOW_COVERAGE_PCT {
                metric_recommendations
                    .push(format!("Low coverage detected for {}.", category));
            }
            if coverage_percentage < EXPAND_SCOPE_PCT {
                metric_recommendations.push(format!(
                    "Expand crawl scope for {} on {}.",
                    category, domain
                ));
            }
            recommendations.extend(metric_recommendations.iter().cloned());

            let issues: Vec<CrawlError> = errors
                .iter()
                .filter(|e| !e.resolved && e.domain == *domain && e.category == *category)
                .cloned()
                .collect();

            coverage_metrics.push(CoverageMetric {
                domain: domain.clone(),
                category: *category,
                data_type: "records".to_string(),
                expected_count: *expected_count,
                actual_count,
                coverage_percentage,
                last_crawled: self.domains.get(domain).and_then(|d| d.last_crawled),
                issues,
                recommendations: metric_recommendations,
            });
        }

        CoverageReport {
            run_id: self.run_id,
            generated_at: Utc::now(),
            domain_stats,
            coverage_metrics,
            errors,
            recommendations,
            redirect_map: self.redirects.clone(),
        }
    }

    fn handle(&mut self, msg: MonitorMsg) {
        match msg {
            MonitorMsg::Success {
                url,
                response_time,
                category,
            } => self.log_success(&url, response_time, category),
            MonitorMsg::Error {
                kind,
                url,
                message,
                category,
            } => self.log_error(kind, &url, &message, category),
            MonitorMsg::Redirect { from, to } => self.log_redirect(&from, &to),
            MonitorMsg::RecordStored { domain, category } => {
                self.record_stored(&domain, category)
            }
            MonitorMsg::CitationEdge {
                file_url,
                parent_page_url,
            } => self.record_citation(&file_url, &parent_page_url),
            MonitorMsg::MarkResolved { id } => self.mark_resolved(&id),
            MonitorMsg::EdgesForFile { file_url, reply } => {
                let edges = self
                    .citations
                    .edges_for_file(&file_url)
                    .into_iter()
                    .cloned()
                    .collect();
                let _ = reply.send(edges);
            }
            MonitorMsg::FilesForPage { page_url, reply } => {
                let edges = self
                    .citations
                    .files_for_page(&page_url)
                    .into_iter()
                    .cloned()
                    .collect();
                let _ = reply.send(edges);
            }
            MonitorMsg::Report { reply } => {
                let _ = reply.send(self.report());
            }
        }
    }
}

/// Spawn the monitor task. The task exits when every handle is dropped.
pub fn spawn(expected: Vec<(String, Category, u64)>) -> MonitorHandle {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut state = CoverageState::new(expected);
        while let Some(msg) = rx.recv().await {
            state.handle(msg);
        }
        debug!("coverage monitor task stopped");
    });
    MonitorHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected() -> Vec<(String, Category, u64)> {
        vec![(
            "www.bolton.gov.uk".to_string(),
            Category::Transparency,
            50,
        )]
    }

    #[test]
    fn request_conservation_holds() {
        let mut state = CoverageState::new(expected());
        state.log_success(
            "https://www.bolton.gov.uk/a",
            Duration::from_millis(120),
            Category::Services,
        );
        state.log_success(
            "https://www.bolton.gov.uk/b",
            Duration::from_millis(80),
            Category::Services,
        );
        state.log_error(
            ErrorKind::NotFound,
            "https://www.bolton.gov.uk/c",
            "HTTP 404",
            Category::Services,
        );

        let stats = state.domain_stats("www.bolton.gov.uk").unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(
            stats.total_requests,
            stats.successful_requests + stats.failed_requests
        );
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.avg_response_time_ms - 100.0).abs() < 1e-9);
    }

    #[test]
    fn repeated_error_bumps_retry_count() {
        let mut state = CoverageState::new(expected());
        for _ in 0..2 {
            state.log_error(
                ErrorKind::Timeout,
                "https://www.bolton.gov.uk/slow",
                "timed out",
                Category::Services,
            );
        }
        let id = CrawlError::make_id("www.bolton.gov.uk", ErrorKind::Timeout, "https://www.bolton.gov.uk/slow");
        let error = state.error(&id).unwrap();
        assert_eq!(error.retry_count, 2);
        // Still a single error entry.
        assert_eq!(state.report().errors.len(), 1);
    }

    #[test]
    fn mark_resolved_flips_flag() {
        let mut state = CoverageState::new(expected());
        state.log_error(
            ErrorKind::NotFound,
            "https://www.bolton.gov.uk/gone",
            "HTTP 404",
            Category::Services,
        );
        let id = CrawlError::make_id("www.bolton.gov.uk", ErrorKind::NotFound, "https://www.bolton.gov.uk/gone");
        state.mark_resolved(&id);
        assert!(state.error(&id).unwrap().resolved);
    }

    #[test]
    fn coverage_percentage_and_recommendation() {
        let mut state = CoverageState::new(expected());
        for _ in 0..30 {
            state.record_stored("www.bolton.gov.uk", Category::Transparency);
        }
        let report = state.report();
        let metric = &report.coverage_metrics[0];
        assert_eq!(metric.actual_count, 30);
        assert!((metric.coverage_percentage - 60.0).abs() < 1e-9);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("Low coverage detected for transparency")));
    }

    #[test]
    fn coverage_clamped_at_100() {
        let mut state = CoverageState::new(expected());
        for _ in 0..80 {
            state.record_stored("www.bolton.gov.uk", Category::Transparency);
        }
        let report = state.report();
        assert!((report.coverage_metrics[0].coverage_percentage - 100.0).abs() < 1e-9);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn low_success_rate_draws_recommendation() {
        let mut state = CoverageState::new(vec![]);
        state.log_success(
            "https://www.bolton.gov.uk/ok",
            Duration::from_millis(50),
            Category::Services,
        );
        for i in 0..4 {
            state.log_error(
                ErrorKind::ServerError,
                &format!("https://www.bolton.gov.uk/fail{}", i),
                "HTTP 500",
                Category::Services,
            );
        }
        let report = state.report();
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("Investigate politeness or authentication")));
    }

    #[test]
    fn redirect_map_appends() {
        let mut state = CoverageState::new(vec![]);
        state.log_redirect("https://old", "https://new");
        state.log_redirect("https://old", "https://newer");
        assert_eq!(state.report().redirect_map.len(), 2);
    }

    #[test]
    fn handle_round_trip() {
        tokio_test::block_on(async {
            let handle = spawn(expected());
            handle.log_success(
                "https://www.bolton.gov.uk/a",
                Duration::from_millis(10),
                Category::Services,
            );
            handle.record_citation(
                "https://www.bolton.gov.uk/f.csv",
                "https://www.bolton.gov.uk/a",
            );
            let report = handle.report().await.unwrap();
            assert_eq!(report.domain_stats.len(), 1);
            let edges = handle
                .edges_for_file("https://www.bolton.gov.uk/f.csv")
                .await;
            assert_eq!(edges.len(), 1);
        });
    }
}
