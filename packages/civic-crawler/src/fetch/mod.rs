//! Polite HTTP fetching.
//!
//! [`HttpFetcher`] performs one attempt with a manual redirect loop;
//! [`PoliteFetcher`] wraps any [`Fetch`] with the per-host gate,
//! robots.txt checking, retry policy and telemetry. The split keeps
//! every politeness behavior testable against a mock transport.

pub mod gate;
pub mod polite;
pub mod retry;
pub mod robots;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use url::Url;

use crate::error::{FetchError, FetchResultT};

pub use gate::HostGate;
pub use polite::PoliteFetcher;
pub use retry::RetryPolicy;
pub use robots::{RobotsCache, RobotsTxt};

/// Maximum redirect hops followed per fetch.
const MAX_REDIRECTS: usize = 5;

/// A completed fetch. Owned by the worker that produced it; consumed by
/// the classifier and dropped.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    /// URL after redirects; equals `url` when none occurred
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub response_time: Duration,
    pub fetched_at: DateTime<Utc>,
    /// 1-based attempt number that succeeded
    pub attempt: u32,
    /// Redirect hops traversed, in order
    pub redirects: Vec<(String, String)>,
    pub headers: HashMap<String, String>,
}

impl FetchResult {
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.final_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Transport abstraction: one fetch attempt, redirects included.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchResultT<FetchResult>;
}

#[async_trait]
impl<F: Fetch + ?Sized> Fetch for std::sync::Arc<F> {
    async fn fetch(&self, url: &str) -> FetchResultT<FetchResult> {
        (**self).fetch(url).await
    }
}

/// reqwest-backed fetcher with a manual redirect loop so every hop is
/// captured for the redirect map.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_file_size: u64,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration, max_file_size: u64) -> FetchResultT<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,text/csv,application/pdf,*/*;q=0.8"
                .parse()
                .expect("static header value"),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            "en-GB,en;q=0.7".parse().expect("static header value"),
        );

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                source: e,
            })?;

        Ok(Self {
            client,
            max_file_size,
        })
    }

    fn classify_status(url: &str, status: u16) -> Option<FetchError> {
        match status {
            200..=299 => None,
            404 => Some(FetchError::NotFound { url: url.into() }),
            400..=499 => Some(FetchError::AccessDenied {
                url: url.into(),
                status,
            }),
            _ => Some(FetchError::ServerError {
                url: url.into(),
                status,
            }),
        }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResultT<FetchResult> {
        let started = std::time::Instant::now();
        let mut current = Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;
        let mut redirects: Vec<(String, String)> = Vec::new();

        loop {
            debug!(url = %current, "fetching");
            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        FetchError::Timeout {
                            url: current.to_string(),
                        }
                    } else {
                        FetchError::Transport {
                            url: current.to_string(),
                            source: e,
                        }
                    }
                })?;

            let status = response.status().as_u16();

            if response.status().is_redirection() {
                if redirects.len() >= MAX_REDIRECTS {
                    return Err(FetchError::TooManyRedirects {
                        url: url.to_string(),
                    });
                }
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| FetchError::ServerError {
                        url: current.to_string(),
                        status,
                    })?;
                let next = current
                    .join(location)
                    .map_err(|_| FetchError::InvalidUrl {
                        url: location.to_string(),
                    })?;
                redirects.push((current.to_string(), next.to_string()));
                current = next;
                continue;
            }

            if let Some(err) = Self::classify_status(&current.to_string(), status) {
                return Err(err);
            }

            if let Some(length) = response.content_length() {
                if length > self.max_file_size {
                    warn!(url = %current, length, "rejecting oversize body");
                    return Err(FetchError::TooLarge {
                        url: current.to_string(),
                        length,
                    });
                }
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            let headers: HashMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                .collect();

            let final_url = current.to_string();
            let bytes = response
                .bytes()
                .await
                .map_err(|e| FetchError::Transport {
                    url: final_url.clone(),
                    source: e,
                })?
                .to_vec();

            return Ok(FetchResult {
                url: url.to_string(),
                final_url,
                status,
                content_type,
                bytes,
                response_time: started.elapsed(),
                fetched_at: Utc::now(),
                attempt: 1,
                redirects,
                headers,
            });
        }
    }
}
