//! Test doubles shared by unit and integration tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{FetchError, FetchResultT};
use crate::fetch::{Fetch, FetchResult};

#[derive(Debug, Clone)]
enum MockResponse {
    Body {
        bytes: Vec<u8>,
        content_type: String,
        final_url: Option<String>,
        redirects: Vec<(String, String)>,
    },
    Status(u16),
    Timeout,
    /// Fails with 503 `remaining` times, then serves the body
    Flaky { remaining: u32, bytes: Vec<u8> },
}

/// Scripted fetcher: maps URLs to canned responses and counts calls.
#[derive(Debug, Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, MockResponse>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_html(self, url: &str, html: &str) -> Self {
        self.insert(
            url,
            MockResponse::Body {
                bytes: html.as_bytes().to_vec(),
                content_type: "text/html; charset=utf-8".into(),
                final_url: None,
                redirects: Vec::new(),
            },
        );
        self
    }

    pub fn with_bytes(self, url: &str, bytes: Vec<u8>, content_type: &str) -> Self {
        self.insert(
            url,
            MockResponse::Body {
                bytes,
                content_type: content_type.into(),
                final_url: None,
                redirects: Vec::new(),
            },
        );
        self
    }

    /// Non-2xx terminal status.
    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.insert(url, MockResponse::Status(status));
        self
    }

    pub fn with_timeout(self, url: &str) -> Self {
        self.insert(url, MockResponse::Timeout);
        self
    }

    /// 503 for `failures` attempts, then the HTML body.
    pub fn with_flaky_html(self, url: &str, html: &str, failures: u32) -> Self {
        self.insert(
            url,
            MockResponse::Flaky {
                remaining: failures,
                bytes: html.as_bytes().to_vec(),
            },
        );
        self
    }

    /// A 301 hop from `from` to `to`, serving `html` at the end.
    pub fn with_redirect(self, from: &str, to: &str, html: &str) -> Self {
        self.insert(
            from,
            MockResponse::Body {
                bytes: html.as_bytes().to_vec(),
                content_type: "text/html; charset=utf-8".into(),
                final_url: Some(to.to_string()),
                redirects: vec![(from.to_string(), to.to_string())],
            },
        );
        self
    }

    /// How many times a URL was fetched.
    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn insert(&self, url: &str, response: MockResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }
}

#[async_trait]
impl Fetch for MockFetcher {
    async fn fetch(&self, url: &str) -> FetchResultT<FetchResult> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;

        let response = {
            let mut responses = self.responses.lock().unwrap();
            match responses.get_mut(url) {
                None => {
                    return Err(FetchError::NotFound {
                        url: url.to_string(),
                    })
                }
                Some(MockResponse::Flaky { remaining, bytes }) => {
                    if *remaining > 0 {
                        *remaining -= 1;
                        MockResponse::Status(503)
                    } else {
                        MockResponse::Body {
                            bytes: bytes.clone(),
                            content_type: "text/html; charset=utf-8".into(),
                            final_url: None,
                            redirects: Vec::new(),
                        }
                    }
                }
                Some(other) => other.clone(),
            }
        };

        match response {
            MockResponse::Body {
                bytes,
                content_type,
                final_url,
                redirects,
            } => Ok(FetchResult {
                url: url.to_string(),
                final_url: final_url.unwrap_or_else(|| url.to_string()),
                status: 200,
                content_type: Some(content_type),
                bytes,
                response_time: Duration::from_millis(5),
                fetched_at: Utc::now(),
                attempt: 1,
                redirects,
                headers: HashMap::new(),
            }),
            MockResponse::Status(404) => Err(FetchError::NotFound {
                url: url.to_string(),
            }),
            MockResponse::Status(status @ (401 | 403)) => Err(FetchError::AccessDenied {
                url: url.to_string(),
                status,
            }),
            MockResponse::Status(status) => Err(FetchError::ServerError {
                url: url.to_string(),
                status,
            }),
            MockResponse::Timeout => Err(FetchError::Timeout {
                url: url.to_string(),
            }),
            MockResponse::Flaky { .. } => unreachable!("flaky resolved above"),
        }
    }
}
