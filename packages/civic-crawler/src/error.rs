//! Typed errors for the crawler library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. The binary wraps these
//! in `anyhow` at the edge.

use thiserror::Error;

/// Errors raised while loading configuration or the seed registry.
///
/// These are fatal: the process exits with code 1 before any crawling
/// starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The allowlist contains no domains
    #[error("seed registry is empty")]
    EmptyRegistry,

    /// A domain was declared without any seed URL
    #[error("domain has no seed URLs: {domain}")]
    NoSeeds { domain: String },

    /// A seed URL could not be parsed
    #[error("invalid seed URL: {url}")]
    InvalidSeed { url: String },

    /// A seed URL is disallowed by the host's robots.txt
    #[error("robots.txt disallows seed: {url}")]
    SeedDisallowed { url: String },

    /// Seed file could not be read
    #[error("cannot read seed file: {0}")]
    Io(#[from] std::io::Error),

    /// Seed file could not be parsed
    #[error("malformed seed file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Classification of a failed fetch, mirrored into the error log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// HTTP 404, never retried
    NotFound,
    /// Network timeout or transport failure
    Timeout,
    /// Parse or validation failure in an extractor
    ParsingError,
    /// HTTP 401/403
    AccessDenied,
    /// HTTP 5xx
    ServerError,
}

impl ErrorKind {
    /// Stable string used in error ids and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "404",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ParsingError => "parsing_error",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::ServerError => "server_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while fetching a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP 404
    #[error("not found: {url}")]
    NotFound { url: String },

    /// HTTP 401/403
    #[error("access denied ({status}): {url}")]
    AccessDenied { url: String, status: u16 },

    /// HTTP 5xx after retries were exhausted
    #[error("server error ({status}): {url}")]
    ServerError { url: String, status: u16 },

    /// Timed out after retries were exhausted
    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    /// Transport-level failure (DNS, TLS, connection reset)
    #[error("transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Advertised Content-Length exceeds the configured cap
    #[error("content too large ({length} bytes): {url}")]
    TooLarge { url: String, length: u64 },

    /// robots.txt disallows this path
    #[error("robots.txt disallows: {url}")]
    RobotsDisallowed { url: String },

    /// Redirect chain exceeded the hop limit
    #[error("too many redirects: {url}")]
    TooManyRedirects { url: String },

    /// URL could not be parsed
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },
}

impl FetchError {
    /// Map to the error taxonomy used by the coverage monitor.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::NotFound { .. } => ErrorKind::NotFound,
            FetchError::AccessDenied { .. } | FetchError::RobotsDisallowed { .. } => {
                ErrorKind::AccessDenied
            }
            FetchError::ServerError { .. } => ErrorKind::ServerError,
            FetchError::Timeout { .. } | FetchError::Transport { .. } => ErrorKind::Timeout,
            // Oversize and malformed URLs surface as parse-stage failures
            FetchError::TooLarge { .. }
            | FetchError::TooManyRedirects { .. }
            | FetchError::InvalidUrl { .. } => ErrorKind::ParsingError,
        }
    }

    /// Whether the retry policy may re-attempt this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::ServerError { .. } | FetchError::Timeout { .. } | FetchError::Transport { .. }
        )
    }

    pub fn url(&self) -> &str {
        match self {
            FetchError::NotFound { url }
            | FetchError::AccessDenied { url, .. }
            | FetchError::ServerError { url, .. }
            | FetchError::Timeout { url }
            | FetchError::Transport { url, .. }
            | FetchError::TooLarge { url, .. }
            | FetchError::RobotsDisallowed { url }
            | FetchError::TooManyRedirects { url }
            | FetchError::InvalidUrl { url } => url,
        }
    }
}

/// Errors raised by the file pipeline and extractors.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Content type is outside the supported set
    #[error("unsupported content type: {content_type}")]
    UnsupportedType { content_type: String },

    /// File exceeds the size cap
    #[error("file too large ({size} bytes)")]
    TooLarge { size: u64 },

    /// The bytes could not be parsed as the expected format
    #[error("parse failure in {stage}: {message}")]
    Parse { stage: &'static str, message: String },

    /// A record failed schema validation
    #[error("invalid {kind} record: field {field}")]
    InvalidRecord { kind: &'static str, field: &'static str },

    /// Scratch-file I/O failed
    #[error("scratch I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a storage sink.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sink write failed: {0}")]
    Write(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("sink closed")]
    Closed,
}

/// Result alias for fetch operations.
pub type FetchResultT<T> = std::result::Result<T, FetchError>;

/// Result alias for extraction operations.
pub type ExtractResult<T> = std::result::Result<T, ExtractError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_kinds_follow_taxonomy() {
        let e = FetchError::NotFound {
            url: "https://www.bolton.gov.uk/missing".into(),
        };
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert!(!e.is_transient());

        let e = FetchError::ServerError {
            url: "https://www.bolton.gov.uk/flaky".into(),
            status: 503,
        };
        assert_eq!(e.kind(), ErrorKind::ServerError);
        assert!(e.is_transient());

        let e = FetchError::RobotsDisallowed {
            url: "https://www.bolton.gov.uk/private".into(),
        };
        assert_eq!(e.kind(), ErrorKind::AccessDenied);
        assert!(!e.is_transient());
    }

    #[test]
    fn error_kind_strings_are_stable() {
        assert_eq!(ErrorKind::NotFound.as_str(), "404");
        assert_eq!(ErrorKind::ParsingError.as_str(), "parsing_error");
        assert_eq!(ErrorKind::AccessDenied.to_string(), "access_denied");
    }
}
