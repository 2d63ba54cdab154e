//! Citation graph: which page a file was discovered on, and what kind
//! of resource a URL looks like.
//!
//! The ledger is single-writer: it lives inside the coverage monitor
//! task and is mutated only through monitor messages.

use std::collections::HashMap;

use chrono::Utc;
use url::Url;

use crate::frontier::is_file_url;
use crate::records::{Category, CitationEdge, FileType};

/// URL analysis result: what a URL points at, before fetching it.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlAnalysis {
    pub suggested_type: Category,
    pub is_direct_file: bool,
    pub file_type: Option<FileType>,
    pub domain: String,
    pub is_government_domain: bool,
}

/// Classify a URL by hostname and path patterns.
pub fn analyze(url: &str) -> Option<UrlAnalysis> {
    let parsed = Url::parse(url).ok()?;
    let domain = parsed.host_str()?.to_ascii_lowercase();
    let path = parsed.path().to_ascii_lowercase();

    let is_direct_file = is_file_url(url);
    let file_type = file_type_of(&path);

    let suggested_type = if domain.contains("moderngov") || path.contains("/meetings/") {
        Category::Meetings
    } else if path.contains("/transparency")
        || (matches!(file_type, Some(FileType::Csv) | Some(FileType::Excel))
            && path.contains("spend"))
    {
        Category::Transparency
    } else if domain.contains("paplanning") || path.contains("/application") {
        Category::Planning
    } else if is_direct_file {
        Category::Other
    } else {
        Category::Services
    };

    let is_government_domain = domain.ends_with(".gov.uk")
        || domain.ends_with(".moderngov.co.uk")
        || domain.ends_with(".nhs.uk");

    Some(UrlAnalysis {
        suggested_type,
        is_direct_file,
        file_type,
        domain,
        is_government_domain,
    })
}

fn file_type_of(path: &str) -> Option<FileType> {
    if path.ends_with(".pdf") {
        Some(FileType::Pdf)
    } else if path.ends_with(".csv") {
        Some(FileType::Csv)
    } else if path.ends_with(".xlsx") || path.ends_with(".xls") {
        Some(FileType::Excel)
    } else if path.ends_with(".txt") {
        Some(FileType::Text)
    } else {
        None
    }
}

/// In-memory citation ledger. Idempotent on `(file_url, parent_page_url)`.
#[derive(Debug, Default)]
pub struct CitationLedger {
    edges: HashMap<(String, String), CitationEdge>,
}

impl CitationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `file_url` was discovered on `parent_page_url`.
    /// Re-recording the same pair leaves the original edge untouched.
    pub fn record_edge(&mut self, file_url: &str, parent_page_url: &str) -> &CitationEdge {
        let key = (file_url.to_string(), parent_page_url.to_string());
        self.edges.entry(key).or_insert_with(|| {
            let analysis = analyze(file_url);
            CitationEdge {
                file_url: file_url.to_string(),
                parent_page_url: parent_page_url.to_string(),
                suggested_type: analysis
                    .as_ref()
                    .map(|a| a.suggested_type)
                    .unwrap_or(Category::Other),
                is_direct_file: analysis
                    .as_ref()
                    .map(|a| a.is_direct_file)
                    .unwrap_or(false),
                file_type: analysis.as_ref().and_then(|a| a.file_type),
                domain: analysis.map(|a| a.domain).unwrap_or_default(),
                is_government_domain: analyze(file_url)
                    .map(|a| a.is_government_domain)
                    .unwrap_or(false),
                recorded_at: Utc::now(),
            }
        })
    }

    /// Edges whose file URL matches.
    pub fn edges_for_file(&self, file_url: &str) -> Vec<&CitationEdge> {
        self.edges
            .values()
            .filter(|e| e.file_url == file_url)
            .collect()
    }

    /// Files discovered on a given page.
    pub fn files_for_page(&self, parent_page_url: &str) -> Vec<&CitationEdge> {
        self.edges
            .values()
            .filter(|e| e.parent_page_url == parent_page_url)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Whether the pair is already recorded.
    pub fn contains(&self, file_url: &str, parent_page_url: &str) -> bool {
        self.edges
            .contains_key(&(file_url.to_string(), parent_page_url.to_string()))
    }
}
