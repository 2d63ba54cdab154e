//! Resource-kind classification and category tagging.

use crate::fetch::FetchResult;
use crate::records::Category;

/// What a fetched resource is, for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    HtmlPage,
    PdfDocument,
    CsvFile,
    ExcelFile,
    TextFile,
    /// Unknown; dropped
    Other,
}

/// Classify a fetched resource. Decision order: explicit content type,
/// then URL suffix, then a body sniff. `text/plain` is not decisive:
/// councils routinely serve CSV under it, so the suffix gets a say first.
pub fn classify(result: &FetchResult) -> ResourceKind {
    let content_type = result
        .content_type
        .as_deref()
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match content_type.as_str() {
        "text/html" | "application/xhtml+xml" => return ResourceKind::HtmlPage,
        "application/pdf" => return ResourceKind::PdfDocument,
        "text/csv" | "application/csv" => return ResourceKind::CsvFile,
        "application/vnd.ms-excel"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
            return ResourceKind::ExcelFile
        }
        _ => {}
    }

    if let Some(kind) = kind_from_suffix(&result.final_url) {
        return kind;
    }

    if let Some(kind) = sniff(&result.bytes) {
        return kind;
    }

    if content_type == "text/plain" {
        return ResourceKind::TextFile;
    }

    ResourceKind::Other
}

fn kind_from_suffix(url: &str) -> Option<ResourceKind> {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    if path.ends_with(".pdf") {
        Some(ResourceKind::PdfDocument)
    } else if path.ends_with(".csv") {
        Some(ResourceKind::CsvFile)
    } else if path.ends_with(".xlsx") || path.ends_with(".xls") {
        Some(ResourceKind::ExcelFile)
    } else if path.ends_with(".txt") {
        Some(ResourceKind::TextFile)
    } else {
        None
    }
}

fn sniff(bytes: &[u8]) -> Option<ResourceKind> {
    if bytes.starts_with(b"%PDF") {
        return Some(ResourceKind::PdfDocument);
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
    if head.contains("<html") || head.contains("<!doctype html") {
        return Some(ResourceKind::HtmlPage);
    }
    None
}

/// Keyword table mapping URL path + referring link text to a category.
/// Checked most-specific first; anything unmatched is `Services`.
const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (
        Category::PlanningApplications,
        &["online-applications", "casedetails", "weeklylist", "planning application"],
    ),
    (Category::Decisions, &["decision"]),
    (Category::Committees, &["committee"]),
    (Category::Councillors, &["councillor", "mgmemberindex", "your council/members"]),
    (
        Category::Meetings,
        &["meeting", "agenda", "minutes", "moderngov", "iedochome", "ielistdocuments"],
    ),
    (Category::CouncilTax, &["council-tax", "counciltax", "council tax"]),
    (Category::Housing, &["housing", "homeless", "tenancy"]),
    (
        Category::Transparency,
        &[
            "transparency",
            "spending",
            "expenditure",
            "budget",
            "performance",
            "open-data",
            "foi",
            "freedom-of-information",
        ],
    ),
    (Category::Planning, &["planning", "development", "local-plan"]),
];

/// Tag a URL (and optionally the link text it was discovered under) with
/// a category.
pub fn categorize(url: &str, link_text: Option<&str>) -> Category {
    let haystack = format!(
        "{} {}",
        url.to_ascii_lowercase(),
        link_text.unwrap_or("").to_ascii_lowercase()
    );
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|kw| haystack.contains(kw)) {
            return *category;
        }
    }
    Category::Services
}
