//! Storage-facing data model.
//!
//! Every record the pipeline emits is a variant of [`StorageRecord`], a
//! tagged enum with a strongly typed payload per kind. Records carry
//! enough identity for the sink to dedupe: page URL, file URL,
//! `(domain, reference)` for planning applications, and a canonical-field
//! hash for budget and spending rows.

use std::collections::BTreeSet;
use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ErrorKind;

/// Civic subject-matter categories. Fixed set; unknown inputs map to
/// [`Category::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Transparency,
    Meetings,
    Planning,
    PlanningApplications,
    Decisions,
    Services,
    CouncilTax,
    Housing,
    Councillors,
    Committees,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Transparency => "transparency",
            Category::Meetings => "meetings",
            Category::Planning => "planning",
            Category::PlanningApplications => "planning_applications",
            Category::Decisions => "decisions",
            Category::Services => "services",
            Category::CouncilTax => "council_tax",
            Category::Housing => "housing",
            Category::Councillors => "councillors",
            Category::Committees => "committees",
            Category::Other => "other",
        }
    }

    /// Parse a category name, tolerating hyphen/underscore variants.
    pub fn parse(s: &str) -> Category {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "transparency" => Category::Transparency,
            "meetings" => Category::Meetings,
            "planning" => Category::Planning,
            "planning_applications" => Category::PlanningApplications,
            "decisions" => Category::Decisions,
            "services" => Category::Services,
            "council_tax" => Category::CouncilTax,
            "housing" => Category::Housing,
            "councillors" => Category::Councillors,
            "committees" => Category::Committees,
            _ => Category::Other,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extraction confidence grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Status of a planning application, normalized per the portal's wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanningStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Withdrawn,
}

impl PlanningStatus {
    /// Normalize free-text status wording from the portal.
    pub fn normalize(raw: &str) -> PlanningStatus {
        let s = raw.trim().to_ascii_lowercase();
        if s.contains("granted") || s.contains("approved") {
            PlanningStatus::Approved
        } else if s.contains("refused") || s.contains("rejected") {
            PlanningStatus::Rejected
        } else if s.contains("withdrawn") {
            PlanningStatus::Withdrawn
        } else if s.contains("review") || s.contains("consideration") {
            PlanningStatus::UnderReview
        } else {
            PlanningStatus::Pending
        }
    }
}

/// Quality tier derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityTier {
    pub fn from_score(score: u32) -> QualityTier {
        match score {
            80.. => QualityTier::Excellent,
            60..=79 => QualityTier::Good,
            40..=59 => QualityTier::Fair,
            _ => QualityTier::Poor,
        }
    }
}

/// Multi-criterion quality score for a fetched artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScore {
    /// Sum of all components, clamped to 0..=100
    pub overall_score: u32,
    pub content_score: u32,
    pub structure_score: u32,
    pub contact_score: u32,
    /// Per-criterion contributions (criterion name -> points)
    pub components: HashMap<String, u32>,
    pub tier: QualityTier,
}

/// A crawled HTML page as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub parent_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Category,
    pub content_length: usize,
    pub quality_score: u32,
    pub crawled_at: DateTime<Utc>,
}

/// Kinds of downloadable files the pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Pdf,
    Csv,
    Excel,
    Text,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Csv => "csv",
            FileType::Excel => "excel",
            FileType::Text => "text",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary attached to a processed file artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub total_items: usize,
    pub processing_date: DateTime<Utc>,
    /// Record kinds produced from this file ("spending", "agenda", ...)
    pub data_types: Vec<String>,
}

/// A downloaded file and the page that cited it. One edge of the
/// citation graph; the matching [`CitationEdge`] is recorded by the
/// monitor before this artifact is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileArtifact {
    pub file_url: String,
    pub parent_page_url: String,
    pub file_type: FileType,
    pub file_size: u64,
    pub title: String,
    pub category: Category,
    pub summary: ProcessingSummary,
}

/// A budget line extracted from a published budget table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetItem {
    pub department: String,
    pub category: Category,
    pub subcategory: Option<String>,
    /// Decimal GBP at rest
    pub budgeted_amount: Decimal,
    pub actual_amount: Option<Decimal>,
    pub currency: String,
    pub year: u16,
    pub period: String,
    pub description: Option<String>,
    pub source_url: String,
    pub last_updated: DateTime<Utc>,
}

/// A supplier payment row, typically from a spending-over-£500 CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendingRecord {
    pub transaction_date: NaiveDate,
    pub supplier: String,
    pub department: String,
    pub description: String,
    /// Decimal GBP at rest
    pub amount: Decimal,
    pub category: Category,
    pub invoice_number: Option<String>,
    pub source_url: String,
    pub extracted_at: DateTime<Utc>,
}

/// A quantitative fact extracted from text or a statistics table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalDatum {
    pub category: Category,
    pub subcategory: Option<String>,
    pub metric: String,
    pub value: Decimal,
    pub unit: String,
    pub period: String,
    pub date: Option<NaiveDate>,
    pub source_document: String,
    pub methodology: Option<String>,
    pub confidence: Confidence,
    pub last_updated: DateTime<Utc>,
}

/// A planning application harvested from the planning portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningApplication {
    /// Unique per domain
    pub reference: String,
    pub address: String,
    pub proposal: String,
    pub status: PlanningStatus,
    pub received_date: Option<NaiveDate>,
    pub decision_date: Option<NaiveDate>,
    pub applicant_name: Option<String>,
    /// (latitude, longitude) when the portal exposes them
    pub coordinates: Option<(f64, f64)>,
    pub document_urls: BTreeSet<String>,
    pub source_url: String,
    pub case_officer: Option<String>,
    pub consultation_end_date: Option<NaiveDate>,
    pub development_type: Option<String>,
    pub parish: Option<String>,
}

/// One numbered item on a meeting agenda.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaItem {
    /// Full dotted number as printed ("3", "3.1"); sub-items are siblings
    pub item_number: String,
    pub title: String,
    pub page_number: u32,
    pub confidence: Confidence,
}

/// A parsed meeting agenda.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaDocument {
    pub meeting_title: String,
    pub meeting_date: Option<NaiveDate>,
    pub committee: String,
    pub agenda_items: Vec<AgendaItem>,
    pub source_url: String,
}

/// A decision recorded in meeting minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinutesDecision {
    pub title: String,
    pub page_number: u32,
    pub confidence: Confidence,
}

/// Parsed meeting minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinutesDocument {
    pub meeting_title: String,
    pub meeting_date: Option<NaiveDate>,
    pub committee: String,
    pub attendees: BTreeSet<String>,
    pub decisions: Vec<MinutesDecision>,
    pub actions: Vec<String>,
    pub source_url: String,
}

/// One edge of the citation graph: the page a file was discovered on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationEdge {
    pub file_url: String,
    pub parent_page_url: String,
    pub suggested_type: Category,
    pub is_direct_file: bool,
    pub file_type: Option<FileType>,
    pub domain: String,
    pub is_government_domain: bool,
    pub recorded_at: DateTime<Utc>,
}

/// A crawl failure as tracked by the coverage monitor. At most one
/// active error per `(domain, type, url)`; repeats bump `retry_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlError {
    /// Derived from `domain|type|url`
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub url: String,
    pub message: String,
    pub domain: String,
    pub category: Category,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub resolved: bool,
}

impl CrawlError {
    /// Stable error identity.
    pub fn make_id(domain: &str, kind: ErrorKind, url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(domain.as_bytes());
        hasher.update(b"|");
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(url.as_bytes());
        hex::encode(&hasher.finalize()[..12])
    }
}

/// Per-domain request statistics. Mutated only by the coverage monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainStats {
    pub domain: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// successful / total, in 0..=1
    pub success_rate: f64,
    /// Rolling mean over successful responses
    pub avg_response_time_ms: f64,
    pub last_crawled: Option<DateTime<Utc>>,
    pub common_errors: BTreeSet<String>,
}

impl DomainStats {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            success_rate: 0.0,
            avg_response_time_ms: 0.0,
            last_crawled: None,
            common_errors: BTreeSet::new(),
        }
    }
}

/// Coverage of one (domain, category) pair against the expected count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageMetric {
    pub domain: String,
    pub category: Category,
    pub data_type: String,
    pub expected_count: u64,
    pub actual_count: u64,
    /// min(100, actual/expected * 100)
    pub coverage_percentage: f64,
    pub last_crawled: Option<DateTime<Utc>>,
    pub issues: Vec<CrawlError>,
    pub recommendations: Vec<String>,
}

/// End-of-run coverage report, written to storage as its own record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Identifies the run this report summarizes
    pub run_id: uuid::Uuid,
    pub generated_at: DateTime<Utc>,
    pub domain_stats: Vec<DomainStats>,
    pub coverage_metrics: Vec<CoverageMetric>,
    pub errors: Vec<CrawlError>,
    pub recommendations: Vec<String>,
    /// old URL -> new URL, append-only within a run
    pub redirect_map: Vec<(String, String)>,
}

/// Everything the pipeline writes, as a tagged union.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageRecord {
    Page(PageRecord),
    FileArtifact(FileArtifact),
    Budget(BudgetItem),
    Spending(SpendingRecord),
    Statistic(StatisticalDatum),
    PlanningApplication(PlanningApplication),
    Agenda(AgendaDocument),
    Minutes(MinutesDocument),
    CoverageReport(CoverageReport),
}

impl StorageRecord {
    /// Kind name used for routing and JSONL file naming.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageRecord::Page(_) => "page",
            StorageRecord::FileArtifact(_) => "file_artifact",
            StorageRecord::Budget(_) => "budget",
            StorageRecord::Spending(_) => "spending",
            StorageRecord::Statistic(_) => "statistic",
            StorageRecord::PlanningApplication(_) => "planning_application",
            StorageRecord::Agenda(_) => "agenda",
            StorageRecord::Minutes(_) => "minutes",
            StorageRecord::CoverageReport(_) => "coverage_report",
        }
    }

    /// Dedup identity for the sink. Writes are at-least-once, so every
    /// record kind carries a stable primary key.
    pub fn identity(&self) -> String {
        match self {
            StorageRecord::Page(p) => format!("page:{}", p.url),
            StorageRecord::FileArtifact(f) => format!("file:{}", f.file_url),
            StorageRecord::Budget(b) => format!(
                "budget:{}:{}",
                b.source_url,
                canonical_hash(&[
                    &b.department,
                    b.category.as_str(),
                    &b.budgeted_amount.to_string(),
                    &b.year.to_string(),
                    &b.period,
                ])
            ),
            StorageRecord::Spending(s) => format!(
                "spending:{}:{}",
                s.source_url,
                canonical_hash(&[
                    &s.transaction_date.to_string(),
                    &s.supplier,
                    &s.department,
                    &s.amount.to_string(),
                ])
            ),
            StorageRecord::Statistic(s) => format!(
                "statistic:{}:{}",
                s.source_document,
                canonical_hash(&[&s.metric, &s.value.to_string(), &s.period])
            ),
            StorageRecord::PlanningApplication(p) => {
                let domain = url::Url::parse(&p.source_url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_default();
                format!("planning:{}:{}", domain, p.reference)
            }
            StorageRecord::Agenda(a) => format!("agenda:{}", a.source_url),
            StorageRecord::Minutes(m) => format!("minutes:{}", m.source_url),
            StorageRecord::CoverageReport(r) => {
                format!("coverage_report:{}", r.generated_at.timestamp())
            }
        }
    }
}

/// Hash of canonical record fields, for composite dedup identities.
fn canonical_hash(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.trim().to_lowercase().as_bytes());
        hasher.update(b"\x1f");
    }
    hex::encode(&hasher.finalize()[..12])
}

/// Integer-pence sort key for a decimal GBP amount. Derived index only;
/// the stored value stays decimal.
pub fn pence_index(amount: &Decimal) -> i64 {
    (amount * Decimal::from(100)).round().to_i64().unwrap_or(i64::MAX)
}
