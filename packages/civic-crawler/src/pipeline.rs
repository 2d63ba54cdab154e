//! File pipeline: gates, scratch download, extractor routing, and
//! validated record assembly.
//!
//! A failure at any stage means no artifact and no records; partial
//! extraction is never emitted. The caller writes the artifact before
//! the records so downstream joins cannot dangle.

use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, warn};

use crate::classify::ResourceKind;
use crate::error::{ExtractError, ExtractResult};
use crate::extract::tabular::extract_csv;
use crate::extract::text::extract_stats;
use crate::extract::{pdf, sheet, ExtractedBundle};
use crate::fetch::FetchResult;
use crate::records::{Category, FileArtifact, FileType, ProcessingSummary, StorageRecord};
use crate::validate::{validate, ValidationError};

/// Everything one file produced, validated and ordered for writing.
#[derive(Debug)]
pub struct ProcessedFile {
    pub artifact: FileArtifact,
    /// Validated records in production order (row order, page order)
    pub records: Vec<StorageRecord>,
    /// Records dropped by the validator
    pub invalid: Vec<ValidationError>,
    /// Row-level extractor errors (missing required fields)
    pub parse_error_count: usize,
    /// Validated records that carried an anomaly flag
    pub anomaly_count: usize,
}

pub struct FilePipeline {
    max_file_size: u64,
    scratch_dir: PathBuf,
}

impl FilePipeline {
    pub fn new(max_file_size: u64, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_file_size,
            scratch_dir: data_dir.into().join("scratch"),
        }
    }

    /// Process a downloaded file into an artifact plus records.
    pub fn process(
        &self,
        fetched: &FetchResult,
        parent_page_url: &str,
        kind: ResourceKind,
        category: Category,
    ) -> ExtractResult<ProcessedFile> {
        let file_type = match kind {
            ResourceKind::PdfDocument => FileType::Pdf,
            ResourceKind::CsvFile => FileType::Csv,
            ResourceKind::ExcelFile => FileType::Excel,
            ResourceKind::TextFile => FileType::Text,
            ResourceKind::HtmlPage | ResourceKind::Other => {
                return Err(ExtractError::UnsupportedType {
                    content_type: fetched
                        .content_type
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                })
            }
        };

        let size = fetched.bytes.len() as u64;
        if size > self.max_file_size {
            return Err(ExtractError::TooLarge { size });
        }

        self.spool_to_scratch(fetched)?;

        let file_url = fetched.final_url.clone();
        let (bundle, parse_error_count) = match file_type {
            FileType::Csv => {
                let report = extract_csv(&fetched.bytes, &file_url, category)?;
                (report.bundle, report.parse_errors)
            }
            FileType::Excel => {
                let report = sheet::extract_sheet(&fetched.bytes, &file_url, category)?;
                (report.bundle, report.parse_errors)
            }
            FileType::Pdf => {
                let report = pdf::extract_pdf(&fetched.bytes, &file_url, category)?;
                (report.bundle, 0)
            }
            FileType::Text => {
                let text = crate::extract::tabular::decode_bytes(&fetched.bytes);
                let mut bundle = ExtractedBundle::default();
                bundle.statistical_data = extract_stats(&text, &file_url, category);
                (bundle, 0)
            }
        };

        let total_items = bundle.total_items();
        let data_types = bundle.data_types();

        let mut records = Vec::new();
        let mut invalid = Vec::new();
        let mut anomaly_count = 0usize;
        let mut push = |record: StorageRecord| match validate(record) {
            Ok(validated) => {
                if validated.anomaly {
                    anomaly_count += 1;
                }
                records.push(validated.record);
            }
            Err(error) => {
                warn!(field = error.field, kind = error.kind, "record failed validation");
                invalid.push(error);
            }
        };

        for item in bundle.budget_items {
            push(StorageRecord::Budget(item));
        }
        for record in bundle.spending_records {
            push(StorageRecord::Spending(record));
        }
        for datum in bundle.statistical_data {
            push(StorageRecord::Statistic(datum));
        }
        for app in bundle.planning_applications {
            push(StorageRecord::PlanningApplication(app));
        }
        if let Some(agenda) = bundle.agenda {
            push(StorageRecord::Agenda(agenda));
        }
        if let Some(minutes) = bundle.minutes {
            push(StorageRecord::Minutes(minutes));
        }
        drop(push);

        let artifact = FileArtifact {
            file_url: file_url.clone(),
            parent_page_url: parent_page_url.to_string(),
            file_type,
            file_size: size,
            title: title_from_url(&file_url),
            category,
            summary: ProcessingSummary {
                total_items,
                processing_date: Utc::now(),
                data_types,
            },
        };

        debug!(
            file_url = %file_url,
            records = records.len(),
            invalid = invalid.len(),
            "file processed"
        );

        Ok(ProcessedFile {
            artifact,
            records,
            invalid,
            parse_error_count,
            anomaly_count,
        })
    }

    /// Spool the body to the scratch dir. The file is temporary; the
    /// extractors read from memory, this is for crash forensics and to
    /// honour `CRAWL_DATA_DIR` disk placement.
    fn spool_to_scratch(&self, fetched: &FetchResult) -> ExtractResult<()> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        let mut scratch = tempfile::NamedTempFile::new_in(&self.scratch_dir)?;
        scratch.write_all(&fetched.bytes)?;
        Ok(())
    }
}

/// Derive a display title from the last path segment.
pub fn title_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::time::Duration;

    fn fetched(url: &str, bytes: &[u8], content_type: &str) -> FetchResult {
        FetchResult {
            url: url.to_string(),
            final_url: url.to_string(),
            status: 200,
            content_type: Some(content_type.to_string()),
            bytes: bytes.to_vec(),
            response_time: Duration::from_millis(10),
            fetched_at: Utc::now(),
            attempt: 1,
            redirects: Vec::new(),
            headers: HashMap::new(),
        }
    }

    fn pipeline() -> (FilePipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FilePipeline::new(1024 * 1024, dir.path()), dir)
    }

    const PARENT: &str = "https://www.bolton.gov.uk/transparency-and-performance/spending-over-500";
    const CSV_URL: &str = "https://www.bolton.gov.uk/sites/default/files/spending_over_500.csv";

    #[test]
    fn csv_file_produces_artifact_and_records() {
        let (pipeline, _dir) = pipeline();
        let csv = "Date,Supplier,Amount\n31/12/2023,Acme Ltd,750.00\n15/01/2024,Beta Ltd,980.50\n";
        let fetched = fetched(CSV_URL, csv.as_bytes(), "text/csv");

        let processed = pipeline
            .process(&fetched, PARENT, ResourceKind::CsvFile, Category::Transparency)
            .unwrap();

        assert_eq!(processed.artifact.file_url, CSV_URL);
        assert_eq!(processed.artifact.parent_page_url, PARENT);
        assert_eq!(processed.artifact.file_type, FileType::Csv);
        assert_eq!(processed.artifact.title, "spending_over_500.csv");
        assert_eq!(processed.artifact.summary.total_items, 2);
        assert_eq!(processed.artifact.summary.data_types, vec!["spending"]);
        assert_eq!(processed.records.len(), 2);
        assert!(processed.invalid.is_empty());
    }

    #[test]
    fn oversize_body_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = FilePipeline::new(8, dir.path());
        let fetched = fetched(CSV_URL, b"Date,Amount\n01/01/2024,1\n", "text/csv");
        let error = pipeline
            .process(&fetched, PARENT, ResourceKind::CsvFile, Category::Transparency)
            .unwrap_err();
        assert!(matches!(error, ExtractError::TooLarge { .. }));
    }

    #[test]
    fn size_exactly_at_cap_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"Ward,Households\nHalliwell,1500\n";
        let pipeline = FilePipeline::new(body.len() as u64, dir.path());
        let fetched = fetched(CSV_URL, body, "text/csv");
        assert!(pipeline
            .process(&fetched, PARENT, ResourceKind::CsvFile, Category::Services)
            .is_ok());
    }

    #[test]
    fn unsupported_kind_rejected() {
        let (pipeline, _dir) = pipeline();
        let fetched = fetched("https://www.bolton.gov.uk/logo.png", &[0x89], "image/png");
        let error = pipeline
            .process(&fetched, PARENT, ResourceKind::Other, Category::Services)
            .unwrap_err();
        assert!(matches!(error, ExtractError::UnsupportedType { .. }));
    }

    #[test]
    fn extractor_failure_emits_nothing() {
        let (pipeline, _dir) = pipeline();
        // PDF route with non-PDF bytes: hard failure, no artifact.
        let fetched = fetched(
            "https://www.bolton.gov.uk/docs/agenda.pdf",
            b"not a pdf",
            "application/pdf",
        );
        let result = pipeline.process(&fetched, PARENT, ResourceKind::PdfDocument, Category::Meetings);
        assert!(result.is_err());
    }

    #[test]
    fn text_file_yields_statistics() {
        let (pipeline, _dir) = pipeline();
        let text = "The library service budget was £1,250,000 covering 14 branches.";
        let fetched = fetched(
            "https://www.bolton.gov.uk/docs/notes.txt",
            text.as_bytes(),
            "text/plain",
        );
        let processed = pipeline
            .process(&fetched, PARENT, ResourceKind::TextFile, Category::Services)
            .unwrap();
        assert!(!processed.records.is_empty());
        assert_eq!(processed.artifact.file_type, FileType::Text);
    }

    #[test]
    fn title_from_last_segment() {
        assert_eq!(
            title_from_url("https://x/a/b/spending_over_500.csv"),
            "spending_over_500.csv"
        );
        assert_eq!(title_from_url("https://x/"), "https://x/");
    }
}
