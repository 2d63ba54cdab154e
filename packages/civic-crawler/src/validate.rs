//! Schema validation for extracted records.
//!
//! One dispatch on record kind; each kind names its checks explicitly.
//! Enumerated fields are already typed, so membership holds by
//! construction; what remains is range, date, and string checks.
//! An invalid record is dropped and reported against its source URL
//! with the offending field name.

use rust_decimal::Decimal;

use crate::extract::{MAX_YEAR, MIN_YEAR};
use crate::records::StorageRecord;

/// Upper bound for any stored amount, in GBP.
fn max_amount() -> Decimal {
    Decimal::from(10_000_000_000i64)
}

/// Amounts above this are kept but flagged as anomalies.
fn anomaly_threshold() -> Decimal {
    Decimal::from(10_000_000i64)
}

/// Why a record was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub kind: &'static str,
    pub field: &'static str,
    pub source_url: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {} record: field {}", self.kind, self.field)
    }
}

/// A record that passed, possibly carrying an anomaly flag.
#[derive(Debug, Clone)]
pub struct ValidatedRecord {
    pub record: StorageRecord,
    /// Amount above the anomaly threshold; retained but flagged
    pub anomaly: bool,
}

fn check_amount(
    amount: &Decimal,
    kind: &'static str,
    field: &'static str,
    source_url: &str,
) -> Result<bool, ValidationError> {
    if *amount < Decimal::ZERO || *amount > max_amount() {
        return Err(ValidationError {
            kind,
            field,
            source_url: source_url.to_string(),
        });
    }
    Ok(*amount > anomaly_threshold())
}

fn check_year(
    year: i32,
    kind: &'static str,
    field: &'static str,
    source_url: &str,
) -> Result<(), ValidationError> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(ValidationError {
            kind,
            field,
            source_url: source_url.to_string(),
        });
    }
    Ok(())
}

fn check_date(
    date: &chrono::NaiveDate,
    kind: &'static str,
    field: &'static str,
    source_url: &str,
) -> Result<(), ValidationError> {
    check_year(chrono::Datelike::year(date), kind, field, source_url)
}

/// Trim an optional string; empty and "Unknown" both mean missing.
fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("unknown"))
}

/// Validate and normalize one record.
pub fn validate(record: StorageRecord) -> Result<ValidatedRecord, ValidationError> {
    let mut anomaly = false;

    let record = match record {
        StorageRecord::Page(mut page) => {
            if page.url.trim().is_empty() {
                return Err(ValidationError {
                    kind: "page",
                    field: "url",
                    source_url: page.url,
                });
            }
            page.quality_score = page.quality_score.min(100);
            page.title = clean_optional(page.title);
            page.description = clean_optional(page.description);
            StorageRecord::Page(page)
        }

        StorageRecord::FileArtifact(artifact) => {
            if artifact.file_url.trim().is_empty() {
                return Err(ValidationError {
                    kind: "file_artifact",
                    field: "file_url",
                    source_url: artifact.file_url,
                });
            }
            if artifact.parent_page_url.trim().is_empty() {
                return Err(ValidationError {
                    kind: "file_artifact",
                    field: "parent_page_url",
                    source_url: artifact.file_url,
                });
            }
            StorageRecord::FileArtifact(artifact)
        }

        StorageRecord::Budget(mut item) => {
            anomaly |= check_amount(
                &item.budgeted_amount,
                "budget",
                "budgeted_amount",
                &item.source_url,
            )?;
            if let Some(actual) = &item.actual_amount {
                anomaly |= check_amount(actual, "budget", "actual_amount", &item.source_url)?;
            }
            check_year(item.year as i32, "budget", "year", &item.source_url)?;
            item.department = item.department.trim().to_string();
            if item.department.is_empty() {
                return Err(ValidationError {
                    kind: "budget",
                    field: "department",
                    source_url: item.source_url,
                });
            }
            item.subcategory = clean_optional(item.subcategory);
            item.description = clean_optional(item.description);
            StorageRecord::Budget(item)
        }

        StorageRecord::Spending(mut record) => {
            anomaly |= check_amount(&record.amount, "spending", "amount", &record.source_url)?;
            check_date(
                &record.transaction_date,
                "spending",
                "transaction_date",
                &record.source_url,
            )?;
            record.supplier = record.supplier.trim().to_string();
            if record.supplier.is_empty() {
                return Err(ValidationError {
                    kind: "spending",
                    field: "supplier",
                    source_url: record.source_url,
                });
            }
            record.department = record.department.trim().to_string();
            record.description = record.description.trim().to_string();
            record.invoice_number = clean_optional(record.invoice_number);
            StorageRecord::Spending(record)
        }

        StorageRecord::Statistic(mut datum) => {
            if datum.value.abs() > max_amount() {
                return Err(ValidationError {
                    kind: "statistic",
                    field: "value",
                    source_url: datum.source_document,
                });
            }
            if let Some(date) = &datum.date {
                check_date(date, "statistic", "date", &datum.source_document)?;
            }
            datum.metric = datum.metric.trim().to_string();
            if datum.metric.is_empty() {
                return Err(ValidationError {
                    kind: "statistic",
                    field: "metric",
                    source_url: datum.source_document,
                });
            }
            datum.subcategory = clean_optional(datum.subcategory);
            datum.methodology = clean_optional(datum.methodology);
            StorageRecord::Statistic(datum)
        }

        StorageRecord::PlanningApplication(mut app) => {
            app.reference = app.reference.trim().to_string();
            if app.reference.is_empty() {
                return Err(ValidationError {
                    kind: "planning_application",
                    field: "reference",
                    source_url: app.source_url,
                });
            }
            if let Some(date) = &app.received_date {
                check_date(date, "planning_application", "received_date", &app.source_url)?;
            }
            if let Some(date) = &app.decision_date {
                check_date(date, "planning_application", "decision_date", &app.source_url)?;
            }
            app.applicant_name = clean_optional(app.applicant_name);
            app.case_officer = clean_optional(app.case_officer);
            app.development_type = clean_optional(app.development_type);
            app.parish = clean_optional(app.parish);
            StorageRecord::PlanningApplication(app)
        }

        StorageRecord::Agenda(agenda) => {
            if agenda.meeting_title.trim().is_empty() {
                return Err(ValidationError {
                    kind: "agenda",
                    field: "meeting_title",
                    source_url: agenda.source_url,
                });
            }
            if agenda.agenda_items.iter().any(|i| i.page_number == 0) {
                return Err(ValidationError {
                    kind: "agenda",
                    field: "page_number",
                    source_url: agenda.source_url,
                });
            }
            StorageRecord::Agenda(agenda)
        }

        StorageRecord::Minutes(minutes) => {
            if minutes.meeting_title.trim().is_empty() {
                return Err(ValidationError {
                    kind: "minutes",
                    field: "meeting_title",
                    source_url: minutes.source_url,
                });
            }
            StorageRecord::Minutes(minutes)
        }

        report @ StorageRecord::CoverageReport(_) => report,
    };

    Ok(ValidatedRecord { record, anomaly })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::*;
    use chrono::{NaiveDate, Utc};
    use std::str::FromStr;

    fn spending(amount: &str, year: i32) -> StorageRecord {
        StorageRecord::Spending(SpendingRecord {
            transaction_date: NaiveDate::from_ymd_opt(year, 6, 1).unwrap(),
            supplier: "  Acme Ltd  ".to_string(),
            department: "Highways".to_string(),
            description: "works".to_string(),
            amount: Decimal::from_str(amount).unwrap(),
            category: Category::Transparency,
            invoice_number: Some("  ".to_string()),
            source_url: "https://www.bolton.gov.uk/spend.csv".to_string(),
            extracted_at: Utc::now(),
        })
    }

    #[test]
    fn valid_spending_passes_and_is_trimmed() {
        let validated = validate(spending("1500.00", 2024)).unwrap();
        assert!(!validated.anomaly);
        match validated.record {
            StorageRecord::Spending(s) => {
                assert_eq!(s.supplier, "Acme Ltd");
                assert_eq!(s.invoice_number, None);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn negative_amount_rejected() {
        let error = validate(spending("-10.00", 2024)).unwrap_err();
        assert_eq!(error.field, "amount");
        assert_eq!(error.kind, "spending");
    }

    #[test]
    fn huge_amount_rejected_above_cap() {
        let error = validate(spending("10000000001", 2024)).unwrap_err();
        assert_eq!(error.field, "amount");
    }

    #[test]
    fn large_amount_flagged_but_retained() {
        let validated = validate(spending("25000000", 2024)).unwrap();
        assert!(validated.anomaly);
    }

    #[test]
    fn amount_at_anomaly_threshold_not_flagged() {
        let validated = validate(spending("10000000", 2024)).unwrap();
        assert!(!validated.anomaly);
    }

    #[test]
    fn out_of_range_date_rejected() {
        let error = validate(spending("100.00", 1999)).unwrap_err();
        assert_eq!(error.field, "transaction_date");
    }

    #[test]
    fn unknown_strings_become_missing_in_optionals() {
        let record = StorageRecord::PlanningApplication(PlanningApplication {
            reference: "23/00001/FUL".to_string(),
            address: "Somewhere".to_string(),
            proposal: "Extension".to_string(),
            status: PlanningStatus::Pending,
            received_date: None,
            decision_date: None,
            applicant_name: Some("Unknown".to_string()),
            coordinates: None,
            document_urls: Default::default(),
            source_url: "https://paplanning.bolton.gov.uk/x".to_string(),
            case_officer: Some("  ".to_string()),
            consultation_end_date: None,
            development_type: None,
            parish: Some("Crompton".to_string()),
        });
        match validate(record).unwrap().record {
            StorageRecord::PlanningApplication(app) => {
                assert_eq!(app.applicant_name, None);
                assert_eq!(app.case_officer, None);
                assert_eq!(app.parish.as_deref(), Some("Crompton"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn empty_planning_reference_rejected() {
        let record = StorageRecord::PlanningApplication(PlanningApplication {
            reference: "   ".to_string(),
            address: String::new(),
            proposal: String::new(),
            status: PlanningStatus::Pending,
            received_date: None,
            decision_date: None,
            applicant_name: None,
            coordinates: None,
            document_urls: Default::default(),
            source_url: "https://paplanning.bolton.gov.uk/x".to_string(),
            case_officer: None,
            consultation_end_date: None,
            development_type: None,
            parish: None,
        });
        let error = validate(record).unwrap_err();
        assert_eq!(error.field, "reference");
    }

    #[test]
    fn quality_score_clamped() {
        let record = StorageRecord::Page(PageRecord {
            url: "https://www.bolton.gov.uk/a".to_string(),
            parent_url: None,
            title: Some("".to_string()),
            description: None,
            category: Category::Services,
            content_length: 10,
            quality_score: 140,
            crawled_at: Utc::now(),
        });
        match validate(record).unwrap().record {
            StorageRecord::Page(page) => {
                assert_eq!(page.quality_score, 100);
                assert_eq!(page.title, None);
            }
            _ => unreachable!(),
        }
    }
}
