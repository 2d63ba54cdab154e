//! Header-aware tabular extraction.
//!
//! CSV bytes go through encoding detection, delimiter and quote
//! detection, then the same header/row analysis the Excel reader uses.

use chardetng::EncodingDetector;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::error::{ExtractError, ExtractResult};
use crate::extract::{parse_amount, parse_date, ExtractedBundle, MAX_YEAR, MIN_YEAR};
use crate::records::{BudgetItem, Category, Confidence, SpendingRecord, StatisticalDatum};

/// Delimiters tried, in preference order on ties.
const DELIMITERS: &[u8] = &[b',', b';', b'\t', b'|'];

lazy_static! {
    static ref FINANCIAL_HEADER: Regex =
        Regex::new(r"(?i)amount|cost|budget|spend|price|value|£|\$").unwrap();
    static ref DATE_HEADER: Regex =
        Regex::new(r"(?i)date|time|received|published|updated|created").unwrap();
    static ref DEPARTMENT_HEADER: Regex =
        Regex::new(r"(?i)department|service|division|team").unwrap();
    static ref CATEGORY_HEADER: Regex =
        Regex::new(r"(?i)category|type|classification").unwrap();
    static ref DESCRIPTION_HEADER: Regex =
        Regex::new(r"(?i)description|detail|purpose|summary").unwrap();
    static ref SPENDING_HEADER: Regex =
        Regex::new(r"(?i)supplier|vendor|company|payee|transaction|invoice|payment").unwrap();
    static ref BUDGET_HEADER: Regex = Regex::new(r"(?i)budget|allocation|forecast").unwrap();
    static ref SUPPLIER_HEADER: Regex =
        Regex::new(r"(?i)supplier|vendor|company|payee").unwrap();
    static ref INVOICE_HEADER: Regex = Regex::new(r"(?i)invoice").unwrap();
    static ref PERIOD_HEADER: Regex = Regex::new(r"(?i)period|quarter|month").unwrap();
    static ref YEAR_CELL: Regex = Regex::new(r"\b(20\d\d)\b").unwrap();
}

/// What a column holds, judged from its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Financial,
    Date,
    Department,
    Category,
    Description,
    Text,
}

pub fn classify_header(header: &str) -> ColumnRole {
    if FINANCIAL_HEADER.is_match(header) {
        ColumnRole::Financial
    } else if DATE_HEADER.is_match(header) {
        ColumnRole::Date
    } else if DEPARTMENT_HEADER.is_match(header) {
        ColumnRole::Department
    } else if CATEGORY_HEADER.is_match(header) {
        ColumnRole::Category
    } else if DESCRIPTION_HEADER.is_match(header) {
        ColumnRole::Description
    } else {
        ColumnRole::Text
    }
}

/// What kind of records a table yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Spending,
    Budget,
    Statistical,
}

/// Infer the table kind from its headers.
pub fn infer_kind(headers: &[String]) -> TableKind {
    if headers.iter().any(|h| SPENDING_HEADER.is_match(h)) {
        TableKind::Spending
    } else if headers.iter().any(|h| BUDGET_HEADER.is_match(h)) {
        TableKind::Budget
    } else if headers.iter().any(|h| FINANCIAL_HEADER.is_match(h)) {
        // Financial but anonymous: treat as spending
        TableKind::Spending
    } else {
        TableKind::Statistical
    }
}

/// Extraction result plus row accounting.
#[derive(Debug)]
pub struct TabularReport {
    pub bundle: ExtractedBundle,
    pub kind: TableKind,
    pub rows_parsed: usize,
    /// Rows dropped silently (non-numeric financial cell)
    pub rows_skipped: usize,
    /// Rows missing a required field
    pub parse_errors: usize,
}

/// Decode raw bytes with detected encoding, falling back to UTF-8 with
/// replacement.
pub fn decode_bytes(bytes: &[u8]) -> String {
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    let (text, used, _malformed) = encoding.decode(bytes);
    debug!(encoding = used.name(), "decoded tabular bytes");
    text.into_owned()
}

/// Pick the quote character used on a line: `"` unless only `'` appears.
fn detect_quote(line: &str) -> u8 {
    if line.contains('"') {
        b'"'
    } else if line.contains('\'') {
        b'\''
    } else {
        b'"'
    }
}

/// Count columns a delimiter would yield, ignoring delimiters inside
/// quoted regions.
fn column_count(line: &str, delimiter: u8, quote: u8) -> usize {
    let mut columns = 1;
    let mut in_quotes = false;
    for byte in line.bytes() {
        if byte == quote {
            in_quotes = !in_quotes;
        } else if byte == delimiter && !in_quotes {
            columns += 1;
        }
    }
    columns
}

/// Choose the delimiter yielding the most columns on the first
/// non-empty line.
pub fn detect_delimiter(text: &str) -> (u8, u8) {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let quote = detect_quote(first_line);
    let delimiter = DELIMITERS
        .iter()
        .copied()
        .max_by_key(|d| column_count(first_line, *d, quote))
        .unwrap_or(b',');
    (delimiter, quote)
}

/// Parse CSV bytes into records.
pub fn extract_csv(
    bytes: &[u8],
    source_url: &str,
    category: Category,
) -> ExtractResult<TabularReport> {
    let text = decode_bytes(bytes);
    let (delimiter, quote) = detect_delimiter(&text);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .quote(quote)
        .double_quote(true)
        .flexible(true)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ExtractError::Parse {
            stage: "csv-header",
            message: e.to_string(),
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() {
        return Err(ExtractError::Parse {
            stage: "csv-header",
            message: "no header row".to_string(),
        });
    }

    let rows = reader.records().filter_map(|r| r.ok()).map(|record| {
        record
            .iter()
            .map(|cell| cell.trim().to_string())
            .collect::<Vec<String>>()
    });

    Ok(extract_rows(&headers, rows, source_url, category))
}

/// Shared header/row analysis for CSV and spreadsheet input.
pub fn extract_rows(
    headers: &[String],
    rows: impl Iterator<Item = Vec<String>>,
    source_url: &str,
    category: Category,
) -> TabularReport {
    let roles: Vec<ColumnRole> = headers.iter().map(|h| classify_header(h)).collect();
    let kind = infer_kind(headers);

    let find = |role: ColumnRole| roles.iter().position(|r| *r == role);
    let find_header = |re: &Regex| headers.iter().position(|h| re.is_match(h));

    let date_col = find(ColumnRole::Date);
    let dept_col = find(ColumnRole::Department);
    let cat_col = find(ColumnRole::Category);
    let desc_col = find(ColumnRole::Description);
    let supplier_col = find_header(&SUPPLIER_HEADER);
    let invoice_col = find_header(&INVOICE_HEADER);
    let period_col = find_header(&PERIOD_HEADER);
    let financial_cols: Vec<usize> = roles
        .iter()
        .enumerate()
        .filter(|(_, r)| **r == ColumnRole::Financial)
        .map(|(i, _)| i)
        .collect();

    let cell = |row: &[String], col: Option<usize>| -> Option<String> {
        col.and_then(|i| row.get(i))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let mut bundle = ExtractedBundle::default();
    let mut rows_parsed = 0usize;
    let mut rows_skipped = 0usize;
    let mut parse_errors = 0usize;

    for row in rows {
        if row.iter().all(|c| c.is_empty()) {
            continue;
        }

        match kind {
            TableKind::Spending => {
                let Some(amount_raw) = cell(&row, financial_cols.first().copied()) else {
                    parse_errors += 1;
                    continue;
                };
                let Some(amount) = parse_amount(&amount_raw) else {
                    // Non-numeric financial cell: skipped silently.
                    rows_skipped += 1;
                    continue;
                };
                let Some(date) = cell(&row, date_col).and_then(|d| parse_date(&d)) else {
                    parse_errors += 1;
                    continue;
                };

                let row_category = cell(&row, cat_col)
                    .map(|c| Category::parse(&c))
                    .filter(|c| *c != Category::Other)
                    .unwrap_or(category);

                bundle.spending_records.push(SpendingRecord {
                    transaction_date: date,
                    supplier: cell(&row, supplier_col).unwrap_or_else(|| "Unknown".to_string()),
                    department: cell(&row, dept_col).unwrap_or_else(|| "Unknown".to_string()),
                    description: cell(&row, desc_col).unwrap_or_default(),
                    amount,
                    category: row_category,
                    invoice_number: cell(&row, invoice_col),
                    source_url: source_url.to_string(),
                    extracted_at: Utc::now(),
                });
                rows_parsed += 1;
            }
            TableKind::Budget => {
                let Some(amount_raw) = cell(&row, financial_cols.first().copied()) else {
                    parse_errors += 1;
                    continue;
                };
                let Some(budgeted) = parse_amount(&amount_raw) else {
                    rows_skipped += 1;
                    continue;
                };
                let actual = cell(&row, financial_cols.get(1).copied())
                    .and_then(|v| parse_amount(&v));

                let year = cell(&row, date_col)
                    .and_then(|d| parse_date(&d))
                    .map(|d| chrono::Datelike::year(&d))
                    .or_else(|| {
                        row.iter().find_map(|c| {
                            YEAR_CELL
                                .captures(c)
                                .and_then(|cap| cap[1].parse::<i32>().ok())
                        })
                    })
                    .filter(|y| (MIN_YEAR..=MAX_YEAR).contains(y));
                let Some(year) = year else {
                    parse_errors += 1;
                    continue;
                };

                bundle.budget_items.push(BudgetItem {
                    department: cell(&row, dept_col).unwrap_or_else(|| "Unknown".to_string()),
                    category,
                    subcategory: cell(&row, cat_col),
                    budgeted_amount: budgeted,
                    actual_amount: actual,
                    currency: "GBP".to_string(),
                    year: year as u16,
                    period: cell(&row, period_col).unwrap_or_else(|| "annual".to_string()),
                    description: cell(&row, desc_col),
                    source_url: source_url.to_string(),
                    last_updated: Utc::now(),
                });
                rows_parsed += 1;
            }
            TableKind::Statistical => {
                let date = cell(&row, date_col).and_then(|d| parse_date(&d));
                let label = roles
                    .iter()
                    .position(|r| *r == ColumnRole::Text)
                    .and_then(|i| row.get(i))
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty() && parse_amount(v).is_none());

                let mut produced = false;
                for (i, value) in row.iter().enumerate() {
                    if Some(i) == date_col {
                        continue;
                    }
                    let Some(value) = parse_amount(value) else {
                        continue;
                    };
                    let header = headers.get(i).cloned().unwrap_or_default();
                    let unit = if header.contains('%') || header.to_lowercase().contains("percent")
                    {
                        "percent"
                    } else {
                        "count"
                    };
                    bundle.statistical_data.push(StatisticalDatum {
                        category,
                        subcategory: label.clone(),
                        metric: header,
                        value,
                        unit: unit.to_string(),
                        period: cell(&row, period_col).unwrap_or_default(),
                        date,
                        source_document: source_url.to_string(),
                        methodology: None,
                        confidence: Confidence::Medium,
                        last_updated: Utc::now(),
                    });
                    produced = true;
                }
                if produced {
                    rows_parsed += 1;
                } else {
                    rows_skipped += 1;
                }
            }
        }
    }

    TabularReport {
        bundle,
        kind,
        rows_parsed,
        rows_skipped,
        parse_errors,
    }
}
