//! Regex extraction of quantitative facts from plain text.
//!
//! Detects money amounts, percentages, people counts and durations.
//! Confidence is graded from the surrounding context: financial wording
//! grades high, a bare number grades low.

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;

use crate::extract::parse_amount;
use crate::records::{Category, Confidence, StatisticalDatum};

/// Characters of context captured either side of a match.
const CONTEXT_RADIUS: usize = 80;

lazy_static! {
    static ref POUND_AMOUNT: Regex =
        Regex::new(r"£\s?\d{1,3}(?:,\d{3})*(?:\.\d+)?").unwrap();
    static ref WORDED_AMOUNT: Regex = Regex::new(r"\b(\d{4,})\s*pounds?\b").unwrap();
    static ref PERCENTAGE: Regex = Regex::new(r"\b(\d{1,3}(?:\.\d+)?)\s?(?:%|per\s?cent)").unwrap();
    static ref PEOPLE_COUNT: Regex = Regex::new(
        r"(?i)\b(\d{1,3}(?:,\d{3})*)\s+(people|residents|households|homes|staff|employees|children|pupils)\b"
    )
    .unwrap();
    static ref DURATION: Regex =
        Regex::new(r"(?i)\b(\d{1,4})\s+(days?|weeks?|months?|years?)\b").unwrap();
    static ref HIGH_CONTEXT: Regex = Regex::new(
        r"(?i)\b(budget|allocat|spent|spend|expenditure|cost|funding|invest|contract|grant)"
    )
    .unwrap();
    static ref MEDIUM_CONTEXT: Regex = Regex::new(
        r"(?i)\b(total|annual|per\s?cent|average|increase|decrease|target|population|service)"
    )
    .unwrap();
}

/// A money amount with its surrounding context.
#[derive(Debug, Clone)]
pub struct FoundAmount {
    pub value: Decimal,
    pub context: String,
    pub position: usize,
}

/// Grade confidence from context wording.
pub fn grade_confidence(context: &str) -> Confidence {
    if HIGH_CONTEXT.is_match(context) {
        Confidence::High
    } else if MEDIUM_CONTEXT.is_match(context) {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

fn boundary_floor(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn boundary_ceil(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

fn context_around(text: &str, start: usize, end: usize) -> String {
    let from = boundary_floor(text, start.saturating_sub(CONTEXT_RADIUS));
    let to = boundary_ceil(text, (end + CONTEXT_RADIUS).min(text.len()));
    text[from..to].trim().to_string()
}

/// Money amounts in document order: `£1,234.56` and `NNNN pounds`.
pub fn find_amounts(text: &str) -> Vec<FoundAmount> {
    let mut found = Vec::new();

    for m in POUND_AMOUNT.find_iter(text) {
        if let Some(value) = parse_amount(m.as_str()) {
            found.push(FoundAmount {
                value,
                context: context_around(text, m.start(), m.end()),
                position: m.start(),
            });
        }
    }
    for cap in WORDED_AMOUNT.captures_iter(text) {
        let m = cap.get(1).expect("group 1");
        if let Some(value) = parse_amount(m.as_str()) {
            found.push(FoundAmount {
                value,
                context: context_around(text, m.start(), m.end()),
                position: m.start(),
            });
        }
    }

    found.sort_by_key(|f| f.position);
    found
}

/// Full statistical sweep over free text.
pub fn extract_stats(text: &str, source_url: &str, category: Category) -> Vec<StatisticalDatum> {
    let mut data = Vec::new();
    let datum = |metric: &str, value: Decimal, unit: &str, context: String| StatisticalDatum {
        category,
        subcategory: None,
        metric: metric.to_string(),
        value,
        unit: unit.to_string(),
        period: String::new(),
        date: None,
        source_document: source_url.to_string(),
        methodology: Some(context.clone()),
        confidence: grade_confidence(&context),
        last_updated: Utc::now(),
    };

    for amount in find_amounts(text) {
        data.push(datum("amount", amount.value, "GBP", amount.context));
    }

    for cap in PERCENTAGE.captures_iter(text) {
        let m = cap.get(1).expect("group 1");
        if let Ok(value) = m.as_str().parse::<Decimal>() {
            let whole = cap.get(0).expect("whole match");
            data.push(datum(
                "percentage",
                value,
                "percent",
                context_around(text, whole.start(), whole.end()),
            ));
        }
    }

    for cap in PEOPLE_COUNT.captures_iter(text) {
        if let Some(value) = parse_amount(&cap[1]) {
            let whole = cap.get(0).expect("whole match");
            data.push(datum(
                "people_count",
                value,
                cap[2].to_ascii_lowercase().as_str(),
                context_around(text, whole.start(), whole.end()),
            ));
        }
    }

    for cap in DURATION.captures_iter(text) {
        if let Ok(value) = cap[1].parse::<Decimal>() {
            let whole = cap.get(0).expect("whole match");
            data.push(datum(
                "duration",
                value,
                cap[2].to_ascii_lowercase().trim_end_matches('s'),
                context_around(text, whole.start(), whole.end()),
            ));
        }
    }

    data
}
