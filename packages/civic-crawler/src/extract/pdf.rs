//! PDF extraction: meeting agendas, minutes, and general financial
//! signals from text-layer PDFs.
//!
//! The lopdf boundary is one small function; everything after it works
//! on plain per-page text, which is what the tests drive.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;

use crate::error::{ExtractError, ExtractResult};
use crate::extract::text::{find_amounts, grade_confidence};
use crate::extract::ExtractedBundle;
use crate::records::{
    AgendaDocument, AgendaItem, Category, Confidence, MinutesDecision, MinutesDocument,
    StatisticalDatum,
};

lazy_static! {
    static ref NUMBERED_HEADING: Regex =
        Regex::new(r"^\s*(\d+(?:\.\d+)*)[.\s]+(\S.*)$").unwrap();
    static ref DECISION_LINE: Regex =
        Regex::new(r"(?i)^\s*(?:RESOLVED|DECIDED|AGREED)\b[:\s-]*(.*)$").unwrap();
    static ref ACTION_LINE: Regex = Regex::new(r"(?i)^\s*ACTION\s*:\s*(.*)$").unwrap();
    static ref ATTENDEE_HEADER: Regex =
        Regex::new(r"(?i)^\s*(?:Present|Attendees)\b[:\s]*(.*)$").unwrap();
    static ref TEXT_DATE: Regex = Regex::new(
        r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+(January|February|March|April|May|June|July|August|September|October|November|December)\s+(\d{4})\b"
    )
    .unwrap();
    static ref NUMERIC_DATE: Regex = Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b").unwrap();
    static ref COMMITTEE_LINE: Regex =
        Regex::new(r"(?i)\b(committee|council|cabinet|board|panel|forum)\b").unwrap();
}

/// Parsing mode, chosen from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfMode {
    Agenda,
    Minutes,
    General,
}

pub fn mode_for(url: &str) -> PdfMode {
    let lowered = url.to_ascii_lowercase();
    if lowered.contains("agenda") {
        PdfMode::Agenda
    } else if lowered.contains("minutes") {
        PdfMode::Minutes
    } else {
        PdfMode::General
    }
}

/// Result of one PDF pass.
#[derive(Debug)]
pub struct PdfReport {
    pub bundle: ExtractedBundle,
    pub mode: PdfMode,
    pub page_count: usize,
}

/// Load the text layer, one string per page.
pub fn page_texts(bytes: &[u8]) -> ExtractResult<Vec<String>> {
    let document = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Parse {
        stage: "pdf-load",
        message: e.to_string(),
    })?;
    let mut pages = Vec::new();
    for (page_number, _) in document.get_pages() {
        let text = document
            .extract_text(&[page_number])
            .unwrap_or_default();
        pages.push(text);
    }
    if pages.is_empty() {
        return Err(ExtractError::Parse {
            stage: "pdf-load",
            message: "document has no pages".to_string(),
        });
    }
    Ok(pages)
}

/// Full extraction: load, pick a mode from the URL, parse.
pub fn extract_pdf(
    bytes: &[u8],
    source_url: &str,
    category: Category,
) -> ExtractResult<PdfReport> {
    let pages = page_texts(bytes)?;
    let mode = mode_for(source_url);
    let bundle = match mode {
        PdfMode::Agenda => parse_agenda(&pages, source_url, category),
        PdfMode::Minutes => parse_minutes(&pages, source_url, category),
        PdfMode::General => parse_general(&pages, source_url, category),
    };
    Ok(PdfReport {
        bundle,
        mode,
        page_count: pages.len(),
    })
}

fn find_date(text: &str) -> Option<NaiveDate> {
    if let Some(cap) = TEXT_DATE.captures(text) {
        let day: u32 = cap[1].parse().ok()?;
        let month = match cap[2].to_ascii_lowercase().as_str() {
            "january" => 1,
            "february" => 2,
            "march" => 3,
            "april" => 4,
            "may" => 5,
            "june" => 6,
            "july" => 7,
            "august" => 8,
            "september" => 9,
            "october" => 10,
            "november" => 11,
            "december" => 12,
            _ => return None,
        };
        let year: i32 = cap[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    NUMERIC_DATE
        .find(text)
        .and_then(|m| crate::extract::parse_date(m.as_str()))
}

fn first_nonempty_line(pages: &[String]) -> String {
    pages
        .first()
        .and_then(|p| p.lines().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("Untitled document")
        .to_string()
}

fn committee_of(pages: &[String], fallback: &str) -> String {
    pages
        .first()
        .and_then(|p| {
            p.lines()
                .map(str::trim)
                .find(|l| COMMITTEE_LINE.is_match(l) && l.len() < 120)
        })
        .unwrap_or(fallback)
        .to_string()
}

fn item_confidence(title: &str) -> Confidence {
    if title.trim().len() >= 20 {
        Confidence::High
    } else {
        Confidence::Medium
    }
}

/// Agenda mode: contiguous numbered headings become agenda items.
/// Sub-numbered items (`1.1`) stay siblings, keeping the dotted number.
pub fn parse_agenda(pages: &[String], source_url: &str, category: Category) -> ExtractedBundle {
    let meeting_title = first_nonempty_line(pages);
    let committee = committee_of(pages, &meeting_title);
    let meeting_date = pages.first().and_then(|p| find_date(p));

    let mut items: Vec<AgendaItem> = Vec::new();
    for (index, page) in pages.iter().enumerate() {
        let page_number = (index + 1) as u32;
        for line in page.lines() {
            if let Some(cap) = NUMBERED_HEADING.captures(line) {
                let title = cap[2].trim().to_string();
                items.push(AgendaItem {
                    item_number: cap[1].to_string(),
                    title: title.clone(),
                    page_number,
                    confidence: item_confidence(&title),
                });
            } else if let Some(last) = items.last_mut() {
                // Continuation text belongs to the previous heading.
                let trailing = line.trim();
                if !trailing.is_empty() && last.title.len() < 200 {
                    last.title = format!("{} {}", last.title, trailing);
                    last.confidence = item_confidence(&last.title);
                }
            }
        }
    }

    let mut bundle = ExtractedBundle::default();

    // Each item doubles as a weak quantitative signal for coverage.
    for item in &items {
        let leading: Decimal = item
            .item_number
            .split('.')
            .next()
            .and_then(|n| n.parse::<i64>().ok())
            .map(Decimal::from)
            .unwrap_or_default();
        bundle.statistical_data.push(StatisticalDatum {
            category,
            subcategory: Some(item.title.clone()),
            metric: "agenda_item".to_string(),
            value: leading,
            unit: "index".to_string(),
            period: String::new(),
            date: meeting_date,
            source_document: source_url.to_string(),
            methodology: None,
            confidence: Confidence::Low,
            last_updated: chrono::Utc::now(),
        });
    }

    bundle.agenda = Some(AgendaDocument {
        meeting_title,
        meeting_date,
        committee,
        agenda_items: items,
        source_url: source_url.to_string(),
    });
    bundle
}

/// Minutes mode: attendees, RESOLVED/DECIDED/AGREED decisions, and
/// ACTION items.
pub fn parse_minutes(pages: &[String], source_url: &str, _category: Category) -> ExtractedBundle {
    let meeting_title = first_nonempty_line(pages);
    let committee = committee_of(pages, &meeting_title);
    let meeting_date = pages.first().and_then(|p| find_date(p));

    let mut attendees = std::collections::BTreeSet::new();
    let mut decisions = Vec::new();
    let mut actions = Vec::new();

    for (index, page) in pages.iter().enumerate() {
        let page_number = (index + 1) as u32;
        let lines: Vec<&str> = page.lines().collect();
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];

            if let Some(cap) = ATTENDEE_HEADER.captures(line) {
                // Inline names after the header, then following lines
                // until a blank or another heading.
                let mut raw = cap[1].trim().to_string();
                let mut j = i + 1;
                while j < lines.len() {
                    let next = lines[j].trim();
                    if next.is_empty()
                        || NUMBERED_HEADING.is_match(next)
                        || DECISION_LINE.is_match(next)
                    {
                        break;
                    }
                    raw = format!("{}, {}", raw, next);
                    j += 1;
                }
                for name in raw.split([',', ';']) {
                    let name = name.trim().trim_start_matches("and ").trim();
                    if !name.is_empty() && name.len() < 80 {
                        attendees.insert(name.to_string());
                    }
                }
                i = j;
                continue;
            }

            if let Some(cap) = DECISION_LINE.captures(line) {
                let title = cap[1].trim().to_string();
                decisions.push(MinutesDecision {
                    confidence: item_confidence(&title),
                    title,
                    page_number,
                });
            } else if let Some(cap) = ACTION_LINE.captures(line) {
                let action = cap[1].trim().to_string();
                if !action.is_empty() {
                    actions.push(action);
                }
            }
            i += 1;
        }
    }

    let mut bundle = ExtractedBundle::default();
    bundle.minutes = Some(MinutesDocument {
        meeting_title,
        meeting_date,
        committee,
        attendees,
        decisions,
        actions,
        source_url: source_url.to_string(),
    });
    bundle
}

/// General mode: financial amounts with surrounding context, plus
/// numbered headings as weak signals.
pub fn parse_general(pages: &[String], source_url: &str, category: Category) -> ExtractedBundle {
    let mut bundle = ExtractedBundle::default();
    let document_date = pages.first().and_then(|p| find_date(p));

    for page in pages {
        for found in find_amounts(page) {
            bundle.statistical_data.push(StatisticalDatum {
                category,
                subcategory: None,
                metric: "amount".to_string(),
                value: found.value,
                unit: "GBP".to_string(),
                period: String::new(),
                date: document_date,
                source_document: source_url.to_string(),
                methodology: Some(found.context.clone()),
                confidence: grade_confidence(&found.context),
                last_updated: chrono::Utc::now(),
            });
        }

        for line in page.lines() {
            if let Some(cap) = NUMBERED_HEADING.captures(line) {
                bundle.statistical_data.push(StatisticalDatum {
                    category,
                    subcategory: Some(cap[2].trim().to_string()),
                    metric: "document_heading".to_string(),
                    value: Decimal::ZERO,
                    unit: "index".to_string(),
                    period: String::new(),
                    date: document_date,
                    source_document: source_url.to_string(),
                    methodology: None,
                    confidence: Confidence::Low,
                    last_updated: chrono::Utc::now(),
                });
            }
        }
    }

    bundle
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const URL: &str = "https://bolton.moderngov.co.uk/documents/agenda-2024-03.pdf";

    #[test]
    fn mode_from_filename() {
        assert_eq!(mode_for("https://x/committee-agenda.pdf"), PdfMode::Agenda);
        assert_eq!(mode_for("https://x/Minutes_Jan.pdf"), PdfMode::Minutes);
        assert_eq!(mode_for("https://x/budget-report.pdf"), PdfMode::General);
    }

    #[test]
    fn agenda_items_parse_with_pages_and_confidence() {
        let pages = vec![
            "Planning Committee\nMeeting of 12 March 2024\n\n\
             1. Apologies for absence\n\
             2. Minutes of previous meeting\n\
             3. Budget allocation for roads - £250,000\n"
                .to_string(),
            "4. Any other business\n".to_string(),
        ];
        let bundle = parse_agenda(&pages, URL, Category::Meetings);
        let agenda = bundle.agenda.unwrap();

        assert_eq!(agenda.meeting_title, "Planning Committee");
        assert_eq!(agenda.committee, "Planning Committee");
        assert_eq!(
            agenda.meeting_date,
            NaiveDate::from_ymd_opt(2024, 3, 12)
        );
        assert_eq!(agenda.agenda_items.len(), 4);
        assert_eq!(agenda.agenda_items[0].item_number, "1");
        assert_eq!(agenda.agenda_items[2].item_number, "3");
        assert_eq!(agenda.agenda_items[3].page_number, 2);
        // Long titles grade high, short ones medium.
        assert_eq!(agenda.agenda_items[2].confidence, Confidence::High);
        // One weak statistical signal per item.
        assert_eq!(bundle.statistical_data.len(), 4);
    }

    #[test]
    fn subnumbered_items_are_siblings() {
        let pages = vec![
            "Committee\n1. Main report considered by members\n1.1 Financial annex with detail\n1.2 Risks\n"
                .to_string(),
        ];
        let bundle = parse_agenda(&pages, URL, Category::Meetings);
        let agenda = bundle.agenda.unwrap();
        let numbers: Vec<&str> = agenda
            .agenda_items
            .iter()
            .map(|i| i.item_number.as_str())
            .collect();
        assert_eq!(numbers, vec!["1", "1.1", "1.2"]);
    }

    #[test]
    fn minutes_parse_attendees_decisions_actions() {
        let pages = vec![
            "Cabinet Minutes\n18 January 2024\n\n\
             Present: Cllr Smith, Cllr Jones, Cllr Patel\n\
             Cllr Ahmed\n\
             \n\
             1. Budget report\n\
             RESOLVED: That the budget for 2024/25 be approved\n\
             AGREED - officers to publish the spending data\n\
             ACTION: Finance team to circulate final figures\n"
                .to_string(),
        ];
        let bundle = parse_minutes(
            &pages,
            "https://bolton.moderngov.co.uk/minutes-jan.pdf",
            Category::Meetings,
        );
        let minutes = bundle.minutes.unwrap();

        assert!(minutes.attendees.contains("Cllr Smith"));
        assert!(minutes.attendees.contains("Cllr Ahmed"));
        assert_eq!(minutes.attendees.len(), 4);
        assert_eq!(minutes.decisions.len(), 2);
        assert!(minutes.decisions[0].title.contains("budget for 2024/25"));
        assert_eq!(minutes.actions.len(), 1);
        assert!(minutes.actions[0].contains("Finance team"));
    }

    #[test]
    fn general_mode_extracts_amounts_with_context() {
        let pages = vec![
            "The council allocated £250,000 for roads maintenance this year.\n\
             A further sum of 50000 pounds was set aside.\n"
                .to_string(),
        ];
        let bundle = parse_general(
            &pages,
            "https://www.bolton.gov.uk/docs/budget-report.pdf",
            Category::Transparency,
        );
        let amounts: Vec<_> = bundle
            .statistical_data
            .iter()
            .filter(|d| d.metric == "amount")
            .collect();
        assert_eq!(amounts.len(), 2);
        assert_eq!(amounts[0].value, Decimal::from_str("250000").unwrap());
        assert!(amounts[0]
            .methodology
            .as_deref()
            .unwrap()
            .contains("roads"));
        // "allocated" in context grades high.
        assert_eq!(amounts[0].confidence, Confidence::High);
        assert_eq!(amounts[1].value, Decimal::from(50000));
    }

    #[test]
    fn garbage_bytes_fail_cleanly() {
        let result = page_texts(b"this is not a pdf at all");
        assert!(matches!(result, Err(ExtractError::Parse { .. })));
    }
}
