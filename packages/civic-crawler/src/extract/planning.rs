//! Planning application extraction from planning-portal pages.
//!
//! Portal detail pages lay application fields out as label/value pairs
//! (table rows or definition lists). The reference is the anchor field:
//! no reference, no record.

use std::collections::{BTreeSet, HashMap};

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::extract::parse_date;
use crate::frontier::is_file_url;
use crate::records::{PlanningApplication, PlanningStatus};

lazy_static! {
    /// UK application references: `23/01234/FUL` or `12345/21`.
    static ref REFERENCE: Regex =
        Regex::new(r"\b(\d{2}/\d{4,5}/[A-Z]{2,5}|\d{4,5}/\d{2})\b").unwrap();
}

fn field_labels() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        ("reference", &["reference", "application number", "application ref"]),
        ("address", &["address", "site address", "location"]),
        ("proposal", &["proposal", "description", "development description"]),
        ("received", &["received", "date received", "registered"]),
        ("decision_date", &["decision date", "decision issued", "date of decision"]),
        // After decision_date so a "Decision Date" label cannot bind here
        ("status", &["status", "decision", "application status"]),
        ("applicant", &["applicant", "applicant name"]),
        ("case_officer", &["case officer", "officer"]),
        ("consultation_end", &["consultation end", "consultation expiry", "neighbour consultation expiry"]),
        ("development_type", &["development type", "application type"]),
        ("parish", &["parish", "ward"]),
    ]
}

/// Collect label/value pairs from `<tr><th>label</th><td>value</td></tr>`
/// rows and `<dt>label</dt><dd>value</dd>` lists.
fn collect_fields(document: &Html) -> HashMap<&'static str, String> {
    let mut raw: Vec<(String, String)> = Vec::new();

    let row_selector = Selector::parse("tr").expect("static selector");
    let cell_selector = Selector::parse("th, td").expect("static selector");
    for row in document.select(&row_selector) {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|c| c.text().collect::<String>().trim().to_string())
            .collect();
        if cells.len() >= 2 {
            raw.push((cells[0].clone(), cells[1].clone()));
        }
    }

    let dt_selector = Selector::parse("dt").expect("static selector");
    let dd_selector = Selector::parse("dd").expect("static selector");
    let dts: Vec<String> = document
        .select(&dt_selector)
        .map(|e| e.text().collect::<String>().trim().to_string())
        .collect();
    let dds: Vec<String> = document
        .select(&dd_selector)
        .map(|e| e.text().collect::<String>().trim().to_string())
        .collect();
    raw.extend(dts.into_iter().zip(dds));

    let mut fields = HashMap::new();
    for (label, value) in raw {
        if value.is_empty() {
            continue;
        }
        let label = label.to_ascii_lowercase();
        let label = label.trim_end_matches(':').trim();
        for (key, aliases) in field_labels() {
            if fields.contains_key(key) {
                continue;
            }
            if aliases.iter().any(|a| label.starts_with(a)) {
                fields.insert(*key, value.clone());
                break;
            }
        }
    }
    fields
}

/// Extract a planning application from a portal detail page. Returns
/// None when the page carries no recognizable reference.
pub fn extract_planning_page(html: &str, source_url: &str) -> Option<PlanningApplication> {
    let document = Html::parse_document(html);
    let fields = collect_fields(&document);

    let reference = fields
        .get("reference")
        .and_then(|v| REFERENCE.find(v).map(|m| m.as_str().to_string()))
        .or_else(|| {
            let text = document.root_element().text().collect::<String>();
            REFERENCE.find(&text).map(|m| m.as_str().to_string())
        })?;

    let status = fields
        .get("status")
        .map(|s| PlanningStatus::normalize(s))
        .unwrap_or(PlanningStatus::Pending);

    let base = Url::parse(source_url).ok();
    let mut document_urls = BTreeSet::new();
    if let Some(base) = &base {
        let anchor = Selector::parse("a[href]").expect("static selector");
        for element in document.select(&anchor) {
            if let Some(href) = element.value().attr("href") {
                if let Ok(resolved) = base.join(href) {
                    if is_file_url(resolved.as_str()) {
                        document_urls.insert(resolved.to_string());
                    }
                }
            }
        }
    }

    Some(PlanningApplication {
        reference,
        address: fields.get("address").cloned().unwrap_or_default(),
        proposal: fields.get("proposal").cloned().unwrap_or_default(),
        status,
        received_date: fields.get("received").and_then(|v| parse_date(v)),
        decision_date: fields.get("decision_date").and_then(|v| parse_date(v)),
        applicant_name: fields.get("applicant").cloned(),
        coordinates: None,
        document_urls,
        source_url: source_url.to_string(),
        case_officer: fields.get("case_officer").cloned(),
        consultation_end_date: fields.get("consultation_end").and_then(|v| parse_date(v)),
        development_type: fields.get("development_type").cloned(),
        parish: fields.get("parish").cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const URL: &str =
        "https://paplanning.bolton.gov.uk/online-applications/applicationDetails.do?keyVal=ABC";

    #[test]
    fn detail_page_extracts_fields() {
        let html = r#"
        <html><body><table>
            <tr><th>Reference</th><td>23/01234/FUL</td></tr>
            <tr><th>Site Address</th><td>1 Town Hall Square, Bolton</td></tr>
            <tr><th>Proposal</th><td>Two storey rear extension</td></tr>
            <tr><th>Status</th><td>Application Granted</td></tr>
            <tr><th>Date Received</th><td>15/01/2024</td></tr>
            <tr><th>Decision Date</th><td>12/03/2024</td></tr>
            <tr><th>Case Officer</th><td>J Smith</td></tr>
            <tr><th>Ward</th><td>Crompton</td></tr>
        </table>
        <a href="/docs/decision-notice.pdf">Decision notice</a>
        </body></html>"#;

        let app = extract_planning_page(html, URL).unwrap();
        assert_eq!(app.reference, "23/01234/FUL");
        assert_eq!(app.address, "1 Town Hall Square, Bolton");
        assert_eq!(app.status, PlanningStatus::Approved);
        assert_eq!(app.received_date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(app.decision_date, NaiveDate::from_ymd_opt(2024, 3, 12));
        assert_eq!(app.case_officer.as_deref(), Some("J Smith"));
        assert_eq!(app.parish.as_deref(), Some("Crompton"));
        assert_eq!(app.document_urls.len(), 1);
        assert!(app
            .document_urls
            .iter()
            .next()
            .unwrap()
            .ends_with("/docs/decision-notice.pdf"));
    }

    #[test]
    fn definition_list_layout_also_works() {
        let html = r#"
        <html><body><dl>
            <dt>Application Number:</dt><dd>12345/21</dd>
            <dt>Location</dt><dd>Land off Chorley New Road</dd>
            <dt>Status</dt><dd>Awaiting consideration</dd>
        </dl></body></html>"#;

        let app = extract_planning_page(html, URL).unwrap();
        assert_eq!(app.reference, "12345/21");
        assert_eq!(app.status, PlanningStatus::UnderReview);
    }

    #[test]
    fn page_without_reference_yields_nothing() {
        let html = "<html><body><p>Search for planning applications</p></body></html>";
        assert!(extract_planning_page(html, URL).is_none());
    }

    #[test]
    fn status_defaults_to_pending() {
        let html = r#"
        <html><body><table>
            <tr><th>Reference</th><td>23/00001/OUT</td></tr>
        </table></body></html>"#;
        let app = extract_planning_page(html, URL).unwrap();
        assert_eq!(app.status, PlanningStatus::Pending);
    }
}
