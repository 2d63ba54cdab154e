//! Multi-criterion quality scoring for fetched HTML.
//!
//! Pure: equal inputs give equal outputs. The caller injects the
//! reference date so freshness does not depend on the wall clock.

use std::collections::HashMap;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::frontier::is_file_url;
use crate::records::{Category, QualityScore, QualityTier};

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
    static ref UK_PHONE_RE: Regex =
        Regex::new(r"(?:\+44\s?\d{2,4}|\(?0\d{2,4}\)?)[\s.-]?\d{3,4}[\s.-]?\d{3,4}\b").unwrap();
    static ref NUMERIC_DATE_RE: Regex =
        Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4})\b").unwrap();
    static ref ISO_DATE_RE: Regex = Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap();
    static ref TEXT_DATE_RE: Regex = Regex::new(
        r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+(January|February|March|April|May|June|July|August|September|October|November|December)\s+(\d{4})\b"
    )
    .unwrap();
}

/// Score a page. `reference` anchors the freshness window; production
/// passes today's date.
pub fn score(html: &str, url: &str, category: Category, reference: NaiveDate) -> QualityScore {
    let document = Html::parse_document(html);
    let text = document.root_element().text().collect::<Vec<_>>().join(" ");
    let mut components: HashMap<String, u32> = HashMap::new();

    // Content (max 40): word volume plus a sane heading outline.
    let word_count = text.split_whitespace().count();
    let word_points = match word_count {
        0..=99 => 0,
        100..=299 => 10,
        300..=999 => 20,
        _ => 30,
    };
    components.insert("word_count".into(), word_points);

    let outline_points = if has_sane_outline(&document) { 10 } else { 0 };
    components.insert("heading_outline".into(), outline_points);
    let content_score = word_points + outline_points;

    // Structure (max 25).
    let tables = if select_any(&document, "table") { 10 } else { 0 };
    let lists = if select_any(&document, "ul, ol") { 5 } else { 0 };
    let sections = if select_any(&document, "main, article, section") {
        10
    } else {
        0
    };
    components.insert("tables".into(), tables);
    components.insert("lists".into(), lists);
    components.insert("semantic_sections".into(), sections);
    let structure_score = tables + lists + sections;

    // Contact (max 15).
    let email = if EMAIL_RE.is_match(&text) { 7 } else { 0 };
    let phone = if UK_PHONE_RE.is_match(&text) { 8 } else { 0 };
    components.insert("email".into(), email);
    components.insert("phone".into(), phone);
    let contact_score = email + phone;

    // Freshness (max 10).
    let freshness = freshness_points(&text, reference);
    components.insert("freshness".into(), freshness);

    // Citations (max 10): links into the same government domain plus
    // links to data files.
    let (gov_links, file_links, meeting_file_cited) = link_signals(&document, url);
    let gov_points = if gov_links >= 3 { 5 } else { 0 };
    let file_points = if file_links >= 1 { 5 } else { 0 };
    components.insert("gov_links".into(), gov_points);
    components.insert("data_file_links".into(), file_points);
    let citation_score = gov_points + file_points;

    let mut overall = content_score + structure_score + contact_score + freshness + citation_score;

    if category == Category::Meetings && meeting_file_cited {
        components.insert("meetings_bonus".into(), 5);
        overall += 5;
    }

    let overall_score = overall.min(100);
    QualityScore {
        overall_score,
        content_score,
        structure_score,
        contact_score,
        components,
        tier: QualityTier::from_score(overall_score),
    }
}

fn select_any(document: &Html, selector: &str) -> bool {
    Selector::parse(selector)
        .map(|s| document.select(&s).next().is_some())
        .unwrap_or(false)
}

/// An outline is sane when there is a top heading and no level deeper
/// than h3 is used.
fn has_sane_outline(document: &Html) -> bool {
    let h1 = select_any(document, "h1");
    let deep = select_any(document, "h4, h5, h6");
    h1 && !deep
}

fn freshness_points(text: &str, reference: NaiveDate) -> u32 {
    let mut best: Option<i64> = None;
    let mut consider = |date: Option<NaiveDate>| {
        if let Some(date) = date {
            let age = (reference - date).num_days().abs();
            best = Some(best.map_or(age, |b: i64| b.min(age)));
        }
    };

    for cap in NUMERIC_DATE_RE.captures_iter(text) {
        let day: u32 = cap[1].parse().unwrap_or(0);
        let month: u32 = cap[2].parse().unwrap_or(0);
        let year: i32 = cap[3].parse().unwrap_or(0);
        consider(NaiveDate::from_ymd_opt(year, month, day));
    }
    for cap in ISO_DATE_RE.captures_iter(text) {
        let year: i32 = cap[1].parse().unwrap_or(0);
        let month: u32 = cap[2].parse().unwrap_or(0);
        let day: u32 = cap[3].parse().unwrap_or(0);
        consider(NaiveDate::from_ymd_opt(year, month, day));
    }
    for cap in TEXT_DATE_RE.captures_iter(text) {
        let day: u32 = cap[1].parse().unwrap_or(0);
        let month = month_number(&cap[2]);
        let year: i32 = cap[3].parse().unwrap_or(0);
        consider(NaiveDate::from_ymd_opt(year, month, day));
    }

    match best {
        Some(age) if age <= 2 * 365 => 10,
        Some(age) if age <= 5 * 365 => 5,
        _ => 0,
    }
}

fn month_number(name: &str) -> u32 {
    match name.to_ascii_lowercase().as_str() {
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
        _ => 0,
    }
}

/// Count same-government-domain links and data-file links, and whether
/// an agenda or minutes file is cited.
fn link_signals(document: &Html, page_url: &str) -> (usize, usize, bool) {
    let page_host = Url::parse(page_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()));
    let page_is_gov = page_host
        .as_deref()
        .map(|h| h.ends_with(".gov.uk") || h.ends_with(".moderngov.co.uk"))
        .unwrap_or(false);

    let selector = Selector::parse("a[href]").expect("static selector");
    let base = Url::parse(page_url).ok();

    let mut gov_links = 0usize;
    let mut file_links = 0usize;
    let mut meeting_file = false;

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let resolved = match &base {
            Some(base) => base.join(href).ok(),
            None => Url::parse(href).ok(),
        };
        let Some(resolved) = resolved else { continue };
        let host = resolved
            .host_str()
            .map(|h| h.to_ascii_lowercase())
            .unwrap_or_default();

        if page_is_gov && Some(host.as_str()) == page_host.as_deref() {
            gov_links += 1;
        }
        if is_file_url(resolved.as_str()) {
            file_links += 1;
            let lowered = resolved.as_str().to_ascii_lowercase();
            let text = element.text().collect::<String>().to_ascii_lowercase();
            if lowered.contains("agenda")
                || lowered.contains("minutes")
                || text.contains("agenda")
                || text.contains("minutes")
            {
                meeting_file = true;
            }
        }
    }

    (gov_links, file_links, meeting_file)
}
