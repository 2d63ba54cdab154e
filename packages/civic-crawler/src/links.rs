//! Link extraction from fetched HTML.
//!
//! Synchronous on purpose: `scraper::Html` is not `Send`, so the DOM
//! never crosses an await point. Workers call this between fetches.

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

use crate::classify::categorize;
use crate::frontier::{is_file_url, normalize_url};
use crate::records::Category;

/// Link text that marks a spending data trail; promotes the target to
/// the top priority tier.
const SPENDING_KEYWORDS: &[&str] = &[
    "spending",
    "expenditure",
    "payment",
    "supplier",
    "procurement",
    "budget",
    "allocation",
    "£500",
    "over 500",
    "invoice",
    "salary",
];

/// A candidate URL discovered on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredLink {
    pub url: String,
    pub link_text: String,
    pub category: Category,
    /// Frontier tier: 0 files/spending, 1 categorized, 2 generic
    pub priority: u8,
}

/// Extract every crawlable anchor from `html`, resolved against
/// `base_url` and filtered to `allowed_hosts`. Each normalized URL is
/// emitted at most once per page, first occurrence wins.
pub fn extract_links(
    html: &str,
    base_url: &Url,
    allowed_hosts: &HashSet<String>,
) -> Vec<DiscoveredLink> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector");

    let mut seen: HashSet<String> = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with("javascript:")
        {
            continue;
        }

        let Ok(resolved) = base_url.join(href) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        let Some(host) = resolved.host_str().map(|h| h.to_ascii_lowercase()) else {
            continue;
        };
        if !allowed_hosts.contains(&host) {
            continue;
        }

        let Some(normalized) = normalize_url(resolved.as_str()) else {
            continue;
        };
        if !seen.insert(normalized.clone()) {
            continue;
        }

        let link_text = element.text().collect::<String>().trim().to_string();
        let category = categorize(&normalized, Some(&link_text));
        let priority = priority_for(&normalized, &link_text, category);

        links.push(DiscoveredLink {
            url: normalized,
            link_text,
            category,
            priority,
        });
    }

    links
}

/// `<title>` text, trimmed.
pub fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").expect("static selector");
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// `<meta name="description">` content.
pub fn meta_description(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"meta[name="description"]"#).expect("static selector");
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn priority_for(url: &str, link_text: &str, category: Category) -> u8 {
    let text = link_text.to_ascii_lowercase();
    if is_file_url(url) || SPENDING_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        0
    } else if category != Category::Services && category != Category::Other {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> HashSet<String> {
        HashSet::from(["www.bolton.gov.uk".to_string()])
    }

    fn base() -> Url {
        Url::parse("https://www.bolton.gov.uk/transparency-and-performance/spending-over-500")
            .unwrap()
    }

    #[test]
    fn resolves_relative_and_filters_schemes() {
        let html = r##"
            <a href="/sites/default/files/spending_over_500.csv">Spending over £500</a>
            <a href="contact">Contact us</a>
            <a href="mailto:info@bolton.gov.uk">Email</a>
            <a href="tel:01204333333">Phone</a>
            <a href="javascript:void(0)">Toggle</a>
            <a href="#main">Skip to content</a>
        "##;
        let links = extract_links(html, &base(), &hosts());
        assert_eq!(links.len(), 2);
        assert_eq!(
            links[0].url,
            "https://www.bolton.gov.uk/sites/default/files/spending_over_500.csv"
        );
        assert!(links[1].url.ends_with("/transparency-and-performance/contact"));
    }

    #[test]
    fn file_links_get_top_priority() {
        let html = r#"<a href="/files/data.csv">Download data</a>"#;
        let links = extract_links(html, &base(), &hosts());
        assert_eq!(links[0].priority, 0);
    }

    #[test]
    fn spending_text_promotes_priority() {
        let html = r#"<a href="/some/page">Spending over £500</a>"#;
        let links = extract_links(html, &base(), &hosts());
        assert_eq!(links[0].priority, 0);
        assert_eq!(links[0].category, Category::Transparency);
    }

    #[test]
    fn categorized_links_get_middle_priority() {
        let html = r#"<a href="/council-tax/bands">Council tax bands</a>"#;
        let links = extract_links(html, &base(), &hosts());
        assert_eq!(links[0].priority, 1);
        assert_eq!(links[0].category, Category::CouncilTax);
    }

    #[test]
    fn generic_links_get_base_priority() {
        let html = r#"<a href="/bins">Bin collections</a>"#;
        let links = extract_links(html, &base(), &hosts());
        assert_eq!(links[0].priority, 2);
        assert_eq!(links[0].category, Category::Services);
    }

    #[test]
    fn off_allowlist_hosts_dropped() {
        let html = r#"
            <a href="https://www.gov.uk/national">National</a>
            <a href="https://www.bolton.gov.uk/local">Local</a>
        "#;
        let links = extract_links(html, &base(), &hosts());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://www.bolton.gov.uk/local");
    }

    #[test]
    fn title_and_description_helpers() {
        let html = r#"<html><head><title> Spending data </title>
            <meta name="description" content="Monthly spending over £500"></head></html>"#;
        assert_eq!(page_title(html).as_deref(), Some("Spending data"));
        assert_eq!(
            meta_description(html).as_deref(),
            Some("Monthly spending over £500")
        );
        assert_eq!(page_title("<html></html>"), None);
    }

    #[test]
    fn duplicates_emitted_once_per_page() {
        let html = r#"
            <a href="/page">First</a>
            <a href="/page#section">Second spelling</a>
            <a href="/page">Third</a>
        "#;
        let links = extract_links(html, &base(), &hosts());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_text, "First");
    }
}
