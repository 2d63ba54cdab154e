//! URL frontier: the prioritized queue of pending fetches.
//!
//! The orchestrator is the only mutator; workers reach the frontier
//! through a mutex. Two implementations share the [`Frontier`] trait:
//! [`MemoryFrontier`] for production runs and [`BoundedFrontier`] for
//! single-threaded tests.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::records::Category;

/// Query parameters that carry session identity, dropped during
/// normalization.
const SESSION_PARAMS: &[&str] = &["phpsessid", "jsessionid", "sessionid", "session", "sid"];

/// Extensions that mark a URL as a downloadable data file.
pub const FILE_EXTENSIONS: &[&str] = &[".pdf", ".csv", ".xlsx", ".xls", ".txt"];

/// A pending fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierItem {
    pub url: String,
    pub depth: u32,
    pub category: Category,
    pub discovered_from: Option<String>,
    /// 0 is the most urgent tier
    pub priority: u8,
    pub enqueued_at: DateTime<Utc>,
}

impl FrontierItem {
    /// A depth-0, priority-0 seed.
    pub fn seed(url: impl Into<String>, category: Category) -> Self {
        Self {
            url: url.into(),
            depth: 0,
            category,
            discovered_from: None,
            priority: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// A link discovered on `parent`.
    pub fn discovered(
        url: impl Into<String>,
        parent: impl Into<String>,
        depth: u32,
        category: Category,
        priority: u8,
    ) -> Self {
        Self {
            url: url.into(),
            depth,
            category,
            discovered_from: Some(parent.into()),
            priority,
            enqueued_at: Utc::now(),
        }
    }

    pub fn host(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }
}

/// Whether a URL names a downloadable data file by extension.
pub fn is_file_url(url: &str) -> bool {
    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    FILE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Canonical form used for dedup: lower-cased scheme and host, fragment
/// stripped, query keys sorted, session-id-like parameters removed.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;
    url.host_str()?;
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !SESSION_PARAMS.contains(&k.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        url.set_query(Some(&query));
    }

    Some(url.to_string())
}

/// Outcome of an enqueue attempt, in rejection-rule order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// Normalized URL already in the seen set
    Duplicate,
    /// Host already dequeued its quota this run
    QuotaExhausted,
    /// Host not in the allowlist, or URL unparseable
    OutOfScope,
    /// Deeper than the configured maximum
    TooDeep,
}

/// The frontier capability set.
pub trait Frontier: Send {
    fn enqueue(&mut self, item: FrontierItem) -> EnqueueOutcome;
    fn dequeue(&mut self) -> Option<FrontierItem>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct QueuedItem {
    item: FrontierItem,
    seq: u64,
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.item.priority == other.item.priority && self.seq == other.seq
    }
}
impl Eq for QueuedItem {}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: smallest (priority, seq) must compare greatest.
        Reverse((self.item.priority, self.seq)).cmp(&Reverse((other.item.priority, other.seq)))
    }
}

/// In-memory prioritized frontier with per-host quotas.
pub struct MemoryFrontier {
    heap: BinaryHeap<QueuedItem>,
    seen: HashSet<String>,
    allowed_hosts: HashSet<String>,
    quotas: HashMap<String, usize>,
    dequeued_per_host: HashMap<String, usize>,
    max_depth: u32,
    /// Global cap across all hosts; None = unbounded
    max_urls: Option<usize>,
    total_dequeued: usize,
    next_seq: u64,
}

impl MemoryFrontier {
    pub fn new(
        allowed_hosts: impl IntoIterator<Item = String>,
        quotas: HashMap<String, usize>,
        max_depth: u32,
        max_urls: Option<usize>,
    ) -> Self {
        Self {
            heap: BinaryHeap::new(),
            seen: HashSet::new(),
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            quotas,
            dequeued_per_host: HashMap::new(),
            max_depth,
            max_urls,
            total_dequeued: 0,
            next_seq: 0,
        }
    }

    /// Number of URLs dequeued for a host so far this run.
    pub fn dequeued_for(&self, host: &str) -> usize {
        self.dequeued_per_host
            .get(&host.to_ascii_lowercase())
            .copied()
            .unwrap_or(0)
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Record a URL as seen without queueing it (redirect sources,
    /// robots-skipped URLs).
    pub fn mark_seen(&mut self, url: &str) {
        if let Some(normalized) = normalize_url(url) {
            self.seen.insert(normalized);
        }
    }

    fn quota_for(&self, host: &str) -> usize {
        self.quotas.get(host).copied().unwrap_or(usize::MAX)
    }

    /// Persist the seen set for `--resume`.
    pub fn snapshot_seen(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let mut seen: Vec<&String> = self.seen.iter().collect();
        seen.sort();
        let json = serde_json::to_string_pretty(&seen)?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
    }

    /// Restore a previous run's seen set.
    pub fn restore_seen(&mut self, path: impl AsRef<Path>) -> std::io::Result<usize> {
        let raw = std::fs::read_to_string(path)?;
        let urls: Vec<String> = serde_json::from_str(&raw)?;
        let count = urls.len();
        self.seen.extend(urls);
        Ok(count)
    }
}

impl Frontier for MemoryFrontier {
    fn enqueue(&mut self, mut item: FrontierItem) -> EnqueueOutcome {
        let Some(normalized) = normalize_url(&item.url) else {
            return EnqueueOutcome::OutOfScope;
        };
        if self.seen.contains(&normalized) {
            return EnqueueOutcome::Duplicate;
        }

        let Some(host) = item.host() else {
            return EnqueueOutcome::OutOfScope;
        };
        if !self.allowed_hosts.contains(&host) {
            return EnqueueOutcome::OutOfScope;
        }

        let quota = self.quota_for(&host);
        let dequeued = self.dequeued_for(&host);
        if dequeued >= quota {
            return EnqueueOutcome::QuotaExhausted;
        }

        if item.depth > self.max_depth {
            return EnqueueOutcome::TooDeep;
        }

        // Hosts closing in on quota drop to the background tier.
        if quota != usize::MAX && dequeued >= quota.saturating_mul(4) / 5 {
            item.priority = item.priority.max(3);
        }

        item.url = normalized.clone();
        self.seen.insert(normalized);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedItem { item, seq });
        EnqueueOutcome::Accepted
    }

    fn dequeue(&mut self) -> Option<FrontierItem> {
        if let Some(cap) = self.max_urls {
            if self.total_dequeued >= cap {
                return None;
            }
        }
        loop {
            let queued = self.heap.pop()?;
            let Some(host) = queued.item.host() else {
                continue;
            };
            // Quota may have been reached since enqueue time.
            if self.dequeued_for(&host) >= self.quota_for(&host) {
                continue;
            }
            *self.dequeued_per_host.entry(host).or_insert(0) += 1;
            self.total_dequeued += 1;
            return Some(queued.item);
        }
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

/// Single-threaded FIFO frontier with a hard size cap, for tests.
pub struct BoundedFrontier {
    queue: VecDeque<FrontierItem>,
    seen: HashSet<String>,
    capacity: usize,
}

impl BoundedFrontier {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            seen: HashSet::new(),
            capacity,
        }
    }
}

impl Frontier for BoundedFrontier {
    fn enqueue(&mut self, mut item: FrontierItem) -> EnqueueOutcome {
        let Some(normalized) = normalize_url(&item.url) else {
            return EnqueueOutcome::OutOfScope;
        };
        if self.seen.contains(&normalized) {
            return EnqueueOutcome::Duplicate;
        }
        if self.queue.len() >= self.capacity {
            return EnqueueOutcome::QuotaExhausted;
        }
        item.url = normalized.clone();
        self.seen.insert(normalized);
        self.queue.push_back(item);
        EnqueueOutcome::Accepted
    }

    fn dequeue(&mut self) -> Option<FrontierItem> {
        self.queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontier() -> MemoryFrontier {
        MemoryFrontier::new(
            vec!["www.bolton.gov.uk".to_string()],
            HashMap::from([("www.bolton.gov.uk".to_string(), 100)]),
            3,
            None,
        )
    }

    #[test]
    fn normalization_sorts_query_and_strips_fragment() {
        let url = "HTTPS://WWW.Bolton.GOV.UK/path?b=2&a=1#section";
        assert_eq!(
            normalize_url(url).unwrap(),
            "https://www.bolton.gov.uk/path?a=1&b=2"
        );
    }

    #[test]
    fn normalization_drops_session_params() {
        let url = "https://www.bolton.gov.uk/page?PHPSESSID=abc123&q=planning";
        assert_eq!(
            normalize_url(url).unwrap(),
            "https://www.bolton.gov.uk/page?q=planning"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let url = "https://www.bolton.gov.uk/page?z=9&a=1&sid=s#frag";
        let once = normalize_url(url).unwrap();
        let twice = normalize_url(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn duplicate_rejected_after_accept() {
        let mut frontier = frontier();
        let item = FrontierItem::seed("https://www.bolton.gov.uk/a", Category::Services);
        assert_eq!(frontier.enqueue(item.clone()), EnqueueOutcome::Accepted);
        assert_eq!(frontier.enqueue(item), EnqueueOutcome::Duplicate);
        // Variant spellings of the same URL are also duplicates.
        let variant = FrontierItem::seed("https://WWW.BOLTON.GOV.UK/a#x", Category::Services);
        assert_eq!(frontier.enqueue(variant), EnqueueOutcome::Duplicate);
    }

    #[test]
    fn out_of_scope_host_rejected() {
        let mut frontier = frontier();
        let item = FrontierItem::seed("https://other.example.com/a", Category::Services);
        assert_eq!(frontier.enqueue(item), EnqueueOutcome::OutOfScope);
    }

    #[test]
    fn depth_over_limit_rejected() {
        let mut frontier = frontier();
        let item = FrontierItem::discovered(
            "https://www.bolton.gov.uk/deep",
            "https://www.bolton.gov.uk/",
            4,
            Category::Services,
            2,
        );
        assert_eq!(frontier.enqueue(item), EnqueueOutcome::TooDeep);
        let at_limit = FrontierItem::discovered(
            "https://www.bolton.gov.uk/at-limit",
            "https://www.bolton.gov.uk/",
            3,
            Category::Services,
            2,
        );
        assert_eq!(frontier.enqueue(at_limit), EnqueueOutcome::Accepted);
    }

    #[test]
    fn priority_order_with_fifo_ties() {
        let mut frontier = frontier();
        let enqueue = |f: &mut MemoryFrontier, url: &str, priority: u8| {
            let item = FrontierItem::discovered(
                url,
                "https://www.bolton.gov.uk/",
                1,
                Category::Services,
                priority,
            );
            assert_eq!(f.enqueue(item), EnqueueOutcome::Accepted);
        };
        enqueue(&mut frontier, "https://www.bolton.gov.uk/html-1", 2);
        enqueue(&mut frontier, "https://www.bolton.gov.uk/file.csv", 0);
        enqueue(&mut frontier, "https://www.bolton.gov.uk/html-2", 2);
        enqueue(&mut frontier, "https://www.bolton.gov.uk/seedlike", 1);

        let order: Vec<String> = std::iter::from_fn(|| frontier.dequeue())
            .map(|i| i.url)
            .collect();
        assert_eq!(
            order,
            vec![
                "https://www.bolton.gov.uk/file.csv",
                "https://www.bolton.gov.uk/seedlike",
                "https://www.bolton.gov.uk/html-1",
                "https://www.bolton.gov.uk/html-2",
            ]
        );
    }

    #[test]
    fn per_host_quota_limits_dequeues() {
        let mut frontier = MemoryFrontier::new(
            vec!["www.bolton.gov.uk".to_string()],
            HashMap::from([("www.bolton.gov.uk".to_string(), 2)]),
            3,
            None,
        );
        for i in 0..5 {
            frontier.enqueue(FrontierItem::seed(
                format!("https://www.bolton.gov.uk/p{}", i),
                Category::Services,
            ));
        }
        let mut dequeued = 0;
        while frontier.dequeue().is_some() {
            dequeued += 1;
        }
        assert_eq!(dequeued, 2);
        // Further enqueues for the exhausted host are rejected outright.
        let outcome = frontier.enqueue(FrontierItem::seed(
            "https://www.bolton.gov.uk/p-late",
            Category::Services,
        ));
        assert_eq!(outcome, EnqueueOutcome::QuotaExhausted);
    }

    #[test]
    fn global_cap_limits_dequeues() {
        let mut frontier = MemoryFrontier::new(
            vec!["www.bolton.gov.uk".to_string()],
            HashMap::new(),
            3,
            Some(3),
        );
        for i in 0..10 {
            frontier.enqueue(FrontierItem::seed(
                format!("https://www.bolton.gov.uk/p{}", i),
                Category::Services,
            ));
        }
        let mut dequeued = 0;
        while frontier.dequeue().is_some() {
            dequeued += 1;
        }
        assert_eq!(dequeued, 3);
    }

    #[test]
    fn seen_count_tracks_accepted() {
        let mut frontier = frontier();
        for i in 0..4 {
            frontier.enqueue(FrontierItem::seed(
                format!("https://www.bolton.gov.uk/p{}", i),
                Category::Services,
            ));
        }
        frontier.enqueue(FrontierItem::seed(
            "https://www.bolton.gov.uk/p0",
            Category::Services,
        ));
        assert_eq!(frontier.seen_count(), 4);
        assert_eq!(frontier.len(), 4);
        frontier.dequeue();
        assert_eq!(frontier.len(), 3);
        assert_eq!(frontier.seen_count(), 4);
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = std::env::temp_dir().join(format!("frontier-snap-{}", std::process::id()));
        let path = dir.join("seen.json");
        let mut frontier = frontier();
        frontier.enqueue(FrontierItem::seed(
            "https://www.bolton.gov.uk/a",
            Category::Services,
        ));
        frontier.snapshot_seen(&path).unwrap();

        let mut restored = MemoryFrontier::new(
            vec!["www.bolton.gov.uk".to_string()],
            HashMap::new(),
            3,
            None,
        );
        let count = restored.restore_seen(&path).unwrap();
        assert_eq!(count, 1);
        let outcome = restored.enqueue(FrontierItem::seed(
            "https://www.bolton.gov.uk/a",
            Category::Services,
        ));
        assert_eq!(outcome, EnqueueOutcome::Duplicate);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn is_file_url_by_extension() {
        assert!(is_file_url("https://www.bolton.gov.uk/files/spend.csv"));
        assert!(is_file_url("https://www.bolton.gov.uk/files/agenda.PDF"));
        assert!(!is_file_url("https://www.bolton.gov.uk/spending"));
    }

    #[test]
    fn bounded_frontier_caps_and_dedupes() {
        let mut frontier = BoundedFrontier::new(2);
        let accept = frontier.enqueue(FrontierItem::seed(
            "https://www.bolton.gov.uk/a",
            Category::Services,
        ));
        assert_eq!(accept, EnqueueOutcome::Accepted);
        assert_eq!(
            frontier.enqueue(FrontierItem::seed(
                "https://www.bolton.gov.uk/a",
                Category::Services
            )),
            EnqueueOutcome::Duplicate
        );
        frontier.enqueue(FrontierItem::seed(
            "https://www.bolton.gov.uk/b",
            Category::Services,
        ));
        assert_eq!(
            frontier.enqueue(FrontierItem::seed(
                "https://www.bolton.gov.uk/c",
                Category::Services
            )),
            EnqueueOutcome::QuotaExhausted
        );
        assert_eq!(frontier.len(), 2);
    }
}
