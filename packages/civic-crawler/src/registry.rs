//! Seed registry: the allowlist of domains, their seed URLs, per-host
//! quotas, and the expected-coverage table the monitor reports against.
//!
//! Loaded once at startup, immutable afterwards. A JSON seed file
//! (`--seed-file`) overrides the builtin registry.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::frontier::FrontierItem;
use crate::records::Category;

/// One domain's declaration in the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedEntry {
    pub domain: String,
    /// Primary category for pages on this domain
    pub category: Category,
    /// Ordered seed URLs, crawled at depth 0
    pub seed_urls: Vec<String>,
    /// Max URLs dequeued from this host per run
    pub max_urls: usize,
    /// Expected record counts per category, for coverage reporting
    #[serde(default)]
    pub expected: HashMap<Category, u64>,
}

/// The full registry for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRegistry {
    pub entries: Vec<SeedEntry>,
}

impl SeedRegistry {
    /// Load a registry from a JSON seed file.
    pub fn load(path: impl AsRef<Path>) -> Result<SeedRegistry, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let registry: SeedRegistry = serde_json::from_str(&raw)?;
        registry.validate()?;
        Ok(registry)
    }

    /// The builtin Bolton registry.
    pub fn builtin() -> SeedRegistry {
        let registry = SeedRegistry {
            entries: vec![
                SeedEntry {
                    domain: "www.bolton.gov.uk".into(),
                    category: Category::Services,
                    seed_urls: vec![
                        "https://www.bolton.gov.uk/".into(),
                        "https://www.bolton.gov.uk/transparency-and-performance".into(),
                        "https://www.bolton.gov.uk/transparency-and-performance/spending-over-500"
                            .into(),
                        "https://www.bolton.gov.uk/council-tax".into(),
                        "https://www.bolton.gov.uk/planning".into(),
                        "https://www.bolton.gov.uk/housing".into(),
                    ],
                    max_urls: 500,
                    expected: HashMap::from([
                        (Category::Transparency, 50),
                        (Category::Services, 200),
                        (Category::CouncilTax, 25),
                        (Category::Planning, 100),
                        (Category::Housing, 75),
                    ]),
                },
                SeedEntry {
                    domain: "bolton.moderngov.co.uk".into(),
                    category: Category::Meetings,
                    seed_urls: vec![
                        "https://bolton.moderngov.co.uk/ieDocHome.aspx".into(),
                        "https://bolton.moderngov.co.uk/mgListCommittees.aspx".into(),
                        "https://bolton.moderngov.co.uk/mgMemberIndex.aspx".into(),
                    ],
                    max_urls: 800,
                    expected: HashMap::from([
                        (Category::Meetings, 500),
                        (Category::Councillors, 60),
                        (Category::Committees, 20),
                    ]),
                },
                SeedEntry {
                    domain: "paplanning.bolton.gov.uk".into(),
                    category: Category::PlanningApplications,
                    seed_urls: vec![
                        "https://paplanning.bolton.gov.uk/online-applications/".into(),
                        "https://paplanning.bolton.gov.uk/online-applications/search.do?action=weeklyList"
                            .into(),
                    ],
                    max_urls: 4000,
                    expected: HashMap::from([
                        (Category::PlanningApplications, 2000),
                        (Category::Decisions, 1500),
                    ]),
                },
            ],
        };
        debug_assert!(registry.validate().is_ok());
        registry
    }

    /// Structural checks: non-empty allowlist, every domain seeded,
    /// every seed parseable and on its own domain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entries.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }
        for entry in &self.entries {
            if entry.seed_urls.is_empty() {
                return Err(ConfigError::NoSeeds {
                    domain: entry.domain.clone(),
                });
            }
            for seed in &entry.seed_urls {
                let url = Url::parse(seed).map_err(|_| ConfigError::InvalidSeed {
                    url: seed.clone(),
                })?;
                if url.host_str() != Some(entry.domain.as_str()) {
                    return Err(ConfigError::InvalidSeed { url: seed.clone() });
                }
            }
        }
        Ok(())
    }

    /// All seeds as frontier items: depth 0, priority 0, no parent.
    pub fn seeds(&self) -> Vec<FrontierItem> {
        self.entries
            .iter()
            .flat_map(|entry| {
                entry.seed_urls.iter().map(|seed| {
                    FrontierItem::seed(seed.clone(), entry.category)
                })
            })
            .collect()
    }

    /// Hosts the crawler may touch.
    pub fn allowed_hosts(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.domain.clone()).collect()
    }

    /// Per-host dequeue quota.
    pub fn quota(&self, host: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|e| e.domain.eq_ignore_ascii_case(host))
            .map(|e| e.max_urls)
    }

    /// Expected record count for a (domain, category) pair; 0 when the
    /// registry does not track that pair.
    pub fn expected(&self, domain: &str, category: Category) -> u64 {
        self.entries
            .iter()
            .find(|e| e.domain.eq_ignore_ascii_case(domain))
            .and_then(|e| e.expected.get(&category).copied())
            .unwrap_or(0)
    }

    /// All (domain, category, expected) triples, for the coverage report.
    pub fn expected_table(&self) -> Vec<(String, Category, u64)> {
        let mut table: Vec<(String, Category, u64)> = self
            .entries
            .iter()
            .flat_map(|e| {
                e.expected
                    .iter()
                    .map(|(category, count)| (e.domain.clone(), *category, *count))
            })
            .collect();
        table.sort();
        table
    }

    /// Drop entries whose host fails the `--domain` filter, keeping the
    /// registry valid.
    pub fn retain_hosts(&mut self, selected: impl Fn(&str) -> bool) -> Result<(), ConfigError> {
        self.entries.retain(|e| selected(&e.domain));
        if self.entries.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_is_valid() {
        let registry = SeedRegistry::builtin();
        assert!(registry.validate().is_ok());
        assert_eq!(registry.entries.len(), 3);
    }

    #[test]
    fn seeds_start_at_depth_zero() {
        let registry = SeedRegistry::builtin();
        let seeds = registry.seeds();
        assert!(!seeds.is_empty());
        assert!(seeds.iter().all(|s| s.depth == 0 && s.priority == 0));
        assert!(seeds.iter().all(|s| s.discovered_from.is_none()));
    }

    #[test]
    fn expected_counts_match_coverage_table() {
        let registry = SeedRegistry::builtin();
        assert_eq!(registry.expected("www.bolton.gov.uk", Category::Transparency), 50);
        assert_eq!(registry.expected("bolton.moderngov.co.uk", Category::Meetings), 500);
        assert_eq!(
            registry.expected("paplanning.bolton.gov.uk", Category::PlanningApplications),
            2000
        );
        assert_eq!(registry.expected("www.bolton.gov.uk", Category::Meetings), 0);
    }

    #[test]
    fn empty_registry_rejected() {
        let registry = SeedRegistry { entries: vec![] };
        assert!(matches!(registry.validate(), Err(ConfigError::EmptyRegistry)));
    }

    #[test]
    fn domain_without_seeds_rejected() {
        let registry = SeedRegistry {
            entries: vec![SeedEntry {
                domain: "www.bolton.gov.uk".into(),
                category: Category::Services,
                seed_urls: vec![],
                max_urls: 10,
                expected: HashMap::new(),
            }],
        };
        assert!(matches!(registry.validate(), Err(ConfigError::NoSeeds { .. })));
    }

    #[test]
    fn off_domain_seed_rejected() {
        let registry = SeedRegistry {
            entries: vec![SeedEntry {
                domain: "www.bolton.gov.uk".into(),
                category: Category::Services,
                seed_urls: vec!["https://evil.example.com/".into()],
                max_urls: 10,
                expected: HashMap::new(),
            }],
        };
        assert!(matches!(registry.validate(), Err(ConfigError::InvalidSeed { .. })));
    }

    #[test]
    fn retain_hosts_filters() {
        let mut registry = SeedRegistry::builtin();
        registry
            .retain_hosts(|host| host == "bolton.moderngov.co.uk")
            .unwrap();
        assert_eq!(registry.entries.len(), 1);

        let mut registry = SeedRegistry::builtin();
        assert!(registry.retain_hosts(|_| false).is_err());
    }
}
