//! robots.txt parsing and a per-host cache with a 24 h TTL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;
use url::Url;

/// Cache entries are refetched after this long.
pub const ROBOTS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Parsed robots.txt rules.
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    /// Rules per user-agent token (lowercase)
    rules: HashMap<String, AgentRules>,
    /// Rules for `*`
    default_rules: AgentRules,
}

#[derive(Debug, Clone, Default)]
struct AgentRules {
    disallow: Vec<String>,
    /// Allow overrides disallow on longer-prefix match
    allow: Vec<String>,
}

impl RobotsTxt {
    pub fn parse(content: &str) -> Self {
        let mut robots = Self::default();
        let mut current_agents: Vec<String> = Vec::new();
        let mut current_rules = AgentRules::default();
        let mut in_group = false;

        let mut flush = |agents: &mut Vec<String>, rules: &mut AgentRules, robots: &mut RobotsTxt| {
            for agent in agents.drain(..) {
                if agent == "*" {
                    robots.default_rules = rules.clone();
                } else {
                    robots.rules.insert(agent, rules.clone());
                }
            }
            *rules = AgentRules::default();
        };

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_ascii_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    if in_group {
                        flush(&mut current_agents, &mut current_rules, &mut robots);
                        in_group = false;
                    }
                    current_agents.push(value.to_ascii_lowercase());
                }
                "disallow" => {
                    in_group = true;
                    if !value.is_empty() {
                        current_rules.disallow.push(value.to_string());
                    }
                }
                "allow" => {
                    in_group = true;
                    if !value.is_empty() {
                        current_rules.allow.push(value.to_string());
                    }
                }
                _ => {}
            }
        }
        flush(&mut current_agents, &mut current_rules, &mut robots);

        robots
    }

    /// Whether `path` may be fetched by `user_agent`.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let agent = user_agent.to_ascii_lowercase();
        let rules = self
            .rules
            .iter()
            .find(|(token, _)| agent.contains(token.as_str()))
            .map(|(_, rules)| rules)
            .unwrap_or(&self.default_rules);

        // Longest matching rule wins; allow beats disallow on a tie.
        let best_allow = rules
            .allow
            .iter()
            .filter(|p| path.starts_with(p.as_str()))
            .map(|p| p.len())
            .max();
        let best_disallow = rules
            .disallow
            .iter()
            .filter(|p| path.starts_with(p.as_str()))
            .map(|p| p.len())
            .max();

        match (best_allow, best_disallow) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a >= d,
        }
    }
}

/// Per-host robots.txt cache. Fetches lazily, refetches after
/// [`ROBOTS_TTL`], and treats missing or unreadable robots.txt as
/// allow-all.
pub struct RobotsCache {
    client: reqwest::Client,
    user_agent: String,
    ttl: Duration,
    entries: Mutex<HashMap<String, (RobotsTxt, Instant)>>,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            ttl: ROBOTS_TTL,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Pre-populate a host's rules (tests, offline runs).
    pub fn preload(&self, host: &str, robots: RobotsTxt) {
        self.entries
            .lock()
            .expect("robots cache poisoned")
            .insert(host.to_ascii_lowercase(), (robots, Instant::now()));
    }

    /// Whether `url` is allowed for the configured user agent.
    pub async fn allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str().map(|h| h.to_ascii_lowercase()) else {
            return false;
        };

        let cached = {
            let entries = self.entries.lock().expect("robots cache poisoned");
            entries.get(&host).and_then(|(robots, fetched)| {
                (fetched.elapsed() < self.ttl).then(|| robots.clone())
            })
        };

        let robots = match cached {
            Some(robots) => robots,
            None => {
                let robots = self.fetch_rules(&parsed).await;
                self.entries
                    .lock()
                    .expect("robots cache poisoned")
                    .insert(host, (robots.clone(), Instant::now()));
                robots
            }
        };

        robots.is_allowed(&self.user_agent, parsed.path())
    }

    async fn fetch_rules(&self, url: &Url) -> RobotsTxt {
        let robots_url = format!(
            "{}://{}/robots.txt",
            url.scheme(),
            url.host_str().unwrap_or_default()
        );
        debug!(url = %robots_url, "fetching robots.txt");
        match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(content) => RobotsTxt::parse(&content),
                Err(_) => RobotsTxt::default(),
            },
            // Missing robots.txt allows everything.
            _ => RobotsTxt::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_check_basic_rules() {
        let robots = RobotsTxt::parse(
            "User-agent: *\nDisallow: /private/\nDisallow: /admin/\nAllow: /private/minutes/\n",
        );
        assert!(robots.is_allowed("CivicTransparencyBot", "/meetings/2024"));
        assert!(!robots.is_allowed("CivicTransparencyBot", "/private/budget"));
        assert!(!robots.is_allowed("CivicTransparencyBot", "/admin/"));
        // Longer allow overrides shorter disallow.
        assert!(robots.is_allowed("CivicTransparencyBot", "/private/minutes/2024.pdf"));
    }

    #[test]
    fn specific_agent_group_wins() {
        let robots = RobotsTxt::parse(
            "User-agent: *\nDisallow: /\n\nUser-agent: civictransparencybot\nDisallow: /admin/\n",
        );
        assert!(robots.is_allowed("CivicTransparencyBot/1.0", "/spending"));
        assert!(!robots.is_allowed("CivicTransparencyBot/1.0", "/admin/x"));
        assert!(!robots.is_allowed("SomeOtherBot", "/spending"));
    }

    #[test]
    fn empty_robots_allows_all() {
        let robots = RobotsTxt::parse("");
        assert!(robots.is_allowed("AnyBot", "/anything"));
    }

    #[test]
    fn disallow_all() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow: /\n");
        assert!(!robots.is_allowed("AnyBot", "/"));
        assert!(!robots.is_allowed("AnyBot", "/page"));
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let robots = RobotsTxt::parse(
            "# crawler policy\n\nUser-agent: * # everyone\nDisallow: /secret/ # hidden\n",
        );
        assert!(!robots.is_allowed("Bot", "/secret/file"));
        assert!(robots.is_allowed("Bot", "/public"));
    }

    #[tokio::test]
    async fn preloaded_rules_short_circuit_network() {
        let cache = RobotsCache::new(reqwest::Client::new(), "CivicTransparencyBot");
        cache.preload(
            "www.bolton.gov.uk",
            RobotsTxt::parse("User-agent: *\nDisallow: /blocked/\n"),
        );
        assert!(cache.allowed("https://www.bolton.gov.uk/open").await);
        assert!(!cache.allowed("https://www.bolton.gov.uk/blocked/page").await);
    }
}
