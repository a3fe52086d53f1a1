//! robots.txt parsing and per-host caching.
//!
//! Groups are selected by the most specific matching user-agent token with
//! `*` as the fallback. Within the selected rules the longest matching
//! pattern wins and `Allow` beats `Disallow` on a tie. Patterns support `*`
//! and a trailing `$` anchor. A robots.txt that cannot be fetched, or that
//! answers with an error status, allows everything.

use super::fetch::PageFetcher;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// How long a host's rules are reused before being fetched again.
pub const ROBOTS_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    len: usize,
    matcher: Regex,
}

#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Parsed robots.txt.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    groups: Vec<Group>,
}

fn compile_pattern(pattern: &str) -> Option<Regex> {
    let (body, anchored) = match pattern.strip_suffix('$') {
        Some(body) => (body, true),
        None => (pattern, false),
    };
    let mut re = String::from("^");
    for (i, piece) in body.split('*').enumerate() {
        if i > 0 {
            re.push_str(".*");
        }
        re.push_str(&regex::escape(piece));
    }
    if anchored {
        re.push('$');
    }
    Regex::new(&re).ok()
}

impl RobotsRules {
    /// Rules that allow everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut in_agent_block = false;

        for raw in text.lines() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !in_agent_block {
                        groups.push(Group::default());
                        in_agent_block = true;
                    }
                    if let Some(group) = groups.last_mut() {
                        group.agents.push(value.to_lowercase());
                    }
                }
                "allow" | "disallow" => {
                    in_agent_block = false;
                    let Some(group) = groups.last_mut() else {
                        continue;
                    };
                    // An empty Disallow permits everything.
                    if value.is_empty() {
                        continue;
                    }
                    if let Some(matcher) = compile_pattern(value) {
                        group.rules.push(Rule {
                            allow: key == "allow",
                            len: value.len(),
                            matcher,
                        });
                    }
                }
                _ => {
                    in_agent_block = false;
                }
            }
        }

        Self { groups }
    }

    /// Rules that apply to `user_agent`.
    fn rules_for(&self, user_agent: &str) -> Vec<&Rule> {
        let token = user_agent
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        let mut best_len = 0usize;
        let mut selected: Vec<&Group> = Vec::new();
        for group in &self.groups {
            for agent in &group.agents {
                if agent != "*" && !agent.is_empty() && token.contains(agent.as_str()) {
                    if agent.len() > best_len {
                        best_len = agent.len();
                        selected.clear();
                    }
                    if agent.len() == best_len {
                        selected.push(group);
                    }
                }
            }
        }
        if selected.is_empty() {
            selected = self
                .groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == "*"))
                .collect();
        }
        selected.iter().flat_map(|g| g.rules.iter()).collect()
    }

    /// Whether `user_agent` may fetch `path` (path plus optional query).
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let mut verdict: Option<(usize, bool)> = None;
        for rule in self.rules_for(user_agent) {
            if !rule.matcher.is_match(path) {
                continue;
            }
            let better = match verdict {
                None => true,
                Some((len, allow)) => rule.len > len || (rule.len == len && rule.allow && !allow),
            };
            if better {
                verdict = Some((rule.len, rule.allow));
            }
        }
        verdict.is_none_or(|(_, allow)| allow)
    }
}

/// Per-origin cache of robots rules.
#[derive(Debug)]
pub struct RobotsCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Arc<RobotsRules>, Instant)>>,
}

impl Default for RobotsCache {
    fn default() -> Self {
        Self::new(ROBOTS_TTL)
    }
}

impl RobotsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn origin(url: &Url) -> String {
        let mut origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
        if let Some(port) = url.port() {
            origin.push_str(&format!(":{port}"));
        }
        origin
    }

    fn cached(&self, origin: &str) -> Option<Arc<RobotsRules>> {
        let entries = self.entries.lock();
        entries
            .get(origin)
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(rules, _)| Arc::clone(rules))
    }

    async fn rules(&self, fetcher: &dyn PageFetcher, url: &Url) -> Arc<RobotsRules> {
        let origin = Self::origin(url);
        if let Some(rules) = self.cached(&origin) {
            return rules;
        }

        let robots_url = format!("{origin}/robots.txt");
        let rules = match fetcher.fetch(&robots_url).await {
            Ok(page) if page.is_success() => RobotsRules::parse(&page.body),
            Ok(page) => {
                debug!(url = %robots_url, status = page.status, "robots.txt unavailable, allowing all");
                RobotsRules::allow_all()
            }
            Err(e) => {
                debug!(url = %robots_url, error = %e, "robots.txt fetch failed, allowing all");
                RobotsRules::allow_all()
            }
        };
        let rules = Arc::new(rules);
        self.entries
            .lock()
            .insert(origin, (Arc::clone(&rules), Instant::now()));
        rules
    }

    /// Whether `user_agent` may fetch `url`.
    pub async fn is_allowed(&self, fetcher: &dyn PageFetcher, url: &Url, user_agent: &str) -> bool {
        let rules = self.rules(fetcher, url).await;
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        rules.is_allowed(user_agent, &path)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
