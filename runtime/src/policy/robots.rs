// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

//! Policy document (robots.txt) parsing.
//!
//! The document is untrusted text and parsing never fails: unknown lines are
//! skipped, malformed delays are ignored, and an empty document allows
//! everything.

/// A single Allow/Disallow rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub pattern: String,
    pub allow: bool,
}

/// Rules that apply to this agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    pub rules: Vec<Rule>,
    /// Crawl-delay hint in seconds.
    pub crawl_delay: Option<f64>,
}

impl RobotsRules {
    /// Rules that allow everything with no delay hint.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Whether `path` (path plus optional query) may be requested.
    ///
    /// The longest matching pattern decides; on equal length, Allow wins.
    pub fn is_allowed(&self, path: &str) -> bool {
        let path = if path.is_empty() { "/" } else { path };
        let mut best: Option<(usize, bool)> = None;
        for rule in &self.rules {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            let len = rule.pattern.len();
            best = match best {
                Some((best_len, best_allow)) if best_len > len || (best_len == len && best_allow) => {
                    Some((best_len, best_allow))
                }
                _ => Some((len, rule.allow)),
            };
        }
        best.map_or(true, |(_, allow)| allow)
    }

    pub fn disallows_anything(&self) -> bool {
        self.rules.iter().any(|r| !r.allow)
    }
}

/// Parse a robots.txt document for `agent`.
///
/// Groups naming `agent` explicitly take precedence over `*` groups. Records
/// with several consecutive `User-agent` lines share one rule set.
pub fn parse_robots(content: &str, agent: &str) -> RobotsRules {
    let agent = agent.to_ascii_lowercase();
    let mut specific = RobotsRules::default();
    let mut wildcard = RobotsRules::default();
    let mut saw_specific = false;

    // Agents named by the current record and whether it already has rules.
    let mut current_agents: Vec<String> = Vec::new();
    let mut in_rules = false;

    for raw_line in content.lines() {
        let line = match raw_line.find('#') {
            Some(idx) => &raw_line[..idx],
            None => raw_line,
        }
        .trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        if key == "user-agent" {
            if in_rules {
                current_agents.clear();
                in_rules = false;
            }
            current_agents.push(value.to_ascii_lowercase());
            continue;
        }

        in_rules = true;
        let targets_specific = current_agents
            .iter()
            .any(|a| a != "*" && !a.is_empty() && agent.contains(a.as_str()));
        let targets_wildcard = current_agents.iter().any(|a| a == "*");
        if !targets_specific && !targets_wildcard {
            continue;
        }
        saw_specific |= targets_specific;
        let bucket = if targets_specific {
            &mut specific
        } else {
            &mut wildcard
        };

        match key.as_str() {
            "disallow" if !value.is_empty() => bucket.rules.push(Rule {
                pattern: value.to_string(),
                allow: false,
            }),
            "allow" if !value.is_empty() => bucket.rules.push(Rule {
                pattern: value.to_string(),
                allow: true,
            }),
            "crawl-delay" => {
                if let Ok(delay) = value.parse::<f64>() {
                    if delay.is_finite() && delay >= 0.0 {
                        bucket.crawl_delay = Some(delay);
                    }
                }
            }
            _ => {}
        }
    }

    if saw_specific {
        specific
    } else {
        wildcard
    }
}

/// Match a robots pattern against a path. `*` matches any run of characters;
/// a trailing `$` anchors the end. Otherwise patterns are prefixes.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let pieces: Vec<&str> = pattern.split('*').collect();

    if pieces.len() == 1 {
        return if anchored {
            path == pattern
        } else {
            path.starts_with(pattern)
        };
    }

    let first = pieces[0];
    if !path.starts_with(first) {
        return false;
    }
    let mut pos = first.len();
    let last_idx = pieces.len() - 1;
    for (i, piece) in pieces.iter().enumerate().skip(1) {
        if i == last_idx && anchored {
            return path.len() >= pos + piece.len() && path.ends_with(piece);
        }
        if piece.is_empty() {
            continue;
        }
        match path[pos..].find(piece) {
            Some(found) => pos += found + piece.len(),
            None => return false,
        }
    }
    true
}
