//! Branch specification matching.
//!
//! A spec is a list of lines, each one pattern:
//!
//! ```text
//! +:release/*     include (also `+release/*` or just `release/*`)
//! -:release/old*  exclude (also `-release/old*` or `^release/old*`)
//! # comment
//! ```
//!
//! `*` matches any run of characters and `?` a single one. Excludes win
//! over includes, and a branch given as `refs/heads/<name>` is matched as
//! `<name>` too. An empty spec matches everything.

use std::collections::HashMap;
use std::sync::RwLock;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

const REFS_HEADS_PREFIX: &str = "refs/heads/";

lazy_static! {
    // Keyed by pattern text; patterns only come from job and source configuration.
    static ref REGEX_CACHE: RwLock<HashMap<String, Regex>> = RwLock::new(HashMap::new());
    static ref SIMPLE_WILDCARD: Option<Regex> = Regex::new(r"^[^?*]+\*?$").ok();
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchSpec {
    lines: Vec<String>,
}

impl BranchSpec {
    /// Build a spec from raw entries; entries may contain several lines.
    pub fn new<S: AsRef<str>>(entries: impl IntoIterator<Item = S>) -> Self {
        Self {
            lines: entries
                .into_iter()
                .flat_map(|e| {
                    e.as_ref()
                        .lines()
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .filter(|l| !l.trim().is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The raw lines, as sent to the remote side in subscription filters.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn matches(&self, branch: &str) -> bool {
        if self.lines.is_empty() {
            return true;
        }
        self.matcher().matches(branch)
    }

    fn matcher(&self) -> Matcher {
        if matches!(self.lines.as_slice(), [only] if only.as_str() == "*") {
            return Matcher::All;
        }

        let mut includes = Vec::new();
        let mut excludes = Vec::new();
        for line in &self.lines {
            let Some((pattern, include)) = parse_line(normalize(line)) else {
                continue;
            };
            let rule = Rule::compile(pattern);
            if include {
                includes.push(rule);
            } else {
                excludes.push(rule);
            }
        }
        Matcher::Rules { includes, excludes }
    }
}

enum Matcher {
    All,
    Rules { includes: Vec<Rule>, excludes: Vec<Rule> },
}

impl Matcher {
    fn matches(&self, text: &str) -> bool {
        let Matcher::Rules { includes, excludes } = self else {
            return true;
        };
        let hit = |rule: &Rule| {
            rule.matches(normalize(text))
                || text
                    .strip_prefix(REFS_HEADS_PREFIX)
                    .is_some_and(|short| rule.matches(normalize(short)))
        };
        if excludes.iter().any(hit) {
            return false;
        }
        includes.iter().any(hit)
    }
}

enum Rule {
    Any,
    Never,
    Exact(String),
    Prefix(String),
    Pattern(Regex),
}

impl Rule {
    fn compile(pattern: &str) -> Rule {
        if pattern == "*" {
            return Rule::Any;
        }
        let simple = SIMPLE_WILDCARD
            .as_ref()
            .is_some_and(|re| re.is_match(pattern));
        if simple {
            return match pattern.strip_suffix('*') {
                Some(prefix) => Rule::Prefix(prefix.to_string()),
                None => Rule::Exact(pattern.to_string()),
            };
        }
        match cached_regex(&wildcard_to_regex(pattern)) {
            Some(re) => Rule::Pattern(re),
            None => {
                warn!(pattern, "Cannot parse branch pattern, it will never match");
                Rule::Never
            }
        }
    }

    fn matches(&self, text: &str) -> bool {
        match self {
            Rule::Any => true,
            Rule::Never => false,
            Rule::Exact(value) => text == value,
            Rule::Prefix(prefix) => text.starts_with(prefix.as_str()),
            Rule::Pattern(re) => re.is_match(text),
        }
    }
}

/// Returns the pattern and whether it includes, or `None` for comments.
fn parse_line(line: &str) -> Option<(&str, bool)> {
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let parsed = if let Some(rest) = line.strip_prefix("-:") {
        (rest.trim(), false)
    } else if let Some(rest) = line.strip_prefix('^').or_else(|| line.strip_prefix('-')) {
        (rest.trim(), false)
    } else if let Some(rest) = line.strip_prefix("+:") {
        (rest.trim(), true)
    } else if let Some(rest) = line.strip_prefix('+') {
        (rest.trim(), true)
    } else {
        (line, true)
    };
    Some(parsed)
}

fn normalize(s: &str) -> &str {
    s.trim().trim_matches('/')
}

fn wildcard_to_regex(wildcard: &str) -> String {
    let mut out = String::with_capacity(wildcard.len() + 8);
    out.push('^');
    for c in wildcard.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    out.push('$');
    out
}

/// Compile `pattern` as a whole-string match, sharing the process-wide cache.
///
/// Returns `None` for invalid patterns.
pub fn full_match_regex(pattern: &str) -> Option<Regex> {
    cached_regex(&format!("^(?:{pattern})$"))
}

/// Compile `pattern` once per process; `None` when it is not a valid regex.
fn cached_regex(pattern: &str) -> Option<Regex> {
    if let Some(re) = REGEX_CACHE
        .read()
        .ok()
        .and_then(|cache| cache.get(pattern).cloned())
    {
        return Some(re);
    }
    let re = Regex::new(pattern).ok()?;
    if let Ok(mut cache) = REGEX_CACHE.write() {
        cache.insert(pattern.to_string(), re.clone());
    }
    Some(re)
}
