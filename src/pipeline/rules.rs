//! Keyword rules engine.
//!
//! Rules are loaded from a JSON document of the form
//! `{"rules": [{"label": ..., "keywords": [...], "match_subject": true,
//! "match_body": true, "priority": 0}]}` and evaluated in descending
//! priority. Equal priorities keep their definition order.

use std::cmp::Reverse;
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::pipeline::types::Message;

fn default_true() -> bool {
    true
}

/// A keyword rule as written in the rules file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Label applied when the rule matches. Required.
    pub label: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_true")]
    pub match_subject: bool,
    #[serde(default = "default_true")]
    pub match_body: bool,
    #[serde(default)]
    pub priority: i64,
}

impl Rule {
    pub fn new(label: impl Into<String>, keywords: &[&str], priority: i64) -> Self {
        Self {
            label: label.into(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            match_subject: true,
            match_body: true,
            priority,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RulesDocument {
    #[serde(default)]
    rules: Vec<Rule>,
}

/// A rule with its keywords compiled into one case-insensitive matcher.
#[derive(Debug, Clone)]
struct CompiledRule {
    rule: Rule,
    /// `None` when the rule has no keywords (never matches).
    matcher: Option<Regex>,
}

impl CompiledRule {
    fn compile(rule: Rule) -> Result<Self, regex::Error> {
        let matcher = if rule.keywords.is_empty() {
            None
        } else {
            let pattern = rule
                .keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            Some(RegexBuilder::new(&pattern).case_insensitive(true).build()?)
        };
        Ok(Self { rule, matcher })
    }

    fn matches(&self, subject: &str, body: &str) -> bool {
        let Some(ref matcher) = self.matcher else {
            return false;
        };
        (self.rule.match_subject && matcher.is_match(subject))
            || (self.rule.match_body && matcher.is_match(body))
    }
}

/// Keyword rules engine. Immutable between reloads.
#[derive(Debug, Clone)]
pub struct RulesEngine {
    /// File the rules were loaded from, if any (used by `reload`).
    source: Option<PathBuf>,
    /// Sorted by descending priority, stable on ties.
    rules: Vec<CompiledRule>,
}

impl RulesEngine {
    /// Load rules from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let rules = read_rules_file(path)?;
        let mut engine = Self::compile(rules, path)?;
        engine.source = Some(path.to_path_buf());
        info!(path = %path.display(), count = engine.len(), "Loaded labeling rules");
        Ok(engine)
    }

    /// Build an engine from in-memory rules.
    pub fn from_rules(rules: Vec<Rule>) -> Result<Self, ConfigError> {
        Self::compile(rules, Path::new("<inline>"))
    }

    /// Create an empty rules engine (for testing).
    pub fn empty() -> Self {
        Self {
            source: None,
            rules: Vec::new(),
        }
    }

    fn compile(rules: Vec<Rule>, origin: &Path) -> Result<Self, ConfigError> {
        let mut compiled = rules
            .into_iter()
            .map(|rule| {
                let label = rule.label.clone();
                CompiledRule::compile(rule).map_err(|e| ConfigError::Parse {
                    path: origin.to_path_buf(),
                    message: format!("rule '{label}' has unusable keywords: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        // sort_by_key is stable: equal priorities keep definition order.
        compiled.sort_by_key(|c| Reverse(c.rule.priority));
        Ok(Self {
            source: None,
            rules: compiled,
        })
    }

    /// Re-read the rules file. On failure the current rules stay active.
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        let Some(path) = self.source.clone() else {
            debug!("Rules engine has no source file; reload skipped");
            return Ok(());
        };
        let rules = read_rules_file(&path)?;
        let mut fresh = Self::compile(rules, &path)?;
        fresh.source = Some(path);
        *self = fresh;
        info!(count = self.len(), "Reloaded labeling rules");
        Ok(())
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|c| &c.rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Labels of every matching rule, highest priority first.
    ///
    /// Duplicates are kept; the classifier deduplicates.
    pub fn match_message(&self, message: &Message) -> Vec<String> {
        let matches: Vec<String> = self
            .rules
            .iter()
            .filter(|c| c.matches(&message.subject, &message.body))
            .map(|c| c.rule.label.clone())
            .collect();
        debug!(message_id = %message.id, labels = ?matches, "Rule matches");
        matches
    }
}

fn read_rules_file(path: &Path) -> Result<Vec<Rule>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    let raw = std::fs::read_to_string(path)?;
    let document: RulesDocument = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(document.rules)
}
