//! Multi-strategy classifier.
//!
//! Runs every strategy, isolates failures, and merges the results into a
//! deduplicated, canonicalized, sorted label set.

use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::ConfigError;
use crate::pipeline::rules::RulesEngine;
use crate::pipeline::strategy::{
    LabelingStrategy, PredictiveStrategy, RuleBasedStrategy, SentimentStrategy,
};
use crate::pipeline::types::{Message, well_known_label};

pub struct Classifier {
    strategies: Vec<Box<dyn LabelingStrategy>>,
    /// Rules engine shared with the rule strategy, for reloads.
    rules: Option<Arc<RwLock<RulesEngine>>>,
}

impl Classifier {
    /// Classifier over an explicit strategy list (no reloadable rules).
    pub fn new(strategies: Vec<Box<dyn LabelingStrategy>>) -> Self {
        Self {
            strategies,
            rules: None,
        }
    }

    /// Classifier with only the rules strategy.
    pub fn with_rules(engine: RulesEngine) -> Self {
        let rule_strategy = RuleBasedStrategy::new(engine);
        Self {
            rules: Some(rule_strategy.engine()),
            strategies: vec![Box::new(rule_strategy)],
        }
    }

    /// Rules from `RULES_FILE` plus whichever optional strategies are enabled.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let mut classifier = Self::with_rules(RulesEngine::load(&config.rules_file)?);
        if let Some(predictive) = PredictiveStrategy::from_config(config) {
            classifier.push(Box::new(predictive));
        }
        if let Some(sentiment) = SentimentStrategy::from_config(config) {
            classifier.push(Box::new(sentiment));
        }
        info!(strategies = ?classifier.strategy_names(), "Classifier ready");
        Ok(classifier)
    }

    /// Append a strategy; strategies run in insertion order.
    pub fn push(&mut self, strategy: Box<dyn LabelingStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Labels for `message`, sorted. A failing or panicking strategy contributes nothing.
    pub fn classify(&self, message: &Message) -> Vec<String> {
        let mut candidates = Vec::new();
        for strategy in &self.strategies {
            let outcome = catch_unwind(AssertUnwindSafe(|| strategy.labels_for(message)));
            match outcome {
                Ok(Ok(labels)) => candidates.extend(labels),
                Ok(Err(e)) => {
                    warn!(strategy = strategy.name(), message_id = %message.id, error = %e, "Strategy failed; skipping");
                }
                Err(payload) => {
                    warn!(
                        strategy = strategy.name(),
                        message_id = %message.id,
                        panic = panic_message(&*payload),
                        "Strategy panicked; skipping"
                    );
                }
            }
        }

        let labels = Self::canonicalize(candidates);
        debug!(message_id = %message.id, labels = ?labels, "Classified");
        labels
    }

    /// Canonical casing for well-known labels, trimmed, deduplicated and sorted.
    ///
    /// Idempotent: canonicalizing the output again yields the same list.
    pub fn canonicalize<I, S>(labels: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        labels
            .into_iter()
            .filter_map(|label| {
                let trimmed = label.as_ref().trim();
                if trimmed.is_empty() {
                    return None;
                }
                Some(
                    well_known_label(trimmed)
                        .map(str::to_string)
                        .unwrap_or_else(|| trimmed.to_string()),
                )
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Re-read the rules file. A no-op for classifiers built without rules.
    pub fn reload_rules(&self) -> Result<(), ConfigError> {
        let Some(ref rules) = self.rules else {
            return Ok(());
        };
        let mut engine = rules.write().unwrap_or_else(|e| e.into_inner());
        engine.reload()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
