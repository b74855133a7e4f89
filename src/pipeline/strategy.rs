//! Labeling strategies: independent sources of candidate labels.

use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::StrategyError;
use crate::pipeline::predictor::{LabelPredictor, predictor_from_config};
use crate::pipeline::rules::RulesEngine;
use crate::pipeline::sentiment::{Sentiment, SentimentAnalyzer};
use crate::pipeline::types::Message;

/// A pluggable source of candidate labels for a message.
pub trait LabelingStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn labels_for(&self, message: &Message) -> Result<Vec<String>, StrategyError>;
}

// ── Rules ───────────────────────────────────────────────────────────

/// Labels from the keyword rules engine.
///
/// The engine sits behind a lock so it can be reloaded between runs.
pub struct RuleBasedStrategy {
    engine: Arc<RwLock<RulesEngine>>,
}

impl RuleBasedStrategy {
    pub fn new(engine: RulesEngine) -> Self {
        Self {
            engine: Arc::new(RwLock::new(engine)),
        }
    }

    /// Handle to the shared engine. Reloads go through this handle.
    pub fn engine(&self) -> Arc<RwLock<RulesEngine>> {
        Arc::clone(&self.engine)
    }
}

impl LabelingStrategy for RuleBasedStrategy {
    fn name(&self) -> &str {
        "rules"
    }

    fn labels_for(&self, message: &Message) -> Result<Vec<String>, StrategyError> {
        let engine = self.engine.read().map_err(|e| StrategyError::Failed {
            strategy: self.name().to_string(),
            reason: format!("rules lock poisoned: {e}"),
        })?;
        Ok(engine.match_message(message))
    }
}

// ── Predictor ───────────────────────────────────────────────────────

/// Labels from a predictive model. Contributes at most one label.
pub struct PredictiveStrategy {
    predictor: Arc<dyn LabelPredictor>,
}

impl PredictiveStrategy {
    pub fn new(predictor: Arc<dyn LabelPredictor>) -> Self {
        Self { predictor }
    }

    /// Strategy for the configured model, or `None` if none is configured or it is not ready.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let predictor = predictor_from_config(config)?;
        if !predictor.is_ready() {
            info!("Predictive labeling disabled: model not ready");
            return None;
        }
        Some(Self::new(predictor))
    }
}

impl LabelingStrategy for PredictiveStrategy {
    fn name(&self) -> &str {
        "predictor"
    }

    fn labels_for(&self, message: &Message) -> Result<Vec<String>, StrategyError> {
        if !self.predictor.is_ready() {
            return Ok(Vec::new());
        }
        let prediction = self.predictor.predict(&message.prediction_text());
        debug!(message_id = %message.id, prediction = ?prediction, "Predictor result");
        Ok(prediction.into_iter().collect())
    }
}

// ── Sentiment ───────────────────────────────────────────────────────

/// Adds `Positive` or `Negative` from message sentiment. Neutral adds nothing.
#[derive(Default)]
pub struct SentimentStrategy {
    analyzer: SentimentAnalyzer,
}

impl SentimentStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled by `SENTIMENT_LABELS`.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        config.sentiment_labels.then(Self::new)
    }
}

impl LabelingStrategy for SentimentStrategy {
    fn name(&self) -> &str {
        "sentiment"
    }

    fn labels_for(&self, message: &Message) -> Result<Vec<String>, StrategyError> {
        Ok(match self.analyzer.analyze(message) {
            Sentiment::Neutral => Vec::new(),
            polar => vec![polar.to_string()],
        })
    }
}
