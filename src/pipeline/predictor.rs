//! Optional predictive labeling.
//!
//! The bundled predictor is a multinomial naive Bayes model stored as JSON:
//!
//! ```json
//! {
//!   "min_confidence": 0.6,
//!   "unknown_log_likelihood": -12.0,
//!   "labels": {
//!     "Finance": {"log_prior": -1.1, "token_log_likelihoods": {"invoice": -2.3}},
//!     "Work":    {"log_prior": -0.9, "token_log_likelihoods": {"meeting": -2.0}}
//!   }
//! }
//! ```
//!
//! A predictor that failed to load is simply not ready; prediction never
//! returns an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::PredictorError;

/// A model that may suggest a single label for a piece of text.
pub trait LabelPredictor: Send + Sync {
    fn is_ready(&self) -> bool;

    /// Best label for `text`, or `None` when unsure or not ready.
    fn predict(&self, text: &str) -> Option<String>;
}

/// Build the configured predictor, if any.
///
/// Returns `None` when no model path is configured. A configured but
/// unusable model still yields a predictor that reports not ready.
pub fn predictor_from_config(config: &AppConfig) -> Option<Arc<dyn LabelPredictor>> {
    let path = config.ml_model_path.as_ref()?;
    Some(Arc::new(NaiveBayesPredictor::from_path(path)))
}

// ── Naive Bayes model ───────────────────────────────────────────────

fn default_min_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelModel {
    pub log_prior: f64,
    #[serde(default)]
    pub token_log_likelihoods: BTreeMap<String, f64>,
    /// Overrides the model-wide unknown-token likelihood for this label.
    #[serde(default)]
    pub unknown_log_likelihood: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NaiveBayesModel {
    pub labels: BTreeMap<String, LabelModel>,
    pub unknown_log_likelihood: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl NaiveBayesModel {
    pub fn from_file(path: &Path) -> Result<Self, PredictorError> {
        if !path.exists() {
            return Err(PredictorError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let model: Self =
            serde_json::from_str(&raw).map_err(|e| PredictorError::InvalidModel(e.to_string()))?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), PredictorError> {
        if self.labels.is_empty() {
            return Err(PredictorError::InvalidModel("model has no labels".into()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(PredictorError::InvalidModel(format!(
                "min_confidence {} is outside [0, 1]",
                self.min_confidence
            )));
        }
        if !self.unknown_log_likelihood.is_finite() {
            return Err(PredictorError::InvalidModel(
                "unknown_log_likelihood must be finite".into(),
            ));
        }
        for (label, model) in &self.labels {
            let all_finite = model.log_prior.is_finite()
                && model.token_log_likelihoods.values().all(|v| v.is_finite())
                && model.unknown_log_likelihood.is_none_or(f64::is_finite);
            if !all_finite {
                return Err(PredictorError::InvalidModel(format!(
                    "label '{label}' has non-finite parameters"
                )));
            }
        }
        Ok(())
    }

    /// Posterior probability per label, in label order. Empty when `text` has no tokens.
    pub fn posteriors(&self, text: &str) -> Vec<(&str, f64)> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Vec::new();
        }

        let scores: Vec<(&str, f64)> = self
            .labels
            .iter()
            .map(|(label, model)| {
                let unknown = model
                    .unknown_log_likelihood
                    .unwrap_or(self.unknown_log_likelihood);
                let likelihood: f64 = tokens
                    .iter()
                    .map(|t| model.token_log_likelihoods.get(t).copied().unwrap_or(unknown))
                    .sum();
                (label.as_str(), model.log_prior + likelihood)
            })
            .collect();

        // Softmax with the max subtracted for numerical stability.
        let max = scores
            .iter()
            .map(|(_, s)| *s)
            .fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = scores.iter().map(|(_, s)| (s - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        scores
            .iter()
            .zip(exps)
            .map(|((label, _), e)| (*label, e / total))
            .collect()
    }
}

/// Lowercase alphanumeric words.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Naive Bayes label predictor backed by a JSON model file.
pub struct NaiveBayesPredictor {
    source: Option<PathBuf>,
    model: Option<NaiveBayesModel>,
}

impl NaiveBayesPredictor {
    /// Load the model at `path`. Failures are logged and leave the predictor not ready.
    pub fn from_path(path: &Path) -> Self {
        let model = match NaiveBayesModel::from_file(path) {
            Ok(model) => {
                info!(path = %path.display(), labels = model.labels.len(), "Loaded label model");
                Some(model)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Label model unavailable; predictive labeling disabled");
                None
            }
        };
        Self {
            source: Some(path.to_path_buf()),
            model,
        }
    }

    pub fn from_model(model: NaiveBayesModel) -> Self {
        Self {
            source: None,
            model: Some(model),
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl LabelPredictor for NaiveBayesPredictor {
    fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    fn predict(&self, text: &str) -> Option<String> {
        let model = self.model.as_ref()?;
        let (label, confidence) = model
            .posteriors(text)
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))?;

        if !confidence.is_finite() {
            warn!(label, "Label model produced a non-finite posterior");
            return None;
        }
        if confidence < model.min_confidence {
            debug!(label, confidence, "Prediction below confidence threshold");
            return None;
        }
        debug!(label, confidence, "Predicted label");
        Some(label.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_model(min_confidence: f64) -> NaiveBayesModel {
        serde_json::from_value(json!({
            "min_confidence": min_confidence,
            "unknown_log_likelihood": -8.0,
            "labels": {
                "Finance": {
                    "log_prior": -0.69,
                    "token_log_likelihoods": {"invoice": -1.0, "payment": -1.2, "meeting": -7.0}
                },
                "Work": {
                    "log_prior": -0.69,
                    "token_log_likelihoods": {"meeting": -1.0, "project": -1.1, "invoice": -7.0}
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn tokenize_lowercases_and_splits() {
        assert_eq!(
            tokenize("Invoice #42: PAYMENT-due"),
            vec!["invoice", "42", "payment", "due"]
        );
        assert!(tokenize("  ... !!").is_empty());
    }

    #[test]
    fn predicts_most_likely_label() {
        let predictor = NaiveBayesPredictor::from_model(sample_model(0.6));
        assert!(predictor.is_ready());
        assert_eq!(predictor.predict("Invoice\npayment overdue").as_deref(), Some("Finance"));
        assert_eq!(predictor.predict("project meeting").as_deref(), Some("Work"));
    }

    #[test]
    fn low_confidence_yields_nothing() {
        let predictor = NaiveBayesPredictor::from_model(sample_model(0.99));
        // One token for each side leaves the posterior near 0.5.
        assert_eq!(predictor.predict("invoice meeting"), None);
    }

    #[test]
    fn empty_text_yields_nothing() {
        let predictor = NaiveBayesPredictor::from_model(sample_model(0.0));
        assert_eq!(predictor.predict(""), None);
        assert_eq!(predictor.predict("\n"), None);
    }

    #[test]
    fn posteriors_sum_to_one() {
        let model = sample_model(0.5);
        let total: f64 = model.posteriors("invoice project").iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn missing_model_file_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = NaiveBayesPredictor::from_path(&dir.path().join("model.json"));
        assert!(!predictor.is_ready());
        assert_eq!(predictor.predict("invoice"), None);
    }

    #[test]
    fn malformed_model_file_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, r#"{"labels": {}}"#).unwrap();
        assert!(!NaiveBayesPredictor::from_path(&path).is_ready());

        std::fs::write(&path, "not json").unwrap();
        assert!(!NaiveBayesPredictor::from_path(&path).is_ready());
    }

    #[test]
    fn model_file_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(
            &path,
            r#"{"unknown_log_likelihood": -5.0, "labels": {"Spam": {"log_prior": 0.0}}}"#,
        )
        .unwrap();

        let predictor = NaiveBayesPredictor::from_path(&path);
        assert!(predictor.is_ready());
        assert_eq!(predictor.source(), Some(path.as_path()));
        // Single label always wins with posterior 1.0.
        assert_eq!(predictor.predict("anything").as_deref(), Some("Spam"));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut model = sample_model(0.5);
        model.min_confidence = 1.5;
        assert!(matches!(model.validate(), Err(PredictorError::InvalidModel(_))));
    }
}
