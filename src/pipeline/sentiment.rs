//! Sentiment scoring with the VADER analyzer.
//!
//! The compound score lies in [-1, 1]; magnitudes at or beyond the
//! polarity threshold count as positive or negative.

use serde::Serialize;
use vader_sentiment::SentimentIntensityAnalyzer;

use crate::pipeline::types::Message;

/// Compound scores at or beyond this magnitude are polar.
const POLARITY_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "Positive",
            Self::Negative => "Negative",
            Self::Neutral => "Neutral",
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a compound score.
pub fn polarity(compound: f64) -> Sentiment {
    if compound >= POLARITY_THRESHOLD {
        Sentiment::Positive
    } else if compound <= -POLARITY_THRESHOLD {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    }
}

/// Scores messages by subject, snippet and body.
pub struct SentimentAnalyzer {
    vader: SentimentIntensityAnalyzer<'static>,
}

impl Default for SentimentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self {
            vader: SentimentIntensityAnalyzer::new(),
        }
    }

    /// Compound polarity score in [-1, 1]. Blank text scores 0.
    pub fn compound_score(&self, text: &str) -> f64 {
        if text.trim().is_empty() {
            return 0.0;
        }
        self.vader
            .polarity_scores(text)
            .get("compound")
            .copied()
            .unwrap_or(0.0)
    }

    pub fn analyze_text(&self, text: &str) -> Sentiment {
        polarity(self.compound_score(text))
    }

    pub fn analyze(&self, message: &Message) -> Sentiment {
        let text = [
            message.subject.as_str(),
            message.snippet.as_str(),
            message.body.as_str(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" \n");
        self.analyze_text(&text)
    }
}
