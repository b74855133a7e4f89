//! Shared types for the labeling pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Message ─────────────────────────────────────────────────────────

/// Immutable snapshot of a mailbox message fetched for one run.
///
/// The mailbox provider is the system of record; the pipeline never
/// persists these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    /// Provider-native ID, unique within the mailbox.
    pub id: String,
    /// Provider thread ID, if the provider has threads.
    pub thread_id: Option<String>,
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Short preview supplied by the provider.
    pub snippet: String,
    /// Raw `From` header.
    pub sender: Option<String>,
    /// Provider label IDs already on the message, in provider order.
    pub labels: Vec<String>,
    pub received_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a message with only an ID and subject set.
    pub fn new(id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Text handed to predictive models: subject and body on separate lines.
    pub fn prediction_text(&self) -> String {
        format!("{}\n{}", self.subject, self.body)
    }
}

// ── Well-known labels ───────────────────────────────────────────────

/// Canonical label vocabulary. Labels matching one of these
/// case-insensitively are rewritten to this exact casing.
pub const WELL_KNOWN_LABELS: [&str; 5] = ["Work", "Personal", "Finance", "Promotions", "Spam"];

/// Canonical casing of a well-known label, if `name` is one.
pub fn well_known_label(name: &str) -> Option<&'static str> {
    WELL_KNOWN_LABELS
        .iter()
        .copied()
        .find(|label| label.eq_ignore_ascii_case(name))
}
