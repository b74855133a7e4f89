//! Mailbox gateways: where messages come from and labels go.

pub mod gmail;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::MailboxError;
use crate::pipeline::types::Message;

pub use gmail::GmailGateway;

/// A label as the mailbox provider knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// Authenticated access to one account's mailbox.
///
/// Any error aborts the current run.
#[async_trait]
pub trait MailboxGateway: Send + Sync {
    /// Up to `max` unread messages, in provider order.
    async fn list_unread(&self, max: usize) -> Result<Vec<Message>, MailboxError>;

    /// Add the given label IDs to a message. An empty list does nothing.
    async fn apply_labels(&self, message_id: &str, label_ids: &[String]) -> Result<(), MailboxError>;

    /// ID of the label called `name` (case-insensitive), creating it if needed.
    async fn ensure_label(&self, name: &str) -> Result<String, MailboxError>;

    async fn list_labels(&self) -> Result<Vec<LabelInfo>, MailboxError>;
}
