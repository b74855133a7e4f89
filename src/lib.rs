//! Inbox triage: rule-driven email labeling with a processed ledger.

pub mod config;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod pipeline;
pub mod store;
