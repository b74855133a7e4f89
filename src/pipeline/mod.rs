//! Labeling pipeline.
//!
//! Every unread message flows through:
//! 1. `ProcessedLedger::is_processed()`: at most one labeling per (account, message)
//! 2. `Classifier::classify()`: rules, plus the predictor and sentiment when enabled
//! 3. `MailboxGateway::apply_labels()`, then the ledger mark
//!
//! **Dry runs never touch the mailbox or the ledger.**

pub mod classifier;
pub mod orchestrator;
pub mod predictor;
pub mod rules;
pub mod sentiment;
pub mod strategy;
pub mod types;

pub use classifier::Classifier;
pub use orchestrator::{LabelOutcome, LabelReport, Orchestrator, PlannedLabels};
pub use rules::{Rule, RulesEngine};
pub use types::Message;
