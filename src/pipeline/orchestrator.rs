//! Fetch and label workflows.
//!
//! Label flow, per message and strictly in provider order:
//! 1. Ledger gate: already processed messages are skipped
//! 2. Classifier: union of all strategies
//! 3. Mailbox: ensure label IDs (cached per run), apply them in one call
//! 4. Ledger: mark processed
//!
//! Statistics are best-effort and never fail a run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, Error, Result};
use crate::mailbox::{LabelInfo, MailboxGateway};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::types::Message;
use crate::store::{ProcessedEntry, ProcessedLedger, StatisticsStore, StatsSnapshot};

/// Labels chosen for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedLabels {
    pub message_id: String,
    pub subject: String,
    pub labels: Vec<String>,
}

/// Summary of a label run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelReport {
    pub account: String,
    pub dry_run: bool,
    pub fetched: usize,
    /// Every labeled message, applied or (in a dry run) intended.
    pub planned: Vec<PlannedLabels>,
    /// Per-label totals actually applied. Always empty in a dry run.
    pub applied: BTreeMap<String, u64>,
    /// Messages the ledger had already seen.
    pub skipped_processed: usize,
    /// Messages no strategy produced a label for.
    pub unlabeled: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LabelOutcome {
    /// The mailbox had no unread messages.
    NothingToDo,
    Completed(LabelReport),
}

/// Runs the workflows over a registry of per-account mailboxes.
pub struct Orchestrator {
    classifier: Classifier,
    ledger: Arc<dyn ProcessedLedger>,
    stats: Arc<StatisticsStore>,
    mailboxes: BTreeMap<String, Arc<dyn MailboxGateway>>,
}

impl Orchestrator {
    pub fn new(
        classifier: Classifier,
        ledger: Arc<dyn ProcessedLedger>,
        stats: Arc<StatisticsStore>,
    ) -> Self {
        Self {
            classifier,
            ledger,
            stats,
            mailboxes: BTreeMap::new(),
        }
    }

    /// Register the mailbox for `account`, replacing any previous one.
    pub fn with_mailbox(mut self, account: impl Into<String>, mailbox: Arc<dyn MailboxGateway>) -> Self {
        self.mailboxes.insert(account.into(), mailbox);
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    fn mailbox(&self, account: &str) -> std::result::Result<&Arc<dyn MailboxGateway>, ConfigError> {
        self.mailboxes
            .get(account)
            .ok_or_else(|| ConfigError::UnknownAccount {
                name: account.to_string(),
                available: self
                    .mailboxes
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    // ── Fetch ───────────────────────────────────────────────────────

    /// Unread messages, up to `limit`. Counted in statistics.
    pub async fn run_fetch(&self, account: &str, limit: usize) -> Result<Vec<Message>> {
        let mailbox = self.mailbox(account)?;
        let messages = mailbox.list_unread(limit).await?;
        info!(account = %account, count = messages.len(), "Fetched unread messages");

        if let Err(e) = self.stats.record_fetch(account, messages.len() as u64) {
            warn!(account = %account, error = %e, "Failed to record fetch statistics");
        }
        Ok(messages)
    }

    // ── Label ───────────────────────────────────────────────────────

    /// Classify and label up to `limit` unread messages.
    ///
    /// A mailbox or ledger error aborts the run; messages labeled before
    /// the failure stay marked.
    pub async fn run_label(&self, account: &str, limit: usize, dry_run: bool) -> Result<LabelOutcome> {
        let mailbox = self.mailbox(account)?;
        let messages = mailbox.list_unread(limit).await?;
        if messages.is_empty() {
            info!(account = %account, "No unread messages to label");
            return Ok(LabelOutcome::NothingToDo);
        }

        let mut report = LabelReport {
            account: account.to_string(),
            dry_run,
            fetched: messages.len(),
            ..Default::default()
        };
        let mut label_ids: HashMap<String, String> = HashMap::new();

        for message in &messages {
            if self.ledger.is_processed(account, &message.id).await? {
                debug!(account = %account, message_id = %message.id, "Already processed; skipping");
                report.skipped_processed += 1;
                continue;
            }

            let labels = self.classifier.classify(message);
            if labels.is_empty() {
                info!(account = %account, message_id = %message.id, "No labels matched; leaving message");
                report.unlabeled += 1;
                continue;
            }

            if dry_run {
                info!(account = %account, message_id = %message.id, labels = ?labels, "Dry run: would apply labels");
            } else {
                let mut ids = Vec::with_capacity(labels.len());
                for label in &labels {
                    let id = match label_ids.get(label) {
                        Some(id) => id.clone(),
                        None => {
                            let id = mailbox.ensure_label(label).await?;
                            label_ids.insert(label.clone(), id.clone());
                            id
                        }
                    };
                    ids.push(id);
                }
                mailbox.apply_labels(&message.id, &ids).await?;
                self.ledger.mark_processed(account, &message.id).await?;
                for label in &labels {
                    *report.applied.entry(label.clone()).or_default() += 1;
                }
                info!(account = %account, message_id = %message.id, labels = ?labels, "Applied labels");
            }

            report.planned.push(PlannedLabels {
                message_id: message.id.clone(),
                subject: message.subject.clone(),
                labels,
            });
        }

        if !report.applied.is_empty() {
            if let Err(e) = self.stats.record_label_application(account, &report.applied) {
                warn!(account = %account, error = %e, "Failed to record label statistics");
            }
        }

        info!(
            account = %account,
            dry_run,
            labeled = report.planned.len(),
            skipped = report.skipped_processed,
            unlabeled = report.unlabeled,
            "Label run complete"
        );
        Ok(LabelOutcome::Completed(report))
    }

    // ── Labels, stats, history ──────────────────────────────────────

    /// Ensure a label exists and return its ID.
    pub async fn create_label(&self, account: &str, name: &str) -> Result<String> {
        let mailbox = self.mailbox(account)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Config(ConfigError::InvalidValue {
                key: "label".into(),
                message: "label name must not be empty".into(),
            }));
        }
        Ok(mailbox.ensure_label(name).await?)
    }

    pub async fn list_labels(&self, account: &str) -> Result<Vec<LabelInfo>> {
        let mailbox = self.mailbox(account)?;
        Ok(mailbox.list_labels().await?)
    }

    pub fn stats_snapshot(&self) -> Result<StatsSnapshot> {
        Ok(self.stats.snapshot()?)
    }

    /// Most recently processed messages, newest first.
    pub async fn recent_history(&self, limit: usize) -> Result<Vec<ProcessedEntry>> {
        Ok(self.ledger.recent_entries(limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::MailboxError;
    use crate::pipeline::rules::{Rule, RulesEngine};
    use crate::store::LibSqlLedger;

    #[derive(Default)]
    struct FakeMailbox {
        messages: Vec<Message>,
        applied: Mutex<Vec<(String, Vec<String>)>>,
        ensured: Mutex<Vec<String>>,
        fail_apply_for: Option<&'static str>,
    }

    #[async_trait]
    impl MailboxGateway for FakeMailbox {
        async fn list_unread(&self, max: usize) -> std::result::Result<Vec<Message>, MailboxError> {
            Ok(self.messages.iter().take(max).cloned().collect())
        }

        async fn apply_labels(
            &self,
            message_id: &str,
            label_ids: &[String],
        ) -> std::result::Result<(), MailboxError> {
            if self.fail_apply_for == Some(message_id) {
                return Err(MailboxError::Status {
                    operation: "messages.modify".into(),
                    status: 500,
                    body: "boom".into(),
                });
            }
            self.applied
                .lock()
                .unwrap()
                .push((message_id.to_string(), label_ids.to_vec()));
            Ok(())
        }

        async fn ensure_label(&self, name: &str) -> std::result::Result<String, MailboxError> {
            self.ensured.lock().unwrap().push(name.to_string());
            Ok(format!("id-{name}"))
        }

        async fn list_labels(&self) -> std::result::Result<Vec<LabelInfo>, MailboxError> {
            Ok(vec![LabelInfo {
                id: "INBOX".into(),
                name: "INBOX".into(),
            }])
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        mailbox: Arc<FakeMailbox>,
        ledger: Arc<LibSqlLedger>,
        stats: Arc<StatisticsStore>,
        orchestrator: Orchestrator,
    }

    async fn harness(mailbox: FakeMailbox) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let engine = RulesEngine::from_rules(vec![
            Rule::new("Finance", &["invoice"], 5),
            Rule::new("work", &["project"], 2),
        ])
        .unwrap();
        let ledger = Arc::new(LibSqlLedger::open_in_memory().await.unwrap());
        let stats = Arc::new(StatisticsStore::open(dir.path().join("stats.json")).unwrap());
        let mailbox = Arc::new(mailbox);
        let orchestrator = Orchestrator::new(
            Classifier::with_rules(engine),
            ledger.clone(),
            stats.clone(),
        )
        .with_mailbox("default", mailbox.clone());
        Harness {
            _dir: dir,
            mailbox,
            ledger,
            stats,
            orchestrator,
        }
    }

    fn inbox() -> Vec<Message> {
        vec![
            Message::new("m1", "Invoice for project"),
            Message::new("m2", "Lunch?"),
            Message::new("m3", "Project kickoff"),
        ]
    }

    #[tokio::test]
    async fn label_run_applies_and_marks() {
        let h = harness(FakeMailbox {
            messages: inbox(),
            ..Default::default()
        })
        .await;

        let outcome = h.orchestrator.run_label("default", 10, false).await.unwrap();
        let LabelOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };

        assert_eq!(report.fetched, 3);
        assert_eq!(report.unlabeled, 1);
        assert_eq!(report.applied.get("Work"), Some(&2));
        assert_eq!(report.applied.get("Finance"), Some(&1));
        assert_eq!(
            *h.mailbox.applied.lock().unwrap(),
            vec![
                ("m1".to_string(), vec!["id-Finance".to_string(), "id-Work".to_string()]),
                ("m3".to_string(), vec!["id-Work".to_string()]),
            ]
        );
        assert!(h.ledger.is_processed("default", "m1").await.unwrap());
        assert!(!h.ledger.is_processed("default", "m2").await.unwrap());
    }

    #[tokio::test]
    async fn label_ids_are_cached_per_run() {
        let h = harness(FakeMailbox {
            messages: inbox(),
            ..Default::default()
        })
        .await;
        h.orchestrator.run_label("default", 10, false).await.unwrap();

        let mut ensured = h.mailbox.ensured.lock().unwrap().clone();
        ensured.sort();
        assert_eq!(ensured, vec!["Finance", "Work"]);
    }

    #[tokio::test]
    async fn empty_mailbox_is_nothing_to_do() {
        let h = harness(FakeMailbox::default()).await;
        let outcome = h.orchestrator.run_label("default", 10, false).await.unwrap();
        assert_eq!(outcome, LabelOutcome::NothingToDo);
        assert_eq!(h.stats.snapshot().unwrap().global.label_runs, 0);
    }

    #[tokio::test]
    async fn unknown_account_fails_before_io() {
        let h = harness(FakeMailbox {
            messages: inbox(),
            ..Default::default()
        })
        .await;
        let err = h.orchestrator.run_label("work", 10, false).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::UnknownAccount { .. })
        ));
        assert!(h.mailbox.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mailbox_failure_aborts_but_keeps_earlier_marks() {
        let h = harness(FakeMailbox {
            messages: inbox(),
            fail_apply_for: Some("m3"),
            ..Default::default()
        })
        .await;

        let err = h.orchestrator.run_label("default", 10, false).await.unwrap_err();
        assert!(matches!(err, Error::Mailbox(MailboxError::Status { .. })));
        assert!(h.ledger.is_processed("default", "m1").await.unwrap());
        assert!(!h.ledger.is_processed("default", "m3").await.unwrap());
        // Aborted runs record no label statistics.
        assert_eq!(h.stats.snapshot().unwrap().global.label_runs, 0);
    }

    #[tokio::test]
    async fn fetch_records_statistics() {
        let h = harness(FakeMailbox {
            messages: inbox(),
            ..Default::default()
        })
        .await;

        let messages = h.orchestrator.run_fetch("default", 2).await.unwrap();
        assert_eq!(messages.len(), 2);
        let snap = h.orchestrator.stats_snapshot().unwrap();
        assert_eq!(snap.global.fetch_runs, 1);
        assert_eq!(snap.global.emails_seen, 2);
    }

    #[tokio::test]
    async fn create_label_trims_and_rejects_empty() {
        let h = harness(FakeMailbox::default()).await;
        assert_eq!(
            h.orchestrator.create_label("default", "  Receipts ").await.unwrap(),
            "id-Receipts"
        );
        assert!(h.orchestrator.create_label("default", "   ").await.is_err());
    }

    #[tokio::test]
    async fn history_lists_marked_messages() {
        let h = harness(FakeMailbox {
            messages: inbox(),
            ..Default::default()
        })
        .await;
        h.orchestrator.run_label("default", 10, false).await.unwrap();

        let history = h.orchestrator.recent_history(10).await.unwrap();
        let ids: Vec<&str> = history.iter().map(|e| e.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m1"]);
    }

    #[tokio::test]
    async fn list_labels_passes_through() {
        let h = harness(FakeMailbox::default()).await;
        let labels = h.orchestrator.list_labels("default").await.unwrap();
        assert_eq!(labels[0].name, "INBOX");
    }
}
