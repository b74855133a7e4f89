//! End-to-end label workflow tests.
//!
//! Each test wires a real classifier, an in-memory libSQL ledger and a
//! temp-dir statistics document to a recording mailbox fake.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use inbox_triage::config::AppConfig;
use inbox_triage::error::{MailboxError, StrategyError};
use inbox_triage::mailbox::{LabelInfo, MailboxGateway};
use inbox_triage::pipeline::strategy::LabelingStrategy;
use inbox_triage::pipeline::{Classifier, LabelOutcome, LabelReport, Message, Orchestrator, Rule, RulesEngine};
use inbox_triage::store::{LibSqlLedger, ProcessedLedger, StatisticsStore};

/// Mailbox fake that records every mutation.
#[derive(Default)]
struct RecordingMailbox {
    unread: Vec<Message>,
    labels: Mutex<HashMap<String, String>>,
    applied: Mutex<Vec<(String, Vec<String>)>>,
    ensure_calls: Mutex<usize>,
}

impl RecordingMailbox {
    fn with_unread(unread: Vec<Message>) -> Self {
        Self {
            unread,
            ..Default::default()
        }
    }

    fn applied(&self) -> Vec<(String, Vec<String>)> {
        self.applied.lock().unwrap().clone()
    }

    fn ensure_calls(&self) -> usize {
        *self.ensure_calls.lock().unwrap()
    }
}

#[async_trait]
impl MailboxGateway for RecordingMailbox {
    async fn list_unread(&self, max: usize) -> Result<Vec<Message>, MailboxError> {
        Ok(self.unread.iter().take(max).cloned().collect())
    }

    async fn apply_labels(&self, message_id: &str, label_ids: &[String]) -> Result<(), MailboxError> {
        if !label_ids.is_empty() {
            self.applied
                .lock()
                .unwrap()
                .push((message_id.to_string(), label_ids.to_vec()));
        }
        Ok(())
    }

    async fn ensure_label(&self, name: &str) -> Result<String, MailboxError> {
        *self.ensure_calls.lock().unwrap() += 1;
        let mut labels = self.labels.lock().unwrap();
        let next = format!("Label_{}", labels.len() + 1);
        Ok(labels.entry(name.to_string()).or_insert(next).clone())
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>, MailboxError> {
        Ok(self
            .labels
            .lock()
            .unwrap()
            .iter()
            .map(|(name, id)| LabelInfo {
                id: id.clone(),
                name: name.clone(),
            })
            .collect())
    }
}

/// Strategy standing in for a model that always suggests one label.
struct Suggests(&'static str);

impl LabelingStrategy for Suggests {
    fn name(&self) -> &str {
        "suggests"
    }

    fn labels_for(&self, _message: &Message) -> Result<Vec<String>, StrategyError> {
        Ok(vec![self.0.to_string()])
    }
}

struct Broken;

impl LabelingStrategy for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn labels_for(&self, _message: &Message) -> Result<Vec<String>, StrategyError> {
        Err(StrategyError::Failed {
            strategy: "broken".into(),
            reason: "unavailable".into(),
        })
    }
}

struct World {
    _dir: tempfile::TempDir,
    mailbox: Arc<RecordingMailbox>,
    ledger: Arc<LibSqlLedger>,
    stats: Arc<StatisticsStore>,
    orchestrator: Orchestrator,
}

async fn world(classifier: Classifier, unread: Vec<Message>) -> World {
    let dir = tempfile::tempdir().unwrap();
    let mailbox = Arc::new(RecordingMailbox::with_unread(unread));
    let ledger = Arc::new(LibSqlLedger::open_in_memory().await.unwrap());
    let stats = Arc::new(StatisticsStore::open(dir.path().join("stats.json")).unwrap());
    let orchestrator = Orchestrator::new(classifier, ledger.clone(), stats.clone())
        .with_mailbox("default", mailbox.clone());
    World {
        _dir: dir,
        mailbox,
        ledger,
        stats,
        orchestrator,
    }
}

fn finance_and_work_rules() -> Classifier {
    Classifier::with_rules(
        RulesEngine::from_rules(vec![
            Rule::new("Work", &["project"], 2),
            Rule::new("Finance", &["invoice"], 5),
        ])
        .unwrap(),
    )
}

fn completed(outcome: LabelOutcome) -> LabelReport {
    match outcome {
        LabelOutcome::Completed(report) => report,
        LabelOutcome::NothingToDo => panic!("expected a completed label run"),
    }
}

#[tokio::test]
async fn rules_label_message_by_priority() {
    let w = world(
        finance_and_work_rules(),
        vec![Message::new("m1", "Invoice for project")],
    )
    .await;

    let report = completed(w.orchestrator.run_label("default", 10, false).await.unwrap());
    assert_eq!(report.planned.len(), 1);
    assert_eq!(report.planned[0].labels, vec!["Finance", "Work"]);
    assert_eq!(w.mailbox.applied().len(), 1);
}

#[tokio::test]
async fn rule_and_predicted_labels_are_merged() {
    let mut classifier = Classifier::with_rules(
        RulesEngine::from_rules(vec![Rule::new("Work", &["deadline"], 0)]).unwrap(),
    );
    classifier.push(Box::new(Suggests("finance")));
    classifier.push(Box::new(Broken));

    let w = world(
        classifier,
        vec![Message::new("m1", "Deadline moved").with_body("see attached")],
    )
    .await;

    let report = completed(w.orchestrator.run_label("default", 10, false).await.unwrap());
    assert_eq!(report.planned[0].labels, vec!["Finance", "Work"]);
    assert_eq!(report.applied.get("Finance"), Some(&1));
    assert_eq!(report.applied.get("Work"), Some(&1));
}

#[tokio::test]
async fn previously_processed_message_is_skipped() {
    let w = world(
        finance_and_work_rules(),
        vec![Message::new("m1", "Invoice for project")],
    )
    .await;
    w.ledger.mark_processed("default", "m1").await.unwrap();

    let report = completed(w.orchestrator.run_label("default", 10, false).await.unwrap());
    assert_eq!(report.skipped_processed, 1);
    assert!(report.planned.is_empty());
    assert!(w.mailbox.applied().is_empty());
    assert_eq!(w.mailbox.ensure_calls(), 0);
}

#[tokio::test]
async fn dry_run_leaves_mailbox_and_ledger_untouched() {
    let w = world(
        finance_and_work_rules(),
        vec![
            Message::new("m1", "Invoice for project"),
            Message::new("m2", "Project sync"),
        ],
    )
    .await;

    let report = completed(w.orchestrator.run_label("default", 10, true).await.unwrap());
    assert!(report.dry_run);
    assert_eq!(report.planned.len(), 2);
    assert!(report.applied.is_empty());

    assert!(w.mailbox.applied().is_empty());
    assert_eq!(w.mailbox.ensure_calls(), 0);
    assert!(!w.ledger.is_processed("default", "m1").await.unwrap());
    assert!(!w.ledger.is_processed("default", "m2").await.unwrap());
    assert_eq!(w.stats.snapshot().unwrap().global.label_runs, 0);
}

#[tokio::test]
async fn repeated_runs_label_each_message_once() {
    let w = world(
        finance_and_work_rules(),
        vec![
            Message::new("m1", "Invoice for project"),
            Message::new("m2", "Project sync"),
        ],
    )
    .await;

    completed(w.orchestrator.run_label("default", 10, false).await.unwrap());
    let second = completed(w.orchestrator.run_label("default", 10, false).await.unwrap());

    assert_eq!(second.skipped_processed, 2);
    assert!(second.applied.is_empty());
    assert_eq!(w.mailbox.applied().len(), 2);
    // Only the first run applied anything, so only it is counted.
    assert_eq!(w.stats.snapshot().unwrap().global.label_runs, 1);
}

#[tokio::test]
async fn statistics_recorded_once_per_batch() {
    let w = world(
        finance_and_work_rules(),
        vec![
            Message::new("m1", "Invoice for project"),
            Message::new("m2", "Project sync"),
            Message::new("m3", "Another invoice"),
        ],
    )
    .await;

    completed(w.orchestrator.run_label("default", 10, false).await.unwrap());

    let snap = w.stats.snapshot().unwrap();
    assert_eq!(snap.global.label_runs, 1);
    assert_eq!(snap.global.labels.get("Finance"), Some(&2));
    assert_eq!(snap.global.labels.get("Work"), Some(&2));
    assert_eq!(snap.account("default").unwrap().label_runs, 1);
    // One ensure per distinct label, thanks to the per-run cache.
    assert_eq!(w.mailbox.ensure_calls(), 2);
}

#[tokio::test]
async fn fetch_statistics_accumulate() {
    let unread: Vec<Message> = (1..=4)
        .map(|i| Message::new(format!("m{i}"), "hello"))
        .collect();
    let w = world(finance_and_work_rules(), unread).await;

    for limit in [1, 3, 0] {
        w.orchestrator.run_fetch("default", limit).await.unwrap();
    }

    let snap = w.orchestrator.stats_snapshot().unwrap();
    assert_eq!(snap.global.fetch_runs, 3);
    assert_eq!(snap.global.emails_seen, 4);
    assert_eq!(snap.account("default").unwrap().emails_seen, 4);
}

#[tokio::test]
async fn configured_classifier_runs_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("rules")).unwrap();
    std::fs::write(
        dir.path().join("rules/rules.json"),
        r#"{"rules": [
            {"label": "promotions", "keywords": ["sale"], "match_body": false, "priority": 1},
            {"label": "Receipts", "keywords": ["order"], "priority": 3}
        ]}"#,
    )
    .unwrap();

    let vars: HashMap<&str, &str> = HashMap::from([("SENTIMENT_LABELS", "yes")]);
    let config = AppConfig::from_lookup(dir.path(), |key| vars.get(key).map(|v| v.to_string())).unwrap();
    let classifier = Classifier::from_config(&config).unwrap();
    assert_eq!(classifier.strategy_names(), vec!["rules", "sentiment"]);

    let w = world(
        classifier,
        vec![
            Message::new("m1", "Great sale on your order, thanks!"),
            Message::new("m2", "Minutes").with_body("sale order"),
        ],
    )
    .await;

    let report = completed(w.orchestrator.run_label("default", 10, false).await.unwrap());
    assert_eq!(report.planned[0].labels, vec!["Positive", "Promotions", "Receipts"]);
    assert_eq!(report.planned[1].labels, vec!["Receipts"]);
    assert_eq!(w.ledger.count_for_account("default").await.unwrap(), 2);
}
