use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use inbox_triage::config::{AppConfig, DEFAULT_ACCOUNT};
use inbox_triage::logging;
use inbox_triage::mailbox::{GmailGateway, MailboxGateway};
use inbox_triage::pipeline::{Classifier, LabelOutcome, Orchestrator};
use inbox_triage::store::{LibSqlLedger, ProcessedLedger, StatisticsStore};

#[derive(Parser)]
#[command(name = "inbox-triage")]
#[command(about = "Label unread email with keyword rules and optional models")]
struct Cli {
    /// Dotenv file loaded before reading the environment.
    #[arg(long, default_value = ".env", env = "INBOX_TRIAGE_ENV_FILE")]
    env_file: PathBuf,

    /// Account to operate on, as named in the accounts file.
    #[arg(short, long, default_value = DEFAULT_ACCOUNT)]
    account: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch unread messages and print a summary
    Fetch {
        /// Maximum messages to fetch (defaults to FETCH_BATCH_SIZE)
        #[arg(short, long)]
        max_results: Option<usize>,
    },
    /// Classify unread messages and apply labels
    Label {
        /// Maximum messages to label (defaults to FETCH_BATCH_SIZE)
        #[arg(short, long)]
        max_results: Option<usize>,

        /// Show intended labels without changing the mailbox or the ledger
        #[arg(long)]
        dry_run: bool,
    },
    /// Create a label if it does not exist
    CreateLabel {
        name: String,
    },
    /// List the mailbox's labels
    Labels,
    /// Show local activity statistics
    Stats,
    /// Show recently labeled messages
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

impl Command {
    fn needs_mailbox(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::Label { .. } | Self::CreateLabel { .. } | Self::Labels
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::from_env(&cli.env_file).context("Failed to load configuration")?;
    let _log_guard = logging::init(&config.log_dir, &config.log_level)
        .with_context(|| format!("Failed to initialize logging in {}", config.log_dir.display()))?;
    info!(version = env!("CARGO_PKG_VERSION"), account = %cli.account, "inbox-triage starting");

    let account = config.account(&cli.account)?.clone();

    // ── Storage ─────────────────────────────────────────────────────
    let ledger: Arc<dyn ProcessedLedger> = Arc::new(
        LibSqlLedger::open(&config.db_path)
            .await
            .with_context(|| format!("Failed to open ledger at {}", config.db_path.display()))?,
    );
    let stats = Arc::new(StatisticsStore::open(&config.stats_file)?);

    // ── Pipeline ────────────────────────────────────────────────────
    let classifier = match cli.command {
        Command::Label { .. } => Classifier::from_config(&config)?,
        _ => Classifier::new(Vec::new()),
    };
    let mut orchestrator = Orchestrator::new(classifier, ledger, stats);
    if cli.command.needs_mailbox() {
        let gateway: Arc<dyn MailboxGateway> = Arc::new(GmailGateway::from_account(&config, &account)?);
        orchestrator = orchestrator.with_mailbox(account.name.clone(), gateway);
    }

    match cli.command {
        Command::Fetch { max_results } => {
            let limit = max_results.unwrap_or(config.fetch_batch_size);
            let messages = orchestrator.run_fetch(&account.name, limit).await?;
            if messages.is_empty() {
                println!("No unread emails found.");
            }
            for message in &messages {
                println!(
                    "{}\t{}\t{}\t{}",
                    message.id,
                    message.subject,
                    message.sender.as_deref().unwrap_or("Unknown"),
                    message.snippet
                );
            }
        }
        Command::Label {
            max_results,
            dry_run,
        } => {
            let limit = max_results.unwrap_or(config.fetch_batch_size);
            match orchestrator.run_label(&account.name, limit, dry_run).await? {
                LabelOutcome::NothingToDo => println!("No unread emails to label."),
                LabelOutcome::Completed(report) => {
                    for planned in &report.planned {
                        let verb = if report.dry_run { "would apply" } else { "applied" };
                        println!(
                            "{}\t{}\t{verb}: {}",
                            planned.message_id,
                            planned.subject,
                            planned.labels.join(", ")
                        );
                    }
                    if !report.applied.is_empty() {
                        let summary: Vec<String> = report
                            .applied
                            .iter()
                            .map(|(label, count)| format!("{label}: {count}"))
                            .collect();
                        println!("Applied labels {}", summary.join(", "));
                    } else if !report.dry_run {
                        println!("No labels were applied. Adjust your rules or model.");
                    }
                    println!(
                        "Fetched {}, already processed {}, unlabeled {}",
                        report.fetched, report.skipped_processed, report.unlabeled
                    );
                }
            }
        }
        Command::CreateLabel { name } => {
            let id = orchestrator.create_label(&account.name, &name).await?;
            println!("Label {name} is ready (id: {id}).");
        }
        Command::Labels => {
            for label in orchestrator.list_labels(&account.name).await? {
                println!("{}\t{}", label.id, label.name);
            }
        }
        Command::Stats => {
            let snapshot = orchestrator.stats_snapshot()?;
            let global = &snapshot.global;
            if global.fetch_runs == 0 && global.label_runs == 0 {
                println!("No stats recorded yet.");
                return Ok(());
            }
            println!("Fetch runs\t{}", global.fetch_runs);
            println!("Emails seen\t{}", global.emails_seen);
            println!("Label runs\t{}", global.label_runs);
            if !global.labels.is_empty() {
                let counts: Vec<String> = global
                    .labels
                    .iter()
                    .map(|(label, count)| format!("{label}: {count}"))
                    .collect();
                println!("Label counts\t{}", counts.join(", "));
            }
            for (name, bucket) in &snapshot.accounts {
                println!(
                    "[{name}] fetch runs {}, emails seen {}, label runs {}",
                    bucket.fetch_runs, bucket.emails_seen, bucket.label_runs
                );
            }
        }
        Command::History { limit } => {
            let entries = orchestrator.recent_history(limit).await?;
            if entries.is_empty() {
                println!("No messages processed yet.");
            }
            for entry in entries {
                println!(
                    "{}\t{}\t{}",
                    entry.processed_at.to_rfc3339(),
                    entry.account,
                    entry.message_id
                );
            }
        }
    }

    Ok(())
}
