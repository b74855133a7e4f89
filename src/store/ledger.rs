//! Processed ledger: which (account, message) pairs have been labeled.
//!
//! The ledger gates the label workflow so repeated or overlapping runs never
//! label a message twice. Entries are append-or-replace and never deleted.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;

/// A single ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedEntry {
    pub account: String,
    pub message_id: String,
    pub processed_at: DateTime<Utc>,
}

/// Durable record of processed messages, keyed by (account, message_id).
#[async_trait]
pub trait ProcessedLedger: Send + Sync {
    async fn is_processed(&self, account: &str, message_id: &str) -> Result<bool, DatabaseError>;

    /// Record the message as processed now. Marking again refreshes the timestamp.
    async fn mark_processed(&self, account: &str, message_id: &str) -> Result<(), DatabaseError>;

    /// Most recently processed entries across all accounts, newest first.
    async fn recent_entries(&self, limit: usize) -> Result<Vec<ProcessedEntry>, DatabaseError>;

    async fn count_for_account(&self, account: &str) -> Result<u64, DatabaseError>;
}

// ── libSQL implementation ───────────────────────────────────────────

/// libSQL-backed ledger.
///
/// Holds one connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlLedger {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlLedger {
    /// Open (or create) a local database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to open libSQL database: {e}")))?;

        let ledger = Self::from_database(db).await?;
        info!(path = %path.display(), "Processed ledger opened");
        Ok(ledger)
    }

    /// Create an in-memory ledger (for tests).
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Open(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }
}

/// Parse a stored timestamp into DateTime<Utc>.
///
/// Accepts RFC 3339 and naive UTC timestamps with either a `T` or a space
/// separator, as written by earlier ledgers.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
            return ndt.and_utc();
        }
    }
    tracing::warn!(value = s, "Unparseable processed_at timestamp");
    DateTime::<Utc>::UNIX_EPOCH
}

#[async_trait]
impl ProcessedLedger for LibSqlLedger {
    async fn is_processed(&self, account: &str, message_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM processed_emails WHERE account = ?1 AND message_id = ?2",
                params![account, message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_processed: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("is_processed: {e}")))?;
        Ok(row.is_some())
    }

    async fn mark_processed(&self, account: &str, message_id: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        self.conn
            .execute(
                "INSERT OR REPLACE INTO processed_emails (account, message_id, processed_at) VALUES (?1, ?2, ?3)",
                params![account, message_id, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_processed: {e}")))?;
        debug!(account = %account, message_id = %message_id, "Marked processed");
        Ok(())
    }

    async fn recent_entries(&self, limit: usize) -> Result<Vec<ProcessedEntry>, DatabaseError> {
        // rowid breaks timestamp ties: INSERT OR REPLACE assigns a fresh one.
        let mut rows = self
            .conn
            .query(
                "SELECT account, message_id, processed_at FROM processed_emails ORDER BY processed_at DESC, rowid DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_entries: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_entries: {e}")))?
        {
            let account: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("recent_entries account: {e}")))?;
            let message_id: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("recent_entries message_id: {e}")))?;
            let processed_at: String = row
                .get(2)
                .map_err(|e| DatabaseError::Query(format!("recent_entries processed_at: {e}")))?;
            entries.push(ProcessedEntry {
                account,
                message_id,
                processed_at: parse_datetime(&processed_at),
            });
        }
        Ok(entries)
    }

    async fn count_for_account(&self, account: &str) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM processed_emails WHERE account = ?1",
                params![account],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_for_account: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("count_for_account: {e}")))?;
        match row {
            Some(row) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("count_for_account: {e}")))?;
                Ok(count.max(0) as u64)
            }
            None => Ok(0),
        }
    }
}
