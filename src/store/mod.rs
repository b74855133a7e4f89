//! Persistence: the processed ledger (libSQL) and usage statistics (JSON).

pub mod ledger;
pub mod migrations;
pub mod stats;

pub use ledger::{LibSqlLedger, ProcessedEntry, ProcessedLedger};
pub use stats::{Counters, StatisticsStore, StatsSnapshot};
