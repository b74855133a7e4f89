//! Usage statistics stored as a small JSON document.
//!
//! Layout on disk:
//!
//! ```json
//! {
//!   "fetch_runs": 3, "emails_seen": 40, "label_runs": 2,
//!   "labels": {"Work": 7},
//!   "accounts": {"default": {"fetch_runs": 3, "emails_seen": 40, "label_runs": 2, "labels": {"Work": 7}}}
//! }
//! ```
//!
//! The top-level counters are always rewritten as the sum of the account
//! buckets plus any activity that predates per-account tracking, so they
//! can never drift from the buckets.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StatsError;

// ── Counters ────────────────────────────────────────────────────────

/// One bucket of counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    #[serde(default)]
    pub fetch_runs: u64,
    #[serde(default)]
    pub emails_seen: u64,
    #[serde(default)]
    pub label_runs: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, u64>,
}

impl Counters {
    fn absorb(&mut self, other: &Counters) {
        self.fetch_runs += other.fetch_runs;
        self.emails_seen += other.emails_seen;
        self.label_runs += other.label_runs;
        for (label, count) in &other.labels {
            *self.labels.entry(label.clone()).or_default() += count;
        }
    }

    /// `self - other`, clamped at zero per counter.
    fn saturating_sub(&self, other: &Counters) -> Counters {
        let labels = self
            .labels
            .iter()
            .filter_map(|(label, count)| {
                let rest = count.saturating_sub(other.labels.get(label).copied().unwrap_or(0));
                (rest > 0).then(|| (label.clone(), rest))
            })
            .collect();
        Counters {
            fetch_runs: self.fetch_runs.saturating_sub(other.fetch_runs),
            emails_seen: self.emails_seen.saturating_sub(other.emails_seen),
            label_runs: self.label_runs.saturating_sub(other.label_runs),
            labels,
        }
    }
}

/// Owned view of the statistics document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub global: Counters,
    pub accounts: BTreeMap<String, Counters>,
}

impl StatsSnapshot {
    pub fn account(&self, name: &str) -> Option<&Counters> {
        self.accounts.get(name)
    }
}

// ── Document ────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
struct StatsDocument {
    #[serde(default)]
    fetch_runs: u64,
    #[serde(default)]
    emails_seen: u64,
    #[serde(default)]
    label_runs: u64,
    #[serde(default)]
    labels: BTreeMap<String, u64>,
    #[serde(default)]
    accounts: BTreeMap<String, Counters>,
}

/// In-memory form: activity without an account plus the account buckets.
#[derive(Debug, Default)]
struct StatsState {
    legacy: Counters,
    accounts: BTreeMap<String, Counters>,
}

impl StatsState {
    fn from_document(doc: StatsDocument) -> Self {
        let totals = Counters {
            fetch_runs: doc.fetch_runs,
            emails_seen: doc.emails_seen,
            label_runs: doc.label_runs,
            labels: doc.labels,
        };
        let mut bucket_sum = Counters::default();
        for counters in doc.accounts.values() {
            bucket_sum.absorb(counters);
        }
        Self {
            legacy: totals.saturating_sub(&bucket_sum),
            accounts: doc.accounts,
        }
    }

    fn global(&self) -> Counters {
        let mut global = self.legacy.clone();
        for counters in self.accounts.values() {
            global.absorb(counters);
        }
        global
    }

    fn to_document(&self) -> StatsDocument {
        let global = self.global();
        StatsDocument {
            fetch_runs: global.fetch_runs,
            emails_seen: global.emails_seen,
            label_runs: global.label_runs,
            labels: global.labels,
            accounts: self.accounts.clone(),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            global: self.global(),
            accounts: self.accounts.clone(),
        }
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// JSON-file statistics store.
///
/// Every update re-reads the document, applies the change, and atomically
/// replaces the file. The mutex serializes updates within the process.
pub struct StatisticsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StatisticsStore {
    /// Open the document at `path`, creating it (and its directory) if absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StatsError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StatsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let store = Self {
            path,
            lock: Mutex::new(()),
        };
        if !store.path.exists() {
            store.write(&StatsState::default())?;
            debug!(path = %store.path.display(), "Created statistics document");
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Count one fetch run that saw `count` messages.
    pub fn record_fetch(&self, account: &str, count: u64) -> Result<(), StatsError> {
        self.update(|state| {
            let bucket = state.accounts.entry(account.to_string()).or_default();
            bucket.fetch_runs += 1;
            bucket.emails_seen += count;
        })
    }

    /// Count one label run and merge its per-label tallies.
    pub fn record_label_application(
        &self,
        account: &str,
        label_counts: &BTreeMap<String, u64>,
    ) -> Result<(), StatsError> {
        self.update(|state| {
            let bucket = state.accounts.entry(account.to_string()).or_default();
            bucket.label_runs += 1;
            for (label, count) in label_counts {
                *bucket.labels.entry(label.clone()).or_default() += count;
            }
        })
    }

    pub fn snapshot(&self) -> Result<StatsSnapshot, StatsError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read()?.snapshot())
    }

    fn update(&self, apply: impl FnOnce(&mut StatsState)) -> Result<(), StatsError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.read()?;
        apply(&mut state);
        self.write(&state)
    }

    fn read(&self) -> Result<StatsState, StatsError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StatsState::default());
            }
            Err(source) => {
                return Err(StatsError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Statistics document is corrupt; resetting");
                return Ok(StatsState::default());
            }
        };
        if !value.is_object() {
            warn!(path = %self.path.display(), "Statistics document is not an object; resetting");
            return Ok(StatsState::default());
        }
        match serde_json::from_value::<StatsDocument>(value) {
            Ok(doc) => Ok(StatsState::from_document(doc)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Statistics document has invalid counters; resetting");
                Ok(StatsState::default())
            }
        }
    }

    /// Write to a temp file in the same directory, then rename over the document.
    fn write(&self, state: &StatsState) -> Result<(), StatsError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let io_err = |source| StatsError::Io {
            path: self.path.clone(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        serde_json::to_writer_pretty(&mut tmp, &state.to_document())?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}
