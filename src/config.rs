//! Runtime configuration.
//!
//! Built once in `main` from an optional dotenv file plus the process
//! environment, then passed explicitly to every component.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConfigError;

pub const DEFAULT_ACCOUNT: &str = "default";
pub const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

const DEFAULT_FETCH_BATCH_SIZE: usize = 25;
const DEFAULT_MAILBOX_TIMEOUT_SECS: u64 = 30;

/// Credentials and identity for one mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountConfig {
    pub name: String,
    pub credentials_file: PathBuf,
    pub token_file: PathBuf,
    pub user_id: String,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rules_file: PathBuf,
    pub log_dir: PathBuf,
    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,
    /// Messages fetched per run unless overridden on the command line.
    pub fetch_batch_size: usize,
    pub stats_file: PathBuf,
    pub db_path: PathBuf,
    /// Predictive model; predictive labeling is off when unset.
    pub ml_model_path: Option<PathBuf>,
    /// Add Positive/Negative labels from message sentiment.
    pub sentiment_labels: bool,
    pub accounts_file: PathBuf,
    pub gmail_api_base: String,
    pub mailbox_timeout: Duration,
    /// Always contains [`DEFAULT_ACCOUNT`].
    pub accounts: BTreeMap<String, AccountConfig>,
}

#[derive(Debug, Deserialize)]
struct AccountsDocument {
    #[serde(default)]
    accounts: Vec<AccountEntry>,
}

#[derive(Debug, Deserialize)]
struct AccountEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    credentials_file: Option<String>,
    #[serde(default)]
    token_file: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

impl AppConfig {
    /// Load from the dotenv file (if present) and the process environment.
    ///
    /// Existing environment variables win over the dotenv file. Relative
    /// paths resolve against the working directory. Log, statistics and
    /// database directories are created.
    pub fn from_env(env_file: &Path) -> Result<Self, ConfigError> {
        match dotenvy::from_path(env_file) {
            Ok(()) => debug!(path = %env_file.display(), "Loaded env file"),
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %env_file.display(), "No env file");
            }
            Err(e) => {
                return Err(ConfigError::Parse {
                    path: env_file.to_path_buf(),
                    message: e.to_string(),
                });
            }
        }

        let base_dir = std::env::current_dir()?;
        let config = Self::from_lookup(&base_dir, |key| std::env::var(key).ok())?;
        config.create_dirs()?;
        Ok(config)
    }

    /// Build from an arbitrary variable source. Secret payloads are written out.
    pub fn from_lookup<F>(base_dir: &Path, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let path = |key: &str, fallback: &str| resolve_path(base_dir, var(key).as_deref(), fallback);

        let credentials_file = path("GOOGLE_CLIENT_SECRETS", "credentials.json");
        let token_file = path("GOOGLE_TOKEN_PATH", "token.json");

        write_secret_file(
            &credentials_file,
            var("GOOGLE_CLIENT_SECRETS_JSON").as_deref(),
            var("GOOGLE_CLIENT_SECRETS_B64").as_deref(),
            "GOOGLE_CLIENT_SECRETS_B64",
        )?;
        write_secret_file(
            &token_file,
            var("GOOGLE_TOKEN_JSON").as_deref(),
            var("GOOGLE_TOKEN_B64").as_deref(),
            "GOOGLE_TOKEN_B64",
        )?;

        let fetch_batch_size =
            parse_number("FETCH_BATCH_SIZE", var("FETCH_BATCH_SIZE"), DEFAULT_FETCH_BATCH_SIZE)?;
        let timeout_secs = parse_number(
            "MAILBOX_TIMEOUT_SECS",
            var("MAILBOX_TIMEOUT_SECS"),
            DEFAULT_MAILBOX_TIMEOUT_SECS,
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAILBOX_TIMEOUT_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }

        let default_account = AccountConfig {
            name: DEFAULT_ACCOUNT.to_string(),
            credentials_file,
            token_file,
            user_id: var("GMAIL_USER_ID").unwrap_or_else(|| "me".to_string()),
        };
        let accounts_file = path("GMAIL_ACCOUNTS_FILE", "accounts.json");
        let mut accounts = BTreeMap::from([(default_account.name.clone(), default_account)]);
        accounts.extend(
            load_accounts_file(base_dir, &accounts_file)?
                .into_iter()
                .map(|a| (a.name.clone(), a)),
        );

        Ok(Self {
            rules_file: path("RULES_FILE", "rules/rules.json"),
            log_dir: path("LOG_DIR", "logs"),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "INFO".to_string()),
            fetch_batch_size,
            stats_file: path("STATS_FILE", "data/stats.json"),
            db_path: path("DB_PATH", "data/email_assistant.db"),
            ml_model_path: var("ML_MODEL_PATH").map(|p| resolve_path(base_dir, Some(&p), "")),
            sentiment_labels: parse_flag("SENTIMENT_LABELS", var("SENTIMENT_LABELS"))?,
            accounts_file,
            gmail_api_base: var("GMAIL_API_BASE")
                .unwrap_or_else(|| DEFAULT_GMAIL_API_BASE.to_string()),
            mailbox_timeout: Duration::from_secs(timeout_secs),
            accounts,
        })
    }

    fn create_dirs(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.log_dir)?;
        for file in [&self.stats_file, &self.db_path] {
            if let Some(parent) = file.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Look up an account by name.
    pub fn account(&self, name: &str) -> Result<&AccountConfig, ConfigError> {
        self.accounts
            .get(name)
            .ok_or_else(|| ConfigError::UnknownAccount {
                name: name.to_string(),
                available: self.account_names().join(", "),
            })
    }

    /// Configured account names, sorted.
    pub fn account_names(&self) -> Vec<&str> {
        self.accounts.keys().map(String::as_str).collect()
    }
}

fn resolve_path(base_dir: &Path, value: Option<&str>, fallback: &str) -> PathBuf {
    let candidate = PathBuf::from(value.unwrap_or(fallback));
    if candidate.is_absolute() {
        candidate
    } else {
        base_dir.join(candidate)
    }
}

fn parse_number<T>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}

fn parse_flag(key: &str, value: Option<String>) -> Result<bool, ConfigError> {
    let Some(raw) = value else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}' is not a boolean"),
        }),
    }
}

/// Materialize a secret passed through the environment. Inline JSON wins over base64.
fn write_secret_file(
    target: &Path,
    inline: Option<&str>,
    b64: Option<&str>,
    b64_key: &str,
) -> Result<(), ConfigError> {
    let contents = match (inline, b64) {
        (Some(inline), _) => inline.as_bytes().to_vec(),
        (None, Some(encoded)) => {
            let compact: String = encoded.split_whitespace().collect();
            STANDARD
                .decode(compact)
                .map_err(|e| ConfigError::InvalidValue {
                    key: b64_key.to_string(),
                    message: format!("failed to decode base64 secret payload: {e}"),
                })?
        }
        (None, None) => return Ok(()),
    };
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(target, contents)?;
    info!(path = %target.display(), "Wrote secret file from environment");
    Ok(())
}

fn load_accounts_file(base_dir: &Path, path: &Path) -> Result<Vec<AccountConfig>, ConfigError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let document: AccountsDocument =
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(document
        .accounts
        .into_iter()
        .filter_map(|entry| {
            let name = entry.name.filter(|n| !n.is_empty())?;
            Some(AccountConfig {
                credentials_file: resolve_path(
                    base_dir,
                    entry.credentials_file.as_deref(),
                    "credentials.json",
                ),
                token_file: resolve_path(base_dir, entry.token_file.as_deref(), "token.json"),
                user_id: entry.user_id.unwrap_or_else(|| "me".to_string()),
                name,
            })
        })
        .collect())
}
