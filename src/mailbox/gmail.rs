//! Gmail REST gateway.
//!
//! Talks to `{base}/users/{user_id}` with a bearer access token read from the
//! account's token file. Obtaining and refreshing that token is left to the
//! OAuth tooling that writes the file.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::{AccountConfig, AppConfig};
use crate::error::MailboxError;
use crate::mailbox::{LabelInfo, MailboxGateway};
use crate::pipeline::types::Message;

const NO_SUBJECT: &str = "(no subject)";

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

impl MessagePart {
    fn data(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .filter(|d| !d.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<GmailLabel>,
}

#[derive(Debug, Deserialize)]
struct GmailLabel {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TokenFile {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

// ── Parsing helpers ─────────────────────────────────────────────────

fn header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// RFC 2822 date, ignoring a trailing comment such as `(UTC)`.
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = match value.find(" (") {
        Some(idx) => &value[..idx],
        None => value,
    };
    DateTime::parse_from_rfc2822(trimmed.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// URL-safe base64 with or without padding. Undecodable data yields `None`.
fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// First `text/plain` part carrying data, depth-first.
fn find_plain_text(part: &MessagePart) -> Option<&str> {
    if part.mime_type.eq_ignore_ascii_case("text/plain") {
        if let Some(data) = part.data() {
            return Some(data);
        }
    }
    part.parts.iter().find_map(find_plain_text)
}

fn extract_body(payload: &MessagePart) -> String {
    let Some(data) = payload.data().or_else(|| find_plain_text(payload)) else {
        return String::new();
    };
    decode_body(data).unwrap_or_else(|| {
        debug!("Undecodable message body; using empty body");
        String::new()
    })
}

fn into_message(raw: GmailMessage) -> Message {
    let payload = raw.payload.unwrap_or_default();
    let subject = header(&payload.headers, "Subject")
        .unwrap_or(NO_SUBJECT)
        .to_string();
    let sender = header(&payload.headers, "From").map(str::to_string);
    let received_at = header(&payload.headers, "Date").and_then(parse_date);
    let body = extract_body(&payload);

    Message {
        id: raw.id,
        thread_id: raw.thread_id,
        subject,
        body,
        snippet: raw.snippet,
        sender,
        labels: raw.label_ids,
        received_at,
    }
}

/// Read the access token from a token file (`token` or `access_token`).
pub fn read_access_token(account: &str, path: &Path) -> Result<SecretString, MailboxError> {
    let raw = std::fs::read_to_string(path).map_err(|e| MailboxError::Auth {
        account: account.to_string(),
        reason: format!("cannot read token file {}: {e}", path.display()),
    })?;
    let parsed: TokenFile = serde_json::from_str(&raw).map_err(|e| MailboxError::Auth {
        account: account.to_string(),
        reason: format!("invalid token file {}: {e}", path.display()),
    })?;
    parsed
        .token
        .or(parsed.access_token)
        .filter(|t| !t.is_empty())
        .map(SecretString::from)
        .ok_or_else(|| MailboxError::Auth {
            account: account.to_string(),
            reason: format!("no access token in {}", path.display()),
        })
}

// ── Gateway ─────────────────────────────────────────────────────────

/// Gmail mailbox for one account.
pub struct GmailGateway {
    account: String,
    users_url: String,
    token: SecretString,
    client: reqwest::Client,
}

impl GmailGateway {
    pub fn new(
        account: impl Into<String>,
        api_base: &str,
        user_id: &str,
        token: SecretString,
        timeout: Duration,
    ) -> Result<Self, MailboxError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailboxError::Request {
                operation: "client setup".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            account: account.into(),
            users_url: format!("{}/users/{}", api_base.trim_end_matches('/'), user_id),
            token,
            client,
        })
    }

    /// Gateway for a configured account, authenticated from its token file.
    pub fn from_account(config: &AppConfig, account: &AccountConfig) -> Result<Self, MailboxError> {
        let token = read_access_token(&account.name, &account.token_file)?;
        let gateway = Self::new(
            account.name.clone(),
            &config.gmail_api_base,
            &account.user_id,
            token,
            config.mailbox_timeout,
        )?;
        info!(account = %account.name, "Gmail gateway ready");
        Ok(gateway)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.users_url)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, MailboxError> {
        let response = request
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| MailboxError::Request {
                operation: operation.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(MailboxError::Auth {
                account: self.account.clone(),
                reason: "access token rejected".into(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailboxError::Status {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| MailboxError::InvalidResponse(format!("{operation}: {e}")))
    }

    async fn get_message(&self, id: &str) -> Result<Message, MailboxError> {
        let raw: GmailMessage = self
            .send_json(
                "messages.get",
                self.client
                    .get(self.url(&format!("messages/{id}")))
                    .query(&[("format", "full")]),
            )
            .await?;
        Ok(into_message(raw))
    }
}

#[async_trait]
impl MailboxGateway for GmailGateway {
    async fn list_unread(&self, max: usize) -> Result<Vec<Message>, MailboxError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let list: MessageList = self
            .send_json(
                "messages.list",
                self.client
                    .get(self.url("messages"))
                    .query(&[("labelIds", "UNREAD".to_string()), ("maxResults", max.to_string())]),
            )
            .await?;

        let mut messages = Vec::with_capacity(list.messages.len());
        for reference in list.messages.iter().take(max) {
            messages.push(self.get_message(&reference.id).await?);
        }
        debug!(account = %self.account, count = messages.len(), "Fetched unread messages");
        Ok(messages)
    }

    async fn apply_labels(&self, message_id: &str, label_ids: &[String]) -> Result<(), MailboxError> {
        if label_ids.is_empty() {
            return Ok(());
        }
        let _: serde_json::Value = self
            .send_json(
                "messages.modify",
                self.client
                    .post(self.url(&format!("messages/{message_id}/modify")))
                    .json(&serde_json::json!({ "addLabelIds": label_ids })),
            )
            .await?;
        Ok(())
    }

    async fn ensure_label(&self, name: &str) -> Result<String, MailboxError> {
        if let Some(existing) = self
            .list_labels()
            .await?
            .into_iter()
            .find(|l| l.name.eq_ignore_ascii_case(name))
        {
            return Ok(existing.id);
        }

        let created: GmailLabel = self
            .send_json(
                "labels.create",
                self.client.post(self.url("labels")).json(&serde_json::json!({
                    "name": name,
                    "labelListVisibility": "labelShow",
                    "messageListVisibility": "show",
                })),
            )
            .await?;
        info!(account = %self.account, label = %created.name, id = %created.id, "Created label");
        Ok(created.id)
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>, MailboxError> {
        let list: LabelList = self
            .send_json("labels.list", self.client.get(self.url("labels")))
            .await?;
        Ok(list
            .labels
            .into_iter()
            .map(|l| LabelInfo {
                id: l.id,
                name: l.name,
            })
            .collect())
    }
}
