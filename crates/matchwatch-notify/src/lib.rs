//! Match alert delivery: Telegram Bot API and a log-only dry-run notifier.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use matchwatch_core::MatchRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "matchwatch-notify";

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

const PLACEHOLDER_TOKEN: &str = "BOTTOKEN";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier configuration: {0}")]
    Config(String),
    #[error("reading notifier config {path}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("telegram request failed")]
    Request(#[source] reqwest::Error),
    #[error("telegram returned http status {status}")]
    HttpStatus { status: u16 },
    #[error("telegram rejected message (http {status}): {description}")]
    Api { status: u16, description: String },
    #[error("decoding telegram response")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        // The request URL embeds the bot token.
        NotifyError::Request(err.without_url())
    }
}

/// Delivery channel for match alerts. Callers treat failures as best-effort.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, record: &MatchRecord) -> Result<(), NotifyError>;

    async fn health_check(&self) -> Result<(), NotifyError>;
}

pub fn format_match_message(record: &MatchRecord, added_at: NaiveDateTime) -> String {
    format!(
        "🆕 *New Match Added!*\n🏠 Home: {}\n🏃 Away: {}\n⏰ Added: {}",
        record.home,
        record.away,
        added_at.format(TIMESTAMP_FORMAT)
    )
}

pub fn format_health_check_message(at: NaiveDateTime) -> String {
    format!(
        "🤖 *Bot Health Check*\n✅ Status: Active\n⏰ Time: {}\n📡 Service: Match Tracker",
        at.format(TIMESTAMP_FORMAT)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
struct TelegramConfigFile {
    telegram: TelegramSection,
}

#[derive(Debug, Deserialize)]
struct TelegramSection {
    bot_token: String,
    #[serde(rename = "bot_chatID")]
    bot_chat_id: ChatId,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatId {
    Text(String),
    Number(i64),
}

impl ChatId {
    fn into_string(self) -> String {
        match self {
            ChatId::Text(s) => s,
            ChatId::Number(n) => n.to_string(),
        }
    }
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, NotifyError> {
        let config = Self {
            bot_token: bot_token.into().trim().to_string(),
            chat_id: chat_id.into().trim().to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse `{"telegram": {"bot_token": "...", "bot_chatID": ...}}`.
    pub fn from_json_str(text: &str) -> Result<Self, NotifyError> {
        let file: TelegramConfigFile = serde_json::from_str(text)?;
        Self::new(file.telegram.bot_token, file.telegram.bot_chat_id.into_string())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, NotifyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| NotifyError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// `TELEGRAM_BOT_TOKEN` + `TELEGRAM_CHAT_ID`, or `None` when unset.
    pub fn from_env() -> Result<Option<Self>, NotifyError> {
        match (
            std::env::var("TELEGRAM_BOT_TOKEN").ok(),
            std::env::var("TELEGRAM_CHAT_ID").ok(),
        ) {
            (Some(token), Some(chat_id)) => Self::new(token, chat_id).map(Some),
            (None, None) => Ok(None),
            _ => Err(NotifyError::Config(
                "TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must be set together".to_string(),
            )),
        }
    }

    fn validate(&self) -> Result<(), NotifyError> {
        if self.bot_token.is_empty() || self.bot_token == PLACEHOLDER_TOKEN {
            return Err(NotifyError::Config("bot token not configured".to_string()));
        }
        if self.chat_id.is_empty() {
            return Err(NotifyError::Config("chat id not configured".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self, NotifyError> {
        Self::with_api_base(config, TELEGRAM_API_BASE)
    }

    pub fn with_api_base(config: TelegramConfig, api_base: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            config,
        })
    }

    pub async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.config.bot_token);
        let resp = self
            .client
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.config.chat_id,
                text,
                parse_mode: "Markdown",
            })
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;

        match serde_json::from_str::<TelegramResponse>(&body) {
            Ok(parsed) if parsed.ok => {
                debug!(chat_id = %self.config.chat_id, "telegram message delivered");
                Ok(())
            }
            Ok(parsed) => Err(NotifyError::Api {
                status: status.as_u16(),
                description: parsed.description.unwrap_or_else(|| "no description".to_string()),
            }),
            Err(_) if !status.is_success() => Err(NotifyError::HttpStatus {
                status: status.as_u16(),
            }),
            Err(err) => Err(NotifyError::Decode(err)),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, record: &MatchRecord) -> Result<(), NotifyError> {
        self.send_message(&format_match_message(record, Local::now().naive_local()))
            .await
    }

    async fn health_check(&self) -> Result<(), NotifyError> {
        self.send_message(&format_health_check_message(Local::now().naive_local()))
            .await
    }
}

/// Writes alerts to the log instead of a channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, record: &MatchRecord) -> Result<(), NotifyError> {
        let message = format_match_message(record, Local::now().naive_local());
        info!(home = %record.home, away = %record.away, %message, "dry-run notification");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), NotifyError> {
        info!("dry-run health check");
        Ok(())
    }
}
