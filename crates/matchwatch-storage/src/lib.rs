//! Durable match record store + HTTP fetch utilities for matchwatch.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use matchwatch_core::MatchRecord;
use reqwest::StatusCode;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "matchwatch-storage";

const CREATE_MATCHES_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS matches (home TEXT NOT NULL, away TEXT NOT NULL)";

const CREATE_MATCHES_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS matches_home_away ON matches (home, away)";

const INSERT_IF_ABSENT: &str = "INSERT INTO matches (home, away) \
     SELECT ?1, ?2 \
     WHERE NOT EXISTS (SELECT 1 FROM matches WHERE home = ?1 AND away = ?2)";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable")]
    Unavailable(#[from] sqlx::Error),
    #[error("preparing store location {path}")]
    Location {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Durable set of every match ever observed.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the backing table if it is missing. Safe to call repeatedly.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    async fn read_all(&self) -> Result<BTreeSet<MatchRecord>, StoreError>;

    /// Insert every candidate not already stored, all-or-nothing.
    ///
    /// Returns how many rows were actually written; a repeated call with the
    /// same candidates returns 0.
    async fn insert_missing(&self, candidates: &[MatchRecord]) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteRecordStore {
    /// Point a store at the SQLite file at `path`.
    ///
    /// Nothing touches the disk until the first query, so an unusable
    /// location surfaces as a `StoreError` from that query rather than here.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_lazy_with(options);

        debug!(path = %path.display(), "record store configured");
        Self { pool, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM matches")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Location {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        sqlx::query(CREATE_MATCHES_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_MATCHES_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    async fn read_all(&self) -> Result<BTreeSet<MatchRecord>, StoreError> {
        let rows = sqlx::query("SELECT home, away FROM matches")
            .fetch_all(&self.pool)
            .await?;
        let records = rows
            .iter()
            .map(|row| -> Result<MatchRecord, sqlx::Error> {
                Ok(MatchRecord {
                    home: row.try_get("home")?,
                    away: row.try_get("away")?,
                })
            })
            .collect::<Result<BTreeSet<_>, sqlx::Error>>()?;
        Ok(records)
    }

    async fn insert_missing(&self, candidates: &[MatchRecord]) -> Result<u64, StoreError> {
        if candidates.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for record in candidates {
            let result = sqlx::query(INSERT_IF_ABSENT)
                .bind(&record.home)
                .bind(&record.away)
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        debug!(candidates = candidates.len(), inserted, "insert_missing committed");
        Ok(inserted)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    /// Single GET, no retries; the caller's schedule is the retry policy.
    pub async fn fetch_text(&self, run_id: Uuid, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, url);
        async move {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();

            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.text().await?;
            debug!(%status, bytes = body.len(), "fetched page");
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}
