//! Reconciliation loop: fetch the catalogue, diff against the record store,
//! persist the delta, then notify.

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use matchwatch_adapters::{
    FixtureSource, HtmlListingSource, ListingRules, MatchSource, SourceError,
    DEFAULT_CATALOGUE_PREFIX, DEFAULT_FOCUS_TEAM,
};
use matchwatch_core::{new_matches, MatchRecord};
use matchwatch_notify::{LogNotifier, Notifier, TelegramConfig, TelegramNotifier};
use matchwatch_storage::{
    HttpClientConfig, HttpFetcher, RecordStore, SqliteRecordStore, StoreError,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "matchwatch-sync";

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub db_path: PathBuf,
    pub target_url: Option<String>,
    pub fixture_path: Option<PathBuf>,
    pub interval: Duration,
    pub focus_team: String,
    pub catalogue_prefix: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub telegram_config: Option<PathBuf>,
    pub dry_run: bool,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            db_path: non_empty("MATCHWATCH_DB_PATH")
                .or_else(|| non_empty("DB_PATH"))
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("matches.db")),
            target_url: non_empty("MATCHWATCH_TARGET_URL"),
            fixture_path: non_empty("MATCHWATCH_FIXTURE_PATH").map(PathBuf::from),
            interval: non_empty("MATCHWATCH_INTERVAL_SECS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_INTERVAL),
            focus_team: non_empty("MATCHWATCH_FOCUS_TEAM")
                .unwrap_or_else(|| DEFAULT_FOCUS_TEAM.to_string()),
            catalogue_prefix: non_empty("MATCHWATCH_CATALOGUE_PREFIX")
                .unwrap_or_else(|| DEFAULT_CATALOGUE_PREFIX.to_string()),
            user_agent: non_empty("MATCHWATCH_USER_AGENT")
                .unwrap_or_else(|| "matchwatch/0.1".to_string()),
            http_timeout_secs: non_empty("MATCHWATCH_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(20),
            telegram_config: non_empty("MATCHWATCH_TELEGRAM_CONFIG").map(PathBuf::from),
            dry_run: lookup("MATCHWATCH_DRY_RUN")
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
        }
    }

    pub fn listing_rules(&self) -> ListingRules {
        ListingRules {
            catalogue_prefix: self.catalogue_prefix.clone(),
            focus_team: self.focus_team.clone(),
        }
    }
}

/// Failures that abort a cycle. Notification failures never do.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("fetch failed")]
    Fetch(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Fetch(_) => "fetch",
            CycleError::Store(_) => "store",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub new_matches: Vec<MatchRecord>,
    pub inserted: u64,
    pub notified: usize,
    pub notify_failures: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub completed: usize,
    pub aborted: usize,
}

pub struct SyncPipeline {
    source: Box<dyn MatchSource>,
    store: Box<dyn RecordStore>,
    notifier: Box<dyn Notifier>,
    interval: Duration,
    schema_ready: AtomicBool,
}

impl SyncPipeline {
    pub fn new(
        source: Box<dyn MatchSource>,
        store: Box<dyn RecordStore>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            store,
            notifier,
            interval: DEFAULT_INTERVAL,
            schema_ready: AtomicBool::new(false),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One fetch → diff → persist → notify pass.
    ///
    /// A fetch or store failure returns before anything is written. Once the
    /// insert commits, notification failures are only counted.
    pub async fn run_once(&self) -> Result<CycleSummary, CycleError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_cycle", %run_id, source = self.source.source_url());
        self.cycle(run_id).instrument(span).await
    }

    async fn cycle(&self, run_id: Uuid) -> Result<CycleSummary, CycleError> {
        let started_at = Utc::now();

        if !self.schema_ready.load(Ordering::Acquire) {
            self.store.ensure_schema().await?;
            self.schema_ready.store(true, Ordering::Release);
        }

        let snapshot = self.source.fetch(run_id).await?;
        debug!(source = %snapshot.source_url, fetched = snapshot.matches.len(), "snapshot fetched");
        let stored = self.store.read_all().await?;
        let new = new_matches(&snapshot.matches, &stored);

        let mut summary = CycleSummary {
            run_id,
            started_at,
            finished_at: started_at,
            fetched: snapshot.matches.len(),
            new_matches: Vec::new(),
            inserted: 0,
            notified: 0,
            notify_failures: 0,
        };

        if new.is_empty() {
            info!(fetched = summary.fetched, stored = stored.len(), "no new matches");
            summary.finished_at = Utc::now();
            return Ok(summary);
        }

        summary.inserted = self.store.insert_missing(&new).await?;
        if summary.inserted != new.len() as u64 {
            warn!(
                new = new.len(),
                inserted = summary.inserted,
                "store already held some new matches"
            );
        }

        for record in &new {
            match self.notifier.notify(record).await {
                Ok(()) => {
                    summary.notified += 1;
                    info!(home = %record.home, away = %record.away, "notification sent");
                }
                Err(err) => {
                    summary.notify_failures += 1;
                    let err = anyhow::Error::new(err);
                    error!(home = %record.home, away = %record.away, error = format!("{err:#}"), "failed to send notification");
                }
            }
        }

        summary.new_matches = new;
        summary.finished_at = Utc::now();
        info!(
            fetched = summary.fetched,
            new = summary.new_matches.len(),
            notified = summary.notified,
            notify_failures = summary.notify_failures,
            "cycle complete"
        );
        Ok(summary)
    }

    /// Run cycles back to back, `interval` apart, until `shutdown` resolves.
    ///
    /// Shutdown is observed between cycles; a cycle in flight always finishes.
    pub async fn run_until<F>(&self, shutdown: F) -> LoopStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut stats = LoopStats::default();

        loop {
            match self.run_once().await {
                Ok(_) => stats.completed += 1,
                Err(err) => {
                    stats.aborted += 1;
                    let kind = err.kind();
                    let err = anyhow::Error::new(err);
                    error!(kind, error = format!("{err:#}"), "cycle aborted");
                }
            }

            debug!(interval_secs = self.interval.as_secs_f64(), "idle until next cycle");
            tokio::select! {
                _ = &mut shutdown => {
                    info!(completed = stats.completed, aborted = stats.aborted, "shutdown requested, stopping loop");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        stats
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

/// The store connects on first use, so a missing or broken database only
/// fails the cycles that touch it.
pub fn open_store(config: &SyncConfig) -> SqliteRecordStore {
    SqliteRecordStore::open(&config.db_path)
}

pub fn build_source(config: &SyncConfig) -> Result<Box<dyn MatchSource>> {
    if let Some(path) = &config.fixture_path {
        info!(path = %path.display(), "reading matches from fixture");
        return Ok(Box::new(FixtureSource::new(path.clone(), config.listing_rules())));
    }

    let Some(url) = &config.target_url else {
        bail!("no match source configured; set MATCHWATCH_TARGET_URL or MATCHWATCH_FIXTURE_PATH");
    };
    let http = HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
    })
    .context("building http client")?;
    Ok(Box::new(HtmlListingSource::new(
        http,
        url.clone(),
        config.listing_rules(),
    )))
}

pub fn build_notifier(config: &SyncConfig) -> Result<Box<dyn Notifier>> {
    if config.dry_run {
        info!("dry run: notifications are logged only");
        return Ok(Box::new(LogNotifier));
    }

    let telegram = match &config.telegram_config {
        Some(path) => Some(
            TelegramConfig::from_json_file(path)
                .with_context(|| format!("loading telegram config {}", path.display()))?,
        ),
        None => TelegramConfig::from_env().context("reading telegram env config")?,
    };
    let Some(telegram) = telegram else {
        bail!(
            "no notifier configured; set MATCHWATCH_TELEGRAM_CONFIG, TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID, or MATCHWATCH_DRY_RUN=1"
        );
    };
    Ok(Box::new(
        TelegramNotifier::new(telegram).context("building telegram notifier")?,
    ))
}

pub fn pipeline_from_config(config: &SyncConfig) -> Result<SyncPipeline> {
    let source = build_source(config)?;
    let notifier = build_notifier(config)?;
    let store = open_store(config);
    Ok(SyncPipeline::new(source, Box::new(store), notifier).with_interval(config.interval))
}
