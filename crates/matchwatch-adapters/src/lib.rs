//! Match source contracts + ticketing catalogue adapters.

use std::path::PathBuf;

use async_trait::async_trait;
use matchwatch_core::{MatchRecord, Snapshot};
use matchwatch_storage::{FetchError, HttpFetcher};
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "matchwatch-adapters";

pub const DEFAULT_CATALOGUE_PREFIX: &str = "/fr/catalogue/match-";
pub const DEFAULT_FOCUS_TEAM: &str = "rcsa";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Transport(#[from] FetchError),
    #[error("parsing listing: {0}")]
    Parse(String),
    #[error("reading fixture {path}")]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Transport(_) => "transport",
            SourceError::Parse(_) => "parse",
            SourceError::Fixture { .. } => "fixture",
        }
    }
}

/// Anything that can produce the current listing of matches.
#[async_trait]
pub trait MatchSource: Send + Sync {
    fn source_url(&self) -> &str;

    async fn fetch(&self, run_id: Uuid) -> Result<Snapshot, SourceError>;
}

/// How catalogue links map onto `(home, away)` pairs.
///
/// Links look like `/fr/catalogue/match-rcsa-olympique-lyonnais`; the focus team
/// is the club whose ticketing site is scraped, so it is always one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRules {
    pub catalogue_prefix: String,
    pub focus_team: String,
}

impl Default for ListingRules {
    fn default() -> Self {
        Self {
            catalogue_prefix: DEFAULT_CATALOGUE_PREFIX.to_string(),
            focus_team: DEFAULT_FOCUS_TEAM.to_string(),
        }
    }
}

fn slug_from_href<'a>(href: &'a str, prefix: &str) -> Option<&'a str> {
    let start = href.find(prefix)? + prefix.len();
    let slug = href[start..]
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    if slug.is_empty() {
        None
    } else {
        Some(slug)
    }
}

fn normalize_name(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a de-slugged fixture name around the focus team.
pub fn record_from_name(name: &str, focus_team: &str) -> Option<MatchRecord> {
    let name = normalize_name(&name.to_lowercase());
    let focus = normalize_name(&focus_team.to_lowercase());
    if focus.is_empty() {
        return None;
    }

    if let Some(rest) = name.strip_prefix(&focus) {
        let away = rest.trim();
        return (!away.is_empty()).then(|| MatchRecord::new(focus.clone(), away));
    }
    if let Some(rest) = name.strip_suffix(&focus) {
        let home = rest.trim();
        return (!home.is_empty()).then(|| MatchRecord::new(home, focus.clone()));
    }
    None
}

/// Extract every fixture link from a catalogue page, in document order.
///
/// Repeated links are kept; collapsing them is the caller's job. Links that do
/// not involve the focus team are skipped.
pub fn parse_match_listing(html: &str, rules: &ListingRules) -> Result<Vec<MatchRecord>, SourceError> {
    let selector = Selector::parse("a[href]").map_err(|e| SourceError::Parse(e.to_string()))?;
    let document = Html::parse_document(html);

    let mut records = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if !href.contains("match-") {
            continue;
        }
        let Some(slug) = slug_from_href(href, &rules.catalogue_prefix) else {
            continue;
        };
        let name = slug.replace('-', " ");
        match record_from_name(&name, &rules.focus_team) {
            Some(record) => records.push(record),
            None => debug!(href, "skipping link without focus team"),
        }
    }
    Ok(records)
}

/// Live catalogue page fetched over HTTP.
#[derive(Debug, Clone)]
pub struct HtmlListingSource {
    http: HttpFetcher,
    url: String,
    rules: ListingRules,
}

impl HtmlListingSource {
    pub fn new(http: HttpFetcher, url: impl Into<String>, rules: ListingRules) -> Self {
        Self {
            http,
            url: url.into(),
            rules,
        }
    }
}

#[async_trait]
impl MatchSource for HtmlListingSource {
    fn source_url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self, run_id: Uuid) -> Result<Snapshot, SourceError> {
        let page = self.http.fetch_text(run_id, &self.url).await?;
        let matches = parse_match_listing(&page.body, &self.rules)?;
        info!(%run_id, url = %page.final_url, found = matches.len(), "parsed catalogue listing");
        Ok(Snapshot::new(self.url.clone(), matches))
    }
}

/// Catalogue page saved on disk, for offline runs.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    path: PathBuf,
    url: String,
    rules: ListingRules,
}

impl FixtureSource {
    pub fn new(path: impl Into<PathBuf>, rules: ListingRules) -> Self {
        let path = path.into();
        let url = format!("file://{}", path.display());
        Self { path, url, rules }
    }
}

#[async_trait]
impl MatchSource for FixtureSource {
    fn source_url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self, run_id: Uuid) -> Result<Snapshot, SourceError> {
        let html = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Fixture {
                path: self.path.clone(),
                source,
            })?;
        let matches = parse_match_listing(&html, &self.rules)?;
        info!(%run_id, path = %self.path.display(), found = matches.len(), "parsed fixture listing");
        Ok(Snapshot::new(self.url.clone(), matches))
    }
}
