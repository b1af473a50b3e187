//! Core domain model for matchwatch: match records, snapshots and the new-match diff.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "matchwatch-core";

/// One listed fixture. Identity is the ordered `(home, away)` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MatchRecord {
    pub home: String,
    pub away: String,
}

impl MatchRecord {
    pub fn new(home: impl Into<String>, away: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            away: away.into(),
        }
    }
}

impl fmt::Display for MatchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs {}", self.home, self.away)
    }
}

/// Everything one fetch observed at the source, in page order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub source_url: String,
    pub matches: Vec<MatchRecord>,
}

impl Snapshot {
    pub fn new(source_url: impl Into<String>, matches: Vec<MatchRecord>) -> Self {
        Self {
            source_url: source_url.into(),
            matches,
        }
    }
}

/// Records of `current` absent from `stored`, in first-seen order.
///
/// Repeats inside `current` collapse onto their first occurrence, so every
/// returned record is distinct.
pub fn new_matches(current: &[MatchRecord], stored: &BTreeSet<MatchRecord>) -> Vec<MatchRecord> {
    let mut seen: HashSet<&MatchRecord> = HashSet::with_capacity(current.len());
    current
        .iter()
        .filter(|record| !stored.contains(*record) && seen.insert(*record))
        .cloned()
        .collect()
}
