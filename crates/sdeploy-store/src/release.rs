//! Release identity and the small records persisted next to releases.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Time-ordered release name, e.g. `release-20260118-093012`.
///
/// Ids sort lexicographically in creation order and are always a single
/// path component.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(String);

impl ReleaseId {
    const PREFIX: &'static str = "release-";

    /// Derive the id for a release created at `at` (second granularity).
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self(at.format("release-%Y%m%d-%H%M%S").to_string())
    }

    /// Accept a name read back from disk or given on the command line.
    ///
    /// Returns `None` for anything that could escape the releases directory.
    pub fn parse(name: &str) -> Option<Self> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);
        valid.then(|| Self(name.to_string()))
    }

    /// Whether the name has the shape `create_release` produces.
    pub fn is_generated(&self) -> bool {
        self.0.starts_with(Self::PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single mutable record naming the release being served.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentReleasePointer {
    pub release: ReleaseId,
    pub updated_at_utc: DateTime<Utc>,
}

impl CurrentReleasePointer {
    pub fn now(release: ReleaseId) -> Self {
        Self {
            release,
            updated_at_utc: Utc::now(),
        }
    }
}

/// One deploy recorded in the history log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub release: ReleaseId,
    pub created_at_utc: DateTime<Utc>,
    /// Number of files in the release's manifest.
    pub files: usize,
}

/// Append-only, bounded deploy log. Oldest entry first.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeployHistory {
    entries: Vec<HistoryEntry>,
}

impl DeployHistory {
    pub fn new(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry and drop the oldest ones beyond `limit`.
    pub fn push_bounded(&mut self, entry: HistoryEntry, limit: usize) {
        self.entries.push(entry);
        if self.entries.len() > limit {
            let excess = self.entries.len() - limit;
            self.entries.drain(..excess);
        }
    }

    /// The entry `steps_back` positions before the newest one.
    pub fn back(&self, steps_back: usize) -> Option<&HistoryEntry> {
        let idx = self.entries.len().checked_sub(1)?.checked_sub(steps_back)?;
        self.entries.get(idx)
    }
}
