//! Integrity manifests: a sorted content-hash inventory of a release tree.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use sdeploy_crypto::{digest_file, HashAlgorithm};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::StoreResult;

/// One regular file in a release tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the tree root, `/`-separated.
    pub path: String,
    /// Hex digest under the manifest's algorithm.
    pub hash: String,
    pub bytes: u64,
}

/// Per-file hash inventory of a release.
///
/// Entries are sorted by path and every regular file under the tree has
/// exactly one entry, so two manifests over identical content differ only in
/// `generated_at_utc`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityManifest {
    pub algorithm: HashAlgorithm,
    pub generated_at_utc: DateTime<Utc>,
    pub files: Vec<ManifestEntry>,
}

impl IntegrityManifest {
    /// Walk `root` and hash every regular file.
    pub fn generate(root: &Path, algorithm: HashAlgorithm) -> StoreResult<Self> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).min_depth(1) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let digest = digest_file(algorithm, entry.path())?;
            files.push(ManifestEntry {
                path: relative_posix(root, entry.path()),
                hash: digest.hex,
                bytes: digest.bytes,
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self {
            algorithm,
            generated_at_utc: Utc::now(),
            files,
        })
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.files
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.files[i])
    }

    /// Compare this (recorded) manifest with one recomputed from disk.
    pub fn compare(&self, actual: &IntegrityManifest) -> ManifestDiff {
        let recorded: BTreeMap<&str, &ManifestEntry> =
            self.files.iter().map(|e| (e.path.as_str(), e)).collect();
        let found: BTreeMap<&str, &ManifestEntry> =
            actual.files.iter().map(|e| (e.path.as_str(), e)).collect();

        let mut diff = ManifestDiff::default();
        for (path, expected) in &recorded {
            match found.get(path) {
                None => diff.missing.push((*path).to_string()),
                Some(got) if got.hash != expected.hash || got.bytes != expected.bytes => {
                    diff.changed.push((*path).to_string())
                }
                Some(_) => {}
            }
        }
        diff.extra = found
            .keys()
            .filter(|p| !recorded.contains_key(*p))
            .map(|p| (*p).to_string())
            .collect();
        diff
    }
}

/// Differences between a recorded manifest and the tree on disk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestDiff {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub changed: Vec<String>,
}

impl ManifestDiff {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.changed.is_empty()
    }
}

fn relative_posix(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
