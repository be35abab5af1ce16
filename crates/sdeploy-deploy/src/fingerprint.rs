use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sdeploy_crypto::{ContentHasher, DomainHasher};
use walkdir::WalkDir;

/// Source inputs whose paths and modification times decide whether a
/// rebuild is due.
#[derive(Clone, Debug)]
pub struct WatchSet {
    root: PathBuf,
    dirs: Vec<PathBuf>,
    files: Vec<PathBuf>,
}

impl WatchSet {
    pub fn new(root: impl Into<PathBuf>, dirs: Vec<PathBuf>, files: Vec<PathBuf>) -> Self {
        Self { root: root.into(), dirs, files }
    }

    /// Hash of every watched regular file's relative path and mtime.
    ///
    /// Directories are walked in name order; missing inputs are skipped, so
    /// creating or deleting one changes the result.
    pub fn fingerprint(&self) -> String {
        let mut hasher = ContentHasher::FINGERPRINT.start();
        for dir in &self.dirs {
            let walk = WalkDir::new(self.root.join(dir)).sort_by_file_name();
            for entry in walk.into_iter().filter_map(Result::ok) {
                if entry.file_type().is_file() {
                    self.absorb(&mut hasher, entry.path());
                }
            }
        }
        for file in &self.files {
            let path = self.root.join(file);
            if path.is_file() {
                self.absorb(&mut hasher, &path);
            }
        }
        hasher.finalize_hex()
    }

    fn absorb(&self, hasher: &mut DomainHasher, path: &Path) {
        let Ok(meta) = path.metadata() else { return };
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        hasher.update_field(rel.as_bytes());
        hasher.update_field(&mtime_ns.to_le_bytes());
    }
}
