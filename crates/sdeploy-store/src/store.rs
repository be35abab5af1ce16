use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use sdeploy_crypto::HashAlgorithm;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::manifest::{IntegrityManifest, ManifestDiff};
use crate::record::{read_json, write_json_atomic};
use crate::release::{CurrentReleasePointer, DeployHistory, HistoryEntry, ReleaseId};
use crate::traits::ReleaseResolver;

/// Number of deploys kept in the history log.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

const RELEASE_TREE_DIR: &str = "dist";
const MANIFEST_FILE: &str = "integrity.json";
const POINTER_FILE: &str = "current-release.json";
const HISTORY_FILE: &str = "deploy-history.json";

/// On-disk layout under the store root.
///
/// ```text
/// <root>/releases/<release-id>/dist/...        immutable copy of the build
/// <root>/releases/<release-id>/integrity.json  manifest
/// <root>/state/current-release.json            pointer
/// <root>/state/deploy-history.json             bounded history
/// ```
#[derive(Clone, Debug)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn releases_dir(&self) -> PathBuf {
        self.root.join("releases")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn release_dir(&self, id: &ReleaseId) -> PathBuf {
        self.releases_dir().join(id.as_str())
    }

    /// The served tree of a release.
    pub fn release_tree(&self, id: &ReleaseId) -> PathBuf {
        self.release_dir(id).join(RELEASE_TREE_DIR)
    }

    pub fn manifest_path(&self, id: &ReleaseId) -> PathBuf {
        self.release_dir(id).join(MANIFEST_FILE)
    }

    pub fn pointer_path(&self) -> PathBuf {
        self.state_dir().join(POINTER_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir().join(HISTORY_FILE)
    }
}

/// Outcome of re-hashing a stored release against its manifest.
#[derive(Clone, Debug)]
pub struct VerifyReport {
    pub release: ReleaseId,
    pub checked: usize,
    pub diff: ManifestDiff,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.diff.is_clean()
    }

    /// Turn a dirty report into [`StoreError::IntegrityMismatch`].
    pub fn ensure_clean(self) -> StoreResult<Self> {
        if self.is_clean() {
            return Ok(self);
        }
        Err(StoreError::IntegrityMismatch {
            release: self.release,
            missing: self.diff.missing.len(),
            extra: self.diff.extra.len(),
            changed: self.diff.changed.len(),
        })
    }
}

/// Filesystem-backed store of immutable, versioned releases.
///
/// Owns the release directories, their manifests, the current-release pointer,
/// and the deploy history. Every write that readers can observe (manifest,
/// pointer, history) goes through an atomic replace, and the pointer is only
/// moved after the release it names is completely on disk.
///
/// Deploys and rollbacks issued through one `ReleaseStore` value are
/// serialized. Separate processes sharing a root are not coordinated; the last
/// pointer write wins.
pub struct ReleaseStore {
    layout: StoreLayout,
    algorithm: HashAlgorithm,
    history_limit: usize,
    deploy_lock: Mutex<()>,
}

impl std::fmt::Debug for ReleaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseStore")
            .field("root", &self.layout.root)
            .field("algorithm", &self.algorithm)
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

impl ReleaseStore {
    /// Open (or initialize) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let layout = StoreLayout::new(root);
        fs::create_dir_all(layout.releases_dir())?;
        fs::create_dir_all(layout.state_dir())?;
        Ok(Self {
            layout,
            algorithm: HashAlgorithm::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            deploy_lock: Mutex::new(()),
        })
    }

    /// Hash algorithm used for manifests of new releases.
    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.deploy_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---------------------------------------------------------------
    // Deploy
    // ---------------------------------------------------------------

    /// Copy `source_tree` into a new release and make it active.
    pub fn create_release(&self, source_tree: &Path) -> StoreResult<ReleaseId> {
        self.create_release_at(source_tree, Utc::now())
    }

    /// [`create_release`](Self::create_release) with an explicit creation time.
    ///
    /// Order of effects: release directory and manifest fully written, then
    /// the pointer replaced, then the history appended. A failed history
    /// append is logged and does not fail the deploy.
    pub fn create_release_at(
        &self,
        source_tree: &Path,
        created_at: DateTime<Utc>,
    ) -> StoreResult<ReleaseId> {
        if !source_tree.is_dir() {
            return Err(StoreError::BuildOutputMissing(source_tree.to_path_buf()));
        }

        let _guard = self.guard();
        let id = ReleaseId::from_timestamp(created_at);
        let release_dir = self.layout.release_dir(&id);

        match fs::create_dir(&release_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::ReleaseCollision(id));
            }
            Err(e) => return Err(e.into()),
        }
        info!(release = %id, source = %source_tree.display(), "creating release");

        let manifest = match self.populate(&id, source_tree) {
            Ok(manifest) => manifest,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&release_dir) {
                    warn!(release = %id, error = %cleanup, "failed to remove partial release");
                }
                return Err(e);
            }
        };

        write_json_atomic(&self.layout.pointer_path(), &CurrentReleasePointer::now(id.clone()))?;
        // The pointer already names the new release; history is best effort.
        if let Err(e) = self.append_history(HistoryEntry {
            release: id.clone(),
            created_at_utc: created_at,
            files: manifest.file_count(),
        }) {
            warn!(release = %id, error = %e, "failed to record deploy history");
        }

        info!(release = %id, files = manifest.file_count(), bytes = manifest.total_bytes(), "release active");
        Ok(id)
    }

    fn populate(&self, id: &ReleaseId, source_tree: &Path) -> StoreResult<IntegrityManifest> {
        let tree = self.layout.release_tree(id);
        copy_tree(source_tree, &tree)?;
        let manifest = IntegrityManifest::generate(&tree, self.algorithm)?;
        write_json_atomic(&self.layout.manifest_path(id), &manifest)?;
        Ok(manifest)
    }

    fn append_history(&self, entry: HistoryEntry) -> StoreResult<()> {
        let mut history = self.history()?;
        history.push_bounded(entry, self.history_limit);
        write_json_atomic(&self.layout.history_path(), &history)
    }

    // ---------------------------------------------------------------
    // Pointer
    // ---------------------------------------------------------------

    /// The raw pointer record, if one has been written.
    pub fn current_pointer(&self) -> StoreResult<Option<CurrentReleasePointer>> {
        match read_json::<CurrentReleasePointer>(&self.layout.pointer_path()) {
            Ok(pointer) => Ok(pointer),
            Err(StoreError::Serialization(reason)) => Err(StoreError::CorruptPointer(reason)),
            Err(e) => Err(e),
        }
    }

    pub fn has_active_release(&self) -> bool {
        self.layout.pointer_path().is_file()
    }

    /// Id of the active release, checked to exist on disk.
    pub fn active_release(&self) -> StoreResult<ReleaseId> {
        let pointer = self.current_pointer()?.ok_or(StoreError::NoActiveRelease)?;
        let id = ReleaseId::parse(pointer.release.as_str()).ok_or_else(|| {
            StoreError::CorruptPointer(format!("invalid release name {:?}", pointer.release.as_str()))
        })?;
        let tree = self.layout.release_tree(&id);
        if !tree.is_dir() {
            return Err(StoreError::ReleaseNotFound { release: id, path: tree });
        }
        Ok(id)
    }

    /// Resolve the pointer to the directory to serve from.
    pub fn get_active_release_path(&self) -> StoreResult<PathBuf> {
        let id = self.active_release()?;
        Ok(self.layout.release_tree(&id))
    }

    /// Move the pointer back `steps_back` deploys. History is left untouched.
    pub fn rollback(&self, steps_back: usize) -> StoreResult<ReleaseId> {
        if steps_back < 1 {
            return Err(StoreError::InvalidSteps(steps_back));
        }
        let _guard = self.guard();
        let history = self.history()?;
        let target = history.back(steps_back).ok_or_else(|| {
            StoreError::InsufficientHistory(format!(
                "{} deploy(s) recorded, cannot go back {steps_back}",
                history.len()
            ))
        })?;
        let id = ReleaseId::parse(target.release.as_str()).ok_or_else(|| {
            StoreError::InsufficientHistory(format!(
                "invalid release name in history: {:?}",
                target.release.as_str()
            ))
        })?;
        if !self.layout.release_tree(&id).is_dir() {
            return Err(StoreError::InsufficientHistory(format!(
                "target release {id} no longer exists"
            )));
        }
        write_json_atomic(&self.layout.pointer_path(), &CurrentReleasePointer::now(id.clone()))?;
        info!(release = %id, steps_back, "rollback applied");
        Ok(id)
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// The deploy history. An unreadable log is treated as empty.
    pub fn history(&self) -> StoreResult<DeployHistory> {
        match read_json::<DeployHistory>(&self.layout.history_path()) {
            Ok(history) => Ok(history.unwrap_or_default()),
            Err(StoreError::Serialization(reason)) => {
                warn!(%reason, "deploy history unreadable, starting fresh");
                Ok(DeployHistory::default())
            }
            Err(e) => Err(e),
        }
    }

    /// All release directories on disk, oldest first. Directories not named
    /// like a generated release are ignored.
    pub fn list_releases(&self) -> StoreResult<Vec<ReleaseId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.layout.releases_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_str().and_then(ReleaseId::parse);
            if let Some(id) = id.filter(ReleaseId::is_generated) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn load_manifest(&self, id: &ReleaseId) -> StoreResult<IntegrityManifest> {
        let path = self.layout.manifest_path(id);
        read_json(&path)?.ok_or_else(|| StoreError::ReleaseNotFound {
            release: id.clone(),
            path,
        })
    }

    /// Recompute the manifest of a stored release and compare it with the
    /// recorded one.
    pub fn verify_release(&self, id: &ReleaseId) -> StoreResult<VerifyReport> {
        let recorded = self.load_manifest(id)?;
        let tree = self.layout.release_tree(id);
        if !tree.is_dir() {
            return Err(StoreError::ReleaseNotFound { release: id.clone(), path: tree });
        }
        let actual = IntegrityManifest::generate(&tree, recorded.algorithm)?;
        let diff = recorded.compare(&actual);
        debug!(release = %id, clean = diff.is_clean(), "release verified");
        Ok(VerifyReport {
            release: id.clone(),
            checked: actual.file_count(),
            diff,
        })
    }
}

impl ReleaseResolver for ReleaseStore {
    fn active_release_path(&self) -> StoreResult<PathBuf> {
        self.get_active_release_path()
    }
}

/// Recursively copy regular files and directories from `src` into `dst`.
/// Symlinks are followed so the release holds real copies.
fn copy_tree(src: &Path, dst: &Path) -> StoreResult<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1).follow_links(true) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry.path().strip_prefix(src).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "walk escaped source tree")
        })?;
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
