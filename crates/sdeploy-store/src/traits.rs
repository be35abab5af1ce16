use std::path::PathBuf;

use crate::error::StoreResult;

/// Read-only view of the current-release pointer.
///
/// Request handlers resolve the active release through this trait on every
/// request and never write the pointer themselves. Implementations must be
/// thread-safe and must never return a directory whose release is still
/// being written.
pub trait ReleaseResolver: Send + Sync {
    /// Directory holding the served files of the active release.
    fn active_release_path(&self) -> StoreResult<PathBuf>;
}
