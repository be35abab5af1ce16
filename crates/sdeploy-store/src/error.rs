use std::path::PathBuf;

use sdeploy_crypto::DigestError;

use crate::release::ReleaseId;

/// Errors from release store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The build output tree handed to `create_release` does not exist.
    #[error("build output missing: {}", .0.display())]
    BuildOutputMissing(PathBuf),

    /// A release directory with this id already exists.
    #[error("release already exists: {0}")]
    ReleaseCollision(ReleaseId),

    /// No current-release pointer has ever been written.
    #[error("no active release; run a build first")]
    NoActiveRelease,

    /// A release referenced by the pointer or by name is missing on disk.
    #[error("release {release} not found at {}", .path.display())]
    ReleaseNotFound { release: ReleaseId, path: PathBuf },

    /// The pointer record exists but cannot be interpreted.
    #[error("corrupt current-release pointer: {0}")]
    CorruptPointer(String),

    /// Rollback target is outside the deploy history or no longer on disk.
    #[error("insufficient history for rollback: {0}")]
    InsufficientHistory(String),

    /// Rollback was asked to move zero steps.
    #[error("rollback steps must be >= 1 (got {0})")]
    InvalidSteps(usize),

    /// A stored release no longer matches its integrity manifest.
    #[error("release {release} failed verification: {missing} missing, {extra} extra, {changed} changed")]
    IntegrityMismatch {
        release: ReleaseId,
        missing: usize,
        extra: usize,
        changed: usize,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Digest(#[from] DigestError),

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True for precondition failures a one-shot command should report and
    /// exit non-zero on, as opposed to unexpected I/O faults.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::BuildOutputMissing(_)
                | Self::NoActiveRelease
                | Self::ReleaseNotFound { .. }
                | Self::CorruptPointer(_)
                | Self::InsufficientHistory(_)
                | Self::InvalidSteps(_)
        )
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
