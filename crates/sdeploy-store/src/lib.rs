//! Versioned release store for sdeploy.
//!
//! A release is an immutable copy of a static build output tree, identified by
//! a time-ordered name and accompanied by an integrity manifest. One small
//! pointer record names the release currently being served; a bounded history
//! log records every deploy so the pointer can be moved back.
//!
//! # Design Rules
//!
//! 1. Releases are never modified after `create_release` returns.
//! 2. Write-then-link: release tree and manifest first, pointer last.
//! 3. Pointer and history records are replaced atomically (temp file + rename).
//! 4. Rollback only moves the pointer; history is append-only.
//! 5. Readers resolve the pointer per use through [`ReleaseResolver`] and never
//!    write it.

pub mod error;
pub mod manifest;
mod record;
pub mod release;
pub mod store;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use manifest::{IntegrityManifest, ManifestDiff, ManifestEntry};
pub use release::{CurrentReleasePointer, DeployHistory, HistoryEntry, ReleaseId};
pub use sdeploy_crypto::HashAlgorithm;
pub use store::{ReleaseStore, StoreLayout, VerifyReport, DEFAULT_HISTORY_LIMIT};
pub use traits::ReleaseResolver;
