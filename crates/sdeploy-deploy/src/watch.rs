//! Poll-based rebuild loop.
//!
//! The loop alternates between [`WatchState::Idle`], waiting out the poll
//! interval, and [`WatchState::Deploying`], while a rebuild runs. It shares
//! nothing with request handlers: a successful rebuild reaches them only
//! through the release store's pointer.

use std::time::Duration;

use async_trait::async_trait;
use sdeploy_store::ReleaseId;
use tokio_util::sync::CancellationToken;

use crate::build::BuildRunner;
use crate::error::DeployResult;
use crate::fingerprint::WatchSet;

/// Something that can produce and activate a new release.
#[async_trait]
pub trait Rebuilder: Send + Sync {
    async fn rebuild(&self) -> DeployResult<ReleaseId>;
}

#[async_trait]
impl Rebuilder for BuildRunner {
    async fn rebuild(&self) -> DeployResult<ReleaseId> {
        self.build_and_release().await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Deploying,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    Deployed(ReleaseId),
    Failed,
}

pub struct WatchLoop<R> {
    watch: WatchSet,
    rebuilder: R,
    interval: Duration,
    baseline: String,
    state: WatchState,
}

impl<R: Rebuilder> WatchLoop<R> {
    /// Record the current fingerprint as the baseline.
    pub fn new(watch: WatchSet, rebuilder: R, interval: Duration) -> Self {
        let baseline = watch.fingerprint();
        Self { watch, rebuilder, interval, baseline, state: WatchState::Idle }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn baseline(&self) -> &str {
        &self.baseline
    }

    /// Compare fingerprints once and rebuild if they differ.
    ///
    /// The baseline only advances after a successful rebuild, so a failed
    /// one is retried on the next poll.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let watch = self.watch.clone();
        let current = match tokio::task::spawn_blocking(move || watch.fingerprint()).await {
            Ok(current) => current,
            Err(e) => {
                tracing::error!(error = %e, "fingerprint task failed");
                return PollOutcome::Failed;
            }
        };
        if current == self.baseline {
            return PollOutcome::Unchanged;
        }

        tracing::info!("changes detected, rebuilding");
        self.state = WatchState::Deploying;
        let result = self.rebuilder.rebuild().await;
        self.state = WatchState::Idle;

        match result {
            Ok(id) => {
                tracing::info!(release = %id, "update applied");
                self.baseline = current;
                PollOutcome::Deployed(id)
            }
            Err(e) => {
                tracing::error!(error = %e, "update failed, keeping previous release active");
                PollOutcome::Failed
            }
        }
    }

    /// Poll until `shutdown` fires. An in-flight build is abandoned on
    /// shutdown.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(interval = ?self.interval, "watch mode enabled");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.poll_once() => {}
            }
        }
        tracing::debug!("watch loop stopped");
    }
}
