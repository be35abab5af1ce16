use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use sdeploy_store::{ReleaseId, ReleaseStore};
use tokio::process::Command;

use crate::config::ProjectConfig;
use crate::error::{DeployError, DeployResult};

/// Runs the external build command and turns its output into a release.
pub struct BuildRunner {
    root: PathBuf,
    config: ProjectConfig,
    store: Arc<ReleaseStore>,
}

impl BuildRunner {
    pub fn new(root: impl Into<PathBuf>, config: ProjectConfig, store: Arc<ReleaseStore>) -> Self {
        Self { root: root.into(), config, store }
    }

    /// Run the build command in the project root and wait for it.
    ///
    /// The environment is recomputed on every call so dotenv edits apply to
    /// the next build.
    pub async fn run_build(&self) -> DeployResult<()> {
        let (program, args) = self
            .config
            .build
            .command
            .split_first()
            .ok_or_else(|| DeployError::Config("build.command is empty".into()))?;
        let env = self.config.build_environment(&self.root)?;
        let command_line = self.config.build.command.join(" ");
        tracing::info!(command = %command_line, "running build");

        let status = Command::new(program)
            .args(args)
            .current_dir(&self.root)
            .envs(env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => DeployError::CommandNotFound(program.clone()),
                _ => DeployError::Io(e),
            })?;

        if !status.success() {
            return Err(DeployError::BuildFailed { command: command_line, code: status.code() });
        }
        Ok(())
    }

    /// Build, then snapshot the build output as the new active release.
    pub async fn build_and_release(&self) -> DeployResult<ReleaseId> {
        self.run_build().await?;
        self.release_output().await
    }

    /// Snapshot the current build output without building.
    pub async fn release_output(&self) -> DeployResult<ReleaseId> {
        let dist = self.config.dist_dir(&self.root);
        let store = Arc::clone(&self.store);
        let id = tokio::task::spawn_blocking(move || store.create_release(&dist))
            .await
            .map_err(|e| DeployError::Io(io::Error::other(e)))??;
        tracing::info!(release = %id, "release activated");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdeploy_store::StoreError;
    use std::fs;
    use std::path::Path;

    fn runner(dir: &Path, command: &[&str]) -> BuildRunner {
        let mut config = ProjectConfig::default();
        config.build.command = command.iter().map(|s| s.to_string()).collect();
        let store = ReleaseStore::open(config.state_root(dir)).unwrap();
        BuildRunner::new(dir, config, Arc::new(store))
    }

    #[tokio::test]
    async fn missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path(), &["sdeploy-no-such-build-tool"]);
        let err = r.build_and_release().await.unwrap_err();
        assert!(matches!(err, DeployError::CommandNotFound(ref p) if p == "sdeploy-no-such-build-tool"));
    }

    #[tokio::test]
    async fn empty_command_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path(), &[]);
        assert!(matches!(r.run_build().await, Err(DeployError::Config(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_build_keeps_previous_release() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path(), &["sh", "-c", "exit 3"]);
        let err = r.build_and_release().await.unwrap_err();
        assert!(matches!(err, DeployError::BuildFailed { code: Some(3), .. }));
        assert!(!r.store.has_active_release());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_build_creates_release() {
        let dir = tempfile::tempdir().unwrap();
        let script = "mkdir -p dist && printf '%s' \"$VITE_API_BASE\" > dist/index.html";
        let r = runner(dir.path(), &["sh", "-c", script]);
        let id = r.build_and_release().await.unwrap();
        assert_eq!(r.store.active_release().unwrap(), id);
        let served = fs::read_to_string(r.store.get_active_release_path().unwrap().join("index.html")).unwrap();
        assert_eq!(served, format!("/api/v1/{}", crate::config::DEV_API_NAMESPACE));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn build_without_output_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let r = runner(dir.path(), &["true"]);
        let err = r.build_and_release().await.unwrap_err();
        assert!(matches!(err, DeployError::Store(StoreError::BuildOutputMissing(_))));
    }
}
