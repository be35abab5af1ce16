use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::error::{DeployError, DeployResult};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How to launch the API backend as a child process.
#[derive(Clone, Debug)]
pub struct BackendSpec {
    pub command: Vec<String>,
    pub working_dir: PathBuf,
    pub port: u16,
    /// Public origin of the HTTPS front end, used for CORS and links.
    pub frontend_origin: String,
    /// Certificate and key to serve HTTPS with; plain HTTP when `None`.
    pub tls: Option<(PathBuf, PathBuf)>,
}

impl BackendSpec {
    /// Origin the proxy forwards to.
    pub fn origin(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        format!("{scheme}://localhost:{}", self.port)
    }

    pub fn environment(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("PORT".to_string(), self.port.to_string()),
            ("CORS_ORIGIN".to_string(), self.frontend_origin.clone()),
            ("APP_BASE_URL".to_string(), self.frontend_origin.clone()),
        ];
        match &self.tls {
            Some((cert, key)) => {
                env.push(("HTTPS_ENABLED".into(), "true".into()));
                env.push(("HTTPS_CERT_PATH".into(), cert.display().to_string()));
                env.push(("HTTPS_KEY_PATH".into(), key.display().to_string()));
                env.push(("HTTP_REDIRECT_ENABLED".into(), "false".into()));
            }
            None => env.push(("HTTPS_ENABLED".into(), "false".into())),
        }
        env
    }
}

/// A running backend. Killed when stopped or dropped.
pub struct BackendProcess {
    child: Child,
    origin: String,
}

impl BackendProcess {
    pub fn spawn(spec: &BackendSpec) -> DeployResult<Self> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| DeployError::Config("backend.command is empty".into()))?;
        tracing::info!(command = %spec.command.join(" "), port = spec.port, "starting backend");
        let child = Command::new(program)
            .args(args)
            .current_dir(&spec.working_dir)
            .envs(spec.environment())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DeployError::CommandNotFound(program.clone()),
                _ => DeployError::Backend(format!("cannot start {program}: {e}")),
            })?;
        Ok(Self { child, origin: spec.origin() })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Error if the process has already exited.
    pub fn check_running(&mut self) -> DeployResult<()> {
        match self.child.try_wait()? {
            None => Ok(()),
            Some(status) => Err(DeployError::Backend(format!("backend exited early: {status}"))),
        }
    }

    /// Kill the process and wait for it, giving up after five seconds.
    pub async fn stop(mut self) {
        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::debug!(%status, "backend already exited");
            return;
        }
        if let Err(e) = self.child.start_kill() {
            tracing::warn!(error = %e, "failed to signal backend");
        }
        match tokio::time::timeout(STOP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => tracing::info!(%status, "backend stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to reap backend"),
            Err(_) => tracing::warn!(timeout = ?STOP_TIMEOUT, "backend did not exit in time"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(command: &[&str], tls: bool) -> BackendSpec {
        BackendSpec {
            command: command.iter().map(|s| s.to_string()).collect(),
            working_dir: std::env::temp_dir(),
            port: 4000,
            frontend_origin: "https://localhost:5443".into(),
            tls: tls.then(|| (PathBuf::from("/c/localhost.crt"), PathBuf::from("/c/localhost.key"))),
        }
    }

    fn lookup<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
        env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn https_environment() {
        let s = spec(&["node", "server/index.js"], true);
        let env = s.environment();
        assert_eq!(lookup(&env, "PORT"), Some("4000"));
        assert_eq!(lookup(&env, "CORS_ORIGIN"), Some("https://localhost:5443"));
        assert_eq!(lookup(&env, "APP_BASE_URL"), Some("https://localhost:5443"));
        assert_eq!(lookup(&env, "HTTPS_ENABLED"), Some("true"));
        assert_eq!(lookup(&env, "HTTPS_CERT_PATH"), Some("/c/localhost.crt"));
        assert_eq!(lookup(&env, "HTTP_REDIRECT_ENABLED"), Some("false"));
        assert_eq!(s.origin(), "https://localhost:4000");
    }

    #[test]
    fn plain_environment() {
        let s = spec(&["node", "server/index.js"], false);
        let env = s.environment();
        assert_eq!(lookup(&env, "HTTPS_ENABLED"), Some("false"));
        assert_eq!(lookup(&env, "HTTPS_CERT_PATH"), None);
        assert_eq!(s.origin(), "http://localhost:4000");
    }

    #[tokio::test]
    async fn missing_executable() {
        let err = BackendProcess::spawn(&spec(&["sdeploy-no-such-backend"], false)).err().unwrap();
        assert!(matches!(err, DeployError::CommandNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_kills_long_running_child() {
        let mut backend = BackendProcess::spawn(&spec(&["sleep", "30"], false)).unwrap();
        backend.check_running().unwrap();
        tokio::time::timeout(Duration::from_secs(10), backend.stop()).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_is_reported() {
        let mut backend = BackendProcess::spawn(&spec(&["true"], false)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(matches!(backend.check_running(), Err(DeployError::Backend(_))));
    }
}
