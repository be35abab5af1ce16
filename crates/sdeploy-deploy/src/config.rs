//! Project configuration (`sdeploy.toml`).

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sdeploy_crypto::HashAlgorithm;
use sdeploy_store::DEFAULT_HISTORY_LIMIT;
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};

pub const CONFIG_FILE: &str = "sdeploy.toml";

/// Namespace used when the dotenv file has no usable `API_NAMESPACE`.
pub const DEV_API_NAMESPACE: &str = "dev-local-vault-route-29af4c8e71b5";

/// Shortest `API_NAMESPACE` accepted from the dotenv file.
pub const MIN_NAMESPACE_LEN: usize = 24;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub paths: PathsConfig,
    pub build: BuildConfig,
    pub serve: ServeConfig,
    pub proxy: ProxySettings,
    pub backend: BackendConfig,
    pub watch: WatchConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub dist: PathBuf,
    pub state_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self { dist: PathBuf::from("dist"), state_root: PathBuf::from(".sdeploy") }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Variable that receives `/api/v1/<namespace>`.
    pub api_base_env: String,
    pub dotenv: PathBuf,
    /// Digest recorded in new release manifests (`sha256` or `blake3`).
    pub manifest_algorithm: String,
    /// Deploys kept in the history log.
    pub history_limit: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: vec!["npm".into(), "run".into(), "build".into()],
            env: BTreeMap::new(),
            api_base_env: "VITE_API_BASE".into(),
            dotenv: PathBuf::from(".env"),
            manifest_algorithm: HashAlgorithm::default().to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub https_port: u16,
    pub http_redirect_port: u16,
    pub bind_host: String,
    pub public_host: String,
    pub shutdown_grace_secs: u64,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            https_port: 5443,
            http_redirect_port: 5080,
            bind_host: "0.0.0.0".into(),
            public_host: "localhost".into(),
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub prefix: String,
    /// Upstream used when no backend is started and no origin is given on
    /// the command line.
    pub origin: Option<String>,
    pub streaming_suffix: String,
    pub timeout_secs: u64,
    pub chunk_size: usize,
    pub max_request_body: usize,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            prefix: "/api/".into(),
            origin: None,
            streaming_suffix: "/sync/events".into(),
            timeout_secs: 20,
            chunk_size: 16 * 1024,
            max_request_body: 16 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub command: Vec<String>,
    pub port: u16,
    pub startup_delay_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: vec!["node".into(), "server/index.js".into()],
            port: 4000,
            startup_delay_ms: 1200,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub interval_secs: u64,
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

impl WatchConfig {
    /// Poll interval, never shorter than one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3,
            dirs: ["src", "server", "public"].map(PathBuf::from).to_vec(),
            files: ["package.json", "package-lock.json", "vite.config.js", ".env"]
                .map(PathBuf::from)
                .to_vec(),
        }
    }
}

impl ProjectConfig {
    /// Load `explicit` if given, otherwise `<root>/sdeploy.toml` when present,
    /// otherwise defaults.
    pub fn load(root: &Path, explicit: Option<&Path>) -> DeployResult<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = root.join(CONFIG_FILE);
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| DeployError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
            .map_err(|e| DeployError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn manifest_algorithm(&self) -> DeployResult<HashAlgorithm> {
        self.build
            .manifest_algorithm
            .parse()
            .map_err(|e| DeployError::Config(format!("build.manifest_algorithm: {e}")))
    }

    pub fn dist_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.paths.dist)
    }

    pub fn state_root(&self, root: &Path) -> PathBuf {
        root.join(&self.paths.state_root)
    }

    pub fn certs_dir(&self, root: &Path) -> PathBuf {
        self.state_root(root).join("certs")
    }

    pub fn cert_path(&self, root: &Path) -> PathBuf {
        self.certs_dir(root).join("localhost.crt")
    }

    pub fn key_path(&self, root: &Path) -> PathBuf {
        self.certs_dir(root).join("localhost.key")
    }

    /// Extra environment for the build command: the configured table plus the
    /// API base path derived from the dotenv file.
    pub fn build_environment(&self, root: &Path) -> DeployResult<Vec<(String, String)>> {
        let dotenv = read_dotenv(&root.join(&self.build.dotenv))?;
        let mut env: Vec<(String, String)> =
            self.build.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        env.push((
            self.build.api_base_env.clone(),
            format!("/api/v1/{}", api_namespace(&dotenv)),
        ));
        Ok(env)
    }
}

/// Parse `KEY=VALUE` lines. Blank lines, `#` comments and lines without `=`
/// are skipped; a missing file is empty.
pub fn read_dotenv(path: &Path) -> DeployResult<BTreeMap<String, String>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect())
}

pub fn api_namespace(dotenv: &BTreeMap<String, String>) -> &str {
    match dotenv.get("API_NAMESPACE") {
        Some(ns) if ns.len() >= MIN_NAMESPACE_LEN => ns,
        _ => DEV_API_NAMESPACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults() {
        let c = ProjectConfig::default();
        assert_eq!(c.build.command, vec!["npm", "run", "build"]);
        assert_eq!(c.serve.https_port, 5443);
        assert_eq!(c.serve.http_redirect_port, 5080);
        assert_eq!(c.backend.port, 4000);
        assert_eq!(c.proxy.prefix, "/api/");
        assert_eq!(c.watch.interval(), Duration::from_secs(3));
        assert_eq!(c.watch.dirs.len(), 3);
        assert_eq!(c.manifest_algorithm().unwrap(), HashAlgorithm::Sha256);
        assert_eq!(c.build.history_limit, 100);
    }

    #[test]
    fn manifest_algorithm_setting() {
        let c = ProjectConfig::from_toml_str("[build]\nmanifest_algorithm = \"BLAKE3\"\n").unwrap();
        assert_eq!(c.manifest_algorithm().unwrap(), HashAlgorithm::Blake3);

        let c = ProjectConfig::from_toml_str("[build]\nmanifest_algorithm = \"md5\"\n").unwrap();
        let err = c.manifest_algorithm().unwrap_err();
        assert!(matches!(err, DeployError::Config(ref msg) if msg.contains("md5")));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let c = ProjectConfig::from_toml_str(
            r#"
            [serve]
            https_port = 8443

            [build]
            command = ["pnpm", "build"]

            [watch]
            interval_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(c.serve.https_port, 8443);
        assert_eq!(c.serve.public_host, "localhost");
        assert_eq!(c.build.command, vec!["pnpm", "build"]);
        assert_eq!(c.build.api_base_env, "VITE_API_BASE");
        assert_eq!(c.watch.interval(), Duration::from_secs(1));
    }

    #[test]
    fn load_missing_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let c = ProjectConfig::load(dir.path(), None).unwrap();
        assert_eq!(c.paths.state_root, PathBuf::from(".sdeploy"));
        assert_eq!(c.cert_path(dir.path()), dir.path().join(".sdeploy/certs/localhost.crt"));
    }

    #[test]
    fn load_explicit_missing_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProjectConfig::load(dir.path(), Some(&dir.path().join("x.toml"))).unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
    }

    #[test]
    fn load_invalid_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[serve\nhttps_port = ").unwrap();
        assert!(matches!(ProjectConfig::load(dir.path(), None), Err(DeployError::Config(_))));
    }

    #[test]
    fn dotenv_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "# comment\n\nAPI_NAMESPACE = abc\nNOEQ\nURL=http://x?a=b\n").unwrap();
        let env = read_dotenv(&path).unwrap();
        assert_eq!(env.get("API_NAMESPACE").map(String::as_str), Some("abc"));
        assert_eq!(env.get("URL").map(String::as_str), Some("http://x?a=b"));
        assert_eq!(env.len(), 2);
        assert!(read_dotenv(&dir.path().join("none")).unwrap().is_empty());
    }

    #[test]
    fn short_namespace_uses_dev_default() {
        let mut env = BTreeMap::new();
        assert_eq!(api_namespace(&env), DEV_API_NAMESPACE);
        env.insert("API_NAMESPACE".to_string(), "short".to_string());
        assert_eq!(api_namespace(&env), DEV_API_NAMESPACE);
        env.insert("API_NAMESPACE".to_string(), "x".repeat(24));
        assert_eq!(api_namespace(&env), "x".repeat(24));
    }

    #[test]
    fn build_environment_sets_api_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".env"), format!("API_NAMESPACE={}\n", "n".repeat(30))).unwrap();
        let mut c = ProjectConfig::default();
        c.build.env.insert("NODE_ENV".into(), "production".into());
        let env = c.build_environment(dir.path()).unwrap();
        assert!(env.contains(&("NODE_ENV".into(), "production".into())));
        assert!(env.contains(&("VITE_API_BASE".into(), format!("/api/v1/{}", "n".repeat(30)))));
    }
}
