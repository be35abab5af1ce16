//! Deploy orchestration for sdeploy: project configuration, the external
//! build step, the rebuild watch loop, local certificates, and the optional
//! backend process.

pub mod backend;
pub mod build;
pub mod cert;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod watch;

pub use backend::{BackendProcess, BackendSpec};
pub use build::BuildRunner;
pub use cert::{ensure_certificate, CertSource};
pub use config::ProjectConfig;
pub use error::{DeployError, DeployResult};
pub use fingerprint::WatchSet;
pub use watch::{PollOutcome, Rebuilder, WatchLoop, WatchState};
