use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("build command failed ({}): {command}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    BuildFailed { command: String, code: Option<i32> },

    #[error("executable not found: {0}; check your installation and PATH")]
    CommandNotFound(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("store error: {0}")]
    Store(#[from] sdeploy_store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DeployResult<T> = Result<T, DeployError>;
