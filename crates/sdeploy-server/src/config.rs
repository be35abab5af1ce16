use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the HTTPS listener and the optional companions it runs with.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub https_addr: SocketAddr,
    pub tls: TlsConfig,
    pub redirect: Option<RedirectConfig>,
    pub proxy: Option<ProxyConfig>,
    pub shutdown_grace_secs: u64,
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            https_addr: SocketAddr::from(([0, 0, 0, 0], 5443)),
            tls: TlsConfig::default(),
            redirect: None,
            proxy: None,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from(".sdeploy/certs/localhost.crt"),
            key_path: PathBuf::from(".sdeploy/certs/localhost.key"),
        }
    }
}

/// Plain-HTTP listener that sends every request to the HTTPS origin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedirectConfig {
    pub bind_addr: SocketAddr,
    /// Host name placed in the `Location` header.
    pub public_host: String,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5080)),
            public_host: "localhost".into(),
        }
    }
}

/// Forwarding rules for requests under `path_prefix`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub path_prefix: String,
    /// Upstream origin, e.g. `https://localhost:4000`.
    pub origin: String,
    /// Requests whose path ends with this are relayed as a stream.
    pub streaming_suffix: String,
    pub timeout_secs: u64,
    pub chunk_size: usize,
    pub max_request_body: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            path_prefix: "/api/".into(),
            origin: "https://localhost:4000".into(),
            streaming_suffix: "/sync/events".into(),
            timeout_secs: 20,
            chunk_size: 16 * 1024,
            max_request_body: 16 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ServerConfig::default();
        assert_eq!(c.https_addr, "0.0.0.0:5443".parse::<SocketAddr>().unwrap());
        assert_eq!(c.shutdown_grace(), Duration::from_secs(10));
        assert!(c.redirect.is_none());
        assert!(c.proxy.is_none());
    }

    #[test]
    fn proxy_defaults() {
        let p = ProxyConfig::default();
        assert_eq!(p.path_prefix, "/api/");
        assert_eq!(p.streaming_suffix, "/sync/events");
        assert_eq!(p.timeout_secs, 20);
        assert_eq!(p.chunk_size, 16384);
    }

    #[test]
    fn redirect_defaults() {
        let r = RedirectConfig::default();
        assert_eq!(r.bind_addr.port(), 5080);
        assert_eq!(r.public_host, "localhost");
    }
}
