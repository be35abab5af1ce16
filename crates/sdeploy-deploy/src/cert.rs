//! Local TLS certificate provisioning.
//!
//! An existing certificate/key pair is always reused. Otherwise the `openssl`
//! binary is asked for a self-signed `localhost` certificate, and when that
//! is unavailable one is generated in-process.

use std::fs;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{DeployError, DeployResult};

const SUBJECT_ALT_NAMES: [&str; 2] = ["localhost", "127.0.0.1"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertSource {
    Existing,
    OpenSsl,
    Generated,
}

pub async fn ensure_certificate(cert: &Path, key: &Path) -> DeployResult<CertSource> {
    ensure_certificate_with("openssl", cert, key).await
}

/// As [`ensure_certificate`], with an explicit `openssl` program.
pub async fn ensure_certificate_with(
    openssl: &str,
    cert: &Path,
    key: &Path,
) -> DeployResult<CertSource> {
    if cert.is_file() && key.is_file() {
        return Ok(CertSource::Existing);
    }
    for path in [cert, key] {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
    }

    match run_openssl(openssl, cert, key).await {
        Ok(()) if cert.is_file() && key.is_file() => {
            tracing::info!(cert = %cert.display(), "generated certificate with openssl");
            return Ok(CertSource::OpenSsl);
        }
        Ok(()) => tracing::warn!("openssl reported success but wrote no certificate"),
        Err(e) => tracing::warn!(error = %e, "openssl unavailable, generating certificate in-process"),
    }

    generate_self_signed(cert, key)?;
    tracing::info!(cert = %cert.display(), "generated self-signed certificate");
    Ok(CertSource::Generated)
}

async fn run_openssl(openssl: &str, cert: &Path, key: &Path) -> DeployResult<()> {
    let status = Command::new(openssl)
        .args(["req", "-x509", "-newkey", "rsa:2048", "-sha256", "-nodes", "-keyout"])
        .arg(key)
        .arg("-out")
        .arg(cert)
        .args([
            "-days",
            "825",
            "-subj",
            "/CN=localhost",
            "-addext",
            "subjectAltName=DNS:localhost,IP:127.0.0.1",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DeployError::CommandNotFound(openssl.to_string()),
            _ => DeployError::Io(e),
        })?;
    if !status.success() {
        return Err(DeployError::Certificate(format!("openssl exited with {status}")));
    }
    Ok(())
}

fn generate_self_signed(cert: &Path, key: &Path) -> DeployResult<()> {
    let names: Vec<String> = SUBJECT_ALT_NAMES.iter().map(|s| s.to_string()).collect();
    let generated = rcgen::generate_simple_self_signed(names)
        .map_err(|e| DeployError::Certificate(e.to_string()))?;
    fs::write(cert, generated.cert.pem())?;
    write_private(key, generated.key_pair.serialize_pem().as_bytes())?;
    Ok(())
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    fs::write(path, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reuses_existing_pair() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("c.crt");
        let key = dir.path().join("c.key");
        fs::write(&cert, "keep-cert").unwrap();
        fs::write(&key, "keep-key").unwrap();
        let source = ensure_certificate_with("sdeploy-no-openssl", &cert, &key).await.unwrap();
        assert_eq!(source, CertSource::Existing);
        assert_eq!(fs::read_to_string(&cert).unwrap(), "keep-cert");
    }

    #[tokio::test]
    async fn falls_back_to_in_process_generator() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("certs/localhost.crt");
        let key = dir.path().join("certs/localhost.key");
        let source = ensure_certificate_with("sdeploy-no-openssl", &cert, &key).await.unwrap();
        assert_eq!(source, CertSource::Generated);
        assert!(fs::read_to_string(&cert).unwrap().starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(fs::read_to_string(&key).unwrap().contains("PRIVATE KEY"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn generated_key_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("c.crt");
        let key = dir.path().join("c.key");
        ensure_certificate_with("sdeploy-no-openssl", &cert, &key).await.unwrap();
        let mode = fs::metadata(&key).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn half_pair_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("c.crt");
        let key = dir.path().join("c.key");
        fs::write(&cert, "orphan").unwrap();
        let source = ensure_certificate_with("sdeploy-no-openssl", &cert, &key).await.unwrap();
        assert_eq!(source, CertSource::Generated);
        assert_ne!(fs::read_to_string(&cert).unwrap(), "orphan");
    }
}
