//! Chunked file digests for integrity manifests.
//!
//! Files are read in fixed-size chunks so memory use stays bounded no matter
//! how large a build artifact is. Only content bytes are hashed; timestamps
//! and permissions never influence the digest.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Read size used when streaming a file through a digest (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Digest algorithm recorded in a manifest's `algorithm` tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(DigestError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Hex digest and byte count of one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDigest {
    pub hex: String,
    pub bytes: u64,
}

/// Errors from digest operations.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type DigestResult<T> = Result<T, DigestError>;

enum Running {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Running {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finish(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Digest everything `reader` yields, `CHUNK_SIZE` bytes at a time.
pub fn digest_reader<R: Read>(algorithm: HashAlgorithm, mut reader: R) -> io::Result<FileDigest> {
    let mut running = Running::new(algorithm);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        running.update(&buf[..n]);
        bytes += n as u64;
    }
    Ok(FileDigest {
        hex: running.finish(),
        bytes,
    })
}

/// Digest the file at `path`.
pub fn digest_file(algorithm: HashAlgorithm, path: &Path) -> DigestResult<FileDigest> {
    let io_err = |source| DigestError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    digest_reader(algorithm, file).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn sha256_known_vector() {
        let d = digest_reader(HashAlgorithm::Sha256, Cursor::new(b"abc")).unwrap();
        assert_eq!(
            d.hex,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(d.bytes, 3);
    }

    #[test]
    fn blake3_matches_library() {
        let d = digest_reader(HashAlgorithm::Blake3, Cursor::new(b"abc")).unwrap();
        assert_eq!(d.hex, blake3::hash(b"abc").to_hex().to_string());
    }

    #[test]
    fn multi_chunk_input_matches_one_shot() {
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        let d = digest_reader(HashAlgorithm::Sha256, Cursor::new(&data)).unwrap();
        assert_eq!(d.hex, hex::encode(Sha256::digest(&data)));
        assert_eq!(d.bytes, data.len() as u64);
    }

    #[test]
    fn digest_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"abc").unwrap();
        let d = digest_file(HashAlgorithm::Sha256, &path).unwrap();
        assert_eq!(d.bytes, 3);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = digest_file(HashAlgorithm::Sha256, Path::new("/definitely/not/here")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here"));
    }

    #[test]
    fn algorithm_parse_and_display() {
        assert_eq!("SHA256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!(HashAlgorithm::Blake3.to_string(), "blake3");
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn algorithm_serde_tag() {
        let json = serde_json::to_string(&HashAlgorithm::Sha256).unwrap();
        assert_eq!(json, "\"sha256\"");
    }
}
