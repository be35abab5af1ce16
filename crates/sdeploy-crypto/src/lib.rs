//! Hashing primitives for sdeploy.
//!
//! Provides chunked file digests (SHA-256 or BLAKE3) for release integrity
//! manifests, and a domain-separated BLAKE3 hasher for cheap fingerprints
//! over source trees.
//!
//! All crypto operations wrap established libraries — no custom cryptography.

pub mod digest;
pub mod hasher;

pub use digest::{digest_file, digest_reader, DigestError, DigestResult, FileDigest, HashAlgorithm, CHUNK_SIZE};
pub use hasher::{ContentHasher, DomainHasher};
