/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g., `"sdeploy-fingerprint-v1"`) that is
/// prepended to every hash computation, so a fingerprint can never collide
/// with a hash computed for another purpose over the same bytes.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for watched-source fingerprints.
    pub const FINGERPRINT: Self = Self {
        domain: "sdeploy-fingerprint-v1",
    };

    /// Start an incremental hash seeded with this hasher's domain.
    pub fn start(&self) -> DomainHasher {
        let mut inner = blake3::Hasher::new();
        inner.update(self.domain.as_bytes());
        inner.update(b":");
        DomainHasher { inner }
    }
}

/// Incremental hasher returned by [`ContentHasher::start`].
pub struct DomainHasher {
    inner: blake3::Hasher,
}

impl DomainHasher {
    /// Feed one length-prefixed field.
    ///
    /// Fields hashed this way cannot run into each other: `("ab", "c")` and
    /// `("a", "bc")` produce different digests.
    pub fn update_field(&mut self, field: &[u8]) -> &mut Self {
        self.inner.update(&(field.len() as u64).to_le_bytes());
        self.inner.update(field);
        self
    }

    pub fn finalize_hex(&self) -> String {
        hex::encode(self.inner.finalize().as_bytes())
    }
}
