use std::fmt;

/// Length of a [`PathDigest`] in bytes (128 bits).
pub const PATH_DIGEST_LEN: usize = 16;

/// Number of hex digits in a [`PathDigest`].
pub const PATH_DIGEST_HEX_LEN: usize = PATH_DIGEST_LEN * 2;

/// Domain-separated BLAKE3 hasher for storage fan-out paths.
///
/// The hasher carries a domain tag that is prepended to every input, and
/// the output is BLAKE3's extendable output truncated to 128 bits. Only the
/// leading hex digits are ever used to pick directories, so the digest is
/// about spreading keys evenly, not about collision resistance.
pub struct PathHasher {
    domain: &'static str,
}

impl PathHasher {
    /// Hasher used by the storage key mapper.
    pub const STORAGE: Self = Self {
        domain: "dor-path-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Digest a token with domain separation.
    pub fn digest(&self, token: &str) -> PathDigest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(token.as_bytes());
        let mut out = [0u8; PATH_DIGEST_LEN];
        hasher.finalize_xof().fill(&mut out);
        PathDigest(out)
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// A 128-bit path digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathDigest([u8; PATH_DIGEST_LEN]);

impl PathDigest {
    /// Lower-case hex, always [`PATH_DIGEST_HEX_LEN`] characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; PATH_DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Debug for PathDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathDigest({})", self.to_hex())
    }
}

impl fmt::Display for PathDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
