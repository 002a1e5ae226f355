#![forbid(unsafe_code)]

use sha1::{Digest as _, Sha1};

use super::{Digest, DIGEST_LEN};

/// Incremental content digest.
pub trait Checksum {
    /// Clears any bytes fed so far.
    fn reset(&mut self);
    /// Feeds more bytes.
    fn update(&mut self, bytes: &[u8]);
    /// Returns the digest of everything fed since the last reset.
    fn finalize(&self) -> Digest;
}

/// SHA-1 backed [`Checksum`].
#[derive(Clone, Default)]
pub struct Sha1Digest {
    inner: Sha1,
}

impl Checksum for Sha1Digest {
    fn reset(&mut self) {
        self.inner = Sha1::new();
    }

    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> Digest {
        let out = self.inner.clone().finalize();
        let mut raw = [0u8; DIGEST_LEN];
        raw.copy_from_slice(&out);
        Digest(raw)
    }
}

/// Digest of raw key bytes, used as the key index score.
pub fn key_digest(key: &[u8]) -> Digest {
    let mut hasher = Sha1Digest::default();
    hasher.update(key);
    hasher.finalize()
}
