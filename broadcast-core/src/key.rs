//! The symmetric key shared by every participant in a broadcast group.

use aes_gcm::{Aes256Gcm, KeyInit};

/// 256-bit AES-GCM key material shared by all clients and servers in a
/// deployment. Possession of this key is the only authentication the
/// overlay performs (spec section 1, non-goals: no sender-identity
/// authorization beyond key possession).
#[derive(Clone)]
pub struct SharedKey(aes_gcm::Key<Aes256Gcm>);

impl SharedKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SharedKey(bytes.into())
    }

    /// Builds a key by SHA-256-hashing arbitrary passphrase bytes, for
    /// callers that want to configure a human-typable secret rather than
    /// raw key material. The hash is a convenience, not a KDF: callers that
    /// need a proper key-derivation function should hash themselves.
    pub fn from_passphrase(passphrase: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(passphrase);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        SharedKey(bytes.into())
    }

    pub(crate) fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(&self.0)
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}
