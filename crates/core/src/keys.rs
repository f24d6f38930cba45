//! Server-side key vault: device keys at rest are sealed under a master key.
//!
//! Each pairing cycle produces a new device key version. The vault encrypts
//! the raw key into a nonce-prefixed blob for the key repository and opens it
//! again for settlement decryption, so plaintext device keys never persist.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::crypto;
use crate::errors::{Error, Result};

#[derive(Debug)]
pub struct KeyVault {
    master_key: [u8; crypto::KEY_BYTES],
}

impl KeyVault {
    /// Build a vault from a base64-encoded 32-byte master key (configuration).
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|e| Error::Validation(format!("master key is not valid base64: {}", e)))?;
        let master_key: [u8; crypto::KEY_BYTES] = decoded.try_into().map_err(|_| {
            Error::Validation(format!(
                "master key must be a base64-encoded {}-byte value",
                crypto::KEY_BYTES
            ))
        })?;
        Ok(Self { master_key })
    }

    /// Seal a raw device key for persistence.
    pub fn seal_device_key(&self, raw_key: &[u8]) -> Result<Vec<u8>> {
        crypto::seal_blob(&self.master_key, raw_key)
    }

    /// Open a stored device key blob.
    pub fn open_device_key(&self, blob: &[u8]) -> Result<Vec<u8>> {
        crypto::open_blob(&self.master_key, blob)
    }
}
