//! Authenticated encryption primitives shared by the register client and the
//! settlement worker.
//!
//! Payloads are sealed with ChaCha20-Poly1305 under a per-device 256-bit key.
//! The server persists only a SHA-256 hash of each device key plus a
//! master-key-encrypted blob per version; it never needs to re-derive a key
//! from the hash.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};

/// Device keys and the server master key are 256-bit.
pub const KEY_BYTES: usize = 32;

/// ChaCha20-Poly1305 nonce length. One fresh nonce per sealed payload.
pub const NONCE_BYTES: usize = 12;

/// Generate a random 256-bit key.
pub fn generate_key() -> [u8; KEY_BYTES] {
    let mut key = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Lowercase hex SHA-256 of a key, for server-side verification storage.
pub fn key_hash_hex(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn cipher(key: &[u8]) -> Result<ChaCha20Poly1305> {
    if key.len() != KEY_BYTES {
        return Err(Error::EncryptionKeyMismatch(format!(
            "key must be {} bytes, got {}",
            KEY_BYTES,
            key.len()
        )));
    }
    Ok(ChaCha20Poly1305::new(Key::from_slice(key)))
}

/// Seal a payload under `key` with a freshly generated nonce.
/// Returns `(nonce, ciphertext)`; the nonce is never reused.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let cipher = cipher(key)?;
    let mut nonce_bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| Error::EncryptionKeyMismatch("payload encryption failed".into()))?;
    Ok((nonce_bytes.to_vec(), ciphertext))
}

/// Open a sealed payload. Fails permanently when the key or nonce is wrong:
/// the AEAD tag does not authenticate and the plaintext cannot be recovered.
pub fn open(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_BYTES {
        return Err(Error::EncryptionKeyMismatch(format!(
            "nonce must be {} bytes, got {}",
            NONCE_BYTES,
            nonce.len()
        )));
    }
    let cipher = cipher(key)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::EncryptionKeyMismatch("payload failed to authenticate".into()))
}

/// Seal into a single nonce-prefixed blob. Used by the key vault, where the
/// nonce travels with the ciphertext in one column.
pub fn seal_blob(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let (nonce, ciphertext) = seal(key, plaintext)?;
    let mut blob = Vec::with_capacity(nonce.len() + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Open a nonce-prefixed blob produced by [`seal_blob`].
pub fn open_blob(key: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() <= NONCE_BYTES {
        return Err(Error::EncryptionKeyMismatch(
            "key blob is too short to contain a nonce".into(),
        ));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_BYTES);
    open(key, nonce, ciphertext)
}
