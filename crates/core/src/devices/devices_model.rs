//! Domain models for registered point-of-sale devices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    /// Awaiting pairing completion.
    Pending,
    /// Paired and operational.
    Active,
    /// Temporarily disabled by staff; uploads are rejected.
    Suspended,
}

/// A registered point-of-sale device.
///
/// `pairing_code`/`pairing_expires_at` are present only while PENDING and are
/// cleared on completion. `encryption_key_version` is monotonically
/// increasing and changes only on re-pairing; `encryption_key_hash` holds
/// `"PENDING"` until the first key is issued and a SHA-256 hex digest after.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub tenant_id: String,
    /// Hardware fingerprint (MAC address, serial number, or unique device ID).
    pub device_identifier: String,
    pub device_name: String,
    pub location_name: Option<String>,
    pub hardware_model: Option<String>,
    pub firmware_version: Option<String>,
    pub encryption_key_hash: String,
    pub encryption_key_version: i32,
    pub pairing_code: Option<String>,
    pub pairing_expires_at: Option<DateTime<Utc>>,
    pub status: DeviceStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl Device {
    /// A pairing code is usable only while present and before its deadline.
    pub fn is_pairing_code_valid(&self, now: DateTime<Utc>) -> bool {
        self.pairing_code.is_some()
            && self.pairing_expires_at.map(|at| now < at).unwrap_or(false)
    }

    /// True once a real key has been issued (not the initial placeholder).
    pub fn has_issued_key(&self) -> bool {
        !self.encryption_key_hash.is_empty()
            && !self.encryption_key_hash.eq_ignore_ascii_case(PENDING_KEY_HASH)
    }
}

/// Placeholder hash stored between pairing initiation and completion.
pub const PENDING_KEY_HASH: &str = "PENDING";

/// One sealed device key version, persisted server-side.
#[derive(Debug, Clone)]
pub struct DeviceKeyRecord {
    pub device_id: String,
    pub tenant_id: String,
    pub key_version: i32,
    /// Master-key AEAD blob (nonce-prefixed). Never plaintext.
    pub key_ciphertext: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Returned by `initiate_pairing`; the code is short-lived.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingInitiation {
    pub device_id: String,
    pub pairing_code: String,
    pub pairing_expires_at: DateTime<Utc>,
}

/// Returned by `complete_pairing`. The base64 encryption key appears here
/// exactly once and is never persisted in plaintext.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCompletion {
    pub device_id: String,
    pub device_name: String,
    pub encryption_key: String,
    pub encryption_key_version: i32,
    pub terminal_connection_token: String,
}
