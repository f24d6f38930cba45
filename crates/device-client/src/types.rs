//! Register-side models: pairing credentials and the local offline queue.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Key material and identity obtained from pairing. Held in the local store;
/// the key never leaves the register in plaintext.
#[derive(Debug, Clone)]
pub struct DeviceCredentials {
    pub device_id: String,
    pub device_name: String,
    pub encryption_key: Vec<u8>,
    pub encryption_key_version: i32,
    pub terminal_connection_token: String,
}

/// Request body for pairing completion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePairingRequest {
    pub pairing_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

/// Pairing completion response. The base64 key appears here exactly once.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePairingResponse {
    pub device_id: String,
    pub device_name: String,
    pub encryption_key: String,
    pub encryption_key_version: i32,
    pub terminal_connection_token: String,
}

impl DeviceCredentials {
    /// Decode the one-time key material from a pairing response. Callers
    /// persist the result with [`crate::store::LocalStore::save_credentials`].
    pub fn from_pairing(response: CompletePairingResponse) -> crate::error::Result<Self> {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;

        let key = BASE64.decode(response.encryption_key.as_bytes()).map_err(|_| {
            crate::error::DeviceClientError::Crypto("pairing key is not valid base64".into())
        })?;
        if key.len() != tillsync_core::crypto::KEY_BYTES {
            return Err(crate::error::DeviceClientError::Crypto(format!(
                "pairing key must be {} bytes, got {}",
                tillsync_core::crypto::KEY_BYTES,
                key.len()
            )));
        }
        Ok(Self {
            device_id: response.device_id,
            device_name: response.device_name,
            encryption_key: key,
            encryption_key_version: response.encryption_key_version,
            terminal_connection_token: response.terminal_connection_token,
        })
    }
}

/// Error body shape returned by the sync service.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub code: String,
    pub message: String,
}

/// A sale captured at the register, before it is sealed and queued.
#[derive(Debug, Clone)]
pub struct NewSale {
    pub total_amount: Decimal,
    pub currency: String,
    pub customer_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub items: Vec<tillsync_core::queue::SaleItem>,
    pub staff_actor: Option<String>,
}

/// Local sync lifecycle of a queued sale.
///
/// COMPLETED is terminal; COMPLETED rows exist only until the next purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSyncStatus {
    Queued,
    Syncing,
    Completed,
    Failed,
}

impl LocalSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Syncing => "SYNCING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "QUEUED" => Some(Self::Queued),
            "SYNCING" => Some(Self::Syncing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One sealed sale awaiting upload. The plaintext payload is dropped as soon
/// as the entry is sealed; only ciphertext is held at rest.
#[derive(Debug, Clone)]
pub struct LocalQueueEntry {
    pub local_transaction_id: String,
    pub encrypted_payload: Vec<u8>,
    pub encryption_iv: Vec<u8>,
    pub encryption_key_version: i32,
    pub transaction_timestamp: DateTime<Utc>,
    pub transaction_amount: Decimal,
    pub priority: String,
    pub staff_actor: Option<String>,
    pub status: LocalSyncStatus,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when the server acknowledges the entry; starts the purge clock.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Queue depth by status, for the register UI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalQueueStats {
    pub queued: i64,
    pub syncing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl LocalQueueStats {
    /// Entries still owed to the server.
    pub fn pending(&self) -> i64 {
        self.queued + self.syncing + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    fn pairing_response(key: &str) -> CompletePairingResponse {
        CompletePairingResponse {
            device_id: "dev-1".to_string(),
            device_name: "Front Counter".to_string(),
            encryption_key: key.to_string(),
            encryption_key_version: 1,
            terminal_connection_token: "token".to_string(),
        }
    }

    #[test]
    fn pairing_response_decodes_to_raw_key() {
        let encoded = BASE64.encode([7u8; 32]);
        let creds = DeviceCredentials::from_pairing(pairing_response(&encoded)).unwrap();
        assert_eq!(creds.encryption_key, vec![7u8; 32]);
        assert_eq!(creds.encryption_key_version, 1);
    }

    #[test]
    fn short_or_malformed_keys_are_rejected() {
        let short = BASE64.encode([7u8; 16]);
        assert!(DeviceCredentials::from_pairing(pairing_response(&short)).is_err());
        assert!(DeviceCredentials::from_pairing(pairing_response("not base64!")).is_err());
    }
}
