//! Wire-facing shapes for batch upload and queue status.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::queue::QueueDepth;

/// One encrypted transaction as uploaded by a device. Payload and IV arrive
/// base64-encoded; the server never sees plaintext at ingestion time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingTransaction {
    pub local_transaction_id: String,
    pub encrypted_payload: String,
    pub encryption_iv: String,
    pub encryption_key_version: i32,
    pub transaction_timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staff_actor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpload {
    pub transactions: Vec<IncomingTransaction>,
    /// Reported with each upload; a change is recorded as device activity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

/// An entry the batch accepted nothing for, with a stable machine-readable
/// reason. The rest of the batch is unaffected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedTransaction {
    pub local_transaction_id: String,
    pub reason: String,
}

/// Per-batch accounting. `enqueued + duplicates + errors.len()` always equals
/// the number of uploaded transactions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUploadOutcome {
    pub enqueued: usize,
    pub duplicates: usize,
    #[serde(default)]
    pub errors: Vec<RejectedTransaction>,
}

/// Snapshot for the device status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceQueueStatus {
    pub device_id: String,
    #[serde(flatten)]
    pub depth: QueueDepth,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}
