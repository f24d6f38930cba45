//! Models for encrypted offline transactions awaiting settlement.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Server-side sync lifecycle of a queue entry.
///
/// COMPLETED is terminal and never reverts; `sync_attempt_count` only grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

/// Settlement priority; failed-and-retried entries are elevated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPriority {
    Default,
    High,
    Critical,
}

impl SyncPriority {
    pub fn from_wire(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_uppercase()).as_deref() {
            Some("CRITICAL") => Self::Critical,
            Some("DEFAULT") => Self::Default,
            _ => Self::High,
        }
    }
}

/// One encrypted offline sale held server-side until settlement.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: String,
    pub tenant_id: String,
    pub device_id: String,
    /// Client-generated UUID; globally unique, assumed collision-free.
    pub local_transaction_id: String,
    /// Unique per tenant; the serialization point against double settlement.
    pub idempotency_key: String,
    pub encrypted_payload: Vec<u8>,
    pub encryption_iv: Vec<u8>,
    /// Device key version at encryption time. A version the server has no
    /// material for makes the entry permanently unprocessable.
    pub encryption_key_version: i32,
    pub transaction_timestamp: DateTime<Utc>,
    /// For observability; the decrypted payload is authoritative.
    pub transaction_amount: Option<Decimal>,
    pub sync_status: SyncStatus,
    pub sync_priority: SyncPriority,
    pub sync_started_at: Option<DateTime<Utc>>,
    pub sync_completed_at: Option<DateTime<Utc>>,
    pub sync_attempt_count: i32,
    pub last_sync_error: Option<String>,
    pub staff_actor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Deterministic idempotency key: retries of the same local transaction are
/// safe to resubmit without extra server state.
pub fn idempotency_key(tenant_id: &str, device_id: &str, local_transaction_id: &str) -> String {
    format!("{}:{}:{}", tenant_id, device_id, local_transaction_id)
}

/// Decrypted shape of an offline sale, validated before settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalePayload {
    pub local_transaction_id: String,
    pub total_amount: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    pub items: Vec<SaleItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItem {
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// Settlement audit link from a queue entry to its payment record.
/// Insert-once; its existence marks a transaction as already settled.
#[derive(Debug, Clone)]
pub struct SettledTransaction {
    pub id: String,
    pub tenant_id: String,
    pub device_id: String,
    pub queue_entry_id: String,
    pub local_transaction_id: String,
    pub payment_ref: String,
    pub total_amount: Decimal,
    pub offline_timestamp: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
}

/// Per-device queue depth, surfaced to the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    pub queued_count: i64,
    pub processing_count: i64,
    pub failed_count: i64,
}
