//! Database models for queued and settled offline transactions.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::pos_offline_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct QueueEntryDB {
    pub id: String,
    pub tenant_id: String,
    pub device_id: String,
    pub local_transaction_id: String,
    pub idempotency_key: String,
    pub encrypted_payload: Vec<u8>,
    pub encryption_iv: Vec<u8>,
    pub encryption_key_version: i32,
    pub transaction_timestamp: String,
    pub transaction_amount: Option<String>,
    pub sync_status: String,
    pub sync_priority: String,
    pub sync_started_at: Option<String>,
    pub sync_completed_at: Option<String>,
    pub sync_attempt_count: i32,
    pub last_sync_error: Option<String>,
    pub staff_actor: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::pos_settled_transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SettledTransactionDB {
    pub id: String,
    pub tenant_id: String,
    pub device_id: String,
    pub queue_entry_id: String,
    pub local_transaction_id: String,
    pub payment_ref: String,
    pub total_amount: String,
    pub offline_timestamp: String,
    pub synced_at: String,
}
