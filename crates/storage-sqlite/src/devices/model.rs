//! Database models for the device tables.

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
#[diesel(table_name = crate::schema::pos_devices)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DeviceDB {
    pub id: String,
    pub tenant_id: String,
    pub device_identifier: String,
    pub device_name: String,
    pub location_name: Option<String>,
    pub hardware_model: Option<String>,
    pub firmware_version: Option<String>,
    pub encryption_key_hash: String,
    pub encryption_key_version: i32,
    pub pairing_code: Option<String>,
    pub pairing_expires_at: Option<String>,
    pub status: String,
    pub last_seen_at: Option<String>,
    pub last_synced_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
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
#[diesel(primary_key(device_id, key_version))]
#[diesel(table_name = crate::schema::pos_device_keys)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DeviceKeyDB {
    pub device_id: String,
    pub tenant_id: String,
    pub key_version: i32,
    pub key_ciphertext: Vec<u8>,
    pub created_at: String,
}
