//! Diesel-backed device and device-key repositories.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;

use tillsync_core::devices::{
    Device, DeviceKeyRecord, DeviceKeyRepositoryTrait, DeviceRepositoryTrait, DeviceStatus,
};
use tillsync_core::errors::Result;

use crate::convert::{enum_from_db, enum_to_db, parse_optional_timestamp, parse_timestamp};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{pos_device_keys, pos_devices};

use super::model::{DeviceDB, DeviceKeyDB};

fn to_domain(row: DeviceDB) -> Result<Device> {
    Ok(Device {
        id: row.id,
        tenant_id: row.tenant_id,
        device_identifier: row.device_identifier,
        device_name: row.device_name,
        location_name: row.location_name,
        hardware_model: row.hardware_model,
        firmware_version: row.firmware_version,
        encryption_key_hash: row.encryption_key_hash,
        encryption_key_version: row.encryption_key_version,
        pairing_code: row.pairing_code,
        pairing_expires_at: parse_optional_timestamp(row.pairing_expires_at.as_deref())?,
        status: enum_from_db(&row.status)?,
        last_seen_at: parse_optional_timestamp(row.last_seen_at.as_deref())?,
        last_synced_at: parse_optional_timestamp(row.last_synced_at.as_deref())?,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
        created_by: row.created_by,
        updated_by: row.updated_by,
    })
}

fn to_db(device: &Device) -> Result<DeviceDB> {
    Ok(DeviceDB {
        id: device.id.clone(),
        tenant_id: device.tenant_id.clone(),
        device_identifier: device.device_identifier.clone(),
        device_name: device.device_name.clone(),
        location_name: device.location_name.clone(),
        hardware_model: device.hardware_model.clone(),
        firmware_version: device.firmware_version.clone(),
        encryption_key_hash: device.encryption_key_hash.clone(),
        encryption_key_version: device.encryption_key_version,
        pairing_code: device.pairing_code.clone(),
        pairing_expires_at: device.pairing_expires_at.map(|t| t.to_rfc3339()),
        status: enum_to_db(&device.status)?,
        last_seen_at: device.last_seen_at.map(|t| t.to_rfc3339()),
        last_synced_at: device.last_synced_at.map(|t| t.to_rfc3339()),
        created_at: device.created_at.to_rfc3339(),
        updated_at: device.updated_at.to_rfc3339(),
        created_by: device.created_by.clone(),
        updated_by: device.updated_by.clone(),
    })
}

pub struct DeviceRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl DeviceRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl DeviceRepositoryTrait for DeviceRepository {
    fn find_by_id(&self, device_id: &str) -> Result<Option<Device>> {
        let mut conn = get_connection(&self.pool)?;
        let row = pos_devices::table
            .find(device_id)
            .first::<DeviceDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        row.map(to_domain).transpose()
    }

    fn find_by_tenant_and_identifier(
        &self,
        tenant_id: &str,
        device_identifier: &str,
    ) -> Result<Option<Device>> {
        let mut conn = get_connection(&self.pool)?;
        let row = pos_devices::table
            .filter(pos_devices::tenant_id.eq(tenant_id))
            .filter(pos_devices::device_identifier.eq(device_identifier))
            .first::<DeviceDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        row.map(to_domain).transpose()
    }

    fn find_pending_by_pairing_code(&self, pairing_code: &str) -> Result<Option<Device>> {
        let mut conn = get_connection(&self.pool)?;
        let row = pos_devices::table
            .filter(pos_devices::pairing_code.eq(pairing_code))
            .filter(pos_devices::status.eq(enum_to_db(&DeviceStatus::Pending)?))
            .first::<DeviceDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        row.map(to_domain).transpose()
    }

    fn list_active_by_tenant(&self, tenant_id: &str) -> Result<Vec<Device>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = pos_devices::table
            .filter(pos_devices::tenant_id.eq(tenant_id))
            .filter(pos_devices::status.eq(enum_to_db(&DeviceStatus::Active)?))
            .order(pos_devices::device_name.asc())
            .load::<DeviceDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_domain).collect()
    }

    async fn insert(&self, device: Device) -> Result<Device> {
        let row = to_db(&device)?;
        self.writer
            .exec(move |conn| {
                diesel::insert_into(pos_devices::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await?;
        Ok(device)
    }

    async fn update(&self, device: Device) -> Result<Device> {
        let row = to_db(&device)?;
        self.writer
            .exec(move |conn| {
                diesel::update(pos_devices::table.find(row.id.clone()))
                    .set(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await?;
        Ok(device)
    }
}

pub struct DeviceKeyRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl DeviceKeyRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl DeviceKeyRepositoryTrait for DeviceKeyRepository {
    async fn insert(&self, record: DeviceKeyRecord) -> Result<()> {
        let row = DeviceKeyDB {
            device_id: record.device_id,
            tenant_id: record.tenant_id,
            key_version: record.key_version,
            key_ciphertext: record.key_ciphertext,
            created_at: record.created_at.to_rfc3339(),
        };
        self.writer
            .exec(move |conn| {
                diesel::insert_into(pos_device_keys::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    fn find_ciphertext(&self, device_id: &str, key_version: i32) -> Result<Option<Vec<u8>>> {
        let mut conn = get_connection(&self.pool)?;
        let ciphertext = pos_device_keys::table
            .find((device_id, key_version))
            .select(pos_device_keys::key_ciphertext)
            .first::<Vec<u8>>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(ciphertext)
    }
}
