//! Repository and collaborator traits for the device domain.

use async_trait::async_trait;

use super::devices_model::{Device, DeviceKeyRecord};
use crate::errors::Result;

#[async_trait]
pub trait DeviceRepositoryTrait: Send + Sync {
    fn find_by_id(&self, device_id: &str) -> Result<Option<Device>>;
    fn find_by_tenant_and_identifier(
        &self,
        tenant_id: &str,
        device_identifier: &str,
    ) -> Result<Option<Device>>;
    /// Pairing codes are looked up only among PENDING devices; a consumed
    /// code is cleared on completion and can never match again.
    fn find_pending_by_pairing_code(&self, pairing_code: &str) -> Result<Option<Device>>;
    fn list_active_by_tenant(&self, tenant_id: &str) -> Result<Vec<Device>>;
    async fn insert(&self, device: Device) -> Result<Device>;
    async fn update(&self, device: Device) -> Result<Device>;
}

#[async_trait]
pub trait DeviceKeyRepositoryTrait: Send + Sync {
    async fn insert(&self, record: DeviceKeyRecord) -> Result<()>;
    /// Sealed key blob for a device at a specific version, if the server
    /// still holds material for it.
    fn find_ciphertext(&self, device_id: &str, key_version: i32) -> Result<Option<Vec<u8>>>;
}

/// External card-reader terminal provider. Issues short-lived connection
/// tokens scoped to one device; assumed externally owned.
#[async_trait]
pub trait TerminalTokenProvider: Send + Sync {
    async fn create_connection_token(&self, tenant_id: &str, device_id: &str) -> Result<String>;
}
