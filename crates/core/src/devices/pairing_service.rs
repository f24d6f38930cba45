//! Device pairing workflow: code issuance, key generation, lifecycle.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, Utc};
use log::{info, warn};
use rand::Rng;
use uuid::Uuid;

use super::devices_model::{
    Device, DeviceKeyRecord, DeviceStatus, PairingCompletion, PairingInitiation, PENDING_KEY_HASH,
};
use super::devices_traits::{
    DeviceKeyRepositoryTrait, DeviceRepositoryTrait, TerminalTokenProvider,
};
use crate::activity::{ActivityLogRepositoryTrait, ActivityType, NewActivityLogEntry};
use crate::crypto;
use crate::errors::{Error, Result};
use crate::keys::KeyVault;

const PAIRING_CODE_LENGTH: usize = 8;
const PAIRING_CODE_EXPIRY_MINUTES: i64 = 15;
/// No O, 0, I, 1: staff type these codes by hand.
const PAIRING_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub struct PairingService {
    devices: Arc<dyn DeviceRepositoryTrait>,
    device_keys: Arc<dyn DeviceKeyRepositoryTrait>,
    activity_log: Arc<dyn ActivityLogRepositoryTrait>,
    terminal_tokens: Arc<dyn TerminalTokenProvider>,
    key_vault: Arc<KeyVault>,
}

impl PairingService {
    pub fn new(
        devices: Arc<dyn DeviceRepositoryTrait>,
        device_keys: Arc<dyn DeviceKeyRepositoryTrait>,
        activity_log: Arc<dyn ActivityLogRepositoryTrait>,
        terminal_tokens: Arc<dyn TerminalTokenProvider>,
        key_vault: Arc<KeyVault>,
    ) -> Self {
        Self {
            devices,
            device_keys,
            activity_log,
            terminal_tokens,
            key_vault,
        }
    }

    /// Create (or refresh) a PENDING device with a short-lived pairing code.
    ///
    /// Re-initiating for an existing non-active device regenerates its code;
    /// an ACTIVE device must be suspended and re-paired through staff action.
    pub async fn initiate_pairing(
        &self,
        tenant_id: &str,
        device_identifier: &str,
        device_name: &str,
        location_name: Option<&str>,
        hardware_model: Option<&str>,
        actor: Option<&str>,
    ) -> Result<PairingInitiation> {
        let now = Utc::now();
        let pairing_code = generate_pairing_code();
        let pairing_expires_at = now + Duration::minutes(PAIRING_CODE_EXPIRY_MINUTES);

        if let Some(mut existing) = self
            .devices
            .find_by_tenant_and_identifier(tenant_id, device_identifier)?
        {
            if existing.status == DeviceStatus::Active {
                return Err(Error::DeviceAlreadyActive(existing.id));
            }
            existing.pairing_code = Some(pairing_code.clone());
            existing.pairing_expires_at = Some(pairing_expires_at);
            existing.status = DeviceStatus::Pending;
            existing.updated_by = actor.map(str::to_string);
            existing.updated_at = now;
            let existing = self.devices.update(existing).await?;
            info!(
                "Re-generated pairing code for device {} (id={})",
                device_identifier, existing.id
            );
            return Ok(PairingInitiation {
                device_id: existing.id,
                pairing_code,
                pairing_expires_at,
            });
        }

        let device = Device {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            device_identifier: device_identifier.to_string(),
            device_name: device_name.to_string(),
            location_name: location_name.map(str::to_string),
            hardware_model: hardware_model.map(str::to_string),
            firmware_version: None,
            encryption_key_hash: PENDING_KEY_HASH.to_string(),
            encryption_key_version: 1,
            pairing_code: Some(pairing_code.clone()),
            pairing_expires_at: Some(pairing_expires_at),
            status: DeviceStatus::Pending,
            last_seen_at: None,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
            created_by: actor.map(str::to_string),
            updated_by: actor.map(str::to_string),
        };
        let device = self.devices.insert(device).await?;
        info!(
            "Initiated pairing for device {} (id={})",
            device_identifier, device.id
        );

        self.activity_log
            .record(NewActivityLogEntry::new(
                tenant_id,
                device.id.clone(),
                ActivityType::PairingInitiated,
                actor.map(str::to_string),
                serde_json::json!({ "deviceName": device_name }),
            ))
            .await?;

        Ok(PairingInitiation {
            device_id: device.id,
            pairing_code,
            pairing_expires_at,
        })
    }

    /// Complete pairing with a staff-entered code.
    ///
    /// Generates a fresh symmetric key (returned exactly once, stored only as
    /// a hash plus a vault-sealed blob), bumps the key version on rotation,
    /// requests a terminal connection token, and activates the device. The
    /// register's reported firmware is recorded here too, so the one-time
    /// key response never depends on a separate follow-up call.
    pub async fn complete_pairing(
        &self,
        pairing_code: &str,
        actor: Option<&str>,
        firmware_version: Option<&str>,
    ) -> Result<PairingCompletion> {
        let mut device = self
            .devices
            .find_pending_by_pairing_code(pairing_code)?
            .ok_or_else(|| {
                warn!("Invalid pairing code presented");
                Error::PairingCodeInvalid
            })?;

        let now = Utc::now();
        if !device.is_pairing_code_valid(now) {
            warn!("Expired pairing code for device {}", device.id);
            return Err(Error::PairingExpired);
        }

        // Key version is monotonic: first pairing keeps version 1, every
        // re-pairing after a key was issued increments it.
        let next_version = if device.has_issued_key() {
            device.encryption_key_version + 1
        } else {
            device.encryption_key_version.max(1)
        };

        let raw_key = crypto::generate_key();
        let key_ciphertext = self.key_vault.seal_device_key(&raw_key)?;
        self.device_keys
            .insert(DeviceKeyRecord {
                device_id: device.id.clone(),
                tenant_id: device.tenant_id.clone(),
                key_version: next_version,
                key_ciphertext,
                created_at: now,
            })
            .await?;

        device.encryption_key_hash = crypto::key_hash_hex(&raw_key);
        device.encryption_key_version = next_version;
        if let Some(firmware) = firmware_version {
            device.firmware_version = Some(firmware.to_string());
        }
        device.status = DeviceStatus::Active;
        device.pairing_code = None;
        device.pairing_expires_at = None;
        device.last_seen_at = Some(now);
        device.updated_at = now;
        device.updated_by = actor.map(str::to_string);
        let device = self.devices.update(device).await?;

        let terminal_connection_token = self
            .terminal_tokens
            .create_connection_token(&device.tenant_id, &device.id)
            .await?;

        info!(
            "Completed pairing for device {} ({})",
            device.id, device.device_name
        );
        self.activity_log
            .record(NewActivityLogEntry::new(
                device.tenant_id.clone(),
                device.id.clone(),
                ActivityType::PairingCompleted,
                actor.map(str::to_string),
                serde_json::json!({ "encryptionKeyVersion": next_version }),
            ))
            .await?;

        Ok(PairingCompletion {
            device_id: device.id,
            device_name: device.device_name,
            encryption_key: BASE64.encode(raw_key),
            encryption_key_version: next_version,
            terminal_connection_token,
        })
    }

    /// Suspend a device; new uploads are rejected until reactivation.
    pub async fn suspend_device(
        &self,
        tenant_id: &str,
        device_id: &str,
        actor: Option<&str>,
        reason: &str,
    ) -> Result<Device> {
        if reason.trim().is_empty() {
            return Err(Error::Validation("suspension requires a reason".into()));
        }
        let mut device = self.load_tenant_device(tenant_id, device_id)?;
        device.status = DeviceStatus::Suspended;
        device.updated_by = actor.map(str::to_string);
        device.updated_at = Utc::now();
        let device = self.devices.update(device).await?;

        warn!("Device {} suspended: {}", device_id, reason);
        self.activity_log
            .record(NewActivityLogEntry::new(
                tenant_id,
                device_id,
                ActivityType::DeviceSuspended,
                actor.map(str::to_string),
                serde_json::json!({ "reason": reason }),
            ))
            .await?;
        Ok(device)
    }

    /// Reactivate a suspended device.
    pub async fn reactivate_device(
        &self,
        tenant_id: &str,
        device_id: &str,
        actor: Option<&str>,
        reason: &str,
    ) -> Result<Device> {
        if reason.trim().is_empty() {
            return Err(Error::Validation("reactivation requires a reason".into()));
        }
        let mut device = self.load_tenant_device(tenant_id, device_id)?;
        device.status = DeviceStatus::Active;
        device.updated_by = actor.map(str::to_string);
        device.updated_at = Utc::now();
        let device = self.devices.update(device).await?;

        info!("Device {} reactivated", device_id);
        self.activity_log
            .record(NewActivityLogEntry::new(
                tenant_id,
                device_id,
                ActivityType::DeviceReactivated,
                actor.map(str::to_string),
                serde_json::json!({ "reason": reason }),
            ))
            .await?;
        Ok(device)
    }

    /// Record a device check-in; logs an activity when firmware changes.
    pub async fn update_heartbeat(
        &self,
        tenant_id: &str,
        device_id: &str,
        firmware_version: Option<&str>,
    ) -> Result<()> {
        let mut device = self.load_tenant_device(tenant_id, device_id)?;
        let now = Utc::now();
        device.last_seen_at = Some(now);

        if let Some(firmware) = firmware_version {
            if device.firmware_version.as_deref() != Some(firmware) {
                let old_version = device.firmware_version.clone();
                device.firmware_version = Some(firmware.to_string());
                info!(
                    "Device {} firmware updated: {} -> {}",
                    device_id,
                    old_version.as_deref().unwrap_or("unknown"),
                    firmware
                );
                self.activity_log
                    .record(NewActivityLogEntry::new(
                        tenant_id,
                        device_id,
                        ActivityType::FirmwareUpdate,
                        None,
                        serde_json::json!({
                            "oldVersion": old_version,
                            "newVersion": firmware,
                        }),
                    ))
                    .await?;
            }
        }

        device.updated_at = now;
        self.devices.update(device).await?;
        Ok(())
    }

    /// Stamp a successful sync completion on the device row.
    pub async fn mark_sync_completed(&self, device_id: &str) -> Result<()> {
        if let Some(mut device) = self.devices.find_by_id(device_id)? {
            device.last_synced_at = Some(Utc::now());
            self.devices.update(device).await?;
        }
        Ok(())
    }

    /// Issue a fresh terminal connection token for an ACTIVE device.
    pub async fn issue_terminal_token(&self, tenant_id: &str, device_id: &str) -> Result<String> {
        let device = self.load_tenant_device(tenant_id, device_id)?;
        if device.status != DeviceStatus::Active {
            return Err(Error::DeviceNotEligible {
                device_id: device_id.to_string(),
                status: format!("{:?}", device.status),
                required: "device must be active to request a terminal token".into(),
            });
        }
        self.terminal_tokens
            .create_connection_token(tenant_id, device_id)
            .await
    }

    pub fn list_active_devices(&self, tenant_id: &str) -> Result<Vec<Device>> {
        self.devices.list_active_by_tenant(tenant_id)
    }

    fn load_tenant_device(&self, tenant_id: &str, device_id: &str) -> Result<Device> {
        let device = self
            .devices
            .find_by_id(device_id)?
            .ok_or_else(|| Error::DeviceNotFound(device_id.to_string()))?;
        if device.tenant_id != tenant_id {
            return Err(Error::DeviceNotFound(device_id.to_string()));
        }
        Ok(device)
    }
}

fn generate_pairing_code() -> String {
    let mut rng = rand::thread_rng();
    (0..PAIRING_CODE_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..PAIRING_CODE_ALPHABET.len());
            PAIRING_CODE_ALPHABET[idx] as char
        })
        .collect()
}
