//! Batch upload ingestion service.
//!
//! Accepts encrypted transactions from paired devices, deduplicates against
//! the settlement audit and the live queue, persists accepted entries, and
//! enqueues one durable settlement job per entry. Acceptance is the
//! durability boundary: once a transaction is counted as enqueued the device
//! may delete its local copy.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{Duration, Utc};
use log::{debug, info};
use uuid::Uuid;

use super::ingest_model::{
    BatchUpload, BatchUploadOutcome, DeviceQueueStatus, IncomingTransaction, RejectedTransaction,
};
use crate::activity::{ActivityLogRepositoryTrait, ActivityType, NewActivityLogEntry};
use crate::crypto;
use crate::devices::{Device, DeviceRepositoryTrait, DeviceStatus};
use crate::errors::{Error, Result};
use crate::queue::{
    idempotency_key, queue_depth_for_device, QueueEntry, QueueRepositoryTrait,
    SettledTransactionRepositoryTrait, SyncPriority, SyncStatus,
};
use crate::settlement::{NewSettlementJob, SettlementJobQueue};

/// Uploads stamped further ahead than this are rejected as clock skew.
const MAX_FUTURE_SKEW_HOURS: i64 = 24;

pub struct IngestionService {
    devices: Arc<dyn DeviceRepositoryTrait>,
    queue: Arc<dyn QueueRepositoryTrait>,
    settled: Arc<dyn SettledTransactionRepositoryTrait>,
    jobs: Arc<dyn SettlementJobQueue>,
    activity_log: Arc<dyn ActivityLogRepositoryTrait>,
}

impl IngestionService {
    pub fn new(
        devices: Arc<dyn DeviceRepositoryTrait>,
        queue: Arc<dyn QueueRepositoryTrait>,
        settled: Arc<dyn SettledTransactionRepositoryTrait>,
        jobs: Arc<dyn SettlementJobQueue>,
        activity_log: Arc<dyn ActivityLogRepositoryTrait>,
    ) -> Self {
        Self {
            devices,
            queue,
            settled,
            jobs,
            activity_log,
        }
    }

    /// Ingest a batch from a device. Per-entry outcomes are independent:
    /// duplicates and malformed entries never fail the batch.
    pub async fn upload_batch(
        &self,
        tenant_id: &str,
        device_id: &str,
        batch: BatchUpload,
    ) -> Result<BatchUploadOutcome> {
        let device = self.load_eligible_device(tenant_id, device_id)?;
        self.touch_device(device, batch.firmware_version.as_deref())
            .await?;

        let mut outcome = BatchUploadOutcome::default();
        for transaction in batch.transactions {
            let local_tx = transaction.local_transaction_id.clone();
            match self.ingest_one(tenant_id, device_id, transaction).await? {
                EntryOutcome::Enqueued => outcome.enqueued += 1,
                EntryOutcome::Duplicate => outcome.duplicates += 1,
                EntryOutcome::Rejected(reason) => {
                    debug!("Rejected transaction {} from {}: {}", local_tx, device_id, reason);
                    outcome.errors.push(RejectedTransaction {
                        local_transaction_id: local_tx,
                        reason,
                    });
                }
            }
        }

        info!(
            "Batch from device {}: {} enqueued, {} duplicates, {} rejected",
            device_id,
            outcome.enqueued,
            outcome.duplicates,
            outcome.errors.len()
        );
        Ok(outcome)
    }

    /// Queue depth and sync recency for a device, for dashboards and the
    /// device's own status poll.
    pub fn queue_status(&self, tenant_id: &str, device_id: &str) -> Result<DeviceQueueStatus> {
        let device = self.load_tenant_device(tenant_id, device_id)?;
        Ok(DeviceQueueStatus {
            device_id: device.id,
            depth: queue_depth_for_device(self.queue.as_ref(), device_id)?,
            last_synced_at: device.last_synced_at,
            last_seen_at: device.last_seen_at,
        })
    }

    async fn ingest_one(
        &self,
        tenant_id: &str,
        device_id: &str,
        transaction: IncomingTransaction,
    ) -> Result<EntryOutcome> {
        let (payload, iv) = match validate_transaction(&transaction) {
            Ok(decoded) => decoded,
            Err(reason) => return Ok(EntryOutcome::Rejected(reason)),
        };

        // Settled audit first: an entry purged from the queue after
        // completion must still dedupe on resubmission.
        if self
            .settled
            .find_by_device_and_local_tx(device_id, &transaction.local_transaction_id)?
            .is_some()
        {
            return Ok(EntryOutcome::Duplicate);
        }

        let key = idempotency_key(tenant_id, device_id, &transaction.local_transaction_id);
        if self.queue.find_by_idempotency_key(tenant_id, &key)?.is_some() {
            return Ok(EntryOutcome::Duplicate);
        }

        let now = Utc::now();
        let entry = QueueEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            device_id: device_id.to_string(),
            local_transaction_id: transaction.local_transaction_id,
            idempotency_key: key,
            encrypted_payload: payload,
            encryption_iv: iv,
            encryption_key_version: transaction.encryption_key_version,
            transaction_timestamp: transaction.transaction_timestamp,
            transaction_amount: transaction.transaction_amount,
            sync_status: SyncStatus::Queued,
            sync_priority: SyncPriority::from_wire(transaction.priority.as_deref()),
            sync_started_at: None,
            sync_completed_at: None,
            sync_attempt_count: 0,
            last_sync_error: None,
            staff_actor: transaction.staff_actor,
            created_at: now,
            updated_at: now,
        };

        let entry = match self.queue.insert(entry).await {
            Ok(entry) => entry,
            // Losing the unique-constraint race means another upload of the
            // same transaction already landed.
            Err(Error::DuplicateIdempotencyKey(_)) => return Ok(EntryOutcome::Duplicate),
            Err(err) => return Err(err),
        };

        self.jobs
            .enqueue(NewSettlementJob {
                tenant_id: tenant_id.to_string(),
                queue_entry_id: entry.id,
                priority: entry.sync_priority,
            })
            .await?;
        Ok(EntryOutcome::Enqueued)
    }

    fn load_tenant_device(&self, tenant_id: &str, device_id: &str) -> Result<Device> {
        // A device under another tenant is indistinguishable from a missing one.
        match self.devices.find_by_id(device_id)? {
            Some(device) if device.tenant_id == tenant_id => Ok(device),
            _ => Err(Error::DeviceNotFound(device_id.to_string())),
        }
    }

    fn load_eligible_device(&self, tenant_id: &str, device_id: &str) -> Result<Device> {
        let device = self.load_tenant_device(tenant_id, device_id)?;
        if device.status != DeviceStatus::Active {
            return Err(Error::DeviceNotEligible {
                device_id: device.id,
                status: format!("{:?}", device.status).to_uppercase(),
                required: "ACTIVE".to_string(),
            });
        }
        Ok(device)
    }

    async fn touch_device(&self, mut device: Device, firmware: Option<&str>) -> Result<()> {
        let firmware_changed = match firmware {
            Some(reported) => device.firmware_version.as_deref() != Some(reported),
            None => false,
        };
        if firmware_changed {
            let previous = device.firmware_version.clone();
            device.firmware_version = firmware.map(str::to_string);
            self.activity_log
                .record(NewActivityLogEntry::new(
                    device.tenant_id.clone(),
                    device.id.clone(),
                    ActivityType::FirmwareUpdate,
                    None,
                    serde_json::json!({
                        "previousVersion": previous,
                        "newVersion": firmware,
                    }),
                ))
                .await?;
        }
        device.last_seen_at = Some(Utc::now());
        device.updated_at = Utc::now();
        self.devices.update(device).await?;
        Ok(())
    }
}

enum EntryOutcome {
    Enqueued,
    Duplicate,
    Rejected(String),
}

fn validate_transaction(
    transaction: &IncomingTransaction,
) -> std::result::Result<(Vec<u8>, Vec<u8>), String> {
    if transaction.local_transaction_id.trim().is_empty() {
        return Err("missing_transaction_id".to_string());
    }
    if transaction.encryption_key_version < 1 {
        return Err("invalid_key_version".to_string());
    }
    if transaction.transaction_timestamp > Utc::now() + Duration::hours(MAX_FUTURE_SKEW_HOURS) {
        return Err("timestamp_in_future".to_string());
    }
    let payload = BASE64
        .decode(&transaction.encrypted_payload)
        .map_err(|_| "invalid_payload_encoding".to_string())?;
    if payload.is_empty() {
        return Err("invalid_payload_encoding".to_string());
    }
    let iv = BASE64
        .decode(&transaction.encryption_iv)
        .map_err(|_| "invalid_iv_encoding".to_string())?;
    if iv.len() != crypto::NONCE_BYTES {
        return Err("invalid_iv_length".to_string());
    }
    Ok((payload, iv))
}
