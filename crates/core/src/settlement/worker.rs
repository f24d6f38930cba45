//! Settlement worker: decrypts queued offline sales and replays them through
//! the payment-capture collaborator.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use uuid::Uuid;

use super::backoff::backoff_seconds;
use super::job::{SettlementJob, SettlementJobQueue};
use super::payment::{PaymentCaptureRequest, PaymentCaptureTrait};
use crate::activity::{ActivityLogRepositoryTrait, ActivityType, NewActivityLogEntry};
use crate::crypto;
use crate::devices::{DeviceKeyRepositoryTrait, DeviceRepositoryTrait};
use crate::errors::{Error, Result, RetryClass};
use crate::keys::KeyVault;
use crate::queue::{
    QueueEntry, QueueRepositoryTrait, SalePayload, SettledTransaction,
    SettledTransactionRepositoryTrait, SyncStatus,
};

/// Retry ceiling is configurable rather than hard-coded; beyond it a job is
/// dead-lettered instead of retried indefinitely.
#[derive(Debug, Clone)]
pub struct SettlementWorkerConfig {
    pub max_attempts: i32,
}

impl Default for SettlementWorkerConfig {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

pub struct SettlementWorker {
    jobs: Arc<dyn SettlementJobQueue>,
    queue: Arc<dyn QueueRepositoryTrait>,
    settled: Arc<dyn SettledTransactionRepositoryTrait>,
    devices: Arc<dyn DeviceRepositoryTrait>,
    device_keys: Arc<dyn DeviceKeyRepositoryTrait>,
    key_vault: Arc<KeyVault>,
    payments: Arc<dyn PaymentCaptureTrait>,
    activity_log: Arc<dyn ActivityLogRepositoryTrait>,
    config: SettlementWorkerConfig,
}

impl SettlementWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn SettlementJobQueue>,
        queue: Arc<dyn QueueRepositoryTrait>,
        settled: Arc<dyn SettledTransactionRepositoryTrait>,
        devices: Arc<dyn DeviceRepositoryTrait>,
        device_keys: Arc<dyn DeviceKeyRepositoryTrait>,
        key_vault: Arc<KeyVault>,
        payments: Arc<dyn PaymentCaptureTrait>,
        activity_log: Arc<dyn ActivityLogRepositoryTrait>,
        config: SettlementWorkerConfig,
    ) -> Self {
        Self {
            jobs,
            queue,
            settled,
            devices,
            device_keys,
            key_vault,
            payments,
            activity_log,
            config,
        }
    }

    /// Claim and process one job. Returns `false` when nothing was runnable.
    pub async fn process_next(&self) -> Result<bool> {
        let job = match self.jobs.claim_next(Utc::now()).await? {
            Some(job) => job,
            None => return Ok(false),
        };

        let entry = match self.queue.find_by_id(&job.queue_entry_id)? {
            Some(entry) => entry,
            None => {
                warn!(
                    "Queue entry {} not found for job {} (already purged?)",
                    job.queue_entry_id, job.id
                );
                self.jobs.complete(&job.id).await?;
                return Ok(true);
            }
        };

        if entry.sync_status == SyncStatus::Completed {
            // Terminal state never reverts; a duplicate job is a no-op.
            info!("Queue entry {} already completed, skipping", entry.id);
            self.jobs.complete(&job.id).await?;
            return Ok(true);
        }

        let entry = self.queue.mark_processing(&entry.id).await?;
        self.record_activity(
            &entry,
            ActivityType::SyncStarted,
            serde_json::json!({ "queueEntryId": entry.id, "attempt": entry.sync_attempt_count }),
        )
        .await;

        match self.settle(&entry).await {
            Ok(payment_ref) => {
                self.queue.mark_completed(&entry.id).await?;
                self.jobs.complete(&job.id).await?;
                if let Some(mut device) = self.devices.find_by_id(&entry.device_id)? {
                    device.last_synced_at = Some(Utc::now());
                    self.devices.update(device).await?;
                }
                info!(
                    "Settled offline transaction {} (payment_ref={})",
                    entry.local_transaction_id, payment_ref
                );
                self.record_activity(
                    &entry,
                    ActivityType::SyncCompleted,
                    serde_json::json!({ "queueEntryId": entry.id, "paymentRef": payment_ref }),
                )
                .await;
                Ok(true)
            }
            Err(err) => {
                self.handle_failure(&job, &entry, err).await?;
                Ok(true)
            }
        }
    }

    /// Drain up to `limit` runnable jobs; returns the number processed.
    pub async fn drain(&self, limit: usize) -> Result<usize> {
        let mut processed = 0;
        while processed < limit && self.process_next().await? {
            processed += 1;
        }
        Ok(processed)
    }

    async fn settle(&self, entry: &QueueEntry) -> Result<String> {
        let payload = self.decrypt_entry(entry)?;

        if payload.local_transaction_id != entry.local_transaction_id {
            return Err(Error::Validation(format!(
                "payload transaction id '{}' does not match entry '{}'",
                payload.local_transaction_id, entry.local_transaction_id
            )));
        }
        if payload.total_amount.is_sign_negative() {
            return Err(Error::Validation("total amount must not be negative".into()));
        }
        if payload.currency.trim().is_empty() {
            return Err(Error::Validation("currency is required".into()));
        }

        let mut metadata = HashMap::new();
        metadata.insert(
            "offline_tx_id".to_string(),
            payload.local_transaction_id.clone(),
        );
        metadata.insert("device_id".to_string(), entry.device_id.clone());

        let capture = self
            .payments
            .capture(PaymentCaptureRequest {
                amount: payload.total_amount,
                currency: payload.currency.clone(),
                customer_id: payload.customer_id.clone(),
                payment_method_id: payload.payment_method_id.clone(),
                metadata,
                idempotency_key: entry.idempotency_key.clone(),
            })
            .await?;

        self.settled
            .insert(SettledTransaction {
                id: Uuid::new_v4().to_string(),
                tenant_id: entry.tenant_id.clone(),
                device_id: entry.device_id.clone(),
                queue_entry_id: entry.id.clone(),
                local_transaction_id: entry.local_transaction_id.clone(),
                payment_ref: capture.payment_ref.clone(),
                total_amount: payload.total_amount,
                offline_timestamp: entry.transaction_timestamp,
                synced_at: Utc::now(),
            })
            .await?;

        Ok(capture.payment_ref)
    }

    fn decrypt_entry(&self, entry: &QueueEntry) -> Result<SalePayload> {
        let key_blob = self
            .device_keys
            .find_ciphertext(&entry.device_id, entry.encryption_key_version)?
            .ok_or_else(|| {
                Error::EncryptionKeyMismatch(format!(
                    "no key material for device {} version {}",
                    entry.device_id, entry.encryption_key_version
                ))
            })?;
        let device_key = self.key_vault.open_device_key(&key_blob)?;
        let plaintext = crypto::open(&device_key, &entry.encryption_iv, &entry.encrypted_payload)?;
        serde_json::from_slice::<SalePayload>(&plaintext)
            .map_err(|e| Error::Validation(format!("decrypted payload has invalid shape: {}", e)))
    }

    async fn handle_failure(
        &self,
        job: &SettlementJob,
        entry: &QueueEntry,
        err: Error,
    ) -> Result<()> {
        let reason = err.to_string();
        let retryable = err.retry_class() == RetryClass::Retryable
            && entry.sync_attempt_count < self.config.max_attempts;

        if retryable {
            let delay = backoff_seconds(entry.sync_attempt_count);
            warn!(
                "Settlement of entry {} failed (attempt {}), retrying in {}s: {}",
                entry.id, entry.sync_attempt_count, delay, reason
            );
            self.queue.requeue(&entry.id, &reason).await?;
            self.jobs.retry_later(&job.id, delay, &reason).await?;
        } else {
            warn!(
                "Settlement of entry {} failed permanently ({}): {}",
                entry.id,
                err.reason_code(),
                reason
            );
            self.queue.mark_failed(&entry.id, &reason).await?;
            self.jobs.mark_dead(&job.id, &reason).await?;
        }

        self.record_activity(
            entry,
            ActivityType::SyncFailed,
            serde_json::json!({
                "queueEntryId": entry.id,
                "reason": err.reason_code(),
                "willRetry": retryable,
            }),
        )
        .await;
        Ok(())
    }

    async fn record_activity(
        &self,
        entry: &QueueEntry,
        activity_type: ActivityType,
        metadata: serde_json::Value,
    ) {
        // Audit writes never gate settlement.
        if let Err(err) = self
            .activity_log
            .record(NewActivityLogEntry::new(
                entry.tenant_id.clone(),
                entry.device_id.clone(),
                activity_type,
                entry.staff_actor.clone(),
                metadata,
            ))
            .await
        {
            warn!("Failed to record activity for entry {}: {}", entry.id, err);
        }
    }
}
