//! Repository traits for the offline queue and settlement audit tables.

use async_trait::async_trait;

use super::queue_model::{QueueDepth, QueueEntry, SettledTransaction, SyncStatus};
use crate::errors::Result;

#[async_trait]
pub trait QueueRepositoryTrait: Send + Sync {
    fn find_by_id(&self, entry_id: &str) -> Result<Option<QueueEntry>>;
    fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<QueueEntry>>;
    /// Insert a new entry. Fails with `DuplicateIdempotencyKey` when another
    /// writer won the unique-constraint race; callers count that as a
    /// duplicate, not an error.
    async fn insert(&self, entry: QueueEntry) -> Result<QueueEntry>;
    /// Transition to PROCESSING and increment the attempt counter.
    async fn mark_processing(&self, entry_id: &str) -> Result<QueueEntry>;
    /// Terminal success; never reverts.
    async fn mark_completed(&self, entry_id: &str) -> Result<()>;
    async fn mark_failed(&self, entry_id: &str, error: &str) -> Result<()>;
    /// Put a transiently failed entry back to QUEUED for a later attempt.
    async fn requeue(&self, entry_id: &str, error: &str) -> Result<()>;
    fn count_by_device_and_status(&self, device_id: &str, status: SyncStatus) -> Result<i64>;
}

#[async_trait]
pub trait SettledTransactionRepositoryTrait: Send + Sync {
    async fn insert(&self, settled: SettledTransaction) -> Result<()>;
    fn find_by_device_and_local_tx(
        &self,
        device_id: &str,
        local_transaction_id: &str,
    ) -> Result<Option<SettledTransaction>>;
}

/// Convenience: queue depth for the device status endpoint.
pub fn queue_depth_for_device(
    repo: &dyn QueueRepositoryTrait,
    device_id: &str,
) -> Result<QueueDepth> {
    Ok(QueueDepth {
        queued_count: repo.count_by_device_and_status(device_id, SyncStatus::Queued)?,
        processing_count: repo.count_by_device_and_status(device_id, SyncStatus::Processing)?,
        failed_count: repo.count_by_device_and_status(device_id, SyncStatus::Failed)?,
    })
}
