//! Diesel-backed queue and settlement-audit repositories.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;

use tillsync_core::errors::{DatabaseError, Error, Result};
use tillsync_core::queue::{
    QueueEntry, QueueRepositoryTrait, SettledTransaction, SettledTransactionRepositoryTrait,
    SyncStatus,
};

use crate::convert::{
    enum_from_db, enum_to_db, parse_optional_decimal, parse_optional_timestamp, parse_timestamp,
};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::{is_unique_violation, StorageError};
use crate::schema::{pos_offline_queue, pos_settled_transactions};

use super::model::{QueueEntryDB, SettledTransactionDB};

fn to_domain(row: QueueEntryDB) -> Result<QueueEntry> {
    Ok(QueueEntry {
        id: row.id,
        tenant_id: row.tenant_id,
        device_id: row.device_id,
        local_transaction_id: row.local_transaction_id,
        idempotency_key: row.idempotency_key,
        encrypted_payload: row.encrypted_payload,
        encryption_iv: row.encryption_iv,
        encryption_key_version: row.encryption_key_version,
        transaction_timestamp: parse_timestamp(&row.transaction_timestamp)?,
        transaction_amount: parse_optional_decimal(row.transaction_amount.as_deref())?,
        sync_status: enum_from_db(&row.sync_status)?,
        sync_priority: enum_from_db(&row.sync_priority)?,
        sync_started_at: parse_optional_timestamp(row.sync_started_at.as_deref())?,
        sync_completed_at: parse_optional_timestamp(row.sync_completed_at.as_deref())?,
        sync_attempt_count: row.sync_attempt_count,
        last_sync_error: row.last_sync_error,
        staff_actor: row.staff_actor,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}

fn to_db(entry: &QueueEntry) -> Result<QueueEntryDB> {
    Ok(QueueEntryDB {
        id: entry.id.clone(),
        tenant_id: entry.tenant_id.clone(),
        device_id: entry.device_id.clone(),
        local_transaction_id: entry.local_transaction_id.clone(),
        idempotency_key: entry.idempotency_key.clone(),
        encrypted_payload: entry.encrypted_payload.clone(),
        encryption_iv: entry.encryption_iv.clone(),
        encryption_key_version: entry.encryption_key_version,
        transaction_timestamp: entry.transaction_timestamp.to_rfc3339(),
        transaction_amount: entry.transaction_amount.map(|a| a.to_string()),
        sync_status: enum_to_db(&entry.sync_status)?,
        sync_priority: enum_to_db(&entry.sync_priority)?,
        sync_started_at: entry.sync_started_at.map(|t| t.to_rfc3339()),
        sync_completed_at: entry.sync_completed_at.map(|t| t.to_rfc3339()),
        sync_attempt_count: entry.sync_attempt_count,
        last_sync_error: entry.last_sync_error.clone(),
        staff_actor: entry.staff_actor.clone(),
        created_at: entry.created_at.to_rfc3339(),
        updated_at: entry.updated_at.to_rfc3339(),
    })
}

pub struct QueueRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl QueueRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl QueueRepositoryTrait for QueueRepository {
    fn find_by_id(&self, entry_id: &str) -> Result<Option<QueueEntry>> {
        let mut conn = get_connection(&self.pool)?;
        let row = pos_offline_queue::table
            .find(entry_id)
            .first::<QueueEntryDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        row.map(to_domain).transpose()
    }

    fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<QueueEntry>> {
        let mut conn = get_connection(&self.pool)?;
        let row = pos_offline_queue::table
            .filter(pos_offline_queue::tenant_id.eq(tenant_id))
            .filter(pos_offline_queue::idempotency_key.eq(idempotency_key))
            .first::<QueueEntryDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        row.map(to_domain).transpose()
    }

    async fn insert(&self, entry: QueueEntry) -> Result<QueueEntry> {
        let row = to_db(&entry)?;
        let key = entry.idempotency_key.clone();
        self.writer
            .exec(move |conn| {
                diesel::insert_into(pos_offline_queue::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            StorageError::Domain(Error::DuplicateIdempotencyKey(key.clone()))
                        } else {
                            StorageError::from(e)
                        }
                    })?;
                Ok(())
            })
            .await?;
        Ok(entry)
    }

    async fn mark_processing(&self, entry_id: &str) -> Result<QueueEntry> {
        let id = entry_id.to_string();
        let row = self
            .writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                diesel::update(pos_offline_queue::table.find(&id))
                    .set((
                        pos_offline_queue::sync_status.eq(enum_to_db(&SyncStatus::Processing)?),
                        pos_offline_queue::sync_attempt_count
                            .eq(pos_offline_queue::sync_attempt_count + 1),
                        pos_offline_queue::sync_started_at.eq(Some(now.clone())),
                        pos_offline_queue::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;

                pos_offline_queue::table
                    .find(&id)
                    .first::<QueueEntryDB>(conn)
                    .optional()
                    .map_err(StorageError::from)?
                    .ok_or_else(|| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "Queue entry {} disappeared while marking processing",
                            id
                        )))
                    })
            })
            .await?;
        to_domain(row)
    }

    async fn mark_completed(&self, entry_id: &str) -> Result<()> {
        let id = entry_id.to_string();
        self.writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                diesel::update(pos_offline_queue::table.find(&id))
                    .set((
                        pos_offline_queue::sync_status.eq(enum_to_db(&SyncStatus::Completed)?),
                        pos_offline_queue::sync_completed_at.eq(Some(now.clone())),
                        pos_offline_queue::last_sync_error.eq::<Option<String>>(None),
                        pos_offline_queue::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn mark_failed(&self, entry_id: &str, error: &str) -> Result<()> {
        let id = entry_id.to_string();
        let error = error.to_string();
        self.writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                diesel::update(pos_offline_queue::table.find(&id))
                    .set((
                        pos_offline_queue::sync_status.eq(enum_to_db(&SyncStatus::Failed)?),
                        pos_offline_queue::last_sync_error.eq(Some(error.clone())),
                        pos_offline_queue::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn requeue(&self, entry_id: &str, error: &str) -> Result<()> {
        let id = entry_id.to_string();
        let error = error.to_string();
        self.writer
            .exec(move |conn| {
                let now = Utc::now().to_rfc3339();
                diesel::update(pos_offline_queue::table.find(&id))
                    .set((
                        pos_offline_queue::sync_status.eq(enum_to_db(&SyncStatus::Queued)?),
                        pos_offline_queue::last_sync_error.eq(Some(error.clone())),
                        pos_offline_queue::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    fn count_by_device_and_status(&self, device_id: &str, status: SyncStatus) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        let count = pos_offline_queue::table
            .filter(pos_offline_queue::device_id.eq(device_id))
            .filter(pos_offline_queue::sync_status.eq(enum_to_db(&status)?))
            .select(count_star())
            .first::<i64>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(count)
    }
}

pub struct SettledTransactionRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SettledTransactionRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl SettledTransactionRepositoryTrait for SettledTransactionRepository {
    async fn insert(&self, settled: SettledTransaction) -> Result<()> {
        let row = SettledTransactionDB {
            id: settled.id,
            tenant_id: settled.tenant_id,
            device_id: settled.device_id,
            queue_entry_id: settled.queue_entry_id,
            local_transaction_id: settled.local_transaction_id,
            payment_ref: settled.payment_ref,
            total_amount: settled.total_amount.to_string(),
            offline_timestamp: settled.offline_timestamp.to_rfc3339(),
            synced_at: settled.synced_at.to_rfc3339(),
        };
        self.writer
            .exec(move |conn| {
                diesel::insert_into(pos_settled_transactions::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    fn find_by_device_and_local_tx(
        &self,
        device_id: &str,
        local_transaction_id: &str,
    ) -> Result<Option<SettledTransaction>> {
        let mut conn = get_connection(&self.pool)?;
        let row = pos_settled_transactions::table
            .filter(pos_settled_transactions::device_id.eq(device_id))
            .filter(pos_settled_transactions::local_transaction_id.eq(local_transaction_id))
            .first::<SettledTransactionDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;

        row.map(|row| {
            Ok(SettledTransaction {
                id: row.id,
                tenant_id: row.tenant_id,
                device_id: row.device_id,
                queue_entry_id: row.queue_entry_id,
                local_transaction_id: row.local_transaction_id,
                payment_ref: row.payment_ref,
                total_amount: crate::convert::parse_decimal(&row.total_amount)?,
                offline_timestamp: parse_timestamp(&row.offline_timestamp)?,
                synced_at: parse_timestamp(&row.synced_at)?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::devices::DeviceRepository;
    use crate::test_db::setup_db;
    use tillsync_core::devices::{Device, DeviceRepositoryTrait, DeviceStatus};
    use tillsync_core::queue::{idempotency_key, SyncPriority};

    async fn seed_device(repo: &DeviceRepository, id: &str) {
        let now = Utc::now();
        repo.insert(Device {
            id: id.to_string(),
            tenant_id: "tenant-1".to_string(),
            device_identifier: format!("id-{}", id),
            device_name: format!("Register {}", id),
            location_name: None,
            hardware_model: None,
            firmware_version: None,
            encryption_key_hash: "abc".to_string(),
            encryption_key_version: 1,
            pairing_code: None,
            pairing_expires_at: None,
            status: DeviceStatus::Active,
            last_seen_at: None,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
            created_by: None,
            updated_by: None,
        })
        .await
        .unwrap();
    }

    fn entry(device_id: &str, local_tx: &str) -> QueueEntry {
        let now = Utc::now();
        QueueEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: "tenant-1".to_string(),
            device_id: device_id.to_string(),
            local_transaction_id: local_tx.to_string(),
            idempotency_key: idempotency_key("tenant-1", device_id, local_tx),
            encrypted_payload: vec![1, 2, 3],
            encryption_iv: vec![0; 12],
            encryption_key_version: 1,
            transaction_timestamp: now,
            transaction_amount: Some(dec!(19.99)),
            sync_status: SyncStatus::Queued,
            sync_priority: SyncPriority::High,
            sync_started_at: None,
            sync_completed_at: None,
            sync_attempt_count: 0,
            last_sync_error: None,
            staff_actor: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_and_round_trip_preserves_blobs_and_amount() {
        let (pool, writer) = setup_db();
        seed_device(&DeviceRepository::new(pool.clone(), writer.clone()), "dev-1").await;
        let repo = QueueRepository::new(pool, writer);

        let inserted = repo.insert(entry("dev-1", "tx-1")).await.unwrap();
        let found = repo.find_by_id(&inserted.id).unwrap().unwrap();
        assert_eq!(found.encrypted_payload, vec![1, 2, 3]);
        assert_eq!(found.encryption_iv, vec![0; 12]);
        assert_eq!(found.transaction_amount, Some(dec!(19.99)));
        assert_eq!(found.sync_status, SyncStatus::Queued);
        assert_eq!(found.sync_priority, SyncPriority::High);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_maps_to_domain_error() {
        let (pool, writer) = setup_db();
        seed_device(&DeviceRepository::new(pool.clone(), writer.clone()), "dev-1").await;
        let repo = QueueRepository::new(pool, writer);

        repo.insert(entry("dev-1", "tx-1")).await.unwrap();
        let err = repo.insert(entry("dev-1", "tx-1")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateIdempotencyKey(_)));
    }

    #[tokio::test]
    async fn lifecycle_transitions_update_status_and_attempts() {
        let (pool, writer) = setup_db();
        seed_device(&DeviceRepository::new(pool.clone(), writer.clone()), "dev-1").await;
        let repo = QueueRepository::new(pool, writer);

        let inserted = repo.insert(entry("dev-1", "tx-1")).await.unwrap();

        let processing = repo.mark_processing(&inserted.id).await.unwrap();
        assert_eq!(processing.sync_status, SyncStatus::Processing);
        assert_eq!(processing.sync_attempt_count, 1);
        assert!(processing.sync_started_at.is_some());

        repo.requeue(&inserted.id, "provider timeout").await.unwrap();
        let requeued = repo.find_by_id(&inserted.id).unwrap().unwrap();
        assert_eq!(requeued.sync_status, SyncStatus::Queued);
        assert_eq!(requeued.last_sync_error.as_deref(), Some("provider timeout"));

        let processing = repo.mark_processing(&inserted.id).await.unwrap();
        assert_eq!(processing.sync_attempt_count, 2);

        repo.mark_completed(&inserted.id).await.unwrap();
        let completed = repo.find_by_id(&inserted.id).unwrap().unwrap();
        assert_eq!(completed.sync_status, SyncStatus::Completed);
        assert!(completed.sync_completed_at.is_some());
        assert!(completed.last_sync_error.is_none());
    }

    #[tokio::test]
    async fn counts_by_device_and_status() {
        let (pool, writer) = setup_db();
        seed_device(&DeviceRepository::new(pool.clone(), writer.clone()), "dev-1").await;
        let repo = QueueRepository::new(pool, writer);

        repo.insert(entry("dev-1", "tx-1")).await.unwrap();
        let second = repo.insert(entry("dev-1", "tx-2")).await.unwrap();
        repo.mark_failed(&second.id, "bad iv").await.unwrap();

        assert_eq!(
            repo.count_by_device_and_status("dev-1", SyncStatus::Queued)
                .unwrap(),
            1
        );
        assert_eq!(
            repo.count_by_device_and_status("dev-1", SyncStatus::Failed)
                .unwrap(),
            1
        );
        assert_eq!(
            repo.count_by_device_and_status("dev-1", SyncStatus::Completed)
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn settled_audit_round_trip() {
        let (pool, writer) = setup_db();
        let repo = SettledTransactionRepository::new(pool, writer);

        repo.insert(SettledTransaction {
            id: "s-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            device_id: "dev-1".to_string(),
            queue_entry_id: "q-1".to_string(),
            local_transaction_id: "tx-1".to_string(),
            payment_ref: "pay_123".to_string(),
            total_amount: dec!(42.50),
            offline_timestamp: Utc::now(),
            synced_at: Utc::now(),
        })
        .await
        .unwrap();

        let found = repo
            .find_by_device_and_local_tx("dev-1", "tx-1")
            .unwrap()
            .unwrap();
        assert_eq!(found.payment_ref, "pay_123");
        assert_eq!(found.total_amount, dec!(42.50));
        assert!(repo
            .find_by_device_and_local_tx("dev-1", "tx-2")
            .unwrap()
            .is_none());
    }
}
