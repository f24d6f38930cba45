//! Diesel-backed settlement job queue.
//!
//! `claim_next` runs on the writer, so select-then-update is atomic even with
//! several worker tasks draining the queue. A claim is a lease, not an
//! ownership transfer: a job still IN_FLIGHT past the lease window belonged
//! to a worker that died, and is handed out again.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use tillsync_core::errors::Result;
use tillsync_core::settlement::{JobStatus, NewSettlementJob, SettlementJob, SettlementJobQueue};

use crate::convert::{enum_from_db, enum_to_db, parse_timestamp};
use crate::db::{DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::settlement_jobs;

use super::model::SettlementJobDB;

fn to_domain(row: SettlementJobDB) -> Result<SettlementJob> {
    Ok(SettlementJob {
        id: row.id,
        tenant_id: row.tenant_id,
        queue_entry_id: row.queue_entry_id,
        priority: enum_from_db(&row.priority)?,
        status: enum_from_db(&row.status)?,
        attempt_count: row.attempt_count,
        next_run_at: parse_timestamp(&row.next_run_at)?,
        last_error: row.last_error,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

/// How long a claim holds a job before it is presumed orphaned by a crash.
/// Settlement of one entry is a handful of network calls; anything holding a
/// job this long is gone. Re-processing is safe under the idempotency key.
const CLAIM_LEASE_SECONDS: i64 = 300;

/// CRITICAL before HIGH before DEFAULT, then oldest first.
fn priority_rank() -> diesel::expression::SqlLiteral<diesel::sql_types::Integer> {
    diesel::dsl::sql::<diesel::sql_types::Integer>(
        "CASE priority WHEN 'CRITICAL' THEN 2 WHEN 'HIGH' THEN 1 ELSE 0 END",
    )
}

pub struct SettlementJobRepository {
    #[allow(dead_code)]
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SettlementJobRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl SettlementJobQueue for SettlementJobRepository {
    async fn enqueue(&self, job: NewSettlementJob) -> Result<String> {
        let now = Utc::now().to_rfc3339();
        let row = SettlementJobDB {
            id: Uuid::new_v4().to_string(),
            tenant_id: job.tenant_id,
            queue_entry_id: job.queue_entry_id,
            priority: enum_to_db(&job.priority)?,
            status: enum_to_db(&JobStatus::Pending)?,
            attempt_count: 0,
            next_run_at: now.clone(),
            last_error: None,
            created_at: now,
        };
        let id = row.id.clone();
        self.writer
            .exec(move |conn| {
                diesel::insert_into(settlement_jobs::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await?;
        Ok(id)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<SettlementJob>> {
        let row = self
            .writer
            .exec(move |conn| {
                // IN_FLIGHT rows are claimable too once their lease (stored
                // in next_run_at at claim time) has lapsed.
                let claimable = vec![
                    enum_to_db(&JobStatus::Pending)?,
                    enum_to_db(&JobStatus::InFlight)?,
                ];
                let candidate = settlement_jobs::table
                    .filter(settlement_jobs::status.eq_any(claimable))
                    .filter(settlement_jobs::next_run_at.le(now.to_rfc3339()))
                    .order((priority_rank().desc(), settlement_jobs::created_at.asc()))
                    .first::<SettlementJobDB>(conn)
                    .optional()
                    .map_err(StorageError::from)?;

                let Some(mut job) = candidate else {
                    return Ok(None);
                };
                job.status = enum_to_db(&JobStatus::InFlight)?;
                job.attempt_count += 1;
                job.next_run_at = (now + Duration::seconds(CLAIM_LEASE_SECONDS)).to_rfc3339();
                diesel::update(settlement_jobs::table.find(&job.id))
                    .set((
                        settlement_jobs::status.eq(&job.status),
                        settlement_jobs::attempt_count.eq(job.attempt_count),
                        settlement_jobs::next_run_at.eq(&job.next_run_at),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(Some(job))
            })
            .await?;
        row.map(to_domain).transpose()
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        let id = job_id.to_string();
        self.writer
            .exec(move |conn| {
                diesel::update(settlement_jobs::table.find(&id))
                    .set(settlement_jobs::status.eq(enum_to_db(&JobStatus::Done)?))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn retry_later(&self, job_id: &str, delay_seconds: i64, error: &str) -> Result<()> {
        let id = job_id.to_string();
        let error = error.to_string();
        self.writer
            .exec(move |conn| {
                let retry_at = (Utc::now() + Duration::seconds(delay_seconds)).to_rfc3339();
                diesel::update(settlement_jobs::table.find(&id))
                    .set((
                        settlement_jobs::status.eq(enum_to_db(&JobStatus::Pending)?),
                        settlement_jobs::next_run_at.eq(retry_at),
                        settlement_jobs::last_error.eq(Some(error.clone())),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn mark_dead(&self, job_id: &str, error: &str) -> Result<()> {
        let id = job_id.to_string();
        let error = error.to_string();
        self.writer
            .exec(move |conn| {
                diesel::update(settlement_jobs::table.find(&id))
                    .set((
                        settlement_jobs::status.eq(enum_to_db(&JobStatus::Dead)?),
                        settlement_jobs::last_error.eq(Some(error.clone())),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DeviceRepository;
    use crate::queue::QueueRepository;
    use crate::test_db::setup_db;
    use tillsync_core::devices::{Device, DeviceRepositoryTrait, DeviceStatus};
    use tillsync_core::queue::{
        idempotency_key, QueueEntry, QueueRepositoryTrait, SyncPriority, SyncStatus,
    };

    /// `settlement_jobs.queue_entry_id` references `pos_offline_queue(id)`, so
    /// each entry id a test enqueues needs a real queue row (and its device).
    async fn seed_queue_entries(pool: &Arc<DbPool>, writer: &WriteHandle, entry_ids: &[&str]) {
        let now = Utc::now();
        let devices = DeviceRepository::new(pool.clone(), writer.clone());
        devices
            .insert(Device {
                id: "dev-1".to_string(),
                tenant_id: "tenant-1".to_string(),
                device_identifier: "id-dev-1".to_string(),
                device_name: "Register dev-1".to_string(),
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
        let queue = QueueRepository::new(pool.clone(), writer.clone());
        for entry_id in entry_ids {
            queue
                .insert(QueueEntry {
                    id: entry_id.to_string(),
                    tenant_id: "tenant-1".to_string(),
                    device_id: "dev-1".to_string(),
                    local_transaction_id: entry_id.to_string(),
                    idempotency_key: idempotency_key("tenant-1", "dev-1", entry_id),
                    encrypted_payload: vec![1, 2, 3],
                    encryption_iv: vec![0; 12],
                    encryption_key_version: 1,
                    transaction_timestamp: now,
                    transaction_amount: None,
                    sync_status: SyncStatus::Queued,
                    sync_priority: SyncPriority::High,
                    sync_started_at: None,
                    sync_completed_at: None,
                    sync_attempt_count: 0,
                    last_sync_error: None,
                    staff_actor: None,
                    created_at: now,
                    updated_at: now,
                })
                .await
                .unwrap();
        }
    }

    fn new_job(entry: &str, priority: SyncPriority) -> NewSettlementJob {
        NewSettlementJob {
            tenant_id: "tenant-1".to_string(),
            queue_entry_id: entry.to_string(),
            priority,
        }
    }

    #[tokio::test]
    async fn claims_by_priority_then_age() {
        let (pool, writer) = setup_db();
        seed_queue_entries(
            &pool,
            &writer,
            &["q-default", "q-high-1", "q-high-2", "q-critical"],
        )
        .await;
        let repo = SettlementJobRepository::new(pool, writer);

        repo.enqueue(new_job("q-default", SyncPriority::Default))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        repo.enqueue(new_job("q-high-1", SyncPriority::High))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        repo.enqueue(new_job("q-high-2", SyncPriority::High))
            .await
            .unwrap();
        repo.enqueue(new_job("q-critical", SyncPriority::Critical))
            .await
            .unwrap();

        let order: Vec<String> = {
            let mut claimed = Vec::new();
            while let Some(job) = repo.claim_next(Utc::now()).await.unwrap() {
                claimed.push(job.queue_entry_id);
            }
            claimed
        };
        assert_eq!(order, ["q-critical", "q-high-1", "q-high-2", "q-default"]);
    }

    #[tokio::test]
    async fn claimed_job_is_in_flight_with_incremented_attempts() {
        let (pool, writer) = setup_db();
        seed_queue_entries(&pool, &writer, &["q-1"]).await;
        let repo = SettlementJobRepository::new(pool, writer);

        repo.enqueue(new_job("q-1", SyncPriority::High)).await.unwrap();
        let job = repo.claim_next(Utc::now()).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InFlight);
        assert_eq!(job.attempt_count, 1);

        // In-flight jobs are not claimable again.
        assert!(repo.claim_next(Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retry_later_gates_on_next_run_at() {
        let (pool, writer) = setup_db();
        seed_queue_entries(&pool, &writer, &["q-1"]).await;
        let repo = SettlementJobRepository::new(pool, writer);

        repo.enqueue(new_job("q-1", SyncPriority::High)).await.unwrap();
        let job = repo.claim_next(Utc::now()).await.unwrap().unwrap();
        repo.retry_later(&job.id, 60, "provider unavailable")
            .await
            .unwrap();

        assert!(repo.claim_next(Utc::now()).await.unwrap().is_none());
        let later = Utc::now() + Duration::seconds(120);
        let retried = repo.claim_next(later).await.unwrap().unwrap();
        assert_eq!(retried.id, job.id);
        assert_eq!(retried.attempt_count, 2);
        assert_eq!(
            retried.last_error.as_deref(),
            Some("provider unavailable")
        );
    }

    #[tokio::test]
    async fn stale_in_flight_job_is_reclaimed_after_the_lease() {
        let (pool, writer) = setup_db();
        seed_queue_entries(&pool, &writer, &["q-1"]).await;
        let repo = SettlementJobRepository::new(pool, writer);

        repo.enqueue(new_job("q-1", SyncPriority::High)).await.unwrap();
        let job = repo.claim_next(Utc::now()).await.unwrap().unwrap();
        // The worker dies here: no complete, retry_later, or mark_dead.

        // Inside the lease the job stays with its (dead) claimant.
        assert!(repo.claim_next(Utc::now()).await.unwrap().is_none());

        let past_lease = Utc::now() + Duration::seconds(CLAIM_LEASE_SECONDS + 1);
        let reclaimed = repo.claim_next(past_lease).await.unwrap().unwrap();
        assert_eq!(reclaimed.id, job.id);
        assert_eq!(reclaimed.status, JobStatus::InFlight);
        assert_eq!(reclaimed.attempt_count, 2);
    }

    #[tokio::test]
    async fn done_and_dead_jobs_are_never_claimed() {
        let (pool, writer) = setup_db();
        seed_queue_entries(&pool, &writer, &["q-done", "q-dead"]).await;
        let repo = SettlementJobRepository::new(pool, writer);

        let done_id = repo
            .enqueue(new_job("q-done", SyncPriority::High))
            .await
            .unwrap();
        let dead_id = repo
            .enqueue(new_job("q-dead", SyncPriority::High))
            .await
            .unwrap();
        let claimed_a = repo.claim_next(Utc::now()).await.unwrap().unwrap();
        let claimed_b = repo.claim_next(Utc::now()).await.unwrap().unwrap();
        assert_eq!(
            {
                let mut ids = vec![claimed_a.id.clone(), claimed_b.id.clone()];
                ids.sort();
                ids
            },
            {
                let mut ids = vec![done_id.clone(), dead_id.clone()];
                ids.sort();
                ids
            }
        );

        repo.complete(&done_id).await.unwrap();
        repo.mark_dead(&dead_id, "undecryptable payload").await.unwrap();
        let far_future = Utc::now() + Duration::days(30);
        assert!(repo.claim_next(far_future).await.unwrap().is_none());
    }
}
