//! In-memory repository implementations for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::activity::{ActivityLogEntry, ActivityLogRepositoryTrait, NewActivityLogEntry};
use crate::devices::{Device, DeviceKeyRecord, DeviceKeyRepositoryTrait, DeviceRepositoryTrait,
    TerminalTokenProvider};
use crate::errors::{DatabaseError, Error, Result};
use crate::queue::{
    QueueEntry, QueueRepositoryTrait, SettledTransaction, SettledTransactionRepositoryTrait,
    SyncStatus,
};
use crate::settlement::{
    JobStatus, NewSettlementJob, PaymentCaptureRequest, PaymentCaptureResult, PaymentCaptureTrait,
    SettlementJob, SettlementJobQueue,
};

#[derive(Default)]
pub struct InMemoryDeviceRepository {
    pub devices: Mutex<HashMap<String, Device>>,
}

impl InMemoryDeviceRepository {
    pub fn with_device(device: Device) -> Self {
        let repo = Self::default();
        repo.devices
            .lock()
            .unwrap()
            .insert(device.id.clone(), device);
        repo
    }

    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.devices.lock().unwrap().get(device_id).cloned()
    }
}

#[async_trait]
impl DeviceRepositoryTrait for InMemoryDeviceRepository {
    fn find_by_id(&self, device_id: &str) -> Result<Option<Device>> {
        Ok(self.devices.lock().unwrap().get(device_id).cloned())
    }

    fn find_by_tenant_and_identifier(
        &self,
        tenant_id: &str,
        device_identifier: &str,
    ) -> Result<Option<Device>> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .values()
            .find(|d| d.tenant_id == tenant_id && d.device_identifier == device_identifier)
            .cloned())
    }

    fn find_pending_by_pairing_code(&self, pairing_code: &str) -> Result<Option<Device>> {
        Ok(self
            .devices
            .lock()
            .unwrap()
            .values()
            .find(|d| d.pairing_code.as_deref() == Some(pairing_code))
            .cloned())
    }

    fn list_active_by_tenant(&self, tenant_id: &str) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = self
            .devices
            .lock()
            .unwrap()
            .values()
            .filter(|d| {
                d.tenant_id == tenant_id && d.status == crate::devices::DeviceStatus::Active
            })
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.device_name.cmp(&b.device_name));
        Ok(devices)
    }

    async fn insert(&self, device: Device) -> Result<Device> {
        self.devices
            .lock()
            .unwrap()
            .insert(device.id.clone(), device.clone());
        Ok(device)
    }

    async fn update(&self, device: Device) -> Result<Device> {
        let mut devices = self.devices.lock().unwrap();
        if !devices.contains_key(&device.id) {
            return Err(DatabaseError::QueryFailed(format!(
                "device {} not found",
                device.id
            ))
            .into());
        }
        devices.insert(device.id.clone(), device.clone());
        Ok(device)
    }
}

#[derive(Default)]
pub struct InMemoryDeviceKeyRepository {
    pub keys: Mutex<HashMap<(String, i32), Vec<u8>>>,
}

impl InMemoryDeviceKeyRepository {
    pub fn with_key(device_id: &str, version: i32, ciphertext: Vec<u8>) -> Self {
        let repo = Self::default();
        repo.keys
            .lock()
            .unwrap()
            .insert((device_id.to_string(), version), ciphertext);
        repo
    }
}

#[async_trait]
impl DeviceKeyRepositoryTrait for InMemoryDeviceKeyRepository {
    async fn insert(&self, record: DeviceKeyRecord) -> Result<()> {
        self.keys
            .lock()
            .unwrap()
            .insert((record.device_id, record.key_version), record.key_ciphertext);
        Ok(())
    }

    fn find_ciphertext(&self, device_id: &str, key_version: i32) -> Result<Option<Vec<u8>>> {
        Ok(self
            .keys
            .lock()
            .unwrap()
            .get(&(device_id.to_string(), key_version))
            .cloned())
    }
}

pub struct StaticTokenProvider;

#[async_trait]
impl TerminalTokenProvider for StaticTokenProvider {
    async fn create_connection_token(&self, _tenant_id: &str, device_id: &str) -> Result<String> {
        Ok(format!("terminal-token-{}", device_id))
    }
}

#[derive(Default)]
pub struct InMemoryQueueRepository {
    pub entries: Mutex<HashMap<String, QueueEntry>>,
}

impl InMemoryQueueRepository {
    pub fn with_entry(entry: QueueEntry) -> Self {
        let repo = Self::default();
        repo.entries
            .lock()
            .unwrap()
            .insert(entry.id.clone(), entry);
        repo
    }

    pub fn get(&self, entry_id: &str) -> Option<QueueEntry> {
        self.entries.lock().unwrap().get(entry_id).cloned()
    }
}

#[async_trait]
impl QueueRepositoryTrait for InMemoryQueueRepository {
    fn find_by_id(&self, entry_id: &str) -> Result<Option<QueueEntry>> {
        Ok(self.entries.lock().unwrap().get(entry_id).cloned())
    }

    fn find_by_idempotency_key(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<QueueEntry>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .values()
            .find(|e| e.tenant_id == tenant_id && e.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn insert(&self, entry: QueueEntry) -> Result<QueueEntry> {
        let mut entries = self.entries.lock().unwrap();
        if entries
            .values()
            .any(|e| e.tenant_id == entry.tenant_id && e.idempotency_key == entry.idempotency_key)
        {
            return Err(Error::DuplicateIdempotencyKey(entry.idempotency_key));
        }
        entries.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn mark_processing(&self, entry_id: &str) -> Result<QueueEntry> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(entry_id)
            .ok_or_else(|| DatabaseError::QueryFailed(format!("entry {} not found", entry_id)))?;
        entry.sync_status = SyncStatus::Processing;
        entry.sync_attempt_count += 1;
        entry.sync_started_at = Some(Utc::now());
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn mark_completed(&self, entry_id: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(entry_id) {
            entry.sync_status = SyncStatus::Completed;
            entry.sync_completed_at = Some(Utc::now());
            entry.last_sync_error = None;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, entry_id: &str, error: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(entry_id) {
            entry.sync_status = SyncStatus::Failed;
            entry.last_sync_error = Some(error.to_string());
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn requeue(&self, entry_id: &str, error: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(entry_id) {
            entry.sync_status = SyncStatus::Queued;
            entry.last_sync_error = Some(error.to_string());
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    fn count_by_device_and_status(&self, device_id: &str, status: SyncStatus) -> Result<i64> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.device_id == device_id && e.sync_status == status)
            .count() as i64)
    }
}

#[derive(Default)]
pub struct InMemorySettledTransactionRepository {
    pub rows: Mutex<Vec<SettledTransaction>>,
}

#[async_trait]
impl SettledTransactionRepositoryTrait for InMemorySettledTransactionRepository {
    async fn insert(&self, settled: SettledTransaction) -> Result<()> {
        self.rows.lock().unwrap().push(settled);
        Ok(())
    }

    fn find_by_device_and_local_tx(
        &self,
        device_id: &str,
        local_transaction_id: &str,
    ) -> Result<Option<SettledTransaction>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.device_id == device_id && s.local_transaction_id == local_transaction_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryActivityLog {
    pub entries: Mutex<Vec<ActivityLogEntry>>,
}

impl InMemoryActivityLog {
    pub fn types_for_device(&self, device_id: &str) -> Vec<crate::activity::ActivityType> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.device_id == device_id)
            .map(|e| e.activity_type)
            .collect()
    }
}

#[async_trait]
impl ActivityLogRepositoryTrait for InMemoryActivityLog {
    async fn record(&self, entry: NewActivityLogEntry) -> Result<ActivityLogEntry> {
        let persisted = ActivityLogEntry {
            id: Uuid::new_v4().to_string(),
            tenant_id: entry.tenant_id,
            device_id: entry.device_id,
            activity_type: entry.activity_type,
            actor: entry.actor,
            metadata: entry.metadata,
            occurred_at: Utc::now(),
        };
        self.entries.lock().unwrap().push(persisted.clone());
        Ok(persisted)
    }

    fn list_for_device(&self, device_id: &str, limit: i64) -> Result<Vec<ActivityLogEntry>> {
        let entries = self.entries.lock().unwrap();
        let mut matching: Vec<ActivityLogEntry> = entries
            .iter()
            .filter(|e| e.device_id == device_id)
            .cloned()
            .collect();
        matching.reverse();
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryJobQueue {
    pub jobs: Mutex<Vec<SettlementJob>>,
}

impl InMemoryJobQueue {
    pub fn job(&self, job_id: &str) -> Option<SettlementJob> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<SettlementJob> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.status == status)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SettlementJobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: NewSettlementJob) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.jobs.lock().unwrap().push(SettlementJob {
            id: id.clone(),
            tenant_id: job.tenant_id,
            queue_entry_id: job.queue_entry_id,
            priority: job.priority,
            status: JobStatus::Pending,
            attempt_count: 0,
            next_run_at: Utc::now(),
            last_error: None,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<SettlementJob>> {
        let mut jobs = self.jobs.lock().unwrap();
        // Mirrors the production queue: IN_FLIGHT jobs are reclaimable once
        // their lease (next_run_at, set at claim time) has lapsed.
        let mut candidates: Vec<usize> = jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| {
                matches!(j.status, JobStatus::Pending | JobStatus::InFlight)
                    && j.next_run_at <= now
            })
            .map(|(i, _)| i)
            .collect();
        candidates.sort_by(|&a, &b| {
            jobs[b]
                .priority
                .cmp(&jobs[a].priority)
                .then(jobs[a].created_at.cmp(&jobs[b].created_at))
        });
        match candidates.first() {
            Some(&i) => {
                jobs[i].status = JobStatus::InFlight;
                jobs[i].attempt_count += 1;
                jobs[i].next_run_at = now + chrono::Duration::seconds(300);
                Ok(Some(jobs[i].clone()))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Done;
        }
        Ok(())
    }

    async fn retry_later(&self, job_id: &str, delay_seconds: i64, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Pending;
            job.next_run_at = Utc::now() + chrono::Duration::seconds(delay_seconds);
            job.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn mark_dead(&self, job_id: &str, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Dead;
            job.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

/// Payment collaborator that records every capture and dedupes on the
/// idempotency key, like a real provider.
#[derive(Default)]
pub struct RecordingPaymentGateway {
    pub captures: Mutex<Vec<PaymentCaptureRequest>>,
    pub settled_keys: Mutex<HashMap<String, String>>,
    /// Fail this many captures with a transient error before succeeding.
    pub transient_failures: Mutex<u32>,
}

impl RecordingPaymentGateway {
    pub fn failing_transiently(times: u32) -> Self {
        let gateway = Self::default();
        *gateway.transient_failures.lock().unwrap() = times;
        gateway
    }

    pub fn capture_count(&self) -> usize {
        self.captures.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentCaptureTrait for RecordingPaymentGateway {
    async fn capture(&self, request: PaymentCaptureRequest) -> Result<PaymentCaptureResult> {
        {
            let mut remaining = self.transient_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Transient("payment provider unavailable".into()));
            }
        }
        let mut settled = self.settled_keys.lock().unwrap();
        if let Some(existing) = settled.get(&request.idempotency_key) {
            return Ok(PaymentCaptureResult {
                payment_ref: existing.clone(),
            });
        }
        let payment_ref = format!("pay_{}", Uuid::new_v4().simple());
        settled.insert(request.idempotency_key.clone(), payment_ref.clone());
        self.captures.lock().unwrap().push(request);
        Ok(PaymentCaptureResult { payment_ref })
    }
}
