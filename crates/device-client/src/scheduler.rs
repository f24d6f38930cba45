//! Sync scheduling for the register.
//!
//! The scheduler owns the QUEUED -> SYNCING -> COMPLETED/FAILED transitions and
//! decides when an upload pass may run: only while online, not held by staff,
//! and never two passes at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, warn};
use tokio::sync::Mutex as TokioMutex;

use tillsync_core::ingest::{BatchUpload, IncomingTransaction};

use crate::client::BatchUploader;
use crate::error::{DeviceClientError, Result};
use crate::store::LocalStore;
use crate::types::{LocalQueueEntry, LocalSyncStatus};

/// Upper bound on entries shipped per pass.
const BATCH_LIMIT: usize = 100;

/// How long acknowledged entries are kept locally before purge.
const PURGE_RETENTION_HOURS: i64 = 24;

/// Enqueue notifications inside this window collapse into one pass.
const ENQUEUE_DEBOUNCE: Duration = Duration::from_millis(500);

/// What a sync request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A pass ran (possibly over an empty queue).
    Completed(SyncReport),
    /// The register is offline; nothing was attempted.
    SkippedOffline,
    /// Sync is held by staff; nothing was attempted.
    SkippedHeld,
    /// Another pass holds the sync lock.
    AlreadyRunning,
    /// A very recent enqueue already triggered a pass; this one collapsed
    /// into it.
    Debounced,
}

/// Per-pass accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub uploaded: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub purged: usize,
}

pub struct SyncScheduler {
    store: Arc<dyn LocalStore>,
    uploader: Arc<dyn BatchUploader>,
    firmware_version: Option<String>,
    online: AtomicBool,
    held: AtomicBool,
    sync_lock: TokioMutex<()>,
    last_enqueue_sync: Mutex<Option<Instant>>,
}

impl SyncScheduler {
    pub fn new(
        store: Arc<dyn LocalStore>,
        uploader: Arc<dyn BatchUploader>,
        firmware_version: Option<String>,
    ) -> Self {
        Self {
            store,
            uploader,
            firmware_version,
            online: AtomicBool::new(false),
            held: AtomicBool::new(false),
            sync_lock: TokioMutex::new(()),
            last_enqueue_sync: Mutex::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Report connectivity. While online, every report is an opportunity to
    /// drain the queue; going offline just flips the gate.
    pub async fn set_connectivity(&self, online: bool) -> Result<SyncOutcome> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if !online {
            return Ok(SyncOutcome::SkippedOffline);
        }
        if !was_online {
            debug!("Connectivity restored, attempting sync");
        }
        self.maybe_sync().await
    }

    /// Staff-controlled pause. Queued sales keep accumulating.
    pub fn hold_sync(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Lift a hold and attempt a pass immediately.
    pub async fn resume_sync(&self) -> Result<SyncOutcome> {
        self.held.store(false, Ordering::SeqCst);
        self.maybe_sync().await
    }

    /// Called after a sale is queued; syncs opportunistically. Bursts of
    /// captures collapse into one pass via a short debounce window.
    pub async fn notify_enqueued(&self) -> Result<SyncOutcome> {
        if !self.is_online() {
            return Ok(SyncOutcome::SkippedOffline);
        }
        if self.is_held() {
            return Ok(SyncOutcome::SkippedHeld);
        }
        if let Ok(mut last) = self.last_enqueue_sync.lock() {
            if last.map(|at| at.elapsed() < ENQUEUE_DEBOUNCE).unwrap_or(false) {
                return Ok(SyncOutcome::Debounced);
            }
            *last = Some(Instant::now());
        }
        self.run_sync().await
    }

    async fn maybe_sync(&self) -> Result<SyncOutcome> {
        if !self.is_online() {
            return Ok(SyncOutcome::SkippedOffline);
        }
        if self.is_held() {
            return Ok(SyncOutcome::SkippedHeld);
        }
        self.run_sync().await
    }

    /// Run one upload pass. Concurrent callers are turned away rather than
    /// queued; the running pass will pick up their entries anyway.
    pub async fn run_sync(&self) -> Result<SyncOutcome> {
        let Ok(_guard) = self.sync_lock.try_lock() else {
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let credentials = self
            .store
            .credentials()?
            .ok_or(DeviceClientError::NotPaired)?;

        let snapshot = self
            .store
            .entries_with_status(LocalSyncStatus::Queued, BATCH_LIMIT)?;
        if snapshot.is_empty() {
            return Ok(SyncOutcome::Completed(SyncReport::default()));
        }

        let ids: Vec<String> = snapshot
            .iter()
            .map(|e| e.local_transaction_id.clone())
            .collect();
        self.store.set_status(&ids, LocalSyncStatus::Syncing, None)?;

        let batch = BatchUpload {
            transactions: snapshot.iter().map(to_wire).collect(),
            firmware_version: self.firmware_version.clone(),
        };

        let outcome = match self
            .uploader
            .upload_batch(
                &credentials.device_id,
                &credentials.terminal_connection_token,
                &batch,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                // Transport or whole-batch failure: nothing was acknowledged,
                // so every submitted entry reverts to FAILED for later retry.
                warn!("Batch upload failed, reverting {} entries: {}", ids.len(), err);
                self.store
                    .set_status(&ids, LocalSyncStatus::Failed, Some(&err.to_string()))?;
                return Err(err);
            }
        };

        let mut rejected = 0;
        let mut acknowledged = Vec::with_capacity(ids.len());
        for id in &ids {
            match outcome.errors.iter().find(|e| &e.local_transaction_id == id) {
                Some(rejection) => {
                    rejected += 1;
                    self.store.set_status(
                        std::slice::from_ref(id),
                        LocalSyncStatus::Failed,
                        Some(&rejection.reason),
                    )?;
                }
                None => acknowledged.push(id.clone()),
            }
        }
        self.store
            .set_status(&acknowledged, LocalSyncStatus::Completed, None)?;
        let purge_cutoff = chrono::Utc::now() - chrono::Duration::hours(PURGE_RETENTION_HOURS);
        let purged = self.store.purge_completed(purge_cutoff)?;

        let report = SyncReport {
            uploaded: ids.len(),
            accepted: outcome.enqueued,
            duplicates: outcome.duplicates,
            rejected,
            purged,
        };
        debug!(
            "Sync pass done: {} uploaded, {} accepted, {} duplicates, {} rejected",
            report.uploaded, report.accepted, report.duplicates, report.rejected
        );
        Ok(SyncOutcome::Completed(report))
    }
}

/// Best-effort periodic sweep. A platform may throttle or never run timers
/// in the background, so nothing relies on this ticking; it only shortens
/// the window between connectivity events and the next pass.
pub fn spawn_background_ticker(
    scheduler: Arc<SyncScheduler>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = scheduler.maybe_sync().await {
                debug!("Background sync pass failed: {}", err);
            }
        }
    })
}

fn to_wire(entry: &LocalQueueEntry) -> IncomingTransaction {
    IncomingTransaction {
        local_transaction_id: entry.local_transaction_id.clone(),
        encrypted_payload: BASE64.encode(&entry.encrypted_payload),
        encryption_iv: BASE64.encode(&entry.encryption_iv),
        encryption_key_version: entry.encryption_key_version,
        transaction_timestamp: entry.transaction_timestamp,
        transaction_amount: Some(entry.transaction_amount),
        priority: Some(entry.priority.clone()),
        staff_actor: entry.staff_actor.clone(),
    }
}
