//! Durable settlement job queue interface.
//!
//! The queue is an explicit `enqueue`/`claim_next` surface rather than an
//! ambient scheduler dependency so deterministic tests can drive settlement
//! synchronously. Durability and ordering live behind the trait; correctness
//! against double settlement comes from the idempotency-key uniqueness on
//! the queue entries, not from job ordering.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::queue::SyncPriority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InFlight,
    Done,
    /// Permanently excluded from automatic retry.
    Dead,
}

#[derive(Debug, Clone)]
pub struct SettlementJob {
    pub id: String,
    pub tenant_id: String,
    pub queue_entry_id: String,
    pub priority: SyncPriority,
    pub status: JobStatus,
    pub attempt_count: i32,
    pub next_run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSettlementJob {
    pub tenant_id: String,
    pub queue_entry_id: String,
    pub priority: SyncPriority,
}

#[async_trait]
pub trait SettlementJobQueue: Send + Sync {
    async fn enqueue(&self, job: NewSettlementJob) -> Result<String>;
    /// Claim the next runnable job (priority desc, then age), marking it
    /// IN_FLIGHT. A claim is a time-limited lease: IN_FLIGHT jobs whose
    /// lease has lapsed are claimable again, so a worker crash never
    /// strands a job. `None` when nothing is runnable yet.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<SettlementJob>>;
    async fn complete(&self, job_id: &str) -> Result<()>;
    /// Schedule a retry after `delay_seconds`, recording the error.
    async fn retry_later(&self, job_id: &str, delay_seconds: i64, error: &str) -> Result<()>;
    /// Dead-letter: never retried again, surfaced for manual intervention.
    async fn mark_dead(&self, job_id: &str, error: &str) -> Result<()>;
}
