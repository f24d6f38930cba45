//! Append-only activity audit log for device lifecycle and sync outcomes.
//!
//! Entries are read-only after write and are never consulted for control
//! flow; they exist for support and compliance review.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    PairingInitiated,
    PairingCompleted,
    DeviceSuspended,
    DeviceReactivated,
    SyncStarted,
    SyncCompleted,
    SyncFailed,
    FirmwareUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub id: String,
    pub tenant_id: String,
    pub device_id: String,
    pub activity_type: ActivityType,
    pub actor: Option<String>,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// A new entry before persistence assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewActivityLogEntry {
    pub tenant_id: String,
    pub device_id: String,
    pub activity_type: ActivityType,
    pub actor: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewActivityLogEntry {
    pub fn new(
        tenant_id: impl Into<String>,
        device_id: impl Into<String>,
        activity_type: ActivityType,
        actor: Option<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            device_id: device_id.into(),
            activity_type,
            actor,
            metadata,
        }
    }
}

#[async_trait]
pub trait ActivityLogRepositoryTrait: Send + Sync {
    async fn record(&self, entry: NewActivityLogEntry) -> Result<ActivityLogEntry>;
    fn list_for_device(&self, device_id: &str, limit: i64) -> Result<Vec<ActivityLogEntry>>;
}
