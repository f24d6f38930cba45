//! Register-side client for tillsync.
//!
//! Captures sales while offline, seals them under the paired device key,
//! stores them durably in local SQLite, and ships them to the sync service
//! whenever connectivity allows.

pub mod client;
pub mod error;
pub mod queue;
pub mod scheduler;
pub mod store;
pub mod types;

pub use client::{BatchUploader, SyncApiClient, TENANT_HEADER};
pub use error::{ApiRetryClass, DeviceClientError, Result};
pub use queue::OfflineQueue;
pub use scheduler::{spawn_background_ticker, SyncOutcome, SyncReport, SyncScheduler};
pub use store::{LocalStore, SqliteLocalStore};
pub use types::{DeviceCredentials, LocalQueueEntry, LocalQueueStats, LocalSyncStatus, NewSale};
