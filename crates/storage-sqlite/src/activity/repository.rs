//! Diesel-backed activity log repository. Insert-only; no update path exists.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use tillsync_core::activity::{
    ActivityLogEntry, ActivityLogRepositoryTrait, NewActivityLogEntry,
};
use tillsync_core::errors::Result;

use crate::convert::{enum_from_db, enum_to_db, parse_timestamp};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::pos_activity_log;

use super::model::ActivityLogEntryDB;

fn to_domain(row: ActivityLogEntryDB) -> Result<ActivityLogEntry> {
    Ok(ActivityLogEntry {
        id: row.id,
        tenant_id: row.tenant_id,
        device_id: row.device_id,
        activity_type: enum_from_db(&row.activity_type)?,
        actor: row.actor,
        metadata: serde_json::from_str(&row.metadata)?,
        occurred_at: parse_timestamp(&row.occurred_at)?,
    })
}

pub struct ActivityLogRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl ActivityLogRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl ActivityLogRepositoryTrait for ActivityLogRepository {
    async fn record(&self, entry: NewActivityLogEntry) -> Result<ActivityLogEntry> {
        let row = ActivityLogEntryDB {
            id: Uuid::new_v4().to_string(),
            tenant_id: entry.tenant_id,
            device_id: entry.device_id,
            activity_type: enum_to_db(&entry.activity_type)?,
            actor: entry.actor,
            metadata: serde_json::to_string(&entry.metadata)?,
            occurred_at: Utc::now().to_rfc3339(),
        };
        let persisted = row.clone();
        self.writer
            .exec(move |conn| {
                diesel::insert_into(pos_activity_log::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await?;
        to_domain(persisted)
    }

    fn list_for_device(&self, device_id: &str, limit: i64) -> Result<Vec<ActivityLogEntry>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = pos_activity_log::table
            .filter(pos_activity_log::device_id.eq(device_id))
            .order(pos_activity_log::occurred_at.desc())
            .limit(limit)
            .load::<ActivityLogEntryDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_domain).collect()
    }
}
