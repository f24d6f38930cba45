use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::settlement_jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SettlementJobDB {
    pub id: String,
    pub tenant_id: String,
    pub queue_entry_id: String,
    pub priority: String,
    pub status: String,
    pub attempt_count: i32,
    pub next_run_at: String,
    pub last_error: Option<String>,
    pub created_at: String,
}
