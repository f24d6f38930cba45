use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::pos_activity_log)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ActivityLogEntryDB {
    pub id: String,
    pub tenant_id: String,
    pub device_id: String,
    pub activity_type: String,
    pub actor: Option<String>,
    pub metadata: String,
    pub occurred_at: String,
}
