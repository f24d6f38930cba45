//! Shared database setup for repository tests.

use std::sync::Arc;

use crate::db::{self, write_actor::spawn_writer, DbPool, WriteHandle};

pub(crate) fn setup_db() -> (Arc<DbPool>, WriteHandle) {
    let data_dir = tempfile::tempdir()
        .expect("tempdir")
        .keep()
        .to_string_lossy()
        .to_string();
    let db_path = db::init(&data_dir).expect("init db");
    db::run_migrations(&db_path).expect("migrate db");
    let pool = db::create_pool(&db_path).expect("create pool");
    let writer = spawn_writer(pool.as_ref().clone());
    (pool, writer)
}
