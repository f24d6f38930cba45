//! SQLite pool setup, migrations, and the serialized write actor.
//!
//! Reads go through the r2d2 pool; every write goes through a single writer
//! thread so SQLite never sees two competing write transactions.

use std::path::Path;
use std::sync::Arc;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::error;

use tillsync_core::errors::{DatabaseError, Result};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL; \
             PRAGMA foreign_keys = ON; \
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Ensure the data directory exists and return the database file path.
pub fn init(data_dir: &str) -> Result<String> {
    std::fs::create_dir_all(data_dir).map_err(|e| {
        DatabaseError::Internal(format!("Failed creating data directory {}: {}", data_dir, e))
    })?;
    let db_path = Path::new(data_dir).join("tillsync.db");
    Ok(db_path.to_string_lossy().to_string())
}

pub fn create_pool(db_path: &str) -> Result<Arc<DbPool>> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path);
    let pool = Pool::builder()
        .connection_customizer(Box::new(ConnectionOptions))
        .build(manager)
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
    Ok(Arc::new(pool))
}

pub fn get_connection(pool: &DbPool) -> Result<DbConnection> {
    pool.get()
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()).into())
}

pub fn run_migrations(db_path: &str) -> Result<()> {
    let mut conn = SqliteConnection::establish(db_path)
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| DatabaseError::Internal(format!("Migration failed: {}", e)))?;
    Ok(())
}

pub use write_actor::WriteHandle;

pub mod write_actor {
    use super::*;
    use crate::errors::StorageError;
    use tillsync_core::errors::Error;

    type WriteJob = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

    /// Handle to the single writer thread. Each job runs inside an
    /// IMMEDIATE transaction; a job error rolls the whole job back.
    #[derive(Clone)]
    pub struct WriteHandle {
        tx: tokio::sync::mpsc::UnboundedSender<WriteJob>,
    }

    pub fn spawn_writer(pool: DbPool) -> WriteHandle {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<WriteJob>();
        std::thread::spawn(move || {
            while let Some(job) = rx.blocking_recv() {
                match pool.get() {
                    Ok(mut conn) => job(&mut conn),
                    // The job's reply channel is dropped with it, so the
                    // caller observes the failure.
                    Err(e) => error!("Writer could not obtain a connection: {}", e),
                }
            }
        });
        WriteHandle { tx }
    }

    impl WriteHandle {
        pub async fn exec<T, F>(&self, job: F) -> Result<T>
        where
            T: Send + 'static,
            F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        {
            let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
            let boxed: WriteJob = Box::new(move |conn| {
                let result = conn
                    .immediate_transaction::<T, StorageError, _>(|tx_conn| {
                        job(tx_conn).map_err(StorageError::from)
                    })
                    .map_err(Error::from);
                let _ = reply_tx.send(result);
            });
            self.tx.send(boxed).map_err(|_| {
                Error::Database(DatabaseError::Internal(
                    "Writer thread is no longer running".to_string(),
                ))
            })?;
            reply_rx.await.map_err(|_| {
                Error::Database(DatabaseError::Internal(
                    "Writer dropped the job before replying".to_string(),
                ))
            })?
        }
    }
}
