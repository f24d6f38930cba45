//! SQLite persistence for tillsync: diesel repositories behind the core
//! domain traits, a pooled reader path, and a single-writer actor.

pub mod db;
pub mod errors;
pub mod schema;

mod convert;

pub mod activity;
pub mod devices;
pub mod jobs;
pub mod queue;

pub use activity::ActivityLogRepository;
pub use devices::{DeviceKeyRepository, DeviceRepository};
pub use jobs::SettlementJobRepository;
pub use queue::{QueueRepository, SettledTransactionRepository};

#[cfg(test)]
pub(crate) mod test_db;
