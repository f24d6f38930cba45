//! Core domain for tillsync: device pairing and key issuance, the encrypted
//! offline transaction queue, idempotent ingestion, settlement, and the
//! activity audit log.
//!
//! Persistence and transport live in sibling crates; everything here talks to
//! repository traits so the domain stays testable without a database.

pub mod activity;
pub mod crypto;
pub mod devices;
pub mod errors;
pub mod ingest;
pub mod keys;
pub mod queue;
pub mod settlement;

pub use errors::{Error, Result};

#[cfg(test)]
pub(crate) mod test_support;
