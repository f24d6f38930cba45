//! Server-side batch ingestion: validation, dedup, durable enqueue.

mod ingest_model;
mod ingest_service;

pub use ingest_model::*;
pub use ingest_service::*;
