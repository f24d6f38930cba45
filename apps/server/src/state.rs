//! Shared application state handed to every request handler.

use std::sync::Arc;

use tillsync_core::activity::ActivityLogRepositoryTrait;
use tillsync_core::devices::PairingService;
use tillsync_core::ingest::IngestionService;

#[derive(Clone)]
pub struct AppState {
    pub pairing: Arc<PairingService>,
    pub ingestion: Arc<IngestionService>,
    pub activity: Arc<dyn ActivityLogRepositoryTrait>,
}
