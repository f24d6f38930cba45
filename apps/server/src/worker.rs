//! Background settlement dispatch loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use tillsync_core::settlement::SettlementWorker;

/// Drain due settlement jobs forever. One pass per tick; each pass claims at
/// most `batch` jobs so a deep queue cannot starve the tick cadence.
pub async fn run_dispatch_loop(worker: Arc<SettlementWorker>, interval: Duration, batch: usize) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match worker.drain(batch).await {
            Ok(0) => {}
            Ok(processed) => debug!("Settled {} jobs this pass", processed),
            Err(err) => error!("Settlement pass failed: {}", err),
        }
    }
}
