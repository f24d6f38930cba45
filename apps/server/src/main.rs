//! tillsync sync service: pairing, offline batch ingestion, and settlement.

mod api;
mod config;
mod error;
mod gateway;
mod state;
mod tokens;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tillsync_core::devices::PairingService;
use tillsync_core::ingest::IngestionService;
use tillsync_core::keys::KeyVault;
use tillsync_core::settlement::{PaymentCaptureTrait, SettlementWorker, SettlementWorkerConfig};
use tillsync_storage_sqlite::db;
use tillsync_storage_sqlite::{
    ActivityLogRepository, DeviceKeyRepository, DeviceRepository, QueueRepository,
    SettledTransactionRepository, SettlementJobRepository,
};

use crate::config::Config;
use crate::gateway::{HttpPaymentGateway, SimulatedPaymentGateway};
use crate::state::AppState;
use crate::tokens::TerminalTokenGenerator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let key_vault = Arc::new(KeyVault::from_base64(&config.master_key)?);

    let db_path = db::init(&config.data_dir)?;
    db::run_migrations(&db_path)?;
    let pool = db::create_pool(&db_path)?;
    let writer = db::write_actor::spawn_writer(pool.as_ref().clone());

    let devices = Arc::new(DeviceRepository::new(pool.clone(), writer.clone()));
    let device_keys = Arc::new(DeviceKeyRepository::new(pool.clone(), writer.clone()));
    let queue = Arc::new(QueueRepository::new(pool.clone(), writer.clone()));
    let settled = Arc::new(SettledTransactionRepository::new(pool.clone(), writer.clone()));
    let jobs = Arc::new(SettlementJobRepository::new(pool.clone(), writer.clone()));
    let activity = Arc::new(ActivityLogRepository::new(pool.clone(), writer.clone()));

    let payments: Arc<dyn PaymentCaptureTrait> = match &config.payment_gateway_url {
        Some(url) => Arc::new(HttpPaymentGateway::new(
            url,
            config.payment_gateway_token.clone(),
        )),
        None => {
            info!("No payment gateway configured, using simulated captures");
            Arc::new(SimulatedPaymentGateway)
        }
    };

    let pairing = Arc::new(PairingService::new(
        devices.clone(),
        device_keys.clone(),
        activity.clone(),
        Arc::new(TerminalTokenGenerator),
        key_vault.clone(),
    ));
    let ingestion = Arc::new(IngestionService::new(
        devices.clone(),
        queue.clone(),
        settled.clone(),
        jobs.clone(),
        activity.clone(),
    ));
    let settlement = Arc::new(SettlementWorker::new(
        jobs,
        queue,
        settled,
        devices,
        device_keys,
        key_vault,
        payments,
        activity.clone(),
        SettlementWorkerConfig {
            max_attempts: config.settlement_max_attempts,
        },
    ));

    tokio::spawn(worker::run_dispatch_loop(
        settlement,
        config.dispatch_interval,
        config.dispatch_batch,
    ));

    let app_state = AppState {
        pairing,
        ingestion,
        activity,
    };
    let app = api::pos::router().with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("tillsync server listening on {}", config.bind_addr);
    axum::serve(listener, app).await.context("server exited")?;
    Ok(())
}
