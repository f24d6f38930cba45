//! Environment-driven server configuration.

use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8710";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_DISPATCH_INTERVAL_SECS: u64 = 5;
const DEFAULT_SETTLEMENT_MAX_ATTEMPTS: i32 = 5;
const DEFAULT_DISPATCH_BATCH: usize = 50;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub data_dir: String,
    /// Base64 256-bit master key sealing device keys at rest.
    pub master_key: String,
    pub settlement_max_attempts: i32,
    pub dispatch_interval: Duration,
    pub dispatch_batch: usize,
    /// Payment capture endpoint. Absent in development setups.
    pub payment_gateway_url: Option<String>,
    pub payment_gateway_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let master_key = std::env::var("TILLSYNC_MASTER_KEY")
            .context("TILLSYNC_MASTER_KEY is required (base64, 32 bytes)")?;

        Ok(Self {
            bind_addr: env_or("TILLSYNC_BIND_ADDR", DEFAULT_BIND_ADDR),
            data_dir: env_or("TILLSYNC_DATA_DIR", DEFAULT_DATA_DIR),
            master_key,
            settlement_max_attempts: parse_env(
                "TILLSYNC_SETTLEMENT_MAX_ATTEMPTS",
                DEFAULT_SETTLEMENT_MAX_ATTEMPTS,
            )?,
            dispatch_interval: Duration::from_secs(parse_env(
                "TILLSYNC_DISPATCH_INTERVAL_SECS",
                DEFAULT_DISPATCH_INTERVAL_SECS,
            )?),
            dispatch_batch: parse_env("TILLSYNC_DISPATCH_BATCH", DEFAULT_DISPATCH_BATCH)?,
            payment_gateway_url: std::env::var("TILLSYNC_PAYMENT_GATEWAY_URL").ok(),
            payment_gateway_token: std::env::var("TILLSYNC_PAYMENT_GATEWAY_TOKEN").ok(),
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} is not a valid value", name)),
        Err(_) => Ok(default),
    }
}
