//! Terminal connection token issuance.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use rand::RngCore;
use tracing::info;

use tillsync_core::devices::TerminalTokenProvider;
use tillsync_core::Result;

const TOKEN_BYTES: usize = 32;

/// Issues opaque bearer tokens for terminal connections. Tokens are random;
/// the tenant and device are bound server-side at verification time.
pub struct TerminalTokenGenerator;

#[async_trait]
impl TerminalTokenProvider for TerminalTokenGenerator {
    async fn create_connection_token(&self, tenant_id: &str, device_id: &str) -> Result<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = format!("tct_{}", BASE64_URL.encode(bytes));
        info!(
            "Issued terminal connection token for device {} (tenant {})",
            device_id, tenant_id
        );
        Ok(token)
    }
}
