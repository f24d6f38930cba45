//! Payment capture collaborator boundary.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::errors::Result;

/// Request to the external payment-capture collaborator. The idempotency key
/// is passed through as the caller-supplied idempotency token; the
/// collaborator is assumed idempotent given that token.
#[derive(Debug, Clone)]
pub struct PaymentCaptureRequest {
    pub amount: Decimal,
    pub currency: String,
    pub customer_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub metadata: HashMap<String, String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct PaymentCaptureResult {
    /// Provider-side payment reference, recorded in the settlement audit.
    pub payment_ref: String,
}

#[async_trait]
pub trait PaymentCaptureTrait: Send + Sync {
    async fn capture(&self, request: PaymentCaptureRequest) -> Result<PaymentCaptureResult>;
}
