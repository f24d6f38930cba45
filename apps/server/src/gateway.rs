//! Payment capture collaborators.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use tillsync_core::settlement::{PaymentCaptureRequest, PaymentCaptureResult, PaymentCaptureTrait};
use tillsync_core::{Error, Result};

const CAPTURE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptureResponse {
    payment_ref: String,
}

/// Capture via an external payment provider over HTTP. The idempotency key
/// travels in the `Idempotency-Key` header, so a retried capture of the same
/// entry returns the original payment.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, bearer_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CAPTURE_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token,
        }
    }
}

#[async_trait]
impl PaymentCaptureTrait for HttpPaymentGateway {
    async fn capture(&self, request: PaymentCaptureRequest) -> Result<PaymentCaptureResult> {
        let url = format!("{}/v1/captures", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&serde_json::json!({
                "amount": request.amount,
                "currency": request.currency,
                "customerId": request.customer_id,
                "paymentMethodId": request.payment_method_id,
                "metadata": request.metadata,
            }));
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transient(format!("payment gateway unreachable: {}", e)))?;
        let status = response.status();
        if status.is_success() {
            let body: CaptureResponse = response
                .json()
                .await
                .map_err(|e| Error::Transient(format!("payment gateway bad response: {}", e)))?;
            return Ok(PaymentCaptureResult {
                payment_ref: body.payment_ref,
            });
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
            warn!("Payment gateway transient failure ({}): {}", status, body);
            return Err(Error::Transient(format!(
                "payment gateway returned {}",
                status
            )));
        }
        Err(Error::Validation(format!(
            "payment capture declined ({}): {}",
            status, body
        )))
    }
}

/// Development-mode gateway: mints a local payment reference without talking
/// to a provider. Used when no gateway URL is configured.
pub struct SimulatedPaymentGateway;

#[async_trait]
impl PaymentCaptureTrait for SimulatedPaymentGateway {
    async fn capture(&self, request: PaymentCaptureRequest) -> Result<PaymentCaptureResult> {
        debug!(
            "Simulated capture of {} {} (idempotency key {})",
            request.amount, request.currency, request.idempotency_key
        );
        Ok(PaymentCaptureResult {
            payment_ref: format!("sim_{}", Uuid::new_v4().simple()),
        })
    }
}
