//! HTTP client for the tillsync cloud API.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use tillsync_core::ingest::{BatchUpload, BatchUploadOutcome};

use crate::error::{DeviceClientError, Result};
use crate::types::{ApiErrorResponse, CompletePairingRequest, CompletePairingResponse};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// Tenant scoping header expected by every endpoint.
pub const TENANT_HEADER: &str = "x-tillsync-tenant";

/// Seam between the scheduler and the HTTP transport.
#[async_trait]
pub trait BatchUploader: Send + Sync {
    async fn upload_batch(
        &self,
        device_id: &str,
        terminal_token: &str,
        batch: &BatchUpload,
    ) -> Result<BatchUploadOutcome>;
}

/// Client for the tillsync sync service.
#[derive(Debug, Clone)]
pub struct SyncApiClient {
    client: reqwest::Client,
    base_url: String,
    tenant_id: String,
}

impl SyncApiClient {
    /// Create a new sync client for one tenant.
    pub fn new(base_url: &str, tenant_id: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tenant_id: tenant_id.to_string(),
        }
    }

    fn headers(&self, terminal_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let tenant_value = HeaderValue::from_str(&self.tenant_id)
            .map_err(|_| DeviceClientError::invalid_request("Invalid tenant ID format"))?;
        headers.insert(TENANT_HEADER, tenant_value);

        if let Some(token) = terminal_token {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| DeviceClientError::invalid_request("Invalid terminal token format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("API response error ({}): {}", status, preview);
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            // Try to parse error response
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(DeviceClientError::api(
                    status.as_u16(),
                    format!("{}: {}", error.code, error.message),
                ));
            }
            return Err(DeviceClientError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!(
                "Failed to deserialize response. Body: {}, Error: {}",
                body,
                e
            );
            DeviceClientError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    /// Redeem a pairing code for device credentials.
    ///
    /// POST /api/pos/devices/complete-pairing
    pub async fn complete_pairing(
        &self,
        request: CompletePairingRequest,
    ) -> Result<CompletePairingResponse> {
        let url = format!("{}/api/pos/devices/complete-pairing", self.base_url);
        debug!("Completing pairing against {}", url);

        let response = self
            .client
            .post(&url)
            .headers(self.headers(None)?)
            .json(&request)
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

#[async_trait]
impl BatchUploader for SyncApiClient {
    /// Upload a batch of sealed transactions.
    ///
    /// POST /api/pos/offline/{device_id}/upload
    async fn upload_batch(
        &self,
        device_id: &str,
        terminal_token: &str,
        batch: &BatchUpload,
    ) -> Result<BatchUploadOutcome> {
        let url = format!("{}/api/pos/offline/{}/upload", self.base_url, device_id);
        debug!(
            "Uploading batch of {} transactions for device {}",
            batch.transactions.len(),
            device_id
        );

        let response = self
            .client
            .post(&url)
            .headers(self.headers(Some(terminal_token))?)
            .json(batch)
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiRetryClass;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        path: String,
        tenant: Option<String>,
        authorization: Option<String>,
        body: String,
    }

    #[derive(Debug, Clone)]
    enum MockOutcome {
        DropConnection,
        Respond { status: u16, body: String },
    }

    fn api_error_body(code: &str, message: &str) -> String {
        format!(
            r#"{{"error":"error","code":"{}","message":"{}"}}"#,
            code, message
        )
    }

    fn header_end_offset(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|window| window == b"\r\n\r\n")
    }

    async fn read_http_request(
        stream: &mut tokio::net::TcpStream,
    ) -> Option<(String, HashMap<String, String>, String)> {
        let mut buffer = Vec::new();
        loop {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if header_end_offset(&buffer).is_some() {
                break;
            }
        }

        let header_end = header_end_offset(&buffer)?;
        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let mut lines = head.lines();
        let request_line = lines.next()?.to_string();
        let path = request_line.split_whitespace().nth(1)?.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let mut body = buffer[header_end + 4..].to_vec();
        while body.len() < content_length {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Some((path, headers, String::from_utf8_lossy(&body).to_string()))
    }

    fn status_text(status: u16) -> &'static str {
        match status {
            200 => "OK",
            201 => "Created",
            400 => "Bad Request",
            403 => "Forbidden",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Error",
        }
    }

    async fn write_http_response(
        stream: &mut tokio::net::TcpStream,
        status: u16,
        body: &str,
    ) -> std::io::Result<()> {
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            status_text(status),
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await
    }

    async fn start_mock_server(
        outcomes: Vec<MockOutcome>,
    ) -> (
        String,
        Arc<TokioMutex<Vec<CapturedRequest>>>,
        tokio::task::JoinHandle<()>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(outcomes)));
        let captured_clone = Arc::clone(&captured);
        let scripted_clone = Arc::clone(&scripted);

        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let captured_inner = Arc::clone(&captured_clone);
                let scripted_inner = Arc::clone(&scripted_clone);
                tokio::spawn(async move {
                    let Some((path, headers, body)) = read_http_request(&mut stream).await else {
                        return;
                    };
                    captured_inner.lock().await.push(CapturedRequest {
                        path,
                        tenant: headers.get(TENANT_HEADER).cloned(),
                        authorization: headers.get("authorization").cloned(),
                        body,
                    });

                    let outcome = scripted_inner.lock().await.pop_front().unwrap_or(
                        MockOutcome::Respond {
                            status: 500,
                            body: api_error_body("INTERNAL", "unexpected request"),
                        },
                    );

                    match outcome {
                        MockOutcome::DropConnection => {}
                        MockOutcome::Respond { status, body } => {
                            let _ = write_http_response(&mut stream, status, &body).await;
                        }
                    }
                });
            }
        });

        (format!("http://{}", addr), captured, handle)
    }

    fn sample_batch() -> BatchUpload {
        serde_json::from_str(
            r#"{
                "transactions": [{
                    "localTransactionId": "11111111-1111-4111-8111-111111111111",
                    "encryptedPayload": "c2VhbGVk",
                    "encryptionIv": "bm9uY2Vub25jZQ==",
                    "encryptionKeyVersion": 1,
                    "transactionTimestamp": "2026-08-01T10:00:00Z",
                    "transactionAmount": "19.99"
                }],
                "firmwareVersion": "2.4.1"
            }"#,
        )
        .expect("sample batch")
    }

    #[tokio::test]
    async fn upload_batch_sends_tenant_and_token_and_parses_outcome() {
        let (base_url, captured, server) = start_mock_server(vec![MockOutcome::Respond {
            status: 200,
            body: r#"{"enqueued":1,"duplicates":0,"errors":[]}"#.to_string(),
        }])
        .await;

        let client = SyncApiClient::new(&base_url, "tenant-1");
        let outcome = client
            .upload_batch("dev-1", "terminal-token", &sample_batch())
            .await
            .expect("upload success");

        assert_eq!(outcome.enqueued, 1);
        assert_eq!(outcome.duplicates, 0);
        assert!(outcome.errors.is_empty());

        let requests = captured.lock().await.clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/api/pos/offline/dev-1/upload");
        assert_eq!(requests[0].tenant.as_deref(), Some("tenant-1"));
        assert_eq!(
            requests[0].authorization.as_deref(),
            Some("Bearer terminal-token")
        );
        assert!(requests[0].body.contains("11111111-1111-4111-8111-111111111111"));

        server.abort();
    }

    #[tokio::test]
    async fn server_error_body_is_surfaced_with_code_and_retry_class() {
        let (base_url, _captured, server) = start_mock_server(vec![MockOutcome::Respond {
            status: 503,
            body: api_error_body("MAINTENANCE", "try again shortly"),
        }])
        .await;

        let client = SyncApiClient::new(&base_url, "tenant-1");
        let err = client
            .upload_batch("dev-1", "terminal-token", &sample_batch())
            .await
            .expect_err("should fail");

        assert_eq!(err.status_code(), Some(503));
        assert_eq!(err.retry_class(), ApiRetryClass::Retryable);
        assert!(err.to_string().contains("MAINTENANCE: try again shortly"));

        server.abort();
    }

    #[tokio::test]
    async fn suspended_device_gets_reauth_class() {
        let (base_url, _captured, server) = start_mock_server(vec![MockOutcome::Respond {
            status: 403,
            body: api_error_body("DEVICE_NOT_ELIGIBLE", "device is suspended"),
        }])
        .await;

        let client = SyncApiClient::new(&base_url, "tenant-1");
        let err = client
            .upload_batch("dev-1", "terminal-token", &sample_batch())
            .await
            .expect_err("should fail");

        assert_eq!(err.retry_class(), ApiRetryClass::ReauthRequired);

        server.abort();
    }

    #[tokio::test]
    async fn dropped_connection_is_retryable_transport_failure() {
        let (base_url, _captured, server) =
            start_mock_server(vec![MockOutcome::DropConnection]).await;

        let client = SyncApiClient::new(&base_url, "tenant-1");
        let err = client
            .upload_batch("dev-1", "terminal-token", &sample_batch())
            .await
            .expect_err("should fail");

        assert!(matches!(err, DeviceClientError::Http(_)));
        assert_eq!(err.retry_class(), ApiRetryClass::Retryable);

        server.abort();
    }

    #[tokio::test]
    async fn complete_pairing_parses_issued_credentials() {
        let (base_url, captured, server) = start_mock_server(vec![MockOutcome::Respond {
            status: 200,
            body: r#"{
                "deviceId": "dev-9",
                "deviceName": "Back Office",
                "encryptionKey": "AwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwM=",
                "encryptionKeyVersion": 2,
                "terminalConnectionToken": "terminal-token-dev-9"
            }"#
            .to_string(),
        }])
        .await;

        let client = SyncApiClient::new(&base_url, "tenant-1");
        let response = client
            .complete_pairing(CompletePairingRequest {
                pairing_code: "ABCD2345".to_string(),
                firmware_version: Some("2.4.1".to_string()),
            })
            .await
            .expect("pairing success");

        assert_eq!(response.device_id, "dev-9");
        assert_eq!(response.encryption_key_version, 2);
        assert_eq!(response.terminal_connection_token, "terminal-token-dev-9");

        let requests = captured.lock().await.clone();
        assert_eq!(requests[0].path, "/api/pos/devices/complete-pairing");
        assert!(requests[0].body.contains("ABCD2345"));
        // No terminal token exists yet at pairing time.
        assert!(requests[0].authorization.is_none());

        server.abort();
    }
}
