//! REST endpoints for device pairing, offline upload, and queue status.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use tillsync_core::activity::ActivityLogEntry;
use tillsync_core::devices::{Device, PairingCompletion, PairingInitiation};
use tillsync_core::ingest::{BatchUpload, BatchUploadOutcome, DeviceQueueStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Tenant scoping header. Every endpoint requires it.
pub const TENANT_HEADER: &str = "x-tillsync-tenant";
/// Optional staff identity header, recorded in the activity log.
pub const ACTOR_HEADER: &str = "x-tillsync-actor";

const ACTIVITY_PAGE_SIZE: i64 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/pos/devices", get(list_devices))
        .route("/api/pos/devices/pair", post(initiate_pairing))
        .route("/api/pos/devices/complete-pairing", post(complete_pairing))
        .route("/api/pos/devices/:device_id/suspend", post(suspend_device))
        .route(
            "/api/pos/devices/:device_id/reactivate",
            post(reactivate_device),
        )
        .route(
            "/api/pos/devices/:device_id/terminal-token",
            post(issue_terminal_token),
        )
        .route("/api/pos/devices/:device_id/heartbeat", post(heartbeat))
        .route("/api/pos/devices/:device_id/activity", get(device_activity))
        .route("/api/pos/offline/:device_id/upload", post(upload_batch))
        .route("/api/pos/offline/:device_id/status", get(queue_status))
}

fn tenant_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("missing {} header", TENANT_HEADER)))
}

fn actor(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePairingRequest {
    pub device_identifier: String,
    pub device_name: String,
    pub location_name: Option<String>,
    pub hardware_model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePairingRequest {
    pub pairing_code: String,
    pub firmware_version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LifecycleRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub firmware_version: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalTokenResponse {
    pub terminal_connection_token: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Device Management
// ─────────────────────────────────────────────────────────────────────────────

async fn list_devices(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<Device>>> {
    let tenant = tenant_id(&headers)?;
    Ok(Json(state.pairing.list_active_devices(&tenant)?))
}

async fn initiate_pairing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<InitiatePairingRequest>,
) -> ApiResult<Json<PairingInitiation>> {
    let tenant = tenant_id(&headers)?;
    let initiation = state
        .pairing
        .initiate_pairing(
            &tenant,
            &request.device_identifier,
            &request.device_name,
            request.location_name.as_deref(),
            request.hardware_model.as_deref(),
            actor(&headers).as_deref(),
        )
        .await?;
    info!(
        "Pairing initiated for device {} (tenant {})",
        initiation.device_id, tenant
    );
    Ok(Json(initiation))
}

async fn complete_pairing(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CompletePairingRequest>,
) -> ApiResult<Json<PairingCompletion>> {
    // Pairing is keyed by code alone: the register does not know its tenant
    // yet, and nothing may fail after the one-time key has been issued.
    let completion = state
        .pairing
        .complete_pairing(
            &request.pairing_code,
            actor(&headers).as_deref(),
            request.firmware_version.as_deref(),
        )
        .await?;
    Ok(Json(completion))
}

async fn suspend_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
    Json(request): Json<LifecycleRequest>,
) -> ApiResult<Json<Device>> {
    let tenant = tenant_id(&headers)?;
    let device = state
        .pairing
        .suspend_device(
            &tenant,
            &device_id,
            actor(&headers).as_deref(),
            &request.reason,
        )
        .await?;
    Ok(Json(device))
}

async fn reactivate_device(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
    Json(request): Json<LifecycleRequest>,
) -> ApiResult<Json<Device>> {
    let tenant = tenant_id(&headers)?;
    let device = state
        .pairing
        .reactivate_device(
            &tenant,
            &device_id,
            actor(&headers).as_deref(),
            &request.reason,
        )
        .await?;
    Ok(Json(device))
}

async fn issue_terminal_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> ApiResult<Json<TerminalTokenResponse>> {
    let tenant = tenant_id(&headers)?;
    let token = state.pairing.issue_terminal_token(&tenant, &device_id).await?;
    Ok(Json(TerminalTokenResponse {
        terminal_connection_token: token,
    }))
}

async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<Json<Value>> {
    let tenant = tenant_id(&headers)?;
    state
        .pairing
        .update_heartbeat(&tenant, &device_id, request.firmware_version.as_deref())
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn device_activity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Vec<ActivityLogEntry>>> {
    // Scope check happens through the ingestion service's device lookup.
    let tenant = tenant_id(&headers)?;
    state.ingestion.queue_status(&tenant, &device_id)?;
    Ok(Json(
        state.activity.list_for_device(&device_id, ACTIVITY_PAGE_SIZE)?,
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Offline Queue
// ─────────────────────────────────────────────────────────────────────────────

async fn upload_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
    Json(batch): Json<BatchUpload>,
) -> ApiResult<Json<BatchUploadOutcome>> {
    let tenant = tenant_id(&headers)?;
    let outcome = state.ingestion.upload_batch(&tenant, &device_id, batch).await?;
    Ok(Json(outcome))
}

async fn queue_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> ApiResult<Json<DeviceQueueStatus>> {
    let tenant = tenant_id(&headers)?;
    Ok(Json(state.ingestion.queue_status(&tenant, &device_id)?))
}
