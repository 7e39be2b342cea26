use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::alerts::engine::is_overdue;
use crate::alerts::scheduler::CycleReport;
use crate::alerts::{Scheduler, Target, TargetsFile};
use crate::auth::{AccessToken, MuteTokens};
use crate::storage::{StateStore, StoreError};

/// Application state shared across handlers
pub struct AppState {
    pub targets: Arc<TargetsFile>,
    pub store: Arc<dyn StateStore>,
    pub access_token: AccessToken,
    pub mute_tokens: MuteTokens,
    pub scheduler: Option<Arc<Scheduler>>,
}

impl AppState {
    fn target(&self, id: &str) -> Result<&Target, ApiError> {
        self.targets
            .get(id)
            .ok_or_else(|| ApiError::NotFound(format!("Target '{}' not found", id)))
    }

    /// Accepts `Authorization: Bearer <token>` or `X-Secret: <token>`.
    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .or_else(|| headers.get("x-secret").and_then(|v| v.to_str().ok()));

        match presented {
            Some(token) if self.access_token.verify(token.trim()) => Ok(()),
            Some(_) => Err(ApiError::Unauthorized("Invalid access token".to_string())),
            None => Err(ApiError::Unauthorized("Missing access token".to_string())),
        }
    }
}

/// Run a store call on the blocking pool; file-backed writes fsync.
async fn with_store<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&dyn StateStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub targets: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<CycleReport>,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        targets: state.targets.targets.len(),
        last_cycle: state.scheduler.as_ref().and_then(|s| s.last_cycle()),
    })
}

// ============================================================================
// Liveness Reports
// ============================================================================

#[derive(Serialize)]
pub struct ReportResponse {
    pub id: String,
    pub last_acted: DateTime<Utc>,
}

pub async fn report_liveness(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ReportResponse>, ApiError> {
    state.authorize(&headers)?;
    state.target(&id)?;

    let now = Utc::now();
    let target_id = id.clone();
    with_store(&state, move |store| store.record_liveness(&target_id, now)).await?;

    tracing::info!(target_id = %id, "Liveness reported");

    Ok(Json(ReportResponse { id, last_acted: now }))
}

// ============================================================================
// Mute
// ============================================================================

#[derive(Serialize)]
pub struct MuteResponse {
    pub id: String,
    pub muted: bool,
}

pub async fn mute(
    State(state): State<Arc<AppState>>,
    Path((id, token)): Path<(String, String)>,
) -> Result<Json<MuteResponse>, ApiError> {
    state.target(&id)?;

    if !state.mute_tokens.verify(&id, &token) {
        tracing::warn!(target_id = %id, "Rejected mute request with invalid token");
        return Err(ApiError::Forbidden("Invalid mute token".to_string()));
    }

    let target_id = id.clone();
    with_store(&state, move |store| store.set_muted(&target_id, true)).await?;

    tracing::info!(target_id = %id, "Target muted until next liveness report");

    Ok(Json(MuteResponse { id, muted: true }))
}

// ============================================================================
// Inspection
// ============================================================================

#[derive(Serialize)]
pub struct TargetStatus {
    pub id: String,
    pub max_age: u64,
    pub alert_schedule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub last_acted: Option<DateTime<Utc>>,
    pub last_alerted: Option<DateTime<Utc>>,
    pub muted: bool,
    pub alert_outstanding: bool,
    pub overdue: bool,
}

#[derive(Serialize)]
pub struct TargetsResponse {
    pub targets: Vec<TargetStatus>,
}

fn target_status(
    store: &dyn StateStore,
    target: &Target,
    now: DateTime<Utc>,
) -> Result<TargetStatus, ApiError> {
    let state = store
        .get_state(&target.id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(TargetStatus {
        id: target.id.clone(),
        max_age: target.max_age,
        alert_schedule: target.alert_schedule.clone(),
        email: target.email.clone(),
        overdue: is_overdue(target, &state, now),
        alert_outstanding: state.alert_outstanding(),
        last_acted: state.last_acted,
        last_alerted: state.last_alerted,
        muted: state.muted,
    })
}

pub async fn get_target(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TargetStatus>, ApiError> {
    state.authorize(&headers)?;
    let target = state.target(&id)?;
    Ok(Json(target_status(state.store.as_ref(), target, Utc::now())?))
}

pub async fn list_targets(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TargetsResponse>, ApiError> {
    state.authorize(&headers)?;

    let now = Utc::now();
    let targets = state
        .targets
        .targets
        .iter()
        .map(|t| target_status(state.store.as_ref(), t, now))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(TargetsResponse { targets }))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
