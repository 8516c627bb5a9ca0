//! Route handlers for the control surface.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use tether_core::address::phone_of;
use tether_core::{Phase, SendError};
use tether_telemetry::LogQuery;

use crate::health::{health_check, HealthResponse};
use crate::qr::scan_token_data_uri;
use crate::server::AppState;

/// Error body `{error}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<SendError> for ApiError {
    fn from(e: SendError) -> Self {
        Self::internal(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::bad_request(e.body_text())
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn success() -> Json<Value> {
    Json(json!({ "success": true }))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.controller.status();
    Json(health_check(state.start_time, &snapshot, &state.server_name))
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.controller.status();
    let phone = snapshot.identity.as_deref().map(phone_of);
    Json(json!({
        "status": snapshot.phase.as_str(),
        "phone": phone,
        "hasQR": snapshot.has_scan_payload(),
    }))
}

/// GET /api/qr
pub async fn qr(State(state): State<AppState>) -> ApiResult {
    let snapshot = state.controller.status();
    if snapshot.phase == Phase::Connected {
        return Ok(Json(json!({ "status": "connected" })));
    }
    match snapshot.scan_payload.as_deref() {
        Some(token) => {
            let uri = scan_token_data_uri(token)
                .map_err(|e| ApiError::internal(format!("qr render failed: {e}")))?;
            Ok(Json(json!({ "status": "qr_ready", "qr": uri })))
        }
        None => Ok(Json(json!({ "status": "waiting" }))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextRequest {
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendImageRequest {
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    caption: Option<String>,
}

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("missing {name}")))
}

/// POST /api/send
pub async fn send(
    State(state): State<AppState>,
    body: Result<Json<SendTextRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let to = required(req.phone.or(req.to), "phone")?;
    let message = required(req.message, "message")?;

    let jid = state.controller.send_text(&to, &message).await?;
    Ok(Json(json!({ "success": true, "to": jid })))
}

/// POST /api/send-image
pub async fn send_image(
    State(state): State<AppState>,
    body: Result<Json<SendImageRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let to = required(req.phone.or(req.to), "phone")?;
    let url = required(req.image_url, "imageUrl")?;
    let caption = req.caption.filter(|c| !c.is_empty());

    let jid = state
        .controller
        .send_image(&to, &url, caption.as_deref())
        .await?;
    Ok(Json(json!({ "success": true, "to": jid })))
}

/// POST /api/logout
pub async fn logout(State(state): State<AppState>) -> ApiResult {
    info!("logout requested");
    state
        .controller
        .logout()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(success())
}

/// POST /api/reconnect
pub async fn reconnect(State(state): State<AppState>) -> ApiResult {
    let accepted = state.controller.reconnect().await;
    if !accepted {
        warn!("reconnect raced with another attempt");
    }
    Ok(Json(json!({ "success": accepted })))
}

/// POST /api/clear-session
pub async fn clear_session(State(state): State<AppState>) -> ApiResult {
    state
        .controller
        .clear_session()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(success())
}

/// POST /api/sync-credentials
pub async fn sync_credentials(State(state): State<AppState>) -> ApiResult {
    state
        .controller
        .sync_credentials()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(success())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsParams {
    level: Option<String>,
    target: Option<String>,
    sender_id: Option<String>,
    since: Option<String>,
    limit: Option<u32>,
}

/// GET /api/logs
pub async fn logs(State(state): State<AppState>, Query(params): Query<LogsParams>) -> ApiResult {
    let Some(sink) = state.logs.as_deref() else {
        return Ok(Json(json!({ "logs": [], "totalCount": 0, "enabled": false })));
    };
    let query = LogQuery {
        level: params.level,
        target: params.target,
        sender_id: params.sender_id,
        since: params.since,
        limit: params.limit,
    };
    let records = sink
        .query(&query)
        .map_err(|e| ApiError::internal(format!("log query failed: {e}")))?;
    let total = sink
        .count()
        .map_err(|e| ApiError::internal(format!("log count failed: {e}")))?;
    Ok(Json(json!({
        "logs": records,
        "totalCount": total,
        "enabled": true,
    })))
}
