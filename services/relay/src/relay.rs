//! Analysis relay endpoint
//!
//! `POST /v1/analyze` runs the gate sequence: bearer auth, body cap, JSON
//! shape, base64 validity, device rate limit, image dedup — and only then
//! the two upstream tiers. Local rejections cost the device nothing; usage
//! is recorded once a request is cleared for the upstream.
//!
//! Error responses are `{"error":{"type","message","request_id"}}` with
//! `req_`-prefixed IDs, mirroring what the client-side classifier expects.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use base64::Engine as _;
use common::Secret;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use vision::{Confidence, ImagePayload, VisionClient};

use crate::limits::{DedupCache, DeviceRateLimiter};

/// Service-level counters surfaced on /health.
#[derive(Clone)]
pub struct ServiceMetrics {
    pub started_at: Instant,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Shared application state passed to handlers via axum State extractor
#[derive(Clone)]
pub struct AppState {
    pub vision: Arc<VisionClient>,
    pub auth_token: Arc<Secret<String>>,
    pub limiter: Arc<DeviceRateLimiter>,
    pub dedup: Arc<DedupCache>,
    pub max_image_base64_bytes: usize,
    pub metrics: ServiceMetrics,
    pub prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/analyze", post(analyze_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    #[serde(rename = "imageBase64")]
    image_base64: String,
    #[serde(rename = "deviceId")]
    device_id: String,
}

/// JSON error body: {"error":{"type":"...","message":"...","request_id":"req_..."}}
fn error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
    request_id: &str,
) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Tier-1 rejection carries the verdict confidence for the client.
fn not_food_response(confidence: Confidence, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "not_food",
            "message": "No food detected in the image",
            "confidence": confidence,
            "request_id": request_id,
        }
    });
    (
        StatusCode::BAD_REQUEST,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

async fn analyze_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    let started = Instant::now();
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let response = handle_analyze(&state, request, &request_id).await;

    crate::metrics::record_request(response.status().as_u16(), started.elapsed().as_secs_f64());
    if response.status().is_server_error() {
        state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    response
}

#[instrument(skip_all, fields(request_id = %request_id))]
async fn handle_analyze(state: &AppState, request: Request<Body>, request_id: &str) -> Response {
    let authorized = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.auth_token.expose());
    if !authorized {
        crate::metrics::record_rejection("unauthorized");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Missing or invalid bearer token",
            request_id,
        );
    }

    // Cap the raw body read; allow JSON envelope overhead on top of the image field
    let body_cap = state.max_image_base64_bytes + 16 * 1024;
    let body = match axum::body::to_bytes(request.into_body(), body_cap).await {
        Ok(b) => b,
        Err(_) => {
            crate::metrics::record_rejection("payload_too_large");
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "Image payload exceeds the size limit",
                request_id,
            );
        }
    };

    let parsed: AnalyzeRequest = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("invalid request body: {e}"),
                request_id,
            );
        }
    };

    if parsed.image_base64.is_empty() || parsed.device_id.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "imageBase64 and deviceId are required",
            request_id,
        );
    }

    if parsed.image_base64.len() > state.max_image_base64_bytes {
        crate::metrics::record_rejection("payload_too_large");
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            "Image payload exceeds the size limit",
            request_id,
        );
    }

    let image_bytes = match base64::engine::general_purpose::STANDARD.decode(&parsed.image_base64) {
        Ok(b) => b,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "malformed_image",
                "imageBase64 is not valid base64",
                request_id,
            );
        }
    };

    if !state.limiter.check(&parsed.device_id).await {
        crate::metrics::record_rejection("rate_limited");
        warn!(device_id = %parsed.device_id, "device daily limit reached");
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "Daily analysis limit reached for this device",
            request_id,
        );
    }

    if state.dedup.check_and_insert(DedupCache::hash(&image_bytes)).await {
        crate::metrics::record_rejection("duplicate_image");
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "duplicate_image",
            "This image was analyzed moments ago",
            request_id,
        );
    }

    // Cleared both gates: the attempt counts against the device
    state.limiter.record(&parsed.device_id).await;

    let payload = ImagePayload::jpeg(parsed.image_base64);

    let verdict = match state.vision.classify_food(&payload).await {
        Ok(v) => v,
        Err(e) => return upstream_error_response(e, request_id),
    };
    if !verdict.is_food {
        info!(confidence = ?verdict.confidence, "tier-1 rejected image as not food");
        return not_food_response(verdict.confidence, request_id);
    }

    match state.vision.analyze_meal(&payload).await {
        Ok(result) => {
            info!(energy = result.energy_band.label(), "analysis served");
            (StatusCode::OK, axum::Json(result)).into_response()
        }
        Err(e) => upstream_error_response(e, request_id),
    }
}

/// Map an upstream failure: unreachable/timeout is a 503 the client may
/// retry; everything else is a 500. Raw provider text stays in the logs.
fn upstream_error_response(err: vision::Error, request_id: &str) -> Response {
    match err {
        vision::Error::Network(msg) => {
            crate::metrics::record_upstream_error("unreachable");
            error!(error = %msg, "upstream unreachable");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "Analysis service temporarily unavailable",
                request_id,
            )
        }
        other => {
            let label = match &other {
                vision::Error::Status { .. } => "status",
                vision::Error::Parse(_) => "parse",
                _ => "provider",
            };
            crate::metrics::record_upstream_error(label);
            error!(error = %other, "upstream analysis failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "upstream_error",
                "Analysis failed",
                request_id,
            )
        }
    }
}

/// Health endpoint: status, uptime, request counters.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);

    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
    });
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint — text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
