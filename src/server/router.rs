//! HTTP router for keygate
//!
//! This module defines the axum router that handles all HTTP requests.
//! It provides routes for:
//! - Health checks
//! - The memoized API document
//! - Administration of the authenticator, the document cache and lockouts

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::middleware::{guard_middleware, logging_middleware, require_authenticated};
use crate::artifact::{CacheStats, DocumentBuilder, MemoizedBuilder};
use crate::auth::{AttemptTracker, AuthSettings, Authenticator, ReadStrategy};
use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// API key authenticator
    pub authenticator: Arc<Authenticator>,

    /// Failed-attempt tracker keyed by client IP
    pub tracker: Arc<AttemptTracker>,

    /// Memoized API document
    pub documents: Arc<MemoizedBuilder<serde_json::Value>>,
}

impl AppState {
    /// Build all components from configuration
    ///
    /// The tracker's background sweep is not started here.
    pub fn from_config(config: &Config) -> Self {
        let settings = AuthSettings::new(
            config.auth.enabled,
            &config.auth.header_name,
            &config.auth.keys,
        );
        let authenticator = Arc::new(Authenticator::with_settings(config.auth.strategy, settings));
        let tracker = Arc::new(AttemptTracker::new(config.lockout.tracker_config()));
        let documents = Arc::new(MemoizedBuilder::with_json_copies(
            DocumentBuilder::from_config(&config.document),
            Duration::from_secs(config.document.ttl_secs),
        ));

        Self {
            authenticator,
            tracker,
            documents,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Authenticator reconfiguration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUpdateRequest {
    pub enabled: bool,

    /// Keeps the current header when absent
    #[serde(default)]
    pub header_name: Option<String>,

    #[serde(default)]
    pub keys: Vec<String>,
}

/// Authenticator status (keys are never echoed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatusResponse {
    pub enabled: bool,
    pub header_name: String,
    pub key_count: usize,
    pub dynamic_validator: bool,
    pub strategy: ReadStrategy,
}

impl AuthStatusResponse {
    fn from_settings(settings: &AuthSettings, strategy: ReadStrategy) -> Self {
        Self {
            enabled: settings.enabled,
            header_name: settings.header_name.clone(),
            key_count: settings.accepted_keys.len(),
            dynamic_validator: settings.dynamic_validator.is_some(),
            strategy,
        }
    }
}

/// Document cache status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentStatusResponse {
    pub fresh: bool,
    pub generation: u64,
    pub ttl_secs: u64,
    pub built_at: Option<DateTime<Utc>>,
    pub stats: CacheStats,
}

/// Lock state of one identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutStatusResponse {
    pub id: String,
    pub locked: bool,
    pub failures: u32,
    pub remaining_attempts: u32,
    pub retry_after_secs: Option<u64>,
}

/// Build the main application router
///
/// Every route except `/health` passes through the guard middleware; the
/// `/admin` routes additionally require an authenticated request.
pub fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/auth", get(get_auth_handler).put(put_auth_handler))
        .route("/admin/document", get(document_status_handler))
        .route(
            "/admin/document/invalidate",
            post(invalidate_document_handler),
        )
        .route(
            "/admin/lockout/:id",
            get(get_lockout_handler).delete(reset_lockout_handler),
        )
        .route_layer(middleware::from_fn(require_authenticated));

    Router::new()
        .route("/health", get(health_handler))
        .route("/openapi.json", get(openapi_handler))
        .merge(admin)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            guard_middleware,
        ))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}

// =============================================================================
// Public Handlers
// =============================================================================

/// Health check endpoint handler
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// API document handler
async fn openapi_handler(State(state): State<AppState>) -> Response {
    match state.documents.get_or_build().await {
        Ok(document) => Json(document.into_owned()).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build API document");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Admin Handlers
// =============================================================================

async fn get_auth_handler(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.authenticator.settings();
    Json(AuthStatusResponse::from_settings(
        &settings,
        state.authenticator.strategy(),
    ))
}

/// Replace the authenticator configuration
///
/// Admin routes need an accepted credential, so a request that would leave
/// none acceptable (disabled, or no keys and no dynamic validator) is
/// refused with 400 instead of locking the admin API out until restart.
async fn put_auth_handler(
    State(state): State<AppState>,
    Json(request): Json<AuthUpdateRequest>,
) -> Response {
    let has_keys = request.keys.iter().any(|key| !key.trim().is_empty());
    let has_validator = state.authenticator.settings().dynamic_validator.is_some();

    if !request.enabled || !(has_keys || has_validator) {
        tracing::warn!(
            enabled = request.enabled,
            keys = request.keys.len(),
            "Refused authenticator update that would lock out the admin API"
        );
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "update must keep authentication enabled with at least one key"
            })),
        )
            .into_response();
    }

    let header_name = request
        .header_name
        .unwrap_or_else(|| state.authenticator.header_name());
    state
        .authenticator
        .configure(request.enabled, &header_name, &request.keys);

    tracing::info!(
        enabled = request.enabled,
        header = %header_name,
        keys = request.keys.len(),
        "Authenticator configuration replaced"
    );

    let settings = state.authenticator.settings();
    Json(AuthStatusResponse::from_settings(
        &settings,
        state.authenticator.strategy(),
    ))
    .into_response()
}

async fn document_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let documents = &state.documents;
    Json(DocumentStatusResponse {
        fresh: documents.is_fresh(),
        generation: documents.generation(),
        ttl_secs: documents.ttl().as_secs(),
        built_at: documents.built_at(),
        stats: documents.stats(),
    })
}

async fn invalidate_document_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.documents.invalidate();
    tracing::info!(
        generation = state.documents.generation(),
        "API document invalidated"
    );
    StatusCode::NO_CONTENT
}

async fn get_lockout_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let status = state.tracker.status(&id);
    Json(LockoutStatusResponse {
        id,
        locked: status.locked,
        failures: status.failures,
        remaining_attempts: status.remaining_attempts,
        retry_after_secs: status.retry_after.map(|d| d.as_secs()),
    })
}

async fn reset_lockout_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    state.tracker.reset_attempts(&id);
    tracing::info!(id = %id, "Lockout reset");
    StatusCode::NO_CONTENT
}
