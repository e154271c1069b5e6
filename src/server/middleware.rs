//! HTTP middleware for keygate
//!
//! This module provides middleware for:
//! - API key checking with failed-attempt lockout per client IP
//! - Restricting routes to authenticated requests
//! - Request/response logging

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::router::AppState;
use crate::auth::{AuthOutcome, Authenticated};
use crate::error::AuthError;

/// Paths that should skip the guard
const AUTH_SKIP_PATHS: &[&str] = &["/health"];

/// Credential and lockout guard
///
/// This middleware:
/// 1. Skips paths in `AUTH_SKIP_PATHS`
/// 2. Rejects clients whose IP is locked out with 429 and `Retry-After`
/// 3. Checks the configured credential header
/// 4. Records a failure and returns 401 for a rejected credential
/// 5. Clears the failure count and marks the request for an accepted one
///
/// Requests without a credential, or with authentication disabled, pass
/// through unmarked.
pub async fn guard_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, AuthResponse> {
    let path = request.uri().path();

    if is_skip_path(path) {
        return Ok(next.run(request).await);
    }

    let client_id = addr.ip().to_string();

    if let Some(retry_after) = state.tracker.status(&client_id).retry_after {
        tracing::debug!(client = %client_id, "Request from locked client refused");
        return Err(AuthResponse::from_error(AuthError::Locked {
            retry_after_secs: ceil_secs(retry_after),
        }));
    }

    let (mut parts, body) = request.into_parts();
    let outcome = state
        .authenticator
        .authenticate_headers(&parts.headers, &mut parts.extensions);

    match outcome {
        AuthOutcome::Rejected => {
            let locked = state.tracker.record_failure(&client_id);
            tracing::warn!(
                client = %client_id,
                locked,
                remaining = state.tracker.remaining_attempts(&client_id),
                "Invalid credential"
            );
            return Err(AuthResponse::from_error(AuthError::Rejected));
        }
        AuthOutcome::Accepted(method) => {
            state.tracker.reset_attempts(&client_id);
            tracing::debug!(client = %client_id, method = ?method, "Request authenticated");
        }
        AuthOutcome::Disabled | AuthOutcome::NoCredential => {}
    }

    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Reject requests the guard did not mark as authenticated
pub async fn require_authenticated(request: Request, next: Next) -> Result<Response, AuthResponse> {
    if request.extensions().get::<Authenticated>().is_none() {
        return Err(AuthResponse::from_error(AuthError::MissingCredential));
    }
    Ok(next.run(request).await)
}

/// Whole-segment match, so `/healthz` is still guarded
fn is_skip_path(path: &str) -> bool {
    AUTH_SKIP_PATHS.iter().any(|skip| {
        path.strip_prefix(skip)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

fn ceil_secs(duration: Duration) -> u64 {
    duration
        .as_secs()
        .saturating_add(u64::from(duration.subsec_nanos() > 0))
}

/// Authentication error response
#[derive(Debug)]
pub struct AuthResponse {
    status: StatusCode,
    message: String,
    retry_after_secs: Option<u64>,
}

impl AuthResponse {
    fn from_error(error: AuthError) -> Self {
        let (status, retry_after_secs) = match &error {
            AuthError::Rejected | AuthError::MissingCredential => (StatusCode::UNAUTHORIZED, None),
            AuthError::Locked { retry_after_secs } => {
                (StatusCode::TOO_MANY_REQUESTS, Some(*retry_after_secs))
            }
        };
        Self {
            status,
            message: error.to_string(),
            retry_after_secs,
        }
    }
}

impl IntoResponse for AuthResponse {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });
        let mut response = (
            self.status,
            [(header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response();

        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Logging middleware function
///
/// Logs request and response details including:
/// - Method and path
/// - Status code
/// - Response time
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        path = %uri.path(),
        status = %status.as_u16(),
        duration_ms = %elapsed.as_millis(),
        "Request completed"
    );

    response
}
