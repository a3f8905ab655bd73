//! axum router and request handlers.
//!
//! Routes:
//! - `GET|POST /{org}/{repo}/authorize?action=write` - Authorization decision
//! - `POST /webhook`                                - GitHub webhook receiver
//! - `GET  /healthz`                                - Health check
//! - `GET  /metrics`                                - Prometheus metrics

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument, warn};

use crate::auth::preauth::{self, PreauthorizedHeaders};
use crate::auth::{Action, AuthDecision, AuthError, Credential};
use crate::forge::RepoRef;
use crate::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/{org}/{repo}/authorize",
            get(handle_authorize).post(handle_authorize),
        )
        .route("/webhook", post(handle_webhook))
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AuthorizeQuery {
    action: Option<Action>,
}

#[derive(Debug, Serialize)]
struct AuthorizeResponse {
    #[serde(flatten)]
    decision: AuthDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    preauthorized_headers: Option<PreauthorizedHeaders>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    cached_credentials: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    authority_rate_limit_remaining: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET|POST /{org}/{repo}/authorize?action=read|read-meta|write`
///
/// Answers 200 with the decision when allowed, 403 when denied and 401 when
/// the credential is missing or rejected outright.
#[instrument(skip_all, fields(%org, %repo))]
async fn handle_authorize(
    State(state): State<Arc<AppState>>,
    Path((org, repo)): Path<(String, String)>,
    Query(query): Query<AuthorizeQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    // Callers may pass "repo.git" from a git URL.
    let repo = RepoRef::new(org, repo.trim_end_matches(".git"));
    let action = query.action.unwrap_or(Action::Write);
    let credential = extract_credential(&headers);

    let decision = state
        .authorizer
        .authorize(credential.as_ref(), &repo, action)
        .await
        .map_err(|e| {
            warn!(error = %e, "authentication failed");
            AppError::Unauthorized(e)
        })?;

    let status = if decision.allowed {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    let preauthorized_headers = decision
        .identity
        .as_deref()
        .filter(|_| decision.allowed)
        .and_then(|identity| preauth::authz_header(identity, &repo, &[action]));

    Ok((
        status,
        Json(AuthorizeResponse {
            decision,
            preauthorized_headers,
        }),
    )
        .into_response())
}

/// `POST /webhook`
async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    crate::auth::webhook::handle_webhook_payload(&state, &headers, &body)
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        cached_credentials: state.authorizer.cache().len(),
        authority_rate_limit_remaining: state.authorizer.rate_limit_remaining(),
    })
}

/// `GET /metrics`
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let buf = state
        .metrics
        .encode()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn extract_credential(headers: &HeaderMap) -> Option<Credential> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(Credential::from_authorization_header)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// The caller is not authenticated.
    Unauthorized(AuthError),
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthorized(err) => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"forgeauth\"")],
                err.to_string(),
            )
                .into_response(),
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {err:#}"),
                )
                    .into_response()
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
