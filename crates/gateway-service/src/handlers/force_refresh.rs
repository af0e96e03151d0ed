//! Manual force-refresh of a single credential.
//!
//! `POST /v0/management/auth-files/force-refresh` runs the provider's
//! refresh synchronously, outside the background admission gate, and answers
//! with a [`ForceRefreshResponse`] on every outcome.
//!
//! | Outcome                              | Status |
//! |--------------------------------------|--------|
//! | refreshed                            | 200    |
//! | malformed body, missing `auth_id`    | 400    |
//! | provider filter mismatch             | 400    |
//! | no executor for the provider         | 400    |
//! | upstream refresh error               | 400    |
//! | unknown `auth_id`                    | 404    |
//! | refresh already running              | 409    |
//! | executor contract violation          | 500    |
//! | persistence failure                  | 500    |

use crate::models::{ForceRefreshRequest, ForceRefreshResponse};
use crate::observability::metrics::record_force_refresh;
use crate::routes::AppState;
use auth_core::{RefreshError, RefreshErrorKind};
use axum::{extract::State, http::StatusCode, Json};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Handler for `POST /v0/management/auth-files/force-refresh`.
#[instrument(skip_all, name = "gateway.handlers.force_refresh")]
pub async fn force_refresh(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<ForceRefreshResponse>) {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(target: "gateway.handlers", error = %e, "Rejected force-refresh body");
            record_force_refresh("bad_request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ForceRefreshResponse::failure(
                    String::new(),
                    String::new(),
                    "invalid body".to_string(),
                )),
            );
        }
    };

    let auth_id = request.auth_id.as_deref().unwrap_or_default().trim().to_string();
    let provider = request
        .provider
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let provider_filter = (!provider.is_empty()).then_some(provider.as_str());

    // Client disconnects drop this future; shutdown cancels the upstream call.
    let cancel_token = state.shutdown_token.child_token();

    match state
        .manager
        .force_refresh(&auth_id, provider_filter, &cancel_token)
        .await
    {
        Ok(credential) => {
            info!(
                target: "gateway.handlers",
                auth_id = %credential.id,
                provider = %credential.provider,
                "Credential force-refreshed"
            );
            record_force_refresh("success");
            (
                StatusCode::OK,
                Json(ForceRefreshResponse::success(credential)),
            )
        }
        Err(e) => {
            let status = status_for(e.kind());
            warn!(
                target: "gateway.handlers",
                auth_id = %auth_id,
                status = status.as_u16(),
                error = %e,
                "Force refresh failed"
            );
            record_force_refresh(metric_status(e.kind()));

            // Once the record is known, echo its stored identity; otherwise
            // the normalized request values.
            let (echo_id, echo_provider) = match &e {
                RefreshError::MissingId | RefreshError::NotFound => (auth_id, provider),
                _ => match state.manager.get_by_id(&auth_id).await {
                    Some(stored) => (stored.id, stored.provider),
                    None => (auth_id, provider),
                },
            };

            (
                status,
                Json(ForceRefreshResponse::failure(
                    echo_id,
                    echo_provider,
                    e.to_string(),
                )),
            )
        }
    }
}

/// An empty or whitespace-only body is an empty request.
fn parse_request(body: &[u8]) -> Result<ForceRefreshRequest, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ForceRefreshRequest::default());
    }
    serde_json::from_slice(body)
}

fn status_for(kind: RefreshErrorKind) -> StatusCode {
    match kind {
        RefreshErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        RefreshErrorKind::NotFound => StatusCode::NOT_FOUND,
        RefreshErrorKind::Conflict => StatusCode::CONFLICT,
        RefreshErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn metric_status(kind: RefreshErrorKind) -> &'static str {
    match kind {
        RefreshErrorKind::BadRequest => "bad_request",
        RefreshErrorKind::NotFound => "not_found",
        RefreshErrorKind::Conflict => "conflict",
        RefreshErrorKind::Internal => "error",
    }
}
