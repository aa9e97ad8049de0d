//! Webhook handlers for GitHub push events

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State as AxumState, rejection::BytesRejection},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

use crate::SharedState;
use crate::error::RedeployError;
use crate::handler::{WebhookOutcome, WebhookRequest};
use crate::payload::EVENT_HEADER;
use crate::signature::SIGNATURE_HEADER;

/// `POST /webhook`, project chosen by the `Host` header.
pub async fn handle_webhook_by_host(
    AxumState(state): AxumState<SharedState>,
    uri: Uri,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejection_response(rejection),
    };
    let host = header_value(&headers, header::HOST.as_str())
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();
    dispatch(state, host, &headers, body).await
}

/// `POST /webhook/{project_id}`, project chosen by the path segment.
pub async fn handle_webhook_by_path(
    AxumState(state): AxumState<SharedState>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejection_response(rejection),
    };
    dispatch(state, project_id, &headers, body).await
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn dispatch(state: SharedState, route_key: String, headers: &HeaderMap, body: Bytes) -> Response {
    let request = WebhookRequest {
        route_key,
        signature: header_value(headers, SIGNATURE_HEADER),
        event_type: header_value(headers, EVENT_HEADER),
        body,
    };

    // directory scan and file writes are blocking
    let result = tokio::task::spawn_blocking(move || state.handler.handle(&request)).await;

    match result {
        Ok(Ok(outcome)) => outcome_response(outcome),
        Ok(Err(e)) => error_response(&e),
        Err(e) => {
            error!("Webhook task panicked or was cancelled: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error" })),
            )
                .into_response()
        }
    }
}

fn outcome_response(outcome: WebhookOutcome) -> Response {
    match outcome {
        WebhookOutcome::Queued { task_id, .. } => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "queued", "task_id": task_id })),
        )
            .into_response(),
        WebhookOutcome::Ignored { reason, .. } => (
            StatusCode::OK,
            Json(json!({ "status": "ignored", "reason": reason.as_str() })),
        )
            .into_response(),
    }
}

/// Body read failures, most often the size limit, as a JSON error.
fn body_rejection_response(rejection: BytesRejection) -> Response {
    let status = rejection.status();
    warn!("Rejected webhook body: {}", rejection.body_text());
    let reason = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "Payload too large"
    } else {
        "Failed to read request body"
    };
    (status, Json(json!({ "error": reason }))).into_response()
}

fn error_response(e: &RedeployError) -> Response {
    (e.status_code(), Json(json!({ "error": e.public_reason() }))).into_response()
}
