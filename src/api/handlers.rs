//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{encode_reply, ErrorResponse, SessionView, UssdRequest};
use super::AppState;
use crate::runtime::{EngineError, SessionStore, SubmissionStore};
use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use std::collections::HashMap;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Aggregator callback, either method
        .route("/ussd", get(ussd_query).post(ussd_form))
        // Operator views
        .route("/api/sessions/:transaction_id", get(get_session))
        .route("/api/notifications/stream", get(stream_notifications))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Gateway
// ============================================================

async fn ussd_query(
    State(state): State<AppState>,
    params: Result<Query<HashMap<String, String>>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(params) = params.map_err(|e| AppError::NotFound(e.body_text()))?;
    serve_ussd(&state, &params).await
}

async fn ussd_form(
    State(state): State<AppState>,
    params: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Result<Response, AppError> {
    let Form(params) = params.map_err(|e| AppError::NotFound(e.body_text()))?;
    serve_ussd(&state, &params).await
}

async fn serve_ussd(
    state: &AppState,
    params: &HashMap<String, String>,
) -> Result<Response, AppError> {
    let request = UssdRequest::from_params(params).map_err(|e| {
        tracing::warn!(error = %e, "Rejected gateway request");
        AppError::NotFound(e.to_string())
    })?;

    tracing::debug!(
        transaction_id = %request.transaction_id,
        transaction_time = %request.transaction_time,
        response = ?request.response,
        "Gateway request"
    );

    let reply = state
        .runtime
        .handle_input(request.new_session(), request.request_string)
        .await?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        encode_reply(&reply),
    )
        .into_response())
}

// ============================================================
// Operator Views
// ============================================================

async fn get_session(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let storage = state.runtime.storage();
    let session = storage
        .find_session(&transaction_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("Session not found: {transaction_id}")))?;
    let history = storage
        .history(session.id)
        .await
        .map_err(AppError::Internal)?;
    let submissions = storage
        .submissions(session.id)
        .await
        .map_err(AppError::Internal)?;

    Ok(Json(SessionView {
        session,
        history,
        submissions,
    }))
}

async fn stream_notifications(State(state): State<AppState>) -> impl IntoResponse {
    sse_stream(state.runtime.subscribe())
}

async fn get_version() -> &'static str {
    concat!("ussd-engine ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    NotFound(String),
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
