//! Axum Handlers for the REST API
//!
//! The record store is deliberately dumb: create, query, and a guarded
//! shallow-merge update. Join arbitration and feedback aggregation live in
//! the protocol clients; the only rules enforced here are the ones the store
//! itself owns, version conflicts (409) and status regression (422).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use duet_core::store::StoreError;

use crate::{
    models::{
        CreateSessionPayload, ErrorResponse, ListSessionsQuery, SessionRecord,
        UpdateSessionPayload,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    UnprocessableEntity(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::UnprocessableEntity(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse { message }),
            )
                .into_response(),
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => {
                ApiError::NotFound(format!("Session with id '{}' not found", id))
            }
            StoreError::VersionConflict { expected, .. } => ApiError::Conflict(format!(
                "Version conflict: expected version {} is no longer current",
                expected
            )),
            StoreError::InvalidTransition { from, to } => ApiError::UnprocessableEntity(format!(
                "Illegal status transition {} -> {}",
                from, to
            )),
            StoreError::Unavailable(message) => {
                ApiError::InternalServerError(anyhow::anyhow!(message))
            }
        }
    }
}

/// Open a new practice session.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionPayload,
    responses(
        (status = 201, description = "Session created successfully", body = SessionRecord),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.creator_email.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "creator_email must not be empty".to_string(),
        ));
    }

    let session = state.db.create_session(payload.into()).await?;
    Ok((StatusCode::CREATED, Json(SessionRecord::from(session))))
}

/// List sessions, optionally filtered by module, status or share code.
#[utoipa::path(
    get,
    path = "/sessions",
    params(ListSessionsQuery),
    responses(
        (status = 200, description = "Matching sessions, most recent first", body = [SessionRecord]),
        (status = 400, description = "Bad filter value", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<SessionRecord>>, ApiError> {
    let filter = query.into_filter().map_err(ApiError::BadRequest)?;
    let sessions = state.db.query_sessions(&filter).await?;
    Ok(Json(sessions.into_iter().map(SessionRecord::from).collect()))
}

/// Get a specific session by its ID.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionRecord),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.db.get_session(id).await?;
    Ok((StatusCode::OK, Json(SessionRecord::from(session))))
}

/// Apply a shallow-merge update guarded by the caller's last-read version.
#[utoipa::path(
    patch,
    path = "/sessions/{id}",
    request_body = UpdateSessionPayload,
    responses(
        (status = 200, description = "Updated session", body = SessionRecord),
        (status = 400, description = "Empty patch", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Version conflict, refetch and retry", body = ErrorResponse),
        (status = 422, description = "Illegal status transition", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID")
    )
)]
pub async fn update_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.patch.is_empty() {
        return Err(ApiError::BadRequest(
            "update must change at least one field".to_string(),
        ));
    }

    let session = state
        .db
        .update_session(id, payload.patch, payload.expected_version)
        .await?;
    Ok((StatusCode::OK, Json(SessionRecord::from(session))))
}
