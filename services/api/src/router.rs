//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the record-store
//! service, including the REST API and OpenAPI documentation.

use crate::{
    handlers,
    models::{CreateSessionPayload, ErrorResponse, SessionRecord, UpdateSessionPayload},
    state::AppState,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::list_sessions,
        handlers::get_session,
        handlers::update_session,
    ),
    components(
        schemas(SessionRecord, CreateSessionPayload, UpdateSessionPayload, ErrorResponse)
    ),
    tags(
        (name = "Duet Record Store", description = "Versioned session documents for peer practice coordination")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/sessions/{id}",
            get(handlers::get_session).patch(handlers::update_session),
        )
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Merge the stateful routes with the stateless Swagger UI.
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
