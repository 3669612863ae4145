//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` sits at the
//! root. The OpenAPI document is served at `/api-docs/openapi.json` with
//! Swagger UI at `/swagger-ui` when the `swagger-ui` feature is enabled.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI description of the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "facility-gateway",
        description = "Event ingestion and notification pipeline"
    ),
    paths(
        handlers::system::health_handler,
        handlers::sources::list_sources,
        handlers::sources::trigger_source,
        handlers::sources::reload_sources,
    ),
    components(schemas(
        handlers::system::HealthResponse,
        dto::SourceListResponse,
        dto::SourceStatusDto,
        dto::RunSummaryDto,
        dto::TriggerResponse,
        dto::ReloadResponse,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    )),
    tags(
        (name = "System", description = "Liveness"),
        (name = "Sources", description = "Ingestion sources and their runs"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}
