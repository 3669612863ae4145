//! Source handlers: status listing, manual trigger, settings reload.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{ReloadResponse, SourceListResponse, SourceStatusDto, TriggerResponse};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, PipelineError};

/// `GET /sources`: Status of every registered source.
///
/// # Errors
///
/// Returns [`PipelineError::Persistence`] if a cursor cannot be read.
#[utoipa::path(
    get,
    path = "/api/v1/sources",
    tag = "Sources",
    summary = "List sources",
    description = "Returns run state, latest run counters, and the committed cursor of every registered source.",
    responses(
        (status = 200, description = "Source status list", body = SourceListResponse),
        (status = 500, description = "Cursor store unavailable", body = ErrorResponse),
    )
)]
pub async fn list_sources(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, PipelineError> {
    let store = state.scheduler.pipeline().store();
    let mut data = Vec::new();
    for status in state.scheduler.statuses().await {
        let cursor = store.load_cursor(&status.name).await?;
        data.push(SourceStatusDto::new(status, cursor.position));
    }

    Ok(Json(SourceListResponse {
        data,
        settings_version: state.settings.current().version,
    }))
}

/// `POST /sources/{name}/trigger`: Request an immediate run.
///
/// A run that is already in flight is not duplicated; the response says
/// `busy` instead.
///
/// # Errors
///
/// Returns [`PipelineError::UnknownSource`] if `name` is not registered.
#[utoipa::path(
    post,
    path = "/api/v1/sources/{name}/trigger",
    tag = "Sources",
    summary = "Trigger a run",
    description = "Starts a run of the named source unless one is already in flight.",
    params(("name" = String, Path, description = "Source name")),
    responses(
        (status = 202, description = "Run started or skipped", body = TriggerResponse),
        (status = 404, description = "Unknown source", body = ErrorResponse),
    )
)]
pub async fn trigger_source(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, PipelineError> {
    let launch = state.scheduler.trigger(&name)?;
    tracing::info!(source = %name, "manual trigger");
    Ok((StatusCode::ACCEPTED, Json(TriggerResponse::new(&name, &launch))))
}

/// `POST /sources/reload`: Re-read source settings from the environment.
#[utoipa::path(
    post,
    path = "/api/v1/sources/reload",
    tag = "Sources",
    summary = "Reload source settings",
    description = "Publishes a new settings version. Runs already in flight keep the version they started with.",
    responses(
        (status = 200, description = "Settings reloaded", body = ReloadResponse),
    )
)]
pub async fn reload_sources(State(state): State<AppState>) -> impl IntoResponse {
    let settings_version = state.settings.reload_from_env();
    let current = state.settings.current();
    let configured = state
        .scheduler
        .configured_sources(&current)
        .map(str::to_string)
        .collect();

    Json(ReloadResponse {
        settings_version,
        configured,
    })
}

/// Source routes, nested under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sources", get(list_sources))
        .route("/sources/reload", post(reload_sources))
        .route("/sources/{name}/trigger", post(trigger_source))
}
