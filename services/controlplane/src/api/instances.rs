//! Instance migration endpoint.
use crate::api::error::{ApiError, api_validation_error};
use crate::api::types::{ErrorResponse, MigrateInstanceRequest};
use crate::api::{actor_from_headers, run_detached};
use crate::app::AppState;
use crate::orchestrator::{MigrationOutcome, MigrationRequest};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};

#[utoipa::path(
    post,
    path = "/v1/instances/{id}/migrate",
    tag = "instances",
    params(
        ("id" = String, Path, description = "Source instance identifier"),
        ("x-harbor-actor" = Option<String>, Header, description = "Acting identity recorded on the job")
    ),
    request_body = MigrateInstanceRequest,
    responses(
        (status = 201, description = "Instance migrated", body = MigrationOutcome),
        (status = 400, description = "Invalid request or same-namespace migration", body = ErrorResponse),
        (status = 404, description = "Source instance or a namespace not found", body = ErrorResponse),
        (status = 409, description = "Target instance name already taken", body = ErrorResponse),
        (status = 422, description = "Namespace has no admin endpoint", body = ErrorResponse),
        (status = 502, description = "Remote endpoint failed; other upstream statuses are mirrored", body = ErrorResponse)
    )
)]
/// Migrate one instance into another namespace.
///
/// # Errors
/// - 400 before any job exists when the body is invalid or the target is the
///   source's own namespace.
/// - Export and import failures mirror the remote endpoint's status and leave
///   a failed job behind.
pub(crate) async fn migrate_instance(
    Path(instance_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<MigrateInstanceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MigrationOutcome>), ApiError> {
    let Json(body) = body.map_err(|err| api_validation_error(&err.body_text()))?;
    let request = MigrationRequest::try_from(body)?;
    let actor = actor_from_headers(&headers);
    let orchestrator = state.migrations.clone();
    let outcome =
        run_detached(async move { orchestrator.migrate(&instance_id, request, &actor).await })
            .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}
