//! Namespace clone endpoint.
use crate::api::error::{ApiError, api_validation_error};
use crate::api::types::{CloneNamespaceRequest, ErrorResponse};
use crate::api::{actor_from_headers, run_detached};
use crate::app::AppState;
use crate::orchestrator::{CloneOutcome, CloneRequest};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};

#[utoipa::path(
    post,
    path = "/v1/namespaces/{id}/clone",
    tag = "namespaces",
    params(
        ("id" = String, Path, description = "Source namespace identifier"),
        ("x-harbor-actor" = Option<String>, Header, description = "Acting identity recorded on the job")
    ),
    request_body = CloneNamespaceRequest,
    responses(
        (status = 201, description = "Namespace cloned", body = CloneOutcome),
        (status = 400, description = "Invalid request or admin hook disabled for deep clone", body = ErrorResponse),
        (status = 404, description = "Source namespace not found", body = ErrorResponse),
        (status = 409, description = "Namespace name already taken", body = ErrorResponse),
        (status = 422, description = "Source namespace has no admin endpoint", body = ErrorResponse)
    )
)]
pub(crate) async fn clone_namespace(
    Path(namespace_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CloneNamespaceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CloneOutcome>), ApiError> {
    let Json(body) = body.map_err(|err| api_validation_error(&err.body_text()))?;
    let request = CloneRequest::try_from(body)?;
    let actor = actor_from_headers(&headers);
    let orchestrator = state.clones.clone();
    let outcome = run_detached(async move {
        orchestrator
            .clone_namespace(&namespace_id, request, &actor)
            .await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}
