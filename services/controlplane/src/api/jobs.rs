//! Job inspection endpoints.
//!
//! # Purpose
//! Lets operators look up the outcome of migrations and clones after the
//! synchronous response, including runs whose caller disconnected.
use crate::api::error::{ApiError, api_internal, api_not_found, api_validation_error};
use crate::api::types::{ErrorResponse, JobListQuery, JobListResponse};
use crate::app::AppState;
use crate::model::{Job, JobFilter};
use crate::store::StoreError;
use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};

#[utoipa::path(
    get,
    path = "/v1/jobs",
    tag = "jobs",
    params(JobListQuery),
    responses(
        (status = 200, description = "Jobs, newest first", body = JobListResponse),
        (status = 400, description = "Unknown status or type filter", body = ErrorResponse)
    )
)]
pub(crate) async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<JobListQuery>, QueryRejection>,
) -> Result<Json<JobListResponse>, ApiError> {
    let Query(query) = query.map_err(|err| api_validation_error(&err.body_text()))?;
    let filter = JobFilter::try_from(query)?;
    let items = state
        .store
        .list_jobs(&filter)
        .await
        .map_err(|err| api_internal("failed to list jobs", &err))?;
    Ok(Json(JobListResponse { items }))
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}",
    tag = "jobs",
    params(
        ("id" = String, Path, description = "Job identifier")
    ),
    responses(
        (status = 200, description = "Job record", body = Job),
        (status = 404, description = "Job not found", body = ErrorResponse)
    )
)]
pub(crate) async fn get_job(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Job>, ApiError> {
    match state.store.get_job(&job_id).await {
        Ok(job) => Ok(Json(job)),
        Err(StoreError::NotFound(_)) => Err(api_not_found("job not found")),
        Err(err) => Err(api_internal("failed to load job", &err)),
    }
}
