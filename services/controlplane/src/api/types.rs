//! HTTP API request/response types.
//!
//! # Purpose
//! Defines the payload shapes for the Harbor control-plane REST API and its
//! OpenAPI schema. Request bodies keep every field optional so that missing
//! fields produce the API's own `validation_error` instead of a serde
//! rejection.
use crate::api::error::{ApiError, api_validation_error};
use crate::model::{Job, JobFilter, JobStatus, JobType};
use crate::orchestrator::{CloneRequest, CutoverMode, MigrationRequest};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub const DEFAULT_JOB_LIMIT: usize = 50;
pub const MAX_JOB_LIMIT: usize = 500;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SystemInfo {
    pub service: String,
    pub api_version: String,
    pub storage_backend: String,
    pub durable_storage: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct MigrateInstanceRequest {
    pub target_namespace_id: Option<String>,
    pub target_instance_name: Option<String>,
    /// One of `copy`, `copy_freeze`, `copy_delete`.
    pub cutover_mode: Option<String>,
    pub migrate_alarms: Option<bool>,
    pub run_verification: Option<bool>,
}

impl TryFrom<MigrateInstanceRequest> for MigrationRequest {
    type Error = ApiError;

    fn try_from(body: MigrateInstanceRequest) -> Result<Self, Self::Error> {
        let target_namespace_id = body
            .target_namespace_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| api_validation_error("targetNamespaceId is required"))?;
        let cutover_mode = body
            .cutover_mode
            .ok_or_else(|| api_validation_error("cutoverMode is required"))?
            .parse::<CutoverMode>()
            .map_err(|err| api_validation_error(&err))?;
        Ok(MigrationRequest {
            target_namespace_id,
            target_instance_name: body.target_instance_name,
            cutover_mode,
            migrate_alarms: body.migrate_alarms.unwrap_or(false),
            run_verification: body.run_verification.unwrap_or(false),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct CloneNamespaceRequest {
    pub name: Option<String>,
    pub deep_clone: Option<bool>,
}

impl TryFrom<CloneNamespaceRequest> for CloneRequest {
    type Error = ApiError;

    fn try_from(body: CloneNamespaceRequest) -> Result<Self, Self::Error> {
        let name = body
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| api_validation_error("name is required"))?;
        Ok(CloneRequest {
            name,
            deep_clone: body.deep_clone.unwrap_or(false),
        })
    }
}

#[derive(Debug, Deserialize, IntoParams, Default)]
#[into_params(parameter_in = Query)]
pub struct JobListQuery {
    /// Filter by job status.
    pub status: Option<String>,
    /// Filter by job type, e.g. `migrate_instance`.
    #[serde(rename = "type")]
    pub job_type: Option<String>,
    /// Page size, default 50, at most 500.
    pub limit: Option<usize>,
}

impl TryFrom<JobListQuery> for JobFilter {
    type Error = ApiError;

    fn try_from(query: JobListQuery) -> Result<Self, Self::Error> {
        let status = query
            .status
            .map(|value| value.parse::<JobStatus>())
            .transpose()
            .map_err(|err| api_validation_error(&err))?;
        let job_type = query
            .job_type
            .map(|value| value.parse::<JobType>())
            .transpose()
            .map_err(|err| api_validation_error(&err))?;
        let limit = match query.limit {
            Some(0) => return Err(api_validation_error("limit must be at least 1")),
            Some(limit) => limit.min(MAX_JOB_LIMIT),
            None => DEFAULT_JOB_LIMIT,
        };
        Ok(JobFilter {
            status,
            job_type,
            limit,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobListResponse {
    pub items: Vec<Job>,
}
