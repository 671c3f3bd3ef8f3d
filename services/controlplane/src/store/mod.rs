//! Metadata store abstraction.
//!
//! # Purpose
//! Defines the relational metadata surface the orchestrators depend on:
//! namespaces, instances and jobs. Two backends implement it, `memory` for
//! development and tests and `postgres` for durable deployments.
//!
//! # Key invariants
//! - `create_instances` is atomic: either every row in the batch is written or
//!   none is.
//! - `finish_job` refuses to move a job that is already terminal.
//! - `update_job_progress` only raises progress of a running job.
//! - Deletes report `NotFound` for absent rows; callers that need idempotent
//!   deletes treat that as a no-op.
use crate::model::{Instance, Job, JobCompletion, JobFilter, Namespace};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unexpected(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(err.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn list_namespaces(&self) -> StoreResult<Vec<Namespace>>;
    async fn get_namespace(&self, id: &str) -> StoreResult<Namespace>;
    async fn find_namespace_by_name(&self, name: &str) -> StoreResult<Option<Namespace>>;
    async fn create_namespace(&self, namespace: Namespace) -> StoreResult<Namespace>;
    async fn delete_namespace(&self, id: &str) -> StoreResult<()>;

    async fn get_instance(&self, id: &str) -> StoreResult<Instance>;
    async fn find_instance_by_name(
        &self,
        namespace_id: &str,
        name: &str,
    ) -> StoreResult<Option<Instance>>;
    async fn list_instances(&self, namespace_id: &str) -> StoreResult<Vec<Instance>>;
    async fn create_instance(&self, instance: Instance) -> StoreResult<Instance>;
    async fn create_instances(&self, instances: Vec<Instance>) -> StoreResult<Vec<Instance>>;
    async fn delete_instance(&self, id: &str) -> StoreResult<()>;

    async fn create_job(&self, job: Job) -> StoreResult<Job>;
    async fn get_job(&self, id: &str) -> StoreResult<Job>;
    async fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<Job>>;
    async fn update_job_progress(&self, id: &str, progress: u8) -> StoreResult<()>;
    async fn finish_job(&self, id: &str, completion: JobCompletion) -> StoreResult<Job>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
