//! Failure taxonomy shared by the migration and clone orchestrators.
use crate::store::StoreError;
use harbor_admin_client::{AdminError, mirrored_status};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{0}")]
    Validation(String),
    #[error("source and target namespace are the same; clone the namespace instead")]
    SameNamespace,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unconfigured(String),
    /// Export or import was rejected by, or never reached, the remote endpoint.
    #[error("{op} failed: {message}")]
    Upstream {
        op: &'static str,
        status: u16,
        message: String,
    },
    #[error("metadata store failure: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl OrchestratorError {
    pub fn upstream(op: &'static str, err: &AdminError) -> Self {
        OrchestratorError::Upstream {
            op,
            status: mirrored_status(err).as_u16(),
            message: err.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "validation_error",
            OrchestratorError::SameNamespace => "same_namespace",
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::Conflict(_) => "conflict",
            OrchestratorError::Unconfigured(_) => "unconfigured",
            OrchestratorError::Upstream { .. } => "upstream_error",
            OrchestratorError::Persistence(_) => "internal",
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => OrchestratorError::NotFound(what),
            StoreError::Conflict(message) => OrchestratorError::Conflict(message),
            StoreError::Unexpected(err) => OrchestratorError::Persistence(err),
        }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
