//! Control-plane HTTP API module.
//!
//! # Purpose
//! Exposes route handler modules plus the helpers they share: reading the
//! acting identity and running an orchestration detached from the request.
pub mod error;
pub mod instances;
pub mod jobs;
pub mod namespaces;
pub mod openapi;
pub mod system;
pub mod types;

use crate::api::error::{ApiError, api_internal_message};
use crate::orchestrator::OrchestratorResult;
use axum::http::HeaderMap;
use std::future::Future;

pub const ACTOR_HEADER: &str = "x-harbor-actor";
const ANONYMOUS_ACTOR: &str = "anonymous";

pub(crate) fn actor_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(ANONYMOUS_ACTOR)
        .to_string()
}

/// Run an orchestration on its own task.
///
/// Dropping the returned future (client disconnect) detaches the task instead
/// of cancelling it, so a migration or clone that has started always runs to
/// completion or hard failure and settles its job.
pub(crate) async fn run_detached<T, F>(operation: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: Future<Output = OrchestratorResult<T>> + Send + 'static,
{
    match tokio::spawn(operation).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(err) => {
            tracing::error!(error = %err, "orchestration task aborted");
            Err(api_internal_message("orchestration task aborted"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::OrchestratorError;
    use axum::http::StatusCode;

    #[test]
    fn actor_defaults_to_anonymous() {
        let mut headers = HeaderMap::new();
        assert_eq!(actor_from_headers(&headers), "anonymous");
        headers.insert(ACTOR_HEADER, " ops@example.com ".parse().unwrap());
        assert_eq!(actor_from_headers(&headers), "ops@example.com");
        headers.insert(ACTOR_HEADER, "".parse().unwrap());
        assert_eq!(actor_from_headers(&headers), "anonymous");
    }

    #[tokio::test]
    async fn run_detached_maps_errors() {
        let ok = run_detached(async { Ok::<_, OrchestratorError>(7) }).await;
        assert_eq!(ok.expect("ok"), 7);
        let err = run_detached(async { Err::<(), _>(OrchestratorError::SameNamespace) })
            .await
            .expect_err("err");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn run_detached_survives_caller_drop() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let pending = run_detached(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let _ = tx.send(());
            Ok::<_, OrchestratorError>(())
        });
        // Poll once so the task is spawned, then drop the caller's future.
        let _ = tokio::time::timeout(std::time::Duration::from_millis(1), pending).await;
        tokio::time::timeout(std::time::Duration::from_secs(1), rx)
            .await
            .expect("task finished")
            .expect("signal");
    }
}
