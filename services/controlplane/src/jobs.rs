//! Job lifecycle tracking for orchestrated operations.
//!
//! # Purpose
//! Every migration and clone writes a job record when it starts and settles
//! it when it ends, so the outcome stays inspectable after the HTTP response.
//!
//! # Key invariants
//! - Jobs start `running` with progress 0. This tracker never produces
//!   `pending` or `cancelled`.
//! - `advance` is best-effort; a failed progress write is logged and ignored.
//! - `complete` sets progress 100, `fail` sets progress 0. A job that is
//!   already terminal is left untouched.
use crate::model::{Job, JobCompletion, JobStatus, JobType};
use crate::store::{MetadataStore, StoreResult};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn MetadataStore>,
}

impl JobTracker {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        job_type: JobType,
        actor: &str,
        namespace_id: Option<&str>,
        instance_id: Option<&str>,
    ) -> StoreResult<Job> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            job_type,
            status: JobStatus::Running,
            namespace_id: namespace_id.map(str::to_string),
            instance_id: instance_id.map(str::to_string),
            created_by: Some(actor.to_string()),
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
        };
        let job = self.store.create_job(job).await?;
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            actor,
            "job started"
        );
        Ok(job)
    }

    pub async fn advance(&self, job_id: &str, percent: u8) {
        if let Err(err) = self.store.update_job_progress(job_id, percent.min(100)).await {
            tracing::debug!(job_id, percent, error = %err, "job progress not recorded");
        }
    }

    pub async fn complete(&self, job_id: &str, result: Value) -> Option<Job> {
        self.finish(
            job_id,
            JobCompletion {
                status: JobStatus::Completed,
                progress: 100,
                result: Some(result),
                error: None,
                completed_at: Utc::now(),
            },
        )
        .await
    }

    pub async fn fail(&self, job_id: &str, error: &str) -> Option<Job> {
        self.finish(
            job_id,
            JobCompletion {
                status: JobStatus::Failed,
                progress: 0,
                result: None,
                error: Some(error.to_string()),
                completed_at: Utc::now(),
            },
        )
        .await
    }

    // The operation itself has already finished by the time this runs, so a
    // store failure here is only logged.
    async fn finish(&self, job_id: &str, completion: JobCompletion) -> Option<Job> {
        let status = completion.status;
        match self.store.finish_job(job_id, completion).await {
            Ok(job) => {
                metrics::counter!(
                    "harbor_jobs_finished_total",
                    "type" => job.job_type.as_str(),
                    "status" => status.as_str()
                )
                .increment(1);
                tracing::info!(
                    job_id,
                    job_type = %job.job_type,
                    status = %status,
                    error = job.error.as_deref().unwrap_or(""),
                    "job finished"
                );
                Some(job)
            }
            Err(err) => {
                tracing::error!(job_id, status = %status, error = %err, "job not settled");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    fn tracker() -> (JobTracker, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (JobTracker::new(store.clone()), store)
    }

    #[tokio::test]
    async fn create_starts_running_at_zero() {
        let (tracker, store) = tracker();
        let job = tracker
            .create(JobType::MigrateInstance, "alice", Some("ns-1"), Some("inst-1"))
            .await
            .expect("create");
        let stored = store.get_job(&job.id).await.expect("stored");
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(stored.progress, 0);
        assert_eq!(stored.created_by.as_deref(), Some("alice"));
        assert_eq!(stored.instance_id.as_deref(), Some("inst-1"));
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_none());
    }

    #[tokio::test]
    async fn advance_is_monotonic_and_clamped() {
        let (tracker, store) = tracker();
        let job = tracker
            .create(JobType::CloneNamespace, "bob", Some("ns-1"), None)
            .await
            .expect("create");
        tracker.advance(&job.id, 40).await;
        tracker.advance(&job.id, 20).await;
        assert_eq!(store.get_job(&job.id).await.expect("job").progress, 40);
        tracker.advance(&job.id, 250).await;
        assert_eq!(store.get_job(&job.id).await.expect("job").progress, 100);
    }

    #[tokio::test]
    async fn advance_on_missing_job_is_ignored() {
        let (tracker, _) = tracker();
        tracker.advance("missing", 50).await;
    }

    #[tokio::test]
    async fn complete_sets_result_and_full_progress() {
        let (tracker, _) = tracker();
        let job = tracker
            .create(JobType::MigrateInstance, "alice", None, None)
            .await
            .expect("create");
        let done = tracker
            .complete(&job.id, json!({"keyCount": 5}))
            .await
            .expect("completed");
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.result, Some(json!({"keyCount": 5})));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn terminal_jobs_are_absorbing() {
        let (tracker, store) = tracker();
        let job = tracker
            .create(JobType::MigrateInstance, "alice", None, None)
            .await
            .expect("create");
        let failed = tracker.fail(&job.id, "export failed").await.expect("failed");
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.progress, 0);

        assert!(tracker.complete(&job.id, json!({})).await.is_none());
        tracker.advance(&job.id, 90).await;
        let stored = store.get_job(&job.id).await.expect("job");
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.progress, 0);
        assert_eq!(stored.error.as_deref(), Some("export failed"));
    }
}
