//! Namespace clone, optionally with a deep copy of every instance's storage.
//!
//! # Purpose
//! Creates a new namespace carrying the source's configuration. A deep clone
//! then copies each instance's storage (phase 1, bounded worker pool, no
//! metadata writes) and records the instances that copied cleanly in one
//! atomic batch (phase 2).
//!
//! # Key invariants
//! - An instance row is written only for an instance whose export and import
//!   both succeeded.
//! - A per-instance storage failure becomes a warning; other instances carry on.
//! - Any other failure after the namespace row exists replays the saga and
//!   removes every row this run created.
//! - Deep clones import into the same admin endpoint under the same object
//!   id; the new namespace is a new logical grouping over that endpoint.
use super::error::{OrchestratorError, OrchestratorResult};
use super::saga::{CloneSaga, Compensation};
use crate::events::{DomainEvent, EventPublisher};
use crate::jobs::JobTracker;
use crate::model::{Instance, JobType, Namespace};
use crate::store::{MetadataStore, StoreError};
use chrono::Utc;
use harbor_admin_client::AdminApi;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;
use utoipa::ToSchema;
use uuid::Uuid;

const PROGRESS_NAMESPACE_CREATED: u8 = 10;
const PROGRESS_STORAGE_DONE: u8 = 80;
const PROGRESS_ROWS_WRITTEN: u8 = 95;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub name: String,
    pub deep_clone: bool,
}

impl CloneRequest {
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::Validation("name is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloneOutcome {
    pub namespace: Namespace,
    pub cloned_from: String,
    /// Present for deep clones only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances_cloned: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct CloneOrchestrator {
    store: Arc<dyn MetadataStore>,
    admin: Arc<dyn AdminApi>,
    jobs: JobTracker,
    events: EventPublisher,
    concurrency: usize,
}

struct StorageCopy {
    index: usize,
    instance: Instance,
    result: Result<(), String>,
}

impl CloneOrchestrator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        admin: Arc<dyn AdminApi>,
        events: EventPublisher,
        concurrency: usize,
    ) -> Self {
        Self {
            jobs: JobTracker::new(store.clone()),
            store,
            admin,
            events,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn clone_namespace(
        &self,
        source_namespace_id: &str,
        request: CloneRequest,
        actor: &str,
    ) -> OrchestratorResult<CloneOutcome> {
        request.validate()?;
        let source = self
            .store
            .get_namespace(source_namespace_id)
            .await
            .map_err(|err| match err {
                StoreError::NotFound(_) => {
                    OrchestratorError::NotFound("source namespace".to_string())
                }
                other => other.into(),
            })?;

        let job = self
            .jobs
            .create(JobType::CloneNamespace, actor, Some(&source.id), None)
            .await?;
        let span = tracing::info_span!(
            "clone_namespace",
            job_id = %job.id,
            source_namespace_id = %source.id,
            name = %request.name,
            deep = request.deep_clone
        );

        let mut saga = CloneSaga::new();
        let result = self
            .run(&job.id, &source, &request, &mut saga)
            .instrument(span.clone())
            .await;
        match result {
            Ok(outcome) => {
                saga.commit();
                self.jobs
                    .complete(
                        &job.id,
                        json!({
                            "namespaceId": outcome.namespace.id,
                            "name": outcome.namespace.name,
                            "clonedFrom": outcome.cloned_from,
                            "deepClone": request.deep_clone,
                            "instancesCloned": outcome.instances_cloned,
                            "warnings": outcome.warnings,
                        }),
                    )
                    .await;
                self.events.publish(DomainEvent::NamespaceCloned {
                    job_id: job.id.clone(),
                    source_namespace_id: source.id.clone(),
                    namespace_id: outcome.namespace.id.clone(),
                    instances_cloned: outcome.instances_cloned,
                });
                Ok(outcome)
            }
            Err(err) => {
                let report = saga.rollback(self.store.as_ref()).await;
                let mut message = err.to_string();
                if !report.is_clean() {
                    message.push_str(&format!(
                        " (rollback left {} record(s) behind)",
                        report.orphaned.len()
                    ));
                }
                self.jobs.fail(&job.id, &message).await;
                tracing::warn!(parent: &span, error = %message, "namespace clone failed");
                self.events.publish(DomainEvent::NamespaceCloneFailed {
                    job_id: job.id.clone(),
                    source_namespace_id: source.id.clone(),
                    name: request.name.clone(),
                    error: message,
                });
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        job_id: &str,
        source: &Namespace,
        request: &CloneRequest,
        saga: &mut CloneSaga,
    ) -> OrchestratorResult<CloneOutcome> {
        let name = request.name.trim().to_string();
        if self.store.find_namespace_by_name(&name).await?.is_some() {
            return Err(OrchestratorError::Conflict(format!(
                "namespace {name} already exists"
            )));
        }
        let endpoint = if request.deep_clone {
            if !source.admin_hook_enabled {
                return Err(OrchestratorError::Validation(
                    "deep clone requires the admin hook to be enabled on the source namespace"
                        .to_string(),
                ));
            }
            let endpoint = source.admin_endpoint().ok_or_else(|| {
                OrchestratorError::Unconfigured(format!(
                    "source namespace {} has no admin endpoint configured",
                    source.name
                ))
            })?;
            Some(endpoint.to_string())
        } else {
            None
        };

        let namespace = self
            .store
            .create_namespace(source.cloned_as(Uuid::new_v4().to_string(), name, Utc::now()))
            .await?;
        saga.record(Compensation::DeleteNamespace {
            namespace_id: namespace.id.clone(),
        });
        self.jobs.advance(job_id, PROGRESS_NAMESPACE_CREATED).await;

        let Some(endpoint) = endpoint else {
            return Ok(CloneOutcome {
                namespace,
                cloned_from: source.id.clone(),
                instances_cloned: None,
                warnings: Vec::new(),
            });
        };

        let instances = self.store.list_instances(&source.id).await?;
        let (copied, warnings) = self.copy_storage(job_id, &endpoint, instances).await;
        self.jobs.advance(job_id, PROGRESS_STORAGE_DONE).await;

        let now = Utc::now();
        let rows: Vec<Instance> = copied
            .into_iter()
            .map(|instance| Instance {
                id: Uuid::new_v4().to_string(),
                namespace_id: namespace.id.clone(),
                last_accessed: None,
                has_alarm: false,
                created_at: now,
                updated_at: now,
                ..instance
            })
            .collect();
        let created = if rows.is_empty() {
            Vec::new()
        } else {
            self.store.create_instances(rows).await?
        };
        for instance in &created {
            saga.record(Compensation::DeleteInstance {
                instance_id: instance.id.clone(),
            });
        }
        self.jobs.advance(job_id, PROGRESS_ROWS_WRITTEN).await;

        Ok(CloneOutcome {
            namespace,
            cloned_from: source.id.clone(),
            instances_cloned: Some(created.len()),
            warnings,
        })
    }

    /// Phase 1: export and re-import every instance with at most
    /// `concurrency` copies in flight. Returns the instances that copied, in
    /// source order, plus one warning per failure.
    async fn copy_storage(
        &self,
        job_id: &str,
        endpoint: &str,
        instances: Vec<Instance>,
    ) -> (Vec<Instance>, Vec<String>) {
        let total = instances.len();
        let names: Vec<String> = instances
            .iter()
            .map(|instance| instance.display_name().to_string())
            .collect();
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for (index, instance) in instances.into_iter().enumerate() {
            let admin = self.admin.clone();
            let permits = permits.clone();
            let endpoint = endpoint.to_string();
            tasks.spawn(
                async move {
                    let result = match permits.acquire_owned().await {
                        Ok(_permit) => copy_instance(admin.as_ref(), &endpoint, &instance).await,
                        Err(_) => Err("worker pool closed".to_string()),
                    };
                    StorageCopy {
                        index,
                        instance,
                        result,
                    }
                }
                .in_current_span(),
            );
        }

        let mut finished = Vec::with_capacity(total);
        let mut panicked = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(copy) => finished.push(copy),
                Err(err) => {
                    panicked += 1;
                    tracing::error!(error = %err, "instance copy task aborted");
                }
            }
            let done = finished.len() + panicked;
            let range = u64::from(PROGRESS_STORAGE_DONE - PROGRESS_NAMESPACE_CREATED);
            let percent =
                u64::from(PROGRESS_NAMESPACE_CREATED) + range * done as u64 / total as u64;
            self.jobs.advance(job_id, percent as u8).await;
        }
        finished.sort_by_key(|copy| copy.index);

        let mut copied = Vec::new();
        let mut warnings = Vec::new();
        if panicked > 0 {
            // An aborted task never returns its index; name whoever is missing.
            let mut reported = vec![false; total];
            for copy in &finished {
                reported[copy.index] = true;
            }
            for (index, name) in names.iter().enumerate() {
                if !reported[index] {
                    metrics::counter!("harbor_clone_instances_total", "outcome" => "failed")
                        .increment(1);
                    warnings.push(format!("instance {name} not cloned: copy task aborted"));
                }
            }
        }
        for copy in finished {
            match copy.result {
                Ok(()) => {
                    metrics::counter!("harbor_clone_instances_total", "outcome" => "copied")
                        .increment(1);
                    copied.push(copy.instance);
                }
                Err(message) => {
                    metrics::counter!("harbor_clone_instances_total", "outcome" => "failed")
                        .increment(1);
                    warnings.push(format!(
                        "instance {} not cloned: {message}",
                        copy.instance.display_name()
                    ));
                }
            }
        }
        (copied, warnings)
    }
}

async fn copy_instance(
    admin: &dyn AdminApi,
    endpoint: &str,
    instance: &Instance,
) -> Result<(), String> {
    let payload = admin
        .export(endpoint, &instance.object_id)
        .await
        .map_err(|err| format!("export failed: {err}"))?;
    admin
        .import(endpoint, &instance.object_id, &payload.data)
        .await
        .map_err(|err| format!("import failed: {err}"))?;
    tracing::debug!(
        object_id = %instance.object_id,
        keys = payload.key_count(),
        "instance storage copied"
    );
    Ok(())
}
