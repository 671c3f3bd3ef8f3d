//! In-memory implementation of the metadata store.
//!
//! # Purpose
//! This store implements the `MetadataStore` trait entirely in memory using `HashMap`s guarded
//! by `tokio::sync::RwLock`. It exists for:
//! - local development and tests (no external dependencies)
//! - deployments where durability is not required
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Single-process consistency**: write locks for mutations, read locks for reads.
//! - **Batch atomicity**: `create_instances` validates the whole batch and inserts it under a
//!   single write lock, so readers observe either none or all of the rows.
//!
//! # Performance characteristics
//! - Lookups by name scan the instance map; fine for dev-sized workloads.
//! - Deleting a namespace cascades to its instances by scanning keys.
use super::{MetadataStore, StoreError, StoreResult};
use crate::model::{Instance, Job, JobCompletion, JobFilter, Namespace};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory metadata store.
///
/// All maps are wrapped in `Arc<RwLock<...>>` so the store can be shared across request
/// handlers and orchestration tasks. When more than one map is locked, the order is always
/// namespaces, then instances, then jobs.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    /// Namespaces keyed by id.
    namespaces: Arc<RwLock<HashMap<String, Namespace>>>,
    /// Instances keyed by id.
    instances: Arc<RwLock<HashMap<String, Instance>>>,
    /// Jobs keyed by id.
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn instance_conflicts(existing: &Instance, candidate: &Instance) -> bool {
    if existing.namespace_id != candidate.namespace_id {
        return false;
    }
    existing.object_id == candidate.object_id
        || candidate
            .name
            .as_deref()
            .is_some_and(|name| existing.name.as_deref() == Some(name))
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn list_namespaces(&self) -> StoreResult<Vec<Namespace>> {
        let mut items: Vec<_> = self.namespaces.read().await.values().cloned().collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    async fn get_namespace(&self, id: &str) -> StoreResult<Namespace> {
        self.namespaces
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("namespace".into()))
    }

    async fn find_namespace_by_name(&self, name: &str) -> StoreResult<Option<Namespace>> {
        Ok(self
            .namespaces
            .read()
            .await
            .values()
            .find(|ns| ns.name == name)
            .cloned())
    }

    async fn create_namespace(&self, namespace: Namespace) -> StoreResult<Namespace> {
        let mut namespaces = self.namespaces.write().await;
        if namespaces.contains_key(&namespace.id)
            || namespaces.values().any(|ns| ns.name == namespace.name)
        {
            return Err(StoreError::Conflict("namespace exists".into()));
        }
        namespaces.insert(namespace.id.clone(), namespace.clone());
        metrics::gauge!("harbor_namespaces_total").set(namespaces.len() as f64);
        Ok(namespace)
    }

    async fn delete_namespace(&self, id: &str) -> StoreResult<()> {
        let mut namespaces = self.namespaces.write().await;
        if namespaces.remove(id).is_none() {
            return Err(StoreError::NotFound("namespace".into()));
        }
        metrics::gauge!("harbor_namespaces_total").set(namespaces.len() as f64);
        // Cascading delete: instances never outlive their namespace.
        let mut instances = self.instances.write().await;
        instances.retain(|_, instance| instance.namespace_id != id);
        metrics::gauge!("harbor_instances_total").set(instances.len() as f64);
        Ok(())
    }

    async fn get_instance(&self, id: &str) -> StoreResult<Instance> {
        self.instances
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("instance".into()))
    }

    async fn find_instance_by_name(
        &self,
        namespace_id: &str,
        name: &str,
    ) -> StoreResult<Option<Instance>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .find(|instance| instance.namespace_id == namespace_id && instance.answers_to(name))
            .cloned())
    }

    async fn list_instances(&self, namespace_id: &str) -> StoreResult<Vec<Instance>> {
        let mut items: Vec<_> = self
            .instances
            .read()
            .await
            .values()
            .filter(|instance| instance.namespace_id == namespace_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.object_id.cmp(&b.object_id));
        Ok(items)
    }

    async fn create_instance(&self, instance: Instance) -> StoreResult<Instance> {
        let mut created = self.create_instances(vec![instance]).await?;
        created
            .pop()
            .ok_or_else(|| StoreError::Unexpected(anyhow::anyhow!("empty batch result")))
    }

    async fn create_instances(&self, batch: Vec<Instance>) -> StoreResult<Vec<Instance>> {
        // Validate the whole batch before touching the map so a failure leaves no partial writes.
        let namespaces = self.namespaces.read().await;
        let mut instances = self.instances.write().await;
        let mut seen_ids = HashSet::new();
        for (idx, candidate) in batch.iter().enumerate() {
            if !namespaces.contains_key(&candidate.namespace_id) {
                return Err(StoreError::NotFound("namespace".into()));
            }
            if !seen_ids.insert(candidate.id.as_str()) || instances.contains_key(&candidate.id) {
                return Err(StoreError::Conflict("instance exists".into()));
            }
            let clashes_existing = instances
                .values()
                .any(|existing| instance_conflicts(existing, candidate));
            let clashes_batch = batch[..idx]
                .iter()
                .any(|earlier| instance_conflicts(earlier, candidate));
            if clashes_existing || clashes_batch {
                return Err(StoreError::Conflict("instance exists".into()));
            }
        }
        for instance in &batch {
            instances.insert(instance.id.clone(), instance.clone());
        }
        metrics::gauge!("harbor_instances_total").set(instances.len() as f64);
        Ok(batch)
    }

    async fn delete_instance(&self, id: &str) -> StoreResult<()> {
        let mut instances = self.instances.write().await;
        if instances.remove(id).is_none() {
            return Err(StoreError::NotFound("instance".into()));
        }
        metrics::gauge!("harbor_instances_total").set(instances.len() as f64);
        Ok(())
    }

    async fn create_job(&self, job: Job) -> StoreResult<Job> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict("job exists".into()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: &str) -> StoreResult<Job> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("job".into()))
    }

    async fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        let mut items: Vec<_> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        // Newest first; id breaks ties so ordering is stable across calls.
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        items.truncate(filter.limit);
        Ok(items)
    }

    async fn update_job_progress(&self, id: &str, progress: u8) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound("job".into()))?;
        if job.status.is_terminal() {
            return Err(StoreError::Conflict("job is terminal".into()));
        }
        job.progress = job.progress.max(progress.min(100));
        Ok(())
    }

    async fn finish_job(&self, id: &str, completion: JobCompletion) -> StoreResult<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound("job".into()))?;
        if job.status.is_terminal() {
            return Err(StoreError::Conflict("job is terminal".into()));
        }
        job.status = completion.status;
        job.progress = completion.progress.min(100);
        job.result = completion.result;
        job.error = completion.error;
        job.completed_at = Some(completion.completed_at);
        Ok(job.clone())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
