#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use controlplane::app::{AppState, build_router};
use controlplane::config::OrchestratorConfig;
use controlplane::events::{DomainEvent, EventPublisher};
use controlplane::model::{
    Instance, Job, JobCompletion, JobFilter, Namespace, StorageBackend,
};
use controlplane::store::{MetadataStore, StoreError, StoreResult};
use controlplane::store::memory::InMemoryStore;
use harbor_admin_client::{AdminApi, AdminError, AdminResult, AlarmState, ExportPayload};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const ENDPOINT_A: &str = "http://storage-a.local";
pub const ENDPOINT_B: &str = "http://storage-b.local";

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

type Key = (String, String);

fn key(endpoint: &str, name: &str) -> Key {
    (endpoint.to_string(), name.to_string())
}

#[derive(Default)]
struct FakeState {
    storage: HashMap<Key, Map<String, Value>>,
    alarms: HashMap<Key, i64>,
    frozen: HashSet<Key>,
    export_failures: HashMap<Key, u16>,
    export_panics: HashSet<Key>,
    import_failures: HashMap<Key, u16>,
    alarm_failures: HashSet<Key>,
    freeze_failures: HashSet<Key>,
    import_key_limit: Option<usize>,
    calls: Vec<String>,
}

/// Scripted in-process admin endpoint. Storage is keyed by endpoint and
/// remote instance name.
#[derive(Clone, Default)]
pub struct FakeAdmin {
    state: Arc<Mutex<FakeState>>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake admin lock")
    }

    pub fn seed(&self, endpoint: &str, name: &str, keys: usize) {
        let data = (0..keys)
            .map(|idx| (format!("key-{idx}"), json!(idx)))
            .collect::<Map<String, Value>>();
        self.lock().storage.insert(key(endpoint, name), data);
    }

    pub fn seed_alarm(&self, endpoint: &str, name: &str, timestamp: i64) {
        self.lock().alarms.insert(key(endpoint, name), timestamp);
    }

    pub fn fail_export(&self, endpoint: &str, name: &str, status: u16) {
        self.lock().export_failures.insert(key(endpoint, name), status);
    }

    /// Makes `export` panic, aborting whatever task is running it.
    pub fn panic_on_export(&self, endpoint: &str, name: &str) {
        self.lock().export_panics.insert(key(endpoint, name));
    }

    pub fn fail_import(&self, endpoint: &str, name: &str, status: u16) {
        self.lock().import_failures.insert(key(endpoint, name), status);
    }

    pub fn fail_alarm(&self, endpoint: &str, name: &str) {
        self.lock().alarm_failures.insert(key(endpoint, name));
    }

    pub fn fail_freeze(&self, endpoint: &str, name: &str) {
        self.lock().freeze_failures.insert(key(endpoint, name));
    }

    /// Imports keep only the first `limit` keys, so verification sees fewer.
    pub fn truncate_imports(&self, limit: usize) {
        self.lock().import_key_limit = Some(limit);
    }

    pub fn stored_keys(&self, endpoint: &str, name: &str) -> Option<usize> {
        self.lock().storage.get(&key(endpoint, name)).map(Map::len)
    }

    pub fn alarm(&self, endpoint: &str, name: &str) -> Option<i64> {
        self.lock().alarms.get(&key(endpoint, name)).copied()
    }

    pub fn is_frozen(&self, endpoint: &str, name: &str) -> bool {
        self.lock().frozen.contains(&key(endpoint, name))
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, op: &str, endpoint: &str, name: &str) {
        self.lock().calls.push(format!("{op} {endpoint} {name}"));
    }

    async fn pause(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn upstream(status: u16, body: &str) -> AdminError {
    AdminError::Upstream {
        status,
        body: body.to_string(),
    }
}

#[async_trait]
impl AdminApi for FakeAdmin {
    async fn export(&self, endpoint: &str, name: &str) -> AdminResult<ExportPayload> {
        self.record("export", endpoint, name);
        self.pause().await;
        let panics = self.lock().export_panics.contains(&key(endpoint, name));
        if panics {
            panic!("export of {name} blew up");
        }
        let state = self.lock();
        if let Some(status) = state.export_failures.get(&key(endpoint, name)) {
            return Err(upstream(*status, "export refused"));
        }
        let data = state
            .storage
            .get(&key(endpoint, name))
            .cloned()
            .ok_or_else(|| upstream(404, "no such instance"))?;
        Ok(ExportPayload {
            key_count: Some(data.len() as u64),
            data,
        })
    }

    async fn import(
        &self,
        endpoint: &str,
        name: &str,
        data: &Map<String, Value>,
    ) -> AdminResult<()> {
        self.record("import", endpoint, name);
        self.pause().await;
        let mut state = self.lock();
        if let Some(status) = state.import_failures.get(&key(endpoint, name)) {
            return Err(upstream(*status, "import refused"));
        }
        let mut data = data.clone();
        if let Some(limit) = state.import_key_limit {
            data = data.into_iter().take(limit).collect();
        }
        state.storage.insert(key(endpoint, name), data);
        Ok(())
    }

    async fn get_alarm(&self, endpoint: &str, name: &str) -> AdminResult<AlarmState> {
        self.record("get_alarm", endpoint, name);
        let state = self.lock();
        if state.alarm_failures.contains(&key(endpoint, name)) {
            return Err(upstream(500, "alarm unavailable"));
        }
        Ok(AlarmState {
            alarm: state.alarms.get(&key(endpoint, name)).copied(),
        })
    }

    async fn set_alarm(&self, endpoint: &str, name: &str, timestamp: i64) -> AdminResult<()> {
        self.record("set_alarm", endpoint, name);
        let mut state = self.lock();
        if state.alarm_failures.contains(&key(endpoint, name)) {
            return Err(upstream(500, "alarm unavailable"));
        }
        state.alarms.insert(key(endpoint, name), timestamp);
        Ok(())
    }

    async fn freeze(&self, endpoint: &str, name: &str) -> AdminResult<()> {
        self.record("freeze", endpoint, name);
        let mut state = self.lock();
        if state.freeze_failures.contains(&key(endpoint, name)) {
            return Err(upstream(503, "freeze unavailable"));
        }
        state.frozen.insert(key(endpoint, name));
        Ok(())
    }

    async fn unfreeze(&self, endpoint: &str, name: &str) -> AdminResult<()> {
        self.record("unfreeze", endpoint, name);
        self.lock().frozen.remove(&key(endpoint, name));
        Ok(())
    }
}

pub fn namespace(id: &str, endpoint: Option<&str>, admin_hook_enabled: bool) -> Namespace {
    let now = Utc::now();
    Namespace {
        id: id.to_string(),
        name: format!("{id}-name"),
        class_name: Some("Counter".to_string()),
        script_name: Some("counter-worker".to_string()),
        storage_backend: StorageBackend::Sqlite,
        endpoint_url: endpoint.map(str::to_string),
        admin_hook_enabled,
        color: Some("teal".to_string()),
        created_at: now,
        updated_at: now,
    }
}

pub fn instance(id: &str, namespace_id: &str, name: &str) -> Instance {
    let now = Utc::now();
    Instance {
        id: id.to_string(),
        namespace_id: namespace_id.to_string(),
        name: Some(name.to_string()),
        object_id: name.to_string(),
        last_accessed: None,
        storage_size_bytes: Some(4096),
        has_alarm: false,
        tags: vec!["prod".to_string()],
        color: Some("orange".to_string()),
        created_at: now,
        updated_at: now,
    }
}

/// Delegates to an in-memory store, with switchable failures for instance
/// inserts, deletes and health probes.
pub struct FaultyStore {
    inner: Arc<InMemoryStore>,
    fail_batches: bool,
    fail_instance_inserts: bool,
    fail_deletes: bool,
    fail_health: bool,
}

impl FaultyStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            fail_batches: false,
            fail_instance_inserts: false,
            fail_deletes: false,
            fail_health: false,
        }
    }

    pub fn failing_batches(mut self) -> Self {
        self.fail_batches = true;
        self
    }

    pub fn failing_instance_inserts(mut self) -> Self {
        self.fail_instance_inserts = true;
        self
    }

    /// Namespace and instance deletes fail with an unexpected error.
    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn failing_health(mut self) -> Self {
        self.fail_health = true;
        self
    }
}

#[async_trait]
impl MetadataStore for FaultyStore {
    async fn list_namespaces(&self) -> StoreResult<Vec<Namespace>> {
        self.inner.list_namespaces().await
    }
    async fn get_namespace(&self, id: &str) -> StoreResult<Namespace> {
        self.inner.get_namespace(id).await
    }
    async fn find_namespace_by_name(&self, name: &str) -> StoreResult<Option<Namespace>> {
        self.inner.find_namespace_by_name(name).await
    }
    async fn create_namespace(&self, namespace: Namespace) -> StoreResult<Namespace> {
        self.inner.create_namespace(namespace).await
    }
    async fn delete_namespace(&self, id: &str) -> StoreResult<()> {
        if self.fail_deletes {
            return Err(StoreError::Unexpected(anyhow::anyhow!("delete refused")));
        }
        self.inner.delete_namespace(id).await
    }
    async fn get_instance(&self, id: &str) -> StoreResult<Instance> {
        self.inner.get_instance(id).await
    }
    async fn find_instance_by_name(
        &self,
        namespace_id: &str,
        name: &str,
    ) -> StoreResult<Option<Instance>> {
        self.inner.find_instance_by_name(namespace_id, name).await
    }
    async fn list_instances(&self, namespace_id: &str) -> StoreResult<Vec<Instance>> {
        self.inner.list_instances(namespace_id).await
    }
    async fn create_instance(&self, instance: Instance) -> StoreResult<Instance> {
        if self.fail_instance_inserts {
            return Err(StoreError::Unexpected(anyhow::anyhow!("instance insert aborted")));
        }
        self.inner.create_instance(instance).await
    }
    async fn create_instances(&self, instances: Vec<Instance>) -> StoreResult<Vec<Instance>> {
        if self.fail_batches {
            return Err(StoreError::Unexpected(anyhow::anyhow!("batch insert aborted")));
        }
        self.inner.create_instances(instances).await
    }
    async fn delete_instance(&self, id: &str) -> StoreResult<()> {
        if self.fail_deletes {
            return Err(StoreError::Unexpected(anyhow::anyhow!("delete refused")));
        }
        self.inner.delete_instance(id).await
    }
    async fn create_job(&self, job: Job) -> StoreResult<Job> {
        self.inner.create_job(job).await
    }
    async fn get_job(&self, id: &str) -> StoreResult<Job> {
        self.inner.get_job(id).await
    }
    async fn list_jobs(&self, filter: &JobFilter) -> StoreResult<Vec<Job>> {
        self.inner.list_jobs(filter).await
    }
    async fn update_job_progress(&self, id: &str, progress: u8) -> StoreResult<()> {
        self.inner.update_job_progress(id, progress).await
    }
    async fn finish_job(&self, id: &str, completion: JobCompletion) -> StoreResult<Job> {
        self.inner.finish_job(id, completion).await
    }
    async fn health_check(&self) -> StoreResult<()> {
        if self.fail_health {
            return Err(StoreError::Unexpected(anyhow::anyhow!("database unreachable")));
        }
        self.inner.health_check().await
    }
    fn is_durable(&self) -> bool {
        false
    }
    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub admin: FakeAdmin,
    pub state: AppState,
    pub events: mpsc::Receiver<DomainEvent>,
}

impl Harness {
    pub fn new(admin: FakeAdmin) -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()), admin)
    }

    pub fn with_store(store: Arc<InMemoryStore>, admin: FakeAdmin) -> Self {
        Self::with_dyn_store(store.clone(), store, admin)
    }

    /// `backing` is inspected by assertions; `store` is what the app uses.
    pub fn with_dyn_store(
        store: Arc<dyn MetadataStore>,
        backing: Arc<InMemoryStore>,
        admin: FakeAdmin,
    ) -> Self {
        let (publisher, events) = EventPublisher::channel(64);
        let state = AppState::new(
            store,
            Arc::new(admin.clone()),
            publisher,
            &OrchestratorConfig::default(),
        );
        Self {
            store: backing,
            admin,
            state,
            events,
        }
    }

    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    pub fn drain_events(&mut self) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
