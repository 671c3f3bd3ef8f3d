//! Cross-namespace instance migration.
//!
//! # Purpose
//! Copies one instance's remote storage from its namespace's admin endpoint to
//! another namespace's endpoint, records the new instance, then applies the
//! requested cutover to the source.
//!
//! # Protocol
//! resolve -> name -> export -> import -> alarm copy -> verify -> commit -> cutover.
//! Export and import failures abort the run. Alarm copy, verification and
//! freeze failures only add warnings.
//!
//! # Key invariants
//! - Nothing runs, and no job is written, for a same-namespace request.
//! - The target row is inserted before the source row may be deleted, so the
//!   instance is tracked somewhere at every point of the run.
//! - A failed or inconclusive verification withholds `copy_delete`.
//! - An import that succeeds remotely but fails later leaves the remote copy
//!   in place. There is no remote delete call, so that copy must be removed
//!   by hand; the job error and a warning log name it.
use super::error::{OrchestratorError, OrchestratorResult};
use crate::events::{DomainEvent, EventPublisher};
use crate::jobs::JobTracker;
use crate::model::{Instance, JobType, Namespace};
use crate::store::{MetadataStore, StoreError};
use chrono::Utc;
use harbor_admin_client::AdminApi;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Instrument;
use utoipa::ToSchema;
use uuid::Uuid;

const PROGRESS_RESOLVED: u8 = 10;
const PROGRESS_EXPORTED: u8 = 30;
const PROGRESS_IMPORTED: u8 = 60;
const PROGRESS_ALARMS: u8 = 70;
const PROGRESS_VERIFIED: u8 = 80;
const PROGRESS_COMMITTED: u8 = 90;

/// What happens to the source once the copy is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CutoverMode {
    Copy,
    CopyFreeze,
    CopyDelete,
}

impl CutoverMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CutoverMode::Copy => "copy",
            CutoverMode::CopyFreeze => "copy_freeze",
            CutoverMode::CopyDelete => "copy_delete",
        }
    }
}

impl FromStr for CutoverMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "copy" => Ok(CutoverMode::Copy),
            "copy_freeze" => Ok(CutoverMode::CopyFreeze),
            "copy_delete" => Ok(CutoverMode::CopyDelete),
            other => Err(format!(
                "cutoverMode must be one of copy, copy_freeze, copy_delete (got {other})"
            )),
        }
    }
}

impl fmt::Display for CutoverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRequest {
    pub target_namespace_id: String,
    pub target_instance_name: Option<String>,
    pub cutover_mode: CutoverMode,
    pub migrate_alarms: bool,
    pub run_verification: bool,
}

impl MigrationRequest {
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.target_namespace_id.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "targetNamespaceId is required".to_string(),
            ));
        }
        if self
            .target_instance_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(OrchestratorError::Validation(
                "targetInstanceName must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    /// Explicit name, else the source's display name, else its object id.
    pub fn resolve_target_name(&self, source: &Instance) -> String {
        match self.target_instance_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => source.display_name().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub passed: bool,
    pub source_key_count: u64,
    /// `None` when the target could not be re-exported.
    pub target_key_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOutcome {
    pub success: bool,
    pub new_instance: Instance,
    pub source_frozen: bool,
    pub source_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct MigrationOrchestrator {
    store: Arc<dyn MetadataStore>,
    admin: Arc<dyn AdminApi>,
    jobs: JobTracker,
    events: EventPublisher,
}

struct Endpoints<'a> {
    source: &'a str,
    target: &'a str,
}

impl MigrationOrchestrator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        admin: Arc<dyn AdminApi>,
        events: EventPublisher,
    ) -> Self {
        Self {
            jobs: JobTracker::new(store.clone()),
            store,
            admin,
            events,
        }
    }

    pub async fn migrate(
        &self,
        instance_id: &str,
        request: MigrationRequest,
        actor: &str,
    ) -> OrchestratorResult<MigrationOutcome> {
        let mut request = request;
        request.target_namespace_id = request.target_namespace_id.trim().to_string();
        request.validate()?;
        let source = self
            .store
            .get_instance(instance_id)
            .await
            .map_err(|err| named_not_found(err, "source instance"))?;
        if source.namespace_id == request.target_namespace_id {
            return Err(OrchestratorError::SameNamespace);
        }

        let job = self
            .jobs
            .create(
                JobType::MigrateInstance,
                actor,
                Some(&source.namespace_id),
                Some(&source.id),
            )
            .await?;
        let span = tracing::info_span!(
            "migrate_instance",
            job_id = %job.id,
            instance_id = %source.id,
            target_namespace_id = %request.target_namespace_id,
            cutover = %request.cutover_mode
        );

        match self
            .run(&job.id, &source, &request)
            .instrument(span.clone())
            .await
        {
            Ok((outcome, key_count)) => {
                self.jobs
                    .complete(&job.id, job_result(&source, &request, &outcome, key_count))
                    .await;
                metrics::counter!("harbor_migrations_total", "outcome" => "completed")
                    .increment(1);
                self.events.publish(DomainEvent::InstanceMigrated {
                    job_id: job.id.clone(),
                    source_instance_id: source.id.clone(),
                    target_instance_id: outcome.new_instance.id.clone(),
                    source_namespace_id: source.namespace_id.clone(),
                    target_namespace_id: request.target_namespace_id.clone(),
                    cutover_mode: request.cutover_mode.to_string(),
                });
                Ok(outcome)
            }
            Err(err) => {
                let message = err.to_string();
                self.jobs.fail(&job.id, &message).await;
                metrics::counter!("harbor_migrations_total", "outcome" => "failed").increment(1);
                tracing::warn!(parent: &span, error = %message, "migration failed");
                self.events.publish(DomainEvent::InstanceMigrationFailed {
                    job_id: job.id.clone(),
                    source_instance_id: source.id.clone(),
                    target_namespace_id: request.target_namespace_id.clone(),
                    error: message,
                });
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        job_id: &str,
        source: &Instance,
        request: &MigrationRequest,
    ) -> OrchestratorResult<(MigrationOutcome, u64)> {
        let source_ns = self
            .store
            .get_namespace(&source.namespace_id)
            .await
            .map_err(|err| named_not_found(err, "source namespace"))?;
        let target_ns = self
            .store
            .get_namespace(&request.target_namespace_id)
            .await
            .map_err(|err| named_not_found(err, "target namespace"))?;
        let endpoints = Endpoints {
            source: require_endpoint(&source_ns, "source")?,
            target: require_endpoint(&target_ns, "target")?,
        };
        self.jobs.advance(job_id, PROGRESS_RESOLVED).await;

        let target_name = request.resolve_target_name(source);
        if self
            .store
            .find_instance_by_name(&target_ns.id, &target_name)
            .await?
            .is_some()
        {
            return Err(OrchestratorError::Conflict(format!(
                "instance {target_name} already exists in namespace {}",
                target_ns.name
            )));
        }

        let payload = self
            .admin
            .export(endpoints.source, &source.object_id)
            .await
            .map_err(|err| OrchestratorError::upstream("export", &err))?;
        let source_key_count = payload.key_count();
        tracing::debug!(keys = source_key_count, "source exported");
        self.jobs.advance(job_id, PROGRESS_EXPORTED).await;

        self.admin
            .import(endpoints.target, &target_name, &payload.data)
            .await
            .map_err(|err| {
                tracing::warn!(
                    target_name = %target_name,
                    error = %err,
                    "import failed; target endpoint may hold a partial copy"
                );
                OrchestratorError::upstream("import", &err)
            })?;
        self.jobs.advance(job_id, PROGRESS_IMPORTED).await;

        let mut warnings = Vec::new();
        let alarm_migrated = if request.migrate_alarms && source.has_alarm {
            self.copy_alarm(&endpoints, source, &target_name, &mut warnings)
                .await
        } else {
            false
        };
        self.jobs.advance(job_id, PROGRESS_ALARMS).await;

        let verification = if request.run_verification {
            Some(
                self.verify(endpoints.target, &target_name, source_key_count, &mut warnings)
                    .await,
            )
        } else {
            None
        };
        self.jobs.advance(job_id, PROGRESS_VERIFIED).await;

        let now = Utc::now();
        let new_instance = Instance {
            id: Uuid::new_v4().to_string(),
            namespace_id: target_ns.id.clone(),
            name: Some(target_name.clone()),
            object_id: target_name.clone(),
            last_accessed: None,
            storage_size_bytes: None,
            has_alarm: alarm_migrated,
            tags: Vec::new(),
            color: source.color.clone(),
            created_at: now,
            updated_at: now,
        };
        let new_instance = self
            .store
            .create_instance(new_instance)
            .await
            .map_err(|err| {
                tracing::warn!(
                    target_name = %target_name,
                    error = %err,
                    "target row not written; remote copy left untracked"
                );
                OrchestratorError::from(err)
            })?;
        self.jobs.advance(job_id, PROGRESS_COMMITTED).await;

        let mut source_frozen = false;
        let mut source_deleted = false;
        match request.cutover_mode {
            CutoverMode::Copy => {}
            CutoverMode::CopyFreeze => {
                match self.admin.freeze(endpoints.source, &source.object_id).await {
                    Ok(()) => source_frozen = true,
                    Err(err) => warnings.push(format!("failed to freeze source instance: {err}")),
                }
            }
            CutoverMode::CopyDelete => {
                if verification.as_ref().is_none_or(|result| result.passed) {
                    match self.store.delete_instance(&source.id).await {
                        Ok(()) | Err(StoreError::NotFound(_)) => source_deleted = true,
                        Err(err) => {
                            warnings.push(format!("failed to delete source instance: {err}"))
                        }
                    }
                } else {
                    warnings.push(
                        "source instance kept: verification did not pass, delete withheld"
                            .to_string(),
                    );
                }
            }
        }

        let outcome = MigrationOutcome {
            success: true,
            new_instance,
            source_frozen,
            source_deleted,
            verification,
            warnings,
        };
        Ok((outcome, source_key_count))
    }

    async fn copy_alarm(
        &self,
        endpoints: &Endpoints<'_>,
        source: &Instance,
        target_name: &str,
        warnings: &mut Vec<String>,
    ) -> bool {
        let alarm = match self.admin.get_alarm(endpoints.source, &source.object_id).await {
            Ok(state) => state.alarm,
            Err(err) => {
                warnings.push(format!("failed to read source alarm: {err}"));
                return false;
            }
        };
        let Some(timestamp) = alarm else {
            warnings.push("source reported no scheduled alarm".to_string());
            return false;
        };
        match self
            .admin
            .set_alarm(endpoints.target, target_name, timestamp)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warnings.push(format!("failed to set alarm on target: {err}"));
                false
            }
        }
    }

    async fn verify(
        &self,
        target_endpoint: &str,
        target_name: &str,
        source_key_count: u64,
        warnings: &mut Vec<String>,
    ) -> VerificationResult {
        match self.admin.export(target_endpoint, target_name).await {
            Ok(copy) => {
                let target_key_count = copy.key_count();
                let passed = target_key_count == source_key_count;
                if !passed {
                    warnings.push(format!(
                        "verification failed: source has {source_key_count} keys, target has {target_key_count}"
                    ));
                }
                VerificationResult {
                    passed,
                    source_key_count,
                    target_key_count: Some(target_key_count),
                }
            }
            Err(err) => {
                warnings.push(format!("verification export failed: {err}"));
                VerificationResult {
                    passed: false,
                    source_key_count,
                    target_key_count: None,
                }
            }
        }
    }
}

fn require_endpoint<'a>(namespace: &'a Namespace, role: &str) -> OrchestratorResult<&'a str> {
    namespace.admin_endpoint().ok_or_else(|| {
        OrchestratorError::Unconfigured(format!(
            "{role} namespace {} has no admin endpoint configured",
            namespace.name
        ))
    })
}

fn named_not_found(err: StoreError, what: &str) -> OrchestratorError {
    match err {
        StoreError::NotFound(_) => OrchestratorError::NotFound(what.to_string()),
        other => other.into(),
    }
}

fn job_result(
    source: &Instance,
    request: &MigrationRequest,
    outcome: &MigrationOutcome,
    key_count: u64,
) -> serde_json::Value {
    json!({
        "sourceInstanceId": source.id,
        "sourceName": source.display_name(),
        "sourceNamespaceId": source.namespace_id,
        "targetInstanceId": outcome.new_instance.id,
        "targetName": outcome.new_instance.display_name(),
        "targetNamespaceId": request.target_namespace_id,
        "cutoverMode": request.cutover_mode,
        "sourceFrozen": outcome.source_frozen,
        "sourceDeleted": outcome.source_deleted,
        "keyCount": key_count,
        "verification": outcome.verification,
        "warnings": outcome.warnings,
    })
}
