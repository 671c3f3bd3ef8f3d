//! Domain events emitted by the orchestrators.
//!
//! # Purpose
//! Orchestrators announce finished migrations and clones without waiting on
//! whoever consumes the notification. Events go onto a bounded channel and a
//! separate dispatcher task drains it.
//!
//! # Key invariants
//! - `EventPublisher::publish` never blocks and never fails the caller; a
//!   full or closed channel drops the event with a warning.
//! - The dispatcher only observes events. Delivery to external hooks is
//!   handled elsewhere.
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    #[serde(rename_all = "camelCase")]
    InstanceMigrated {
        job_id: String,
        source_instance_id: String,
        target_instance_id: String,
        source_namespace_id: String,
        target_namespace_id: String,
        cutover_mode: String,
    },
    #[serde(rename_all = "camelCase")]
    InstanceMigrationFailed {
        job_id: String,
        source_instance_id: String,
        target_namespace_id: String,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    NamespaceCloned {
        job_id: String,
        source_namespace_id: String,
        namespace_id: String,
        instances_cloned: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    NamespaceCloneFailed {
        job_id: String,
        source_namespace_id: String,
        name: String,
        error: String,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::InstanceMigrated { .. } => "instance.migrated",
            DomainEvent::InstanceMigrationFailed { .. } => "instance.migration_failed",
            DomainEvent::NamespaceCloned { .. } => "namespace.cloned",
            DomainEvent::NamespaceCloneFailed { .. } => "namespace.clone_failed",
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            DomainEvent::InstanceMigrated { job_id, .. }
            | DomainEvent::InstanceMigrationFailed { job_id, .. }
            | DomainEvent::NamespaceCloned { job_id, .. }
            | DomainEvent::NamespaceCloneFailed { job_id, .. } => job_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<DomainEvent>,
}

impl EventPublisher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DomainEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn publish(&self, event: DomainEvent) {
        if let Err(err) = self.tx.try_send(event) {
            let (reason, event) = match err {
                mpsc::error::TrySendError::Full(event) => ("full", event),
                mpsc::error::TrySendError::Closed(event) => ("closed", event),
            };
            metrics::counter!("harbor_events_dropped_total", "reason" => reason).increment(1);
            tracing::warn!(
                kind = event.kind(),
                job_id = event.job_id(),
                reason,
                "domain event dropped"
            );
        }
    }
}

/// Drains the event channel until every publisher is dropped.
pub fn spawn_event_dispatcher(mut rx: mpsc::Receiver<DomainEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            metrics::counter!("harbor_events_total", "kind" => event.kind()).increment(1);
            let payload = serde_json::to_string(&event).unwrap_or_default();
            tracing::info!(
                kind = event.kind(),
                job_id = event.job_id(),
                payload = %payload,
                "domain event"
            );
        }
        tracing::debug!("event dispatcher stopped");
    })
}
