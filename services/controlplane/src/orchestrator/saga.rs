//! Compensating actions for the clone flow.
//!
//! # Purpose
//! Each metadata write the clone makes is followed by pushing the action that
//! undoes it. On a later failure the log is replayed in reverse.
//!
//! # Key invariants
//! - Compensations only delete rows this run created.
//! - Deleting a row that is already gone counts as done, so a rollback can be
//!   replayed safely.
//! - Rollback never returns an error; rows it could not remove are reported
//!   and logged for out-of-band reconciliation.
use crate::store::{MetadataStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    DeleteInstance { instance_id: String },
    DeleteNamespace { namespace_id: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub undone: usize,
    pub already_absent: usize,
    /// Compensations that failed and left a row behind.
    pub orphaned: Vec<Compensation>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CloneSaga {
    steps: Vec<Compensation>,
}

impl CloneSaga {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Compensation] {
        &self.steps
    }

    /// Forget the recorded steps once the clone has committed.
    pub fn commit(&mut self) {
        self.steps.clear();
    }

    pub async fn rollback(&self, store: &dyn MetadataStore) -> RollbackReport {
        let mut report = RollbackReport::default();
        for step in self.steps.iter().rev() {
            let result = match step {
                Compensation::DeleteInstance { instance_id } => {
                    store.delete_instance(instance_id).await
                }
                Compensation::DeleteNamespace { namespace_id } => {
                    store.delete_namespace(namespace_id).await
                }
            };
            match result {
                Ok(()) => report.undone += 1,
                Err(StoreError::NotFound(_)) => report.already_absent += 1,
                Err(err) => {
                    tracing::error!(
                        step = ?step,
                        error = %err,
                        "clone rollback step failed; record needs manual cleanup"
                    );
                    report.orphaned.push(step.clone());
                }
            }
        }
        if !self.steps.is_empty() {
            tracing::warn!(
                undone = report.undone,
                already_absent = report.already_absent,
                orphaned = report.orphaned.len(),
                "clone rolled back"
            );
        }
        report
    }
}
