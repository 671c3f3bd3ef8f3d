//! Multi-step orchestration over the metadata store and remote admin endpoints.
//!
//! # Purpose
//! `migrate` moves one instance between namespaces; `clone` duplicates a
//! namespace and, for deep clones, its instances' storage. Both record a job
//! for every run that gets past request validation and publish a domain event
//! when it ends.
pub mod clone;
pub mod error;
pub mod migrate;
pub mod saga;

pub use clone::{CloneOrchestrator, CloneOutcome, CloneRequest};
pub use error::{OrchestratorError, OrchestratorResult};
pub use migrate::{
    CutoverMode, MigrationOrchestrator, MigrationOutcome, MigrationRequest, VerificationResult,
};
pub use saga::{CloneSaga, Compensation, RollbackReport};
