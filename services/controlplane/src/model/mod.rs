//! Control-plane data model module.
//!
//! # Purpose
//! Re-exports the namespace, instance and job records shared by the store,
//! orchestrators and HTTP API.
mod instance;
mod job;
mod namespace;

pub use instance::Instance;
pub use job::{Job, JobCompletion, JobFilter, JobStatus, JobType};
pub use namespace::{Namespace, StorageBackend};
