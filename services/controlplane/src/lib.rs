//! Harbor control-plane library crate.
//!
//! # Purpose
//! Exposes the migration and clone orchestrators, the job tracker, the
//! metadata store backends, configuration and the HTTP API for use by the
//! binary and tests.
//!
//! # Notes
//! Module boundaries mirror the HTTP API and storage backends for clarity.
pub mod api;
pub mod app;
pub mod config;
pub mod events;
pub mod jobs;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod store;
