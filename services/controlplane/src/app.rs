//! Control-plane HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
//!
//! # Notes
//! This module centralizes route composition to keep `main` small and testable.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::config::OrchestratorConfig;
use crate::events::EventPublisher;
use crate::observability;
use crate::orchestrator::{CloneOrchestrator, MigrationOrchestrator};
use crate::store::MetadataStore;
use axum::{Json, Router};
use harbor_admin_client::AdminApi;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

pub const SERVICE_NAME: &str = "harbor-controlplane";
pub const API_VERSION: &str = "v1";

#[derive(Clone)]
pub struct AppState {
    pub api_version: String,
    pub store: Arc<dyn MetadataStore>,
    pub migrations: MigrationOrchestrator,
    pub clones: CloneOrchestrator,
}

impl AppState {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        admin: Arc<dyn AdminApi>,
        events: EventPublisher,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            migrations: MigrationOrchestrator::new(store.clone(), admin.clone(), events.clone()),
            clones: CloneOrchestrator::new(store.clone(), admin, events, config.clone_concurrency),
            store,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .route(
            "/v1/system/info",
            axum::routing::get(api::system::system_info),
        )
        .route(
            "/v1/system/health",
            axum::routing::get(api::system::system_health),
        )
        .route(
            "/v1/instances/:id/migrate",
            axum::routing::post(api::instances::migrate_instance),
        )
        .route(
            "/v1/namespaces/:id/clone",
            axum::routing::post(api::namespaces::clone_namespace),
        )
        .route("/v1/jobs", axum::routing::get(api::jobs::list_jobs))
        .route("/v1/jobs/:id", axum::routing::get(api::jobs::get_job))
        .route(
            "/v1/openapi.json",
            axum::routing::get(|| async { Json(ApiDoc::openapi()) }),
        )
        .layer(trace_layer)
        .with_state(state)
}
