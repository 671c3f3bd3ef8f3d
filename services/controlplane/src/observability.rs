//! Tracing, trace propagation and Prometheus metrics for the Harbor control plane.
//!
//! # Purpose
//! Installs the `tracing` subscriber (env filter, fmt output, optional OTLP
//! span export), extracts W3C trace context from inbound requests, and serves
//! the Prometheus recorder on its own listener.
//!
//! # Notes
//! Initialization is guarded by `OnceLock`; tests call it repeatedly.
//! Spans leave the process only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_exporter_prometheus::PrometheusHandle;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::propagation::Extractor;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static OBS_INIT: OnceLock<()> = OnceLock::new();
static PROPAGATOR_INIT: OnceLock<()> = OnceLock::new();

pub fn init_observability(service_name: &str) -> PrometheusHandle {
    OBS_INIT.get_or_init(|| {
        global::set_text_map_propagator(
            opentelemetry_sdk::propagation::TraceContextPropagator::new(),
        );

        let provider = build_tracer_provider(service_name);
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer();
        let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);
        if let Some(provider) = provider {
            let tracer = provider.tracer(service_name.to_string());
            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
            let _ = registry.with(otel_layer).try_init();
        } else {
            let _ = registry.try_init();
        }
    });

    let handle = install_metrics_recorder();
    describe_metrics();
    handle
}

fn describe_metrics() {
    metrics::describe_counter!(
        "harbor_migrations_total",
        "Instance migrations by outcome (completed, failed)."
    );
    metrics::describe_counter!(
        "harbor_clone_instances_total",
        "Per-instance storage copies during deep clones by outcome."
    );
    metrics::describe_counter!(
        "harbor_jobs_finished_total",
        "Jobs reaching a terminal state by type and status."
    );
    metrics::describe_counter!(
        "harbor_events_total",
        "Domain events delivered to the dispatcher by kind."
    );
    metrics::describe_counter!(
        "harbor_events_dropped_total",
        "Domain events dropped because the channel was full or closed."
    );
    metrics::describe_gauge!("harbor_namespaces_total", "Namespaces in the metadata store.");
    metrics::describe_gauge!("harbor_instances_total", "Instances in the metadata store.");
}

/// Resource attributes read from the environment, in `(variable, key)` order.
/// The first variable that is set wins for a repeated key.
const RESOURCE_ENV: &[(&str, &str)] = &[
    ("HARBOR_SERVICE_INSTANCE_ID", "service.instance.id"),
    ("HOSTNAME", "service.instance.id"),
    ("HARBOR_DEPLOYMENT_ENVIRONMENT", "deployment.environment"),
    ("DEPLOYMENT_ENVIRONMENT", "deployment.environment"),
    ("K8S_CLUSTER_NAME", "k8s.cluster.name"),
    ("K8S_NAMESPACE_NAME", "k8s.namespace.name"),
    ("K8S_POD_NAME", "k8s.pod.name"),
    ("CLOUD_REGION", "cloud.region"),
];

/// OTLP export is opt-in: without an exporter endpoint spans stay local.
fn build_tracer_provider(
    service_name: &str,
) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT")?;
    let resource = Resource::builder_empty()
        .with_attributes(resource_attributes(service_name))
        .build();
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .ok()?;
    Some(
        opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

fn resource_attributes(service_name: &str) -> Vec<KeyValue> {
    let mut attrs = vec![KeyValue::new("service.name", service_name.to_string())];
    for (var, key) in RESOURCE_ENV {
        if attrs.iter().any(|attr| attr.key.as_str() == *key) {
            continue;
        }
        if let Ok(value) = std::env::var(var) {
            attrs.push(KeyValue::new(*key, value));
        }
    }
    attrs
}

pub fn trace_context_from_headers(headers: &axum::http::HeaderMap) -> opentelemetry::Context {
    PROPAGATOR_INIT.get_or_init(|| {
        global::set_text_map_propagator(
            opentelemetry_sdk::propagation::TraceContextPropagator::new(),
        );
    });
    global::get_text_map_propagator(|prop| prop.extract(&HeaderMapExtractor(headers)))
}

struct HeaderMapExtractor<'a>(&'a axum::http::HeaderMap);

impl<'a> Extractor for HeaderMapExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

pub async fn serve_metrics_with_shutdown<F>(
    handle: PrometheusHandle,
    addr: SocketAddr,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_metrics_with_listener(handle, listener, shutdown).await
}

async fn serve_metrics_with_listener<F>(
    handle: PrometheusHandle,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

fn install_metrics_recorder() -> PrometheusHandle {
    if let Some(handle) = METRICS_HANDLE.get() {
        return handle.clone();
    }
    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(err) => {
            // Another recorder owns the process; keep a detached handle so
            // `/metrics` still answers.
            tracing::warn!(error = %err, "prometheus recorder not installed");
            PrometheusBuilder::new().build_recorder().handle()
        }
    };
    METRICS_HANDLE.get_or_init(|| handle).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{TraceContextExt, TraceId};
    use serial_test::serial;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};
    use tokio::sync::oneshot;

    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn unset(key: &'static str) -> Self {
            let prev = std::env::var(key).ok();
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(value) => unsafe {
                    std::env::set_var(self.key, value);
                },
                None => unsafe {
                    std::env::remove_var(self.key);
                },
            }
        }
    }

    fn attribute_map(attrs: Vec<KeyValue>) -> std::collections::HashMap<String, String> {
        attrs
            .into_iter()
            .map(|attr| (attr.key.as_str().to_string(), attr.value.to_string()))
            .collect()
    }

    #[test]
    #[serial]
    fn resource_attributes_capture_env() {
        let _g1 = EnvGuard::set("HARBOR_SERVICE_INSTANCE_ID", "instance-1");
        let _g2 = EnvGuard::set("K8S_CLUSTER_NAME", "cluster-a");
        let _g3 = EnvGuard::set("K8S_POD_NAME", "pod-a");
        let _g4 = EnvGuard::set("CLOUD_REGION", "eu-west-1");
        let _g5 = EnvGuard::set("HARBOR_DEPLOYMENT_ENVIRONMENT", "staging");
        let _g6 = EnvGuard::set("DEPLOYMENT_ENVIRONMENT", "ignored");
        let _g7 = EnvGuard::unset("K8S_NAMESPACE_NAME");

        let found = attribute_map(resource_attributes("harbor-controlplane"));

        assert_eq!(found["service.name"], "harbor-controlplane");
        assert_eq!(found["service.instance.id"], "instance-1");
        assert_eq!(found["k8s.cluster.name"], "cluster-a");
        assert_eq!(found["k8s.pod.name"], "pod-a");
        assert_eq!(found["cloud.region"], "eu-west-1");
        assert_eq!(found["deployment.environment"], "staging");
        assert!(!found.contains_key("k8s.namespace.name"));
    }

    #[test]
    #[serial]
    fn resource_attributes_hostname_fallback() {
        let _g1 = EnvGuard::unset("HARBOR_SERVICE_INSTANCE_ID");
        let _g2 = EnvGuard::set("HOSTNAME", "host-1");

        let found = attribute_map(resource_attributes("harbor-controlplane"));
        assert_eq!(found["service.instance.id"], "host-1");
    }

    #[test]
    #[serial]
    fn otlp_export_requires_endpoint() {
        let _g = EnvGuard::unset("OTEL_EXPORTER_OTLP_ENDPOINT");
        assert!(build_tracer_provider("harbor-controlplane").is_none());
    }

    #[test]
    fn header_extractor_reads_values() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
                .parse()
                .unwrap(),
        );
        headers.insert("tracestate", "congo=t61rcWkgMzE".parse().unwrap());
        let extractor = HeaderMapExtractor(&headers);

        assert!(extractor.get("traceparent").is_some());
        let keys = extractor.keys();
        assert!(keys.contains(&"traceparent"));
        assert!(keys.contains(&"tracestate"));
    }

    #[test]
    fn header_extractor_ignores_invalid_utf8() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "traceparent",
            axum::http::HeaderValue::from_bytes(b"\xFF").unwrap(),
        );
        let extractor = HeaderMapExtractor(&headers);
        assert!(extractor.get("traceparent").is_none());
    }

    #[test]
    fn trace_context_extracts_span_context() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
                .parse()
                .unwrap(),
        );
        let context = trace_context_from_headers(&headers);
        let binding = context.span();
        let span_ctx = binding.span_context();
        assert!(span_ctx.is_valid());
        assert_eq!(
            span_ctx.trace_id(),
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
        );
    }

    fn build_test_client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("build test client")
    }

    async fn wait_for_listen(addr: SocketAddr) -> Result<(), String> {
        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            if tokio::net::TcpStream::connect(addr).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(format!("server never became ready at {}", addr));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn spawn_metrics_server(
        handle: PrometheusHandle,
    ) -> (
        SocketAddr,
        oneshot::Sender<()>,
        tokio::task::JoinHandle<std::io::Result<()>>,
    ) {
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("parse addr");
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("bind listener");
        let bound_addr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server_handle = tokio::spawn(async move {
            serve_metrics_with_listener(handle, listener, async move {
                let _ = shutdown_rx.await;
            })
            .await
        });
        (bound_addr, shutdown_tx, server_handle)
    }

    #[test]
    #[serial]
    fn install_metrics_recorder_is_cached() {
        let handle1 = install_metrics_recorder();
        let handle2 = install_metrics_recorder();
        let _ = (handle1.render(), handle2.render());
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn init_observability_is_idempotent() {
        let handle1 = init_observability("harbor-controlplane-test");
        let handle2 = init_observability("harbor-controlplane-test");
        let _ = (handle1.render(), handle2.render());
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn serve_metrics_responds() {
        let handle = init_observability("harbor-controlplane-test");
        let (addr, shutdown_tx, server_handle) = spawn_metrics_server(handle).await;
        wait_for_listen(addr).await.expect("server ready");

        let client = build_test_client();
        let url = format!("http://{}/metrics", addr);
        let response = client
            .get(&url)
            .send()
            .await
            .unwrap_or_else(|err| panic!("GET /metrics failed for {}: {}", url, err));

        let body = response
            .error_for_status()
            .expect("metrics status")
            .text()
            .await
            .expect("metrics body");
        assert!(body.is_empty() || body.contains('#') || body.contains("harbor_"));

        let _ = shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(1), server_handle)
            .await
            .expect("server shutdown");
    }
}
