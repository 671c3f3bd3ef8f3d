//! Client for the admin API exposed by a namespace's remote instances.
//!
//! # Purpose
//! Every namespace that owns remote stateful instances may publish an admin
//! endpoint. This crate wraps the handful of calls the control plane needs to
//! move storage around: export, import, alarm get/set, and freeze/unfreeze.
//!
//! # Notes
//! - URLs are built as `{base}/admin/{name}/{op}`. A trailing slash on `base`
//!   is ignored and `name` is percent-encoded as one path segment.
//! - There is no retry or backoff here. Callers decide whether a failure is
//!   fatal or a warning.
//! - Every request carries a bounded timeout so an unresponsive endpoint cannot
//!   hang an orchestration.
use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage snapshot returned by the export call and accepted by import.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_count: Option<u64>,
}

impl ExportPayload {
    /// Number of keys held by the exported instance.
    ///
    /// Endpoints are allowed to omit `keyCount`; in that case the top-level
    /// keys of `data` are counted.
    pub fn key_count(&self) -> u64 {
        self.key_count.unwrap_or(self.data.len() as u64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmState {
    /// Scheduled wake time in epoch milliseconds, if any.
    pub alarm: Option<i64>,
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("admin endpoint returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("admin request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("admin response could not be decoded: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("invalid admin endpoint: {0}")]
    InvalidEndpoint(String),
}

impl AdminError {
    /// HTTP status reported by the remote endpoint, when there was one.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            AdminError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type AdminResult<T> = Result<T, AdminError>;

/// Operations the control plane issues against a remote admin endpoint.
///
/// `endpoint` is the namespace's configured admin base URL and `name` the
/// remote instance name (its object id).
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn export(&self, endpoint: &str, name: &str) -> AdminResult<ExportPayload>;
    async fn import(&self, endpoint: &str, name: &str, data: &Map<String, Value>)
    -> AdminResult<()>;
    async fn get_alarm(&self, endpoint: &str, name: &str) -> AdminResult<AlarmState>;
    async fn set_alarm(&self, endpoint: &str, name: &str, timestamp: i64) -> AdminResult<()>;
    async fn freeze(&self, endpoint: &str, name: &str) -> AdminResult<()>;
    async fn unfreeze(&self, endpoint: &str, name: &str) -> AdminResult<()>;
}

#[derive(Debug, Clone)]
pub struct AdminClientConfig {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for AdminClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// `reqwest`-backed [`AdminApi`] implementation.
#[derive(Debug, Clone)]
pub struct HttpAdminClient {
    client: reqwest::Client,
}

impl HttpAdminClient {
    pub fn new(config: &AdminClientConfig) -> AdminResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(AdminError::Transport)?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        name: &str,
        op: &str,
        body: Option<Value>,
    ) -> AdminResult<reqwest::Response> {
        let url = admin_url(endpoint, name, op)?;
        let host = url.host_str().unwrap_or_default().to_string();
        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(|err| {
            tracing::debug!(%host, op, error = %err, "admin request failed");
            AdminError::Transport(err)
        })?;
        let status = response.status();
        tracing::debug!(%host, op, %method, status = status.as_u16(), "admin request");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdminError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl AdminApi for HttpAdminClient {
    async fn export(&self, endpoint: &str, name: &str) -> AdminResult<ExportPayload> {
        let response = self
            .send(Method::GET, endpoint, name, "export", None)
            .await?;
        response.json().await.map_err(AdminError::Decode)
    }

    async fn import(
        &self,
        endpoint: &str,
        name: &str,
        data: &Map<String, Value>,
    ) -> AdminResult<()> {
        let body = serde_json::json!({ "data": data });
        self.send(Method::POST, endpoint, name, "import", Some(body))
            .await?;
        Ok(())
    }

    async fn get_alarm(&self, endpoint: &str, name: &str) -> AdminResult<AlarmState> {
        let response = self.send(Method::GET, endpoint, name, "alarm", None).await?;
        response.json().await.map_err(AdminError::Decode)
    }

    async fn set_alarm(&self, endpoint: &str, name: &str, timestamp: i64) -> AdminResult<()> {
        let body = serde_json::json!({ "timestamp": timestamp });
        self.send(Method::PUT, endpoint, name, "alarm", Some(body))
            .await?;
        Ok(())
    }

    async fn freeze(&self, endpoint: &str, name: &str) -> AdminResult<()> {
        self.send(Method::PUT, endpoint, name, "freeze", None).await?;
        Ok(())
    }

    async fn unfreeze(&self, endpoint: &str, name: &str) -> AdminResult<()> {
        self.send(Method::DELETE, endpoint, name, "freeze", None)
            .await?;
        Ok(())
    }
}

/// Build `{base}/admin/{name}/{op}`.
pub fn admin_url(endpoint: &str, name: &str, op: &str) -> AdminResult<Url> {
    let trimmed = endpoint.trim_end_matches('/');
    let mut url =
        Url::parse(trimmed).map_err(|_| AdminError::InvalidEndpoint(endpoint.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| AdminError::InvalidEndpoint(endpoint.to_string()))?
        .pop_if_empty()
        .extend(["admin", name, op]);
    Ok(url)
}

/// Map an admin failure to the status the control plane should mirror.
///
/// Transport and decode failures have no upstream status and surface as
/// `502 Bad Gateway`.
pub fn mirrored_status(err: &AdminError) -> StatusCode {
    err.upstream_status()
        .and_then(|status| StatusCode::from_u16(status).ok())
        .unwrap_or(StatusCode::BAD_GATEWAY)
}
