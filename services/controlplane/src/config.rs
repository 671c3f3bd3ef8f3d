use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_CLONE_CONCURRENCY: usize = 5;
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_ADMIN_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_ADMIN_CONNECT_TIMEOUT_MS: u64 = 5_000;

// Control plane configuration sourced from environment variables, optionally
// overridden by a YAML file named in HARBOR_CP_CONFIG.
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub admin: AdminConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl AdminConfig {
    pub fn client_config(&self) -> harbor_admin_client::AdminClientConfig {
        harbor_admin_client::AdminClientConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_ADMIN_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_ADMIN_CONNECT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Worker count for the storage phase of a deep clone.
    pub clone_concurrency: usize,
    pub event_channel_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            clone_concurrency: DEFAULT_CLONE_CONCURRENCY,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ControlPlaneConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<StorageBackend>,
    postgres: Option<PostgresConfig>,
    admin_timeout_ms: Option<u64>,
    admin_connect_timeout_ms: Option<u64>,
    clone_concurrency: Option<usize>,
    event_channel_capacity: Option<usize>,
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value.parse().with_context(|| format!("parse {key}")),
        Err(_) => Ok(default),
    }
}

fn parse_storage_backend(value: &str) -> Result<StorageBackend> {
    match value.to_ascii_lowercase().as_str() {
        "memory" => Ok(StorageBackend::Memory),
        "postgres" => Ok(StorageBackend::Postgres),
        other => bail!("unknown storage backend: {other}"),
    }
}

impl ControlPlaneConfig {
    pub fn from_env() -> Result<Self> {
        let metrics_bind: SocketAddr =
            env_parse("HARBOR_CP_METRICS_BIND", SocketAddr::from(([0, 0, 0, 0], 9090)))?;
        let bind_addr: SocketAddr =
            env_parse("HARBOR_CP_BIND", SocketAddr::from(([0, 0, 0, 0], 8080)))?;
        let storage = match std::env::var("HARBOR_CP_STORAGE_BACKEND") {
            Ok(value) => parse_storage_backend(&value)?,
            Err(_) => StorageBackend::Memory,
        };
        let postgres = match std::env::var("HARBOR_CP_POSTGRES_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_parse("HARBOR_CP_POSTGRES_MAX_CONNECTIONS", 10u32)?,
                connect_timeout_ms: env_parse("HARBOR_CP_POSTGRES_CONNECT_TIMEOUT_MS", 5_000u64)?,
                acquire_timeout_ms: env_parse("HARBOR_CP_POSTGRES_ACQUIRE_TIMEOUT_MS", 5_000u64)?,
            }),
            Err(_) => None,
        };
        let admin = AdminConfig {
            request_timeout_ms: env_parse("HARBOR_ADMIN_TIMEOUT_MS", DEFAULT_ADMIN_TIMEOUT_MS)?,
            connect_timeout_ms: env_parse(
                "HARBOR_ADMIN_CONNECT_TIMEOUT_MS",
                DEFAULT_ADMIN_CONNECT_TIMEOUT_MS,
            )?,
        };
        let orchestrator = OrchestratorConfig {
            clone_concurrency: env_parse("HARBOR_CLONE_CONCURRENCY", DEFAULT_CLONE_CONCURRENCY)?,
            event_channel_capacity: env_parse(
                "HARBOR_EVENT_CHANNEL_CAPACITY",
                DEFAULT_EVENT_CHANNEL_CAPACITY,
            )?,
        };
        let config = Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
            admin,
            orchestrator,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("HARBOR_CP_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read HARBOR_CP_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: ControlPlaneConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse control plane config yaml")?;
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value;
        }
        if let Some(value) = override_cfg.postgres {
            self.postgres = Some(value);
        }
        if let Some(value) = override_cfg.admin_timeout_ms {
            self.admin.request_timeout_ms = value;
        }
        if let Some(value) = override_cfg.admin_connect_timeout_ms {
            self.admin.connect_timeout_ms = value;
        }
        if let Some(value) = override_cfg.clone_concurrency {
            self.orchestrator.clone_concurrency = value;
        }
        if let Some(value) = override_cfg.event_channel_capacity {
            self.orchestrator.event_channel_capacity = value;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.orchestrator.clone_concurrency == 0 {
            bail!("clone_concurrency must be at least 1");
        }
        if self.orchestrator.event_channel_capacity == 0 {
            bail!("event_channel_capacity must be at least 1");
        }
        if self.admin.request_timeout_ms == 0 {
            bail!("admin timeout must be positive");
        }
        Ok(())
    }
}
