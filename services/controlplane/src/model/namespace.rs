//! Namespace model definitions.
//!
//! # Purpose
//! A namespace groups remote stateful instances that share one admin endpoint
//! and one remote class/script configuration.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Sqlite,
    Kv,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Sqlite => "sqlite",
            StorageBackend::Kv => "kv",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sqlite" => Ok(StorageBackend::Sqlite),
            "kv" => Ok(StorageBackend::Kv),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub id: String,
    pub name: String,
    pub class_name: Option<String>,
    pub script_name: Option<String>,
    pub storage_backend: StorageBackend,
    /// Admin API base URL; export/import require it.
    pub endpoint_url: Option<String>,
    pub admin_hook_enabled: bool,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Namespace {
    /// Configured admin endpoint, ignoring blank values.
    pub fn admin_endpoint(&self) -> Option<&str> {
        self.endpoint_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Copy of this namespace's configuration under a new id and name.
    pub fn cloned_as(&self, id: String, name: String, now: DateTime<Utc>) -> Namespace {
        Namespace {
            id,
            name,
            class_name: self.class_name.clone(),
            script_name: self.script_name.clone(),
            storage_backend: self.storage_backend,
            endpoint_url: self.endpoint_url.clone(),
            admin_hook_enabled: self.admin_hook_enabled,
            color: self.color.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}
