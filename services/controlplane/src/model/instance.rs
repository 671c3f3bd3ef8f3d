//! Instance model definitions.
//!
//! # Purpose
//! An instance is one remote stateful object, addressed on its namespace's
//! admin endpoint by an opaque object id.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub namespace_id: String,
    pub name: Option<String>,
    pub object_id: String,
    pub last_accessed: Option<DateTime<Utc>>,
    pub storage_size_bytes: Option<i64>,
    pub has_alarm: bool,
    pub tags: Vec<String>,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// Display name, falling back to the object id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.object_id)
    }

    /// Whether `name` identifies this instance within its namespace.
    pub fn answers_to(&self, name: &str) -> bool {
        self.object_id == name || self.name.as_deref() == Some(name)
    }
}
