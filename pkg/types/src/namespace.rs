use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub phase: NamespacePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle phase of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NamespacePhase {
    #[default]
    Active,
    Terminating,
}

impl Namespace {
    /// Whether the namespace may receive managed quota objects.
    /// Namespaces marked for deletion are out of scope immediately.
    pub fn is_active(&self) -> bool {
        self.phase == NamespacePhase::Active && self.deletion_timestamp.is_none()
    }
}
