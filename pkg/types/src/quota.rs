use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::resource::ResourceList;
use pkg_constants::labels::{ITEM_LABEL, MANAGED_BY_LABEL, OBJECT_NAME_PREFIX};

/// Per-namespace resource quota — the orchestrator's enforcement primitive.
///
/// Managed instances (created by the global-quota controller) carry the
/// managed-by and item labels plus an owner reference to their
/// GlobalResourceQuota. `spec.hard` is the cap currently granted to the
/// namespace; `status.used` is written by the orchestrator's usage tracker
/// and is the authoritative consumption input for global aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_ref: Option<String>,
    pub spec: ResourceQuotaSpec,
    #[serde(default)]
    pub status: ResourceQuotaStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuotaSpec {
    #[serde(default)]
    pub hard: ResourceList,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_selector: Option<ScopeSelector>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuotaStatus {
    #[serde(default)]
    pub hard: ResourceList,
    #[serde(default)]
    pub used: ResourceList,
}

/// Scope constraints handed through to the quota primitive untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeSelector {
    #[serde(default)]
    pub match_expressions: Vec<ScopedSelectorRequirement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedSelectorRequirement {
    pub scope_name: String,
    pub operator: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl ResourceQuota {
    /// The (global quota, item) pair a managed object belongs to, or `None`
    /// for plain user-created quotas.
    pub fn managed_by(&self) -> Option<(&str, &str)> {
        let owner = self.labels.get(MANAGED_BY_LABEL)?;
        let item = self.labels.get(ITEM_LABEL)?;
        if owner.is_empty() || item.is_empty() {
            return None;
        }
        Some((owner.as_str(), item.as_str()))
    }
}

/// Deterministic name of the managed ResourceQuota enforcing `item` of a
/// GlobalResourceQuota inside one namespace.
pub fn item_object_name(global_quota: &str, item: &str) -> String {
    format!("{}-{}-{}", OBJECT_NAME_PREFIX, global_quota, item)
}
