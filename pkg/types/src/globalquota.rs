use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::namespace::Namespace;
use crate::quota::ScopeSelector;
use crate::resource::{ResourceList, quota_space};
use crate::selector::GlobalQuotaSelector;

/// Cluster-scoped resource budget spanning every namespace its selectors
/// match. The controller materializes one managed ResourceQuota per
/// (quota, item, namespace) and keeps the per-namespace caps shaped so the
/// summed consumption cannot exceed the declared hard limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalResourceQuota {
    pub name: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub spec: GlobalResourceQuotaSpec,
    #[serde(default)]
    pub status: GlobalResourceQuotaStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalResourceQuotaSpec {
    /// When false the managed ResourceQuotas are removed and admission
    /// handlers no longer intervene.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Ordered namespace selectors; the first matching entry wins.
    #[serde(default)]
    pub selectors: Vec<GlobalQuotaSelector>,
    /// Named sub-budgets, each with its own hard resource limits.
    #[serde(default)]
    pub items: BTreeMap<String, QuotaItemSpec>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaItemSpec {
    #[serde(default)]
    pub hard: ResourceList,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_selector: Option<ScopeSelector>,
}

/// Observed state. `quota` tracks the (hard, used) pair per item where
/// `used` is the sum over every in-scope namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalResourceQuotaStatus {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub quota: BTreeMap<String, QuotaEntryStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaEntryStatus {
    #[serde(default)]
    pub hard: ResourceList,
    #[serde(default)]
    pub used: ResourceList,
}

impl GlobalResourceQuota {
    /// Remaining global headroom for one item: `max(0, hard - used)` per
    /// resource from the status row, falling back to the declared
    /// `spec.hard` verbatim when the item has never been observed.
    /// `None` for items the spec does not declare.
    pub fn quota_space(&self, item: &str) -> Option<ResourceList> {
        if let Some(entry) = self.status.quota.get(item) {
            return Some(quota_space(&entry.hard, &entry.used));
        }
        self.spec.items.get(item).map(|spec| spec.hard.clone())
    }

    /// Headroom plus the caller's own already-counted usage. A namespace
    /// recomputing its cap must not have its own consumption subtracted
    /// twice: the cap it may see is whatever is left globally plus what it
    /// already holds.
    pub fn aggregated_quota_space(
        &self,
        item: &str,
        local_used: &ResourceList,
    ) -> Option<ResourceList> {
        let mut space = self.quota_space(item)?;
        for (name, quantity) in space.iter_mut() {
            if let Some(own) = local_used.get(name) {
                *quantity = quantity.saturating_add(*own);
            }
        }
        Some(space)
    }

    /// Record the in-scope namespace set: active namespaces only, sorted.
    pub fn assign_namespaces(&mut self, namespaces: &[Namespace]) {
        let mut names: Vec<String> = namespaces
            .iter()
            .filter(|ns| ns.is_active())
            .map(|ns| ns.name.clone())
            .collect();
        names.sort();
        self.status.size = names.len() as u64;
        self.status.namespaces = names;
    }

    pub fn marked_for_deletion(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}
