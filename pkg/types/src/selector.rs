use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::globalquota::GlobalResourceQuota;
use crate::namespace::Namespace;
use pkg_constants::labels::TENANT_LABEL;

/// One entry in a GlobalResourceQuota's selector list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalQuotaSelector {
    /// Only consider namespaces that are part of a tenant. Namespaces that
    /// match the selector but carry no tenant label are ignored.
    #[serde(default = "default_tenant")]
    pub tenant: bool,
    #[serde(flatten)]
    pub kind: SelectorKind,
}

fn default_tenant() -> bool {
    true
}

/// How a selector entry picks namespaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// Label-based selection.
    Labels(LabelSelector),
    /// Explicit namespace-name list.
    Names(Vec<String>),
}

impl GlobalQuotaSelector {
    /// Whether this entry selects the namespace.
    pub fn matches(&self, ns: &Namespace) -> bool {
        if self.tenant && !ns.labels.contains_key(TENANT_LABEL) {
            return false;
        }
        match &self.kind {
            SelectorKind::Labels(selector) => selector.matches(&ns.labels),
            SelectorKind::Names(names) => names.iter().any(|name| name == &ns.name),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub match_labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: LabelOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl LabelSelector {
    /// An empty selector matches everything.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        for (key, value) in &self.match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
        for requirement in &self.match_expressions {
            let value = labels.get(&requirement.key);
            let ok = match requirement.operator {
                LabelOperator::In => value.is_some_and(|v| requirement.values.contains(v)),
                LabelOperator::NotIn => value.is_none_or(|v| !requirement.values.contains(v)),
                LabelOperator::Exists => value.is_some(),
                LabelOperator::DoesNotExist => value.is_none(),
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

/// Resolve the ordered, deduplicated namespace set the selector entries
/// match. Entries are evaluated in order and the first matching entry wins;
/// namespaces being deleted are skipped.
pub fn matching_namespaces<'a>(
    selectors: &[GlobalQuotaSelector],
    namespaces: &'a [Namespace],
) -> Vec<&'a Namespace> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut matched = Vec::new();
    for selector in selectors {
        for ns in namespaces {
            if !ns.is_active() || seen.contains(ns.name.as_str()) {
                continue;
            }
            if selector.matches(ns) {
                seen.insert(ns.name.as_str());
                matched.push(ns);
            }
        }
    }
    matched
}

/// Reverse lookup: every GlobalResourceQuota whose selectors match the
/// namespace or that currently tracks it in status. Bounds the reconcile
/// fan-in on namespace events.
pub fn quotas_for_namespace<'a>(
    quotas: &'a [GlobalResourceQuota],
    ns: &Namespace,
) -> Vec<&'a GlobalResourceQuota> {
    quotas
        .iter()
        .filter(|quota| {
            quota.status.namespaces.iter().any(|name| name == &ns.name)
                || quota.spec.selectors.iter().any(|s| s.matches(ns))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
        Namespace {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            phase: Default::default(),
            deletion_timestamp: None,
            created_at: Utc::now(),
        }
    }

    fn label_entry(tenant: bool, key: &str, value: &str) -> GlobalQuotaSelector {
        GlobalQuotaSelector {
            tenant,
            kind: SelectorKind::Labels(LabelSelector {
                match_labels: HashMap::from([(key.to_string(), value.to_string())]),
                match_expressions: vec![],
            }),
        }
    }

    #[test]
    fn tenant_filter_requires_tenant_label() {
        let entry = label_entry(true, "env", "dev");
        let plain = make_namespace("a", &[("env", "dev")]);
        let tenanted = make_namespace("b", &[("env", "dev"), (TENANT_LABEL, "acme")]);

        assert!(!entry.matches(&plain));
        assert!(entry.matches(&tenanted));
    }

    #[test]
    fn names_variant_matches_exactly() {
        let entry = GlobalQuotaSelector {
            tenant: false,
            kind: SelectorKind::Names(vec!["dev".to_string(), "staging".to_string()]),
        };
        assert!(entry.matches(&make_namespace("dev", &[])));
        assert!(!entry.matches(&make_namespace("prod", &[])));
    }

    #[test]
    fn match_expressions() {
        let selector = LabelSelector {
            match_labels: HashMap::new(),
            match_expressions: vec![
                LabelSelectorRequirement {
                    key: "tier".to_string(),
                    operator: LabelOperator::In,
                    values: vec!["gold".to_string(), "silver".to_string()],
                },
                LabelSelectorRequirement {
                    key: "legacy".to_string(),
                    operator: LabelOperator::DoesNotExist,
                    values: vec![],
                },
            ],
        };
        let good = HashMap::from([("tier".to_string(), "gold".to_string())]);
        let wrong_tier = HashMap::from([("tier".to_string(), "bronze".to_string())]);
        let legacy = HashMap::from([
            ("tier".to_string(), "gold".to_string()),
            ("legacy".to_string(), "1".to_string()),
        ]);

        assert!(selector.matches(&good));
        assert!(!selector.matches(&wrong_tier));
        assert!(!selector.matches(&legacy));
    }

    #[test]
    fn first_matching_entry_wins_and_dedups() {
        let selectors = vec![
            label_entry(false, "env", "dev"),
            GlobalQuotaSelector {
                tenant: false,
                kind: SelectorKind::Labels(LabelSelector::default()),
            },
        ];
        let namespaces = vec![
            make_namespace("a", &[("env", "dev")]),
            make_namespace("b", &[]),
        ];

        let matched = matching_namespaces(&selectors, &namespaces);
        let names: Vec<&str> = matched.iter().map(|ns| ns.name.as_str()).collect();
        // "a" matched by the first entry only once, "b" picked up by the
        // catch-all second entry.
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn reverse_lookup_by_selector_or_status() {
        use crate::globalquota::{GlobalResourceQuota, GlobalResourceQuotaSpec};

        let mut by_selector = GlobalResourceQuota {
            name: "by-selector".to_string(),
            resource_version: 0,
            finalizers: vec![],
            deletion_timestamp: None,
            spec: GlobalResourceQuotaSpec {
                active: true,
                selectors: vec![label_entry(false, "env", "dev")],
                items: Default::default(),
            },
            status: Default::default(),
            created_at: Utc::now(),
        };
        let mut by_status = by_selector.clone();
        by_status.name = "by-status".to_string();
        by_status.spec.selectors.clear();
        by_status.status.namespaces = vec!["dev-ns".to_string()];
        by_selector.status.namespaces.clear();

        let quotas = vec![by_selector, by_status];
        let ns = make_namespace("dev-ns", &[("env", "dev")]);
        let hits = quotas_for_namespace(&quotas, &ns);
        let names: Vec<&str> = hits.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["by-selector", "by-status"]);

        let unrelated = make_namespace("other", &[]);
        assert!(quotas_for_namespace(&quotas, &unrelated).is_empty());
    }

    #[test]
    fn terminating_namespaces_are_skipped() {
        let selectors = vec![GlobalQuotaSelector {
            tenant: false,
            kind: SelectorKind::Labels(LabelSelector::default()),
        }];
        let mut terminating = make_namespace("dying", &[]);
        terminating.phase = crate::namespace::NamespacePhase::Terminating;
        let namespaces = vec![terminating, make_namespace("alive", &[])];

        let matched = matching_namespaces(&selectors, &namespaces);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "alive");
    }
}
