use anyhow::{Result, bail};

use crate::globalquota::GlobalResourceQuota;
use crate::quota::item_object_name;

/// Validate a Kubernetes-style resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Validate a quota item name. Item names follow the resource-name rules
/// but are capped at 20 characters so the prefixed managed-object name
/// stays well under the orchestrator's limit.
pub fn validate_item_name(name: &str) -> Result<()> {
    if name.len() > 20 {
        bail!(
            "item name '{}' exceeds 20 characters (got {})",
            name,
            name.len()
        );
    }
    validate_name(name)
}

/// Validate a GlobalResourceQuota before it is persisted.
pub fn validate_global_quota(quota: &GlobalResourceQuota) -> Result<()> {
    validate_name(&quota.name)?;
    for (item, spec) in &quota.spec.items {
        validate_item_name(item)?;
        for (resource, quantity) in &spec.hard {
            if quantity.is_negative() {
                bail!(
                    "item '{}': hard limit for '{}' must not be negative",
                    item,
                    resource
                );
            }
        }
        let object_name = item_object_name(&quota.name, item);
        if object_name.len() > 253 {
            bail!(
                "item '{}': managed object name '{}' exceeds 253 characters",
                item,
                object_name
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globalquota::{GlobalResourceQuotaSpec, QuotaItemSpec};
    use crate::resource::Quantity;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn valid_names() {
        assert!(validate_name("nginx").is_ok());
        assert!(validate_name("my-app").is_ok());
        assert!(validate_name("app-123").is_ok());
        assert!(validate_name("a").is_ok());
        assert!(validate_name("a-b-c-d").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("My-App").is_err());
        assert!(validate_name("my_app").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name("special!char").is_err());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn item_names_are_short() {
        assert!(validate_item_name("compute").is_ok());
        assert!(validate_item_name(&"a".repeat(20)).is_ok());
        assert!(validate_item_name(&"a".repeat(21)).is_err());
        assert!(validate_item_name("Compute").is_err());
    }

    #[test]
    fn global_quota_validation() {
        let mut grq = GlobalResourceQuota {
            name: "budget".to_string(),
            resource_version: 0,
            finalizers: vec![],
            deletion_timestamp: None,
            spec: GlobalResourceQuotaSpec {
                active: true,
                selectors: vec![],
                items: BTreeMap::from([(
                    "compute".to_string(),
                    QuotaItemSpec {
                        hard: [("cpu".to_string(), Quantity::from_units(2))].into(),
                        ..Default::default()
                    },
                )]),
            },
            status: Default::default(),
            created_at: Utc::now(),
        };
        assert!(validate_global_quota(&grq).is_ok());

        grq.spec.items.insert(
            "Bad-Item".to_string(),
            QuotaItemSpec::default(),
        );
        assert!(validate_global_quota(&grq).is_err());
    }
}
