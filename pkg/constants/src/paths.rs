//! Registry key prefixes.
//!
//! Every object the subsystem touches lives in the registry under one of
//! these prefixes. Keys are formatted at the usage site.

/// Cluster-scoped GlobalResourceQuota objects: `<prefix><name>`.
pub const GLOBAL_QUOTAS_PREFIX: &str = "/registry/globalquotas/";

/// Namespaced ResourceQuota objects: `<prefix><namespace>/<name>`.
pub const RESOURCE_QUOTAS_PREFIX: &str = "/registry/resourcequotas/";

/// Namespace objects: `<prefix><name>`.
pub const NAMESPACES_PREFIX: &str = "/registry/namespaces/";

/// Event records: `<prefix><namespace>/<id>`.
pub const EVENTS_PREFIX: &str = "/registry/events/";
