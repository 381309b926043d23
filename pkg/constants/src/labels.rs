//! Label keys and identities used by the global-quota subsystem.

/// Label on a managed ResourceQuota naming the GlobalResourceQuota that owns it.
pub const MANAGED_BY_LABEL: &str = "quotad.io/managed-by-global-quota";

/// Label on a managed ResourceQuota naming the quota item it enforces.
pub const ITEM_LABEL: &str = "quotad.io/global-quota-item";

/// Namespaces carrying this label are part of a tenant.
pub const TENANT_LABEL: &str = "quotad.io/tenant";

/// Finalizer keeping a GlobalResourceQuota around until its managed
/// ResourceQuotas are garbage-collected.
pub const GLOBAL_QUOTA_FINALIZER: &str = "quotad.io/finalizer";

/// Identity the controller authenticates as against the API.
/// Admission validation lets this identity mutate managed objects.
pub const CONTROLLER_IDENTITY: &str = "system:quotad-controller";

/// Prefix of every managed ResourceQuota object name:
/// `<prefix>-<globalquota>-<item>`.
pub const OBJECT_NAME_PREFIX: &str = "quotad";
