use pkg_types::quota::ResourceQuota;

use crate::{AdmissionResponse, Operation, UserInfo};

/// Reason code attached to denials of managed-object mutations.
pub const DENY_REASON: &str = "managed-by-global-quota";

/// Deny user-initiated UPDATE and DELETE on managed ResourceQuotas.
///
/// The objects are owned by the controller; direct edits would desync the
/// global counter. The controller's own identity passes through, as do all
/// operations on unmanaged quotas.
pub fn validate(operation: Operation, user: &UserInfo, quota: &ResourceQuota) -> AdmissionResponse {
    if quota.managed_by().is_none() || user.is_controller() {
        return AdmissionResponse::allow_unchanged();
    }
    match operation {
        Operation::Update | Operation::Delete => AdmissionResponse::deny(DENY_REASON),
        Operation::Create => AdmissionResponse::allow_unchanged(),
    }
}
