use tracing::debug;

use pkg_constants::paths::GLOBAL_QUOTAS_PREFIX;
use pkg_state::client::{Result, StateStore};
use pkg_state::retry::retry_on_conflict;
use pkg_types::globalquota::GlobalResourceQuota;
use pkg_types::quota::ResourceQuota;

use crate::AdmissionResponse;

/// Subtract a deleted managed ResourceQuota's usage from the parent
/// quota's global counter.
///
/// Covers the namespace-leaves-selector case, where the controller
/// terminates the quota object and its consumption must be handed back.
/// Idempotent under retry; a missing parent means the GlobalResourceQuota
/// itself is being torn down and the delete is admitted silently.
pub async fn handle_delete(store: &StateStore, old: &ResourceQuota) -> Result<AdmissionResponse> {
    let Some((owner, item)) = old.managed_by() else {
        return Ok(AdmissionResponse::allow_unchanged());
    };
    let key = format!("{}{}", GLOBAL_QUOTAS_PREFIX, owner);

    retry_on_conflict(|| {
        let store = store.clone();
        let key = key.clone();
        async move {
            let Some(raw) = store.get(&key).await? else {
                return Ok(AdmissionResponse::allow_unchanged());
            };
            let mut grq: GlobalResourceQuota = serde_json::from_slice(&raw)?;
            let Some(entry) = grq.status.quota.get_mut(item) else {
                return Ok(AdmissionResponse::allow_unchanged());
            };

            let mut changed = false;
            for (resource, used) in &old.status.used {
                // Resources the aggregate never tracked are ignored.
                let Some(current) = entry.used.get_mut(resource) else {
                    continue;
                };
                let released = current.saturating_sub(*used).clamp_non_negative();
                if released != *current {
                    *current = released;
                    changed = true;
                }
            }

            if changed {
                debug!(
                    "released usage of deleted {}/{} from {}",
                    old.namespace, old.name, owner
                );
                grq.resource_version += 1;
                let updated = serde_json::to_vec(&grq)?;
                store.swap(&key, Some(&raw), &updated).await?;
            }

            Ok(AdmissionResponse::allow_unchanged())
        }
    })
    .await
}
