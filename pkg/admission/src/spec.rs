use tracing::debug;

use pkg_constants::paths::GLOBAL_QUOTAS_PREFIX;
use pkg_state::client::{Result, StateStore};
use pkg_state::retry::retry_on_conflict;
use pkg_types::globalquota::GlobalResourceQuota;
use pkg_types::quota::ResourceQuota;
use pkg_types::resource::cap_by_headroom;

use crate::AdmissionResponse;

/// Mutate a spec update of a managed ResourceQuota.
///
/// An operator (or controller) requesting a higher per-namespace cap gets
/// at most the remaining global headroom. The granted increase is
/// pre-allocated into the parent quota's global `used` in the same retried
/// transaction, so two concurrent spec requests cannot both be granted the
/// same headroom. Decreases are not reclaimed here; freed usage flows back
/// through the status path as real consumption drops.
pub async fn mutate_spec(
    store: &StateStore,
    old: &ResourceQuota,
    new: &ResourceQuota,
) -> Result<AdmissionResponse> {
    let Some((owner, item)) = new.managed_by() else {
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
            if !grq.spec.active {
                return Ok(AdmissionResponse::allow_unchanged());
            }
            let Some(space) = grq.quota_space(item) else {
                return Ok(AdmissionResponse::allow_unchanged());
            };
            let Some(entry) = grq.status.quota.get(item) else {
                return Ok(AdmissionResponse::allow_unchanged());
            };

            let mut tenant_used = entry.used.clone();
            let mut patched = new.clone();

            for (resource, avail) in &space {
                let old_limit = old.status.hard.get(resource).copied().unwrap_or_default();
                let new_limit = new.spec.hard.get(resource).copied().unwrap_or(old_limit);
                let requested = new_limit.saturating_sub(old_limit).clamp_non_negative();
                let (granted, _overflow) = cap_by_headroom(requested, *avail);

                let final_limit = old_limit.saturating_add(granted);
                patched.spec.hard.insert(resource.clone(), final_limit);
                patched.status.hard.insert(resource.clone(), final_limit);

                let used = tenant_used.entry(resource.clone()).or_default();
                *used = used.saturating_add(granted);

                debug!(
                    "spec mutation for {}/{}: resource={} requested={} granted={} final={}",
                    new.namespace, new.name, resource, requested, granted, final_limit
                );
            }

            let changed = grq
                .status
                .quota
                .get(item)
                .is_none_or(|entry| entry.used != tenant_used);
            if changed {
                if let Some(entry) = grq.status.quota.get_mut(item) {
                    entry.used = tenant_used;
                }
                grq.resource_version += 1;
                let updated = serde_json::to_vec(&grq)?;
                store.swap(&key, Some(&raw), &updated).await?;
            }

            Ok(AdmissionResponse::allow_patched(patched))
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{managed_quota, seed_global_quota, status_entry};
    use pkg_types::resource::Quantity;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    async fn read_grq(store: &StateStore, name: &str) -> GlobalResourceQuota {
        let raw = store
            .get(&format!("{}{}", GLOBAL_QUOTAS_PREFIX, name))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    #[tokio::test]
    async fn grants_increase_within_headroom() {
        let store = StateStore::in_memory().await.unwrap();
        seed_global_quota(
            &store,
            "budget",
            &[("cpu", "2")],
            status_entry(&[("cpu", "2")], &[]),
        )
        .await;

        let old = managed_quota("budget", "compute", "a", &[]);
        let mut new = old.clone();
        new.spec.hard.insert("cpu".to_string(), q("1500m"));

        let response = mutate_spec(&store, &old, &new).await.unwrap();
        let patched = response.object.unwrap();
        assert_eq!(patched.spec.hard["cpu"], q("1500m"));
        assert_eq!(patched.status.hard["cpu"], q("1500m"));

        // The grant is pre-allocated so concurrent requests can't double-spend.
        let grq = read_grq(&store, "budget").await;
        assert_eq!(grq.status.quota["compute"].used["cpu"], q("1500m"));
    }

    #[tokio::test]
    async fn clamps_increase_to_headroom() {
        let store = StateStore::in_memory().await.unwrap();
        seed_global_quota(
            &store,
            "budget",
            &[("cpu", "2")],
            status_entry(&[("cpu", "2")], &[("cpu", "1500m")]),
        )
        .await;

        let old = managed_quota("budget", "compute", "b", &[]);
        let mut new = old.clone();
        new.spec.hard.insert("cpu".to_string(), q("1"));

        let response = mutate_spec(&store, &old, &new).await.unwrap();
        let patched = response.object.unwrap();

        // Requested 1 CPU but only 0.5 left: total granted across both
        // namespaces stays within the declared limit of 2.
        assert_eq!(patched.spec.hard["cpu"], q("500m"));
        let grq = read_grq(&store, "budget").await;
        assert_eq!(grq.status.quota["compute"].used["cpu"], q("2"));
    }

    #[tokio::test]
    async fn decrease_is_not_reclaimed_here() {
        let store = StateStore::in_memory().await.unwrap();
        seed_global_quota(
            &store,
            "budget",
            &[("cpu", "2")],
            status_entry(&[("cpu", "2")], &[("cpu", "1")]),
        )
        .await;

        let mut old = managed_quota("budget", "compute", "a", &[]);
        old.status.hard.insert("cpu".to_string(), q("1"));
        let mut new = old.clone();
        new.spec.hard.insert("cpu".to_string(), q("500m"));

        let response = mutate_spec(&store, &old, &new).await.unwrap();
        let patched = response.object.unwrap();
        assert_eq!(patched.spec.hard["cpu"], q("1"));

        let grq = read_grq(&store, "budget").await;
        assert_eq!(grq.status.quota["compute"].used["cpu"], q("1"));
    }
}
