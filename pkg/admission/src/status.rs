use tracing::debug;

use pkg_constants::paths::GLOBAL_QUOTAS_PREFIX;
use pkg_state::client::{Result, StateStore};
use pkg_state::recorder::Recorder;
use pkg_state::retry::retry_on_conflict;
use pkg_types::event::{EventKind, reason};
use pkg_types::globalquota::GlobalResourceQuota;
use pkg_types::quota::ResourceQuota;
use pkg_types::resource::{Quantity, cap_by_headroom};

use crate::AdmissionResponse;

/// Mutate a status update of a managed ResourceQuota.
///
/// The orchestrator's usage tracker has refreshed `new.status.used`; this
/// handler folds the per-resource delta into the parent quota's global
/// `used`, caps allocations that would overshoot the global hard limit,
/// and rewrites the namespace-visible hard cap to the remaining headroom.
/// The global counter and the admission decision are coupled through one
/// conflict-retried status write, so overshoot stays bounded by the
/// admissions in flight.
pub async fn mutate_status(
    store: &StateStore,
    recorder: &Recorder,
    old: &ResourceQuota,
    new: &ResourceQuota,
) -> Result<AdmissionResponse> {
    let Some((owner, item)) = new.managed_by() else {
        return Ok(AdmissionResponse::allow_unchanged());
    };
    let key = format!("{}{}", GLOBAL_QUOTAS_PREFIX, owner);

    let (response, exceeded) = retry_on_conflict(|| {
        let store = store.clone();
        let key = key.clone();
        async move {
            let Some(raw) = store.get(&key).await? else {
                return Ok((AdmissionResponse::allow_unchanged(), Vec::new()));
            };
            let mut grq: GlobalResourceQuota = serde_json::from_slice(&raw)?;
            if !grq.spec.active {
                return Ok((AdmissionResponse::allow_unchanged(), Vec::new()));
            }
            let Some(space) = grq.quota_space(item) else {
                return Ok((AdmissionResponse::allow_unchanged(), Vec::new()));
            };
            let Some(entry) = grq.status.quota.get(item) else {
                // Not observed by the reconciler yet; nothing to account against.
                return Ok((AdmissionResponse::allow_unchanged(), Vec::new()));
            };

            let mut tenant_used = entry.used.clone();
            let mut patched = new.clone();
            let mut exceeded = Vec::new();

            for (resource, avail) in &space {
                // The namespace may only see what is left globally.
                patched.status.hard.insert(resource.clone(), *avail);

                let old_local = old.status.used.get(resource).copied().unwrap_or_default();
                let new_local = new.status.used.get(resource).copied().unwrap_or(old_local);
                let delta = new_local.saturating_sub(old_local);
                if delta.is_zero() {
                    continue;
                }

                if delta > Quantity::ZERO {
                    let (grant, overflow) = cap_by_headroom(delta, *avail);
                    let used = tenant_used.entry(resource.clone()).or_default();
                    *used = used.saturating_add(grant);
                    if !overflow.is_zero() {
                        // Admit only the residual headroom; keeping the old
                        // cap blocks further allocations downstream.
                        let old_hard =
                            old.status.hard.get(resource).copied().unwrap_or_default();
                        patched.status.hard.insert(resource.clone(), old_hard);
                        exceeded.push(resource.clone());
                    }
                } else {
                    // Consumption decreased; global used never drops below zero.
                    let used = tenant_used.entry(resource.clone()).or_default();
                    *used = used.saturating_add(delta).clamp_non_negative();
                }
            }

            debug!(
                "status mutation for {}/{}: item={} used={:?}",
                new.namespace, new.name, item, tenant_used
            );

            // Nothing accrued or released: no global write to couple with.
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

            Ok((AdmissionResponse::allow_patched(patched), exceeded))
        }
    })
    .await?;

    for resource in exceeded {
        recorder
            .record(
                EventKind::Warning,
                reason::QUOTA_EXCEEDED,
                format!(
                    "global quota {} exhausted for resource {}; allocation capped",
                    owner, resource
                ),
                new.name.clone(),
                Some(new.namespace.clone()),
            )
            .await;
    }

    Ok(response)
}
