use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use pkg_constants::labels::{ITEM_LABEL, MANAGED_BY_LABEL};
use pkg_constants::paths::{GLOBAL_QUOTAS_PREFIX, NAMESPACES_PREFIX, RESOURCE_QUOTAS_PREFIX};
use pkg_metrics::MetricsRegistry;
use pkg_state::client::{StateError, StateStore};
use pkg_state::recorder::Recorder;
use pkg_state::retry::retry_on_conflict;
use pkg_types::event::{EventKind, reason};
use pkg_types::globalquota::{GlobalResourceQuota, GlobalResourceQuotaStatus, QuotaEntryStatus};
use pkg_types::namespace::Namespace;
use pkg_types::quota::{ResourceQuota, ResourceQuotaSpec, item_object_name};
use pkg_types::resource::{Quantity, ResourceList};
use pkg_state::watch::WatchEvent;
use pkg_types::selector::{matching_namespaces, quotas_for_namespace};

/// Gauge: summed usage per (quota, item, resource), in units.
pub const USAGE_GAUGE: &str = "globalquota_resource_usage";
/// Gauge: declared hard limit per (quota, item, resource), in units.
pub const LIMIT_GAUGE: &str = "globalquota_resource_limit";
const RECONCILE_COUNTER: &str = "globalquota_reconciles_total";

/// Controller reconciling GlobalResourceQuotas into per-namespace
/// ResourceQuota objects.
///
/// Each pass resolves the matching namespace set, garbage-collects managed
/// quotas whose item or namespace left the declaration, re-derives the
/// global usage sums, fans out create-or-update of the managed objects
/// with freshly shaped caps, and writes the aggregate status back.
/// Reconciles of a single quota never overlap: the controller runs one
/// pass at a time, serially over all quotas.
pub struct GlobalQuotaController {
    store: StateStore,
    metrics: Arc<MetricsRegistry>,
    recorder: Recorder,
    resync_interval: Duration,
    fanout_limit: usize,
    shutdown: watch::Receiver<bool>,
}

enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

impl GlobalQuotaController {
    pub fn new(
        store: StateStore,
        metrics: Arc<MetricsRegistry>,
        shutdown: watch::Receiver<bool>,
        resync_interval: Duration,
        fanout_limit: usize,
    ) -> Self {
        metrics.register_gauge(USAGE_GAUGE, "Summed global usage per quota item resource");
        metrics.register_gauge(LIMIT_GAUGE, "Declared global limit per quota item resource");
        metrics.register_counter(RECONCILE_COUNTER, "Completed reconcile passes");
        let recorder = Recorder::new(store.clone());
        Self {
            store,
            metrics,
            recorder,
            resync_interval,
            fanout_limit,
            shutdown,
        }
    }

    /// Start the controller loop as a background task. Reconciles run on a
    /// periodic resync tick and whenever a quota or namespace key changes.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "GlobalQuotaController started (resync={}s, fanout={})",
                self.resync_interval.as_secs(),
                self.fanout_limit
            );
            let mut shutdown = self.shutdown.clone();
            let mut event_rx = self.store.event_log.subscribe();
            let mut interval = tokio::time::interval(self.resync_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.reconcile_all().await {
                            warn!("GlobalQuotaController reconcile error: {}", e);
                        }
                    }
                    result = event_rx.recv() => {
                        match result {
                            Ok(ref event)
                                if event.matches_prefix(GLOBAL_QUOTAS_PREFIX)
                                    || event.matches_prefix(NAMESPACES_PREFIX) =>
                            {
                                // A lone namespace change reconciles only
                                // the quotas the reverse index points at;
                                // anything else falls back to a full pass.
                                let target = namespace_event_target(event);
                                let mut full = target.is_none();
                                while let Ok(more) = event_rx.try_recv() {
                                    if more.matches_prefix(GLOBAL_QUOTAS_PREFIX)
                                        || more.matches_prefix(NAMESPACES_PREFIX)
                                    {
                                        full = true;
                                    }
                                }
                                let outcome = match (&target, full) {
                                    (Some(ns), false) => self.reconcile_for_namespace(ns).await,
                                    _ => self.reconcile_all().await,
                                };
                                if let Err(e) = outcome {
                                    warn!("GlobalQuotaController reconcile error: {}", e);
                                }
                                while event_rx.try_recv().is_ok() {}
                                interval.reset();
                            }
                            Ok(_) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                                if let Err(e) = self.reconcile_all().await {
                                    warn!("GlobalQuotaController reconcile error: {}", e);
                                }
                                interval.reset();
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("GlobalQuotaController stopping");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// One pass: reconcile every GlobalResourceQuota serially.
    /// A failing quota does not block the others; its pass is retried on
    /// the next trigger.
    pub async fn reconcile_all(&self) -> anyhow::Result<()> {
        let namespaces = self.list_namespaces().await?;
        let entries = self.store.list_prefix(GLOBAL_QUOTAS_PREFIX).await?;
        for (key, value) in entries {
            let grq: GlobalResourceQuota = match serde_json::from_slice(&value) {
                Ok(g) => g,
                Err(_) => continue,
            };
            if let Err(e) = self.reconcile_quota(&key, grq, &namespaces).await {
                warn!("reconcile of {} failed: {}", key, e);
            }
        }
        self.metrics.counter_inc(RECONCILE_COUNTER, &[]);
        Ok(())
    }

    /// Reconcile only the quotas whose selectors match the namespace or
    /// that currently track it in status.
    pub async fn reconcile_for_namespace(&self, ns: &Namespace) -> anyhow::Result<()> {
        let namespaces = self.list_namespaces().await?;
        let entries = self.store.list_prefix(GLOBAL_QUOTAS_PREFIX).await?;
        let quotas: Vec<GlobalResourceQuota> = entries
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect();
        let affected: Vec<GlobalResourceQuota> = quotas_for_namespace(&quotas, ns)
            .into_iter()
            .cloned()
            .collect();
        debug!(
            "namespace {} touches {} of {} quotas",
            ns.name,
            affected.len(),
            quotas.len()
        );
        for grq in affected {
            let key = format!("{}{}", GLOBAL_QUOTAS_PREFIX, grq.name);
            if let Err(e) = self.reconcile_quota(&key, grq, &namespaces).await {
                warn!("reconcile of {} failed: {}", key, e);
            }
        }
        Ok(())
    }

    async fn list_namespaces(&self) -> anyhow::Result<Vec<Namespace>> {
        let entries = self.store.list_prefix(NAMESPACES_PREFIX).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_slice(&v).ok())
            .collect())
    }

    async fn reconcile_quota(
        &self,
        key: &str,
        mut grq: GlobalResourceQuota,
        namespaces: &[Namespace],
    ) -> anyhow::Result<()> {
        if grq.marked_for_deletion() {
            return self.teardown(key, &grq).await;
        }

        if !grq.spec.active {
            debug!("{} is not active, removing managed quotas", grq.name);
            self.delete_managed_quotas(&grq.name).await?;
            self.persist_status(&grq.name, |status| {
                status.active = false;
            })
            .await?;
            return Ok(());
        }

        let matching = matching_namespaces(&grq.spec.selectors, namespaces);
        let matching_names: Vec<String> = matching.iter().map(|ns| ns.name.clone()).collect();

        // Items removed from spec: delete their managed objects everywhere
        // they may live, then drop the status entry in the write-back below.
        let orphaned: Vec<String> = grq
            .status
            .quota
            .keys()
            .filter(|item| !grq.spec.items.contains_key(*item))
            .cloned()
            .collect();
        for item in &orphaned {
            let union: HashSet<&String> = matching_names
                .iter()
                .chain(grq.status.namespaces.iter())
                .collect();
            for ns in union {
                self.delete_item_quota(&grq.name, item, ns).await?;
                debug!("deleted orphaned quota item {} in {}", item, ns);
            }
        }

        // Namespaces that left the selector set.
        for ns in &grq.status.namespaces {
            if !matching_names.contains(ns) {
                self.gc_namespace(&grq, ns).await?;
            }
        }

        // Re-derive the authoritative usage sums. Admission keeps the
        // counter fresh between passes; this heals any drift.
        self.metrics.remove_matching("quota", &grq.name);
        let managed = self.list_managed_quotas(&grq.name).await?;
        let mut quota_status = BTreeMap::new();
        for (item, item_spec) in &grq.spec.items {
            let mut used = ResourceList::new();
            for (resource, hard) in &item_spec.hard {
                let mut sum = Quantity::ZERO;
                for quota in managed
                    .iter()
                    .filter(|q| q.managed_by().is_some_and(|(_, i)| i == item))
                {
                    if let Some(value) = quota.status.used.get(resource) {
                        sum = sum.saturating_add(*value);
                    }
                }
                sum = sum.clamp_non_negative();
                let labels = [
                    ("quota", grq.name.as_str()),
                    ("item", item.as_str()),
                    ("resource", resource.as_str()),
                ];
                self.metrics
                    .gauge_set(USAGE_GAUGE, &labels, sum.millis() as f64 / 1000.0);
                self.metrics
                    .gauge_set(LIMIT_GAUGE, &labels, hard.millis() as f64 / 1000.0);
                used.insert(resource.clone(), sum);
            }
            quota_status.insert(
                item.clone(),
                QuotaEntryStatus {
                    hard: item_spec.hard.clone(),
                    used,
                },
            );
        }
        // The fan-out shapes caps from these sums, not the stale status.
        grq.status.quota = quota_status.clone();

        // Materialize managed quotas across all matching namespaces with
        // bounded concurrency. The first failure wins propagation so the
        // whole pass is retried; every failure is logged.
        let semaphore = Arc::new(Semaphore::new(self.fanout_limit));
        let mut tasks = JoinSet::new();
        for ns in matching_names.clone() {
            let store = self.store.clone();
            let recorder = self.recorder.clone();
            let grq = grq.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                sync_namespace(&store, &recorder, &grq, &ns).await
            });
        }
        let mut first_err: Option<anyhow::Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("fan-out task panicked: {}", e)),
            };
            if let Err(e) = result {
                warn!("namespace sync for {} failed: {}", grq.name, e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        // Status write-back, skipped when nothing changed.
        let mut sorted_names = matching_names;
        sorted_names.sort();
        let size = sorted_names.len() as u64;
        self.persist_status(&grq.name, move |status| {
            status.active = true;
            status.namespaces = sorted_names.clone();
            status.size = size;
            status.quota = quota_status.clone();
        })
        .await?;

        Ok(())
    }

    /// Deletion-timestamp observed: garbage-collect every managed quota,
    /// drop this quota's metric series, then erase the object itself.
    async fn teardown(&self, key: &str, grq: &GlobalResourceQuota) -> anyhow::Result<()> {
        info!("{} marked for deletion, tearing down", grq.name);
        self.delete_managed_quotas(&grq.name).await?;
        self.metrics.remove_matching("quota", &grq.name);
        self.store.delete(key).await?;
        Ok(())
    }

    /// Delete every ResourceQuota labeled as managed by `name`, wherever
    /// it lives. Missing objects count as success.
    async fn delete_managed_quotas(&self, name: &str) -> anyhow::Result<()> {
        let entries = self.store.list_prefix(RESOURCE_QUOTAS_PREFIX).await?;
        for (key, value) in entries {
            let quota: ResourceQuota = match serde_json::from_slice(&value) {
                Ok(q) => q,
                Err(_) => continue,
            };
            if quota.managed_by().is_some_and(|(owner, _)| owner == name) {
                self.store.delete(&key).await?;
                debug!("deleted managed quota {}", key);
            }
        }
        Ok(())
    }

    async fn list_managed_quotas(&self, name: &str) -> anyhow::Result<Vec<ResourceQuota>> {
        let entries = self.store.list_prefix(RESOURCE_QUOTAS_PREFIX).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(_, v)| serde_json::from_slice::<ResourceQuota>(&v).ok())
            .filter(|q| q.managed_by().is_some_and(|(owner, _)| owner == name))
            .collect())
    }

    async fn delete_item_quota(&self, grq: &str, item: &str, namespace: &str) -> anyhow::Result<()> {
        let key = format!(
            "{}{}/{}",
            RESOURCE_QUOTAS_PREFIX,
            namespace,
            item_object_name(grq, item)
        );
        match self.store.delete(&key).await {
            Ok(()) => Ok(()),
            Err(StateError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the managed quotas of a namespace that left the selector
    /// set. A namespace that is already gone is skipped silently.
    async fn gc_namespace(&self, grq: &GlobalResourceQuota, namespace: &str) -> anyhow::Result<()> {
        let ns_key = format!("{}{}", NAMESPACES_PREFIX, namespace);
        if self.store.get(&ns_key).await?.is_none() {
            debug!("namespace {} no longer exists, skipping GC", namespace);
            return Ok(());
        }
        for item in grq.spec.items.keys() {
            self.delete_item_quota(&grq.name, item, namespace).await?;
        }
        info!("garbage collected managed quotas of {} in {}", grq.name, namespace);
        Ok(())
    }

    /// Conflict-retried status update against the freshest object; the
    /// write is skipped entirely when the applied status equals the
    /// pre-image.
    async fn persist_status<F>(&self, name: &str, apply: F) -> anyhow::Result<()>
    where
        F: Fn(&mut GlobalResourceQuotaStatus),
    {
        let key = format!("{}{}", GLOBAL_QUOTAS_PREFIX, name);
        let apply = &apply;
        retry_on_conflict(|| {
            let store = self.store.clone();
            let key = key.clone();
            async move {
                let Some(raw) = store.get(&key).await? else {
                    return Ok(());
                };
                let current: GlobalResourceQuota = serde_json::from_slice(&raw)?;
                let mut updated = current.clone();
                apply(&mut updated.status);
                if updated.status == current.status {
                    return Ok(());
                }
                updated.resource_version += 1;
                let data = serde_json::to_vec(&updated)?;
                store.swap(&key, Some(&raw), &data).await
            }
        })
        .await?;
        Ok(())
    }
}

/// The namespace carried by a namespace Put event, when it decodes.
/// Deletions and undecodable payloads return `None` and force a full pass.
fn namespace_event_target(event: &WatchEvent) -> Option<Namespace> {
    if !event.matches_prefix(NAMESPACES_PREFIX) {
        return None;
    }
    event
        .value
        .as_deref()
        .and_then(|raw| serde_json::from_slice(raw).ok())
}

/// Create-or-update every item's managed quota inside one namespace.
///
/// The cap granted to the namespace is the remaining global headroom plus
/// whatever the namespace already consumes, restricted to the resource
/// names the item declares. On a brand-new namespace that is the full
/// limit; as other namespaces consume, the cap shrinks but never below the
/// namespace's own usage.
async fn sync_namespace(
    store: &StateStore,
    recorder: &Recorder,
    grq: &GlobalResourceQuota,
    namespace: &str,
) -> anyhow::Result<()> {
    for (item, item_spec) in &grq.spec.items {
        let name = item_object_name(&grq.name, item);
        let key = format!("{}{}/{}", RESOURCE_QUOTAS_PREFIX, namespace, name);

        let outcome = retry_on_conflict(|| {
            let store = store.clone();
            let key = key.clone();
            let name = name.clone();
            async move {
                let existing_raw = store.get(&key).await?;
                let existing: Option<ResourceQuota> = match &existing_raw {
                    Some(raw) => Some(serde_json::from_slice(raw)?),
                    None => None,
                };
                let mut target = existing.clone().unwrap_or_else(|| ResourceQuota {
                    name,
                    namespace: namespace.to_string(),
                    labels: HashMap::new(),
                    resource_version: 0,
                    owner_ref: None,
                    spec: ResourceQuotaSpec::default(),
                    status: Default::default(),
                    created_at: Utc::now(),
                });

                target
                    .labels
                    .insert(MANAGED_BY_LABEL.to_string(), grq.name.clone());
                target.labels.insert(ITEM_LABEL.to_string(), item.clone());
                target.owner_ref = Some(grq.name.clone());
                target.spec.scopes = item_spec.scopes.clone();
                target.spec.scope_selector = item_spec.scope_selector.clone();

                let local_used = target.status.used.clone();
                let mut cap = grq
                    .aggregated_quota_space(item, &local_used)
                    .unwrap_or_else(|| item_spec.hard.clone());
                cap.retain(|resource, _| item_spec.hard.contains_key(resource));
                target.spec.hard = cap.clone();
                target.status.hard = cap;

                match existing {
                    Some(ref existing) if *existing == target => Ok(SyncOutcome::Unchanged),
                    Some(_) => {
                        target.resource_version += 1;
                        let data = serde_json::to_vec(&target)?;
                        store.swap(&key, existing_raw.as_deref(), &data).await?;
                        Ok(SyncOutcome::Updated)
                    }
                    None => {
                        target.resource_version = 1;
                        let data = serde_json::to_vec(&target)?;
                        store.swap(&key, None, &data).await?;
                        Ok(SyncOutcome::Created)
                    }
                }
            }
        })
        .await?;

        match outcome {
            SyncOutcome::Unchanged => {}
            SyncOutcome::Created | SyncOutcome::Updated => {
                recorder
                    .record(
                        EventKind::Normal,
                        reason::ENSURING_RESOURCE_QUOTA,
                        format!("Ensuring ResourceQuota {}", name),
                        grq.name.clone(),
                        Some(namespace.to_string()),
                    )
                    .await;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::globalquota::{GlobalResourceQuotaSpec, QuotaItemSpec};
    use pkg_types::selector::{GlobalQuotaSelector, LabelSelector, SelectorKind};

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    fn list(entries: &[(&str, &str)]) -> ResourceList {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), value.parse().unwrap()))
            .collect()
    }

    fn make_controller(store: &StateStore) -> GlobalQuotaController {
        // The sender side may drop: these tests drive reconcile_all()
        // directly and never enter the watch loop.
        let (_tx, rx) = watch::channel(false);
        GlobalQuotaController::new(
            store.clone(),
            Arc::new(MetricsRegistry::new()),
            rx,
            Duration::from_secs(30),
            4,
        )
    }

    async fn seed_namespace(store: &StateStore, name: &str, labels: &[(&str, &str)]) {
        let ns = Namespace {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            phase: Default::default(),
            deletion_timestamp: None,
            created_at: Utc::now(),
        };
        let key = format!("{}{}", NAMESPACES_PREFIX, name);
        store
            .put(&key, &serde_json::to_vec(&ns).unwrap())
            .await
            .unwrap();
    }

    fn env_selector(value: &str) -> GlobalQuotaSelector {
        GlobalQuotaSelector {
            tenant: false,
            kind: SelectorKind::Labels(LabelSelector {
                match_labels: [("env".to_string(), value.to_string())].into(),
                match_expressions: vec![],
            }),
        }
    }

    async fn seed_grq(store: &StateStore, name: &str, items: &[(&str, &[(&str, &str)])]) {
        let grq = GlobalResourceQuota {
            name: name.to_string(),
            resource_version: 1,
            finalizers: vec![],
            deletion_timestamp: None,
            spec: GlobalResourceQuotaSpec {
                active: true,
                selectors: vec![env_selector("dev")],
                items: items
                    .iter()
                    .map(|(item, hard)| {
                        (
                            item.to_string(),
                            QuotaItemSpec {
                                hard: list(hard),
                                ..Default::default()
                            },
                        )
                    })
                    .collect(),
            },
            status: Default::default(),
            created_at: Utc::now(),
        };
        let key = format!("{}{}", GLOBAL_QUOTAS_PREFIX, name);
        store
            .put(&key, &serde_json::to_vec(&grq).unwrap())
            .await
            .unwrap();
    }

    async fn read_grq(store: &StateStore, name: &str) -> GlobalResourceQuota {
        let raw = store
            .get(&format!("{}{}", GLOBAL_QUOTAS_PREFIX, name))
            .await
            .unwrap()
            .unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    async fn read_managed(store: &StateStore, ns: &str, grq: &str, item: &str) -> Option<ResourceQuota> {
        let key = format!(
            "{}{}/{}",
            RESOURCE_QUOTAS_PREFIX,
            ns,
            item_object_name(grq, item)
        );
        store
            .get(&key)
            .await
            .unwrap()
            .map(|raw| serde_json::from_slice(&raw).unwrap())
    }

    async fn set_used(store: &StateStore, ns: &str, grq: &str, item: &str, used: &[(&str, &str)]) {
        let mut quota = read_managed(store, ns, grq, item).await.unwrap();
        quota.status.used = list(used);
        quota.resource_version += 1;
        let key = format!(
            "{}{}/{}",
            RESOURCE_QUOTAS_PREFIX,
            ns,
            item_object_name(grq, item)
        );
        store
            .put(&key, &serde_json::to_vec(&quota).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn basic_fan_out() {
        let store = StateStore::in_memory().await.unwrap();
        let controller = make_controller(&store);
        for ns in ["a", "b", "c"] {
            seed_namespace(&store, ns, &[("env", "dev")]).await;
        }
        seed_grq(&store, "budget", &[("pods", &[("pods", "5")])]).await;

        controller.reconcile_all().await.unwrap();

        for ns in ["a", "b", "c"] {
            let quota = read_managed(&store, ns, "budget", "pods").await.unwrap();
            assert_eq!(quota.spec.hard["pods"], q("5"));
            assert_eq!(quota.status.hard["pods"], q("5"));
            assert_eq!(quota.owner_ref.as_deref(), Some("budget"));
        }

        let grq = read_grq(&store, "budget").await;
        assert!(grq.status.active);
        assert_eq!(grq.status.namespaces, vec!["a", "b", "c"]);
        assert_eq!(grq.status.size, 3);
        assert_eq!(grq.status.quota["pods"].hard["pods"], q("5"));
        assert_eq!(grq.status.quota["pods"].used["pods"], Quantity::ZERO);
    }

    #[tokio::test]
    async fn aggregates_usage_and_reshapes_caps() {
        let store = StateStore::in_memory().await.unwrap();
        let controller = make_controller(&store);
        for ns in ["a", "b", "c"] {
            seed_namespace(&store, ns, &[("env", "dev")]).await;
        }
        seed_grq(&store, "budget", &[("pods", &[("pods", "5")])]).await;
        controller.reconcile_all().await.unwrap();

        set_used(&store, "a", "budget", "pods", &[("pods", "2")]).await;
        set_used(&store, "b", "budget", "pods", &[("pods", "1")]).await;
        controller.reconcile_all().await.unwrap();

        let grq = read_grq(&store, "budget").await;
        assert_eq!(grq.status.quota["pods"].used["pods"], q("3"));

        // Each namespace sees the remaining global headroom plus its own
        // already-counted usage.
        let a = read_managed(&store, "a", "budget", "pods").await.unwrap();
        let b = read_managed(&store, "b", "budget", "pods").await.unwrap();
        let c = read_managed(&store, "c", "budget", "pods").await.unwrap();
        assert_eq!(a.spec.hard["pods"], q("4"));
        assert_eq!(b.spec.hard["pods"], q("3"));
        assert_eq!(c.spec.hard["pods"], q("2"));
    }

    #[tokio::test]
    async fn exhausted_budget_caps_at_own_usage() {
        let store = StateStore::in_memory().await.unwrap();
        let controller = make_controller(&store);
        for ns in ["a", "b"] {
            seed_namespace(&store, ns, &[("env", "dev")]).await;
        }
        seed_grq(&store, "budget", &[("compute", &[("cpu", "2")])]).await;
        controller.reconcile_all().await.unwrap();

        set_used(&store, "a", "budget", "compute", &[("cpu", "1500m")]).await;
        set_used(&store, "b", "budget", "compute", &[("cpu", "500m")]).await;
        controller.reconcile_all().await.unwrap();

        // No headroom left: every namespace is pinned to what it holds.
        let a = read_managed(&store, "a", "budget", "compute").await.unwrap();
        let b = read_managed(&store, "b", "budget", "compute").await.unwrap();
        assert_eq!(a.spec.hard["cpu"], q("1500m"));
        assert_eq!(b.spec.hard["cpu"], q("500m"));
    }

    #[tokio::test]
    async fn removed_item_is_garbage_collected() {
        let store = StateStore::in_memory().await.unwrap();
        let controller = make_controller(&store);
        seed_namespace(&store, "a", &[("env", "dev")]).await;
        seed_grq(
            &store,
            "budget",
            &[("pods", &[("pods", "5")]), ("compute", &[("cpu", "2")])],
        )
        .await;
        controller.reconcile_all().await.unwrap();
        assert!(read_managed(&store, "a", "budget", "compute").await.is_some());

        // Operator removes the compute item.
        let mut grq = read_grq(&store, "budget").await;
        grq.spec.items.remove("compute");
        let key = format!("{}{}", GLOBAL_QUOTAS_PREFIX, "budget");
        store
            .put(&key, &serde_json::to_vec(&grq).unwrap())
            .await
            .unwrap();
        controller.reconcile_all().await.unwrap();

        assert!(read_managed(&store, "a", "budget", "compute").await.is_none());
        assert!(read_managed(&store, "a", "budget", "pods").await.is_some());
        let grq = read_grq(&store, "budget").await;
        assert!(!grq.status.quota.contains_key("compute"));
        assert!(grq.status.quota.contains_key("pods"));
    }

    #[tokio::test]
    async fn namespace_leaving_selector_is_garbage_collected() {
        let store = StateStore::in_memory().await.unwrap();
        let controller = make_controller(&store);
        for ns in ["a", "b", "c"] {
            seed_namespace(&store, ns, &[("env", "dev")]).await;
        }
        seed_grq(&store, "budget", &[("pods", &[("pods", "5")])]).await;
        controller.reconcile_all().await.unwrap();

        // Label removed from c.
        seed_namespace(&store, "c", &[]).await;
        controller.reconcile_all().await.unwrap();

        assert!(read_managed(&store, "c", "budget", "pods").await.is_none());
        let grq = read_grq(&store, "budget").await;
        assert_eq!(grq.status.namespaces, vec!["a", "b"]);
        assert_eq!(grq.status.size, 2);
    }

    #[tokio::test]
    async fn deactivate_removes_managed_quotas_and_reactivate_restores() {
        let store = StateStore::in_memory().await.unwrap();
        let controller = make_controller(&store);
        seed_namespace(&store, "a", &[("env", "dev")]).await;
        seed_grq(&store, "budget", &[("pods", &[("pods", "5")])]).await;
        controller.reconcile_all().await.unwrap();

        let mut grq = read_grq(&store, "budget").await;
        grq.spec.active = false;
        let key = format!("{}{}", GLOBAL_QUOTAS_PREFIX, "budget");
        store
            .put(&key, &serde_json::to_vec(&grq).unwrap())
            .await
            .unwrap();
        controller.reconcile_all().await.unwrap();

        assert!(read_managed(&store, "a", "budget", "pods").await.is_none());
        assert!(!read_grq(&store, "budget").await.status.active);

        let mut grq = read_grq(&store, "budget").await;
        grq.spec.active = true;
        store
            .put(&key, &serde_json::to_vec(&grq).unwrap())
            .await
            .unwrap();
        controller.reconcile_all().await.unwrap();

        assert!(read_managed(&store, "a", "budget", "pods").await.is_some());
        assert!(read_grq(&store, "budget").await.status.active);
    }

    #[tokio::test]
    async fn second_pass_is_idempotent() {
        let store = StateStore::in_memory().await.unwrap();
        let controller = make_controller(&store);
        for ns in ["a", "b"] {
            seed_namespace(&store, ns, &[("env", "dev")]).await;
        }
        seed_grq(&store, "budget", &[("pods", &[("pods", "5")])]).await;
        controller.reconcile_all().await.unwrap();

        let seq = store.event_log.current_seq().await;
        controller.reconcile_all().await.unwrap();

        // Identical inputs: no writes at all on the second pass.
        let events = store.event_log.events_since(seq).await;
        assert!(events.is_empty(), "unexpected writes: {:?}", events);
    }

    #[tokio::test]
    async fn namespace_event_reconciles_only_affected_quotas() {
        let store = StateStore::in_memory().await.unwrap();
        let controller = make_controller(&store);
        seed_namespace(&store, "dev-ns", &[("env", "dev")]).await;
        seed_namespace(&store, "prod-ns", &[("env", "prod")]).await;
        seed_grq(&store, "dev-budget", &[("pods", &[("pods", "5")])]).await;

        // A second quota selecting prod namespaces.
        let mut prod = read_grq(&store, "dev-budget").await;
        prod.name = "prod-budget".to_string();
        prod.spec.selectors = vec![env_selector("prod")];
        let key = format!("{}{}", GLOBAL_QUOTAS_PREFIX, "prod-budget");
        store
            .put(&key, &serde_json::to_vec(&prod).unwrap())
            .await
            .unwrap();

        let dev_ns: Namespace = serde_json::from_slice(
            &store
                .get(&format!("{}{}", NAMESPACES_PREFIX, "dev-ns"))
                .await
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        controller.reconcile_for_namespace(&dev_ns).await.unwrap();

        // Only the quota whose selector matches dev-ns was materialized.
        assert!(
            read_managed(&store, "dev-ns", "dev-budget", "pods")
                .await
                .is_some()
        );
        assert!(
            read_managed(&store, "prod-ns", "prod-budget", "pods")
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn deletion_timestamp_tears_everything_down() {
        let store = StateStore::in_memory().await.unwrap();
        let controller = make_controller(&store);
        seed_namespace(&store, "a", &[("env", "dev")]).await;
        seed_grq(&store, "budget", &[("pods", &[("pods", "5")])]).await;
        controller.reconcile_all().await.unwrap();

        let mut grq = read_grq(&store, "budget").await;
        grq.deletion_timestamp = Some(Utc::now());
        let key = format!("{}{}", GLOBAL_QUOTAS_PREFIX, "budget");
        store
            .put(&key, &serde_json::to_vec(&grq).unwrap())
            .await
            .unwrap();
        controller.reconcile_all().await.unwrap();

        assert!(read_managed(&store, "a", "budget", "pods").await.is_none());
        assert!(store.get(&key).await.unwrap().is_none());
    }
}
