use tracing::warn;

use pkg_constants::paths::EVENTS_PREFIX;
use pkg_types::event::{Event, EventKind};

use crate::client::StateStore;

/// Best-effort event recorder. Failures are logged, never propagated —
/// an event must not fail the operation it describes.
#[derive(Clone)]
pub struct Recorder {
    store: StateStore,
}

impl Recorder {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        kind: EventKind,
        reason: &str,
        message: impl Into<String>,
        object: impl Into<String>,
        namespace: Option<String>,
    ) {
        let event = Event::new(kind, reason, message, object, namespace);
        let key = format!(
            "{}{}/{}",
            EVENTS_PREFIX,
            event.namespace.as_deref().unwrap_or("_cluster"),
            event.id
        );
        match serde_json::to_vec(&event) {
            Ok(data) => {
                if let Err(e) = self.store.put(&key, &data).await {
                    warn!("Failed to record event {}: {}", event.reason, e);
                }
            }
            Err(e) => warn!("Failed to serialize event {}: {}", event.reason, e),
        }
    }
}
