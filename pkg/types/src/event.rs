use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorded orchestrator event, persisted under `/registry/events/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
    /// Name of the object the event is about.
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Event reasons emitted by the global-quota subsystem.
pub mod reason {
    /// A managed ResourceQuota was created or updated.
    pub const ENSURING_RESOURCE_QUOTA: &str = "EnsuringResourceQuota";
    /// An allocation was capped because the global budget is exhausted.
    pub const QUOTA_EXCEEDED: &str = "QuotaExceeded";
    /// A user tried to mutate or delete a managed ResourceQuota.
    pub const DELETION_DENIED: &str = "DeletionDenied";
}

impl Event {
    pub fn new(
        kind: EventKind,
        reason: &str,
        message: impl Into<String>,
        object: impl Into<String>,
        namespace: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            reason: reason.to_string(),
            message: message.into(),
            object: object.into(),
            namespace,
            timestamp: Utc::now(),
        }
    }
}
