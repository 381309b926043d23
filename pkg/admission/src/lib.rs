//! Admission chain for managed ResourceQuota objects.
//!
//! Every mutation of a per-namespace ResourceQuota flows through here
//! before it is persisted: validation first (is the caller allowed to touch
//! the object at all), then the mutators that keep the parent
//! GlobalResourceQuota's global usage counter honest under concurrent
//! updates.

pub mod deletion;
pub mod spec;
pub mod status;
pub mod validation;

use serde::{Deserialize, Serialize};

use pkg_constants::labels::CONTROLLER_IDENTITY;
use pkg_types::quota::ResourceQuota;

/// Verb of an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Authenticated identity behind the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
}

impl UserInfo {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }

    /// The controller's own service identity bypasses validation.
    pub fn is_controller(&self) -> bool {
        self.username == CONTROLLER_IDENTITY
    }
}

/// Outcome of an admission handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// The mutated object to persist instead of the submitted one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ResourceQuota>,
}

impl AdmissionResponse {
    pub fn allow_unchanged() -> Self {
        Self {
            allowed: true,
            reason: None,
            object: None,
        }
    }

    pub fn allow_patched(object: ResourceQuota) -> Self {
        Self {
            allowed: true,
            reason: None,
            object: Some(object),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            object: None,
        }
    }
}
