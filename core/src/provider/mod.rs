//! Fleet provider API.
//!
//! `FleetProvider` is the narrow interface the reconciler needs from the
//! cloud API: user, project and instance lookups and mutations. `HttpProvider`
//! is the production client; `MockProvider` is the in-memory test double.
//!
//! `ProviderError::NotFound` is the only recoverable error: it tells the
//! caller the entity does not exist yet and should be created.

pub mod http;
pub mod mock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpProvider;
pub use mock::MockProvider;


// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("provider returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("provider unreachable: {0}")]
    Transport(String),

    #[error("unexpected provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound { .. })
    }
}


// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub owner_id: u64,
}

/// Provider-reported lifecycle status of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Provisioning,
    Ready,
    Terminated,
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    /// Statuses of an instance that has been requested but is not usable yet.
    pub const IN_FLIGHT: [InstanceStatus; 2] = [InstanceStatus::Pending, InstanceStatus::Provisioning];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: u64,
    pub name: String,
    pub status: InstanceStatus,
    #[serde(default)]
    pub public_ip: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRequest {
    pub name: String,
    pub size_gb: u32,
    pub mount_point: String,
}

/// One create-instance request, as accepted by the provider API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRequest {
    pub name: String,
    pub owner_id: u64,
    pub project_name: String,
    pub provider: String,
    pub number_of_instances: u32,
    pub provision: bool,
    pub region: String,
    pub size: String,
    pub image: String,
    pub tags: Vec<String>,
    pub ssh_key_name: String,
    pub ssh_key_path: String,
    pub volumes: Vec<VolumeRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub owner_id: u64,
    pub project_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_ids: Vec<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_names: Vec<String>,
}


// ---------------------------------------------------------------------------
// FleetProvider
// ---------------------------------------------------------------------------

/// Operations consumed from the fleet provider. All calls are blocking.
pub trait FleetProvider: Send + Sync {
    fn get_user(&self, username: &str) -> Result<User, ProviderError>;

    fn create_user(&self, username: &str) -> Result<User, ProviderError>;

    fn get_project(&self, name: &str, owner_id: u64) -> Result<Project, ProviderError>;

    fn create_project(&self, name: &str, description: &str, owner_id: u64) -> Result<Project, ProviderError>;

    /// Submit create requests. The provider only acknowledges; ids are
    /// discovered through `list_instances`.
    fn create_instances(&self, requests: &[InstanceRequest]) -> Result<(), ProviderError>;

    /// List the project's instances, keeping only `statuses` (all if empty).
    fn list_instances(
        &self,
        project: &str,
        owner_id: u64,
        statuses: &[InstanceStatus],
    ) -> Result<Vec<Instance>, ProviderError>;

    fn get_instance(&self, id: u64) -> Result<Instance, ProviderError>;

    fn delete_instances(&self, request: &DeleteRequest) -> Result<(), ProviderError>;
}


/// Keep instances whose status is in `statuses`; an empty filter keeps all.
pub(crate) fn filter_by_status(instances: Vec<Instance>, statuses: &[InstanceStatus]) -> Vec<Instance> {
    if statuses.is_empty() {
        return instances;
    }
    instances
        .into_iter()
        .filter(|i| statuses.contains(&i.status))
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_deserializes() {
        let status: InstanceStatus = serde_json::from_str("\"rebooting\"").unwrap();
        assert_eq!(status, InstanceStatus::Unknown);
        let ready: InstanceStatus = serde_json::from_str("\"ready\"").unwrap();
        assert_eq!(ready, InstanceStatus::Ready);
    }

    #[test]
    fn delete_request_omits_empty_selectors() {
        let req = DeleteRequest {
            owner_id: 1,
            project_name: "devnet".into(),
            instance_ids: vec![4],
            instance_names: Vec::new(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("instance_ids"));
        assert!(!json.contains("instance_names"));
    }

    #[test]
    fn not_found_is_distinguished() {
        assert!(ProviderError::NotFound { resource: "user x".into() }.is_not_found());
        assert!(!ProviderError::Transport("refused".into()).is_not_found());
    }
}
