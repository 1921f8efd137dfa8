//! Persisted fleet state.
//!
//! `PersistedState` is the JSON document kept on disk between runs. It maps
//! logical entities to provider identifiers. An identifier of `0` or a
//! missing entry always means "not yet created", never "deleted".

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};


// ---------------------------------------------------------------------------
// InstanceRecord
// ---------------------------------------------------------------------------

/// Outcome of reconciling one instance spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Provider-assigned instance id.
    pub id: u64,
    /// Logical name, matching `InstanceSpec::name`.
    pub name: String,
    /// Public address; empty until the instance is ready.
    #[serde(default)]
    pub public_ip: String,
}

impl InstanceRecord {
    pub fn new(id: u64, name: &str) -> Self {
        InstanceRecord {
            id,
            name: name.to_string(),
            public_ip: String::new(),
        }
    }

    /// Whether the instance address has been discovered.
    pub fn has_address(&self) -> bool {
        !self.public_ip.is_empty()
    }
}


// ---------------------------------------------------------------------------
// PersistedState
// ---------------------------------------------------------------------------

/// Top-level persisted aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub user_id: u64,
    /// Project name → project id.
    #[serde(default, deserialize_with = "null_as_default")]
    pub projects: BTreeMap<String, u64>,
    /// Project name → instances in creation order.
    #[serde(default, deserialize_with = "null_as_default")]
    pub instances: BTreeMap<String, Vec<InstanceRecord>>,
}

impl PersistedState {
    /// The recorded user id, if one has been assigned.
    pub fn user(&self) -> Option<u64> {
        (self.user_id != 0).then_some(self.user_id)
    }

    /// The recorded id for a project, if one has been assigned.
    pub fn project(&self, name: &str) -> Option<u64> {
        self.projects.get(name).copied().filter(|id| *id != 0)
    }

    /// Instance records of a project, in creation order.
    pub fn instances(&self, project: &str) -> &[InstanceRecord] {
        self.instances
            .get(project)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Find an instance record by logical name.
    pub fn find_instance(&self, project: &str, name: &str) -> Option<&InstanceRecord> {
        self.instances(project).iter().find(|r| r.name == name)
    }
}


/// Treat an explicit JSON `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_backfills_maps() {
        let state: PersistedState = serde_json::from_str("{}").unwrap();
        assert_eq!(state.user(), None);
        assert!(state.projects.is_empty());
        assert!(state.instances.is_empty());
    }

    #[test]
    fn null_maps_are_backfilled() {
        let state: PersistedState =
            serde_json::from_str(r#"{"user_id": 7, "projects": null, "instances": null}"#).unwrap();
        assert_eq!(state.user(), Some(7));
        assert!(state.projects.is_empty());
        assert!(state.instances("devnet").is_empty());
    }

    #[test]
    fn zero_ids_mean_not_created() {
        let mut state = PersistedState::default();
        state.projects.insert("devnet".into(), 0);
        assert_eq!(state.project("devnet"), None);
        state.projects.insert("devnet".into(), 12);
        assert_eq!(state.project("devnet"), Some(12));
    }

    #[test]
    fn record_without_address_field_parses() {
        let json = r#"{"user_id":1,"projects":{"p":2},"instances":{"p":[{"id":3,"name":"validator-1"}]}}"#;
        let state: PersistedState = serde_json::from_str(json).unwrap();
        let record = state.find_instance("p", "validator-1").unwrap();
        assert_eq!(record.id, 3);
        assert!(!record.has_address());
    }
}
