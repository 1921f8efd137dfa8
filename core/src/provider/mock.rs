//! In-memory fleet provider for testing.
//!
//! Records every call and simulates instance readiness: a created instance
//! becomes `Ready` after a configurable number of `get_instance` polls, or
//! never. Makes reconciliation tests deterministic without a network.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{TimeZone, Utc};

use super::{
    filter_by_status, DeleteRequest, FleetProvider, Instance, InstanceRequest, InstanceStatus,
    Project, ProviderError, User,
};


/// When created instances report `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Ready on the first poll.
    Immediate,
    /// Ready once the instance has been polled this many times.
    AfterPolls(u32),
    /// Never leaves `Pending`.
    Never,
}

#[derive(Debug, Default)]
struct Inner {
    users: Vec<User>,
    projects: Vec<Project>,
    instances: Vec<(String, Instance)>,
    polls: HashMap<u64, u32>,
    calls: Vec<String>,
    next_id: u64,
    clock: i64,
    failures: HashMap<String, (u16, String)>,
}


/// A test-double provider with scripted readiness and failure injection.
#[derive(Debug)]
pub struct MockProvider {
    inner: Mutex<Inner>,
    readiness: Readiness,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::with_readiness(Readiness::Immediate)
    }

    pub fn with_readiness(readiness: Readiness) -> Self {
        MockProvider {
            inner: Mutex::new(Inner {
                next_id: 100,
                ..Inner::default()
            }),
            readiness,
        }
    }

    /// Make every subsequent call to `op` fail with an API error.
    pub fn fail_on(&self, op: &str, status: u16, message: &str) {
        self.lock()
            .failures
            .insert(op.to_string(), (status, message.to_string()));
    }

    /// Pre-register a user, as if created in an earlier session.
    pub fn add_user(&self, username: &str) -> u64 {
        let mut inner = self.lock();
        let id = inner.allocate_id();
        inner.users.push(User {
            id,
            username: username.to_string(),
        });
        id
    }

    /// Names of all calls made, in order (e.g. "create_instances").
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls made to `op`.
    pub fn call_count(&self, op: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == op).count()
    }

    /// Provider-side names of instances that have not been deleted.
    pub fn live_instance_names(&self) -> Vec<String> {
        self.lock()
            .instances
            .iter()
            .filter(|(_, i)| i.status != InstanceStatus::Terminated)
            .map(|(_, i)| i.name.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock only happens inside a failing test.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn enter(&self, op: &str) -> Result<std::sync::MutexGuard<'_, Inner>, ProviderError> {
        let mut inner = self.lock();
        inner.calls.push(op.to_string());
        if let Some((status, message)) = inner.failures.get(op) {
            return Err(ProviderError::Api {
                status: *status,
                message: message.clone(),
            });
        }
        Ok(inner)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl FleetProvider for MockProvider {
    fn get_user(&self, username: &str) -> Result<User, ProviderError> {
        let inner = self.enter("get_user")?;
        inner
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound {
                resource: format!("user '{}'", username),
            })
    }

    fn create_user(&self, username: &str) -> Result<User, ProviderError> {
        let mut inner = self.enter("create_user")?;
        let user = User {
            id: inner.allocate_id(),
            username: username.to_string(),
        };
        inner.users.push(user.clone());
        Ok(user)
    }

    fn get_project(&self, name: &str, owner_id: u64) -> Result<Project, ProviderError> {
        let inner = self.enter("get_project")?;
        inner
            .projects
            .iter()
            .find(|p| p.name == name && p.owner_id == owner_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound {
                resource: format!("project '{}'", name),
            })
    }

    fn create_project(&self, name: &str, _description: &str, owner_id: u64) -> Result<Project, ProviderError> {
        let mut inner = self.enter("create_project")?;
        let project = Project {
            id: inner.allocate_id(),
            name: name.to_string(),
            owner_id,
        };
        inner.projects.push(project.clone());
        Ok(project)
    }

    fn create_instances(&self, requests: &[InstanceRequest]) -> Result<(), ProviderError> {
        let mut inner = self.enter("create_instances")?;
        for request in requests {
            for _ in 0..request.number_of_instances.max(1) {
                let id = inner.allocate_id();
                inner.clock += 1;
                let created_at = Utc
                    .timestamp_opt(1_700_000_000 + inner.clock, 0)
                    .single()
                    .unwrap_or_else(Utc::now);
                inner.instances.push((
                    request.project_name.clone(),
                    Instance {
                        id,
                        name: request.name.clone(),
                        status: InstanceStatus::Pending,
                        public_ip: String::new(),
                        created_at,
                    },
                ));
            }
        }
        Ok(())
    }

    fn list_instances(
        &self,
        project: &str,
        _owner_id: u64,
        statuses: &[InstanceStatus],
    ) -> Result<Vec<Instance>, ProviderError> {
        let inner = self.enter("list_instances")?;
        let all = inner
            .instances
            .iter()
            .filter(|(p, _)| p == project)
            .map(|(_, i)| i.clone())
            .collect();
        Ok(filter_by_status(all, statuses))
    }

    fn get_instance(&self, id: u64) -> Result<Instance, ProviderError> {
        let mut inner = self.enter("get_instance")?;
        let polls = {
            let count = inner.polls.entry(id).or_insert(0);
            *count += 1;
            *count
        };
        let readiness = self.readiness;
        let instance = inner
            .instances
            .iter_mut()
            .map(|(_, i)| i)
            .find(|i| i.id == id)
            .ok_or_else(|| ProviderError::NotFound {
                resource: format!("instance {}", id),
            })?;

        let ready = match readiness {
            Readiness::Immediate => true,
            Readiness::AfterPolls(n) => polls >= n,
            Readiness::Never => false,
        };
        if ready && instance.status != InstanceStatus::Terminated {
            instance.status = InstanceStatus::Ready;
            instance.public_ip = format!("10.0.{}.{}", id / 256, id % 256);
        }
        Ok(instance.clone())
    }

    fn delete_instances(&self, request: &DeleteRequest) -> Result<(), ProviderError> {
        let mut inner = self.enter("delete_instances")?;
        for (project, instance) in inner.instances.iter_mut() {
            if *project != request.project_name {
                continue;
            }
            if request.instance_ids.contains(&instance.id) || request.instance_names.contains(&instance.name) {
                instance.status = InstanceStatus::Terminated;
                instance.public_ip.clear();
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> InstanceRequest {
        InstanceRequest {
            name: name.into(),
            owner_id: 1,
            project_name: "devnet".into(),
            provider: "do".into(),
            number_of_instances: 1,
            provision: false,
            region: "nyc1".into(),
            size: "s-1vcpu-1gb".into(),
            image: "ubuntu".into(),
            tags: Vec::new(),
            ssh_key_name: String::new(),
            ssh_key_path: String::new(),
            volumes: Vec::new(),
        }
    }

    #[test]
    fn unknown_user_is_not_found() {
        let provider = MockProvider::new();
        assert!(provider.get_user("alice").unwrap_err().is_not_found());
        provider.add_user("alice");
        assert_eq!(provider.get_user("alice").unwrap().username, "alice");
    }

    #[test]
    fn instances_become_ready_after_polls() {
        let provider = MockProvider::with_readiness(Readiness::AfterPolls(2));
        provider.create_instances(&[request("devnet-a")]).unwrap();
        let pending = provider
            .list_instances("devnet", 1, &InstanceStatus::IN_FLIGHT)
            .unwrap();
        assert_eq!(pending.len(), 1);
        let id = pending[0].id;

        assert_eq!(provider.get_instance(id).unwrap().status, InstanceStatus::Pending);
        let second = provider.get_instance(id).unwrap();
        assert_eq!(second.status, InstanceStatus::Ready);
        assert!(!second.public_ip.is_empty());
    }

    #[test]
    fn injected_failure_is_api_error() {
        let provider = MockProvider::new();
        provider.fail_on("get_user", 500, "boom");
        let err = provider.get_user("alice").unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 500, .. }));
    }

    #[test]
    fn delete_terminates_by_id() {
        let provider = MockProvider::new();
        provider.create_instances(&[request("devnet-a")]).unwrap();
        let id = provider.list_instances("devnet", 1, &[]).unwrap()[0].id;
        provider
            .delete_instances(&DeleteRequest {
                owner_id: 1,
                project_name: "devnet".into(),
                instance_ids: vec![id],
                instance_names: Vec::new(),
            })
            .unwrap();
        assert!(provider.live_instance_names().is_empty());
    }
}
