//! The reconciliation state machine.
//!
//! Each step reads the recorded state first and only calls the provider for
//! what is missing, so re-running after a crash or on an already-complete
//! fleet is safe.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::planner::plan;
use super::ReconcileError;
use crate::provider::{
    DeleteRequest, FleetProvider, Instance, InstanceRequest, InstanceStatus, VolumeRequest,
};
use crate::state::Repository;
use crate::types::{InstanceRecord, InstanceSpec};


// ---------------------------------------------------------------------------
// Options / summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// How long to wait for every instance to report ready.
    pub ready_timeout: Duration,
    /// Delay between readiness polls.
    pub poll_interval: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            ready_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
        }
    }
}


/// Result of one `reconcile` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub user_id: u64,
    pub project_id: u64,
    /// Logical names created during this run.
    pub created: Vec<String>,
    /// Logical names that were recorded but are no longer desired.
    pub orphaned: Vec<String>,
    /// Every record of the project after reconciliation.
    pub instances: Vec<InstanceRecord>,
}


// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler<'a> {
    provider: &'a dyn FleetProvider,
    repo: &'a mut Repository,
    username: String,
    project: String,
    description: String,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(provider: &'a dyn FleetProvider, repo: &'a mut Repository, username: &str, project: &str) -> Self {
        Reconciler {
            provider,
            repo,
            username: username.to_string(),
            project: project.to_string(),
            description: String::new(),
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the full sequence: user, project, create, wait, addresses.
    pub fn reconcile(&mut self, specs: &[InstanceSpec]) -> Result<ReconcileSummary, ReconcileError> {
        let user_id = self.ensure_user()?;
        let project_id = self.ensure_project(user_id)?;

        let plan = plan(self.repo.instances(&self.project), specs);
        for orphan in &plan.orphaned {
            warn!(instance = %orphan.name, id = orphan.id, "recorded instance is no longer desired; leaving it alone");
        }
        if plan.is_noop() {
            info!(project = %self.project, existing = plan.existing.len(), "no instances to create");
        }

        let created = self.create_missing(user_id, &plan.create)?;
        let ready = self.wait_until_ready(specs)?;
        self.record_addresses(&ready)?;

        Ok(ReconcileSummary {
            user_id,
            project_id,
            created,
            orphaned: plan.orphaned.into_iter().map(|r| r.name).collect(),
            instances: self.repo.instances(&self.project).to_vec(),
        })
    }

    /// Look up or create the user; returns its id.
    pub fn ensure_user(&mut self) -> Result<u64, ReconcileError> {
        if let Some(id) = self.repo.state().user() {
            debug!(user_id = id, "user already recorded");
            return Ok(id);
        }
        let user = match self.provider.get_user(&self.username) {
            Ok(user) => user,
            Err(e) if e.is_not_found() => {
                info!(username = %self.username, "creating user");
                self.provider
                    .create_user(&self.username)
                    .map_err(ReconcileError::provider("create_user"))?
            }
            Err(e) => return Err(ReconcileError::provider("get_user")(e)),
        };
        self.repo.set_user_id(user.id)?;
        Ok(user.id)
    }

    /// Look up or create the project under `user_id`; returns its id.
    pub fn ensure_project(&mut self, user_id: u64) -> Result<u64, ReconcileError> {
        if let Some(id) = self.repo.state().project(&self.project) {
            debug!(project = %self.project, project_id = id, "project already recorded");
            return Ok(id);
        }
        let project = match self.provider.get_project(&self.project, user_id) {
            Ok(project) => project,
            Err(e) if e.is_not_found() => {
                info!(project = %self.project, "creating project");
                self.provider
                    .create_project(&self.project, &self.description, user_id)
                    .map_err(ReconcileError::provider("create_project"))?
            }
            Err(e) => return Err(ReconcileError::provider("get_project")(e)),
        };
        self.repo.set_project_id(&self.project, project.id)?;
        Ok(project.id)
    }

    /// Submit one create request per spec and record the resulting instance
    /// as soon as it is identified.
    pub fn create_missing(&mut self, user_id: u64, specs: &[InstanceSpec]) -> Result<Vec<String>, ReconcileError> {
        let mut created = Vec::new();
        for spec in specs {
            let request = self.instance_request(user_id, spec);
            info!(instance = %spec.name, provider_name = %request.name, "creating instance");
            self.provider
                .create_instances(std::slice::from_ref(&request))
                .map_err(ReconcileError::provider("create_instances"))?;

            let candidates = self
                .provider
                .list_instances(&self.project, user_id, &InstanceStatus::IN_FLIGHT)
                .map_err(ReconcileError::provider("list_instances"))?;
            let recorded: HashSet<u64> = self.repo.instances(&self.project).iter().map(|r| r.id).collect();
            let chosen = choose_created(&candidates, &request.name, &recorded).ok_or_else(|| {
                ReconcileError::NoPendingInstance {
                    name: spec.name.clone(),
                }
            })?;

            debug!(instance = %spec.name, id = chosen.id, "instance created");
            self.repo
                .push_instance(&self.project, InstanceRecord::new(chosen.id, &spec.name))?;
            created.push(spec.name.clone());
        }
        Ok(created)
    }

    /// Poll the recorded instances named in `specs` until all are ready or
    /// the timeout elapses. Records no longer desired are not polled.
    /// Returns the ready instances in record order.
    pub fn wait_until_ready(&self, specs: &[InstanceSpec]) -> Result<Vec<Instance>, ReconcileError> {
        let desired: HashSet<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        let records: Vec<InstanceRecord> = self
            .repo
            .instances(&self.project)
            .iter()
            .filter(|r| desired.contains(r.name.as_str()))
            .cloned()
            .collect();
        let started = Instant::now();
        let deadline = started + self.options.ready_timeout;

        loop {
            let mut ready = Vec::with_capacity(records.len());
            let mut pending = Vec::new();
            for record in &records {
                let instance = self
                    .provider
                    .get_instance(record.id)
                    .map_err(ReconcileError::provider("get_instance"))?;
                match instance.status {
                    InstanceStatus::Ready => ready.push(instance),
                    InstanceStatus::Pending | InstanceStatus::Provisioning => pending.push(record.name.clone()),
                    other => {
                        warn!(instance = %record.name, status = ?other, "instance in unexpected status");
                        pending.push(record.name.clone());
                    }
                }
            }

            if pending.is_empty() {
                info!(count = ready.len(), elapsed_ms = started.elapsed().as_millis() as u64, "all instances ready");
                return Ok(ready);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ReconcileError::Timeout {
                    timeout: self.options.ready_timeout,
                    pending,
                });
            }
            debug!(pending = pending.len(), "waiting for instances");
            std::thread::sleep(self.options.poll_interval.min(deadline - now));
        }
    }

    /// Persist the public address of each ready instance.
    pub fn record_addresses(&mut self, ready: &[Instance]) -> Result<(), ReconcileError> {
        for instance in ready {
            if instance.public_ip.is_empty() {
                warn!(id = instance.id, "ready instance reported no address");
                continue;
            }
            self.repo
                .set_public_ip(&self.project, instance.id, &instance.public_ip)?;
        }
        Ok(())
    }

    /// Delete every recorded instance of the project, removing each record as
    /// soon as its deletion is accepted. Returns the number deleted.
    pub fn delete_all(&mut self) -> Result<usize, ReconcileError> {
        if self.repo.state().project(&self.project).is_none() {
            return Err(ReconcileError::ProjectNotRecorded {
                project: self.project.clone(),
            });
        }
        let user_id = self.ensure_user()?;

        let records = self.repo.instances(&self.project).to_vec();
        for record in &records {
            info!(instance = %record.name, id = record.id, "deleting instance");
            let request = DeleteRequest {
                owner_id: user_id,
                project_name: self.project.clone(),
                instance_ids: vec![record.id],
                instance_names: vec![crate::types::provider_instance_name(&self.project, &record.name)],
            };
            self.provider
                .delete_instances(&request)
                .map_err(ReconcileError::provider("delete_instances"))?;
            self.repo.remove_instance(&self.project, record.id)?;
        }
        self.repo.clear_instances(&self.project)?;
        Ok(records.len())
    }

    fn instance_request(&self, user_id: u64, spec: &InstanceSpec) -> InstanceRequest {
        InstanceRequest {
            name: spec.provider_name(&self.project),
            owner_id: user_id,
            project_name: self.project.clone(),
            provider: spec.provider.clone(),
            number_of_instances: 1,
            provision: false,
            region: spec.region.clone(),
            size: spec.size.clone(),
            image: spec.image.clone(),
            tags: spec.tags.clone(),
            ssh_key_name: spec.ssh_key_name.clone(),
            ssh_key_path: spec.ssh_key_path.clone(),
            volumes: vec![VolumeRequest {
                name: spec.volume.name.clone(),
                size_gb: spec.volume.size_gb,
                mount_point: spec.volume.mount_point.clone(),
            }],
        }
    }
}


/// Pick the instance a create request produced: the newest unrecorded one
/// carrying the requested name, else the newest unrecorded one overall.
fn choose_created<'i>(candidates: &'i [Instance], requested: &str, recorded: &HashSet<u64>) -> Option<&'i Instance> {
    let fresh = || candidates.iter().filter(|i| !recorded.contains(&i.id));
    fresh()
        .filter(|i| i.name == requested)
        .max_by_key(|i| (i.created_at, i.id))
        .or_else(|| fresh().max_by_key(|i| (i.created_at, i.id)))
}
