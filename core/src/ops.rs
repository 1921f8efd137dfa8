//! Fleet operations.
//!
//! `Fleet` wires the configuration, the state file, the provider and the
//! remote shell together and exposes one method per command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::bootstrap::{BootstrapOutcome, BootstrapSequencer, KeyGenerator};
use crate::config::FleetConfig;
use crate::error::{Error, Result};
use crate::install::{Component, InstallAction, InstallReport, Installer};
use crate::provider::{FleetProvider, HttpProvider};
use crate::reconcile::{plan, ReconcileSummary, Reconciler};
use crate::remote::{RemoteShell, SshShell};
use crate::state::{self, Repository};
use crate::types::{InstanceRecord, InstanceSpec};


/// Snapshot of recorded state against the configured fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetStatus {
    pub project: String,
    pub user_id: Option<u64>,
    pub project_id: Option<u64>,
    pub instances: Vec<InstanceRecord>,
    /// Configured but not yet created.
    pub missing: Vec<String>,
    /// Recorded but no longer configured.
    pub orphaned: Vec<String>,
}


pub struct Fleet {
    config: FleetConfig,
    state_path: PathBuf,
    provider: Arc<dyn FleetProvider>,
    shell: Arc<dyn RemoteShell>,
}

impl Fleet {
    pub fn new(
        config: FleetConfig,
        state_path: &Path,
        provider: Arc<dyn FleetProvider>,
        shell: Arc<dyn RemoteShell>,
    ) -> Self {
        Fleet {
            config,
            state_path: state_path.to_path_buf(),
            provider,
            shell,
        }
    }

    /// Production wiring: HTTP provider and the system `ssh` client.
    pub fn from_config(config: FleetConfig, state_path: &Path) -> Self {
        let provider = HttpProvider::new(&config.api.base_url, config.api_key(), config.api_timeout());
        let shell = SshShell::new(config.ssh_config());
        Self::new(config, state_path, Arc::new(provider), Arc::new(shell))
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn specs(&self) -> Vec<InstanceSpec> {
        self.config.instance_specs()
    }

    /// Create whatever is missing and wait until every instance is ready.
    pub fn prepare_infra(&self) -> Result<ReconcileSummary> {
        let mut repo = Repository::open(&self.state_path)?;
        let summary = self
            .reconciler(&mut repo)
            .reconcile(&self.specs())?;
        info!(
            project = %self.config.project_name,
            created = summary.created.len(),
            total = summary.instances.len(),
            "infrastructure ready"
        );
        Ok(summary)
    }

    /// Install `component` on every instance that wants it. `version`
    /// overrides the configured one.
    pub async fn install(&self, component: Component, version: Option<&str>) -> Result<InstallReport> {
        let state = state::load(&self.state_path)?;
        let records = state.instances(&self.config.project_name);
        let targets = Installer::select(component, records, &self.specs());
        let action = InstallAction::new(
            component,
            version.unwrap_or(self.config.version_for(component)),
            self.config.script_for(component),
        );
        info!(component = %component, version = %action.version, hosts = targets.len(), "install pass starting");

        let report = Installer::new(Arc::clone(&self.shell))
            .run(&action, targets)
            .await
            .into_result()?;
        Ok(report)
    }

    /// Generate keys and genesis and push them to every consensus node.
    pub fn bootstrap_network(&self, chain_id: &str, seed: Option<u64>) -> Result<BootstrapOutcome> {
        let state = state::load(&self.state_path)?;
        let specs = self.specs();
        let nodes: Vec<&InstanceRecord> = state
            .instances(&self.config.project_name)
            .iter()
            .filter(|r| Component::ConsensusApp.wanted_by(specs.iter().find(|s| s.name == r.name)))
            .collect();

        let not_ready: Vec<String> = nodes
            .iter()
            .filter(|r| !r.has_address())
            .map(|r| r.name.clone())
            .collect();
        if !not_ready.is_empty() {
            return Err(Error::NotReady(not_ready));
        }

        let keys = KeyGenerator::from_seed(seed.unwrap_or(self.config.bootstrap.seed));
        let mut sequencer = BootstrapSequencer::new(
            chain_id,
            keys,
            Arc::clone(&self.shell),
            self.config.bootstrap_options(),
        );
        for record in nodes {
            sequencer.register(&record.name, &record.public_ip);
        }
        Ok(sequencer.run()?)
    }

    /// Delete every recorded instance of the project.
    pub fn delete_all(&self) -> Result<usize> {
        let mut repo = Repository::open(&self.state_path)?;
        let deleted = self.reconciler(&mut repo).delete_all()?;
        info!(project = %self.config.project_name, deleted, "instances deleted");
        Ok(deleted)
    }

    /// Read-only view of the recorded fleet. Does not contact the provider.
    pub fn status(&self) -> Result<FleetStatus> {
        let state = state::load(&self.state_path)?;
        let project = &self.config.project_name;
        let records = state.instances(project);
        let plan = plan(records, &self.specs());
        Ok(FleetStatus {
            project: project.clone(),
            user_id: state.user(),
            project_id: state.project(project),
            instances: records.to_vec(),
            missing: plan.create.into_iter().map(|s| s.name).collect(),
            orphaned: plan.orphaned.into_iter().map(|r| r.name).collect(),
        })
    }

    fn reconciler<'a>(&'a self, repo: &'a mut Repository) -> Reconciler<'a> {
        Reconciler::new(
            self.provider.as_ref(),
            repo,
            &self.config.username,
            &self.config.project_name,
        )
        .with_description(&self.config.project_description)
        .with_options(self.config.reconcile_options())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use crate::remote::{CommandOutput, MockShell};

    fn fleet(dir: &Path, yaml: &str) -> (Fleet, Arc<MockProvider>, Arc<MockShell>) {
        let mut config = FleetConfig::parse(yaml).unwrap();
        config.readiness.poll_interval_secs = 1;
        for script in [&mut config.scripts.go, &mut config.scripts.consensus_app, &mut config.scripts.da_node] {
            let path = dir.join(script.rsplit('/').next().unwrap());
            std::fs::write(&path, "#!/bin/sh\n").unwrap();
            *script = path.to_string_lossy().into_owned();
        }
        let provider = Arc::new(MockProvider::new());
        let shell = Arc::new(MockShell::new());
        let fleet = Fleet::new(config, &dir.join("state.json"), provider.clone(), shell.clone());
        (fleet, provider, shell)
    }

    const THREE_VALIDATORS_AND_BRIDGE: &str =
        "node_groups:\n  - role: validator\n    count: 3\n  - role: bridge\n    count: 1\n";

    #[test]
    fn status_before_anything_lists_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (fleet, _, _) = fleet(dir.path(), THREE_VALIDATORS_AND_BRIDGE);
        let status = fleet.status().unwrap();
        assert_eq!(status.user_id, None);
        assert_eq!(status.missing.len(), 4);
        assert!(status.instances.is_empty());
    }

    #[test]
    fn prepare_then_bootstrap_validators_only() {
        let dir = tempfile::tempdir().unwrap();
        let (fleet, _, shell) = fleet(dir.path(), THREE_VALIDATORS_AND_BRIDGE);

        let summary = fleet.prepare_infra().unwrap();
        assert_eq!(summary.instances.len(), 4);
        let status = fleet.status().unwrap();
        assert!(status.missing.is_empty());

        let outcome = fleet.bootstrap_network("devnet-1", None).unwrap();
        assert_eq!(outcome.genesis.validators.len(), 3);
        let bridge = summary.instances.iter().find(|r| r.name == "bridge-1").unwrap();
        assert!(shell.files_on(&bridge.public_ip).is_empty());
    }

    #[test]
    fn bootstrap_before_prepare_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let (fleet, _, _) = fleet(dir.path(), "");
        let mut repo = Repository::open(&dir.path().join("state.json")).unwrap();
        repo.push_instance("devnet", InstanceRecord::new(9, "validator-1")).unwrap();
        drop(repo);

        let err = fleet.bootstrap_network("devnet-1", Some(1)).unwrap_err();
        assert!(matches!(err, Error::NotReady(ref names) if names == &vec!["validator-1".to_string()]));
    }

    #[tokio::test]
    async fn install_uses_configured_version_and_selection() {
        let dir = tempfile::tempdir().unwrap();
        let (fleet, _, shell) = fleet(dir.path(), THREE_VALIDATORS_AND_BRIDGE);
        shell.respond(None, "celestia-appd", CommandOutput::failed(1, ""));
        let summary = fleet.prepare_infra().unwrap();

        let report = fleet.install(Component::ConsensusApp, None).await.unwrap();
        assert_eq!(report.outcomes.len(), 3);
        let v1 = &summary.instances[0].public_ip;
        let last = shell.commands_for(v1).pop().unwrap();
        assert!(last.ends_with("./install_celestia_app.sh 'v3.4.2-mammoth-v0.7.0'"));

        let bridge = summary.instances.iter().find(|r| r.name == "bridge-1").unwrap();
        assert!(shell.commands_for(&bridge.public_ip).is_empty());
    }

    #[tokio::test]
    async fn install_failure_surfaces_host() {
        let dir = tempfile::tempdir().unwrap();
        let (fleet, _, shell) = fleet(dir.path(), "");
        let summary = fleet.prepare_infra().unwrap();
        let ip = summary.instances[0].public_ip.clone();
        shell.respond(None, "command -v go", CommandOutput::failed(1, ""));
        shell.respond(Some(ip.as_str()), "./install_go.sh", CommandOutput::failed(1, "download failed"));

        let err = fleet.install(Component::Toolchain, Some("1.22.0")).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("validator-1"));
        assert!(msg.contains("install go 1.22.0"));
    }

    #[test]
    fn delete_all_then_status_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (fleet, provider, _) = fleet(dir.path(), THREE_VALIDATORS_AND_BRIDGE);
        fleet.prepare_infra().unwrap();
        assert_eq!(fleet.delete_all().unwrap(), 4);
        assert!(provider.live_instance_names().is_empty());
        let status = fleet.status().unwrap();
        assert!(status.instances.is_empty());
        assert_eq!(status.missing.len(), 4);
    }
}
