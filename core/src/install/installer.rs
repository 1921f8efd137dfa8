//! Probe-then-install workers.
//!
//! `Installer::run` spawns one task per host into a `JoinSet`. Each task
//! takes a semaphore permit before opening its session and holds it until
//! the blocking remote work finishes, so no more than the limit of sessions
//! are ever open at once.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::component::Component;
use super::InstallError;
use crate::remote::{shell_quote, RemoteError, RemoteShell};
use crate::types::{InstanceRecord, InstanceSpec};

/// Upper bound on simultaneously open remote sessions.
pub const MAX_CONCURRENT_SESSIONS: usize = 10;


// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// What to install: a component at a version, from a local script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallAction {
    pub component: Component,
    pub version: String,
    pub script_path: PathBuf,
}

impl InstallAction {
    pub fn new(component: Component, version: &str, script_path: impl Into<PathBuf>) -> Self {
        InstallAction {
            component,
            version: version.to_string(),
            script_path: script_path.into(),
        }
    }

    /// An empty version asks the script for the latest release.
    pub fn is_latest(&self) -> bool {
        self.version.trim().is_empty()
    }

    /// Human-readable label used in logs and errors.
    pub fn label(&self) -> String {
        let version = if self.is_latest() { "latest" } else { self.version.as_str() };
        format!("install {} {}", self.component, version)
    }

    fn install_command(&self) -> String {
        let script = self.component.remote_script();
        if self.is_latest() {
            return format!("chmod +x {script} && ./{script}", script = script);
        }
        format!(
            "chmod +x {script} && ./{script} {version}",
            script = script,
            version = shell_quote(self.version.trim())
        )
    }
}


/// One host the action should run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub name: String,
    pub address: String,
}

impl From<&InstanceRecord> for InstallTarget {
    fn from(record: &InstanceRecord) -> Self {
        InstallTarget {
            name: record.name.clone(),
            address: record.public_ip.clone(),
        }
    }
}


// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Installed,
    /// The probe found the component already present.
    AlreadyPresent,
    /// The record has no address yet.
    SkippedNoAddress,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOutcome {
    pub name: String,
    pub address: String,
    pub outcome: Outcome,
}

#[derive(Debug)]
pub struct HostFailure {
    pub name: String,
    pub address: String,
    pub error: RemoteError,
}

/// Everything one pass did, host by host.
#[derive(Debug)]
pub struct InstallReport {
    pub action: InstallAction,
    pub outcomes: Vec<HostOutcome>,
    pub failures: Vec<HostFailure>,
}

impl InstallReport {
    fn new(action: InstallAction) -> Self {
        InstallReport {
            action,
            outcomes: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.iter().filter(|o| o.outcome == outcome).count()
    }

    pub fn outcome_for(&self, name: &str) -> Option<Outcome> {
        self.outcomes.iter().find(|o| o.name == name).map(|o| o.outcome)
    }

    /// The report itself on full success, otherwise the first failure.
    /// Remaining failures are logged.
    pub fn into_result(mut self) -> Result<InstallReport, InstallError> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        let mut failures = std::mem::take(&mut self.failures).into_iter();
        let first = failures.next();
        for other in failures {
            error!(host = %other.name, address = %other.address, error = %other.error, "additional install failure");
        }
        match first {
            Some(f) => Err(InstallError::Host {
                action: self.action.label(),
                host: f.name,
                address: f.address,
                source: f.error,
            }),
            None => Ok(self),
        }
    }
}


// ---------------------------------------------------------------------------
// Installer
// ---------------------------------------------------------------------------

pub struct Installer {
    shell: Arc<dyn RemoteShell>,
    limit: usize,
}

impl Installer {
    pub fn new(shell: Arc<dyn RemoteShell>) -> Self {
        Installer {
            shell,
            limit: MAX_CONCURRENT_SESSIONS,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Targets for `component`: records whose spec asks for it. Records are
    /// matched to specs by logical name.
    pub fn select(component: Component, records: &[InstanceRecord], specs: &[InstanceSpec]) -> Vec<InstallTarget> {
        records
            .iter()
            .filter(|r| component.wanted_by(specs.iter().find(|s| s.name == r.name)))
            .map(InstallTarget::from)
            .collect()
    }

    /// Run `action` on every target and wait for all of them.
    pub async fn run(&self, action: &InstallAction, targets: Vec<InstallTarget>) -> InstallReport {
        let mut report = InstallReport::new(action.clone());
        let permits = Arc::new(Semaphore::new(self.limit));
        let mut tasks = JoinSet::new();
        let mut outstanding = BTreeMap::new();

        for target in targets {
            if target.address.is_empty() {
                info!(host = %target.name, component = %action.component, "no address recorded; skipping");
                report.outcomes.push(HostOutcome {
                    name: target.name,
                    address: target.address,
                    outcome: Outcome::SkippedNoAddress,
                });
                continue;
            }
            outstanding.insert(target.name.clone(), target.address.clone());

            let permits = Arc::clone(&permits);
            let shell = Arc::clone(&self.shell);
            let action = action.clone();
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(permit) => {
                        let address = target.address.clone();
                        let joined = tokio::task::spawn_blocking(move || {
                            let _permit = permit;
                            install_on_host(shell.as_ref(), &action, &address)
                        })
                        .await;
                        joined.unwrap_or_else(|e| {
                            Err(RemoteError::Aborted {
                                host: target.address.clone(),
                                reason: e.to_string(),
                            })
                        })
                    }
                    Err(e) => Err(RemoteError::Aborted {
                        host: target.address.clone(),
                        reason: e.to_string(),
                    }),
                };
                (target, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (target, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "install worker did not complete");
                    continue;
                }
            };
            outstanding.remove(&target.name);
            match result {
                Ok(outcome) => {
                    if outcome == Outcome::AlreadyPresent {
                        info!(host = %target.name, component = %action.component, "already installed");
                    } else {
                        info!(host = %target.name, component = %action.component, version = %action.version, "installed");
                    }
                    report.outcomes.push(HostOutcome {
                        name: target.name,
                        address: target.address,
                        outcome,
                    });
                }
                Err(error) => {
                    warn!(host = %target.name, address = %target.address, error = %error, "install failed");
                    report.failures.push(HostFailure {
                        name: target.name,
                        address: target.address,
                        error,
                    });
                }
            }
        }

        // Workers that panicked never reported back.
        for (name, address) in outstanding {
            report.failures.push(HostFailure {
                name,
                address: address.clone(),
                error: RemoteError::Aborted {
                    host: address,
                    reason: "worker panicked".into(),
                },
            });
        }

        report
    }
}


/// Blocking body of one worker.
fn install_on_host(shell: &dyn RemoteShell, action: &InstallAction, address: &str) -> Result<Outcome, RemoteError> {
    let session = shell.connect(address)?;
    let result = (|| -> Result<Outcome, RemoteError> {
        match shell.run(&session, action.component.probe()) {
            Ok(_) => return Ok(Outcome::AlreadyPresent),
            Err(e) if e.is_exit_failure() => {}
            Err(e) => return Err(e),
        }
        shell.copy_file(&session, &action.script_path, action.component.remote_script(), 0o755)?;
        shell.run(&session, &action.install_command())?;
        Ok(Outcome::Installed)
    })();
    shell.close(session);
    result
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::remote::{CommandOutput, MockShell};
    use crate::types::InstallFlags;

    fn script() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("install_go.sh");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        (dir, path)
    }

    fn targets(n: usize) -> Vec<InstallTarget> {
        (1..=n)
            .map(|i| InstallTarget {
                name: format!("node-{}", i),
                address: format!("10.0.0.{}", i),
            })
            .collect()
    }

    #[tokio::test]
    async fn probe_success_skips_install() {
        let (_dir, path) = script();
        let shell = Arc::new(MockShell::new());
        shell.respond(Some("10.0.0.1"), "/usr/local/go/bin/go", CommandOutput::ok(""));
        shell.respond(None, "/usr/local/go/bin/go", CommandOutput::failed(1, ""));

        let action = InstallAction::new(Component::Toolchain, "1.23.0", path);
        let report = Installer::new(shell.clone()).run(&action, targets(2)).await;

        assert!(report.is_success());
        assert_eq!(report.outcome_for("node-1"), Some(Outcome::AlreadyPresent));
        assert_eq!(report.outcome_for("node-2"), Some(Outcome::Installed));
        assert_eq!(shell.commands_for("10.0.0.1").len(), 1);
        assert!(shell.file("10.0.0.1", "install_go.sh").is_none());

        let (content, mode) = shell.file("10.0.0.2", "install_go.sh").unwrap();
        assert_eq!(content, b"#!/bin/sh\nexit 0\n");
        assert_eq!(mode, 0o755);
        let cmds = shell.commands_for("10.0.0.2");
        assert_eq!(cmds.last().unwrap(), "chmod +x install_go.sh && ./install_go.sh '1.23.0'");
    }

    #[tokio::test]
    async fn empty_version_installs_latest() {
        let (_dir, path) = script();
        let shell = Arc::new(MockShell::new());
        shell.respond(None, "/usr/local/go/bin/go", CommandOutput::failed(1, ""));

        let action = InstallAction::new(Component::Toolchain, "  ", path);
        assert_eq!(action.label(), "install go latest");
        let report = Installer::new(shell.clone()).run(&action, targets(1)).await;

        assert!(report.is_success());
        let cmds = shell.commands_for("10.0.0.1");
        assert_eq!(cmds.last().unwrap(), "chmod +x install_go.sh && ./install_go.sh");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sessions_are_bounded() {
        let (_dir, path) = script();
        let shell = Arc::new(MockShell::with_delay(Duration::from_millis(20)));
        shell.respond(None, "command -v go", CommandOutput::failed(1, ""));

        let action = InstallAction::new(Component::Toolchain, "1.23.0", path);
        let report = Installer::new(shell.clone()).run(&action, targets(25)).await;

        assert!(report.is_success());
        assert_eq!(report.count(Outcome::Installed), 25);
        assert!(shell.max_concurrent_sessions() <= MAX_CONCURRENT_SESSIONS);
        assert!(shell.max_concurrent_sessions() > 1);
        assert_eq!(shell.open_sessions(), 0);
    }

    #[tokio::test]
    async fn custom_limit_is_respected() {
        let (_dir, path) = script();
        let shell = Arc::new(MockShell::with_delay(Duration::from_millis(5)));
        let action = InstallAction::new(Component::Toolchain, "1.23.0", path);
        Installer::new(shell.clone())
            .with_limit(3)
            .run(&action, targets(8))
            .await;
        assert!(shell.max_concurrent_sessions() <= 3);
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_others() {
        let (_dir, path) = script();
        let shell = Arc::new(MockShell::new());
        shell.respond(None, "/usr/local/go/bin/go", CommandOutput::failed(1, ""));
        shell.respond(Some("10.0.0.2"), "./install_go.sh", CommandOutput::failed(2, "checksum mismatch"));
        shell.set_unreachable("10.0.0.3");

        let action = InstallAction::new(Component::Toolchain, "1.23.0", path);
        let report = Installer::new(shell.clone()).run(&action, targets(4)).await;

        assert_eq!(report.count(Outcome::Installed), 2);
        assert_eq!(report.failures.len(), 2);
        let mut failed: Vec<&str> = report.failures.iter().map(|f| f.name.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["node-2", "node-3"]);

        let err = report.into_result().unwrap_err();
        let InstallError::Host { host, action, .. } = err;
        assert!(host == "node-2" || host == "node-3");
        assert!(action.contains("go"));
    }

    #[tokio::test]
    async fn records_without_address_are_skipped() {
        let (_dir, path) = script();
        let shell = Arc::new(MockShell::new());
        let action = InstallAction::new(Component::Toolchain, "1.23.0", path);
        let target = InstallTarget {
            name: "validator-1".into(),
            address: String::new(),
        };
        let report = Installer::new(shell.clone()).run(&action, vec![target]).await;
        assert_eq!(report.outcome_for("validator-1"), Some(Outcome::SkippedNoAddress));
        assert_eq!(shell.command_count(), 0);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn select_matches_specs_by_name() {
        let mut v = InstanceRecord::new(1, "validator-1");
        v.public_ip = "10.0.0.1".into();
        let mut b = InstanceRecord::new(2, "bridge-1");
        b.public_ip = "10.0.0.2".into();
        let stray = InstanceRecord::new(3, "leftover");
        let specs = vec![
            InstanceSpec::new("bridge-1", InstallFlags { consensus_app: false, da_node: true }),
            InstanceSpec::new("validator-1", InstallFlags { consensus_app: true, da_node: false }),
        ];
        let records = vec![v, b, stray];

        let app: Vec<String> = Installer::select(Component::ConsensusApp, &records, &specs)
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(app, vec!["validator-1"]);
        assert_eq!(Installer::select(Component::DaNode, &records, &specs)[0].address, "10.0.0.2");
        assert_eq!(Installer::select(Component::Toolchain, &records, &specs).len(), 3);
    }
}
