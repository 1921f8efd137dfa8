//! `RemoteShell` over the local `ssh` client.
//!
//! Each call spawns one `ssh` process through a `CommandRunner`, so the same
//! code path is exercised by unit tests with a `MockRunner`.

use std::sync::Arc;

use tracing::{debug, warn};

use super::config::SshConfig;
use super::runner::{CommandOutput, CommandRunner, ProcessRunner};
use super::{shell_quote, staging_path, with_profile, RemoteError, RemoteShell, Session};

/// Exit status the `ssh` client itself uses for connection failures.
const SSH_TRANSPORT_FAILURE: i32 = 255;


// ---------------------------------------------------------------------------
// SshShell
// ---------------------------------------------------------------------------

pub struct SshShell {
    config: SshConfig,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for SshShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshShell").field("config", &self.config).finish()
    }
}

impl SshShell {
    /// Shell that spawns the real `ssh` binary.
    pub fn new(config: SshConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessRunner))
    }

    pub fn with_runner(config: SshConfig, runner: Arc<dyn CommandRunner>) -> Self {
        if config.host_key_policy.is_insecure() {
            warn!("host key verification is disabled; use only for throwaway test fleets");
        }
        SshShell { config, runner }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Full `ssh` argv for running `remote_command` on `host`.
    pub fn command_args(&self, host: &str, remote_command: &str) -> Vec<String> {
        let mut args = self.config.ssh_base_args(host);
        args.push(remote_command.to_string());
        args
    }

    fn invoke(&self, host: &str, remote_command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, RemoteError> {
        let args = self.command_args(host, remote_command);
        debug!(host, "ssh invoke");
        let output = self
            .runner
            .run("ssh", &args, stdin)
            .map_err(|e| RemoteError::Connection {
                host: host.to_string(),
                message: format!("failed to start ssh: {}", e),
            })?;

        if output.success() {
            return Ok(output);
        }
        if output.status == Some(SSH_TRANSPORT_FAILURE) {
            return Err(RemoteError::Connection {
                host: host.to_string(),
                message: last_line(&output.stderr),
            });
        }
        Err(RemoteError::Exec {
            host: host.to_string(),
            command: remote_command.to_string(),
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

impl RemoteShell for SshShell {
    fn connect(&self, host: &str) -> Result<Session, RemoteError> {
        match self.invoke(host, "true", None) {
            Ok(_) => Ok(Session::new(host)),
            Err(RemoteError::Exec { stderr, status, .. }) => Err(RemoteError::Connection {
                host: host.to_string(),
                message: if stderr.trim().is_empty() {
                    format!("probe exited with {:?}", status)
                } else {
                    last_line(&stderr)
                },
            }),
            Err(e) => Err(e),
        }
    }

    fn run(&self, session: &Session, command: &str) -> Result<CommandOutput, RemoteError> {
        self.invoke(session.host(), &with_profile(command), None)
    }

    fn write_file(&self, session: &Session, path: &str, content: &[u8], mode: u32) -> Result<(), RemoteError> {
        let tmp = staging_path(path);
        let command = format!(
            "cat > {tmp} && chmod {mode:o} {tmp} && mv -f {tmp} {dst}",
            tmp = shell_quote(&tmp),
            mode = mode,
            dst = shell_quote(path),
        );
        debug!(host = session.host(), path, bytes = content.len(), "writing remote file");
        self.invoke(session.host(), &command, Some(content)).map(|_| ())
    }
}


fn last_line(text: &str) -> String {
    text.trim().lines().last().unwrap_or("").to_string()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::config::HostKeyPolicy;
    use crate::remote::runner::MockRunner;

    fn shell(responses: Vec<CommandOutput>) -> (SshShell, Arc<MockRunner>) {
        let runner = Arc::new(MockRunner::with_responses(responses));
        (SshShell::with_runner(SshConfig::default(), runner.clone()), runner)
    }

    #[test]
    fn connect_runs_noop() {
        let (shell, runner) = shell(vec![]);
        let session = shell.connect("10.0.0.5").unwrap();
        assert_eq!(session.host(), "10.0.0.5");
        let calls = runner.calls();
        assert_eq!(calls[0].program, "ssh");
        assert_eq!(calls[0].args.last().unwrap(), "true");
        assert!(calls[0].args.contains(&"root@10.0.0.5".to_string()));
    }

    #[test]
    fn connect_failure_is_connection_error() {
        let (shell, _) = shell(vec![CommandOutput::failed(255, "Permission denied (publickey).")]);
        match shell.connect("10.0.0.5").unwrap_err() {
            RemoteError::Connection { message, .. } => assert!(message.contains("Permission denied")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn spawn_failure_is_connection_error() {
        let runner = Arc::new(MockRunner::new());
        runner.push_spawn_error("ssh not installed");
        let shell = SshShell::with_runner(SshConfig::default(), runner);
        assert!(matches!(shell.connect("h"), Err(RemoteError::Connection { .. })));
    }

    #[test]
    fn run_wraps_command_in_profile() {
        let (shell, runner) = shell(vec![CommandOutput::ok("go version go1.23.0")]);
        let out = shell.run(&Session::new("h"), "go version").unwrap();
        assert!(out.stdout.contains("go1.23.0"));
        let remote = runner.calls()[0].args.last().unwrap().clone();
        assert!(remote.contains("/usr/local/go/bin"));
        assert!(remote.ends_with("go version"));
    }

    #[test]
    fn nonzero_exit_is_exec_error() {
        let (shell, _) = shell(vec![CommandOutput::failed(2, "no such file")]);
        let err = shell.run(&Session::new("h"), "ls /missing").unwrap_err();
        match err {
            RemoteError::Exec { status, stderr, .. } => {
                assert_eq!(status, Some(2));
                assert_eq!(stderr, "no such file");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn write_file_stages_then_renames() {
        let (shell, runner) = shell(vec![]);
        shell
            .write_file(&Session::new("h"), "/root/.app/config/node_key.json", b"{}", 0o600)
            .unwrap();
        let call = &runner.calls()[0];
        let remote = call.args.last().unwrap();
        assert!(remote.starts_with("cat > '/root/.app/config/node_key.json.fleetstrap-tmp'"));
        assert!(remote.contains("chmod 600 "));
        assert!(remote.ends_with("mv -f '/root/.app/config/node_key.json.fleetstrap-tmp' '/root/.app/config/node_key.json'"));
        assert_eq!(call.stdin.as_deref(), Some(&b"{}"[..]));
    }

    #[test]
    fn copy_file_reads_local_content() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("install_go.sh");
        std::fs::write(&local, "#!/bin/sh\necho hi\n").unwrap();
        let (shell, runner) = shell(vec![]);
        shell
            .copy_file(&Session::new("h"), &local, "install_go.sh", 0o755)
            .unwrap();
        let call = &runner.calls()[0];
        assert_eq!(call.stdin.as_deref(), Some(&b"#!/bin/sh\necho hi\n"[..]));
        assert!(call.args.last().unwrap().contains("chmod 755 "));
    }

    #[test]
    fn copy_of_missing_local_file_never_contacts_host() {
        let (shell, runner) = shell(vec![]);
        let err = shell
            .copy_file(&Session::new("h"), std::path::Path::new("/nonexistent/script.sh"), "s.sh", 0o755)
            .unwrap_err();
        assert!(matches!(err, RemoteError::LocalIo { .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn insecure_policy_still_builds_args() {
        let config = SshConfig {
            host_key_policy: HostKeyPolicy::Insecure,
            ..SshConfig::default()
        };
        let shell = SshShell::with_runner(config, Arc::new(MockRunner::new()));
        let args = shell.command_args("h", "true");
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
    }
}
