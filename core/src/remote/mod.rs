//! Remote execution over SSH.
//!
//! `RemoteShell` is the blocking interface every fleet-wide operation uses to
//! reach a host: connect, run a command, write or copy a file. Each call is an
//! independent round trip. `SshShell` implements it on top of the local `ssh`
//! client through a `CommandRunner`; `MockShell` is the test double.
//!
//! Every command runs behind a profile prelude so tools installed by earlier
//! steps resolve by plain name even in a non-login shell.

pub mod config;
pub mod mock;
pub mod runner;
pub mod ssh;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use config::{HostKeyPolicy, SshConfig};
pub use mock::MockShell;
pub use runner::{CommandOutput, CommandRunner, MockRunner, ProcessRunner};
pub use ssh::SshShell;

/// Directories appended to `PATH` on every remote command.
pub const EXTRA_PATH_DIRS: [&str; 2] = ["/usr/local/go/bin", "$HOME/go/bin"];


// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport or authentication failure.
    #[error("cannot connect to {host}: {message}")]
    Connection { host: String, message: String },

    /// The remote command ran but exited unsuccessfully.
    #[error("command on {host} exited with {code}: {detail}", code = display_status(.status), detail = summarize(.stderr, .stdout))]
    Exec {
        host: String,
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("cannot read local file {}: {source}", .path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker running the remote call died before reporting.
    #[error("worker for {host} aborted: {reason}")]
    Aborted { host: String, reason: String },
}

impl RemoteError {
    /// Whether the failure is a non-zero exit (as opposed to unreachable).
    pub fn is_exit_failure(&self) -> bool {
        matches!(self, RemoteError::Exec { .. })
    }
}

fn display_status(status: &Option<i32>) -> String {
    match *status {
        Some(code) => format!("status {}", code),
        None => "signal".to_string(),
    }
}

fn summarize(stderr: &str, stdout: &str) -> String {
    let text = if stderr.trim().is_empty() { stdout } else { stderr };
    let line = text.trim().lines().last().unwrap_or("");
    if line.is_empty() {
        "(no output)".to_string()
    } else {
        line.to_string()
    }
}


// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// An authenticated handle to one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    host: String,
}

impl Session {
    pub fn new(host: &str) -> Self {
        Session {
            host: host.to_string(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}


// ---------------------------------------------------------------------------
// RemoteShell
// ---------------------------------------------------------------------------

/// Blocking remote-execution primitives.
pub trait RemoteShell: Send + Sync {
    /// Open a session, verifying transport and authentication.
    fn connect(&self, host: &str) -> Result<Session, RemoteError>;

    /// Run `command` through the profile prelude. Non-zero exit is an error.
    fn run(&self, session: &Session, command: &str) -> Result<CommandOutput, RemoteError>;

    /// Atomically replace `path` with `content`, then set `mode`.
    fn write_file(&self, session: &Session, path: &str, content: &[u8], mode: u32) -> Result<(), RemoteError>;

    /// Copy a local file to `remote_path`. Never leaves a partial destination.
    fn copy_file(&self, session: &Session, local_path: &Path, remote_path: &str, mode: u32) -> Result<(), RemoteError> {
        let content = std::fs::read(local_path).map_err(|source| RemoteError::LocalIo {
            path: local_path.to_path_buf(),
            source,
        })?;
        self.write_file(session, remote_path, &content, mode)
    }

    /// Release the session.
    fn close(&self, _session: Session) {}
}


/// Wrap `command` so it runs with the user's profile and install dirs on
/// `PATH`.
pub fn with_profile(command: &str) -> String {
    let mut script = String::from(
        "if [ -f \"$HOME/.bashrc\" ]; then . \"$HOME/.bashrc\" >/dev/null 2>&1; \
         elif [ -f \"$HOME/.bash_profile\" ]; then . \"$HOME/.bash_profile\" >/dev/null 2>&1; fi\n",
    );
    for dir in EXTRA_PATH_DIRS {
        script.push_str(&format!(
            "if [ -d \"{dir}\" ]; then export PATH=\"$PATH:{dir}\"; fi\n",
            dir = dir
        ));
    }
    script.push_str(command);
    script
}


/// Single-quote `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}


/// Temporary sibling path used while writing `path`.
pub fn staging_path(path: &str) -> String {
    format!("{}.fleetstrap-tmp", path)
}
