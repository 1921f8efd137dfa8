//! SSH connection settings shared by every host in the fleet.
//!
//! `SshConfig` describes how to reach a host (user, port, key, timeouts) and
//! how to verify its identity. `ssh_base_args` turns it into the argument
//! vector passed to the local `ssh` client.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};


// ---------------------------------------------------------------------------
// HostKeyPolicy
// ---------------------------------------------------------------------------

/// How remote host keys are verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Record unknown hosts on first contact, reject changed keys afterwards.
    #[default]
    TrustOnFirstUse,
    /// Only accept keys already present in `known_hosts`.
    Pinned { known_hosts: PathBuf },
    /// Skip verification entirely. Test fleets only.
    Insecure,
}

impl HostKeyPolicy {
    /// `-o` options implementing this policy.
    pub fn ssh_options(&self) -> Vec<String> {
        match self {
            HostKeyPolicy::TrustOnFirstUse => vec!["StrictHostKeyChecking=accept-new".into()],
            HostKeyPolicy::Pinned { known_hosts } => vec![
                "StrictHostKeyChecking=yes".into(),
                format!("UserKnownHostsFile={}", known_hosts.display()),
            ],
            HostKeyPolicy::Insecure => vec![
                "StrictHostKeyChecking=no".into(),
                "UserKnownHostsFile=/dev/null".into(),
            ],
        }
    }

    pub fn is_insecure(&self) -> bool {
        matches!(self, HostKeyPolicy::Insecure)
    }
}


// ---------------------------------------------------------------------------
// SshConfig
// ---------------------------------------------------------------------------

/// SSH coordinates used for every fleet host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Private key for key-based auth. Falls back to the agent/default keys.
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
}

fn default_user() -> String {
    "root".into()
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for SshConfig {
    fn default() -> Self {
        SshConfig {
            user: default_user(),
            port: default_port(),
            private_key: None,
            connect_timeout_secs: default_connect_timeout(),
            host_key_policy: HostKeyPolicy::default(),
        }
    }
}

impl SshConfig {
    /// Build the `user@host` destination.
    pub fn destination(&self, host: &str) -> String {
        format!("{}@{}", self.user, host)
    }

    /// Base `ssh` arguments (port, key, options, destination) without a
    /// remote command.
    pub fn ssh_base_args(&self, host: &str) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ];
        for opt in self.host_key_policy.ssh_options() {
            args.push("-o".to_string());
            args.push(opt);
        }
        if let Some(ref key) = self.private_key {
            args.push("-i".to_string());
            args.push(key.display().to_string());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }
        args.push(self.destination(host));
        args
    }
}
