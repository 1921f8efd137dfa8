//! Fleet configuration file (`fleet.yaml`).
//!
//! Every field has a default, so an empty file describes a single validator
//! on the default provider. Node groups expand into concrete instance specs
//! named `<role>-<n>`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bootstrap::genesis::DEFAULT_BLOCK_MAX_BYTES;
use crate::bootstrap::keys::DEFAULT_SEED;
use crate::bootstrap::node_config::DEFAULT_MIN_GAS_PRICES;
use crate::bootstrap::sequencer::DEFAULT_HOME_DIR;
use crate::bootstrap::BootstrapOptions;
use crate::install::Component;
use crate::reconcile::ReconcileOptions;
use crate::remote::SshConfig;
use crate::types::{InstallFlags, InstanceSpec, VolumeSpec};

/// Environment variable holding the provider API key.
pub const API_KEY_ENV: &str = "FLEETSTRAP_API_KEY";


#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid fleet config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid fleet config: {0}")]
    Invalid(String),
}


// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "http://localhost:8000/talis/".into(),
            api_key_env: API_KEY_ENV.into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Versions {
    pub go: String,
    pub consensus_app: String,
    pub da_node: String,
}

impl Default for Versions {
    fn default() -> Self {
        Versions {
            go: "1.23.0".into(),
            consensus_app: "v3.4.2-mammoth-v0.7.0".into(),
            da_node: "v0.21.9-mammoth-v0.0.16".into(),
        }
    }
}

/// Local installer script locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scripts {
    pub go: String,
    pub consensus_app: String,
    pub da_node: String,
}

impl Default for Scripts {
    fn default() -> Self {
        Scripts {
            go: "scripts/install_go.sh".into(),
            consensus_app: "scripts/install_celestia_app.sh".into(),
            da_node: "scripts/install_celestia_node.sh".into(),
        }
    }
}

/// Instance settings shared by every node group unless overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceDefaults {
    pub provider: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub tags: Vec<String>,
    pub ssh_key_name: String,
    pub ssh_key_path: String,
    pub volume: VolumeSpec,
}

impl Default for InstanceDefaults {
    fn default() -> Self {
        let base = InstanceSpec::new("", InstallFlags::default());
        InstanceDefaults {
            provider: base.provider,
            region: base.region,
            size: base.size,
            image: base.image,
            tags: base.tags,
            ssh_key_name: String::new(),
            ssh_key_path: "~/.ssh/id_ed25519".into(),
            volume: base.volume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Validator,
    Bridge,
    Light,
    Full,
}

impl NodeRole {
    pub fn name(&self) -> &'static str {
        match self {
            NodeRole::Validator => "validator",
            NodeRole::Bridge => "bridge",
            NodeRole::Light => "light",
            NodeRole::Full => "full",
        }
    }

    /// Software each role needs beyond the toolchain.
    pub fn install_flags(&self) -> InstallFlags {
        match self {
            NodeRole::Validator => InstallFlags {
                consensus_app: true,
                da_node: false,
            },
            NodeRole::Bridge | NodeRole::Light => InstallFlags {
                consensus_app: false,
                da_node: true,
            },
            NodeRole::Full => InstallFlags {
                consensus_app: true,
                da_node: true,
            },
        }
    }
}

/// `count` instances of one role, optionally overriding the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub role: NodeRole,
    #[serde(default = "default_count")]
    pub count: u32,
    /// Name prefix; defaults to the role name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub volume_size_gb: Option<u32>,
}

fn default_count() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Readiness {
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for Readiness {
    fn default() -> Self {
        Readiness {
            timeout_secs: 300,
            poll_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSettings {
    pub home_dir: String,
    pub seed: u64,
    /// Fixed so that reruns produce byte-identical genesis files.
    pub genesis_time: DateTime<Utc>,
    pub min_gas_prices: String,
    pub block_max_bytes: u64,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        BootstrapSettings {
            home_dir: DEFAULT_HOME_DIR.into(),
            seed: DEFAULT_SEED,
            genesis_time: DateTime::<Utc>::default(),
            min_gas_prices: DEFAULT_MIN_GAS_PRICES.into(),
            block_max_bytes: DEFAULT_BLOCK_MAX_BYTES,
        }
    }
}


// ---------------------------------------------------------------------------
// FleetConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub api: ApiConfig,
    pub username: String,
    pub project_name: String,
    pub project_description: String,
    pub ssh: SshConfig,
    pub versions: Versions,
    pub scripts: Scripts,
    pub defaults: InstanceDefaults,
    pub node_groups: Vec<NodeGroup>,
    pub readiness: Readiness,
    pub bootstrap: BootstrapSettings,
}

impl Default for FleetConfig {
    fn default() -> Self {
        FleetConfig {
            api: ApiConfig::default(),
            username: "fleetstrap".into(),
            project_name: "devnet".into(),
            project_description: "fleetstrap test network".into(),
            ssh: SshConfig::default(),
            versions: Versions::default(),
            scripts: Scripts::default(),
            defaults: InstanceDefaults::default(),
            node_groups: vec![NodeGroup {
                role: NodeRole::Validator,
                count: 1,
                name: None,
                region: None,
                size: None,
                volume_size_gb: None,
            }],
            readiness: Readiness::default(),
            bootstrap: BootstrapSettings::default(),
        }
    }
}

impl FleetConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<FleetConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate YAML. An empty document yields the defaults.
    pub fn parse(content: &str) -> Result<FleetConfig, ConfigError> {
        let config: FleetConfig = if content.trim().is_empty() {
            FleetConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() {
            return Err(ConfigError::Invalid("username is empty".into()));
        }
        if self.project_name.trim().is_empty() {
            return Err(ConfigError::Invalid("project_name is empty".into()));
        }
        if self.readiness.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("readiness.poll_interval_secs must be positive".into()));
        }
        let mut seen = HashSet::new();
        for spec in self.instance_specs() {
            if !seen.insert(spec.name.clone()) {
                return Err(ConfigError::Invalid(format!("instance name '{}' is used twice", spec.name)));
            }
        }
        Ok(())
    }

    /// Expand node groups into instance specs, in group order.
    pub fn instance_specs(&self) -> Vec<InstanceSpec> {
        let d = &self.defaults;
        let mut specs = Vec::new();
        for group in &self.node_groups {
            let prefix = group.name.as_deref().unwrap_or(group.role.name());
            for n in 1..=group.count {
                let mut spec = InstanceSpec::new(&format!("{}-{}", prefix, n), group.role.install_flags())
                    .with_provider(&d.provider)
                    .with_region(group.region.as_deref().unwrap_or(&d.region))
                    .with_size(group.size.as_deref().unwrap_or(&d.size));
                spec.image = d.image.clone();
                spec.tags = d.tags.clone();
                spec.ssh_key_name = d.ssh_key_name.clone();
                spec.ssh_key_path = expand_path(&d.ssh_key_path);
                spec.volume = d.volume.clone();
                if let Some(size) = group.volume_size_gb {
                    spec = spec.with_volume_size(size);
                }
                specs.push(spec);
            }
        }
        specs
    }

    /// API key from the configured environment variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// SSH settings with the private key path expanded.
    pub fn ssh_config(&self) -> SshConfig {
        let mut ssh = self.ssh.clone();
        ssh.private_key = ssh
            .private_key
            .map(|p| PathBuf::from(expand_path(&p.to_string_lossy())));
        ssh
    }

    pub fn version_for(&self, component: Component) -> &str {
        match component {
            Component::Toolchain => &self.versions.go,
            Component::ConsensusApp => &self.versions.consensus_app,
            Component::DaNode => &self.versions.da_node,
        }
    }

    pub fn script_for(&self, component: Component) -> PathBuf {
        let raw = match component {
            Component::Toolchain => &self.scripts.go,
            Component::ConsensusApp => &self.scripts.consensus_app,
            Component::DaNode => &self.scripts.da_node,
        };
        PathBuf::from(expand_path(raw))
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            ready_timeout: Duration::from_secs(self.readiness.timeout_secs),
            poll_interval: Duration::from_secs(self.readiness.poll_interval_secs),
        }
    }

    pub fn bootstrap_options(&self) -> BootstrapOptions {
        BootstrapOptions {
            home_dir: self.bootstrap.home_dir.clone(),
            genesis_time: self.bootstrap.genesis_time,
            min_gas_prices: self.bootstrap.min_gas_prices.clone(),
            block_max_bytes: self.bootstrap.block_max_bytes,
            ..BootstrapOptions::default()
        }
    }
}


/// Expand a leading `~` and `$VAR` / `${VAR}` references. Unset variables
/// expand to nothing.
pub fn expand_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            if let Ok(home) = std::env::var("HOME") {
                return format!("{}{}", home, rest);
            }
            return path.to_string();
        }
    }

    let mut out = String::with_capacity(path.len());
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&n) = chars.peek() {
            if n.is_ascii_alphanumeric() || n == '_' {
                name.push(n);
                chars.next();
            } else {
                break;
            }
        }
        if braced && chars.peek() == Some(&'}') {
            chars.next();
        }
        if name.is_empty() {
            out.push('$');
            if braced {
                out.push('{');
            }
            continue;
        }
        out.push_str(&std::env::var(&name).unwrap_or_default());
    }
    out
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::HostKeyPolicy;

    #[test]
    fn empty_config_is_one_validator() {
        let config = FleetConfig::parse("").unwrap();
        let specs = config.instance_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "validator-1");
        assert!(specs[0].install.consensus_app);
        assert_eq!(config.reconcile_options(), ReconcileOptions::default());
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
api:
  base_url: "https://fleet.example.net/api/"
username: alice
project_name: mammoth
ssh:
  user: ubuntu
  private_key: /keys/fleet
  host_key_policy:
    mode: pinned
    known_hosts: /keys/known_hosts
versions:
  go: "1.22.5"
defaults:
  region: fra1
  tags: [fleet]
node_groups:
  - role: validator
    count: 3
  - role: bridge
    count: 2
    size: s-4vcpu-8gb
  - role: full
    name: archive
    volume_size_gb: 200
readiness:
  timeout_secs: 60
  poll_interval_secs: 2
bootstrap:
  seed: 7
  genesis_time: "2025-01-01T00:00:00Z"
"#;
        let config = FleetConfig::parse(yaml).unwrap();
        assert_eq!(config.username, "alice");
        assert_eq!(config.ssh.user, "ubuntu");
        assert_eq!(
            config.ssh.host_key_policy,
            HostKeyPolicy::Pinned {
                known_hosts: PathBuf::from("/keys/known_hosts")
            }
        );
        assert_eq!(config.version_for(Component::Toolchain), "1.22.5");
        assert_eq!(config.version_for(Component::DaNode), "v0.21.9-mammoth-v0.0.16");
        assert_eq!(config.bootstrap.seed, 7);
        assert_eq!(config.bootstrap_options().genesis_time.to_rfc3339(), "2025-01-01T00:00:00+00:00");
        assert_eq!(config.reconcile_options().poll_interval, Duration::from_secs(2));

        let specs = config.instance_specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["validator-1", "validator-2", "validator-3", "bridge-1", "bridge-2", "archive-1"]
        );
        assert!(specs.iter().all(|s| s.region == "fra1"));
        assert_eq!(specs[3].size, "s-4vcpu-8gb");
        assert!(specs[3].install.da_node && !specs[3].install.consensus_app);
        assert!(specs[5].install.da_node && specs[5].install.consensus_app);
        assert_eq!(specs[5].volume.size_gb, 200);
        assert_eq!(specs[0].tags, vec!["fleet".to_string()]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let yaml = "node_groups:\n  - role: validator\n    count: 2\n  - role: full\n    name: validator\n";
        let err = FleetConfig::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("validator-1"));
    }

    #[test]
    fn unknown_role_is_parse_error() {
        let err = FleetConfig::parse("node_groups:\n  - role: miner\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = FleetConfig::parse("readiness:\n  poll_interval_secs: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn expand_home_and_vars() {
        let home = std::env::var("HOME").unwrap();
        assert_eq!(expand_path("~/.ssh/key"), format!("{}/.ssh/key", home));
        assert_eq!(expand_path("$HOME/x"), format!("{}/x", home));
        assert_eq!(expand_path("${HOME}/y"), format!("{}/y", home));
        assert_eq!(expand_path("/plain/path"), "/plain/path");
        assert_eq!(expand_path("~user/path"), "~user/path");
        assert_eq!(expand_path("/a/$FLEETSTRAP_SURELY_UNSET_VAR/b"), "/a//b");
        assert_eq!(expand_path("cost$"), "cost$");
    }

    #[test]
    fn missing_config_file_is_io_error() {
        let err = FleetConfig::load(Path::new("/nonexistent/fleet.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
