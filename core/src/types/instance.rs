//! Desired instance specifications.
//!
//! An `InstanceSpec` is built once from the fleet configuration before
//! reconciliation starts and is never mutated afterwards.

use serde::{Deserialize, Serialize};


// ---------------------------------------------------------------------------
// VolumeSpec
// ---------------------------------------------------------------------------

/// Block volume attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub size_gb: u32,
    pub mount_point: String,
}

impl Default for VolumeSpec {
    fn default() -> Self {
        VolumeSpec {
            name: "fleetstrap-volume".into(),
            size_gb: 15,
            mount_point: "/mnt/data".into(),
        }
    }
}


// ---------------------------------------------------------------------------
// InstallFlags
// ---------------------------------------------------------------------------

/// Which optional software components an instance should receive.
///
/// The base toolchain is installed everywhere and has no flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallFlags {
    #[serde(default)]
    pub consensus_app: bool,
    #[serde(default)]
    pub da_node: bool,
}


// ---------------------------------------------------------------------------
// InstanceSpec
// ---------------------------------------------------------------------------

/// A desired remote compute instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Logical name, unique within the project (e.g. "validator-1").
    pub name: String,
    /// Provider identifier understood by the fleet API (e.g. "do").
    pub provider: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub tags: Vec<String>,
    /// Name of the SSH key registered with the provider.
    pub ssh_key_name: String,
    /// Path of the matching private key, forwarded to the provider.
    pub ssh_key_path: String,
    pub volume: VolumeSpec,
    pub install: InstallFlags,
}

impl InstanceSpec {
    /// Create a spec with provider defaults and the given install flags.
    pub fn new(name: &str, install: InstallFlags) -> Self {
        InstanceSpec {
            name: name.to_string(),
            provider: "do".into(),
            region: "nyc1".into(),
            size: "s-1vcpu-1gb".into(),
            image: "ubuntu-24-04-x64".into(),
            tags: vec!["fleetstrap".into()],
            ssh_key_name: String::new(),
            ssh_key_path: String::new(),
            volume: VolumeSpec::default(),
            install,
        }
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    pub fn with_size(mut self, size: &str) -> Self {
        self.size = size.to_string();
        self
    }

    pub fn with_volume_size(mut self, size_gb: u32) -> Self {
        self.volume.size_gb = size_gb;
        self
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = provider.to_string();
        self
    }

    /// The instance name sent to the provider. The project prefix keeps
    /// names unique across projects sharing one provider account.
    pub fn provider_name(&self, project: &str) -> String {
        provider_instance_name(project, &self.name)
    }
}


/// Provider-side name for a logical instance within a project.
pub fn provider_instance_name(project: &str, logical_name: &str) -> String {
    format!("{}-{}", project, logical_name)
}
