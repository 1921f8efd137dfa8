//! Installable software components.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::InstanceSpec;


/// Software the installer knows how to probe for and install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    /// Go toolchain. Installed on every instance.
    Toolchain,
    /// Consensus application binary (`celestia-appd`).
    ConsensusApp,
    /// Data-availability node binary (`celestia`).
    DaNode,
}

impl Component {
    pub const ALL: [Component; 3] = [Component::Toolchain, Component::ConsensusApp, Component::DaNode];

    pub fn name(&self) -> &'static str {
        match self {
            Component::Toolchain => "go",
            Component::ConsensusApp => "celestia-app",
            Component::DaNode => "celestia-node",
        }
    }

    /// Remote command that exits 0 iff the component is already installed.
    pub fn probe(&self) -> &'static str {
        match self {
            Component::Toolchain => "test -x /usr/local/go/bin/go || command -v go >/dev/null 2>&1",
            Component::ConsensusApp => "test -d \"$HOME/celestia-app\" && test -x \"$HOME/go/bin/celestia-appd\"",
            Component::DaNode => "test -d \"$HOME/celestia-node\" && test -x \"$HOME/go/bin/celestia\"",
        }
    }

    /// File name the installer script is copied to on the host.
    pub fn remote_script(&self) -> &'static str {
        match self {
            Component::Toolchain => "install_go.sh",
            Component::ConsensusApp => "install_celestia_app.sh",
            Component::DaNode => "install_celestia_node.sh",
        }
    }

    /// Whether an instance with this spec should receive the component.
    /// Instances without a spec only get the toolchain.
    pub fn wanted_by(&self, spec: Option<&InstanceSpec>) -> bool {
        match self {
            Component::Toolchain => true,
            Component::ConsensusApp => spec.is_some_and(|s| s.install.consensus_app),
            Component::DaNode => spec.is_some_and(|s| s.install.da_node),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "go" | "toolchain" => Ok(Component::Toolchain),
            "app" | "celestia-app" | "consensus-app" => Ok(Component::ConsensusApp),
            "node" | "celestia-node" | "da-node" => Ok(Component::DaNode),
            other => Err(format!(
                "unknown component '{}' (expected go, celestia-app or celestia-node)",
                other
            )),
        }
    }
}
