//! Staged network bootstrap.
//!
//! Stages run strictly in order over every registered node:
//!
//! 1. **Register** draws a consensus key and a network key per node and adds
//!    the node as a validator.
//! 2. **Setup** prepares the home directory and writes the key files.
//! 3. **Peers** computes every node's dial address.
//! 4. **Configure** validates and writes `config.toml`, listing every node
//!    (itself included) as a persistent peer, and `app.toml`.
//! 5. **Genesis** exports the descriptor and writes identical bytes
//!    everywhere.
//!
//! The first failure aborts the run; nothing after it is attempted.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use super::genesis::{
    ConsensusParams, GenesisDocument, GenesisError, NetworkDescriptor, ValidatorDescriptor,
    DEFAULT_BALANCE, DEFAULT_BLOCK_MAX_BYTES, DEFAULT_BLOCK_MAX_GAS, DEFAULT_STAKE,
};
use super::keys::{initial_validator_state_json, KeyGenerator, KeyPair};
use super::node_config::{peer_address, AppConfig, ConfigValidationError, ConsensusConfig, DEFAULT_MIN_GAS_PRICES};
use crate::remote::{shell_quote, RemoteError, RemoteShell, Session};

pub const DEFAULT_HOME_DIR: &str = "/root/.celestia-app";

const SECRET_MODE: u32 = 0o600;
const PUBLIC_MODE: u32 = 0o644;


// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Register,
    Setup,
    Peers,
    Configure,
    Genesis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Register => "register",
            Stage::Setup => "setup",
            Stage::Peers => "peers",
            Stage::Configure => "configure",
            Stage::Genesis => "genesis",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum BootstrapErrorKind {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Config(#[from] ConfigValidationError),

    #[error(transparent)]
    Genesis(#[from] GenesisError),

    #[error("cannot serialize {what}: {message}")]
    Serialize { what: &'static str, message: String },

    #[error("no nodes registered")]
    NoNodes,
}

#[derive(Debug, Error)]
#[error("bootstrap {stage} stage failed{}: {kind}", node_suffix(.node))]
pub struct BootstrapError {
    pub stage: Stage,
    /// Logical name of the node being processed, if any.
    pub node: Option<String>,
    #[source]
    pub kind: BootstrapErrorKind,
}

fn node_suffix(node: &Option<String>) -> String {
    match node {
        Some(name) => format!(" on {}", name),
        None => String::new(),
    }
}

impl BootstrapError {
    fn at(stage: Stage, node: Option<&str>) -> impl FnOnce(BootstrapErrorKind) -> BootstrapError + '_ {
        move |kind| BootstrapError {
            stage,
            node: node.map(str::to_string),
            kind,
        }
    }
}

fn serialize_err(what: &'static str) -> impl Fn(serde_json::Error) -> BootstrapErrorKind {
    move |e| BootstrapErrorKind::Serialize {
        what,
        message: e.to_string(),
    }
}

fn render_err(what: &'static str) -> impl Fn(toml::ser::Error) -> BootstrapErrorKind {
    move |e| BootstrapErrorKind::Serialize {
        what,
        message: e.to_string(),
    }
}


// ---------------------------------------------------------------------------
// Options / outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOptions {
    /// Node home directory on every host.
    pub home_dir: String,
    pub genesis_time: DateTime<Utc>,
    pub balance: u64,
    pub stake: u64,
    pub block_max_bytes: u64,
    pub block_max_gas: i64,
    pub min_gas_prices: String,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        BootstrapOptions {
            home_dir: DEFAULT_HOME_DIR.into(),
            genesis_time: DateTime::<Utc>::default(),
            balance: DEFAULT_BALANCE,
            stake: DEFAULT_STAKE,
            block_max_bytes: DEFAULT_BLOCK_MAX_BYTES,
            block_max_gas: DEFAULT_BLOCK_MAX_GAS,
            min_gas_prices: DEFAULT_MIN_GAS_PRICES.into(),
        }
    }
}

/// A node after bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrappedNode {
    pub name: String,
    pub address: String,
    pub validator_address: String,
    pub node_id: String,
    pub peer: String,
}

#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub genesis: GenesisDocument,
    /// Exact bytes written to every node.
    pub genesis_bytes: Vec<u8>,
    pub nodes: Vec<BootstrappedNode>,
}

impl BootstrapOutcome {
    pub fn peers(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.peer.clone()).collect()
    }
}


// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

struct NodeKeys {
    name: String,
    address: String,
    consensus: KeyPair,
    network: KeyPair,
}

pub struct BootstrapSequencer {
    chain_id: String,
    keys: KeyGenerator,
    shell: Arc<dyn RemoteShell>,
    options: BootstrapOptions,
    targets: Vec<(String, String)>,
}

impl BootstrapSequencer {
    /// Takes ownership of `keys`; the generator is used by this run only.
    pub fn new(chain_id: &str, keys: KeyGenerator, shell: Arc<dyn RemoteShell>, options: BootstrapOptions) -> Self {
        BootstrapSequencer {
            chain_id: chain_id.to_string(),
            keys,
            shell,
            options,
            targets: Vec::new(),
        }
    }

    /// Add a node. Registration order fixes key order and validator order.
    pub fn register(&mut self, name: &str, address: &str) {
        self.targets.push((name.to_string(), address.to_string()));
    }

    pub fn node_count(&self) -> usize {
        self.targets.len()
    }

    pub fn run(mut self) -> Result<BootstrapOutcome, BootstrapError> {
        if self.targets.is_empty() {
            return Err(BootstrapError::at(Stage::Register, None)(BootstrapErrorKind::NoNodes));
        }
        info!(chain_id = %self.chain_id, nodes = self.targets.len(), "bootstrapping network");

        let (nodes, mut descriptor) = self.stage_register()?;
        for node in &nodes {
            self.stage_setup(node)?;
        }
        let peers: Vec<String> = nodes
            .iter()
            .map(|n| peer_address(&n.network.node_id(), &n.address))
            .collect();
        debug!(stage = %Stage::Peers, peers = peers.len(), "peer addresses computed");
        for node in &nodes {
            self.stage_configure(node, &peers)?;
        }

        let genesis = descriptor
            .export()
            .map_err(|e| BootstrapError::at(Stage::Genesis, None)(e.into()))?;
        let genesis_bytes = genesis
            .to_bytes()
            .map_err(|e| BootstrapError::at(Stage::Genesis, None)(serialize_err("genesis")(e)))?;
        for node in &nodes {
            let path = format!("{}/config/genesis.json", self.options.home_dir);
            self.with_session(Stage::Genesis, node, |shell, session| {
                shell.write_file(session, &path, &genesis_bytes, PUBLIC_MODE)?;
                Ok(())
            })?;
        }
        info!(chain_id = %self.chain_id, bytes = genesis_bytes.len(), "genesis distributed");

        let nodes = nodes
            .iter()
            .zip(peers)
            .map(|(n, peer)| BootstrappedNode {
                name: n.name.clone(),
                address: n.address.clone(),
                validator_address: n.consensus.validator_address(),
                node_id: n.network.node_id(),
                peer,
            })
            .collect();

        Ok(BootstrapOutcome {
            genesis,
            genesis_bytes,
            nodes,
        })
    }

    fn stage_register(&mut self) -> Result<(Vec<NodeKeys>, NetworkDescriptor), BootstrapError> {
        let mut descriptor = NetworkDescriptor::new(&self.chain_id, self.options.genesis_time).with_params(
            ConsensusParams {
                block_max_bytes: self.options.block_max_bytes,
                block_max_gas: self.options.block_max_gas,
            },
        );
        let mut nodes = Vec::with_capacity(self.targets.len());
        for (name, address) in &self.targets {
            let consensus = self.keys.next_pair();
            let network = self.keys.next_pair();
            descriptor
                .add_validator(ValidatorDescriptor {
                    name: name.clone(),
                    consensus_pubkey: consensus.public_bytes(),
                    validator_address: consensus.validator_address(),
                    network_pubkey: network.public_bytes(),
                    p2p_address: peer_address(&network.node_id(), address),
                    balance: self.options.balance,
                    stake: self.options.stake,
                })
                .map_err(|e| BootstrapError::at(Stage::Register, Some(name.as_str()))(e.into()))?;
            debug!(stage = %Stage::Register, node = %name, node_id = %network.node_id(), "validator registered");
            nodes.push(NodeKeys {
                name: name.clone(),
                address: address.clone(),
                consensus,
                network,
            });
        }
        Ok((nodes, descriptor))
    }

    fn stage_setup(&self, node: &NodeKeys) -> Result<(), BootstrapError> {
        let home = &self.options.home_dir;
        let validator_key = format!("{}/config/priv_validator_key.json", home);
        let validator_state = format!("{}/data/priv_validator_state.json", home);
        let node_key = format!("{}/config/node_key.json", home);
        let prepare = format!(
            "mkdir -p {config} {data} && rm -f {vk} {vs} {nk}",
            config = shell_quote(&format!("{}/config", home)),
            data = shell_quote(&format!("{}/data", home)),
            vk = shell_quote(&validator_key),
            vs = shell_quote(&validator_state),
            nk = shell_quote(&node_key),
        );

        let at = |e| BootstrapError::at(Stage::Setup, Some(node.name.as_str()))(serialize_err("key file")(e));
        let validator_key_json = node.consensus.priv_validator_key_json().map_err(at)?;
        let node_key_json = node.network.node_key_json().map_err(at)?;
        let state_json = initial_validator_state_json().map_err(at)?;

        self.with_session(Stage::Setup, node, |shell, session| {
            shell.run(session, &prepare)?;
            shell.write_file(session, &validator_key, &validator_key_json, SECRET_MODE)?;
            shell.write_file(session, &validator_state, &state_json, SECRET_MODE)?;
            shell.write_file(session, &node_key, &node_key_json, SECRET_MODE)?;
            Ok(())
        })
    }

    fn stage_configure(&self, node: &NodeKeys, peers: &[String]) -> Result<(), BootstrapError> {
        let fail = |kind: BootstrapErrorKind| BootstrapError::at(Stage::Configure, Some(node.name.as_str()))(kind);

        let consensus = ConsensusConfig::for_node(&node.name, &node.address, peers);
        let app = AppConfig::default().with_min_gas_prices(&self.options.min_gas_prices);
        consensus.validate().map_err(|e| fail(e.into()))?;
        app.validate().map_err(|e| fail(e.into()))?;

        let consensus_toml = consensus.render().map_err(|e| fail(render_err("config.toml")(e)))?;
        let app_toml = app.render().map_err(|e| fail(render_err("app.toml")(e)))?;

        let home = &self.options.home_dir;
        self.with_session(Stage::Configure, node, |shell, session| {
            shell.write_file(session, &format!("{}/config/config.toml", home), consensus_toml.as_bytes(), PUBLIC_MODE)?;
            shell.write_file(session, &format!("{}/config/app.toml", home), app_toml.as_bytes(), PUBLIC_MODE)?;
            Ok(())
        })
    }

    /// Open a session to `node`, run `work`, and always close the session.
    fn with_session<F>(&self, stage: Stage, node: &NodeKeys, work: F) -> Result<(), BootstrapError>
    where
        F: FnOnce(&dyn RemoteShell, &Session) -> Result<(), RemoteError>,
    {
        let fail = |e: RemoteError| BootstrapError::at(stage, Some(node.name.as_str()))(e.into());
        let session = self.shell.connect(&node.address).map_err(fail)?;
        let result = work(self.shell.as_ref(), &session);
        self.shell.close(session);
        result.map_err(fail)?;
        debug!(stage = %stage, node = %node.name, "stage complete");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{CommandOutput, MockShell};

    const HOME: &str = "/root/.celestia-app";

    fn sequencer(shell: Arc<MockShell>, seed: u64, options: BootstrapOptions) -> BootstrapSequencer {
        let mut seq = BootstrapSequencer::new("devnet-1", KeyGenerator::from_seed(seed), shell, options);
        for i in 1..=3 {
            seq.register(&format!("validator-{}", i), &format!("10.0.0.{}", i));
        }
        seq
    }

    #[test]
    fn three_validators_share_genesis_and_peers() {
        let shell = Arc::new(MockShell::new());
        let outcome = sequencer(shell.clone(), 42, BootstrapOptions::default()).run().unwrap();

        assert_eq!(outcome.genesis.validators.len(), 3);
        assert_eq!(outcome.genesis.chain_id, "devnet-1");
        for (i, node) in outcome.nodes.iter().enumerate() {
            let ip = format!("10.0.0.{}", i + 1);
            assert_eq!(node.peer, format!("{}@{}:26656", node.node_id, ip));
            assert_eq!(outcome.genesis.validators[i].p2p_address, node.peer);

            let (genesis, mode) = shell.file(&ip, &format!("{}/config/genesis.json", HOME)).unwrap();
            assert_eq!(genesis, outcome.genesis_bytes);
            assert_eq!(mode, 0o644);
        }
    }

    #[test]
    fn key_files_are_private() {
        let shell = Arc::new(MockShell::new());
        sequencer(shell.clone(), 42, BootstrapOptions::default()).run().unwrap();
        for path in [
            "config/priv_validator_key.json",
            "data/priv_validator_state.json",
            "config/node_key.json",
        ] {
            let (_, mode) = shell.file("10.0.0.2", &format!("{}/{}", HOME, path)).unwrap();
            assert_eq!(mode, 0o600, "{}", path);
        }
        for path in ["config/config.toml", "config/app.toml"] {
            let (_, mode) = shell.file("10.0.0.2", &format!("{}/{}", HOME, path)).unwrap();
            assert_eq!(mode, 0o644, "{}", path);
        }
        let setup = &shell.commands_for("10.0.0.2")[0];
        assert!(setup.starts_with("mkdir -p '/root/.celestia-app/config' '/root/.celestia-app/data' && rm -f"));
        assert_eq!(shell.open_sessions(), 0);
    }

    #[test]
    fn config_lists_every_peer() {
        let shell = Arc::new(MockShell::new());
        let outcome = sequencer(shell.clone(), 42, BootstrapOptions::default()).run().unwrap();
        let expected = outcome.peers().join(",");
        for node in &outcome.nodes {
            let (bytes, _) = shell.file(&node.address, &format!("{}/config/config.toml", HOME)).unwrap();
            let config: toml::Value = toml::from_str(std::str::from_utf8(&bytes).unwrap()).unwrap();
            assert_eq!(config["p2p"]["persistent_peers"].as_str(), Some(expected.as_str()));
        }
    }

    #[test]
    fn genesis_pub_key_matches_validator_key_file() {
        let shell = Arc::new(MockShell::new());
        let outcome = sequencer(shell.clone(), 42, BootstrapOptions::default()).run().unwrap();
        for (i, node) in outcome.nodes.iter().enumerate() {
            let (bytes, _) = shell
                .file(&node.address, &format!("{}/config/priv_validator_key.json", HOME))
                .unwrap();
            let key_file: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            let pub_key = &outcome.genesis.validators[i].pub_key;
            assert_eq!(key_file["pub_key"]["type"].as_str(), Some(pub_key.kind.as_str()));
            assert_eq!(key_file["pub_key"]["value"].as_str(), Some(pub_key.value.as_str()));
            assert_eq!(key_file["address"].as_str(), Some(node.validator_address.as_str()));
        }
    }

    #[test]
    fn same_seed_same_network() {
        let a = sequencer(Arc::new(MockShell::new()), 42, BootstrapOptions::default()).run().unwrap();
        let b = sequencer(Arc::new(MockShell::new()), 42, BootstrapOptions::default()).run().unwrap();
        assert_eq!(a.genesis_bytes, b.genesis_bytes);
        assert_eq!(a.peers(), b.peers());

        let c = sequencer(Arc::new(MockShell::new()), 43, BootstrapOptions::default()).run().unwrap();
        assert_ne!(a.genesis_bytes, c.genesis_bytes);
    }

    #[test]
    fn invalid_app_config_writes_no_config_files() {
        let shell = Arc::new(MockShell::new());
        let options = BootstrapOptions {
            min_gas_prices: "free".into(),
            ..BootstrapOptions::default()
        };
        let err = sequencer(shell.clone(), 42, options).run().unwrap_err();
        assert_eq!(err.stage, Stage::Configure);
        assert_eq!(err.node.as_deref(), Some("validator-1"));
        assert!(matches!(err.kind, BootstrapErrorKind::Config(_)));
        for i in 1..=3 {
            let files = shell.files_on(&format!("10.0.0.{}", i));
            assert!(files.iter().all(|f| !f.ends_with(".toml") && !f.ends_with("genesis.json")));
        }
    }

    #[test]
    fn remote_failure_names_stage_and_node() {
        let shell = Arc::new(MockShell::new());
        shell.respond(Some("10.0.0.2"), "mkdir -p", CommandOutput::failed(1, "read-only file system"));
        let err = sequencer(shell.clone(), 42, BootstrapOptions::default()).run().unwrap_err();
        assert_eq!(err.stage, Stage::Setup);
        assert_eq!(err.node.as_deref(), Some("validator-2"));
        assert!(err.to_string().contains("setup stage failed on validator-2"));
        assert!(shell.files_on("10.0.0.3").is_empty());
        assert_eq!(shell.open_sessions(), 0);
    }

    #[test]
    fn unreachable_node_aborts() {
        let shell = Arc::new(MockShell::new());
        shell.set_unreachable("10.0.0.3");
        let err = sequencer(shell, 42, BootstrapOptions::default()).run().unwrap_err();
        assert!(matches!(err.kind, BootstrapErrorKind::Remote(RemoteError::Connection { .. })));
    }

    #[test]
    fn empty_network_is_rejected() {
        let seq = BootstrapSequencer::new(
            "devnet-1",
            KeyGenerator::default(),
            Arc::new(MockShell::new()),
            BootstrapOptions::default(),
        );
        let err = seq.run().unwrap_err();
        assert!(matches!(err.kind, BootstrapErrorKind::NoNodes));
    }
}
