//! One-shot network bootstrap: key generation, genesis assembly, and
//! distribution of identities and configuration to every node.

pub mod genesis;
pub mod keys;
pub mod node_config;
pub mod sequencer;

pub use genesis::{GenesisDocument, GenesisError, NetworkDescriptor, ValidatorDescriptor};
pub use keys::{KeyGenerator, KeyPair, DEFAULT_SEED};
pub use node_config::{peer_address, AppConfig, ConfigValidationError, ConsensusConfig};
pub use sequencer::{
    BootstrapError, BootstrapErrorKind, BootstrapOptions, BootstrapOutcome, BootstrapSequencer,
    BootstrappedNode, Stage,
};
