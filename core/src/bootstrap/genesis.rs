//! Network descriptor and genesis document.
//!
//! `NetworkDescriptor` collects validators while the network is being
//! assembled. `export` closes it and produces the immutable
//! `GenesisDocument` that is serialized once and shipped to every node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::keys::{encode_key, PUB_KEY_TYPE};

/// Block size the consensus app starts with unless configured otherwise.
pub const DEFAULT_BLOCK_MAX_BYTES: u64 = 128_000_000;
/// Largest block size the network accepts; larger values are clamped.
pub const MAX_BLOCK_MAX_BYTES: u64 = 104_857_600;
/// `-1` means no gas limit per block.
pub const DEFAULT_BLOCK_MAX_GAS: i64 = -1;

pub const DEFAULT_BALANCE: u64 = 10_000_000_000_000_000;
pub const DEFAULT_STAKE: u64 = 1_000_000_000_000;

const BOND_DENOM: &str = "utia";


#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenesisError {
    #[error("network descriptor already exported")]
    Closed,

    #[error("validator '{0}' registered twice")]
    DuplicateValidator(String),

    #[error("genesis needs at least one validator")]
    NoValidators,
}


// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// A validator as registered during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorDescriptor {
    pub name: String,
    pub consensus_pubkey: [u8; 32],
    pub validator_address: String,
    pub network_pubkey: [u8; 32],
    /// `node_id@ip:port` other nodes dial.
    pub p2p_address: String,
    pub balance: u64,
    pub stake: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusParams {
    pub block_max_bytes: u64,
    pub block_max_gas: i64,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        ConsensusParams {
            block_max_bytes: DEFAULT_BLOCK_MAX_BYTES,
            block_max_gas: DEFAULT_BLOCK_MAX_GAS,
        }
    }
}

/// Mutable description of the network under construction.
#[derive(Debug, Clone)]
pub struct NetworkDescriptor {
    chain_id: String,
    genesis_time: DateTime<Utc>,
    params: ConsensusParams,
    validators: Vec<ValidatorDescriptor>,
    closed: bool,
}

impl NetworkDescriptor {
    pub fn new(chain_id: &str, genesis_time: DateTime<Utc>) -> Self {
        NetworkDescriptor {
            chain_id: chain_id.to_string(),
            genesis_time,
            params: ConsensusParams::default(),
            validators: Vec::new(),
            closed: false,
        }
    }

    pub fn with_params(mut self, params: ConsensusParams) -> Self {
        self.params = params;
        self
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn validators(&self) -> &[ValidatorDescriptor] {
        &self.validators
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn add_validator(&mut self, validator: ValidatorDescriptor) -> Result<(), GenesisError> {
        if self.closed {
            return Err(GenesisError::Closed);
        }
        if self.validators.iter().any(|v| v.name == validator.name) {
            return Err(GenesisError::DuplicateValidator(validator.name));
        }
        self.validators.push(validator);
        Ok(())
    }

    /// Close the descriptor and build the genesis document.
    pub fn export(&mut self) -> Result<GenesisDocument, GenesisError> {
        if self.closed {
            return Err(GenesisError::Closed);
        }
        if self.validators.is_empty() {
            return Err(GenesisError::NoValidators);
        }
        self.closed = true;

        let accounts = self
            .validators
            .iter()
            .map(|v| GenesisAccount {
                name: v.name.clone(),
                address: v.validator_address.clone(),
                coins: vec![Coin::new(v.balance)],
            })
            .collect();
        let validators = self
            .validators
            .iter()
            .map(|v| GenesisValidator {
                name: v.name.clone(),
                address: v.validator_address.clone(),
                pub_key: PubKey::ed25519(&v.consensus_pubkey),
                network_pub_key: PubKey::ed25519(&v.network_pubkey),
                p2p_address: v.p2p_address.clone(),
                stake: Coin::new(v.stake),
                power: v.stake.to_string(),
            })
            .collect();

        Ok(GenesisDocument {
            genesis_time: self.genesis_time,
            chain_id: self.chain_id.clone(),
            initial_height: "1".into(),
            consensus_params: GenesisConsensusParams {
                block: BlockParams {
                    max_bytes: clamp_block_max_bytes(self.params.block_max_bytes).to_string(),
                    max_gas: self.params.block_max_gas.to_string(),
                },
            },
            validators,
            app_state: AppState { accounts },
        })
    }
}


/// Clamp a configured block size to what the network accepts.
pub fn clamp_block_max_bytes(requested: u64) -> u64 {
    requested.min(MAX_BLOCK_MAX_BYTES)
}


// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisDocument {
    pub genesis_time: DateTime<Utc>,
    pub chain_id: String,
    pub initial_height: String,
    pub consensus_params: GenesisConsensusParams,
    pub validators: Vec<GenesisValidator>,
    pub app_state: AppState,
}

impl GenesisDocument {
    /// Canonical serialized form written to every node.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn block_max_bytes(&self) -> Option<u64> {
        self.consensus_params.block.max_bytes.parse().ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisConsensusParams {
    pub block: BlockParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockParams {
    pub max_bytes: String,
    pub max_gas: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKey {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl PubKey {
    fn ed25519(bytes: &[u8; 32]) -> Self {
        PubKey {
            kind: PUB_KEY_TYPE.into(),
            value: encode_key(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

impl Coin {
    fn new(amount: u64) -> Self {
        Coin {
            denom: BOND_DENOM.into(),
            amount: amount.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub name: String,
    pub address: String,
    pub pub_key: PubKey,
    pub network_pub_key: PubKey,
    pub p2p_address: String,
    pub stake: Coin,
    pub power: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub name: String,
    pub address: String,
    pub coins: Vec<Coin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    pub accounts: Vec<GenesisAccount>,
}
