//! Per-node `config.toml` and `app.toml`.
//!
//! Only the fields the bootstrap sets are modelled; the node fills in the
//! rest with its own defaults on first start.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const P2P_PORT: u16 = 26656;
pub const RPC_PORT: u16 = 26657;

/// 128 MiB, the gRPC message ceiling for both directions.
pub const GRPC_MAX_MSG_SIZE: u64 = 128 * 1024 * 1024;

pub const DEFAULT_MIN_GAS_PRICES: &str = "0.001utia";


#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("minimum-gas-prices is empty")]
    EmptyGasPrices,

    #[error("invalid minimum-gas-prices entry '{0}'")]
    InvalidGasPrice(String),

    #[error("grpc {field} must be positive")]
    ZeroGrpcLimit { field: &'static str },

    #[error("moniker is empty")]
    EmptyMoniker,
}


/// `<node_id>@<ip>:26656`, the address other nodes dial.
pub fn peer_address(node_id: &str, ip: &str) -> String {
    format!("{}@{}:{}", node_id, ip, P2P_PORT)
}


// ---------------------------------------------------------------------------
// config.toml
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub moniker: String,
    pub rpc: RpcSection,
    pub p2p: P2pSection,
    pub instrumentation: InstrumentationSection,
    pub tx_index: TxIndexSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcSection {
    pub laddr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct P2pSection {
    pub laddr: String,
    /// Comma-separated peer addresses.
    pub persistent_peers: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentationSection {
    pub prometheus: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIndexSection {
    pub indexer: String,
}

impl ConsensusConfig {
    /// Config for the node `moniker` listening on `ip`, dialing `peers`.
    pub fn for_node(moniker: &str, ip: &str, peers: &[String]) -> Self {
        ConsensusConfig {
            moniker: moniker.to_string(),
            rpc: RpcSection {
                laddr: format!("tcp://0.0.0.0:{}", RPC_PORT),
            },
            p2p: P2pSection {
                laddr: format!("tcp://{}:{}", ip, P2P_PORT),
                persistent_peers: peers.join(","),
            },
            instrumentation: InstrumentationSection { prometheus: true },
            tx_index: TxIndexSection {
                indexer: "kv".into(),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.moniker.trim().is_empty() {
            return Err(ConfigValidationError::EmptyMoniker);
        }
        Ok(())
    }

    pub fn render(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }
}


// ---------------------------------------------------------------------------
// app.toml
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(rename = "minimum-gas-prices")]
    pub minimum_gas_prices: String,
    pub grpc: GrpcSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcSection {
    pub enable: bool,
    #[serde(rename = "max-recv-msg-size")]
    pub max_recv_msg_size: u64,
    #[serde(rename = "max-send-msg-size")]
    pub max_send_msg_size: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            minimum_gas_prices: DEFAULT_MIN_GAS_PRICES.into(),
            grpc: GrpcSection {
                enable: true,
                max_recv_msg_size: GRPC_MAX_MSG_SIZE,
                max_send_msg_size: GRPC_MAX_MSG_SIZE,
            },
        }
    }
}

impl AppConfig {
    pub fn with_min_gas_prices(mut self, prices: &str) -> Self {
        self.minimum_gas_prices = prices.to_string();
        self
    }

    /// Reject settings the app would refuse at startup.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let prices = self.minimum_gas_prices.trim();
        if prices.is_empty() {
            return Err(ConfigValidationError::EmptyGasPrices);
        }
        for entry in prices.split(',') {
            if !is_dec_coin(entry.trim()) {
                return Err(ConfigValidationError::InvalidGasPrice(entry.trim().to_string()));
            }
        }
        if self.grpc.max_recv_msg_size == 0 {
            return Err(ConfigValidationError::ZeroGrpcLimit { field: "max-recv-msg-size" });
        }
        if self.grpc.max_send_msg_size == 0 {
            return Err(ConfigValidationError::ZeroGrpcLimit { field: "max-send-msg-size" });
        }
        Ok(())
    }

    pub fn render(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }
}


/// `<non-negative decimal><denom>`, denom starting with a letter.
fn is_dec_coin(s: &str) -> bool {
    let split = s
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(s.len());
    let (amount, denom) = s.split_at(split);
    if amount.is_empty() || denom.len() < 3 {
        return false;
    }
    let mut dots = 0;
    for c in amount.chars() {
        match c {
            '0'..='9' => {}
            '.' => dots += 1,
            _ => return false,
        }
    }
    dots <= 1
        && !amount.starts_with('.')
        && !amount.ends_with('.')
        && denom
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | ':' | '.' | '_' | '-'))
}
