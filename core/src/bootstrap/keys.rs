//! Deterministic node key material.
//!
//! A single `KeyGenerator` is seeded once per bootstrap run and hands out
//! ed25519 key pairs in call order. Same seed and same call order always
//! yield the same keys.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::SigningKey;
use rand_chacha::ChaCha20Rng;
use rand_core::{RngCore, SeedableRng};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Seed used when the operator does not supply one.
pub const DEFAULT_SEED: u64 = 42;

pub(crate) const PUB_KEY_TYPE: &str = "tendermint/PubKeyEd25519";
const PRIV_KEY_TYPE: &str = "tendermint/PrivKeyEd25519";

/// Standard padded base64, the encoding of every key value on disk and in
/// the genesis document.
pub(crate) fn encode_key(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}


// ---------------------------------------------------------------------------
// KeyGenerator
// ---------------------------------------------------------------------------

/// Seeded source of key pairs. Not `Clone`: one owner draws from the
/// stream.
pub struct KeyGenerator {
    rng: ChaCha20Rng,
}

impl std::fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyGenerator { .. }")
    }
}

impl KeyGenerator {
    pub fn from_seed(seed: u64) -> Self {
        KeyGenerator {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    /// Draw the next key pair.
    pub fn next_pair(&mut self) -> KeyPair {
        let mut secret = [0u8; 32];
        self.rng.fill_bytes(&mut secret);
        KeyPair {
            signing: SigningKey::from_bytes(&secret),
        }
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::from_seed(DEFAULT_SEED)
    }
}


// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public_bytes()))
            .finish()
    }
}

impl KeyPair {
    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// First 20 bytes of SHA-256 over the public key.
    pub fn address(&self) -> [u8; 20] {
        let digest = Sha256::digest(self.public_bytes());
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[..20]);
        out
    }

    /// Lower-case hex address, as used in peer strings.
    pub fn node_id(&self) -> String {
        hex::encode(self.address())
    }

    /// Upper-case hex address, as used for validators.
    pub fn validator_address(&self) -> String {
        hex::encode_upper(self.address())
    }

    pub fn public_key_base64(&self) -> String {
        encode_key(&self.public_bytes())
    }

    /// Base64 of the 64-byte secret||public encoding.
    fn private_key_base64(&self) -> String {
        encode_key(&self.signing.to_keypair_bytes())
    }

    /// Contents of `priv_validator_key.json`.
    pub fn priv_validator_key_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let doc = PrivValidatorKey {
            address: self.validator_address(),
            pub_key: TypedKey {
                kind: PUB_KEY_TYPE,
                value: self.public_key_base64(),
            },
            priv_key: TypedKey {
                kind: PRIV_KEY_TYPE,
                value: self.private_key_base64(),
            },
        };
        serde_json::to_vec_pretty(&doc)
    }

    /// Contents of `node_key.json`.
    pub fn node_key_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let doc = NodeKey {
            priv_key: TypedKey {
                kind: PRIV_KEY_TYPE,
                value: self.private_key_base64(),
            },
        };
        serde_json::to_vec_pretty(&doc)
    }
}


/// Contents of a fresh `priv_validator_state.json`.
pub fn initial_validator_state_json() -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(&ValidatorState {
        height: "0",
        round: 0,
        step: 0,
    })
}


#[derive(Serialize)]
struct TypedKey {
    #[serde(rename = "type")]
    kind: &'static str,
    value: String,
}

#[derive(Serialize)]
struct PrivValidatorKey {
    address: String,
    pub_key: TypedKey,
    priv_key: TypedKey,
}

#[derive(Serialize)]
struct NodeKey {
    priv_key: TypedKey,
}

#[derive(Serialize)]
struct ValidatorState {
    height: &'static str,
    round: u32,
    step: u32,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_keys() {
        let mut a = KeyGenerator::from_seed(7);
        let mut b = KeyGenerator::from_seed(7);
        for _ in 0..4 {
            assert_eq!(a.next_pair().public_bytes(), b.next_pair().public_bytes());
        }
    }

    #[test]
    fn successive_pairs_differ() {
        let mut keys = KeyGenerator::default();
        let first = keys.next_pair();
        let second = keys.next_pair();
        assert_ne!(first.public_bytes(), second.public_bytes());
    }

    #[test]
    fn different_seed_different_keys() {
        let a = KeyGenerator::from_seed(1).next_pair();
        let b = KeyGenerator::from_seed(2).next_pair();
        assert_ne!(a.node_id(), b.node_id());
    }

    #[test]
    fn address_is_truncated_sha256() {
        let pair = KeyGenerator::default().next_pair();
        let digest = Sha256::digest(pair.public_bytes());
        assert_eq!(pair.address(), digest[..20]);
        assert_eq!(pair.node_id().len(), 40);
        assert_eq!(pair.node_id().to_uppercase(), pair.validator_address());
    }

    #[test]
    fn key_files_use_typed_base64() {
        let pair = KeyGenerator::default().next_pair();
        let doc: serde_json::Value = serde_json::from_slice(&pair.priv_validator_key_json().unwrap()).unwrap();
        assert_eq!(doc["pub_key"]["type"], PUB_KEY_TYPE);
        assert_eq!(doc["address"], pair.validator_address());
        let secret = BASE64.decode(doc["priv_key"]["value"].as_str().unwrap()).unwrap();
        assert_eq!(secret.len(), 64);
        assert_eq!(&secret[32..], &pair.public_bytes()[..]);

        let node: serde_json::Value = serde_json::from_slice(&pair.node_key_json().unwrap()).unwrap();
        assert_eq!(node["priv_key"]["type"], PRIV_KEY_TYPE);

        let state: serde_json::Value = serde_json::from_slice(&initial_validator_state_json().unwrap()).unwrap();
        assert_eq!(state["height"], "0");
    }
}
