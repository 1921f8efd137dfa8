//! Durable fleet state.
//!
//! `store` loads and atomically saves the JSON state file and exposes the
//! `Repository`, the only type allowed to mutate persisted state. `lock`
//! keeps a second process from writing the same file concurrently.

pub mod lock;
pub mod store;

use std::path::PathBuf;

use thiserror::Error;

pub use lock::StateLock;
pub use store::{default_state_path, load, save, Repository};


/// Errors from reading, writing or locking the state file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file I/O failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {} is not valid JSON: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("state file is locked by another process ({})", .path.display())]
    Locked { path: PathBuf },
}
