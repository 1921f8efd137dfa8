//! Crate-level error type.
//!
//! Each module keeps its own error enum; `Error` unifies them for the
//! operations facade and the CLI.

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::config::ConfigError;
use crate::install::InstallError;
use crate::provider::ProviderError;
use crate::reconcile::ReconcileError;
use crate::state::StateError;


#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    /// Bootstrap needs every target node to have an address.
    #[error("instances have no address yet (run prepare-infra first): {}", .0.join(", "))]
    NotReady(Vec<String>),
}

pub type Result<T> = std::result::Result<T, Error>;
