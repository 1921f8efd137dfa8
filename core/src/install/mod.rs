//! Concurrent software installation across the fleet.
//!
//! One pass installs one component on every selected host. Hosts run in
//! parallel, bounded by a semaphore; a failure on one host never stops the
//! others, and the pass reports every outcome once all hosts are done.

pub mod component;
pub mod installer;

use thiserror::Error;

use crate::remote::RemoteError;

pub use component::Component;
pub use installer::{
    HostFailure, HostOutcome, InstallAction, InstallReport, InstallTarget, Installer, Outcome,
    MAX_CONCURRENT_SESSIONS,
};


#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{action} failed on {host} ({address}): {source}")]
    Host {
        action: String,
        host: String,
        address: String,
        #[source]
        source: RemoteError,
    },
}
