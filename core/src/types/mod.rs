//! Plain data types shared across the crate.

pub mod instance;
pub mod state;

pub use instance::{provider_instance_name, InstallFlags, InstanceSpec, VolumeSpec};
pub use state::{InstanceRecord, PersistedState};
