//! Fleetstrap core.
//!
//! Provisions a fleet of remote instances through a provider API, installs
//! software on them over SSH, and bootstraps them into one consensus network.
//!
//! Control flow is `reconcile` (state file updated) → `install` (one pass per
//! component) → `bootstrap` (one shot, all nodes ready). `ops::Fleet` wires
//! the pieces together for the CLI.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod install;
pub mod ops;
pub mod provider;
pub mod reconcile;
pub mod remote;
pub mod state;
pub mod types;

pub use error::{Error, Result};
pub use ops::{Fleet, FleetStatus};
