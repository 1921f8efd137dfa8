//! Fleet reconciliation.
//!
//! Brings the provider-side fleet in line with the desired instance specs:
//! ensure the user and project exist, create missing instances, wait for them
//! to become ready, and record their addresses. All state changes go through
//! the `Repository`.

pub mod planner;
pub mod reconciler;

use std::time::Duration;

use thiserror::Error;

use crate::provider::ProviderError;
use crate::state::StateError;

pub use planner::{plan, Plan};
pub use reconciler::{ReconcileOptions, ReconcileSummary, Reconciler};


#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("provider call {op} failed: {source}")]
    Provider {
        op: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("instances not ready after {}s: {}", .timeout.as_secs(), .pending.join(", "))]
    Timeout {
        timeout: Duration,
        pending: Vec<String>,
    },

    #[error("no pending instance found for '{name}' after create")]
    NoPendingInstance { name: String },

    #[error("project '{project}' has no recorded id; nothing to act on")]
    ProjectNotRecorded { project: String },

    #[error(transparent)]
    State(#[from] StateError),
}

impl ReconcileError {
    pub(crate) fn provider(op: &'static str) -> impl FnOnce(ProviderError) -> ReconcileError {
        move |source| ReconcileError::Provider { op, source }
    }
}
