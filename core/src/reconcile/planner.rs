//! Reconciliation planner: diffs desired instance specs against recorded
//! instances.
//!
//! The planner is pure. It never talks to the provider and never mutates
//! state; the reconciler executes the plan.

use std::collections::HashSet;

use crate::types::{InstanceRecord, InstanceSpec};


/// What reconciliation has to do for one project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Desired instances with no record, in spec order.
    pub create: Vec<InstanceSpec>,
    /// Recorded instances that are still desired.
    pub existing: Vec<InstanceRecord>,
    /// Recorded instances that are no longer desired. Reported only; never
    /// deleted implicitly.
    pub orphaned: Vec<InstanceRecord>,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        self.create.is_empty()
    }
}


/// Compute the plan that moves `records` to `desired`.
///
/// Matching is by logical name. A spec listed twice is only created once.
pub fn plan(records: &[InstanceRecord], desired: &[InstanceSpec]) -> Plan {
    let recorded: HashSet<&str> = records.iter().map(|r| r.name.as_str()).collect();
    let wanted: HashSet<&str> = desired.iter().map(|s| s.name.as_str()).collect();

    let mut seen = HashSet::new();
    let create = desired
        .iter()
        .filter(|spec| !recorded.contains(spec.name.as_str()))
        .filter(|spec| seen.insert(spec.name.as_str()))
        .cloned()
        .collect();

    let (existing, orphaned) = records
        .iter()
        .cloned()
        .partition(|r| wanted.contains(r.name.as_str()));

    Plan {
        create,
        existing,
        orphaned,
    }
}
