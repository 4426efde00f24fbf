//! Interfaces the coordinator consumes from its host scheduler.
//!
//! The coordinator never owns units or timers. It reads the unit listing and
//! the placement snapshot, and it acts on units that the host has parked.
//!
//! # Components
//!
//! - [`UnitLister`]: units by label selector within a namespace
//! - [`PlacementSnapshot`]: units matching a predicate in the live placement view
//! - [`ParkedUnits`]: enumeration of parked units with allow/reject handles
//! - [`memory`]: in-memory cluster store implementing the first two
//! - [`waiting`]: waiting room implementing [`ParkedUnits`]

pub mod memory;
pub mod waiting;

use std::collections::BTreeMap;

use crate::error::Result;
use crate::scheduler::Unit;

pub use memory::InMemoryCluster;
pub use waiting::{WaitOutcome, WaitingRoom};

/// Equality-based label selector. An empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

pub trait UnitLister: Send + Sync {
    fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Unit>>;
}

pub trait PlacementSnapshot: Send + Sync {
    fn filtered_list(&self, predicate: &dyn Fn(&Unit) -> bool) -> Result<Vec<Unit>>;
}

/// Handle to a unit the host is holding at the admission point.
///
/// Resolving an already-resolved unit is a no-op.
pub trait ParkedUnit {
    fn unit(&self) -> &Unit;
    fn allow(&self, actor: &str);
    fn reject(&self, actor: &str);
}

pub trait ParkedUnits: Send + Sync {
    fn for_each_parked(&self, f: &mut dyn FnMut(&dyn ParkedUnit));

    fn count_parked(&self, predicate: &dyn Fn(&Unit) -> bool) -> usize {
        let mut count = 0;
        self.for_each_parked(&mut |parked| {
            if predicate(parked.unit()) {
                count += 1;
            }
        });
        count
    }
}
